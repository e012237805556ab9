// lanes.rs — Lane identity correspondence between two element populations
//
// Given the per-element identity keys of an instance before and after a
// recompile, computes which old lane (if any) each new lane continues.
//
// Preconditions: keys are caller-supplied identity tokens; uniqueness is
//   expected but not required.
// Postconditions: the mapping has exactly one entry per new lane (Explicit)
//   or is positional (Identity); every recorded old index is < old_keys.len().
// Failure modes: none. Duplicate old keys resolve first-wins and are
//   reported as collisions.
// Side effects: none.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;

// ── Mapping ────────────────────────────────────────────────────────────────

/// Correspondence from new lanes to old lanes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneIdentityMapping {
    /// New lane `i` continues old lane `i`. Sizes may differ.
    Identity,
    /// `new_to_old[i]` is the old lane new lane `i` continues, if any.
    Explicit(Vec<Option<usize>>),
}

impl LaneIdentityMapping {
    /// The old lane to copy into `new_lane`, given the old population size.
    ///
    /// Never returns an index `>= old_lanes`.
    pub fn source_lane(&self, new_lane: usize, old_lanes: usize) -> Option<usize> {
        match self {
            LaneIdentityMapping::Identity => (new_lane < old_lanes).then_some(new_lane),
            LaneIdentityMapping::Explicit(new_to_old) => new_to_old
                .get(new_lane)
                .copied()
                .flatten()
                .filter(|&old| old < old_lanes),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, LaneIdentityMapping::Identity)
    }
}

/// An old key seen more than once. `kept` is the lane the key resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCollision {
    pub kept: usize,
    pub shadowed: usize,
}

/// Result of [`build_mapping`]: the correspondence plus any key collisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneMapping {
    pub mapping: LaneIdentityMapping,
    pub collisions: Vec<KeyCollision>,
}

impl LaneMapping {
    pub fn identity() -> Self {
        Self {
            mapping: LaneIdentityMapping::Identity,
            collisions: Vec::new(),
        }
    }
}

// ── Construction ───────────────────────────────────────────────────────────

/// Compute the lane correspondence between `old_keys` and `new_keys`.
///
/// Identical key sequences yield `Identity`. Otherwise each new key is looked
/// up in a hash index over the old keys, O(old + new). When a key repeats
/// among the old keys the first occurrence wins.
pub fn build_mapping<K: Hash + Eq>(old_keys: &[K], new_keys: &[K]) -> LaneMapping {
    if old_keys == new_keys {
        return LaneMapping::identity();
    }

    let mut index: HashMap<&K, usize> = HashMap::with_capacity(old_keys.len());
    let mut collisions = Vec::new();
    for (lane, key) in old_keys.iter().enumerate() {
        match index.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(lane);
            }
            Entry::Occupied(first) => collisions.push(KeyCollision {
                kept: *first.get(),
                shadowed: lane,
            }),
        }
    }

    let new_to_old = new_keys.iter().map(|key| index.get(key).copied()).collect();

    LaneMapping {
        mapping: LaneIdentityMapping::Explicit(new_to_old),
        collisions,
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
