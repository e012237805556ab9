// id.rs — Stable semantic identifiers for patch state
//
// A stateful block's state is addressed by (owning block, state kind). Both
// halves come from the patch itself: the block's persistent identifier is
// its name, and the kind is a fixed tag per op. Nothing here depends on
// allocation order, graph position, or a counter, so identities survive
// unrelated structural edits between compiles.

use std::fmt;

use serde::{Serialize, Serializer};

/// Persistent identifier of a block, as assigned by the patch author.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an element population (instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for InstanceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Fixed tag naming what a piece of state is for its owning block.
///
/// Tags are part of the persisted identity: renaming one is equivalent to
/// discarding every state of that kind on the next hot-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKind {
    /// Running sum (`integrate`).
    Accum,
    /// Previous input (`delay`).
    Delay,
    /// One-pole smoother memory (`lag`).
    Lag,
    /// Position/velocity pair (`spring`).
    Spring,
}

impl StateKind {
    pub fn tag(self) -> &'static str {
        match self {
            StateKind::Accum => "accum",
            StateKind::Delay => "delay",
            StateKind::Lag => "lag",
            StateKind::Spring => "spring",
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Identity of one piece of persistent state: `(owner block, kind)`.
///
/// Unique within a compiled program and stable across recompiles for as
/// long as the owner and kind persist in the patch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StableStateId {
    pub block: BlockId,
    pub kind: StateKind,
}

impl StableStateId {
    pub fn new(block: BlockId, kind: StateKind) -> Self {
        Self { block, kind }
    }

    /// Derive the state id for `kind` owned by `block`.
    pub fn for_block(block: &BlockId, kind: StateKind) -> Self {
        Self::new(block.clone(), kind)
    }
}

impl fmt::Display for StableStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.kind)
    }
}

impl Serialize for StableStateId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_block_and_tag() {
        let id = StableStateId::for_block(&BlockId::new("acc"), StateKind::Accum);
        assert_eq!(id.to_string(), "acc:accum");
    }

    #[test]
    fn same_owner_and_kind_is_same_id() {
        let a = StableStateId::for_block(&BlockId::new("osc"), StateKind::Spring);
        let b = StableStateId::new(BlockId::new("osc"), StateKind::Spring);
        assert_eq!(a, b);
    }

    #[test]
    fn kind_distinguishes_states_of_one_block() {
        let block = BlockId::new("b");
        assert_ne!(
            StableStateId::for_block(&block, StateKind::Delay),
            StableStateId::for_block(&block, StateKind::Accum)
        );
    }

    #[test]
    fn serializes_as_display_string() {
        let id = StableStateId::for_block(&BlockId::new("lp"), StateKind::Lag);
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"lp:lag\"");
    }
}
