// Property-based tests for state identity and migration invariants.
//
// Three categories:
// 1. Lane mapping: explicit mappings point at the first matching old key,
//    never out of range, and identical keys collapse to identity
// 2. Migration completeness: every slot of the new buffer is written
// 3. Identity stability: reordering independent blocks keeps every
//    state id and carries every value across a swap
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use patchc::events::{MigrationOutcome, NullSink};
use patchc::id::{BlockId, InstanceId, StableStateId, StateKind};
use patchc::lanes::{build_mapping, LaneIdentityMapping};
use patchc::migrate::{migrate, LaneMappings};
use patchc::pipeline::compile;
use patchc::registry::Registry;
use patchc::runtime::Executor;
use patchc::slots::{StateAllocator, StateBuffer, StateLayout, StateShape};
use proptest::prelude::*;

// ── Generators ──────────────────────────────────────────────────────────────

/// Small alphabet so old and new populations overlap and repeat.
fn arb_keys() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-f]", 0..10)
}

fn arb_kind() -> impl Strategy<Value = StateKind> {
    prop_oneof![
        Just(StateKind::Accum),
        Just(StateKind::Delay),
        Just(StateKind::Lag),
        Just(StateKind::Spring),
    ]
}

fn arb_shape() -> impl Strategy<Value = StateShape> {
    let initial = prop::collection::vec(-5.0f64..5.0, 1..4);
    prop_oneof![
        initial.clone().prop_map(|initial| StateShape::Scalar { initial }),
        (prop_oneof![Just("p"), Just("q")], 0usize..6, initial).prop_map(
            |(instance, lanes, initial)| StateShape::Field {
                instance: InstanceId::new(instance),
                lanes,
                initial,
            }
        ),
    ]
}

/// A layout from random requests; repeated ids are dropped.
fn arb_layout() -> impl Strategy<Value = StateLayout> {
    prop::collection::vec(("[a-e]", arb_kind(), arb_shape()), 0..8).prop_map(|requests| {
        let mut alloc = StateAllocator::new();
        for (block, kind, shape) in requests {
            let _ = alloc.allocate(StableStateId::new(BlockId::new(block), kind), shape);
        }
        alloc.plan()
    })
}

fn arb_lane_mapping() -> impl Strategy<Value = LaneIdentityMapping> {
    prop_oneof![
        Just(LaneIdentityMapping::Identity),
        prop::collection::vec(prop::option::of(0usize..8), 0..8)
            .prop_map(LaneIdentityMapping::Explicit),
    ]
}

fn arb_lane_mappings() -> impl Strategy<Value = LaneMappings> {
    (
        prop::option::of(arb_lane_mapping()),
        prop::option::of(arb_lane_mapping()),
    )
        .prop_map(|(p, q)| {
            let mut lanes = LaneMappings::new();
            if let Some(p) = p {
                lanes.insert(InstanceId::new("p"), p);
            }
            if let Some(q) = q {
                lanes.insert(InstanceId::new("q"), q);
            }
            lanes
        })
}

/// Distinct block names that cannot collide with keywords.
fn arb_block_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("s_[a-z]{1,5}", 1..8).prop_map(|names| names.into_iter().collect())
}

fn stateful_op() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("integrate(1)"),
        Just("delay(t, 2)"),
        Just("lag(t, 0.25)"),
        Just("spring(t, 0.1)"),
    ]
}

// ── Lane mapping ────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn explicit_mapping_points_at_first_matching_key(old in arb_keys(), new in arb_keys()) {
        let result = build_mapping(&old, &new);
        match result.mapping {
            LaneIdentityMapping::Identity => prop_assert_eq!(&old, &new),
            LaneIdentityMapping::Explicit(new_to_old) => {
                prop_assert_eq!(new_to_old.len(), new.len());
                for (lane, source) in new_to_old.iter().enumerate() {
                    let first = old.iter().position(|k| k == &new[lane]);
                    prop_assert_eq!(*source, first);
                }
            }
        }
    }

    #[test]
    fn identical_keys_always_map_to_identity(keys in arb_keys()) {
        prop_assert!(build_mapping(&keys, &keys).mapping.is_identity());
    }

    #[test]
    fn collisions_count_repeated_old_keys(old in arb_keys(), new in arb_keys()) {
        let result = build_mapping(&old, &new);
        if old == new {
            return Ok(());
        }
        let distinct: std::collections::HashSet<_> = old.iter().collect();
        prop_assert_eq!(result.collisions.len(), old.len() - distinct.len());
        for c in &result.collisions {
            prop_assert!(c.kept < c.shadowed);
            prop_assert_eq!(&old[c.kept], &old[c.shadowed]);
        }
    }

    #[test]
    fn source_lane_is_always_in_range(
        mapping in arb_lane_mapping(),
        new_lane in 0usize..10,
        old_lanes in 0usize..10,
    ) {
        if let Some(old) = mapping.source_lane(new_lane, old_lanes) {
            prop_assert!(old < old_lanes);
        }
    }
}

// ── Migration completeness ──────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn migration_writes_every_slot(
        old in arb_layout(),
        new in arb_layout(),
        lanes in arb_lane_mappings(),
    ) {
        let old_buffer = StateBuffer::from_vec(
            (0..old.total_slots()).map(|i| i as f64 + 0.5).collect(),
        );
        let mut new_buffer = StateBuffer::unwritten(new.total_slots());
        let report = migrate(&old, &old_buffer, &new, &mut new_buffer, &lanes).unwrap();

        prop_assert!(new_buffer.as_slice().iter().all(|v| !v.is_nan()));
        prop_assert_eq!(report.events.len(), new.len());
        for (event, mapping) in report.events.iter().zip(new.mappings()) {
            prop_assert_eq!(&event.state_id, mapping.id());
            prop_assert_eq!(event.lanes_copied + event.lanes_defaulted, mapping.lanes());
            prop_assert_eq!(event.mismatch.is_some(), event.outcome == MigrationOutcome::Mismatched);
        }
    }

    #[test]
    fn same_layout_copies_exactly(layout in arb_layout()) {
        let old_buffer = StateBuffer::from_vec(
            (0..layout.total_slots()).map(|i| (i as f64).sin()).collect(),
        );
        let mut new_buffer = StateBuffer::unwritten(layout.total_slots());
        let report = migrate(&layout, &old_buffer, &layout, &mut new_buffer, &LaneMappings::new()).unwrap();
        prop_assert!(report.events.iter().all(|e| e.outcome == MigrationOutcome::Migrated));
        prop_assert_eq!(new_buffer, old_buffer);
    }
}

// ── Identity stability ──────────────────────────────────────────────────────

fn patch_source(blocks: &[(String, &str)]) -> String {
    let mut src = String::from("block t = time()\n");
    for (name, op) in blocks {
        src.push_str(&format!("block {} = {}\n", name, op));
    }
    src
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 50,
        max_shrink_iters: 100,
        .. ProptestConfig::default()
    })]

    #[test]
    fn reordering_blocks_keeps_state(
        names in arb_block_names(),
        ops in prop::collection::vec(stateful_op(), 8),
        frames in 1usize..6,
    ) {
        let blocks: Vec<(String, &str)> = names.into_iter().zip(ops).collect();
        let mut reversed = blocks.clone();
        reversed.reverse();

        let registry = Registry::builtin();
        let before = compile(&patch_source(&blocks), &registry).compiled.unwrap();
        let after = compile(&patch_source(&reversed), &registry).compiled.unwrap();

        let mut ids_before: Vec<_> = before.layout.mappings().iter().map(|m| m.id().clone()).collect();
        let mut ids_after: Vec<_> = after.layout.mappings().iter().map(|m| m.id().clone()).collect();
        ids_before.sort();
        ids_after.sort();
        prop_assert_eq!(&ids_before, &ids_after);

        let mut exec = Executor::new(before);
        exec.run(frames, &mut NullSink);
        let values: Vec<Vec<f64>> = ids_before
            .iter()
            .map(|id| exec.state_of(id).unwrap().to_vec())
            .collect();

        let mut events = Vec::new();
        let outcomes = exec.hot_swap_now(after, &mut events);
        prop_assert!(outcomes.iter().all(|o| o.is_installed()));
        prop_assert!(events.iter().all(|e| e.outcome == MigrationOutcome::Migrated));
        for (id, value) in ids_before.iter().zip(&values) {
            prop_assert_eq!(exec.state_of(id).unwrap(), value.as_slice());
        }
    }
}
