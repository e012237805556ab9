// migrate.rs — State migration at the hot-swap boundary
//
// Builds the state buffer of a newly compiled layout from the previous
// layout's buffer. States are matched by `StableStateId`; field lanes are
// matched through the per-instance lane mapping.
//
// Preconditions: `old_buffer` is the buffer after the last fully executed
//   frame; `new_buffer` is exclusively owned by the caller.
// Postconditions: on Ok, every slot of `new_buffer` has been written exactly
//   once; `old_buffer` is untouched.
// Failure modes: buffer length disagreeing with its layout aborts the whole
//   migration before any write. Shape mismatches of individual states are
//   recoverable: that state is reset to its initial value.
// Side effects: tracing events only.

use std::collections::HashMap;

use thiserror::Error;

use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::events::{MigrationEvent, MigrationOutcome, Mismatch};
use crate::id::InstanceId;
use crate::lanes::LaneIdentityMapping;
use crate::slots::{StateBuffer, StateLayout, StateMapping};

/// Lane mappings keyed by instance, recomputed for every hot-swap.
pub type LaneMappings = HashMap<InstanceId, LaneIdentityMapping>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    Old,
    New,
}

impl std::fmt::Display for BufferRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferRole::Old => f.write_str("previous"),
            BufferRole::New => f.write_str("new"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    #[error("{role} state buffer has {actual} slots but its layout declares {declared}")]
    BufferSizeMismatch {
        role: BufferRole,
        declared: usize,
        actual: usize,
    },
}

impl MigrationError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::unlocated(DiagLevel::Error, self.to_string())
            .with_code(codes::E0304)
            .with_hint("hot-swap aborted; the previous program keeps running")
    }
}

/// Everything a successful migration reports.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub events: Vec<MigrationEvent>,
    pub diagnostics: Vec<Diagnostic>,
}

impl MigrationReport {
    pub fn count(&self, outcome: MigrationOutcome) -> usize {
        self.events.iter().filter(|e| e.outcome == outcome).count()
    }
}

/// Migrate `old_buffer` (laid out by `old`) into `new_buffer` (laid out by `new`).
pub fn migrate(
    old: &StateLayout,
    old_buffer: &StateBuffer,
    new: &StateLayout,
    new_buffer: &mut StateBuffer,
    lanes: &LaneMappings,
) -> Result<MigrationReport, MigrationError> {
    check_size(BufferRole::Old, old.total_slots(), old_buffer.len())?;
    check_size(BufferRole::New, new.total_slots(), new_buffer.len())?;

    let mut writer = SlotWriter::new(new_buffer);
    let mut report = MigrationReport::default();

    for mapping in new.mappings() {
        let event = match old.get(mapping.id()) {
            None => {
                writer.write_initial(mapping);
                make_event(mapping, MigrationOutcome::Defaulted, 0, mapping.lanes(), None)
            }
            Some(prev) => match mismatch(prev, mapping) {
                Some(why) => {
                    report.diagnostics.push(mismatch_diagnostic(mapping, &why));
                    tracing::warn!(state = %mapping.id(), mismatch = ?why, "state reset on hot-swap");
                    writer.write_initial(mapping);
                    make_event(
                        mapping,
                        MigrationOutcome::Mismatched,
                        0,
                        mapping.lanes(),
                        Some(why),
                    )
                }
                None => {
                    let (copied, defaulted) = carry_over(prev, old_buffer, mapping, &mut writer, lanes);
                    make_event(mapping, MigrationOutcome::Migrated, copied, defaulted, None)
                }
            },
        };
        tracing::debug!(
            state = %event.state_id,
            outcome = ?event.outcome,
            copied = event.lanes_copied,
            defaulted = event.lanes_defaulted,
            "migrated state"
        );
        report.events.push(event);
    }

    debug_assert!(writer.is_complete(), "migration left slots unwritten");
    Ok(report)
}

fn check_size(role: BufferRole, declared: usize, actual: usize) -> Result<(), MigrationError> {
    if declared == actual {
        Ok(())
    } else {
        Err(MigrationError::BufferSizeMismatch {
            role,
            declared,
            actual,
        })
    }
}

fn make_event(
    mapping: &StateMapping,
    outcome: MigrationOutcome,
    lanes_copied: usize,
    lanes_defaulted: usize,
    mismatch: Option<Mismatch>,
) -> MigrationEvent {
    MigrationEvent {
        state_id: mapping.id().clone(),
        outcome,
        lanes_copied,
        lanes_defaulted,
        mismatch,
    }
}

/// Shape incompatibility between a previous and a new mapping of one id.
fn mismatch(prev: &StateMapping, next: &StateMapping) -> Option<Mismatch> {
    match (prev, next) {
        (StateMapping::Scalar { .. }, StateMapping::Field { .. })
        | (StateMapping::Field { .. }, StateMapping::Scalar { .. }) => Some(Mismatch::Kind {
            old: prev.shape_name(),
            new: next.shape_name(),
        }),
        _ if prev.stride() != next.stride() => Some(Mismatch::Stride {
            old: prev.stride(),
            new: next.stride(),
        }),
        (
            StateMapping::Field { instance: old, .. },
            StateMapping::Field { instance: new, .. },
        ) if old != new => Some(Mismatch::Instance {
            old: old.clone(),
            new: new.clone(),
        }),
        _ => None,
    }
}

fn mismatch_diagnostic(mapping: &StateMapping, why: &Mismatch) -> Diagnostic {
    let (code, detail) = match why {
        Mismatch::Kind { old, new } => (codes::W0301, format!("shape changed from {old} to {new}")),
        Mismatch::Stride { old, new } => (codes::W0300, format!("stride changed from {old} to {new}")),
        Mismatch::Instance { old, new } => (
            codes::W0302,
            format!("field moved from instance `{old}` to `{new}`"),
        ),
    };
    Diagnostic::unlocated(
        DiagLevel::Warning,
        format!("state `{}` reset: {}", mapping.id(), detail),
    )
    .with_code(code)
}

/// Copy a compatible previous state. Returns (lanes copied, lanes defaulted).
fn carry_over(
    prev: &StateMapping,
    old_buffer: &StateBuffer,
    next: &StateMapping,
    writer: &mut SlotWriter<'_>,
    lanes: &LaneMappings,
) -> (usize, usize) {
    let identity = LaneIdentityMapping::Identity;
    let lane_map = match next.instance() {
        Some(instance) => lanes.get(instance).unwrap_or(&identity),
        None => &identity,
    };

    let old_lanes = prev.lanes();
    let mut copied = 0;
    for lane in 0..next.lanes() {
        let source = lane_map
            .source_lane(lane, old_lanes)
            .and_then(|old_lane| old_buffer.get(prev.lane_range(old_lane)));
        match source {
            Some(values) => {
                writer.write(next.lane_range(lane).start, values);
                copied += 1;
            }
            None => writer.write(next.lane_range(lane).start, next.initial()),
        }
    }
    (copied, next.lanes() - copied)
}

// ── Slot writer ────────────────────────────────────────────────────────────

/// Write access to the new buffer that records which slots were written.
struct SlotWriter<'a> {
    buffer: &'a mut StateBuffer,
    written: Vec<bool>,
}

impl<'a> SlotWriter<'a> {
    fn new(buffer: &'a mut StateBuffer) -> Self {
        let written = vec![false; buffer.len()];
        Self { buffer, written }
    }

    fn write(&mut self, start: usize, values: &[f64]) {
        let range = start..start + values.len();
        debug_assert!(
            self.written[range.clone()].iter().all(|w| !w),
            "slot written twice"
        );
        if let Some(dst) = self.buffer.get_mut(range.clone()) {
            dst.copy_from_slice(values);
            self.written[range].iter_mut().for_each(|w| *w = true);
        }
    }

    fn write_initial(&mut self, mapping: &StateMapping) {
        for lane in 0..mapping.lanes() {
            self.write(mapping.lane_range(lane).start, mapping.initial());
        }
    }

    fn is_complete(&self) -> bool {
        self.written.iter().all(|&w| w)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
