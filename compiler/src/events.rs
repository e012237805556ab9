// events.rs — Structured migration outcome events
//
// One event per state of the newly installed layout, emitted by the
// migrator and handed to a `MigrationSink`. Sinks only receive events; they
// never influence the migration.

use std::io::Write;

use serde::Serialize;

use crate::id::{InstanceId, StableStateId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// Previous value carried over (field lanes may be partly defaulted).
    Migrated,
    /// No previous state with this id; initial value written.
    Defaulted,
    /// A previous state existed with an incompatible shape; initial value written.
    Mismatched,
}

/// Why a previous state could not be carried over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Mismatch {
    Kind {
        old: &'static str,
        new: &'static str,
    },
    Stride {
        old: usize,
        new: usize,
    },
    Instance {
        old: InstanceId,
        new: InstanceId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationEvent {
    pub state_id: StableStateId,
    pub outcome: MigrationOutcome,
    pub lanes_copied: usize,
    pub lanes_defaulted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<Mismatch>,
}

/// Receiver of migration events.
pub trait MigrationSink {
    fn record(&mut self, event: &MigrationEvent);
}

impl MigrationSink for Vec<MigrationEvent> {
    fn record(&mut self, event: &MigrationEvent) {
        self.push(event.clone());
    }
}

/// Discards every event.
pub struct NullSink;

impl MigrationSink for NullSink {
    fn record(&mut self, _event: &MigrationEvent) {}
}

/// Writes each event as one line of compact JSON.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MigrationSink for JsonLinesSink<W> {
    fn record(&mut self, event: &MigrationEvent) {
        let written = serde_json::to_writer(&mut self.out, event)
            .map_err(std::io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"));
        if let Err(e) = written {
            tracing::warn!(state = %event.state_id, error = %e, "failed to write migration event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{BlockId, StateKind};

    fn event(outcome: MigrationOutcome, mismatch: Option<Mismatch>) -> MigrationEvent {
        MigrationEvent {
            state_id: StableStateId::for_block(&BlockId::new("acc"), StateKind::Accum),
            outcome,
            lanes_copied: 1,
            lanes_defaulted: 0,
            mismatch,
        }
    }

    #[test]
    fn json_lines_are_compact_and_terminated() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.record(&event(MigrationOutcome::Migrated, None));
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            text,
            "{\"state_id\":\"acc:accum\",\"outcome\":\"migrated\",\"lanes_copied\":1,\"lanes_defaulted\":0}\n"
        );
    }

    #[test]
    fn mismatch_is_tagged() {
        let e = event(
            MigrationOutcome::Mismatched,
            Some(Mismatch::Stride { old: 1, new: 2 }),
        );
        let v: serde_json::Value = serde_json::to_value(&e).unwrap();
        assert_eq!(v["outcome"], "mismatched");
        assert_eq!(v["mismatch"]["reason"], "stride");
        assert_eq!(v["mismatch"]["old"], 1);
        assert_eq!(v["mismatch"]["new"], 2);
    }

    #[test]
    fn vec_sink_collects() {
        let mut events: Vec<MigrationEvent> = Vec::new();
        events.record(&event(MigrationOutcome::Defaulted, None));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, MigrationOutcome::Defaulted);
    }
}
