// hotswap.rs — Hot-swap controller
//
// Owns the live (program, state buffer) pair and replaces it with a newly
// compiled program through a migration transaction. Two states: Idle and
// Migrating. Requests are queued and applied one at a time, in order, at a
// frame boundary; a request never interleaves with an in-flight migration.
//
// Preconditions: called between frames by the executor.
// Postconditions: after `run_pending`, the queue is empty and the live pair
//   is either the last successfully migrated program or unchanged.
// Failure modes: a migration error aborts that swap only; the previous
//   program and buffer stay authoritative.
// Side effects: forwards migration events to the sink; tracing.

use std::collections::VecDeque;

use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::events::MigrationSink;
use crate::instance::{correspond, InstanceTable};
use crate::migrate::{migrate, LaneMappings, MigrationError, MigrationReport};
use crate::pipeline::CompiledPatch;
use crate::slots::{StateBuffer, StateLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    Idle,
    Migrating,
}

/// The program currently driving frames, with its state.
#[derive(Debug)]
pub struct Installed {
    pub patch: CompiledPatch,
    pub buffer: StateBuffer,
    /// Incremented on every successful install; the first program is 0.
    pub generation: u64,
}

#[derive(Debug)]
pub enum SwapOutcome {
    Installed {
        generation: u64,
        report: MigrationReport,
    },
    Aborted {
        error: MigrationError,
        diagnostic: Diagnostic,
    },
}

impl SwapOutcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, SwapOutcome::Installed { .. })
    }
}

#[derive(Debug)]
pub struct HotSwap {
    live: Installed,
    pending: VecDeque<CompiledPatch>,
    state: SwapState,
}

impl HotSwap {
    /// Install the first program with every state at its initial value.
    pub fn new(patch: CompiledPatch) -> Self {
        let buffer = patch.layout.initial_buffer();
        tracing::info!(
            fingerprint = %patch.provenance.layout_fingerprint_hex(),
            slots = buffer.len(),
            "installed initial program"
        );
        Self {
            live: Installed {
                patch,
                buffer,
                generation: 0,
            },
            pending: VecDeque::new(),
            state: SwapState::Idle,
        }
    }

    pub fn live(&self) -> &Installed {
        &self.live
    }

    pub fn live_mut(&mut self) -> &mut Installed {
        &mut self.live
    }

    pub fn state(&self) -> SwapState {
        self.state
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queue a compiled program for installation at the next frame boundary.
    pub fn request(&mut self, patch: CompiledPatch) {
        self.pending.push_back(patch);
    }

    /// Queue `patch` and apply everything queued.
    pub fn begin_hot_swap(
        &mut self,
        patch: CompiledPatch,
        sink: &mut dyn MigrationSink,
    ) -> Vec<SwapOutcome> {
        self.request(patch);
        self.run_pending(sink)
    }

    /// Apply queued programs in request order, one transaction each.
    ///
    /// `&mut self` keeps this from being re-entered, so a transaction never
    /// starts while another is `Migrating`.
    pub fn run_pending(&mut self, sink: &mut dyn MigrationSink) -> Vec<SwapOutcome> {
        let mut outcomes = Vec::with_capacity(self.pending.len());
        while let Some(next) = self.pending.pop_front() {
            self.state = SwapState::Migrating;
            outcomes.push(self.transact(next, sink));
            self.state = SwapState::Idle;
        }
        outcomes
    }

    fn transact(&mut self, next: CompiledPatch, sink: &mut dyn MigrationSink) -> SwapOutcome {
        let (lanes, mut lane_diags) =
            lane_mappings(&self.live.patch.instances, &next.layout, &next.instances);

        let mut buffer = StateBuffer::unwritten(next.layout.total_slots());
        let migrated = migrate(
            &self.live.patch.layout,
            &self.live.buffer,
            &next.layout,
            &mut buffer,
            &lanes,
        );

        match migrated {
            Ok(mut report) => {
                lane_diags.append(&mut report.diagnostics);
                report.diagnostics = lane_diags;
                for event in &report.events {
                    sink.record(event);
                }
                let generation = self.live.generation + 1;
                tracing::info!(
                    generation,
                    fingerprint = %next.provenance.layout_fingerprint_hex(),
                    states = report.events.len(),
                    "hot-swap installed"
                );
                self.live = Installed {
                    patch: next,
                    buffer,
                    generation,
                };
                SwapOutcome::Installed { generation, report }
            }
            Err(error) => {
                tracing::error!(%error, "hot-swap aborted");
                let diagnostic = error.to_diagnostic();
                SwapOutcome::Aborted { error, diagnostic }
            }
        }
    }
}

/// Lane mappings for every instance bound by a field state of `new_layout`.
///
/// Instances absent from the previous program are skipped: their states have
/// no predecessor lanes. Key collisions are reported as warnings.
pub fn lane_mappings(
    old_instances: &InstanceTable,
    new_layout: &StateLayout,
    new_instances: &InstanceTable,
) -> (LaneMappings, Vec<Diagnostic>) {
    let mut lanes = LaneMappings::new();
    let mut diags = Vec::new();
    for instance_id in new_layout.mappings().iter().filter_map(|m| m.instance()) {
        if lanes.contains_key(instance_id) {
            continue;
        }
        let (Some(old), Some(new)) = (old_instances.get(instance_id), new_instances.get(instance_id))
        else {
            continue;
        };
        let mapping = correspond(old, new);
        for collision in &mapping.collisions {
            let key = old
                .keys()
                .and_then(|keys| keys.get(collision.kept))
                .map(String::as_str)
                .unwrap_or("?");
            tracing::warn!(
                instance = %instance_id,
                key,
                kept = collision.kept,
                shadowed = collision.shadowed,
                "duplicate lane key"
            );
            diags.push(
                Diagnostic::unlocated(
                    DiagLevel::Warning,
                    format!(
                        "instance `{}` repeats key `{}` at lanes {} and {}; lane {} wins",
                        instance_id, key, collision.kept, collision.shadowed, collision.kept
                    ),
                )
                .with_code(codes::W0303),
            );
        }
        lanes.insert(instance_id.clone(), mapping.mapping);
    }
    (lanes, diags)
}
