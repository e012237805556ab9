// pipeline.rs — Compilation of patch source into an installable program
//
// parse → lower → plan → link. Produces a `CompiledPatch` holding the
// executable nodes, the instance table, the state layout, and provenance.
//
// Preconditions: none.
// Postconditions: `compiled` is Some iff no error-level diagnostic was emitted;
//   every stateful node's `slot` points at its mapping's first slot.
// Failure modes: parse errors, lowering errors, state allocation errors, a
//   layout larger than `MAX_STATE_SLOTS`.
// Side effects: tracing events with per-stage timing.

use std::time::Instant;

use sha2::{Digest, Sha256};

use crate::ast::Patch;
use crate::diag::{codes, has_errors, DiagLevel, Diagnostic};
use crate::instance::InstanceTable;
use crate::lower::{lower, Node};
use crate::parser::parse;
use crate::registry::Registry;
use crate::slots::StateLayout;

/// Upper bound on a layout's total slots, checked before any state buffer
/// for it is allocated.
pub const MAX_STATE_SLOTS: usize = 1 << 24;

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata of one compile.
///
/// `source_hash`: SHA-256 of the raw patch source text.
/// `registry_fingerprint`: SHA-256 of `Registry::canonical_json()`.
/// `layout_fingerprint`: SHA-256 of `StateLayout::canonical_json()`.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub registry_fingerprint: [u8; 32],
    pub layout_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    pub fn registry_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.registry_fingerprint)
    }

    pub fn layout_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.layout_fingerprint)
    }

    /// Pretty JSON for `--emit build-info`.
    pub fn to_json(&self) -> String {
        let value = serde_json::json!({
            "source_hash": self.source_hash_hex(),
            "registry_fingerprint": self.registry_fingerprint_hex(),
            "layout_fingerprint": self.layout_fingerprint_hex(),
            "compiler_version": self.compiler_version,
        });
        serde_json::to_string_pretty(&value).unwrap_or_default()
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

pub fn compute_provenance(source: &str, registry: &Registry, layout: &StateLayout) -> Provenance {
    Provenance {
        source_hash: sha256(source.as_bytes()),
        registry_fingerprint: sha256(registry.canonical_json().as_bytes()),
        layout_fingerprint: sha256(layout.canonical_json().as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Compiled program ───────────────────────────────────────────────────────

/// A successfully compiled patch, ready to be installed.
#[derive(Debug, Clone)]
pub struct CompiledPatch {
    pub nodes: Vec<Node>,
    pub instances: InstanceTable,
    pub layout: StateLayout,
    pub provenance: Provenance,
}

impl CompiledPatch {
    pub fn node(&self, block: &str) -> Option<(usize, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .find(|(_, n)| n.block.as_str() == block)
    }
}

pub struct CompileResult {
    pub compiled: Option<CompiledPatch>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileResult {
    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }
}

// ── Entry points ───────────────────────────────────────────────────────────

/// Parse only; parse errors become `E0001` diagnostics.
pub fn parse_patch(source: &str) -> (Option<Patch>, Vec<Diagnostic>) {
    let result = parse(source);
    let diags = result
        .errors
        .iter()
        .map(|e| Diagnostic::new(DiagLevel::Error, *e.span(), e.to_string()).with_code(codes::E0001))
        .collect();
    (result.patch, diags)
}

/// Compile patch source against `registry`.
pub fn compile(source: &str, registry: &Registry) -> CompileResult {
    let start = Instant::now();
    let (patch, mut diagnostics) = parse_patch(source);
    tracing::debug!(elapsed_ms = elapsed_ms(start), "parse complete");
    let patch = match patch {
        Some(patch) if diagnostics.is_empty() => patch,
        _ => {
            return CompileResult {
                compiled: None,
                diagnostics,
            }
        }
    };

    let start = Instant::now();
    let lowered = lower(&patch, registry);
    let lower_failed = lowered.has_errors();
    diagnostics.extend(lowered.diagnostics);
    tracing::debug!(
        elapsed_ms = elapsed_ms(start),
        nodes = lowered.lowered.nodes.len(),
        "lower complete"
    );
    if lower_failed {
        return CompileResult {
            compiled: None,
            diagnostics,
        };
    }

    let start = Instant::now();
    let mut nodes = lowered.lowered.nodes;
    let layout = lowered.lowered.allocator.plan();
    if layout.total_slots() > MAX_STATE_SLOTS {
        diagnostics.push(
            Diagnostic::unlocated(
                DiagLevel::Error,
                format!(
                    "state layout needs {} slots, more than the limit of {}",
                    layout.total_slots(),
                    MAX_STATE_SLOTS
                ),
            )
            .with_code(codes::E0202)
            .with_hint("reduce instance sizes or the number of field states"),
        );
        return CompileResult {
            compiled: None,
            diagnostics,
        };
    }
    link(&mut nodes, &layout);
    tracing::debug!(
        elapsed_ms = elapsed_ms(start),
        states = layout.len(),
        slots = layout.total_slots(),
        "plan complete"
    );

    let provenance = compute_provenance(source, registry, &layout);
    CompileResult {
        compiled: Some(CompiledPatch {
            nodes,
            instances: lowered.lowered.instances,
            layout,
            provenance,
        }),
        diagnostics,
    }
}

/// Point every stateful node at its planned slots.
fn link(nodes: &mut [Node], layout: &StateLayout) {
    for node in nodes {
        node.slot = node
            .state
            .as_ref()
            .and_then(|id| layout.get(id))
            .map(|m| m.start());
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

// ── Tests ──────────────────────────────────────────────────────────────────
