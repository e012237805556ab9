// registry.rs — Block op metadata registry
//
// Describes every op a block may invoke: arity, cardinality constraints, and
// the persistent state it owns (kind tag, stride, default initial value).
// Lowering consults the registry; the executor dispatches on `Op`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::id::StateKind;

// ── Data types ──────────────────────────────────────────────────────────────

/// Executable op of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Const,
    Time,
    Index,
    Add,
    Mul,
    Integrate,
    Delay,
    Lag,
    Spring,
}

/// Persistent state owned by one invocation of an op.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSpec {
    #[serde(serialize_with = "serialize_kind")]
    pub kind: StateKind,
    /// Default initial value; its length is the stride.
    pub initial: &'static [f64],
    /// Index of an optional literal argument overriding a stride-1 initial value.
    pub initial_arg: Option<usize>,
}

impl StateSpec {
    pub fn stride(&self) -> usize {
        self.initial.len()
    }
}

fn serialize_kind<S: serde::Serializer>(kind: &StateKind, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(kind.tag())
}

/// Metadata for one op.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpMeta {
    pub name: &'static str,
    pub op: Op,
    pub min_args: usize,
    pub max_args: usize,
    /// Only meaningful over an instance (`@ inst`).
    pub field_only: bool,
    pub state: Option<StateSpec>,
}

const NO_STATE: Option<StateSpec> = None;

const BUILTIN_OPS: &[OpMeta] = &[
    OpMeta {
        name: "const",
        op: Op::Const,
        min_args: 1,
        max_args: 1,
        field_only: false,
        state: NO_STATE,
    },
    OpMeta {
        name: "time",
        op: Op::Time,
        min_args: 0,
        max_args: 0,
        field_only: false,
        state: NO_STATE,
    },
    OpMeta {
        name: "index",
        op: Op::Index,
        min_args: 0,
        max_args: 0,
        field_only: true,
        state: NO_STATE,
    },
    OpMeta {
        name: "add",
        op: Op::Add,
        min_args: 2,
        max_args: 2,
        field_only: false,
        state: NO_STATE,
    },
    OpMeta {
        name: "mul",
        op: Op::Mul,
        min_args: 2,
        max_args: 2,
        field_only: false,
        state: NO_STATE,
    },
    OpMeta {
        name: "integrate",
        op: Op::Integrate,
        min_args: 1,
        max_args: 2,
        field_only: false,
        state: Some(StateSpec {
            kind: StateKind::Accum,
            initial: &[0.0],
            initial_arg: Some(1),
        }),
    },
    OpMeta {
        name: "delay",
        op: Op::Delay,
        min_args: 1,
        max_args: 2,
        field_only: false,
        state: Some(StateSpec {
            kind: StateKind::Delay,
            initial: &[0.0],
            initial_arg: Some(1),
        }),
    },
    OpMeta {
        name: "lag",
        op: Op::Lag,
        min_args: 2,
        max_args: 2,
        field_only: false,
        state: Some(StateSpec {
            kind: StateKind::Lag,
            initial: &[0.0],
            initial_arg: None,
        }),
    },
    OpMeta {
        name: "spring",
        op: Op::Spring,
        min_args: 2,
        max_args: 2,
        field_only: false,
        state: Some(StateSpec {
            kind: StateKind::Spring,
            // position, velocity
            initial: &[0.0, 0.0],
            initial_arg: None,
        }),
    },
];

// ── Registry ────────────────────────────────────────────────────────────────

/// Op lookup table.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    ops: BTreeMap<&'static str, OpMeta>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in op.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for meta in BUILTIN_OPS {
            registry.register(meta.clone());
        }
        registry
    }

    /// Add or replace an op.
    pub fn register(&mut self, meta: OpMeta) -> Option<OpMeta> {
        self.ops.insert(meta.name, meta)
    }

    pub fn lookup(&self, name: &str) -> Option<&OpMeta> {
        self.ops.get(name)
    }

    pub fn ops(&self) -> impl Iterator<Item = &OpMeta> {
        self.ops.values()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Compact JSON of all ops in name order, used for fingerprinting.
    pub fn canonical_json(&self) -> String {
        let ops: Vec<&OpMeta> = self.ops.values().collect();
        serde_json::to_string(&ops).unwrap_or_default()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
