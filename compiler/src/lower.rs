// lower.rs — Name resolution and lowering of a parsed patch
//
// Resolves instance and block references, checks op arity and cardinality,
// and lowers each block to an executable node. Every stateful block files
// exactly one allocation request whose id is derived from the block's own
// name and its op's state kind.
//
// Preconditions: `patch` parsed without errors.
// Postconditions: nodes are in declaration order; every operand refers to an
//   earlier node; the allocator holds one request per stateful node.
// Failure modes: error diagnostics for unresolved names, arity, cardinality,
//   duplicate declarations. Failed blocks are skipped without cascading
//   errors into blocks that reference them.
// Side effects: none.

use std::collections::HashMap;

use crate::ast::{Arg, BlockStmt, Ident, InstanceStmt, Patch, Span, StatementKind};
use crate::diag::{codes, DiagCode, DiagLevel, Diagnostic};
use crate::id::{BlockId, InstanceId, StableStateId};
use crate::instance::{Instance, InstanceTable, LaneIdentity};
use crate::registry::{Op, OpMeta, Registry};
use crate::slots::{StateAllocator, StateShape};

/// Largest element count an instance may declare. Larger counts are
/// rejected before any per-lane table or buffer is built.
pub const MAX_INSTANCE_COUNT: usize = 1 << 20;

// ── Output types ────────────────────────────────────────────────────────────

/// Input of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Const(f64),
    /// Output of an earlier node, by index.
    Node(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cardinality {
    Signal,
    Field { instance: InstanceId, lanes: usize },
}

impl Cardinality {
    pub fn instance(&self) -> Option<&InstanceId> {
        match self {
            Cardinality::Signal => None,
            Cardinality::Field { instance, .. } => Some(instance),
        }
    }
}

/// One executable block.
#[derive(Debug, Clone)]
pub struct Node {
    pub block: BlockId,
    pub op: Op,
    pub args: Vec<Operand>,
    pub cardinality: Cardinality,
    pub state: Option<StableStateId>,
    /// First slot of this node's state; set when the layout is linked.
    pub slot: Option<usize>,
    pub span: Span,
}

pub struct LoweredPatch {
    pub nodes: Vec<Node>,
    pub instances: InstanceTable,
    pub allocator: StateAllocator,
}

pub struct LowerResult {
    pub lowered: LoweredPatch,
    pub diagnostics: Vec<Diagnostic>,
}

impl LowerResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.level == DiagLevel::Error)
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn lower(patch: &Patch, registry: &Registry) -> LowerResult {
    let mut engine = LowerEngine {
        registry,
        instances: InstanceTable::new(),
        declared: HashMap::new(),
        defined: HashMap::new(),
        nodes: Vec::new(),
        allocator: StateAllocator::new(),
        diagnostics: Vec::new(),
    };

    engine.collect_instances(patch);
    engine.collect_declarations(patch);
    for stmt in &patch.statements {
        if let StatementKind::Block(block) = &stmt.kind {
            engine.lower_block(block, stmt.span);
        }
    }

    LowerResult {
        lowered: LoweredPatch {
            nodes: engine.nodes,
            instances: engine.instances,
            allocator: engine.allocator,
        },
        diagnostics: engine.diagnostics,
    }
}

// ── Lowering engine ─────────────────────────────────────────────────────────

struct LowerEngine<'a> {
    registry: &'a Registry,
    instances: InstanceTable,
    /// First declaration span of every block name.
    declared: HashMap<String, Span>,
    /// Lowered blocks: `Some(node index)`, or `None` if lowering failed.
    defined: HashMap<String, Option<usize>>,
    nodes: Vec<Node>,
    allocator: StateAllocator,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> LowerEngine<'a> {
    fn error(&self, code: DiagCode, span: Span, message: String) -> Diagnostic {
        Diagnostic::new(DiagLevel::Error, span, message).with_code(code)
    }

    fn emit(&mut self, diag: Diagnostic) {
        self.diagnostics.push(diag);
    }

    // ── Instances ───────────────────────────────────────────────────────

    fn collect_instances(&mut self, patch: &Patch) {
        for stmt in &patch.statements {
            if let StatementKind::Instance(inst) = &stmt.kind {
                self.lower_instance(inst, stmt.span);
            }
        }
    }

    fn lower_instance(&mut self, inst: &InstanceStmt, span: Span) {
        let id = InstanceId::new(&inst.name.name);
        if let Some(first) = self.instances.get(&id) {
            let first_span = first.span;
            let d = self
                .error(
                    codes::E0101,
                    inst.name.span,
                    format!("instance `{}` is declared more than once", id),
                )
                .with_related(first_span, "first declared here");
            self.emit(d);
            return;
        }

        if inst.count > MAX_INSTANCE_COUNT {
            let d = self
                .error(
                    codes::E0111,
                    inst.count_span,
                    format!(
                        "instance `{}` declares {} elements, more than the limit of {}",
                        id, inst.count, MAX_INSTANCE_COUNT
                    ),
                )
                .with_hint("split the population across several instances");
            self.emit(d);
            return;
        }

        let identity = match &inst.keys {
            None => LaneIdentity::Positional,
            Some(keys) => {
                if keys.len() != inst.count {
                    let d = self
                        .error(
                            codes::E0108,
                            inst.count_span,
                            format!(
                                "instance `{}` declares {} elements but {} keys",
                                id,
                                inst.count,
                                keys.len()
                            ),
                        )
                        .with_hint("give exactly one key per element, or drop `keys` for positional identity");
                    self.emit(d);
                    return;
                }
                self.check_unique_keys(&id, keys);
                LaneIdentity::Stable(keys.iter().map(|k| k.name.clone()).collect())
            }
        };

        self.instances.insert(Instance {
            id,
            count: inst.count,
            identity,
            span,
        });
    }

    fn check_unique_keys(&mut self, id: &InstanceId, keys: &[Ident]) {
        let mut seen: HashMap<&str, Span> = HashMap::new();
        for key in keys {
            if let Some(&first) = seen.get(key.name.as_str()) {
                let d = Diagnostic::new(
                    DiagLevel::Warning,
                    key.span,
                    format!("instance `{}` repeats key `{}`", id, key.name),
                )
                .with_code(codes::W0110)
                .with_related(first, "first used here")
                .with_hint("state migration will follow the first element with this key");
                self.emit(d);
            } else {
                seen.insert(&key.name, key.span);
            }
        }
    }

    // ── Blocks ──────────────────────────────────────────────────────────

    fn collect_declarations(&mut self, patch: &Patch) {
        for stmt in &patch.statements {
            if let StatementKind::Block(block) = &stmt.kind {
                self.declared
                    .entry(block.name.name.clone())
                    .or_insert(block.name.span);
            }
        }
    }

    fn lower_block(&mut self, block: &BlockStmt, span: Span) {
        let name = &block.name.name;
        if self.defined.contains_key(name) {
            let first = self.declared.get(name).copied().unwrap_or(block.name.span);
            let d = self
                .error(
                    codes::E0100,
                    block.name.span,
                    format!("block `{}` is declared more than once", name),
                )
                .with_related(first, "first declared here");
            self.emit(d);
            return;
        }

        let node = self.build_node(block, span);
        let index = node.map(|node| {
            self.nodes.push(node);
            self.nodes.len() - 1
        });
        self.defined.insert(name.clone(), index);
    }

    fn build_node(&mut self, block: &BlockStmt, span: Span) -> Option<Node> {
        let registry = self.registry;
        let Some(meta) = registry.lookup(&block.op.name) else {
            let d = self.error(
                codes::E0102,
                block.op.span,
                format!("unknown op `{}`", block.op.name),
            );
            self.emit(d);
            return None;
        };

        if block.args.len() < meta.min_args || block.args.len() > meta.max_args {
            let expected = if meta.min_args == meta.max_args {
                meta.min_args.to_string()
            } else {
                format!("{} to {}", meta.min_args, meta.max_args)
            };
            let d = self.error(
                codes::E0106,
                span,
                format!(
                    "`{}` takes {} argument(s) but {} were given",
                    meta.name,
                    expected,
                    block.args.len()
                ),
            );
            self.emit(d);
            return None;
        }

        let cardinality = self.block_cardinality(block, meta)?;

        let initial_arg = meta
            .state
            .as_ref()
            .and_then(|s| s.initial_arg)
            .filter(|&i| i < block.args.len());

        let mut args = Vec::with_capacity(block.args.len());
        let mut ok = true;
        for (i, arg) in block.args.iter().enumerate() {
            if Some(i) == initial_arg {
                continue;
            }
            match self.resolve_operand(arg, &cardinality) {
                Some(operand) => args.push(operand),
                None => ok = false,
            }
        }

        let initial = match initial_arg.map(|i| &block.args[i]) {
            None => meta.state.as_ref().map(|s| s.initial.to_vec()),
            Some(Arg::Number(v, _)) => Some(vec![*v]),
            Some(other) => {
                let d = self
                    .error(
                        codes::E0109,
                        other.span(),
                        format!("initial value of `{}` must be a number", meta.name),
                    )
                    .with_hint("state initial values are fixed at compile time");
                self.emit(d);
                return None;
            }
        };
        if !ok {
            return None;
        }

        let block_id = BlockId::new(&block.name.name);
        let state = match (meta.state.as_ref(), initial) {
            (Some(spec), Some(initial)) => {
                let id = StableStateId::for_block(&block_id, spec.kind);
                let shape = match &cardinality {
                    Cardinality::Signal => StateShape::Scalar { initial },
                    Cardinality::Field { instance, lanes } => StateShape::Field {
                        instance: instance.clone(),
                        lanes: *lanes,
                        initial,
                    },
                };
                if let Err(e) = self.allocator.allocate(id.clone(), shape) {
                    let mut d = e.to_diagnostic();
                    d.span = Some(block.name.span);
                    self.emit(d);
                    return None;
                }
                Some(id)
            }
            _ => None,
        };

        Some(Node {
            block: block_id,
            op: meta.op,
            args,
            cardinality,
            state,
            slot: None,
            span,
        })
    }

    fn block_cardinality(&mut self, block: &BlockStmt, meta: &OpMeta) -> Option<Cardinality> {
        match &block.over {
            None if meta.field_only => {
                let d = self
                    .error(
                        codes::E0107,
                        block.op.span,
                        format!("`{}` is only defined over an instance", meta.name),
                    )
                    .with_hint("add `@ <instance>` to the block");
                self.emit(d);
                None
            }
            None => Some(Cardinality::Signal),
            Some(over) => {
                let id = InstanceId::new(&over.name);
                match self.instances.get(&id) {
                    Some(instance) => Some(Cardinality::Field {
                        lanes: instance.count,
                        instance: id,
                    }),
                    None => {
                        let d = self.error(
                            codes::E0105,
                            over.span,
                            format!("unknown instance `{}`", over.name),
                        );
                        self.emit(d);
                        None
                    }
                }
            }
        }
    }

    fn resolve_operand(&mut self, arg: &Arg, cardinality: &Cardinality) -> Option<Operand> {
        let ident = match arg {
            Arg::Number(v, _) => return Some(Operand::Const(*v)),
            Arg::Ref(ident) => ident,
        };

        match self.defined.get(&ident.name) {
            Some(Some(index)) => {
                let index = *index;
                let source = &self.nodes[index];
                match (source.cardinality.instance(), cardinality.instance()) {
                    (None, _) => Some(Operand::Node(index)),
                    (Some(a), Some(b)) if a == b => Some(Operand::Node(index)),
                    (Some(a), target) => {
                        let message = match target {
                            Some(b) => format!(
                                "`{}` is a field over `{}` but this block runs over `{}`",
                                ident.name, a, b
                            ),
                            None => format!(
                                "`{}` is a field over `{}` and cannot feed a scalar block",
                                ident.name, a
                            ),
                        };
                        let related = source.span;
                        let d = self
                            .error(codes::E0107, ident.span, message)
                            .with_related(related, "declared here");
                        self.emit(d);
                        None
                    }
                }
            }
            // Already reported when that block failed to lower.
            Some(None) => None,
            None => {
                let d = match self.declared.get(&ident.name).copied() {
                    Some(later) => self
                        .error(
                            codes::E0104,
                            ident.span,
                            format!("`{}` is used before its declaration", ident.name),
                        )
                        .with_related(later, "declared here")
                        .with_hint("blocks may only read blocks declared above them"),
                    None => self.error(
                        codes::E0103,
                        ident.span,
                        format!("unknown block `{}`", ident.name),
                    ),
                };
                self.emit(d);
                None
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
