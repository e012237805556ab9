// runtime.rs — Frame executor
//
// Drives the live program one frame at a time. Queued hot-swaps are applied
// at the frame boundary, before evaluation, so a frame always runs against a
// single (program, state buffer) pair.
//
// Preconditions: the installed program was produced by `pipeline::compile`.
// Postconditions: after `frame`, every node has one output value and every
//   stateful node has advanced its slots by one step.
// Failure modes: none; an aborted swap keeps the previous program running.
// Side effects: mutates the live state buffer; tracing.

use std::fmt;

use crate::events::MigrationSink;
use crate::hotswap::{HotSwap, Installed, SwapOutcome};
use crate::id::{BlockId, StableStateId};
use crate::lower::{Cardinality, Node, Operand};
use crate::pipeline::CompiledPatch;
use crate::registry::Op;
use crate::slots::StateBuffer;

/// Output of one node for one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Signal(f64),
    Field(Vec<f64>),
}

impl Value {
    /// Lane `lane` of this value; signals broadcast.
    fn lane(&self, lane: usize) -> f64 {
        match self {
            Value::Signal(v) => *v,
            Value::Field(lanes) => lanes.get(lane).copied().unwrap_or(f64::NAN),
        }
    }

    pub fn as_signal(&self) -> Option<f64> {
        match self {
            Value::Signal(v) => Some(*v),
            Value::Field(_) => None,
        }
    }

    pub fn as_field(&self) -> Option<&[f64]> {
        match self {
            Value::Signal(_) => None,
            Value::Field(lanes) => Some(lanes),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Signal(v) => write!(f, "{}", v),
            Value::Field(lanes) => write!(f, "{:?}", lanes),
        }
    }
}

#[derive(Debug)]
pub struct Executor {
    swap: HotSwap,
    /// Index of the next frame to run.
    frame: u64,
    outputs: Vec<(BlockId, Value)>,
}

impl Executor {
    pub fn new(patch: CompiledPatch) -> Self {
        Self {
            swap: HotSwap::new(patch),
            frame: 0,
            outputs: Vec::new(),
        }
    }

    pub fn hot_swap(&self) -> &HotSwap {
        &self.swap
    }

    pub fn frame_index(&self) -> u64 {
        self.frame
    }

    /// Queue `patch`; it is installed at the start of the next frame.
    pub fn request_hot_swap(&mut self, patch: CompiledPatch) {
        tracing::debug!(frame = self.frame, "hot-swap requested");
        self.swap.request(patch);
    }

    /// Install `patch` immediately, between frames.
    pub fn hot_swap_now(
        &mut self,
        patch: CompiledPatch,
        sink: &mut dyn MigrationSink,
    ) -> Vec<SwapOutcome> {
        self.swap.begin_hot_swap(patch, sink)
    }

    /// Apply queued swaps, then evaluate one frame.
    pub fn frame(&mut self, sink: &mut dyn MigrationSink) -> Vec<SwapOutcome> {
        let outcomes = self.swap.run_pending(sink);
        self.evaluate();
        self.frame += 1;
        outcomes
    }

    /// Run `frames` frames, collecting every swap outcome.
    pub fn run(&mut self, frames: usize, sink: &mut dyn MigrationSink) -> Vec<SwapOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..frames {
            outcomes.extend(self.frame(sink));
        }
        outcomes
    }

    /// Output of `block` in the last evaluated frame.
    pub fn output(&self, block: &str) -> Option<&Value> {
        self.outputs
            .iter()
            .find(|(id, _)| id.as_str() == block)
            .map(|(_, v)| v)
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&BlockId, &Value)> {
        self.outputs.iter().map(|(id, v)| (id, v))
    }

    /// Current slots of a state in the live buffer.
    pub fn state_of(&self, id: &StableStateId) -> Option<&[f64]> {
        let live = self.swap.live();
        let mapping = live.patch.layout.get(id)?;
        live.buffer.get(mapping.slot_range())
    }

    fn evaluate(&mut self) {
        let frame = self.frame;
        let Installed { patch, buffer, .. } = self.swap.live_mut();
        let mut values: Vec<Value> = Vec::with_capacity(patch.nodes.len());
        for node in &patch.nodes {
            let stride = node
                .state
                .as_ref()
                .and_then(|id| patch.layout.get(id))
                .map_or(0, |m| m.stride());
            let value = eval_node(node, &values, buffer, stride, frame);
            values.push(value);
        }
        self.outputs = patch
            .nodes
            .iter()
            .map(|n| n.block.clone())
            .zip(values)
            .collect();
    }
}

fn eval_node(
    node: &Node,
    values: &[Value],
    buffer: &mut StateBuffer,
    stride: usize,
    frame: u64,
) -> Value {
    let mut args = vec![0.0; node.args.len()];
    let mut eval_lane = |lane: usize| {
        for (slot, operand) in args.iter_mut().zip(&node.args) {
            *slot = match operand {
                Operand::Const(v) => *v,
                Operand::Node(i) => values[*i].lane(lane),
            };
        }
        let state: &mut [f64] = match node.slot {
            Some(base) => {
                let start = base + lane * stride;
                buffer.get_mut(start..start + stride).unwrap_or_default()
            }
            None => &mut [],
        };
        step(node.op, &args, state, frame, lane)
    };
    match node.cardinality {
        Cardinality::Signal => Value::Signal(eval_lane(0)),
        Cardinality::Field { lanes, .. } => Value::Field((0..lanes).map(eval_lane).collect()),
    }
}

/// One lane of one op for one frame. `state` is empty for stateless ops.
fn step(op: Op, args: &[f64], state: &mut [f64], frame: u64, lane: usize) -> f64 {
    let arg = |i: usize| args.get(i).copied().unwrap_or(0.0);
    match (op, state) {
        (Op::Const, _) => arg(0),
        (Op::Time, _) => frame as f64,
        (Op::Index, _) => lane as f64,
        (Op::Add, _) => arg(0) + arg(1),
        (Op::Mul, _) => arg(0) * arg(1),
        (Op::Integrate, [acc, ..]) => {
            *acc += arg(0);
            *acc
        }
        (Op::Delay, [held, ..]) => std::mem::replace(held, arg(0)),
        (Op::Lag, [level, ..]) => {
            *level += (arg(0) - *level) * arg(1);
            *level
        }
        (Op::Spring, [position, velocity, ..]) => {
            *velocity += (arg(0) - *position) * arg(1);
            *position += *velocity;
            *position
        }
        // stateful op without linked slots
        _ => f64::NAN,
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
