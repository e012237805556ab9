// slots.rs — State allocation and slot planning
//
// Collects one allocation request per stateful block invocation, rejects
// duplicate identities, and packs all states into a flat slot layout for the
// current compile. Slot offsets are a disposable, purely positional artifact:
// the planner never sees earlier compiles, and identity lives in
// `StableStateId`, not in offsets.
//
// Preconditions: requests come from a single compile.
// Postconditions: mappings are in request order, contiguous, non-overlapping;
//   `total_slots` equals the sum of every mapping's stride × lanes.
// Failure modes: duplicate state id, empty initial template.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use serde::Serialize;
use thiserror::Error;

use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::id::{InstanceId, StableStateId};

// ── Requests ───────────────────────────────────────────────────────────────

/// Requested shape of one state. Stride is the length of `initial`.
#[derive(Debug, Clone, PartialEq)]
pub enum StateShape {
    Scalar {
        initial: Vec<f64>,
    },
    Field {
        instance: InstanceId,
        lanes: usize,
        initial: Vec<f64>,
    },
}

impl StateShape {
    pub fn initial(&self) -> &[f64] {
        match self {
            StateShape::Scalar { initial } | StateShape::Field { initial, .. } => initial,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateRequest {
    pub id: StableStateId,
    pub shape: StateShape,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AllocError {
    #[error("state `{0}` requested more than once in one compile")]
    DuplicateStateId(StableStateId),
    #[error("state `{0}` has an empty initial value (stride must be at least 1)")]
    EmptyInitial(StableStateId),
}

impl AllocError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            AllocError::DuplicateStateId(_) => Diagnostic::unlocated(DiagLevel::Error, self.to_string())
                .with_code(codes::E0200)
                .with_hint("each stateful block may own at most one state of each kind"),
            AllocError::EmptyInitial(_) => {
                Diagnostic::unlocated(DiagLevel::Error, self.to_string()).with_code(codes::E0201)
            }
        }
    }
}

// ── Mappings ───────────────────────────────────────────────────────────────

/// Where one state lives in the flat buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum StateMapping {
    Scalar {
        id: StableStateId,
        slot: usize,
        stride: usize,
        initial: Vec<f64>,
    },
    Field {
        id: StableStateId,
        instance: InstanceId,
        slot_start: usize,
        lanes: usize,
        stride: usize,
        /// Per-lane template broadcast to lanes with no predecessor.
        initial: Vec<f64>,
    },
}

impl StateMapping {
    pub fn id(&self) -> &StableStateId {
        match self {
            StateMapping::Scalar { id, .. } | StateMapping::Field { id, .. } => id,
        }
    }

    pub fn stride(&self) -> usize {
        match self {
            StateMapping::Scalar { stride, .. } | StateMapping::Field { stride, .. } => *stride,
        }
    }

    pub fn initial(&self) -> &[f64] {
        match self {
            StateMapping::Scalar { initial, .. } | StateMapping::Field { initial, .. } => initial,
        }
    }

    /// Number of lanes; a scalar state is a single lane.
    pub fn lanes(&self) -> usize {
        match self {
            StateMapping::Scalar { .. } => 1,
            StateMapping::Field { lanes, .. } => *lanes,
        }
    }

    pub fn start(&self) -> usize {
        match self {
            StateMapping::Scalar { slot, .. } => *slot,
            StateMapping::Field { slot_start, .. } => *slot_start,
        }
    }

    pub fn slot_range(&self) -> Range<usize> {
        let start = self.start();
        start..start + self.stride() * self.lanes()
    }

    /// Slots of lane `lane`. Callers keep `lane < self.lanes()`.
    pub fn lane_range(&self, lane: usize) -> Range<usize> {
        let start = self.start() + lane * self.stride();
        start..start + self.stride()
    }

    pub fn shape_name(&self) -> &'static str {
        match self {
            StateMapping::Scalar { .. } => "scalar",
            StateMapping::Field { .. } => "field",
        }
    }

    pub fn instance(&self) -> Option<&InstanceId> {
        match self {
            StateMapping::Scalar { .. } => None,
            StateMapping::Field { instance, .. } => Some(instance),
        }
    }
}

// ── Layout ─────────────────────────────────────────────────────────────────

/// The planned state layout of one compile.
#[derive(Debug, Clone, Default)]
pub struct StateLayout {
    mappings: Vec<StateMapping>,
    total_slots: usize,
    index: HashMap<StableStateId, usize>,
}

impl StateLayout {
    /// Layout with no states.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn mappings(&self) -> &[StateMapping] {
        &self.mappings
    }

    pub fn total_slots(&self) -> usize {
        self.total_slots
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn get(&self, id: &StableStateId) -> Option<&StateMapping> {
        self.index.get(id).map(|&i| &self.mappings[i])
    }

    /// A buffer holding every state's initial value, broadcast across lanes.
    pub fn initial_buffer(&self) -> StateBuffer {
        let mut values = Vec::with_capacity(self.total_slots);
        for mapping in &self.mappings {
            for _ in 0..mapping.lanes() {
                values.extend_from_slice(mapping.initial());
            }
        }
        StateBuffer::from_vec(values)
    }

    /// Compact JSON of the mappings, used for fingerprinting.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(&self.mappings).unwrap_or_default()
    }
}

impl fmt::Display for StateLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "layout slots={}", self.total_slots)?;
        for mapping in &self.mappings {
            let range = mapping.slot_range();
            match mapping {
                StateMapping::Scalar {
                    id,
                    stride,
                    initial,
                    ..
                } => writeln!(
                    f,
                    "  scalar {} slots={}..{} stride={} init={:?}",
                    id, range.start, range.end, stride, initial
                )?,
                StateMapping::Field {
                    id,
                    instance,
                    lanes,
                    stride,
                    initial,
                    ..
                } => writeln!(
                    f,
                    "  field {} @{} slots={}..{} lanes={} stride={} init={:?}",
                    id, instance, range.start, range.end, lanes, stride, initial
                )?,
            }
        }
        Ok(())
    }
}

// ── Allocator / planner ────────────────────────────────────────────────────

/// Per-compile collector of state requests.
///
/// Holds no state between compiles; a fresh allocator is created for every
/// compile and consumed by [`StateAllocator::plan`].
#[derive(Debug, Default)]
pub struct StateAllocator {
    requests: Vec<StateRequest>,
    seen: HashMap<StableStateId, usize>,
}

impl StateAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one state. A repeated id is a caller contract violation.
    pub fn allocate(&mut self, id: StableStateId, shape: StateShape) -> Result<(), AllocError> {
        if self.seen.contains_key(&id) {
            return Err(AllocError::DuplicateStateId(id));
        }
        if shape.initial().is_empty() {
            return Err(AllocError::EmptyInitial(id));
        }
        self.seen.insert(id.clone(), self.requests.len());
        self.requests.push(StateRequest { id, shape });
        Ok(())
    }

    pub fn requests(&self) -> &[StateRequest] {
        &self.requests
    }

    /// Pack all requests into contiguous slot ranges, in request order.
    pub fn plan(self) -> StateLayout {
        let mut offset = 0;
        let mut mappings = Vec::with_capacity(self.requests.len());
        for StateRequest { id, shape } in self.requests {
            let mapping = match shape {
                StateShape::Scalar { initial } => StateMapping::Scalar {
                    id,
                    slot: offset,
                    stride: initial.len(),
                    initial,
                },
                StateShape::Field {
                    instance,
                    lanes,
                    initial,
                } => StateMapping::Field {
                    id,
                    instance,
                    slot_start: offset,
                    lanes,
                    stride: initial.len(),
                    initial,
                },
            };
            offset = mapping.slot_range().end;
            mappings.push(mapping);
        }
        StateLayout {
            index: self.seen,
            mappings,
            total_slots: offset,
        }
    }
}

// ── Buffer ─────────────────────────────────────────────────────────────────

/// Flat numeric state storage addressed by slot offset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateBuffer(Vec<f64>);

impl StateBuffer {
    /// A buffer of `len` slots, all NaN until written.
    pub fn unwritten(len: usize) -> Self {
        Self(vec![f64::NAN; len])
    }

    pub fn from_vec(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.0
    }

    pub fn get(&self, range: Range<usize>) -> Option<&[f64]> {
        self.0.get(range)
    }

    pub fn get_mut(&mut self, range: Range<usize>) -> Option<&mut [f64]> {
        self.0.get_mut(range)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{BlockId, StateKind};

    fn sid(block: &str, kind: StateKind) -> StableStateId {
        StableStateId::for_block(&BlockId::new(block), kind)
    }

    fn scalar(initial: &[f64]) -> StateShape {
        StateShape::Scalar {
            initial: initial.to_vec(),
        }
    }

    fn field(instance: &str, lanes: usize, initial: &[f64]) -> StateShape {
        StateShape::Field {
            instance: InstanceId::new(instance),
            lanes,
            initial: initial.to_vec(),
        }
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut alloc = StateAllocator::new();
        alloc.allocate(sid("a", StateKind::Accum), scalar(&[0.0])).unwrap();
        let err = alloc
            .allocate(sid("a", StateKind::Accum), scalar(&[1.0]))
            .unwrap_err();
        assert_eq!(err, AllocError::DuplicateStateId(sid("a", StateKind::Accum)));
        assert_eq!(err.to_diagnostic().code, Some(codes::E0200));
        assert!(err.to_diagnostic().is_error());
    }

    #[test]
    fn same_block_different_kinds_coexist() {
        let mut alloc = StateAllocator::new();
        alloc.allocate(sid("a", StateKind::Accum), scalar(&[0.0])).unwrap();
        alloc.allocate(sid("a", StateKind::Delay), scalar(&[0.0])).unwrap();
        assert_eq!(alloc.plan().len(), 2);
    }

    #[test]
    fn empty_initial_is_rejected() {
        let mut alloc = StateAllocator::new();
        let err = alloc
            .allocate(sid("z", StateKind::Lag), field("dots", 3, &[]))
            .unwrap_err();
        assert_eq!(err, AllocError::EmptyInitial(sid("z", StateKind::Lag)));
        assert!(alloc.requests().is_empty());
    }

    #[test]
    fn plan_packs_contiguously_in_request_order() {
        let mut alloc = StateAllocator::new();
        alloc.allocate(sid("a", StateKind::Accum), scalar(&[0.0])).unwrap();
        alloc
            .allocate(sid("s", StateKind::Spring), field("dots", 3, &[0.0, 0.0]))
            .unwrap();
        alloc.allocate(sid("d", StateKind::Delay), scalar(&[5.0])).unwrap();
        let layout = alloc.plan();

        let ranges: Vec<_> = layout.mappings().iter().map(|m| m.slot_range()).collect();
        assert_eq!(ranges, vec![0..1, 1..7, 7..8]);
        assert_eq!(layout.total_slots(), 8);
        assert_eq!(
            layout.get(&sid("d", StateKind::Delay)).map(|m| m.start()),
            Some(7)
        );
        assert!(layout.get(&sid("missing", StateKind::Delay)).is_none());
    }

    #[test]
    fn zero_lane_field_occupies_no_slots() {
        let mut alloc = StateAllocator::new();
        alloc
            .allocate(sid("l", StateKind::Lag), field("empty", 0, &[1.0]))
            .unwrap();
        alloc.allocate(sid("a", StateKind::Accum), scalar(&[0.0])).unwrap();
        let layout = alloc.plan();
        assert_eq!(layout.mappings()[1].start(), 0);
        assert_eq!(layout.total_slots(), 1);
    }

    #[test]
    fn initial_buffer_broadcasts_field_template() {
        let mut alloc = StateAllocator::new();
        alloc.allocate(sid("a", StateKind::Accum), scalar(&[9.0])).unwrap();
        alloc
            .allocate(sid("s", StateKind::Spring), field("dots", 2, &[1.0, 2.0]))
            .unwrap();
        let buf = alloc.plan().initial_buffer();
        assert_eq!(buf.as_slice(), &[9.0, 1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn lane_range_steps_by_stride() {
        let mut alloc = StateAllocator::new();
        alloc.allocate(sid("a", StateKind::Accum), scalar(&[0.0])).unwrap();
        alloc
            .allocate(sid("s", StateKind::Spring), field("dots", 3, &[0.0, 0.0]))
            .unwrap();
        let layout = alloc.plan();
        let spring = layout.get(&sid("s", StateKind::Spring)).unwrap();
        assert_eq!(spring.lane_range(2), 5..7);
    }

    #[test]
    fn unwritten_buffer_is_nan() {
        let buf = StateBuffer::unwritten(3);
        assert!(buf.as_slice().iter().all(|v| v.is_nan()));
    }
}
