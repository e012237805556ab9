// instance.rs — Element populations and their lane identity policy
//
// An instance is a population of elements whose size may change between
// compiles. Its identity policy decides how lanes are matched across a
// hot-swap: stable keys follow elements through reordering, positional
// identity only supports truncation and extension.

use std::collections::BTreeMap;

use crate::ast::Span;
use crate::id::InstanceId;
use crate::lanes::{build_mapping, LaneMapping};

#[derive(Debug, Clone, PartialEq)]
pub enum LaneIdentity {
    /// One caller-supplied identity key per element.
    Stable(Vec<String>),
    /// Elements are identified by their index only.
    Positional,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub id: InstanceId,
    pub count: usize,
    pub identity: LaneIdentity,
    pub span: Span,
}

impl Instance {
    /// Stable keys, if this instance has them.
    pub fn keys(&self) -> Option<&[String]> {
        match &self.identity {
            LaneIdentity::Stable(keys) => Some(keys),
            LaneIdentity::Positional => None,
        }
    }
}

/// Instances of one compiled patch, by id.
#[derive(Debug, Clone, Default)]
pub struct InstanceTable {
    instances: BTreeMap<InstanceId, Instance>,
}

impl InstanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an instance; returns the previous one with the same id, if any.
    pub fn insert(&mut self, instance: Instance) -> Option<Instance> {
        self.instances.insert(instance.id.clone(), instance)
    }

    pub fn get(&self, id: &InstanceId) -> Option<&Instance> {
        self.instances.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Lane correspondence from `old` to `new`.
///
/// Keyed matching needs keys on both sides; otherwise lanes correspond by
/// position.
pub fn correspond(old: &Instance, new: &Instance) -> LaneMapping {
    match (old.keys(), new.keys()) {
        (Some(old_keys), Some(new_keys)) => build_mapping(old_keys, new_keys),
        _ => LaneMapping::identity(),
    }
}
