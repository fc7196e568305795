//! Typed connection points on operators.
//!
//! Slots never own each other. An `InputSlot` remembers at most one occupant
//! (`OutputRef`), an `OutputSlot` remembers the inputs it feeds (`InputRef`s).
//! Both are plain addresses into the plan's operator arena, so replacing a
//! region of the plan never leaves a dangling pointer behind, only a stale id
//! that lookups reject.
//!
//! Occupancy rules are enforced here; element-type compatibility is the
//! caller's job (see `Plan::connect`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crossplan_core::id::OpId;
use crossplan_core::types::DataType;

use crate::error::{PlanError, Result};

/// Address of an input slot: operator + input index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputRef {
    pub op: OpId,
    pub index: usize,
}

/// Address of an output slot: operator + output index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputRef {
    pub op: OpId,
    pub index: usize,
}

impl InputRef {
    pub const fn new(op: OpId, index: usize) -> Self {
        Self { op, index }
    }
}

impl OutputRef {
    pub const fn new(op: OpId, index: usize) -> Self {
        Self { op, index }
    }
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.in[{}]", self.op, self.index)
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.out[{}]", self.op, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSlot {
    name: String,
    data_type: DataType,
    /// Broadcast inputs do not drive the operator's output cardinality.
    broadcast: bool,
    owner: Option<OpId>,
    occupant: Option<OutputRef>,
}

impl InputSlot {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            broadcast: false,
            owner: None,
            occupant: None,
        }
    }

    pub fn broadcast(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            broadcast: true,
            ..Self::new(name, data_type)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    /// Owning operator; `None` until the operator is placed into a plan.
    pub fn owner(&self) -> Option<OpId> {
        self.owner
    }

    pub fn occupant(&self) -> Option<OutputRef> {
        self.occupant
    }

    pub fn is_occupied(&self) -> bool {
        self.occupant.is_some()
    }

    /// A disconnected copy owned by `owner`. Connections are never copied.
    pub fn copy_for(&self, owner: OpId) -> Self {
        Self {
            name: self.name.clone(),
            data_type: self.data_type.clone(),
            broadcast: self.broadcast,
            owner: Some(owner),
            occupant: None,
        }
    }

    pub(crate) fn check_vacant(&self, at: InputRef) -> Result<()> {
        match self.occupant {
            None => Ok(()),
            Some(current) => Err(PlanError::ConnectionState(format!(
                "cannot connect: {at} is already occupied by {current}"
            ))),
        }
    }

    pub(crate) fn check_occupied_by(&self, at: InputRef, by: OutputRef) -> Result<()> {
        if self.occupant == Some(by) {
            Ok(())
        } else {
            Err(PlanError::ConnectionState(format!(
                "cannot disconnect: {at} is not occupied by {by} (occupant: {:?})",
                self.occupant
            )))
        }
    }

    pub(crate) fn set_occupant(&mut self, occupant: Option<OutputRef>) {
        self.occupant = occupant;
    }

    pub(crate) fn bind_owner(&mut self, owner: OpId) {
        self.owner = Some(owner);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSlot {
    name: String,
    data_type: DataType,
    owner: Option<OpId>,
    occupied: Vec<InputRef>,
}

impl OutputSlot {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            owner: None,
            occupied: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn owner(&self) -> Option<OpId> {
        self.owner
    }

    /// Inputs fed by this output, in connection order.
    pub fn occupied_slots(&self) -> &[InputRef] {
        &self.occupied
    }

    pub fn feeds(&self, input: InputRef) -> bool {
        self.occupied.contains(&input)
    }

    pub fn copy_for(&self, owner: OpId) -> Self {
        Self {
            name: self.name.clone(),
            data_type: self.data_type.clone(),
            owner: Some(owner),
            occupied: Vec::new(),
        }
    }

    pub(crate) fn attach(&mut self, input: InputRef) {
        self.occupied.push(input);
    }

    pub(crate) fn detach(&mut self, input: InputRef) {
        self.occupied.retain(|i| *i != input);
    }

    pub(crate) fn bind_owner(&mut self, owner: OpId) {
        self.owner = Some(owner);
    }
}
