//! Operators: graph nodes with a fixed set of typed slots.
//!
//! The set of operator kinds is closed (`OperatorKind`). A logical operator has
//! no platform; an execution operator is the same kind bound to a `Platform`.
//! Slot arity is fixed when the operator is built and cannot change once the
//! operator lives in a `Plan`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crossplan_core::config::Configuration;
use crossplan_core::id::{Epoch, OpId};
use crossplan_core::platform::Platform;
use crossplan_core::types::DataType;

use crate::cardinality::{self, CardinalityEstimator};
use crate::error::{PlanError, Result};
use crate::slot::{InputSlot, OutputSlot};

/// Opaque user-function descriptor. Only its label matters to the planner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Udf(String);

impl Udf {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn label(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Udf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed set of operator kinds and their constructor-level parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperatorKind {
    Source { location: String },
    Map { udf: Udf },
    FlatMap { udf: Udf },
    Filter { predicate: Udf },
    /// Fixed-size random sample.
    Sample { sample_size: u64 },
    /// Keeps each element independently with probability `fraction`.
    BernoulliSample { fraction: f64, seed: Option<u64> },
    Join { left_key: Udf, right_key: Udf },
    Union,
    Sink { location: String },
}

impl OperatorKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Source { .. } => "Source",
            OperatorKind::Map { .. } => "Map",
            OperatorKind::FlatMap { .. } => "FlatMap",
            OperatorKind::Filter { .. } => "Filter",
            OperatorKind::Sample { .. } => "Sample",
            OperatorKind::BernoulliSample { .. } => "BernoulliSample",
            OperatorKind::Join { .. } => "Join",
            OperatorKind::Union => "Union",
            OperatorKind::Sink { .. } => "Sink",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    id: Option<OpId>,
    label: Option<String>,
    kind: OperatorKind,
    platform: Option<Platform>,
    inputs: Vec<InputSlot>,
    outputs: Vec<OutputSlot>,
    supports_broadcast: bool,
    epoch: Epoch,
}

impl Operator {
    fn build(
        kind: OperatorKind,
        inputs: Vec<InputSlot>,
        outputs: Vec<OutputSlot>,
        supports_broadcast: bool,
    ) -> Self {
        Self {
            id: None,
            label: None,
            kind,
            platform: None,
            inputs,
            outputs,
            supports_broadcast,
            epoch: Epoch::INITIAL,
        }
    }

    fn unary(kind: OperatorKind, input: DataType, output: DataType) -> Self {
        Self::build(
            kind,
            vec![InputSlot::new("input", input)],
            vec![OutputSlot::new("output", output)],
            true,
        )
    }

    pub fn source(location: impl Into<String>, output: DataType) -> Self {
        Self::build(
            OperatorKind::Source {
                location: location.into(),
            },
            vec![],
            vec![OutputSlot::new("output", output)],
            false,
        )
    }

    pub fn map(udf: Udf, input: DataType, output: DataType) -> Self {
        Self::unary(OperatorKind::Map { udf }, input, output)
    }

    pub fn flat_map(udf: Udf, input: DataType, output: DataType) -> Self {
        Self::unary(OperatorKind::FlatMap { udf }, input, output)
    }

    pub fn filter(predicate: Udf, data_type: DataType) -> Self {
        Self::unary(OperatorKind::Filter { predicate }, data_type.clone(), data_type)
    }

    pub fn sample(sample_size: u64, data_type: DataType) -> Self {
        Self::unary(OperatorKind::Sample { sample_size }, data_type.clone(), data_type)
    }

    pub fn bernoulli_sample(fraction: f64, data_type: DataType) -> Self {
        Self::unary(
            OperatorKind::BernoulliSample {
                fraction,
                seed: None,
            },
            data_type.clone(),
            data_type,
        )
    }

    pub fn join(left_key: Udf, right_key: Udf, left: DataType, right: DataType) -> Self {
        let output = DataType::pair(left.clone(), right.clone());
        Self::build(
            OperatorKind::Join {
                left_key,
                right_key,
            },
            vec![InputSlot::new("input0", left), InputSlot::new("input1", right)],
            vec![OutputSlot::new("output", output)],
            false,
        )
    }

    pub fn union(data_type: DataType) -> Self {
        Self::build(
            OperatorKind::Union,
            vec![
                InputSlot::new("input0", data_type.clone()),
                InputSlot::new("input1", data_type.clone()),
            ],
            vec![OutputSlot::new("output", data_type)],
            false,
        )
    }

    pub fn sink(location: impl Into<String>, input: DataType) -> Self {
        Self::build(
            OperatorKind::Sink {
                location: location.into(),
            },
            vec![InputSlot::new("input", input)],
            vec![],
            false,
        )
    }

    /// Same kind and parameters with fresh, disconnected slots and no id.
    ///
    /// This is how replacement factories derive execution operators from the
    /// logical operators they matched.
    pub fn derive(&self) -> Self {
        Self {
            id: None,
            label: self.label.clone(),
            kind: self.kind.clone(),
            platform: self.platform,
            inputs: self
                .inputs
                .iter()
                .map(|s| {
                    if s.is_broadcast() {
                        InputSlot::broadcast(s.name(), s.data_type().clone())
                    } else {
                        InputSlot::new(s.name(), s.data_type().clone())
                    }
                })
                .collect(),
            outputs: self
                .outputs
                .iter()
                .map(|s| OutputSlot::new(s.name(), s.data_type().clone()))
                .collect(),
            supports_broadcast: self.supports_broadcast,
            epoch: self.epoch,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Bind this operator to an execution platform.
    pub fn on(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn at(mut self, epoch: Epoch) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        if let OperatorKind::BernoulliSample { seed: s, .. } = &mut self.kind {
            *s = Some(seed);
        }
        self
    }

    /// Append a broadcast input. Only legal before the operator joins a plan.
    pub fn with_broadcast_input(mut self, name: impl Into<String>, data_type: DataType) -> Result<Self> {
        if !self.supports_broadcast {
            return Err(PlanError::InvalidOperator(format!(
                "{} does not support broadcast inputs",
                self.describe()
            )));
        }
        if self.id.is_some() {
            return Err(PlanError::InvalidOperator(format!(
                "{} is already part of a plan; its arity is fixed",
                self.describe()
            )));
        }
        self.inputs.push(InputSlot::broadcast(name, data_type));
        Ok(self)
    }

    pub fn id(&self) -> Option<OpId> {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn kind(&self) -> &OperatorKind {
        &self.kind
    }

    pub fn platform(&self) -> Option<Platform> {
        self.platform
    }

    pub fn is_logical(&self) -> bool {
        self.platform.is_none()
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn inputs(&self) -> &[InputSlot] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputSlot] {
        &self.outputs
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// No inputs.
    pub fn is_source(&self) -> bool {
        self.inputs.is_empty()
    }

    /// No outputs.
    pub fn is_sink(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn supports_broadcast_inputs(&self) -> bool {
        self.supports_broadcast
    }

    pub fn input(&self, index: usize) -> Result<&InputSlot> {
        self.inputs
            .get(index)
            .ok_or_else(|| self.index_error("input", index, self.inputs.len()))
    }

    pub fn output(&self, index: usize) -> Result<&OutputSlot> {
        self.outputs
            .get(index)
            .ok_or_else(|| self.index_error("output", index, self.outputs.len()))
    }

    pub(crate) fn input_mut(&mut self, index: usize) -> Result<&mut InputSlot> {
        let arity = self.inputs.len();
        if index >= arity {
            return Err(self.index_error("input", index, arity));
        }
        Ok(&mut self.inputs[index])
    }

    pub(crate) fn output_mut(&mut self, index: usize) -> Result<&mut OutputSlot> {
        let arity = self.outputs.len();
        if index >= arity {
            return Err(self.index_error("output", index, arity));
        }
        Ok(&mut self.outputs[index])
    }

    /// Estimator for output `output_index`; `Ok(None)` means "unknown".
    pub fn cardinality_estimator(
        &self,
        output_index: usize,
        configuration: &Configuration,
    ) -> Result<Option<CardinalityEstimator>> {
        self.output(output_index)?;
        Ok(cardinality::default_estimator(self, output_index, configuration))
    }

    /// A disconnected copy owned by `owner`: every slot is `copy_for(owner)`.
    pub fn copy_for(&self, owner: OpId) -> Self {
        Self {
            id: Some(owner),
            label: self.label.clone(),
            kind: self.kind.clone(),
            platform: self.platform,
            inputs: self.inputs.iter().map(|s| s.copy_for(owner)).collect(),
            outputs: self.outputs.iter().map(|s| s.copy_for(owner)).collect(),
            supports_broadcast: self.supports_broadcast,
            epoch: self.epoch,
        }
    }

    pub(crate) fn bind(&mut self, id: OpId) {
        self.id = Some(id);
        for s in &mut self.inputs {
            s.bind_owner(id);
        }
        for s in &mut self.outputs {
            s.bind_owner(id);
        }
    }

    pub fn describe(&self) -> String {
        self.to_string()
    }

    fn index_error(&self, what: &'static str, index: usize, arity: usize) -> PlanError {
        PlanError::Index {
            subject: self.describe(),
            what,
            index,
            arity,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = self.platform {
            write!(f, "{p}:")?;
        }
        f.write_str(self.kind.name())?;
        if let Some(label) = &self.label {
            write!(f, "[{label}]")?;
        }
        if let Some(id) = self.id {
            write!(f, "@{}", id.get())?;
        }
        Ok(())
    }
}
