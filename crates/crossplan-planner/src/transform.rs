//! A single plan transformation: one mapping applied to one match.
//!
//! Application is split in two:
//!
//! 1. `PlanTransformation::prepare` reads the plan, asks the mapping's factory
//!    for a replacement, checks that the replacement's external signature
//!    equals the matched subplan's, and computes every edge that has to be
//!    re-attached. The plan is not touched; any failure here leaves it as it
//!    was.
//! 2. `commit` removes the matched operators (dropping all of their edges),
//!    inserts the replacement tagged with the epoch, and attaches the
//!    precomputed edges. Everything that could fail was checked in step 1.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crossplan_core::id::{Epoch, OpId};
use crossplan_core::platform::Platform;
use crossplan_core::types::DataType;

use crate::error::{PlanError, Result};
use crate::mapping::{Mapping, Replacement};
use crate::matching::SubplanMatch;
use crate::pattern::SubplanPattern;
use crate::plan::Plan;
use crate::slot::{InputRef, OutputRef};

/// External slot signature: `(type, broadcast)` per boundary input, type per
/// boundary output, plus whether any operator supports broadcast inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSignature {
    pub inputs: Vec<(DataType, bool)>,
    pub outputs: Vec<DataType>,
    pub supports_broadcast: bool,
}

/// Edge endpoint on the output side: an operator that stays, or a slot of
/// the replacement identified by its position in `Replacement::operators`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Producer {
    Existing(OutputRef),
    New { op: usize, index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Consumer {
    Existing(InputRef),
    New { op: usize, index: usize },
}

/// Record of a committed transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedTransformation {
    pub mapping: String,
    pub platform: Platform,
    pub epoch: Epoch,
    pub replaced: Vec<OpId>,
    pub inserted: Vec<OpId>,
}

/// A validated, not yet committed transformation.
#[derive(Debug)]
pub struct PlanTransformation {
    mapping: String,
    platform: Platform,
    epoch: Epoch,
    replaced: Vec<OpId>,
    replacement: Replacement,
    attach: Vec<(Producer, Consumer)>,
    keep_pinned: bool,
}

/// Boundary slots of a match in signature order: pattern operator order, then
/// slot index.
pub fn match_boundary(
    plan: &Plan,
    pattern: &SubplanPattern,
    matched: &SubplanMatch,
) -> Result<(Vec<InputRef>, Vec<OutputRef>)> {
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    for (k, id) in matched.operators().iter().enumerate() {
        let op = plan.operator(*id)?;
        for j in 0..op.num_inputs() {
            if !pattern.is_internal_input(k, j) {
                inputs.push(InputRef::new(*id, j));
            }
        }
        for i in 0..op.num_outputs() {
            if !pattern.is_internal_output(k, i) {
                outputs.push(OutputRef::new(*id, i));
            }
        }
    }
    Ok((inputs, outputs))
}

/// Signature of the matched subplan as it currently sits in `plan`.
pub fn match_signature(
    plan: &Plan,
    pattern: &SubplanPattern,
    matched: &SubplanMatch,
) -> Result<SlotSignature> {
    let (inputs, outputs) = match_boundary(plan, pattern, matched)?;
    let mut sig = SlotSignature {
        inputs: Vec::with_capacity(inputs.len()),
        outputs: Vec::with_capacity(outputs.len()),
        supports_broadcast: false,
    };
    for r in inputs {
        let slot = plan.operator(r.op)?.input(r.index)?;
        sig.inputs.push((slot.data_type().clone(), slot.is_broadcast()));
    }
    for r in outputs {
        sig.outputs.push(plan.operator(r.op)?.output(r.index)?.data_type().clone());
    }
    for id in matched.operators() {
        sig.supports_broadcast |= plan.operator(*id)?.supports_broadcast_inputs();
    }
    Ok(sig)
}

fn mismatch(mapping: &Mapping, detail: impl Into<String>) -> PlanError {
    PlanError::SignatureMismatch {
        mapping: mapping.name().to_string(),
        detail: detail.into(),
    }
}

/// Check the replacement is internally well formed and compute its signature.
fn replacement_signature(mapping: &Mapping, r: &Replacement) -> Result<SlotSignature> {
    if r.operators.is_empty() {
        return Err(mismatch(mapping, "replacement has no operators"));
    }
    for op in &r.operators {
        let connected = op.inputs().iter().any(|s| s.is_occupied())
            || op.outputs().iter().any(|s| !s.occupied_slots().is_empty());
        if connected || op.id().is_some() {
            return Err(PlanError::InvalidOperator(format!(
                "replacement operator {op} already belongs to a plan"
            )));
        }
    }

    // Each replacement slot must be covered exactly once, either by the
    // boundary lists or by an internal edge.
    let mut covered_in: BTreeSet<(usize, usize)> = BTreeSet::new();
    let mut covered_out: BTreeSet<(usize, usize)> = BTreeSet::new();
    for e in &r.edges {
        let from = r
            .operators
            .get(e.from)
            .and_then(|op| op.output(e.output).ok())
            .ok_or_else(|| mismatch(mapping, format!("internal edge {e:?} has no source slot")))?;
        let to = r
            .operators
            .get(e.to)
            .and_then(|op| op.input(e.input).ok())
            .ok_or_else(|| mismatch(mapping, format!("internal edge {e:?} has no target slot")))?;
        if from.data_type() != to.data_type() {
            return Err(PlanError::TypeMismatch {
                output: from.data_type().clone(),
                input: to.data_type().clone(),
            });
        }
        if !covered_in.insert((e.to, e.input)) {
            return Err(mismatch(mapping, format!("internal edge {e:?} feeds an input twice")));
        }
        covered_out.insert((e.from, e.output));
    }

    let mut sig = SlotSignature {
        inputs: Vec::with_capacity(r.inputs.len()),
        outputs: Vec::with_capacity(r.outputs.len()),
        supports_broadcast: r.operators.iter().any(|op| op.supports_broadcast_inputs()),
    };
    for &(op, index) in &r.inputs {
        let slot = r
            .operators
            .get(op)
            .and_then(|o| o.input(index).ok())
            .ok_or_else(|| mismatch(mapping, format!("boundary input ({op}, {index}) does not exist")))?;
        if !covered_in.insert((op, index)) {
            return Err(mismatch(mapping, format!("boundary input ({op}, {index}) listed twice")));
        }
        sig.inputs.push((slot.data_type().clone(), slot.is_broadcast()));
    }
    for &(op, index) in &r.outputs {
        let slot = r
            .operators
            .get(op)
            .and_then(|o| o.output(index).ok())
            .ok_or_else(|| mismatch(mapping, format!("boundary output ({op}, {index}) does not exist")))?;
        if covered_out.contains(&(op, index)) || r.outputs.iter().filter(|o| **o == (op, index)).count() > 1 {
            return Err(mismatch(mapping, format!("boundary output ({op}, {index}) is not external")));
        }
        sig.outputs.push(slot.data_type().clone());
    }

    for (pos, op) in r.operators.iter().enumerate() {
        for j in 0..op.num_inputs() {
            if !covered_in.contains(&(pos, j)) {
                return Err(mismatch(mapping, format!("replacement input ({pos}, {j}) is left dangling")));
            }
        }
        for i in 0..op.num_outputs() {
            if !covered_out.contains(&(pos, i)) && !r.outputs.contains(&(pos, i)) {
                return Err(mismatch(mapping, format!("replacement output ({pos}, {i}) is left dangling")));
            }
        }
    }
    Ok(sig)
}

impl PlanTransformation {
    /// Validate and stage `mapping` applied to `matched`. Never mutates `plan`.
    pub fn prepare(mapping: &Mapping, matched: &SubplanMatch, plan: &Plan, epoch: Epoch) -> Result<Self> {
        let pattern = mapping.pattern();
        for id in matched.operators() {
            plan.operator(*id)?;
        }

        let mut replacement = mapping.factory().create(plan, matched, epoch)?;
        replacement.operators = replacement
            .operators
            .into_iter()
            .map(|op| op.at(epoch))
            .collect();

        let old = match_signature(plan, pattern, matched)?;
        let new = replacement_signature(mapping, &replacement)?;
        if old.inputs.len() != new.inputs.len() || old.outputs.len() != new.outputs.len() {
            return Err(mismatch(
                mapping,
                format!(
                    "arity {}->{} replaced by {}->{}",
                    old.inputs.len(),
                    old.outputs.len(),
                    new.inputs.len(),
                    new.outputs.len()
                ),
            ));
        }
        if let Some(k) = (0..old.inputs.len()).find(|k| old.inputs[*k] != new.inputs[*k]) {
            return Err(mismatch(
                mapping,
                format!("input {k}: {:?} replaced by {:?}", old.inputs[k], new.inputs[k]),
            ));
        }
        if let Some(k) = (0..old.outputs.len()).find(|k| old.outputs[*k] != new.outputs[*k]) {
            return Err(mismatch(
                mapping,
                format!("output {k}: {} replaced by {}", old.outputs[k], new.outputs[k]),
            ));
        }
        if old.supports_broadcast != new.supports_broadcast {
            return Err(mismatch(mapping, "broadcast-input support differs"));
        }

        let (old_inputs, old_outputs) = match_boundary(plan, pattern, matched)?;
        let matched_set = matched.operator_set();
        let out_position: BTreeMap<OutputRef, usize> =
            old_outputs.iter().enumerate().map(|(k, r)| (*r, k)).collect();

        let mut attach = Vec::new();
        for (k, r) in old_inputs.iter().enumerate() {
            let Some(occupant) = plan.operator(r.op)?.input(r.index)?.occupant() else {
                continue;
            };
            let (op, index) = replacement.inputs[k];
            let consumer = Consumer::New { op, index };
            let producer = if matched_set.contains(&occupant.op) {
                // Edge between two boundary slots of the match itself.
                let pos = out_position.get(&occupant).copied().ok_or_else(|| {
                    PlanError::Core(crossplan_core::Error::Invariant(format!(
                        "{occupant} feeds the match but is not a boundary output"
                    )))
                })?;
                let (op, index) = replacement.outputs[pos];
                Producer::New { op, index }
            } else {
                Producer::Existing(occupant)
            };
            attach.push((producer, consumer));
        }
        for (k, r) in old_outputs.iter().enumerate() {
            let (op, index) = replacement.outputs[k];
            for c in plan.operator(r.op)?.output(r.index)?.occupied_slots() {
                if !matched_set.contains(&c.op) {
                    attach.push((Producer::New { op, index }, Consumer::Existing(*c)));
                }
            }
        }

        Ok(Self {
            mapping: mapping.name().to_string(),
            platform: mapping.platform(),
            epoch,
            replaced: matched.operators().to_vec(),
            replacement,
            attach,
            keep_pinned: matched.operators().iter().any(|id| plan.is_pinned(*id)),
        })
    }

    pub fn mapping(&self) -> &str {
        &self.mapping
    }

    pub fn replaced(&self) -> &[OpId] {
        &self.replaced
    }

    /// Splice the replacement into `plan`.
    pub fn commit(self, plan: &mut Plan) -> Result<AppliedTransformation> {
        for id in &self.replaced {
            plan.remove_operator(*id)?;
        }

        let mut inserted = Vec::with_capacity(self.replacement.operators.len());
        for op in self.replacement.operators {
            let id = plan.add_operator(op)?;
            if self.keep_pinned {
                plan.pin(id)?;
            }
            inserted.push(id);
        }

        for e in &self.replacement.edges {
            plan.connect(
                OutputRef::new(inserted[e.from], e.output),
                InputRef::new(inserted[e.to], e.input),
            )?;
        }
        for (producer, consumer) in &self.attach {
            let from = match *producer {
                Producer::Existing(r) => r,
                Producer::New { op, index } => OutputRef::new(inserted[op], index),
            };
            let to = match *consumer {
                Consumer::Existing(r) => r,
                Consumer::New { op, index } => InputRef::new(inserted[op], index),
            };
            plan.connect(from, to)?;
        }

        debug!(
            mapping = %self.mapping,
            platform = %self.platform,
            epoch = %self.epoch,
            replaced = ?self.replaced,
            inserted = ?inserted,
            "applied transformation"
        );
        Ok(AppliedTransformation {
            mapping: self.mapping,
            platform: self.platform,
            epoch: self.epoch,
            replaced: self.replaced,
            inserted,
        })
    }
}

/// Prepare and commit in one step. On error the plan is unchanged.
pub fn apply(mapping: &Mapping, matched: &SubplanMatch, plan: &mut Plan, epoch: Epoch) -> Result<AppliedTransformation> {
    PlanTransformation::prepare(mapping, matched, plan, epoch)?.commit(plan)
}
