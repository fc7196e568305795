//! Cardinality estimation contract.
//!
//! An estimator is a pure function of input size estimates; it never looks at
//! data. Given the same inputs it returns the same estimate, so callers may
//! memoize freely.
//!
//! Per-kind defaults live in `default_estimator`:
//!
//! | kind            | output estimate                  |
//! |-----------------|----------------------------------|
//! | Map, FlatMap    | `x[0]`                           |
//! | Sample          | `x[0]`                           |
//! | Filter          | `round(x[0] * filter.selectivity)` |
//! | BernoulliSample | `round(x[0] * fraction)`         |
//! | Join            | `x[0] * x[1]`                    |
//! | Union           | `x[0] + x[1]`                    |
//! | Source          | unknown                          |

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crossplan_core::config::Configuration;
use crossplan_core::id::OpId;

use crate::error::{PlanError, Result};
use crate::operator::{Operator, OperatorKind};
use crate::plan::Plan;
use crate::slot::OutputRef;

/// Options-bag key read by `Filter` estimators.
pub const FILTER_SELECTIVITY_KEY: &str = "filter.selectivity";
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.5;

/// An interval estimate with a confidence in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CardinalityEstimate {
    pub lower: u64,
    pub upper: u64,
    pub confidence: f64,
}

impl CardinalityEstimate {
    pub fn new(lower: u64, upper: u64, confidence: f64) -> Self {
        Self {
            lower: lower.min(upper),
            upper: lower.max(upper),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn exactly(n: u64) -> Self {
        Self::new(n, n, 1.0)
    }

    pub fn is_exact(&self) -> bool {
        self.lower == self.upper
    }

    /// Midpoint, handy for ranking alternatives.
    pub fn midpoint(&self) -> u64 {
        self.lower + (self.upper - self.lower) / 2
    }
}

pub type CombineFn = Arc<dyn Fn(&[u64]) -> u64 + Send + Sync>;

#[derive(Clone)]
pub struct CardinalityEstimator {
    correction_factor: f64,
    min_inputs: usize,
    exclude_broadcast: bool,
    broadcast_inputs: Vec<usize>,
    function: CombineFn,
}

impl fmt::Debug for CardinalityEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardinalityEstimator")
            .field("correction_factor", &self.correction_factor)
            .field("min_inputs", &self.min_inputs)
            .field("exclude_broadcast", &self.exclude_broadcast)
            .field("broadcast_inputs", &self.broadcast_inputs)
            .finish_non_exhaustive()
    }
}

impl CardinalityEstimator {
    pub fn new<F>(correction_factor: f64, min_inputs: usize, exclude_broadcast: bool, function: F) -> Self
    where
        F: Fn(&[u64]) -> u64 + Send + Sync + 'static,
    {
        Self {
            correction_factor,
            min_inputs,
            exclude_broadcast,
            broadcast_inputs: Vec::new(),
            function: Arc::new(function),
        }
    }

    /// `f(x) = x[0]`, correction factor 1.0.
    pub fn pass_through(exclude_broadcast: bool) -> Self {
        Self::new(1.0, 1, exclude_broadcast, |x| x[0])
    }

    /// Input positions that are broadcast inputs on the owning operator.
    pub fn with_broadcast_inputs(mut self, indices: Vec<usize>) -> Self {
        self.broadcast_inputs = indices;
        self
    }

    pub fn correction_factor(&self) -> f64 {
        self.correction_factor
    }

    pub fn min_inputs(&self) -> usize {
        self.min_inputs
    }

    pub fn excludes_broadcast(&self) -> bool {
        self.exclude_broadcast
    }

    pub fn estimate(&self, inputs: &[CardinalityEstimate]) -> Result<CardinalityEstimate> {
        let considered: Vec<&CardinalityEstimate> = inputs
            .iter()
            .enumerate()
            .filter(|(i, _)| !(self.exclude_broadcast && self.broadcast_inputs.contains(i)))
            .map(|(_, e)| e)
            .collect();
        if considered.len() < self.min_inputs {
            return Err(PlanError::Estimation(format!(
                "estimator needs {} input estimate(s), got {}",
                self.min_inputs,
                considered.len()
            )));
        }

        let lowers: Vec<u64> = considered.iter().map(|e| e.lower).collect();
        let uppers: Vec<u64> = considered.iter().map(|e| e.upper).collect();
        let confidence = considered
            .iter()
            .map(|e| e.confidence)
            .fold(1.0_f64, f64::min);

        Ok(CardinalityEstimate::new(
            self.scale((self.function)(&lowers)),
            self.scale((self.function)(&uppers)),
            confidence,
        ))
    }

    fn scale(&self, v: u64) -> u64 {
        if self.correction_factor == 1.0 {
            return v;
        }
        (v as f64 * self.correction_factor).max(0.0).round() as u64
    }
}

fn scaled(x: u64, fraction: f64) -> u64 {
    (x as f64 * fraction).max(0.0).round() as u64
}

/// The estimator an operator of this kind reports for `_output_index`.
///
/// Every built-in kind has a single output, so the index only matters for
/// bounds checking (done by the caller).
pub(crate) fn default_estimator(
    op: &Operator,
    _output_index: usize,
    configuration: &Configuration,
) -> Option<CardinalityEstimator> {
    let exclude = op.supports_broadcast_inputs();
    let estimator = match op.kind() {
        OperatorKind::Source { .. } | OperatorKind::Sink { .. } => return None,
        OperatorKind::Map { .. } | OperatorKind::FlatMap { .. } | OperatorKind::Sample { .. } => {
            CardinalityEstimator::pass_through(exclude)
        }
        OperatorKind::Filter { .. } => {
            let selectivity = configuration
                .get_f64(FILTER_SELECTIVITY_KEY)
                .unwrap_or(DEFAULT_FILTER_SELECTIVITY);
            CardinalityEstimator::new(1.0, 1, exclude, move |x| scaled(x[0], selectivity))
        }
        OperatorKind::BernoulliSample { fraction, .. } => {
            let f = *fraction;
            CardinalityEstimator::new(1.0, 1, exclude, move |x| scaled(x[0], f))
        }
        OperatorKind::Join { .. } => {
            CardinalityEstimator::new(1.0, 2, exclude, |x| x[0].saturating_mul(x[1]))
        }
        OperatorKind::Union => {
            CardinalityEstimator::new(1.0, 2, exclude, |x| x[0].saturating_add(x[1]))
        }
    };

    let broadcast: Vec<usize> = op
        .inputs()
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_broadcast())
        .map(|(i, _)| i)
        .collect();
    Some(estimator.with_broadcast_inputs(broadcast))
}

/// Push source estimates through the plan in topological order.
///
/// Operators whose inputs are not all known, or that report no estimator, get
/// no entry; downstream of them stays unknown too.
pub fn estimate_plan(
    plan: &Plan,
    sources: &BTreeMap<OpId, CardinalityEstimate>,
    configuration: &Configuration,
) -> Result<BTreeMap<OutputRef, CardinalityEstimate>> {
    let mut estimates: BTreeMap<OutputRef, CardinalityEstimate> = BTreeMap::new();

    for id in plan.topological_order()? {
        let op = plan.operator(id)?;
        if op.is_source() {
            if let Some(est) = sources.get(&id) {
                for index in 0..op.num_outputs() {
                    estimates.insert(OutputRef::new(id, index), *est);
                }
            }
            continue;
        }

        let inputs: Option<Vec<CardinalityEstimate>> = op
            .inputs()
            .iter()
            .map(|s| s.occupant().and_then(|o| estimates.get(&o).copied()))
            .collect();
        let Some(inputs) = inputs else {
            debug!(op = %op, "inputs not fully estimated; output stays unknown");
            continue;
        };

        for index in 0..op.num_outputs() {
            if let Some(estimator) = op.cardinality_estimator(index, configuration)? {
                estimates.insert(OutputRef::new(id, index), estimator.estimate(&inputs)?);
            }
        }
    }
    Ok(estimates)
}
