//! Mappings: a subplan pattern, a replacement factory, and a target platform.
//!
//! A `Mapping` is a pure declaration. Applying it is the job of
//! `transform::PlanTransformation` and the `rewrite::RewriteEngine`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crossplan_core::id::Epoch;
use crossplan_core::platform::{Platform, PlatformSet};

use crate::error::{PlanError, Result};
use crate::matching::SubplanMatch;
use crate::operator::Operator;
use crate::pattern::{PatternEdge, SubplanPattern};
use crate::plan::Plan;

/// A small operator cluster to splice in place of a match.
///
/// `inputs`/`outputs` list the cluster's boundary slots as
/// `(operator position, slot index)`, in the same order as the matched
/// subplan's boundary slots.
#[derive(Debug, Clone)]
pub struct Replacement {
    pub operators: Vec<Operator>,
    pub edges: Vec<PatternEdge>,
    pub inputs: Vec<(usize, usize)>,
    pub outputs: Vec<(usize, usize)>,
}

impl Replacement {
    pub fn new(
        operators: Vec<Operator>,
        edges: Vec<PatternEdge>,
        inputs: Vec<(usize, usize)>,
        outputs: Vec<(usize, usize)>,
    ) -> Self {
        Self {
            operators,
            edges,
            inputs,
            outputs,
        }
    }

    /// One operator whose slots are the boundary, in slot order.
    pub fn single(op: Operator) -> Self {
        let inputs = (0..op.num_inputs()).map(|j| (0, j)).collect();
        let outputs = (0..op.num_outputs()).map(|i| (0, i)).collect();
        Self {
            operators: vec![op],
            edges: vec![],
            inputs,
            outputs,
        }
    }
}

pub trait ReplacementFactory: Send + Sync {
    /// Build the replacement for `matched`. Must not touch `plan`.
    fn create(&self, plan: &Plan, matched: &SubplanMatch, epoch: Epoch) -> Result<Replacement>;
}

/// Replaces a single matched operator with one new operator.
pub struct SingleOperatorReplacement<F> {
    f: F,
}

impl<F> SingleOperatorReplacement<F>
where
    F: Fn(&Operator, Epoch) -> Operator + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ReplacementFactory for SingleOperatorReplacement<F>
where
    F: Fn(&Operator, Epoch) -> Operator + Send + Sync,
{
    fn create(&self, plan: &Plan, matched: &SubplanMatch, epoch: Epoch) -> Result<Replacement> {
        if matched.operators().len() != 1 {
            return Err(PlanError::InvalidPattern(format!(
                "single-operator replacement applied to a {}-operator match",
                matched.operators().len()
            )));
        }
        let op = plan.operator(matched.anchor())?;
        Ok(Replacement::single((self.f)(op, epoch)))
    }
}

/// Adapts any closure over the whole match into a factory.
pub struct FnReplacement<F> {
    f: F,
}

impl<F> FnReplacement<F>
where
    F: Fn(&Plan, &SubplanMatch, Epoch) -> Result<Replacement> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ReplacementFactory for FnReplacement<F>
where
    F: Fn(&Plan, &SubplanMatch, Epoch) -> Result<Replacement> + Send + Sync,
{
    fn create(&self, plan: &Plan, matched: &SubplanMatch, epoch: Epoch) -> Result<Replacement> {
        (self.f)(plan, matched, epoch)
    }
}

#[derive(Clone)]
pub struct Mapping {
    name: String,
    pattern: SubplanPattern,
    factory: Arc<dyn ReplacementFactory>,
    platform: Platform,
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping")
            .field("name", &self.name)
            .field("platform", &self.platform)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

impl Mapping {
    pub fn new(
        name: impl Into<String>,
        pattern: SubplanPattern,
        factory: impl ReplacementFactory + 'static,
        platform: Platform,
    ) -> Self {
        Self {
            name: name.into(),
            pattern,
            factory: Arc::new(factory),
            platform,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &SubplanPattern {
        &self.pattern
    }

    pub fn factory(&self) -> &dyn ReplacementFactory {
        self.factory.as_ref()
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }
}

/// Registered mappings, kept in registration order and indexed by platform.
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    mappings: Vec<Mapping>,
    by_platform: BTreeMap<Platform, Vec<usize>>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mapping: Mapping) -> &mut Self {
        self.by_platform
            .entry(mapping.platform())
            .or_default()
            .push(self.mappings.len());
        self.mappings.push(mapping);
        self
    }

    pub fn extend(&mut self, mappings: impl IntoIterator<Item = Mapping>) -> &mut Self {
        for m in mappings {
            self.register(m);
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mapping> + '_ {
        self.mappings.iter()
    }

    pub fn for_platform(&self, platform: Platform) -> impl Iterator<Item = &Mapping> + '_ {
        self.by_platform
            .get(&platform)
            .into_iter()
            .flatten()
            .map(move |i| &self.mappings[*i])
    }

    /// Mappings whose platform is in `platforms`, in registration order.
    pub fn enabled(&self, platforms: PlatformSet) -> impl Iterator<Item = &Mapping> + '_ {
        self.mappings
            .iter()
            .filter(move |m| platforms.contains(m.platform()))
    }

    pub fn platforms(&self) -> PlatformSet {
        self.by_platform.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
