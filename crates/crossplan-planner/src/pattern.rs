//! Declarative operator and subplan patterns.
//!
//! Patterns are read-only templates; they own no plan operators and can be
//! reused across any number of match attempts. Parameter constraints use an
//! explicit `Wildcard::Any` marker instead of sentinel domain values, so a
//! real `0.0` fraction is never confused with "match anything".

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crossplan_core::platform::Platform;

use crate::error::{PlanError, Result};
use crate::operator::{Operator, OperatorKind, Udf};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Wildcard<T> {
    #[default]
    Any,
    Exactly(T),
}

impl<T: PartialEq> Wildcard<T> {
    pub fn matches(&self, value: &T) -> bool {
        match self {
            Wildcard::Any => true,
            Wildcard::Exactly(expected) => expected == value,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Wildcard::Any)
    }
}

impl<T> From<T> for Wildcard<T> {
    fn from(v: T) -> Self {
        Wildcard::Exactly(v)
    }
}

/// Structural predicate over one `OperatorKind` variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KindPattern {
    Source { location: Wildcard<String> },
    Map { udf: Wildcard<Udf> },
    FlatMap { udf: Wildcard<Udf> },
    Filter { predicate: Wildcard<Udf> },
    Sample { sample_size: Wildcard<u64> },
    BernoulliSample { fraction: Wildcard<f64>, seed: Wildcard<Option<u64>> },
    Join { left_key: Wildcard<Udf>, right_key: Wildcard<Udf> },
    Union,
    Sink { location: Wildcard<String> },
}

impl KindPattern {
    pub fn source() -> Self {
        KindPattern::Source { location: Wildcard::Any }
    }

    pub fn map() -> Self {
        KindPattern::Map { udf: Wildcard::Any }
    }

    pub fn flat_map() -> Self {
        KindPattern::FlatMap { udf: Wildcard::Any }
    }

    pub fn filter() -> Self {
        KindPattern::Filter { predicate: Wildcard::Any }
    }

    pub fn sample() -> Self {
        KindPattern::Sample { sample_size: Wildcard::Any }
    }

    pub fn bernoulli_sample() -> Self {
        KindPattern::BernoulliSample {
            fraction: Wildcard::Any,
            seed: Wildcard::Any,
        }
    }

    pub fn join() -> Self {
        KindPattern::Join {
            left_key: Wildcard::Any,
            right_key: Wildcard::Any,
        }
    }

    pub fn union() -> Self {
        KindPattern::Union
    }

    pub fn sink() -> Self {
        KindPattern::Sink { location: Wildcard::Any }
    }

    /// Matches exactly the kind of `kind`, any parameters.
    pub fn any_of(kind: &OperatorKind) -> Self {
        match kind {
            OperatorKind::Source { .. } => Self::source(),
            OperatorKind::Map { .. } => Self::map(),
            OperatorKind::FlatMap { .. } => Self::flat_map(),
            OperatorKind::Filter { .. } => Self::filter(),
            OperatorKind::Sample { .. } => Self::sample(),
            OperatorKind::BernoulliSample { .. } => Self::bernoulli_sample(),
            OperatorKind::Join { .. } => Self::join(),
            OperatorKind::Union => Self::union(),
            OperatorKind::Sink { .. } => Self::sink(),
        }
    }

    pub fn matches(&self, kind: &OperatorKind) -> bool {
        match self {
            KindPattern::Source { location } => {
                matches!(kind, OperatorKind::Source { location: l } if location.matches(l))
            }
            KindPattern::Map { udf } => {
                matches!(kind, OperatorKind::Map { udf: u } if udf.matches(u))
            }
            KindPattern::FlatMap { udf } => {
                matches!(kind, OperatorKind::FlatMap { udf: u } if udf.matches(u))
            }
            KindPattern::Filter { predicate } => {
                matches!(kind, OperatorKind::Filter { predicate: p } if predicate.matches(p))
            }
            KindPattern::Sample { sample_size } => {
                matches!(kind, OperatorKind::Sample { sample_size: n } if sample_size.matches(n))
            }
            KindPattern::BernoulliSample { fraction, seed } => matches!(
                kind,
                OperatorKind::BernoulliSample { fraction: f, seed: s }
                    if fraction.matches(f) && seed.matches(s)
            ),
            KindPattern::Join {
                left_key,
                right_key,
            } => matches!(
                kind,
                OperatorKind::Join { left_key: l, right_key: r }
                    if left_key.matches(l) && right_key.matches(r)
            ),
            KindPattern::Union => matches!(kind, OperatorKind::Union),
            KindPattern::Sink { location } => {
                matches!(kind, OperatorKind::Sink { location: l } if location.matches(l))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorPattern {
    name: String,
    kind: KindPattern,
    /// `None` matches logical operators only.
    platform: Option<Platform>,
    /// Exact patterns reject unoccupied boundary inputs and boundary fan-out.
    exact: bool,
}

impl OperatorPattern {
    pub fn new(name: impl Into<String>, kind: KindPattern) -> Self {
        Self {
            name: name.into(),
            kind,
            platform: None,
            exact: false,
        }
    }

    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    pub fn on(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &KindPattern {
        &self.kind
    }

    pub fn platform(&self) -> Option<Platform> {
        self.platform
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    pub fn matches(&self, op: &Operator) -> bool {
        op.platform() == self.platform && self.kind.matches(op.kind())
    }
}

/// Required connection: pattern operator `from`'s output feeds `to`'s input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEdge {
    pub from: usize,
    pub output: usize,
    pub to: usize,
    pub input: usize,
}

/// Deserialization goes through `SubplanPattern::new`, so a decoded pattern
/// is validated like a constructed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSubplanPattern")]
pub struct SubplanPattern {
    operators: Vec<OperatorPattern>,
    edges: Vec<PatternEdge>,
}

#[derive(Deserialize)]
struct RawSubplanPattern {
    operators: Vec<OperatorPattern>,
    #[serde(default)]
    edges: Vec<PatternEdge>,
}

impl TryFrom<RawSubplanPattern> for SubplanPattern {
    type Error = PlanError;

    fn try_from(raw: RawSubplanPattern) -> Result<Self> {
        SubplanPattern::new(raw.operators, raw.edges)
    }
}

impl SubplanPattern {
    pub fn singleton(op: OperatorPattern) -> Self {
        Self {
            operators: vec![op],
            edges: vec![],
        }
    }

    /// Validates names, edge endpoints, input single-occupancy, and connectivity.
    pub fn new(operators: Vec<OperatorPattern>, edges: Vec<PatternEdge>) -> Result<Self> {
        if operators.is_empty() {
            return Err(PlanError::InvalidPattern("pattern has no operators".into()));
        }

        let mut names = BTreeSet::new();
        for op in &operators {
            if !names.insert(op.name()) {
                return Err(PlanError::InvalidPattern(format!(
                    "duplicate operator pattern name '{}'",
                    op.name()
                )));
            }
        }

        let mut fed = BTreeSet::new();
        for e in &edges {
            if e.from >= operators.len() || e.to >= operators.len() {
                return Err(PlanError::InvalidPattern(format!(
                    "edge {e:?} references a missing operator pattern"
                )));
            }
            if !fed.insert((e.to, e.input)) {
                return Err(PlanError::InvalidPattern(format!(
                    "input {} of '{}' is fed twice",
                    e.input,
                    operators[e.to].name()
                )));
            }
        }

        let pattern = Self { operators, edges };
        if pattern.walk_order().len() != pattern.operators.len() {
            return Err(PlanError::InvalidPattern(
                "operator patterns are not connected".into(),
            ));
        }
        Ok(pattern)
    }

    pub fn operators(&self) -> &[OperatorPattern] {
        &self.operators
    }

    pub fn edges(&self) -> &[PatternEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.operators.iter().position(|p| p.name() == name)
    }

    /// Is input `input` of pattern operator `pattern` fed by a pattern edge?
    pub fn is_internal_input(&self, pattern: usize, input: usize) -> bool {
        self.edges.iter().any(|e| e.to == pattern && e.input == input)
    }

    pub fn is_internal_output(&self, pattern: usize, output: usize) -> bool {
        self.edges.iter().any(|e| e.from == pattern && e.output == output)
    }

    /// Breadth-first order over pattern edges (either direction), anchored at 0.
    pub(crate) fn walk_order(&self) -> Vec<usize> {
        let mut order = vec![0];
        let mut seen = BTreeSet::from([0]);
        let mut queue = VecDeque::from([0]);
        while let Some(p) = queue.pop_front() {
            for e in &self.edges {
                let neighbour = if e.from == p {
                    e.to
                } else if e.to == p {
                    e.from
                } else {
                    continue;
                };
                if seen.insert(neighbour) {
                    order.push(neighbour);
                    queue.push_back(neighbour);
                }
            }
        }
        order
    }
}

/// Chain-style builder: `SubplanPattern::builder().op(a).op(b).edge(0, 0, 1, 0).build()`.
#[derive(Debug, Default)]
pub struct SubplanPatternBuilder {
    operators: Vec<OperatorPattern>,
    edges: Vec<PatternEdge>,
}

impl SubplanPattern {
    pub fn builder() -> SubplanPatternBuilder {
        SubplanPatternBuilder::default()
    }
}

impl SubplanPatternBuilder {
    pub fn op(mut self, op: OperatorPattern) -> Self {
        self.operators.push(op);
        self
    }

    pub fn edge(mut self, from: usize, output: usize, to: usize, input: usize) -> Self {
        self.edges.push(PatternEdge {
            from,
            output,
            to,
            input,
        });
        self
    }

    pub fn build(self) -> Result<SubplanPattern> {
        SubplanPattern::new(self.operators, self.edges)
    }
}
