#![forbid(unsafe_code)]
//! crossplan-planner: the operator graph and the machinery that rewrites it
//! into platform-specific subplans.
//!
//! Design:
//! - `Plan` is an arena of `Operator`s keyed by `OpId`; edges are slot
//!   occupancies, nothing else.
//! - `cardinality` supplies per-operator, per-output size estimators.
//! - `pattern` + `matching` find occurrences of operator shapes.
//! - `mapping` + `transform` turn one match into a validated, atomic splice.
//! - `rewrite` sequences transformations into epochs.
//!
//! Nothing here executes data or performs I/O.

pub mod cardinality;
pub mod error;
pub mod mapping;
pub mod matching;
pub mod operator;
pub mod pattern;
pub mod plan;
pub mod rewrite;
pub mod shared;
pub mod slot;
pub mod transform;
pub mod verify;

pub use cardinality::{estimate_plan, CardinalityEstimate, CardinalityEstimator};
pub use error::{PlanError, Result};
pub use mapping::{FnReplacement, Mapping, MappingRegistry, Replacement, ReplacementFactory, SingleOperatorReplacement};
pub use matching::{find_matches, MatchClaims, SubplanMatch};
pub use operator::{Operator, OperatorKind, Udf};
pub use pattern::{KindPattern, OperatorPattern, PatternEdge, SubplanPattern, Wildcard};
pub use plan::{Direction, Plan};
pub use rewrite::{EpochOutcome, FailedTransformation, RewriteEngine, RunSummary, SkippedMatch};
pub use shared::SharedPlan;
pub use slot::{InputRef, InputSlot, OutputRef, OutputSlot};
pub use transform::{AppliedTransformation, PlanTransformation, SlotSignature};
pub use verify::{assert_consistent, check_consistency};
