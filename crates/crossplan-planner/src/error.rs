use thiserror::Error;

use crossplan_core::id::OpId;
use crossplan_core::types::DataType;

/// Result type local to crossplan-planner.
pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Debug, Error)]
pub enum PlanError {
    /// Connecting an occupied input, or disconnecting a non-occupant output.
    #[error("connection state error: {0}")]
    ConnectionState(String),

    #[error("{what} index {index} out of range for {subject} (arity {arity})")]
    Index {
        subject: String,
        what: &'static str,
        index: usize,
        arity: usize,
    },

    #[error("element type mismatch: output carries {output}, input expects {input}")]
    TypeMismatch { output: DataType, input: DataType },

    /// A replacement's external slot signature disagrees with the matched subplan.
    #[error("signature mismatch in mapping '{mapping}': {detail}")]
    SignatureMismatch { mapping: String, detail: String },

    #[error("unknown operator {0}")]
    UnknownOperator(OpId),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("plan contains a cycle through {0}")]
    Cycle(OpId),

    #[error("cardinality estimation error: {0}")]
    Estimation(String),

    #[error("invalid operator: {0}")]
    InvalidOperator(String),

    #[error(transparent)]
    Core(#[from] crossplan_core::Error),
}
