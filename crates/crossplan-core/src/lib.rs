#![forbid(unsafe_code)]
//! crossplan-core: shared vocabulary for the crossplan planner.
//!
//! Holds the strongly-typed ids, element-type descriptors, the platform
//! capability set, the planner configuration, and stable hashing. There is no
//! graph logic here; `crossplan-planner` owns the operator graph.

pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod platform;
pub mod prelude;
pub mod types;

pub use error::{Error, Result};

/// Crate version, stamped into diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
