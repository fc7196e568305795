//! Convenient re-exports for downstream crates.

pub use crate::config::{Configuration, PlannerConfig};
pub use crate::error::{Error, Result};
pub use crate::hash::Hash256;
pub use crate::id::{Epoch, OpId};
pub use crate::platform::{Platform, PlatformSet};
pub use crate::types::DataType;
