//! Planner configuration and the opaque options bag handed to estimators.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::platform::PlatformSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Upper bound on rewrite epochs per optimization run.
    pub max_epochs: u32,

    /// Re-check slot consistency of the whole plan after every epoch.
    pub verify_rewrites: bool,

    /// Platforms whose mappings may be applied.
    pub platforms: PlatformSet,

    /// Passed through untouched to cardinality estimator construction.
    pub options: Configuration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_epochs: 16,
            verify_rewrites: cfg!(debug_assertions),
            platforms: PlatformSet::all(),
            options: Configuration::default(),
        }
    }
}

impl PlannerConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `CROSSPLAN_MAX_EPOCHS`: epoch bound per run
    /// - `CROSSPLAN_VERIFY_REWRITES`: `true`/`false`
    /// - `CROSSPLAN_PLATFORMS`: comma-separated platform names, e.g. `java,spark`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("CROSSPLAN_MAX_EPOCHS") {
            if let Ok(v) = s.parse::<u32>() {
                cfg.max_epochs = v;
            }
        }

        if let Ok(s) = std::env::var("CROSSPLAN_VERIFY_REWRITES") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.verify_rewrites = v;
            }
        }

        if let Ok(s) = std::env::var("CROSSPLAN_PLATFORMS") {
            if let Ok(v) = PlatformSet::parse_list(&s) {
                cfg.platforms = v;
            }
        }

        cfg
    }

    pub fn with_platforms(mut self, platforms: PlatformSet) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn with_max_epochs(mut self, max_epochs: u32) -> Self {
        self.max_epochs = max_epochs;
        self
    }
}

/// Opaque key/value options. Keys are platform- or operator-specific and are
/// never interpreted by the planner itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<String, Value>);

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
