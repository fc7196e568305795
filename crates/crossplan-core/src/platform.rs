//! Execution platforms and platform capability sets.
//!
//! The engines behind a platform live outside the planner; here a platform is
//! only a key for mapping registration and an enablement bit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Local, single-process engine.
    Java,
    /// Distributed engine.
    Spark,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Java, Platform::Spark];

    pub const fn name(self) -> &'static str {
        match self {
            Platform::Java => "java",
            Platform::Spark => "spark",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Platform::Java => 1 << 0,
            Platform::Spark => 1 << 1,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "java" => Ok(Platform::Java),
            "spark" => Ok(Platform::Spark),
            other => Err(Error::Config(format!("unknown platform '{other}'"))),
        }
    }
}

/// A set of enabled platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformSet(u8);

impl PlatformSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(Platform::Java.bit() | Platform::Spark.bit())
    }

    pub const fn only(p: Platform) -> Self {
        Self(p.bit())
    }

    pub const fn with(self, p: Platform) -> Self {
        Self(self.0 | p.bit())
    }

    pub const fn without(self, p: Platform) -> Self {
        Self(self.0 & !p.bit())
    }

    pub const fn contains(self, p: Platform) -> bool {
        self.0 & p.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Platform> {
        Platform::ALL.into_iter().filter(move |p| self.contains(*p))
    }

    /// Parse a comma-separated list such as `"java,spark"`.
    pub fn parse_list(s: &str) -> Result<Self, Error> {
        let mut set = Self::empty();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            set = set.with(part.parse()?);
        }
        Ok(set)
    }
}

impl FromIterator<Platform> for PlatformSet {
    fn from_iter<I: IntoIterator<Item = Platform>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl fmt::Display for PlatformSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Platform::name).collect();
        write!(f, "{{{}}}", names.join(","))
    }
}
