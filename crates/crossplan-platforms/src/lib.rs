//! Built-in execution platforms for the crossplan planner.
//!
//! Each platform contributes a set of `Mapping`s that lower logical operators
//! to operators bound to that platform. Nothing here runs data.

pub mod java;
pub mod spark;

use tracing::debug;

use crossplan_core::platform::{Platform, PlatformSet};
use crossplan_planner::error::Result;
use crossplan_planner::mapping::{Mapping, MappingRegistry, SingleOperatorReplacement};
use crossplan_planner::pattern::{KindPattern, OperatorPattern, SubplanPattern};

/// Pattern names and kind patterns for every logical operator kind.
fn logical_kinds() -> Vec<(&'static str, KindPattern)> {
    vec![
        ("source", KindPattern::source()),
        ("map", KindPattern::map()),
        ("flatMap", KindPattern::flat_map()),
        ("filter", KindPattern::filter()),
        ("sample", KindPattern::sample()),
        ("bernoulliSample", KindPattern::bernoulli_sample()),
        ("join", KindPattern::join()),
        ("union", KindPattern::union()),
        ("sink", KindPattern::sink()),
    ]
}

/// One-to-one mappings: each logical operator becomes the same kind, with the
/// same parameters and label, bound to `platform`.
pub(crate) fn lowering(platform: Platform) -> Vec<Mapping> {
    logical_kinds()
        .into_iter()
        .map(|(name, kind)| {
            Mapping::new(
                format!("{platform}.{name}"),
                SubplanPattern::singleton(OperatorPattern::new(name, kind)),
                SingleOperatorReplacement::new(move |op, epoch| op.derive().on(platform).at(epoch)),
                platform,
            )
        })
        .collect()
}

/// Registry with the mappings of every platform in `platforms`.
///
/// Multi-operator mappings are registered before single-operator ones so
/// that they claim their operators first within an epoch.
pub fn default_registry(platforms: PlatformSet) -> Result<MappingRegistry> {
    let mut registry = MappingRegistry::new();
    if platforms.contains(Platform::Spark) {
        registry.register(spark::map_filter_fusion()?);
    }
    for platform in platforms.iter() {
        match platform {
            Platform::Java => registry.extend(java::mappings()),
            Platform::Spark => registry.extend(spark::lowering_mappings()),
        };
    }
    debug!(platforms = %platforms, mappings = registry.len(), "built mapping registry");
    Ok(registry)
}
