//! Distributed engine.
//!
//! Besides the one-to-one lowering, Spark fuses a Map feeding a Filter into a
//! single FlatMap, saving one stage.

use crossplan_core::id::Epoch;
use crossplan_core::platform::Platform;
use crossplan_planner::error::{PlanError, Result};
use crossplan_planner::mapping::{FnReplacement, Mapping, Replacement};
use crossplan_planner::matching::SubplanMatch;
use crossplan_planner::operator::{Operator, OperatorKind, Udf};
use crossplan_planner::pattern::{KindPattern, OperatorPattern, SubplanPattern};
use crossplan_planner::plan::Plan;

pub const MAP_FILTER_FUSION: &str = "spark.mapFilterFusion";

/// All Spark mappings, fusion first.
pub fn mappings() -> Result<Vec<Mapping>> {
    let mut all = vec![map_filter_fusion()?];
    all.extend(lowering_mappings());
    Ok(all)
}

pub fn lowering_mappings() -> Vec<Mapping> {
    crate::lowering(Platform::Spark)
}

/// Map -> Filter becomes one Spark FlatMap whose udf is `map∘filter`.
pub fn map_filter_fusion() -> Result<Mapping> {
    let pattern = SubplanPattern::builder()
        .op(OperatorPattern::new("map", KindPattern::map()))
        .op(OperatorPattern::new("filter", KindPattern::filter()))
        .edge(0, 0, 1, 0)
        .build()?;
    Ok(Mapping::new(
        MAP_FILTER_FUSION,
        pattern,
        FnReplacement::new(fuse_map_filter),
        Platform::Spark,
    ))
}

fn fuse_map_filter(plan: &Plan, matched: &SubplanMatch, epoch: Epoch) -> Result<Replacement> {
    let bound = |name: &str| {
        matched
            .by_name(name)
            .ok_or_else(|| PlanError::InvalidPattern(format!("match has no '{name}' operator")))
            .and_then(|id| plan.operator(id))
    };
    let map = bound("map")?;
    let filter = bound("filter")?;
    let (OperatorKind::Map { udf }, OperatorKind::Filter { predicate }) = (map.kind(), filter.kind()) else {
        return Err(PlanError::InvalidPattern(format!(
            "cannot fuse {} and {}",
            map.describe(),
            filter.describe()
        )));
    };

    let mut fused = Operator::flat_map(
        Udf::new(format!("{udf}∘{predicate}")),
        map.input(0)?.data_type().clone(),
        filter.output(0)?.data_type().clone(),
    )
    .on(Platform::Spark)
    .at(epoch);
    if let Some(label) = map.label().or(filter.label()) {
        fused = fused.with_label(label);
    }
    // Boundary inputs are the map's inputs followed by the filter's, minus
    // the fused edge; broadcast inputs keep that order.
    for slot in map.inputs().iter().skip(1).chain(filter.inputs().iter().skip(1)) {
        fused = fused.with_broadcast_input(slot.name(), slot.data_type().clone())?;
    }
    Ok(Replacement::single(fused))
}
