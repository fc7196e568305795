//! Shared plan builders for integration tests.
#![allow(dead_code)]

use crossplan_core::id::OpId;
use crossplan_core::types::DataType;
use crossplan_planner::operator::{Operator, Udf};
use crossplan_planner::plan::Plan;
use crossplan_planner::slot::{InputRef, OutputRef};

pub fn wire(plan: &mut Plan, from: OpId, to: OpId) {
    plan.connect(OutputRef::new(from, 0), InputRef::new(to, 0))
        .expect("Failed to connect operators");
}

/// Ids of a linear plan, in flow order.
pub struct Chain {
    pub plan: Plan,
    pub ids: Vec<OpId>,
}

/// source -> map -> filter -> sink, all Int64.
pub fn map_filter_chain() -> Chain {
    let ops = vec![
        Operator::source("hdfs://events", DataType::Int64),
        Operator::map(Udf::new("double"), DataType::Int64, DataType::Int64),
        Operator::filter(Udf::new("positive"), DataType::Int64),
        Operator::sink("hdfs://out", DataType::Int64),
    ];
    chain_of(ops)
}

/// source -> bernoulliSample(0.1) -> sink, all Int64.
pub fn sample_chain(fraction: f64) -> Chain {
    let ops = vec![
        Operator::source("file:///data", DataType::Int64),
        Operator::bernoulli_sample(fraction, DataType::Int64),
        Operator::sink("file:///sample", DataType::Int64),
    ];
    chain_of(ops)
}

/// Add `ops` in order and wire output 0 of each to input 0 of the next.
pub fn chain_of(ops: Vec<Operator>) -> Chain {
    let mut plan = Plan::new();
    let ids: Vec<OpId> = ops
        .into_iter()
        .map(|op| plan.add_operator(op).expect("Failed to add operator"))
        .collect();
    for pair in ids.windows(2) {
        wire(&mut plan, pair[0], pair[1]);
    }
    Chain { plan, ids }
}
