use std::collections::BTreeMap;

use criterion::{criterion_group, criterion_main, Criterion};
use crossplan_core::config::{Configuration, PlannerConfig};
use crossplan_core::id::Epoch;
use crossplan_core::platform::{Platform, PlatformSet};
use crossplan_core::types::DataType;
use crossplan_planner::cardinality::{estimate_plan, CardinalityEstimate};
use crossplan_planner::matching::find_matches;
use crossplan_planner::operator::{Operator, Udf};
use crossplan_planner::plan::Plan;
use crossplan_planner::rewrite::RewriteEngine;
use crossplan_planner::slot::{InputRef, OutputRef};
use crossplan_platforms::{default_registry, spark};

/// source -> (map -> filter -> bernoulliSample) x stages -> sink
fn make_pipeline(stages: usize) -> Plan {
    let mut plan = Plan::new();
    let mut prev = plan
        .add_operator(Operator::source("hdfs://bench", DataType::Int64))
        .unwrap();
    for i in 0..stages {
        let ops = [
            Operator::map(Udf::new(format!("f{i}")), DataType::Int64, DataType::Int64),
            Operator::filter(Udf::new(format!("p{i}")), DataType::Int64),
            Operator::bernoulli_sample(0.9, DataType::Int64),
        ];
        for op in ops {
            let id = plan.add_operator(op).unwrap();
            plan.connect(OutputRef::new(prev, 0), InputRef::new(id, 0)).unwrap();
            prev = id;
        }
    }
    let sink = plan
        .add_operator(Operator::sink("hdfs://bench-out", DataType::Int64))
        .unwrap();
    plan.connect(OutputRef::new(prev, 0), InputRef::new(sink, 0)).unwrap();
    plan
}

fn bench_find_matches(c: &mut Criterion) {
    let plan = make_pipeline(200);
    let fusion = spark::map_filter_fusion().unwrap();
    c.bench_function("find_matches_map_filter", |b| {
        b.iter(|| {
            let _ = find_matches(&plan, fusion.pattern(), Epoch::INITIAL.next());
        })
    });
}

fn bench_spark_lowering(c: &mut Criterion) {
    let plan = make_pipeline(100);
    let registry = default_registry(PlatformSet::only(Platform::Spark)).unwrap();
    let mut config = PlannerConfig::default().with_platforms(PlatformSet::only(Platform::Spark));
    config.verify_rewrites = false;
    let engine = RewriteEngine::new(config);
    c.bench_function("spark_lowering", |b| {
        b.iter(|| {
            let mut plan = plan.clone();
            let _ = engine.run(&mut plan, &registry).unwrap();
        })
    });
}

fn bench_estimate_plan(c: &mut Criterion) {
    let plan = make_pipeline(200);
    let sources: BTreeMap<_, _> = plan
        .sources()
        .into_iter()
        .map(|id| (id, CardinalityEstimate::exactly(1_000_000)))
        .collect();
    let options = Configuration::new();
    c.bench_function("estimate_plan", |b| {
        b.iter(|| {
            let _ = estimate_plan(&plan, &sources, &options).unwrap();
        })
    });
}

criterion_group!(benches, bench_find_matches, bench_spark_lowering, bench_estimate_plan);
criterion_main!(benches);
