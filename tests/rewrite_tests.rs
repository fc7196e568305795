//! Mappings, plan transformations, and epoch-driven rewriting.

mod fixtures;

use std::thread;

use crossplan_core::config::PlannerConfig;
use crossplan_core::id::Epoch;
use crossplan_core::platform::{Platform, PlatformSet};
use crossplan_core::types::DataType;
use crossplan_planner::error::PlanError;
use crossplan_planner::mapping::{FnReplacement, Mapping, MappingRegistry, Replacement, SingleOperatorReplacement};
use crossplan_planner::matching::{find_matches, SubplanMatch};
use crossplan_planner::operator::{Operator, OperatorKind, Udf};
use crossplan_planner::pattern::{KindPattern, OperatorPattern, PatternEdge, SubplanPattern};
use crossplan_planner::plan::{Direction, Plan};
use crossplan_planner::rewrite::RewriteEngine;
use crossplan_planner::shared::SharedPlan;
use crossplan_planner::slot::{InputRef, OutputRef};
use crossplan_planner::transform::{apply, match_signature, PlanTransformation};
use crossplan_planner::verify::assert_consistent;
use fixtures::{map_filter_chain, sample_chain, wire};

fn to_platform(name: &str, kind: KindPattern, platform: Platform) -> Mapping {
    Mapping::new(
        format!("{name}->{platform}"),
        SubplanPattern::singleton(OperatorPattern::new(name, kind)),
        SingleOperatorReplacement::new(move |op, epoch| op.derive().on(platform).at(epoch)),
        platform,
    )
}

fn engine() -> RewriteEngine {
    let mut config = PlannerConfig::default();
    config.verify_rewrites = true;
    RewriteEngine::new(config)
}

#[test]
fn test_single_operator_replacement_rewires_neighbours() {
    let chain = sample_chain(0.1);
    let mut plan = chain.plan;
    let [source, sample, sink] = [chain.ids[0], chain.ids[1], chain.ids[2]];
    let mut registry = MappingRegistry::new();
    registry.register(to_platform("bernoulliSample", KindPattern::bernoulli_sample(), Platform::Spark));

    let epoch = Epoch::INITIAL.next();
    let outcome = engine().run_epoch(&mut plan, &registry, epoch).expect("epoch");

    assert_eq!(outcome.applied.len(), 1);
    let applied = &outcome.applied[0];
    assert_eq!(applied.replaced, vec![sample]);
    assert_eq!(applied.inserted.len(), 1);
    let new_id = applied.inserted[0];

    assert!(!plan.contains(sample));
    let replacement = plan.operator(new_id).expect("replacement");
    assert_eq!(replacement.platform(), Some(Platform::Spark));
    assert_eq!(replacement.epoch(), epoch);
    assert!(matches!(
        replacement.kind(),
        OperatorKind::BernoulliSample { fraction, .. } if *fraction == 0.1
    ));
    assert_eq!(replacement.input(0).expect("in").occupant(), Some(OutputRef::new(source, 0)));
    assert_eq!(
        replacement.output(0).expect("out").occupied_slots(),
        &[InputRef::new(sink, 0)]
    );
    assert_eq!(plan.upstream(sink).expect("upstream"), vec![new_id]);
    let reach = plan
        .reachable_from(&[source, sink], Direction::Both)
        .expect("reach");
    assert!(!reach.contains(&sample));
    assert!(reach.contains(&new_id));
    assert_consistent(&plan);
}

#[test]
fn test_signature_mismatch_leaves_plan_untouched() {
    let chain = map_filter_chain();
    let mut plan = chain.plan;
    let before = plan.fingerprint().expect("fingerprint");

    // A two-input join cannot stand in for a one-input map.
    let wrong_arity = Mapping::new(
        "map->join",
        SubplanPattern::singleton(OperatorPattern::new("map", KindPattern::map())),
        FnReplacement::new(|_plan: &Plan, _m: &SubplanMatch, _epoch: Epoch| {
            Ok(Replacement::single(Operator::join(
                Udf::new("k"),
                Udf::new("k"),
                DataType::Int64,
                DataType::Int64,
            )))
        }),
        Platform::Spark,
    );
    let matched = find_matches(&plan, wrong_arity.pattern(), Epoch::new(1));
    assert_eq!(matched.len(), 1);

    let err = apply(&wrong_arity, &matched[0], &mut plan, Epoch::new(1)).expect_err("arity differs");
    assert!(matches!(err, PlanError::SignatureMismatch { .. }));
    assert_eq!(plan.fingerprint().expect("fingerprint"), before);
}

#[test]
fn test_element_type_mismatch_is_reported_per_epoch() {
    let chain = map_filter_chain();
    let mut plan = chain.plan;
    let before = plan.fingerprint().expect("fingerprint");

    let wrong_type = Mapping::new(
        "map->utf8",
        SubplanPattern::singleton(OperatorPattern::new("map", KindPattern::map())),
        SingleOperatorReplacement::new(|_op, _epoch| {
            Operator::map(Udf::new("f"), DataType::Int64, DataType::Utf8).on(Platform::Java)
        }),
        Platform::Java,
    );
    let mut registry = MappingRegistry::new();
    registry.register(wrong_type);

    let outcome = engine().run_epoch(&mut plan, &registry, Epoch::new(1)).expect("epoch");
    assert!(outcome.is_noop());
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].mapping, "map->utf8");
    assert_eq!(outcome.failed[0].operators, vec![chain.ids[1]]);
    assert!(matches!(outcome.failed[0].error, PlanError::SignatureMismatch { .. }));
    assert_eq!(plan.fingerprint().expect("fingerprint"), before);
}

#[test]
fn test_overlapping_mappings_first_registered_wins() {
    let chain = map_filter_chain();
    let mut plan = chain.plan;
    let [source, map, filter, sink] = [chain.ids[0], chain.ids[1], chain.ids[2], chain.ids[3]];

    let fuse = Mapping::new(
        "fuse",
        SubplanPattern::builder()
            .op(OperatorPattern::new("map", KindPattern::map()))
            .op(OperatorPattern::new("filter", KindPattern::filter()))
            .edge(0, 0, 1, 0)
            .build()
            .expect("valid pattern"),
        FnReplacement::new(|_plan: &Plan, _m: &SubplanMatch, epoch: Epoch| {
            Ok(Replacement::single(
                Operator::flat_map(Udf::new("fused"), DataType::Int64, DataType::Int64)
                    .on(Platform::Spark)
                    .at(epoch),
            ))
        }),
        Platform::Spark,
    );
    let mut registry = MappingRegistry::new();
    registry.register(fuse);
    registry.register(to_platform("filter", KindPattern::filter(), Platform::Spark));

    let outcome = engine().run_epoch(&mut plan, &registry, Epoch::new(1)).expect("epoch");

    assert_eq!(outcome.applied.len(), 1);
    assert_eq!(outcome.applied[0].mapping, "fuse");
    assert_eq!(outcome.applied[0].replaced, vec![map, filter]);

    assert_eq!(outcome.skipped.len(), 1);
    let skipped = &outcome.skipped[0];
    assert_eq!(skipped.mapping, "filter->spark");
    assert_eq!(skipped.operators, vec![filter]);
    assert_eq!(skipped.conflicts, vec![(filter, "fuse".to_string())]);

    let fused = outcome.applied[0].inserted[0];
    assert_eq!(plan.downstream(source).expect("downstream"), vec![fused]);
    assert_eq!(plan.downstream(fused).expect("downstream"), vec![sink]);
    assert_eq!(plan.len(), 3);
    assert_consistent(&plan);
}

#[test]
fn test_multi_operator_replacement_with_internal_edge() {
    let chain = map_filter_chain();
    let mut plan = chain.plan;
    let [source, map, _, _] = [chain.ids[0], chain.ids[1], chain.ids[2], chain.ids[3]];

    // Split the map into a Java map followed by a Java sample.
    let split = Mapping::new(
        "split",
        SubplanPattern::singleton(OperatorPattern::new("map", KindPattern::map())),
        FnReplacement::new(|plan: &Plan, m: &SubplanMatch, _epoch: Epoch| {
            let original = plan.operator(m.anchor())?;
            Ok(Replacement::new(
                vec![
                    original.derive().on(Platform::Java),
                    Operator::sample(1000, DataType::Int64).on(Platform::Java),
                ],
                vec![PatternEdge {
                    from: 0,
                    output: 0,
                    to: 1,
                    input: 0,
                }],
                vec![(0, 0)],
                vec![(1, 0)],
            ))
        }),
        Platform::Java,
    );
    let matched = find_matches(&plan, split.pattern(), Epoch::new(1));
    let staged = PlanTransformation::prepare(&split, &matched[0], &plan, Epoch::new(1)).expect("prepare");
    assert_eq!(staged.replaced(), &[map]);
    let applied = staged.commit(&mut plan).expect("commit");

    let [head, tail] = [applied.inserted[0], applied.inserted[1]];
    assert_eq!(plan.upstream(head).expect("upstream"), vec![source]);
    assert_eq!(plan.downstream(head).expect("downstream"), vec![tail]);
    assert!(matches!(plan.operator(tail).expect("tail").kind(), OperatorKind::Sample { sample_size: 1000 }));
    assert_eq!(plan.operator(tail).expect("tail").epoch(), Epoch::new(1));
    assert_consistent(&plan);
}

#[test]
fn test_dangling_replacement_slot_rejected() {
    let chain = map_filter_chain();
    let mut plan = chain.plan;
    let before = plan.fingerprint().expect("fingerprint");

    // Second operator's input is neither internal nor on the boundary.
    let dangling = Mapping::new(
        "dangling",
        SubplanPattern::singleton(OperatorPattern::new("map", KindPattern::map())),
        FnReplacement::new(|_plan: &Plan, _m: &SubplanMatch, _epoch: Epoch| {
            Ok(Replacement::new(
                vec![
                    Operator::map(Udf::new("a"), DataType::Int64, DataType::Int64),
                    Operator::sink("lost", DataType::Int64),
                ],
                vec![],
                vec![(0, 0)],
                vec![(0, 0)],
            ))
        }),
        Platform::Java,
    );
    let matched = find_matches(&plan, dangling.pattern(), Epoch::new(1));
    let err = apply(&dangling, &matched[0], &mut plan, Epoch::new(1)).expect_err("dangling input");
    assert!(matches!(err, PlanError::SignatureMismatch { .. }));
    assert_eq!(plan.fingerprint().expect("fingerprint"), before);
}

#[test]
fn test_boundary_fan_out_carried_over() {
    let chain = map_filter_chain();
    let mut plan = chain.plan;
    let [_, map, filter, _] = [chain.ids[0], chain.ids[1], chain.ids[2], chain.ids[3]];
    let tap = plan.add_operator(Operator::sink("tap", DataType::Int64)).expect("tap");
    wire(&mut plan, map, tap);

    let mut registry = MappingRegistry::new();
    registry.register(to_platform("map", KindPattern::map(), Platform::Java));
    let outcome = engine().run_epoch(&mut plan, &registry, Epoch::new(1)).expect("epoch");

    let new_map = outcome.applied[0].inserted[0];
    let fed: Vec<InputRef> = plan
        .operator(new_map)
        .expect("map")
        .output(0)
        .expect("out")
        .occupied_slots()
        .to_vec();
    assert_eq!(fed, vec![InputRef::new(filter, 0), InputRef::new(tap, 0)]);
    assert_consistent(&plan);
}

#[test]
fn test_signature_of_match() {
    let chain = map_filter_chain();
    let pattern = SubplanPattern::builder()
        .op(OperatorPattern::new("map", KindPattern::map()))
        .op(OperatorPattern::new("filter", KindPattern::filter()))
        .edge(0, 0, 1, 0)
        .build()
        .expect("valid pattern");
    let matched = find_matches(&chain.plan, &pattern, Epoch::new(1));
    let sig = match_signature(&chain.plan, &pattern, &matched[0]).expect("signature");
    assert_eq!(sig.inputs, vec![(DataType::Int64, false)]);
    assert_eq!(sig.outputs, vec![DataType::Int64]);
    assert!(sig.supports_broadcast);
}

#[test]
fn test_pinned_status_transfers_to_replacement() {
    let chain = sample_chain(0.5);
    let mut plan = chain.plan;
    plan.pin(chain.ids[1]).expect("pin");

    let mut registry = MappingRegistry::new();
    registry.register(to_platform("bernoulliSample", KindPattern::bernoulli_sample(), Platform::Java));
    let outcome = engine().run_epoch(&mut plan, &registry, Epoch::new(1)).expect("epoch");

    let new_id = outcome.applied[0].inserted[0];
    assert!(plan.is_pinned(new_id));
    assert!(!plan.is_pinned(chain.ids[1]));
}

#[test]
fn test_run_stops_when_nothing_applies() {
    let chain = sample_chain(0.1);
    let mut plan = chain.plan;
    let mut registry = MappingRegistry::new();
    registry.register(to_platform("bernoulliSample", KindPattern::bernoulli_sample(), Platform::Spark));

    let summary = engine().run(&mut plan, &registry).expect("run");
    assert_eq!(summary.epochs.len(), 2);
    assert_eq!(summary.num_applied(), 1);
    assert!(summary.epochs[1].is_noop());
    assert_eq!(summary.last_epoch(), Some(Epoch::new(2)));
}

#[test]
fn test_zero_matches_is_a_noop() {
    let chain = map_filter_chain();
    let mut plan = chain.plan;
    let before = plan.fingerprint().expect("fingerprint");

    let summary = engine().run(&mut plan, &MappingRegistry::new()).expect("run");
    assert_eq!(summary.epochs.len(), 1);
    assert!(summary.epochs[0].is_noop());
    assert!(summary.epochs[0].skipped.is_empty());
    assert_eq!(plan.fingerprint().expect("fingerprint"), before);
}

#[test]
fn test_disabled_platforms_are_ignored() {
    let chain = sample_chain(0.1);
    let mut plan = chain.plan;
    let mut registry = MappingRegistry::new();
    registry.register(to_platform("bernoulliSample", KindPattern::bernoulli_sample(), Platform::Spark));

    let java_only = RewriteEngine::new(PlannerConfig::default().with_platforms(PlatformSet::only(Platform::Java)));
    let summary = java_only.run(&mut plan, &registry).expect("run");
    assert_eq!(summary.num_applied(), 0);
    assert!(plan.contains(chain.ids[1]));
}

#[test]
fn test_max_epochs_bounds_run() {
    let chain = sample_chain(0.1);
    let mut plan = chain.plan;
    let mut registry = MappingRegistry::new();
    registry.register(to_platform("bernoulliSample", KindPattern::bernoulli_sample(), Platform::Spark));

    let stopped = RewriteEngine::new(PlannerConfig::default().with_max_epochs(0));
    let summary = stopped.run(&mut plan, &registry).expect("run");
    assert!(summary.epochs.is_empty());
    assert!(plan.contains(chain.ids[1]));
}

#[test]
fn test_shared_plan_concurrent_reads() {
    let chain = map_filter_chain();
    let shared = SharedPlan::new(chain.plan);
    let expected = shared.read().topological_order().expect("order");

    thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reader = shared.clone();
                s.spawn(move || reader.read().topological_order().expect("order"))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().expect("reader panicked"), expected);
        }
    });
}

#[test]
fn test_shared_plan_epoch_under_write_lock() {
    let chain = sample_chain(0.2);
    let shared = SharedPlan::new(chain.plan);
    let mut registry = MappingRegistry::new();
    registry.register(to_platform("bernoulliSample", KindPattern::bernoulli_sample(), Platform::Spark));

    let outcome = shared
        .run_epoch(&engine(), &registry, Epoch::new(1))
        .expect("epoch");
    assert_eq!(outcome.applied.len(), 1);

    let snapshot = shared.snapshot();
    assert!(snapshot.operators().all(|(_, op)| op.is_source() || op.is_sink() || !op.is_logical()));

    let removed = shared
        .transform(|plan| plan.remove_operator(outcome.applied[0].inserted[0]))
        .expect("remove");
    assert_eq!(removed.platform(), Some(Platform::Spark));
    assert_eq!(shared.read().len(), 2);
}
