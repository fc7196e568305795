//! Operator and subplan pattern matching.

mod fixtures;

use crossplan_core::id::Epoch;
use crossplan_core::platform::Platform;
use crossplan_core::types::DataType;
use crossplan_planner::error::PlanError;
use crossplan_planner::matching::{find_matches, MatchClaims};
use crossplan_planner::operator::{Operator, Udf};
use crossplan_planner::pattern::{KindPattern, OperatorPattern, SubplanPattern, Wildcard};
use crossplan_planner::slot::{InputRef, OutputRef};
use fixtures::{chain_of, map_filter_chain, wire};

fn first_pass() -> Epoch {
    Epoch::INITIAL.next()
}

fn map_then_filter() -> SubplanPattern {
    SubplanPattern::builder()
        .op(OperatorPattern::new("map", KindPattern::map()))
        .op(OperatorPattern::new("filter", KindPattern::filter()))
        .edge(0, 0, 1, 0)
        .build()
        .expect("valid pattern")
}

#[test]
fn test_two_operator_pattern_in_chain() {
    let chain = map_filter_chain();
    let matches = find_matches(&chain.plan, &map_then_filter(), first_pass());

    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!(m.anchor(), chain.ids[1]);
    assert_eq!(m.by_name("map"), Some(chain.ids[1]));
    assert_eq!(m.by_name("filter"), Some(chain.ids[2]));
    assert_eq!(m.by_name("sink"), None);
    assert_eq!(m.operators(), &[chain.ids[1], chain.ids[2]]);
}

#[test]
fn test_three_operator_chain_pattern() {
    let chain = map_filter_chain();
    let pattern = SubplanPattern::builder()
        .op(OperatorPattern::new("a", KindPattern::source()))
        .op(OperatorPattern::new("b", KindPattern::map()))
        .op(OperatorPattern::new("c", KindPattern::filter()))
        .edge(0, 0, 1, 0)
        .edge(1, 0, 2, 0)
        .build()
        .expect("valid pattern");

    let matches = find_matches(&chain.plan, &pattern, first_pass());
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].operators(), &chain.ids[..3]);
}

#[test]
fn test_no_match_when_edge_missing() {
    let mut chain = map_filter_chain();
    chain
        .plan
        .disconnect(OutputRef::new(chain.ids[1], 0), InputRef::new(chain.ids[2], 0))
        .expect("disconnect");
    assert!(find_matches(&chain.plan, &map_then_filter(), first_pass()).is_empty());
}

#[test]
fn test_internal_output_must_not_escape() {
    let mut chain = map_filter_chain();
    let tap = chain
        .plan
        .add_operator(Operator::sink("tap", DataType::Int64))
        .expect("tap");
    wire(&mut chain.plan, chain.ids[1], tap);

    // The map's output also feeds the tap, so the pair cannot be replaced as a unit.
    assert!(find_matches(&chain.plan, &map_then_filter(), first_pass()).is_empty());
}

#[test]
fn test_overlapping_matches_are_all_reported() {
    let map = |name: &str| Operator::map(Udf::new(name), DataType::Int64, DataType::Int64);
    let chain = chain_of(vec![
        Operator::source("s", DataType::Int64),
        map("f"),
        map("g"),
        map("h"),
        Operator::sink("t", DataType::Int64),
    ]);
    let pattern = SubplanPattern::builder()
        .op(OperatorPattern::new("first", KindPattern::map()))
        .op(OperatorPattern::new("second", KindPattern::map()))
        .edge(0, 0, 1, 0)
        .build()
        .expect("valid pattern");

    let matches = find_matches(&chain.plan, &pattern, first_pass());
    assert_eq!(matches.len(), 2);
    assert!(matches[0].overlaps(&matches[1]));

    let mut claims = MatchClaims::new();
    claims.try_claim("mapMap", &matches[0]).expect("first match claims");
    let taken = claims.try_claim("mapMap", &matches[1]).expect_err("second overlaps");
    assert_eq!(taken, vec![(chain.ids[2], "mapMap".to_string())]);
    assert!(!claims.is_claimed(chain.ids[3]));
    assert_eq!(claims.len(), 2);
}

#[test]
fn test_match_claims_report_conflicts() {
    let chain = map_filter_chain();
    let pair = find_matches(&chain.plan, &map_then_filter(), first_pass());
    let filter_only = find_matches(
        &chain.plan,
        &SubplanPattern::singleton(OperatorPattern::new("filter", KindPattern::filter())),
        first_pass(),
    );

    let mut claims = MatchClaims::new();
    claims.try_claim("fuse", &pair[0]).expect("first claim");
    let taken = claims.try_claim("lower", &filter_only[0]).expect_err("filter already claimed");
    assert_eq!(taken, vec![(chain.ids[2], "fuse".to_string())]);
    assert!(claims.is_claimed(chain.ids[1]));
    assert_eq!(claims.owner(chain.ids[2]), Some("fuse"));
    assert_eq!(claims.owner(chain.ids[0]), None);
    assert_eq!(claims.len(), 2);
}

#[test]
fn test_exact_pattern_requires_occupied_boundary() {
    let mut plan = crossplan_planner::plan::Plan::new();
    let map = plan
        .add_operator(Operator::map(Udf::new("f"), DataType::Int64, DataType::Int64))
        .expect("map");
    let sink = plan.add_operator(Operator::sink("t", DataType::Int64)).expect("sink");
    wire(&mut plan, map, sink);

    let loose = SubplanPattern::singleton(OperatorPattern::new("map", KindPattern::map()));
    let exact = SubplanPattern::singleton(OperatorPattern::new("map", KindPattern::map()).exact());

    assert_eq!(find_matches(&plan, &loose, first_pass()).len(), 1);
    assert!(find_matches(&plan, &exact, first_pass()).is_empty());

    let source = plan.add_operator(Operator::source("s", DataType::Int64)).expect("source");
    wire(&mut plan, source, map);
    assert_eq!(find_matches(&plan, &exact, first_pass()).len(), 1);

    // Fan-out on a boundary output breaks exactness.
    let tap = plan.add_operator(Operator::sink("tap", DataType::Int64)).expect("tap");
    wire(&mut plan, map, tap);
    assert!(find_matches(&plan, &exact, first_pass()).is_empty());
    assert_eq!(find_matches(&plan, &loose, first_pass()).len(), 1);
}

#[test]
fn test_operators_from_current_epoch_are_ineligible() {
    let mut plan = crossplan_planner::plan::Plan::new();
    let fresh = Operator::bernoulli_sample(0.1, DataType::Int64).at(Epoch::new(1));
    plan.add_operator(fresh).expect("sample");
    let pattern = SubplanPattern::singleton(OperatorPattern::new("bernoulliSample", KindPattern::bernoulli_sample()));

    assert!(find_matches(&plan, &pattern, Epoch::new(1)).is_empty());
    assert_eq!(find_matches(&plan, &pattern, Epoch::new(2)).len(), 1);
}

#[test]
fn test_wildcard_and_exact_parameters() {
    let mut plan = crossplan_planner::plan::Plan::new();
    let zero = plan
        .add_operator(Operator::bernoulli_sample(0.0, DataType::Int64))
        .expect("zero");
    let tenth = plan
        .add_operator(Operator::bernoulli_sample(0.1, DataType::Int64))
        .expect("tenth");

    let any = SubplanPattern::singleton(OperatorPattern::new("s", KindPattern::bernoulli_sample()));
    let only_zero = SubplanPattern::singleton(OperatorPattern::new(
        "s",
        KindPattern::BernoulliSample {
            fraction: Wildcard::Exactly(0.0),
            seed: Wildcard::Any,
        },
    ));

    let all: Vec<_> = find_matches(&plan, &any, first_pass()).iter().map(|m| m.anchor()).collect();
    assert_eq!(all, vec![zero, tenth]);

    // A real 0.0 fraction is a value, not a wildcard.
    let zeros: Vec<_> = find_matches(&plan, &only_zero, first_pass())
        .iter()
        .map(|m| m.anchor())
        .collect();
    assert_eq!(zeros, vec![zero]);
}

#[test]
fn test_udf_parameter_pattern() {
    let chain = map_filter_chain();
    let double = SubplanPattern::singleton(OperatorPattern::new(
        "m",
        KindPattern::Map {
            udf: Udf::new("double").into(),
        },
    ));
    let triple = SubplanPattern::singleton(OperatorPattern::new(
        "m",
        KindPattern::Map {
            udf: Udf::new("triple").into(),
        },
    ));
    assert_eq!(find_matches(&chain.plan, &double, first_pass()).len(), 1);
    assert!(find_matches(&chain.plan, &triple, first_pass()).is_empty());
}

#[test]
fn test_platform_constraint() {
    let mut plan = crossplan_planner::plan::Plan::new();
    plan.add_operator(Operator::sample(10, DataType::Utf8)).expect("logical");
    let spark = plan
        .add_operator(Operator::sample(10, DataType::Utf8).on(Platform::Spark))
        .expect("spark");

    let logical = SubplanPattern::singleton(OperatorPattern::new("s", KindPattern::sample()));
    let on_spark = SubplanPattern::singleton(OperatorPattern::new("s", KindPattern::sample()).on(Platform::Spark));

    assert_eq!(find_matches(&plan, &logical, first_pass()).len(), 1);
    let bound: Vec<_> = find_matches(&plan, &on_spark, first_pass()).iter().map(|m| m.anchor()).collect();
    assert_eq!(bound, vec![spark]);
}

#[test]
fn test_join_pattern_binds_both_inputs() {
    let mut plan = crossplan_planner::plan::Plan::new();
    let left = plan.add_operator(Operator::source("l", DataType::Int64)).expect("left");
    let right = plan.add_operator(Operator::source("r", DataType::Utf8)).expect("right");
    let join = plan
        .add_operator(Operator::join(Udf::new("id"), Udf::new("id"), DataType::Int64, DataType::Utf8))
        .expect("join");
    plan.connect(OutputRef::new(left, 0), InputRef::new(join, 0)).expect("left edge");
    plan.connect(OutputRef::new(right, 0), InputRef::new(join, 1)).expect("right edge");

    let pattern = SubplanPattern::builder()
        .op(OperatorPattern::new("join", KindPattern::join()))
        .op(OperatorPattern::new("left", KindPattern::source()))
        .op(OperatorPattern::new("right", KindPattern::source()))
        .edge(1, 0, 0, 0)
        .edge(2, 0, 0, 1)
        .build()
        .expect("valid pattern");

    let matches = find_matches(&plan, &pattern, first_pass());
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].by_name("left"), Some(left));
    assert_eq!(matches[0].by_name("right"), Some(right));
}

#[test]
fn test_invalid_patterns_rejected() {
    let dup = SubplanPattern::builder()
        .op(OperatorPattern::new("x", KindPattern::map()))
        .op(OperatorPattern::new("x", KindPattern::map()))
        .edge(0, 0, 1, 0)
        .build();
    assert!(matches!(dup, Err(PlanError::InvalidPattern(_))));

    let disconnected = SubplanPattern::builder()
        .op(OperatorPattern::new("a", KindPattern::map()))
        .op(OperatorPattern::new("b", KindPattern::map()))
        .build();
    assert!(matches!(disconnected, Err(PlanError::InvalidPattern(_))));

    let double_fed = SubplanPattern::builder()
        .op(OperatorPattern::new("a", KindPattern::source()))
        .op(OperatorPattern::new("b", KindPattern::source()))
        .op(OperatorPattern::new("c", KindPattern::sink()))
        .edge(0, 0, 2, 0)
        .edge(1, 0, 2, 0)
        .build();
    assert!(matches!(double_fed, Err(PlanError::InvalidPattern(_))));

    let dangling = SubplanPattern::builder()
        .op(OperatorPattern::new("a", KindPattern::map()))
        .edge(0, 0, 3, 0)
        .build();
    assert!(matches!(dangling, Err(PlanError::InvalidPattern(_))));
}

#[test]
fn test_decoded_patterns_are_validated() {
    let valid = serde_json::to_value(map_then_filter()).expect("encode");
    let decoded: SubplanPattern = serde_json::from_value(valid.clone()).expect("valid pattern decodes");
    assert_eq!(decoded, map_then_filter());

    let mut empty = valid.clone();
    empty["operators"] = serde_json::json!([]);
    empty["edges"] = serde_json::json!([]);
    assert!(serde_json::from_value::<SubplanPattern>(empty).is_err());

    let mut dangling = valid;
    dangling["edges"] = serde_json::json!([{ "from": 0, "output": 0, "to": 7, "input": 0 }]);
    let err = serde_json::from_value::<SubplanPattern>(dangling).expect_err("dangling edge rejected");
    assert!(err.to_string().contains("missing operator pattern"));
}
