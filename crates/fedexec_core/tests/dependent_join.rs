mod common;

use common::{add_kv_table, config, context, finalize, kv_access, run, sorted, strategy_at};
use fedexec_core::arrays::datatype::DataType;
use fedexec_core::arrays::row::Row;
use fedexec_core::arrays::scalar::ScalarValue;
use fedexec_core::config::execution::OverflowPolicy;
use fedexec_core::dependent::criteria::DependentCriteria;
use fedexec_core::execution::operators::access::PhysicalAccess;
use fedexec_core::execution::operators::join::{
    JoinCondition,
    JoinHint,
    JoinSide,
    JoinStrategy,
    JoinType,
    ProbeStrategy,
};
use fedexec_core::expr::comparison::ComparisonOperator;
use fedexec_core::expr::{col, compare};
use fedexec_core::planner::builder::PlanBuilder;
use fedexec_core::planner::statistics::TableStatistics;
use fedexec_core::processor::QueryProcessor;
use fedexec_core::row;
use fedexec_core::source::capabilities::SourceCapabilities;
use fedexec_core::source::memory::{MemoryDataManager, MemoryTable, RequestEvent};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn r6_s3(caps: SourceCapabilities) -> MemoryDataManager {
    let dm = MemoryDataManager::new();
    dm.add_source("pm1", SourceCapabilities::default());
    dm.add_source("pm2", caps);
    add_kv_table(
        &dm,
        "pm1",
        "s",
        vec![row![2, "s2"], row![4, "s4"], row![6, "s6"]],
    );
    add_kv_table(
        &dm,
        "pm2",
        "r",
        (1..=6).map(|i| row![i, format!("r{i}")]).collect(),
    );
    dm
}

fn s_join_r(b: &mut PlanBuilder) -> usize {
    let s = b.access(kv_access("pm1", "s", 3, 3));
    let r = b.access(kv_access("pm2", "r", 6, 6));
    b.join(s, r, JoinType::Inner, vec![JoinCondition::eq(col(0), col(0))], None)
        .unwrap()
}

#[test]
fn six_by_three_with_in_size_two() {
    logutil::init_test();

    let dm = r6_s3(SourceCapabilities {
        max_in_criteria_size: Some(2),
        ..Default::default()
    });
    let ctx = context(&dm, config());

    let mut b = PlanBuilder::new();
    let join = s_join_r(&mut b);
    let plan = finalize(b.build(join).unwrap(), &ctx);

    match strategy_at(&plan, join) {
        JoinStrategy::Dependent(spec) => {
            assert_eq!(JoinSide::Left, spec.independent);
            assert_eq!(ProbeStrategy::Merge, spec.probe);
        }
        other => panic!("unexpected strategy: {other:?}"),
    }

    let rows = run(&plan, &ctx);
    assert_eq!(
        vec![
            row![2, "s2", 2, "r2"],
            row![4, "s4", 4, "r4"],
            row![6, "s6", 6, "r6"],
        ],
        sorted(rows)
    );

    let commands = dm.commands_for("r");
    assert_eq!(2, commands.len());
    assert_eq!(
        vec![DependentCriteria::InList {
            column: 0,
            values: vec![ScalarValue::Int32(2), ScalarValue::Int32(4)],
        }],
        commands[0].command.dependent
    );
    assert_eq!("SELECT k, v FROM r WHERE k IN (2, 4)", commands[0].sql);
    assert_eq!("SELECT k, v FROM r WHERE k IN (6)", commands[1].sql);
    assert_eq!(0, dm.open_requests());
}

fn two_column_access(
    source: &str,
    relation: &str,
    cardinality: usize,
    e1_ndv: usize,
    e2_ndv: usize,
) -> PhysicalAccess {
    PhysicalAccess::new(source, relation, [("e1", DataType::Utf8), ("e2", DataType::Int32)])
    .with_statistics(
        TableStatistics::unknown(2)
            .with_cardinality(cardinality)
            .with_ndv(0, e1_ndv)
            .with_ndv(1, e2_ndv),
    )
}

fn two_column_join(b: &mut PlanBuilder) -> usize {
    let s = b.access(two_column_access("pm1", "s2", 3, 2, 3));
    let r = b.access(two_column_access("pm2", "r2", 6, 3, 4));
    b.join(
        s,
        r,
        JoinType::Inner,
        vec![
            JoinCondition::eq(col(0), col(0)),
            JoinCondition::eq(col(1), col(1)),
        ],
        None,
    )
    .unwrap()
}

#[test]
fn six_by_three_two_column_keys_split_by_leading_column() {
    let dm = MemoryDataManager::new();
    dm.add_source("pm1", SourceCapabilities::default());
    dm.add_source(
        "pm2",
        SourceCapabilities {
            max_in_criteria_size: Some(2),
            ..Default::default()
        },
    );
    let columns = [("e1", DataType::Utf8), ("e2", DataType::Int32)];
    dm.add_table(
        "pm1",
        "s2",
        MemoryTable::new(columns.clone(), vec![row!["a", 0], row!["a", 3], row!["b", 1]]),
    );
    dm.add_table(
        "pm2",
        "r2",
        MemoryTable::new(
            columns,
            vec![
                row!["a", 0],
                row!["a", 1],
                row!["a", 3],
                row!["b", 1],
                row!["b", 2],
                row!["c", 3],
            ],
        ),
    );
    let ctx = context(&dm, config());

    let mut b = PlanBuilder::new();
    let join = two_column_join(&mut b);
    let plan = finalize(b.build(join).unwrap(), &ctx);
    match strategy_at(&plan, join) {
        JoinStrategy::Dependent(spec) => assert_eq!(JoinSide::Left, spec.independent),
        other => panic!("unexpected strategy: {other:?}"),
    }
    let rows = sorted(run(&plan, &ctx));

    let commands = dm.commands_for("r2");
    assert!(commands.len() >= 2);
    assert_eq!(
        "SELECT e1, e2 FROM r2 WHERE e1 IN ('a') AND e2 IN (0, 3)",
        commands[0].sql
    );
    assert_eq!(
        "SELECT e1, e2 FROM r2 WHERE e1 IN ('b') AND e2 IN (1)",
        commands[1].sql
    );

    // Leading column values never repeat across requests.
    let mut leading: Vec<ScalarValue> = Vec::new();
    for command in &commands {
        let [DependentCriteria::InListConjunction { lists }] = command.command.dependent.as_slice()
        else {
            panic!("unexpected criteria: {:?}", command.command.dependent);
        };
        assert_eq!(0, lists[0].0);
        for (_, values) in lists {
            assert!(values.len() <= 2);
        }
        for v in &lists[0].1 {
            assert!(!leading.contains(v), "e1 value {v} sent twice");
            leading.push(v.clone());
        }
    }

    let mut b = PlanBuilder::new();
    let join = two_column_join(&mut b);
    b.strategy(
        join,
        JoinStrategy::NestedLoop {
            materialize: JoinSide::Left,
        },
    )
    .unwrap();
    let reference = sorted(run(&finalize(b.build(join).unwrap(), &ctx), &ctx));

    assert_eq!(
        vec![row!["a", 0, "a", 0], row!["a", 3, "a", 3], row!["b", 1, "b", 1]],
        reference
    );
    assert_eq!(reference, rows);
    assert_eq!(0, dm.open_requests());
}

#[test]
fn bind_parameters_when_supported() {
    let dm = r6_s3(SourceCapabilities {
        max_in_criteria_size: Some(2),
        supports_bind_parameters: true,
        ..Default::default()
    });
    let ctx = context(&dm, config());

    let mut b = PlanBuilder::new();
    let join = s_join_r(&mut b);
    let plan = finalize(b.build(join).unwrap(), &ctx);
    run(&plan, &ctx);

    let commands = dm.commands_for("r");
    assert_eq!("SELECT k, v FROM r WHERE k IN (?, ?)", commands[0].sql);
    assert_eq!(
        vec![ScalarValue::Int32(2), ScalarValue::Int32(4)],
        commands[0].params
    );
}

#[test]
fn full_dependent_join_issues_one_request() {
    let dm = r6_s3(SourceCapabilities {
        max_in_criteria_size: Some(1),
        supports_full_dependent_join: true,
        ..Default::default()
    });
    let ctx = context(&dm, config());

    let mut b = PlanBuilder::new();
    let join = s_join_r(&mut b);
    let plan = finalize(b.build(join).unwrap(), &ctx);
    let rows = run(&plan, &ctx);
    assert_eq!(3, rows.len());

    let commands = dm.commands_for("r");
    assert_eq!(1, commands.len());
    assert!(commands[0].command.dependent[0].temp_relation().is_some());
}

#[test]
fn backoff_when_keys_approach_dependent_cardinality() {
    let dm = r6_s3(SourceCapabilities::default());
    let ctx = context(&dm, config());

    // 5 distinct keys against 6 rows is above the backoff ratio.
    let mut b = PlanBuilder::new();
    let s = b.access(kv_access("pm1", "s", 5, 5));
    let r = b.access(kv_access("pm2", "r", 6, 6));
    let join = b
        .join(s, r, JoinType::Inner, vec![JoinCondition::eq(col(0), col(0))], None)
        .unwrap();
    let plan = finalize(b.build(join).unwrap(), &ctx);

    assert_eq!(&JoinStrategy::Merge, strategy_at(&plan, join));
    let rows = run(&plan, &ctx);
    assert_eq!(3, rows.len());

    let commands = dm.commands_for("r");
    assert_eq!(1, commands.len());
    assert!(commands[0].command.dependent.is_empty());
    assert_eq!("SELECT k, v FROM r ORDER BY k", commands[0].sql);
}

#[test]
fn empty_independent_side_skips_dependent_requests() {
    let dm = r6_s3(SourceCapabilities::default());
    add_kv_table(&dm, "pm1", "empty", Vec::new());
    let ctx = context(&dm, config());

    let mut b = PlanBuilder::new();
    let s = b.access(kv_access("pm1", "empty", 0, 0));
    let r = b.access(kv_access("pm2", "r", 6, 6));
    let join = b
        .join(s, r, JoinType::Inner, vec![JoinCondition::eq(col(0), col(0))], None)
        .unwrap();
    b.hint(join, JoinHint::MakeDep(JoinSide::Right)).unwrap();
    let plan = finalize(b.build(join).unwrap(), &ctx);

    assert!(matches!(strategy_at(&plan, join), JoinStrategy::Dependent(_)));
    assert!(run(&plan, &ctx).is_empty());
    assert!(dm.commands_for("r").is_empty());
}

fn many_keys_plan(dm: &MemoryDataManager, keys: i32) -> (PlanBuilder, usize) {
    add_kv_table(
        dm,
        "pm1",
        "many",
        (0..keys).map(|i| row![i, format!("m{i}")]).collect(),
    );
    let mut b = PlanBuilder::new();
    let s = b.access(kv_access("pm1", "many", keys as usize, keys as usize));
    let r = b.access(kv_access("pm2", "r", 6, 6));
    let join = b
        .join(s, r, JoinType::Inner, vec![JoinCondition::eq(col(0), col(0))], None)
        .unwrap();
    b.hint(join, JoinHint::MakeDep(JoinSide::Right)).unwrap();
    (b, join)
}

#[test]
fn concurrency_bound() {
    let dm = r6_s3(SourceCapabilities {
        max_in_criteria_size: Some(1),
        ..Default::default()
    });
    dm.set_blocking(true);
    let ctx = context(
        &dm,
        fedexec_core::config::execution::ExecutionConfig {
            source_concurrency: 3,
            ..config()
        },
    );

    let (b, join) = many_keys_plan(&dm, 10);
    let plan = finalize(b.build(join).unwrap(), &ctx);
    let rows = run(&plan, &ctx);

    assert_eq!(6, rows.len());
    assert_eq!(10, dm.commands_for("r").len());
    assert_eq!(3, dm.max_open_requests());
    assert_eq!(0, dm.open_requests());
}

#[test]
fn single_fan_out_is_sequential() {
    let dm = r6_s3(SourceCapabilities {
        max_in_criteria_size: Some(1),
        ..Default::default()
    });
    dm.set_blocking(true);
    let ctx = context(
        &dm,
        fedexec_core::config::execution::ExecutionConfig {
            source_concurrency: 1,
            ..config()
        },
    );

    let (b, join) = many_keys_plan(&dm, 5);
    let plan = finalize(b.build(join).unwrap(), &ctx);
    run(&plan, &ctx);

    assert_eq!(1, dm.max_open_requests());
    let events = dm.events();
    for pair in events.chunks(2) {
        match pair {
            [RequestEvent::Opened(a), RequestEvent::Closed(b)] => assert_eq!(a, b),
            other => panic!("requests overlapped: {other:?}"),
        }
    }
}

#[test]
fn overflow_error_policy() {
    let dm = r6_s3(SourceCapabilities::default());
    let ctx = context(
        &dm,
        fedexec_core::config::execution::ExecutionConfig {
            max_dependent_values: 2,
            dependent_overflow_policy: OverflowPolicy::Error,
            ..config()
        },
    );

    let (b, join) = many_keys_plan(&dm, 4);
    let plan = finalize(b.build(join).unwrap(), &ctx);

    let mut processor = QueryProcessor::try_new(plan, ctx).unwrap();
    let err = processor.run().unwrap_err();
    assert!(err.is_processing());
    assert_eq!(Some("4"), err.get_field("values"));
    assert!(dm.commands_for("r").is_empty());
}

#[test]
fn overflow_fallback_policy() {
    let dm = r6_s3(SourceCapabilities::default());
    let ctx = context(
        &dm,
        fedexec_core::config::execution::ExecutionConfig {
            max_dependent_values: 2,
            dependent_overflow_policy: OverflowPolicy::Fallback,
            ..config()
        },
    );

    let (b, join) = many_keys_plan(&dm, 4);
    let plan = finalize(b.build(join).unwrap(), &ctx);
    let rows = run(&plan, &ctx);

    assert_eq!(
        vec![
            row![1, "m1", 1, "r1"],
            row![2, "m2", 2, "r2"],
            row![3, "m3", 3, "r3"],
        ],
        sorted(rows)
    );
    let commands = dm.commands_for("r");
    assert_eq!(1, commands.len());
    assert!(commands[0].command.dependent.is_empty());
}

#[test]
fn nested_dependent_joins_on_same_source_are_serialized() {
    let dm = MemoryDataManager::new();
    dm.add_source("pm1", SourceCapabilities::default());
    dm.add_source("pm2", SourceCapabilities::default());
    add_kv_table(&dm, "pm1", "a", vec![row![1, "a1"], row![2, "a2"]]);
    add_kv_table(&dm, "pm2", "b", (0..4).map(|i| row![i, format!("b{i}")]).collect());
    add_kv_table(&dm, "pm2", "c", (0..6).map(|i| row![i, format!("c{i}")]).collect());
    let ctx = context(&dm, config());

    let mut b = PlanBuilder::new();
    let a = b.access(kv_access("pm1", "a", 2, 2));
    let bb = b.access(kv_access("pm2", "b", 4, 4));
    let c = b.access(kv_access("pm2", "c", 6, 6));
    let inner = b
        .join(bb, c, JoinType::Inner, vec![JoinCondition::eq(col(0), col(0))], None)
        .unwrap();
    b.hint(inner, JoinHint::MakeDep(JoinSide::Right)).unwrap();
    let outer = b
        .join(a, inner, JoinType::Inner, vec![JoinCondition::eq(col(0), col(0))], None)
        .unwrap();
    b.hint(outer, JoinHint::MakeDep(JoinSide::Right)).unwrap();
    let plan = finalize(b.build(outer).unwrap(), &ctx);

    match strategy_at(&plan, outer) {
        JoinStrategy::Dependent(spec) => {
            assert_eq!("pm2", spec.source);
            assert_eq!(bb, spec.target);
            assert_eq!(Some(1), spec.source_concurrency);
        }
        other => panic!("unexpected strategy: {other:?}"),
    }
    match strategy_at(&plan, inner) {
        JoinStrategy::Dependent(spec) => assert_eq!(None, spec.source_concurrency),
        other => panic!("unexpected strategy: {other:?}"),
    }

    let rows = run(&plan, &ctx);
    assert_eq!(
        vec![
            row![1, "a1", 1, "b1", 1, "c1"],
            row![2, "a2", 2, "b2", 2, "c2"],
        ],
        sorted(rows)
    );
    assert_eq!(1, dm.max_open_requests());
}

/// Tables with columns (a Int32, b Utf8, v Int64) on the left and
/// (a Int32, b Utf8, v Int64, af Float64) on the right.
fn random_tables(rng: &mut ChaCha8Rng) -> (Vec<Row>, Vec<Row>) {
    fn key(rng: &mut ChaCha8Rng, max: i32) -> ScalarValue {
        if rng.random_bool(0.1) {
            ScalarValue::Null
        } else {
            ScalarValue::Int32(rng.random_range(0..max))
        }
    }
    const NAMES: [&str; 3] = ["x", "y", "z"];

    let left = (0..12)
        .map(|_| {
            row![
                key(rng, 8),
                NAMES[rng.random_range(0..3)],
                rng.random_range(0..10i64)
            ]
        })
        .collect();
    let right = (0..30)
        .map(|_| {
            let a = key(rng, 10);
            let af = match &a {
                ScalarValue::Int32(v) => ScalarValue::Float64(*v as f64),
                _ => ScalarValue::Null,
            };
            row![
                a,
                NAMES[rng.random_range(0..3)],
                rng.random_range(0..10i64),
                af
            ]
        })
        .collect();
    (left, right)
}

#[derive(Debug, Clone, Copy)]
enum KeyShape {
    Single,
    SingleWithResidual,
    Pair,
    MixedTypes,
}

fn run_random_join(
    left: &[Row],
    right: &[Row],
    caps: SourceCapabilities,
    shape: KeyShape,
    join_type: JoinType,
    strategy: Option<JoinStrategy>,
) -> Vec<Row> {
    let dm = MemoryDataManager::new();
    dm.add_source("pm1", SourceCapabilities::default());
    dm.add_source("pm2", caps);
    dm.add_table(
        "pm1",
        "l",
        MemoryTable::new(
            [
                ("a", DataType::Int32),
                ("b", DataType::Utf8),
                ("v", DataType::Int64),
            ],
            left.to_vec(),
        ),
    );
    dm.add_table(
        "pm2",
        "r",
        MemoryTable::new(
            [
                ("a", DataType::Int32),
                ("b", DataType::Utf8),
                ("v", DataType::Int64),
                ("af", DataType::Float64),
            ],
            right.to_vec(),
        ),
    );
    let ctx = context(&dm, config());

    let mut b = PlanBuilder::new();
    let l = b.access(PhysicalAccess::new(
        "pm1",
        "l",
        [
            ("a", DataType::Int32),
            ("b", DataType::Utf8),
            ("v", DataType::Int64),
        ],
    ));
    let r = b.access(PhysicalAccess::new(
        "pm2",
        "r",
        [
            ("a", DataType::Int32),
            ("b", DataType::Utf8),
            ("v", DataType::Int64),
            ("af", DataType::Float64),
        ],
    ));
    let (conditions, residual) = match shape {
        KeyShape::Single => (vec![JoinCondition::eq(col(0), col(0))], None),
        KeyShape::SingleWithResidual => (
            vec![JoinCondition::eq(col(0), col(0))],
            Some(compare(ComparisonOperator::LtEq, col(2), col(5))),
        ),
        KeyShape::Pair => (
            vec![
                JoinCondition::eq(col(0), col(0)),
                JoinCondition::eq(col(1), col(1)),
            ],
            None,
        ),
        KeyShape::MixedTypes => (vec![JoinCondition::eq(col(0), col(3))], None),
    };
    let join = b.join(l, r, join_type, conditions, residual).unwrap();
    match &strategy {
        Some(strategy) => b.strategy(join, strategy.clone()).unwrap(),
        None => b.hint(join, JoinHint::MakeDep(JoinSide::Right)).unwrap(),
    }
    let plan = finalize(b.build(join).unwrap(), &ctx);
    if strategy.is_none() {
        assert!(
            matches!(strategy_at(&plan, join), JoinStrategy::Dependent(_)),
            "expected dependent join"
        );
    }

    let rows = sorted(run(&plan, &ctx));
    assert_eq!(0, dm.open_requests());
    rows
}

#[test]
fn dependent_join_matches_nested_loop() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);

    for _ in 0..4 {
        let (left, right) = random_tables(&mut rng);

        for shape in [
            KeyShape::Single,
            KeyShape::SingleWithResidual,
            KeyShape::Pair,
            KeyShape::MixedTypes,
        ] {
            for join_type in [JoinType::Inner, JoinType::Left] {
                let expected = run_random_join(
                    &left,
                    &right,
                    SourceCapabilities::default(),
                    shape,
                    join_type,
                    Some(JoinStrategy::NestedLoop {
                        materialize: JoinSide::Right,
                    }),
                );

                if !matches!(shape, KeyShape::MixedTypes) {
                    let merged = run_random_join(
                        &left,
                        &right,
                        SourceCapabilities::default(),
                        shape,
                        join_type,
                        Some(JoinStrategy::Merge),
                    );
                    assert_eq!(expected, merged, "merge join {shape:?} {join_type}");
                }

                for max_in in [Some(1), Some(2), Some(3), Some(7), None] {
                    for (row_value_in, or) in [(false, true), (true, true), (false, false)] {
                        let caps = SourceCapabilities {
                            max_in_criteria_size: max_in,
                            max_dependent_predicates: Some(3),
                            supports_row_value_in: row_value_in,
                            supports_or_criteria: or,
                            ..Default::default()
                        };
                        let got = run_random_join(&left, &right, caps, shape, join_type, None);
                        assert_eq!(
                            expected, got,
                            "{shape:?} {join_type} max_in={max_in:?} row_value_in={row_value_in} or={or}"
                        );
                    }
                }
            }
        }
    }
}
