mod common;

use common::{add_kv_table, config, context, finalize, kv_access, run, sorted, strategy_at};
use fedexec_core::arrays::row::Row;
use fedexec_core::arrays::scalar::ScalarValue;
use fedexec_core::execution::operators::join::{
    JoinCondition,
    JoinHint,
    JoinSide,
    JoinStrategy,
    JoinType,
};
use fedexec_core::expr::col;
use fedexec_core::planner::builder::PlanBuilder;
use fedexec_core::row;
use fedexec_core::source::capabilities::{NullOrder, SourceCapabilities};
use fedexec_core::source::memory::MemoryDataManager;

const NULL: ScalarValue = ScalarValue::Null;

fn manager(null_order: NullOrder) -> MemoryDataManager {
    let dm = MemoryDataManager::new();
    let caps = SourceCapabilities {
        null_order,
        ..Default::default()
    };
    dm.add_source("pm1", caps.clone());
    dm.add_source("pm2", caps);
    add_kv_table(
        &dm,
        "pm1",
        "l",
        vec![row![1, "a"], row![2, "b"], row![NULL, "n"], row![4, "d"]],
    );
    add_kv_table(
        &dm,
        "pm2",
        "r",
        vec![
            row![2, "x"],
            row![3, "y"],
            row![4, "z"],
            row![4, "w"],
            row![NULL, "m"],
        ],
    );
    dm
}

fn expected(join_type: JoinType) -> Vec<Row> {
    let mut rows = vec![row![2, "b", 2, "x"], row![4, "d", 4, "z"], row![4, "d", 4, "w"]];
    if join_type.preserves_left() {
        rows.push(row![1, "a", NULL, NULL]);
        rows.push(row![NULL, "n", NULL, NULL]);
    }
    if join_type.preserves_right() {
        rows.push(row![NULL, NULL, 3, "y"]);
        rows.push(row![NULL, NULL, NULL, "m"]);
    }
    sorted(rows)
}

fn run_join(dm: &MemoryDataManager, join_type: JoinType, plan_join: impl Fn(&mut PlanBuilder, usize)) -> (Vec<Row>, JoinStrategy) {
    let ctx = context(dm, config());
    let mut b = PlanBuilder::new();
    let l = b.access(kv_access("pm1", "l", 4, 3));
    let r = b.access(kv_access("pm2", "r", 5, 3));
    let join = b
        .join(l, r, join_type, vec![JoinCondition::eq(col(0), col(0))], None)
        .unwrap();
    plan_join(&mut b, join);
    let plan = finalize(b.build(join).unwrap(), &ctx);
    let strategy = strategy_at(&plan, join).clone();
    (sorted(run(&plan, &ctx)), strategy)
}

#[test]
fn merge_join_pads_unmatched_rows() {
    for null_order in [NullOrder::Low, NullOrder::High] {
        let dm = manager(null_order);
        for join_type in [JoinType::Inner, JoinType::Left, JoinType::Right, JoinType::Full] {
            let (rows, strategy) = run_join(&dm, join_type, |b, join| {
                b.strategy(join, JoinStrategy::Merge).unwrap()
            });
            assert_eq!(JoinStrategy::Merge, strategy);
            assert_eq!(expected(join_type), rows, "{join_type} nulls {null_order:?}");
        }
    }
}

#[test]
fn merge_join_with_sort_nodes() {
    let dm = MemoryDataManager::new();
    let caps = SourceCapabilities {
        supports_order_by: false,
        ..Default::default()
    };
    dm.add_source("pm1", caps.clone());
    dm.add_source("pm2", caps);
    add_kv_table(
        &dm,
        "pm1",
        "l",
        vec![row![4, "d"], row![NULL, "n"], row![2, "b"], row![1, "a"]],
    );
    add_kv_table(
        &dm,
        "pm2",
        "r",
        vec![
            row![NULL, "m"],
            row![4, "w"],
            row![3, "y"],
            row![2, "x"],
            row![4, "z"],
        ],
    );

    let (rows, _) = run_join(&dm, JoinType::Full, |b, join| {
        b.strategy(join, JoinStrategy::Merge).unwrap()
    });
    assert_eq!(expected(JoinType::Full), rows);
    for cmd in dm.commands() {
        assert!(cmd.command.order_by.is_empty());
    }
}

#[test]
fn nested_loop_pads_unmatched_rows() {
    let dm = manager(NullOrder::Low);
    for materialize in [JoinSide::Left, JoinSide::Right] {
        for join_type in [JoinType::Inner, JoinType::Left, JoinType::Right, JoinType::Full] {
            let (rows, _) = run_join(&dm, join_type, |b, join| {
                b.strategy(join, JoinStrategy::NestedLoop { materialize })
                    .unwrap()
            });
            assert_eq!(expected(join_type), rows, "{join_type} materialize {materialize}");
        }
    }
}

#[test]
fn dependent_join_pads_independent_side() {
    let dm = manager(NullOrder::Low);

    let (rows, strategy) = run_join(&dm, JoinType::Left, |b, join| {
        b.hint(join, JoinHint::MakeDep(JoinSide::Right)).unwrap()
    });
    assert!(matches!(strategy, JoinStrategy::Dependent(ref spec) if spec.independent == JoinSide::Left));
    assert_eq!(expected(JoinType::Left), rows);

    let (rows, strategy) = run_join(&dm, JoinType::Right, |b, join| {
        b.hint(join, JoinHint::MakeDep(JoinSide::Left)).unwrap()
    });
    assert!(matches!(strategy, JoinStrategy::Dependent(ref spec) if spec.independent == JoinSide::Right));
    assert_eq!(expected(JoinType::Right), rows);
}

#[test]
fn preserved_side_is_never_dependent() {
    let dm = manager(NullOrder::Low);
    let (rows, strategy) = run_join(&dm, JoinType::Full, |b, join| {
        b.hint(join, JoinHint::MakeDep(JoinSide::Right)).unwrap()
    });
    assert_eq!(JoinStrategy::Merge, strategy);
    assert_eq!(expected(JoinType::Full), rows);
}
