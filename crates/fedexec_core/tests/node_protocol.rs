mod common;

use common::{add_kv_table, config, context, finalize, kv_access, run};
use fedexec_core::arrays::datatype::DataType;
use fedexec_core::arrays::scalar::ScalarValue;
use fedexec_core::buffer::BufferManager;
use fedexec_core::config::execution::ExecutionConfig;
use fedexec_core::execution::node::NodeLifecycle;
use fedexec_core::execution::operators::grouping::{Aggregate, AggregateFunction};
use fedexec_core::execution::operators::join::{JoinCondition, JoinType};
use fedexec_core::execution::plan::PhysicalPlan;
use fedexec_core::execution::poll::PollPull;
use fedexec_core::explain::ExplainValue;
use fedexec_core::expr::{CorrelatedBindings, Expression, col, eq};
use fedexec_core::planner::builder::PlanBuilder;
use fedexec_core::processor::{ProcessorState, QueryProcessor};
use fedexec_core::row;
use fedexec_core::source::capabilities::SourceCapabilities;
use fedexec_core::source::memory::{FailureMode, MemoryDataManager};

fn manager() -> MemoryDataManager {
    let dm = MemoryDataManager::new();
    dm.add_source("pm1", SourceCapabilities::default());
    dm.add_source("pm2", SourceCapabilities::default());
    add_kv_table(
        &dm,
        "pm1",
        "l",
        (0..10).map(|i| row![i % 4, format!("l{i}")]).collect(),
    );
    add_kv_table(
        &dm,
        "pm2",
        "r",
        (0..7).map(|i| row![i % 3, format!("r{i}")]).collect(),
    );
    add_kv_table(&dm, "pm2", "empty", Vec::new());
    dm
}

fn join_plan(b: &mut PlanBuilder) -> usize {
    let l = b.access(kv_access("pm1", "l", 10, 4));
    let r = b.access(kv_access("pm2", "r", 7, 3));
    b.join(l, r, JoinType::Left, vec![JoinCondition::eq(col(0), col(0))], None)
        .unwrap()
}

#[test]
fn reset_and_clone_are_deterministic() {
    let dm = manager();
    let ctx = context(&dm, config());
    let mut b = PlanBuilder::new();
    let join = join_plan(&mut b);
    let plan = finalize(b.build(join).unwrap(), &ctx);

    let mut processor = QueryProcessor::try_new(plan.clone(), ctx.clone()).unwrap();
    let first = processor.run().unwrap().to_vec();
    assert_eq!(ProcessorState::Complete, processor.state());

    processor.reset();
    assert_eq!(ProcessorState::Running, processor.state());
    let second = processor.run().unwrap().to_vec();
    assert_eq!(first, second);

    let cloned = run(&plan, &ctx);
    assert_eq!(first, cloned);
    assert_eq!(0, dm.open_requests());
}

#[test]
fn open_twice_is_invariant_violation() {
    let dm = manager();
    let ctx = context(&dm, config());
    let mut b = PlanBuilder::new();
    let access = b.access(kv_access("pm1", "l", 10, 4));
    let plan = finalize(b.build(access).unwrap(), &ctx);

    let mut node = plan.instantiate().unwrap();
    node.open(&ctx).unwrap();
    let err = node.open(&ctx).unwrap_err();
    assert!(err.is_invariant());

    node.reset();
    assert_eq!(NodeLifecycle::Unopened, node.lifecycle());
    node.open(&ctx).unwrap();
}

#[test]
fn output_types_from_plan() {
    let dm = manager();
    let ctx = context(&dm, config());
    let mut b = PlanBuilder::new();
    let join = join_plan(&mut b);
    let plan = finalize(b.build(join).unwrap(), &ctx);

    let processor = QueryProcessor::try_new(plan, ctx.clone()).unwrap();
    assert_eq!(
        &[DataType::Int32, DataType::Utf8, DataType::Int32, DataType::Utf8],
        processor.output_types().unwrap()
    );

    let missing = PhysicalPlan {
        nodes: Vec::new(),
        root: 0,
    };
    let err = QueryProcessor::try_new(missing.into(), ctx).unwrap_err();
    assert!(err.is_invariant());
}

#[test]
fn terminal_batch_then_empty_batches() {
    let dm = manager();
    let ctx = context(&dm, config());
    let mut b = PlanBuilder::new();
    let access = b.access(kv_access("pm1", "l", 10, 4));
    let plan = finalize(b.build(access).unwrap(), &ctx);

    let mut node = plan.instantiate().unwrap();
    node.open(&ctx).unwrap();

    let mut expected_begin = 1;
    let mut total = 0;
    loop {
        match node.next_batch(&ctx).unwrap() {
            PollPull::Ready(batch) => {
                assert_eq!(expected_begin, batch.begin_row);
                assert_eq!(4, batch.num_rows());
                expected_begin = batch.end_row();
                total += batch.num_rows();
            }
            PollPull::Done(batch) => {
                assert_eq!(expected_begin, batch.begin_row);
                assert!(batch.is_terminal());
                total += batch.num_rows();
                break;
            }
            PollPull::Blocked => panic!("unexpected blocked"),
        }
    }
    assert_eq!(10, total);

    match node.next_batch(&ctx).unwrap() {
        PollPull::Done(batch) => assert!(batch.is_empty()),
        other => panic!("expected terminal batch, got {other:?}"),
    }

    node.close();
    node.close();
    assert_eq!(NodeLifecycle::Closed, node.lifecycle());
    assert!(node.next_batch(&ctx).unwrap_err().is_invariant());
}

#[test]
fn blocked_sources_resume() {
    let dm = manager();
    let ctx = context(&dm, config());
    let mut b = PlanBuilder::new();
    let join = join_plan(&mut b);
    let plan = finalize(b.build(join).unwrap(), &ctx);
    let expected = run(&plan, &ctx);

    dm.set_blocking(true);
    dm.set_rows_per_poll(3);
    let mut processor = QueryProcessor::try_new(plan, ctx).unwrap();
    let mut blocked = 0;
    loop {
        match processor.poll_step().unwrap() {
            PollPull::Blocked => blocked += 1,
            PollPull::Ready(_) => (),
            PollPull::Done(_) => break,
        }
    }
    assert!(blocked > 0);
    assert_eq!(expected, processor.into_rows());
}

#[test]
fn component_failure_keeps_delivered_rows() {
    let dm = manager();
    dm.set_rows_per_poll(2);
    dm.set_failure("pm1", Some(FailureMode::AfterRows(3)));
    let ctx = context(
        &dm,
        ExecutionConfig {
            batch_size: 2,
            ..config()
        },
    );
    let mut b = PlanBuilder::new();
    let access = b.access(kv_access("pm1", "l", 10, 4));
    let plan = finalize(b.build(access).unwrap(), &ctx);

    let mut processor = QueryProcessor::try_new(plan, ctx).unwrap();
    let err = processor.run().unwrap_err();
    assert!(err.is_component());
    assert_eq!(ProcessorState::Failed, processor.state());
    assert_eq!(2, processor.rows().len());
    assert_eq!(0, dm.open_requests());
}

#[test]
fn shared_buffer_manager_row_limit() {
    let dm = manager();
    let buffers = BufferManager::new(12);
    let ctx = context(&dm, config()).with_buffer_manager(buffers.clone());
    let mut b = PlanBuilder::new();
    let access = b.access(kv_access("pm1", "l", 10, 4));
    let plan = finalize(b.build(access).unwrap(), &ctx);

    let mut first = QueryProcessor::try_new(plan.clone(), ctx.clone()).unwrap();
    assert_eq!(10, first.run().unwrap().len());
    assert_eq!(10, buffers.reserved_rows());

    let mut second = QueryProcessor::try_new(plan, ctx).unwrap();
    assert!(second.run().unwrap_err().is_component());
    assert_eq!(ProcessorState::Failed, second.state());

    drop(first);
    drop(second);
    assert_eq!(0, buffers.reserved_rows());
    assert_eq!(0, dm.open_requests());
}

#[test]
fn register_failure_is_component_error() {
    let dm = manager();
    dm.set_failure("pm2", Some(FailureMode::OnRegister));
    let ctx = context(&dm, config());
    let mut b = PlanBuilder::new();
    let join = join_plan(&mut b);
    let plan = finalize(b.build(join).unwrap(), &ctx);

    let mut processor = QueryProcessor::try_new(plan, ctx).unwrap();
    assert!(processor.run().unwrap_err().is_component());
    assert!(processor.rows().is_empty());
}

#[test]
fn grouping_on_empty_input() {
    let dm = manager();
    let ctx = context(&dm, config());

    let aggs = vec![
        Aggregate::count_star(),
        Aggregate::new(AggregateFunction::Sum, col(0)),
    ];
    let grouped = |keys: Vec<Expression>| {
        let mut b = PlanBuilder::new();
        let access = b.access(kv_access("pm2", "empty", 0, 0));
        let grouping = b.grouping(access, keys, aggs.clone()).unwrap();
        finalize(b.build(grouping).unwrap(), &ctx)
    };

    let rows = run(&grouped(Vec::new()), &ctx);
    assert_eq!(vec![row![0i64, ScalarValue::Null]], rows);

    let rows = run(&grouped(vec![col(1)]), &ctx);
    assert!(rows.is_empty());
}

#[test]
fn grouping_and_dup_remove() {
    let dm = manager();
    let ctx = context(&dm, config());

    let mut b = PlanBuilder::new();
    let access = b.access(kv_access("pm1", "l", 10, 4));
    let grouped = b
        .grouping(
            access,
            vec![col(0)],
            vec![
                Aggregate::count_star(),
                Aggregate::new(AggregateFunction::Max, col(1)),
            ],
        )
        .unwrap();
    let plan = finalize(b.build(grouped).unwrap(), &ctx);
    let mut rows = run(&plan, &ctx);
    rows.sort();
    assert_eq!(
        vec![
            row![0, 3i64, "l8"],
            row![1, 3i64, "l9"],
            row![2, 2i64, "l6"],
            row![3, 2i64, "l7"],
        ],
        rows
    );

    let mut b = PlanBuilder::new();
    let access = b.access(kv_access("pm1", "l", 10, 4));
    let keys = b.project(access, vec![col(0)]).unwrap();
    let distinct = b.dup_remove(keys).unwrap();
    let plan = finalize(b.build(distinct).unwrap(), &ctx);
    assert_eq!(
        vec![row![0], row![1], row![2], row![3]],
        run(&plan, &ctx)
    );
}

#[test]
fn union_all_and_limit() {
    let dm = manager();
    let ctx = context(&dm, config());

    let mut b = PlanBuilder::new();
    let l = b.access(kv_access("pm1", "l", 10, 4));
    let r = b.access(kv_access("pm2", "r", 7, 3));
    let union = b.union_all(vec![l, r]).unwrap();
    let limit = b.limit(union, 8, Some(4)).unwrap();
    let plan = finalize(b.build(limit).unwrap(), &ctx);

    assert_eq!(
        vec![
            row![0, "l8"],
            row![1, "l9"],
            row![0, "r0"],
            row![1, "r1"],
        ],
        run(&plan, &ctx)
    );
}

#[test]
fn correlated_rebind() {
    let dm = manager();
    let ctx = context(&dm, config());

    let mut b = PlanBuilder::new();
    let access = b.access(kv_access("pm2", "r", 7, 3));
    let select = b
        .select(
            access,
            eq(
                col(0),
                Expression::Correlated {
                    name: "outer_k".to_string(),
                    datatype: DataType::Int32,
                },
            ),
        )
        .unwrap();
    let plan = finalize(b.build(select).unwrap(), &ctx);

    let ctx = ctx.with_correlated(CorrelatedBindings::new().with_binding("outer_k", 1));
    let mut processor = QueryProcessor::try_new(plan, ctx).unwrap();
    assert_eq!(
        vec![row![1, "r1"], row![1, "r4"]],
        processor.run().unwrap().to_vec()
    );

    processor.rebind(CorrelatedBindings::new().with_binding("outer_k", 2));
    assert_eq!(
        vec![row![2, "r2"], row![2, "r5"]],
        processor.run().unwrap().to_vec()
    );
}

#[test]
fn explain_shows_strategy() {
    let dm = manager();
    let ctx = context(&dm, config());
    let mut b = PlanBuilder::new();
    let join = join_plan(&mut b);
    let plan = finalize(b.build(join).unwrap(), &ctx);

    let explain = plan.explain().unwrap();
    let join = explain.find("Join").unwrap();
    assert_eq!(
        Some(&ExplainValue::Value("merge".to_string())),
        join.get("strategy")
    );
    assert_eq!(
        Some(&ExplainValue::Value("LEFT".to_string())),
        join.get("join_type")
    );

    let json = serde_json::to_string(&explain).unwrap();
    assert!(json.contains("\"strategy\":\"merge\""));
}

#[test]
fn settings_by_name() {
    let mut conf = ExecutionConfig::default();
    conf.set_from_str("max_dependent_values", "10").unwrap();
    conf.set_from_str("dependent_overflow_policy", "error").unwrap();
    assert_eq!(10, conf.max_dependent_values);
    assert_eq!("error", conf.get_as_string("dependent_overflow_policy").unwrap());
    conf.set_from_str("batch_size", "0").unwrap_err();
    conf.reset("max_dependent_values").unwrap();
    assert_eq!(
        ExecutionConfig::default().max_dependent_values,
        conf.max_dependent_values
    );
}
