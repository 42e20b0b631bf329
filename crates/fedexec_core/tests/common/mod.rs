#![allow(dead_code)]

use std::sync::Arc;

use fedexec_core::arrays::datatype::DataType;
use fedexec_core::arrays::row::Row;
use fedexec_core::config::execution::ExecutionConfig;
use fedexec_core::execution::context::ExecutionContext;
use fedexec_core::execution::operators::access::PhysicalAccess;
use fedexec_core::execution::operators::join::{JoinStrategy, PhysicalJoin};
use fedexec_core::execution::plan::{NodeId, PhysicalPlan, PlanOperator};
use fedexec_core::planner::Planner;
use fedexec_core::planner::statistics::TableStatistics;
use fedexec_core::processor::QueryProcessor;
use fedexec_core::source::memory::{MemoryDataManager, MemoryTable};

pub fn config() -> ExecutionConfig {
    ExecutionConfig {
        batch_size: 4,
        source_concurrency: 4,
        blocked_retry_interval_ms: 0,
        ..Default::default()
    }
}

pub fn context(dm: &MemoryDataManager, config: ExecutionConfig) -> ExecutionContext {
    let dm = Arc::new(dm.clone());
    ExecutionContext::new(config, dm.clone(), dm)
}

/// Add a two column (key, value) table.
pub fn add_kv_table(dm: &MemoryDataManager, source: &str, relation: &str, rows: Vec<Row>) {
    dm.add_table(
        source,
        relation,
        MemoryTable::new([("k", DataType::Int32), ("v", DataType::Utf8)], rows),
    );
}

/// Access node over a (key, value) table with known statistics.
pub fn kv_access(source: &str, relation: &str, cardinality: usize, key_ndv: usize) -> PhysicalAccess {
    PhysicalAccess::new(source, relation, [("k", DataType::Int32), ("v", DataType::Utf8)])
        .with_statistics(
            TableStatistics::unknown(2)
                .with_cardinality(cardinality)
                .with_ndv(0, key_ndv),
        )
}

pub fn finalize(plan: PhysicalPlan, ctx: &ExecutionContext) -> Arc<PhysicalPlan> {
    let planner = Planner::new(ctx.config.clone(), ctx.capabilities.clone());
    Arc::new(planner.finalize(plan).unwrap())
}

pub fn run(plan: &Arc<PhysicalPlan>, ctx: &ExecutionContext) -> Vec<Row> {
    let mut processor = QueryProcessor::try_new(plan.clone(), ctx.clone()).unwrap();
    processor.run().unwrap();
    processor.into_rows()
}

pub fn sorted(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort();
    rows
}

pub fn join_at(plan: &PhysicalPlan, id: NodeId) -> &PhysicalJoin {
    match &plan.node(id).unwrap().operator {
        PlanOperator::Join(join) => join,
        other => panic!("not a join: {other:?}"),
    }
}

pub fn strategy_at(plan: &PhysicalPlan, id: NodeId) -> &JoinStrategy {
    join_at(plan, id).strategy.as_ref().unwrap()
}
