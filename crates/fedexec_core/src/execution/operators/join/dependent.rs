use fedexec_error::{ExecError, Result};
use tracing::{debug, warn};

use super::outer::{OuterJoinTracker, pad_left_nulls, pad_right_nulls};
use super::{DependentJoinSpec, JoinSide, PhysicalJoin, ProbeStrategy};
use crate::arrays::row::Row;
use crate::buffer::TupleBuffer;
use crate::config::execution::OverflowPolicy;
use crate::dependent::DependentValueSet;
use crate::dependent::batcher::ValueBatcher;
use crate::execution::context::ExecutionContext;
use crate::execution::node::ExecNode;
use crate::execution::operators::{ChildPull, pull_child};
use crate::execution::plan::NodeId;
use crate::execution::poll::PollOperator;
use crate::expr::Expression;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DependentPhase {
    /// Reading the independent side and harvesting keys.
    DrainIndependent,
    /// Issuing value batches against the dependent side.
    Probing,
    /// Reading the dependent side once without criteria.
    Fallback,
    EmitUnmatched,
    Finished,
}

/// A single execution of the dependent side for one value batch.
#[derive(Debug)]
struct SubExecution {
    batch: usize,
    node: ExecNode,
    ctx: ExecutionContext,
}

/// State for a dependent join.
///
/// The independent side is drained first. Distinct keys are partitioned
/// into value batches and each value batch is pushed to a fresh instance of
/// the dependent subtree as criteria on the target access node. At most
/// `concurrency` instances are open at once.
#[derive(Debug)]
pub struct DependentJoinState {
    node_id: NodeId,
    phase: DependentPhase,
    independent_keys: Vec<Expression>,
    dependent_keys: Vec<Expression>,
    predicate: Option<Expression>,
    /// Materialized independent rows.
    rows: TupleBuffer,
    values: DependentValueSet,
    batcher: Option<ValueBatcher>,
    /// Value batch index for each key in `values`.
    assignments: Vec<usize>,
    active: Vec<SubExecution>,
    cursor: usize,
    concurrency: usize,
    tracker: OuterJoinTracker,
    requests: usize,
}

impl DependentJoinState {
    pub fn try_new(
        join: &PhysicalJoin,
        spec: &DependentJoinSpec,
        ctx: &ExecutionContext,
        id: NodeId,
    ) -> Result<Self> {
        let mut independent_keys = Vec::with_capacity(spec.key_conditions.len());
        let mut dependent_keys = Vec::with_capacity(spec.key_conditions.len());
        for &idx in &spec.key_conditions {
            let cond = join.conditions.get(idx).ok_or_else(|| {
                ExecError::invariant("Dependent key condition out of bounds").with_field("idx", idx)
            })?;
            independent_keys.push(cond.expr_for(spec.independent).clone());
            dependent_keys.push(cond.expr_for(spec.dependent()).clone());
        }

        let predicate = match spec.probe {
            ProbeStrategy::Merge => join.pair_predicate(&spec.key_conditions)?,
            ProbeStrategy::NestedLoop => join.pair_predicate(&[])?,
        };

        let concurrency = spec
            .source_concurrency
            .unwrap_or(ctx.config.source_concurrency)
            .max(1);

        Ok(DependentJoinState {
            node_id: id,
            phase: DependentPhase::DrainIndependent,
            values: DependentValueSet::new(independent_keys.len()),
            independent_keys,
            dependent_keys,
            predicate,
            rows: TupleBuffer::new(&ctx.buffer_manager),
            batcher: None,
            assignments: Vec::new(),
            active: Vec::new(),
            cursor: 0,
            concurrency,
            tracker: OuterJoinTracker::default(),
            requests: 0,
        })
    }

    pub fn poll(
        &mut self,
        join: &PhysicalJoin,
        spec: &DependentJoinSpec,
        ctx: &ExecutionContext,
        left: &mut ExecNode,
        right: &mut ExecNode,
    ) -> Result<PollOperator> {
        let (independent, dependent) = match spec.independent {
            JoinSide::Left => (left, right),
            JoinSide::Right => (right, left),
        };

        loop {
            match self.phase {
                DependentPhase::DrainIndependent => match pull_child(independent, ctx)? {
                    ChildPull::Rows(rows) => self.harvest(ctx, rows)?,
                    ChildPull::Blocked => return Ok(PollOperator::Blocked),
                    ChildPull::Exhausted => {
                        self.rows.finalize();
                        self.tracker = OuterJoinTracker::new(self.rows.len());
                        self.start_probing(spec, ctx, dependent)?;
                    }
                },
                DependentPhase::Probing => {
                    if let Some(poll) = self.poll_probing(join, spec, ctx, dependent)? {
                        return Ok(poll);
                    }
                }
                DependentPhase::Fallback => match pull_child(dependent, ctx)? {
                    ChildPull::Rows(rows) => {
                        let out = self.probe(join, spec, ctx, None, rows)?;
                        return Ok(PollOperator::Rows(out));
                    }
                    ChildPull::Blocked => return Ok(PollOperator::Blocked),
                    ChildPull::Exhausted => self.phase = DependentPhase::EmitUnmatched,
                },
                DependentPhase::EmitUnmatched => {
                    self.phase = DependentPhase::Finished;
                    debug!(
                        node = self.node_id,
                        requests = self.requests,
                        "dependent join complete"
                    );
                    if !join.join_type.preserves(spec.independent) {
                        continue;
                    }
                    let out: Vec<Row> = self
                        .tracker
                        .unmatched()
                        .filter_map(|idx| self.rows.get(idx))
                        .map(|row| match spec.independent {
                            JoinSide::Left => pad_right_nulls(row, join.right_arity),
                            JoinSide::Right => pad_left_nulls(join.left_arity, row),
                        })
                        .collect();
                    return Ok(PollOperator::Rows(out));
                }
                DependentPhase::Finished => return Ok(PollOperator::Finished),
            }
        }
    }

    fn harvest(&mut self, ctx: &ExecutionContext, rows: Vec<Row>) -> Result<()> {
        for row in rows {
            let key = self
                .independent_keys
                .iter()
                .map(|k| k.eval(&row, &ctx.correlated))
                .collect::<Result<Row>>()?;
            self.values.insert(key, self.rows.len())?;
            self.rows.append(row)?;
        }
        Ok(())
    }

    fn start_probing(
        &mut self,
        spec: &DependentJoinSpec,
        ctx: &ExecutionContext,
        dependent: &mut ExecNode,
    ) -> Result<()> {
        if self.values.is_empty() {
            debug!(node = self.node_id, "no dependent values, skipping dependent side");
            self.phase = DependentPhase::EmitUnmatched;
            return Ok(());
        }

        let max = ctx.config.max_dependent_values;
        if self.values.len() > max {
            match ctx.config.dependent_overflow_policy {
                OverflowPolicy::Error => {
                    return Err(ExecError::processing(
                        "Dependent value set exceeds the configured maximum",
                    )
                    .with_field("node", self.node_id)
                    .with_field("values", self.values.len())
                    .with_field("max", max));
                }
                OverflowPolicy::Fallback => {
                    warn!(
                        node = self.node_id,
                        values = self.values.len(),
                        max,
                        "dependent value set too large, reading dependent side without criteria"
                    );
                    dependent.open(ctx)?;
                    self.requests += 1;
                    self.phase = DependentPhase::Fallback;
                    return Ok(());
                }
            }
        }

        let batcher = ValueBatcher::try_new(
            &self.values,
            &spec.target_columns,
            &spec.capabilities,
            format!("#dep_{}", self.node_id),
        )?;
        self.assignments = batcher.key_assignments(self.values.len());
        debug!(
            node = self.node_id,
            values = self.values.len(),
            batches = batcher.num_batches(),
            concurrency = self.concurrency,
            "starting dependent requests"
        );
        self.batcher = Some(batcher);
        self.phase = DependentPhase::Probing;

        Ok(())
    }

    /// Poll the open sub-executions round robin.
    ///
    /// Returns None once every value batch has been processed.
    fn poll_probing(
        &mut self,
        join: &PhysicalJoin,
        spec: &DependentJoinSpec,
        ctx: &ExecutionContext,
        dependent: &ExecNode,
    ) -> Result<Option<PollOperator>> {
        'refill: loop {
            while self.active.len() < self.concurrency {
                let Some(batcher) = self.batcher.as_mut() else {
                    break;
                };
                let Some(batch) = batcher.next_batch(&self.values)? else {
                    break;
                };

                let sub_ctx = ctx.with_dependent_criteria(spec.target, batch.criteria);
                let mut node = dependent.clone_plan()?;
                node.open(&sub_ctx)?;
                self.requests += 1;
                debug!(
                    node = self.node_id,
                    batch = batch.index,
                    keys = batch.keys.len(),
                    active = self.active.len() + 1,
                    "opened dependent request"
                );
                self.active.push(SubExecution {
                    batch: batch.index,
                    node,
                    ctx: sub_ctx,
                });
            }

            if self.active.is_empty() {
                self.phase = DependentPhase::EmitUnmatched;
                return Ok(None);
            }

            let mut blocked = 0;
            while blocked < self.active.len() {
                if self.cursor >= self.active.len() {
                    self.cursor = 0;
                }
                let sub = &mut self.active[self.cursor];
                match pull_child(&mut sub.node, &sub.ctx)? {
                    ChildPull::Rows(rows) => {
                        let batch = sub.batch;
                        self.cursor += 1;
                        let out = self.probe(join, spec, ctx, Some(batch), rows)?;
                        return Ok(Some(PollOperator::Rows(out)));
                    }
                    ChildPull::Blocked => {
                        blocked += 1;
                        self.cursor += 1;
                    }
                    ChildPull::Exhausted => {
                        let mut done = self.active.remove(self.cursor);
                        done.node.close();
                        debug!(node = self.node_id, batch = done.batch, "dependent request complete");
                        continue 'refill;
                    }
                }
            }

            return Ok(Some(PollOperator::Blocked));
        }
    }

    /// Join rows from the dependent side against the independent rows.
    ///
    /// With a batch index only pairs whose key was assigned to that batch
    /// are considered, so a pair is never produced by two batches.
    fn probe(
        &mut self,
        join: &PhysicalJoin,
        spec: &DependentJoinSpec,
        ctx: &ExecutionContext,
        batch: Option<usize>,
        rows: Vec<Row>,
    ) -> Result<Vec<Row>> {
        let mut out = Vec::new();

        match spec.probe {
            ProbeStrategy::Merge => {
                for dep_row in rows {
                    let key = self
                        .dependent_keys
                        .iter()
                        .map(|k| k.eval(&dep_row, &ctx.correlated))
                        .collect::<Result<Row>>()?;
                    if key.has_null() {
                        continue;
                    }
                    let Some(key_idx) = self.values.get_index_of(&key) else {
                        continue;
                    };
                    if let Some(batch) = batch {
                        if self.assignments.get(key_idx) != Some(&batch) {
                            continue;
                        }
                    }
                    let candidates = self.values.rows_for_key(key_idx).to_vec();
                    for idx in candidates {
                        self.emit_pair(join, spec, ctx, idx, &dep_row, &mut out)?;
                    }
                }
            }
            ProbeStrategy::NestedLoop => {
                let candidates: Vec<usize> = match (batch, &self.batcher) {
                    (Some(batch), Some(batcher)) => batcher
                        .specs()
                        .get(batch)
                        .map(|batch_spec| {
                            batch_spec
                                .keys
                                .iter()
                                .flat_map(|&k| self.values.rows_for_key(k))
                                .copied()
                                .collect()
                        })
                        .unwrap_or_default(),
                    _ => (0..self.rows.len()).collect(),
                };
                for dep_row in rows {
                    for &idx in &candidates {
                        self.emit_pair(join, spec, ctx, idx, &dep_row, &mut out)?;
                    }
                }
            }
        }

        Ok(out)
    }

    fn emit_pair(
        &mut self,
        join: &PhysicalJoin,
        spec: &DependentJoinSpec,
        ctx: &ExecutionContext,
        idx: usize,
        dep_row: &Row,
        out: &mut Vec<Row>,
    ) -> Result<()> {
        let independent = self
            .rows
            .get(idx)
            .ok_or_else(|| ExecError::invariant("Independent row missing").with_field("idx", idx))?;
        let row = match spec.independent {
            JoinSide::Left => join.output_row(independent, dep_row),
            JoinSide::Right => join.output_row(dep_row, independent),
        };
        let keep = match &self.predicate {
            Some(pred) => pred.eval_predicate(&row, &ctx.correlated)?,
            None => true,
        };
        if keep {
            self.tracker.set_matched(idx);
            out.push(row);
        }
        Ok(())
    }

    pub fn close(&mut self) {
        if !self.active.is_empty() {
            debug!(
                node = self.node_id,
                abandoned = self.active.len(),
                "abandoning dependent requests"
            );
        }
        for mut sub in self.active.drain(..) {
            sub.node.close();
        }
        self.rows.clear();
        self.values.clear();
        self.batcher = None;
        self.phase = DependentPhase::Finished;
    }
}
