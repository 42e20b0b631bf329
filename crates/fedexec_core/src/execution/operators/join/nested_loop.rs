use fedexec_error::Result;

use super::outer::{OuterJoinTracker, pad_left_nulls, pad_right_nulls};
use super::{JoinSide, PhysicalJoin};
use crate::arrays::row::Row;
use crate::buffer::TupleBuffer;
use crate::execution::context::ExecutionContext;
use crate::execution::node::ExecNode;
use crate::execution::operators::{ChildPull, pull_child};
use crate::execution::poll::PollOperator;
use crate::expr::Expression;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NestedLoopPhase {
    Materializing,
    Probing,
    EmitUnmatched,
    Finished,
}

/// Materializes one input then evaluates the full join predicate against
/// every pair of rows.
#[derive(Debug)]
pub struct NestedLoopJoinState {
    materialize: JoinSide,
    phase: NestedLoopPhase,
    built: TupleBuffer,
    tracker: OuterJoinTracker,
    predicate: Option<Expression>,
}

impl NestedLoopJoinState {
    pub fn try_new(join: &PhysicalJoin, ctx: &ExecutionContext, materialize: JoinSide) -> Result<Self> {
        Ok(NestedLoopJoinState {
            materialize,
            phase: NestedLoopPhase::Materializing,
            built: TupleBuffer::new(&ctx.buffer_manager),
            tracker: OuterJoinTracker::default(),
            predicate: join.pair_predicate(&[])?,
        })
    }

    pub fn poll(
        &mut self,
        join: &PhysicalJoin,
        ctx: &ExecutionContext,
        left: &mut ExecNode,
        right: &mut ExecNode,
    ) -> Result<PollOperator> {
        let (build_child, probe_child) = match self.materialize {
            JoinSide::Left => (left, right),
            JoinSide::Right => (right, left),
        };

        loop {
            match self.phase {
                NestedLoopPhase::Materializing => match pull_child(build_child, ctx)? {
                    ChildPull::Rows(rows) => self.built.append_all(rows)?,
                    ChildPull::Blocked => return Ok(PollOperator::Blocked),
                    ChildPull::Exhausted => {
                        self.built.finalize();
                        self.tracker = OuterJoinTracker::new(self.built.len());
                        self.phase = NestedLoopPhase::Probing;
                    }
                },
                NestedLoopPhase::Probing => match pull_child(probe_child, ctx)? {
                    ChildPull::Rows(rows) => {
                        let out = self.probe(join, ctx, rows)?;
                        return Ok(PollOperator::Rows(out));
                    }
                    ChildPull::Blocked => return Ok(PollOperator::Blocked),
                    ChildPull::Exhausted => self.phase = NestedLoopPhase::EmitUnmatched,
                },
                NestedLoopPhase::EmitUnmatched => {
                    self.phase = NestedLoopPhase::Finished;
                    if !join.join_type.preserves(self.materialize) {
                        continue;
                    }
                    let out: Vec<Row> = self
                        .tracker
                        .unmatched()
                        .filter_map(|idx| self.built.get(idx))
                        .map(|row| match self.materialize {
                            JoinSide::Left => pad_right_nulls(row, join.right_arity),
                            JoinSide::Right => pad_left_nulls(join.left_arity, row),
                        })
                        .collect();
                    return Ok(PollOperator::Rows(out));
                }
                NestedLoopPhase::Finished => return Ok(PollOperator::Finished),
            }
        }
    }

    fn probe(&mut self, join: &PhysicalJoin, ctx: &ExecutionContext, rows: Vec<Row>) -> Result<Vec<Row>> {
        let probe_side = self.materialize.other();
        let mut out = Vec::new();

        for probe in rows {
            let mut matched = false;
            for (idx, built) in self.built.rows().iter().enumerate() {
                let row = match self.materialize {
                    JoinSide::Left => join.output_row(built, &probe),
                    JoinSide::Right => join.output_row(&probe, built),
                };
                let keep = match &self.predicate {
                    Some(pred) => pred.eval_predicate(&row, &ctx.correlated)?,
                    None => true,
                };
                if keep {
                    matched = true;
                    self.tracker.set_matched(idx);
                    out.push(row);
                }
            }

            if !matched && join.join_type.preserves(probe_side) {
                out.push(match probe_side {
                    JoinSide::Left => pad_right_nulls(&probe, join.right_arity),
                    JoinSide::Right => pad_left_nulls(join.left_arity, &probe),
                });
            }
        }

        Ok(out)
    }

    pub fn close(&mut self) {
        self.built.clear();
        self.phase = NestedLoopPhase::Finished;
    }
}
