use std::cmp::Ordering;
use std::collections::VecDeque;

use fedexec_error::Result;

use super::outer::{pad_left_nulls, pad_right_nulls};
use super::{JoinSide, PhysicalJoin};
use crate::arrays::row::Row;
use crate::arrays::scalar::ScalarValue;
use crate::execution::context::ExecutionContext;
use crate::execution::node::ExecNode;
use crate::execution::operators::{ChildPull, pull_child};
use crate::execution::poll::PollOperator;
use crate::expr::Expression;

/// Rows buffered from one input along with their evaluated keys.
#[derive(Debug, Default)]
struct MergeInput {
    buffer: VecDeque<(Vec<ScalarValue>, Row)>,
    exhausted: bool,
    keys: Vec<Expression>,
}

impl MergeInput {
    /// Pull one set of rows from the child into the buffer.
    ///
    /// Returns false if the child is blocked.
    fn pull(&mut self, ctx: &ExecutionContext, child: &mut ExecNode) -> Result<bool> {
        match pull_child(child, ctx)? {
            ChildPull::Rows(rows) => {
                for row in rows {
                    let keys = self
                        .keys
                        .iter()
                        .map(|k| k.eval(&row, &ctx.correlated))
                        .collect::<Result<Vec<_>>>()?;
                    self.buffer.push_back((keys, row));
                }
                Ok(true)
            }
            ChildPull::Blocked => Ok(false),
            ChildPull::Exhausted => {
                self.exhausted = true;
                Ok(true)
            }
        }
    }

    /// Ensure there's at least one buffered row unless the input is
    /// exhausted.
    fn fill(&mut self, ctx: &ExecutionContext, child: &mut ExecNode) -> Result<bool> {
        while self.buffer.is_empty() && !self.exhausted {
            if !self.pull(ctx, child)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Length of the run of rows sharing the key of the first buffered row.
    ///
    /// Returns None if the run may continue into rows not yet pulled.
    fn run_len(&self) -> Option<usize> {
        let (first, _) = self.buffer.front()?;
        let len = self
            .buffer
            .iter()
            .take_while(|(keys, _)| keys == first)
            .count();
        if len < self.buffer.len() || self.exhausted {
            Some(len)
        } else {
            None
        }
    }

    fn complete_run(&mut self, ctx: &ExecutionContext, child: &mut ExecNode) -> Result<Option<usize>> {
        loop {
            if let Some(len) = self.run_len() {
                return Ok(Some(len));
            }
            if !self.pull(ctx, child)? {
                return Ok(None);
            }
        }
    }

    fn front_has_null(&self) -> bool {
        self.buffer
            .front()
            .map(|(keys, _)| keys.iter().any(|k| k.is_null()))
            .unwrap_or(false)
    }
}

/// Joins two inputs sorted on the equality keys.
///
/// Each input is read in order. Runs of rows with equal keys on both sides
/// produce the Cartesian product of the runs, filtered by the remaining
/// predicate.
#[derive(Debug)]
pub struct MergeJoinState {
    left: MergeInput,
    right: MergeInput,
    /// Non-key conditions and the residual over concatenated rows.
    predicate: Option<Expression>,
}

impl MergeJoinState {
    pub fn try_new(join: &PhysicalJoin) -> Result<Self> {
        let keys = join.equality_conditions();
        let left_keys = keys.iter().map(|&i| join.conditions[i].left.clone()).collect();
        let right_keys = keys
            .iter()
            .map(|&i| join.conditions[i].right.clone())
            .collect();

        Ok(MergeJoinState {
            left: MergeInput {
                keys: left_keys,
                ..Default::default()
            },
            right: MergeInput {
                keys: right_keys,
                ..Default::default()
            },
            predicate: join.pair_predicate(&keys)?,
        })
    }

    pub fn poll(
        &mut self,
        join: &PhysicalJoin,
        ctx: &ExecutionContext,
        left_child: &mut ExecNode,
        right_child: &mut ExecNode,
    ) -> Result<PollOperator> {
        let batch_size = ctx.batch_size();
        let mut out = Vec::new();

        macro_rules! blocked {
            () => {
                return Ok(if out.is_empty() {
                    PollOperator::Blocked
                } else {
                    PollOperator::Rows(out)
                })
            };
        }

        loop {
            if out.len() >= batch_size {
                return Ok(PollOperator::Rows(out));
            }

            if !self.left.fill(ctx, left_child)? {
                blocked!();
            }
            if !self.right.fill(ctx, right_child)? {
                blocked!();
            }

            let has_left = !self.left.buffer.is_empty();
            let has_right = !self.right.buffer.is_empty();
            match (has_left, has_right) {
                (false, false) => {
                    return Ok(if out.is_empty() {
                        PollOperator::Finished
                    } else {
                        PollOperator::Rows(out)
                    });
                }
                (true, false) => {
                    self.pop_unmatched(join, JoinSide::Left, &mut out);
                    continue;
                }
                (false, true) => {
                    self.pop_unmatched(join, JoinSide::Right, &mut out);
                    continue;
                }
                (true, true) => (),
            }

            if self.left.front_has_null() {
                self.pop_unmatched(join, JoinSide::Left, &mut out);
                continue;
            }
            if self.right.front_has_null() {
                self.pop_unmatched(join, JoinSide::Right, &mut out);
                continue;
            }

            let ord = match (self.left.buffer.front(), self.right.buffer.front()) {
                (Some((l, _)), Some((r, _))) => l.cmp(r),
                _ => continue,
            };

            match ord {
                Ordering::Less => self.pop_unmatched(join, JoinSide::Left, &mut out),
                Ordering::Greater => self.pop_unmatched(join, JoinSide::Right, &mut out),
                Ordering::Equal => {
                    let Some(left_len) = self.left.complete_run(ctx, left_child)? else {
                        blocked!();
                    };
                    let Some(right_len) = self.right.complete_run(ctx, right_child)? else {
                        blocked!();
                    };
                    self.join_runs(join, ctx, left_len, right_len, &mut out)?;
                }
            }
        }
    }

    fn pop_unmatched(&mut self, join: &PhysicalJoin, side: JoinSide, out: &mut Vec<Row>) {
        match side {
            JoinSide::Left => {
                if let Some((_, row)) = self.left.buffer.pop_front() {
                    if join.join_type.preserves_left() {
                        out.push(pad_right_nulls(&row, join.right_arity));
                    }
                }
            }
            JoinSide::Right => {
                if let Some((_, row)) = self.right.buffer.pop_front() {
                    if join.join_type.preserves_right() {
                        out.push(pad_left_nulls(join.left_arity, &row));
                    }
                }
            }
        }
    }

    fn join_runs(
        &mut self,
        join: &PhysicalJoin,
        ctx: &ExecutionContext,
        left_len: usize,
        right_len: usize,
        out: &mut Vec<Row>,
    ) -> Result<()> {
        let left_run: Vec<Row> = self.left.buffer.drain(..left_len).map(|(_, r)| r).collect();
        let right_run: Vec<Row> = self
            .right
            .buffer
            .drain(..right_len)
            .map(|(_, r)| r)
            .collect();

        let mut right_matched = vec![false; right_run.len()];
        for left in &left_run {
            let mut matched = false;
            for (idx, right) in right_run.iter().enumerate() {
                let row = join.output_row(left, right);
                let keep = match &self.predicate {
                    Some(pred) => pred.eval_predicate(&row, &ctx.correlated)?,
                    None => true,
                };
                if keep {
                    matched = true;
                    right_matched[idx] = true;
                    out.push(row);
                }
            }
            if !matched && join.join_type.preserves_left() {
                out.push(pad_right_nulls(left, join.right_arity));
            }
        }

        if join.join_type.preserves_right() {
            for (right, matched) in right_run.iter().zip(right_matched) {
                if !matched {
                    out.push(pad_left_nulls(join.left_arity, right));
                }
            }
        }

        Ok(())
    }

    pub fn close(&mut self) {
        self.left.buffer.clear();
        self.right.buffer.clear();
    }
}
