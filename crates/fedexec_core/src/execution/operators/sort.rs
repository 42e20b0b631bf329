use fedexec_error::Result;

use super::{ChildPull, ExecuteOperator, pull_child, single_child};
use crate::buffer::TupleBuffer;
use crate::execution::context::ExecutionContext;
use crate::execution::node::ExecNode;
use crate::execution::plan::NodeId;
use crate::execution::poll::PollOperator;
use crate::explain::{ExplainEntry, Explainable};
use crate::expr::sort::{SortExpression, compare_sort_keys, eval_sort_keys};

/// Buffers all input rows then emits them in sorted order.
///
/// The sort is stable.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalSort {
    pub exprs: Vec<SortExpression>,
}

#[derive(Debug)]
pub enum SortState {
    Collecting { buffer: TupleBuffer },
    Emitting { buffer: TupleBuffer, pos: usize },
}

impl ExecuteOperator for PhysicalSort {
    type State = SortState;

    fn create_state(&self, ctx: &ExecutionContext, _id: NodeId) -> Result<Self::State> {
        Ok(SortState::Collecting {
            buffer: TupleBuffer::new(&ctx.buffer_manager),
        })
    }

    fn poll_execute(
        &self,
        ctx: &ExecutionContext,
        state: &mut Self::State,
        children: &mut [ExecNode],
    ) -> Result<PollOperator> {
        loop {
            match state {
                SortState::Collecting { buffer } => {
                    let child = single_child(children, "Sort")?;
                    match pull_child(child, ctx)? {
                        ChildPull::Rows(rows) => buffer.append_all(rows)?,
                        ChildPull::Blocked => return Ok(PollOperator::Blocked),
                        ChildPull::Exhausted => {
                            let rows = buffer.take_rows();
                            let mut keyed = rows
                                .into_iter()
                                .map(|row| {
                                    Ok((eval_sort_keys(&self.exprs, &row, &ctx.correlated)?, row))
                                })
                                .collect::<Result<Vec<_>>>()?;
                            keyed.sort_by(|(a, _), (b, _)| compare_sort_keys(&self.exprs, a, b));

                            let mut sorted = TupleBuffer::new(&ctx.buffer_manager);
                            sorted.append_all(keyed.into_iter().map(|(_, row)| row))?;
                            sorted.finalize();

                            *state = SortState::Emitting {
                                buffer: sorted,
                                pos: 0,
                            };
                        }
                    }
                }
                SortState::Emitting { buffer, pos } => {
                    if *pos >= buffer.len() {
                        buffer.clear();
                        return Ok(PollOperator::Finished);
                    }
                    let end = (*pos + ctx.batch_size()).min(buffer.len());
                    let rows = buffer.rows()[*pos..end].to_vec();
                    *pos = end;
                    return Ok(PollOperator::Rows(rows));
                }
            }
        }
    }

    fn close(&self, state: &mut Self::State) {
        match state {
            SortState::Collecting { buffer } | SortState::Emitting { buffer, .. } => buffer.clear(),
        }
    }
}

impl Explainable for PhysicalSort {
    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("Sort").with_values("keys", &self.exprs)
    }
}
