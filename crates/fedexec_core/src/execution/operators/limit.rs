use fedexec_error::Result;

use super::{ChildPull, ExecuteOperator, pull_child, single_child};
use crate::execution::context::ExecutionContext;
use crate::execution::node::ExecNode;
use crate::execution::plan::NodeId;
use crate::execution::poll::PollOperator;
use crate::explain::{ExplainEntry, Explainable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalLimit {
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Debug)]
pub struct LimitState {
    /// Rows still to skip.
    skip: usize,
    /// Rows still to emit, None if unbounded.
    remaining: Option<usize>,
}

impl ExecuteOperator for PhysicalLimit {
    type State = LimitState;

    fn create_state(&self, _ctx: &ExecutionContext, _id: NodeId) -> Result<Self::State> {
        Ok(LimitState {
            skip: self.offset,
            remaining: self.limit,
        })
    }

    fn poll_execute(
        &self,
        ctx: &ExecutionContext,
        state: &mut Self::State,
        children: &mut [ExecNode],
    ) -> Result<PollOperator> {
        if state.remaining == Some(0) {
            return Ok(PollOperator::Finished);
        }

        let child = single_child(children, "Limit")?;
        match pull_child(child, ctx)? {
            ChildPull::Rows(rows) => {
                let skip = state.skip.min(rows.len());
                state.skip -= skip;

                let mut rows: Vec<_> = rows.into_iter().skip(skip).collect();
                if let Some(remaining) = state.remaining.as_mut() {
                    rows.truncate(*remaining);
                    *remaining -= rows.len();
                }
                Ok(PollOperator::Rows(rows))
            }
            ChildPull::Blocked => Ok(PollOperator::Blocked),
            ChildPull::Exhausted => Ok(PollOperator::Finished),
        }
    }
}

impl Explainable for PhysicalLimit {
    fn explain_entry(&self) -> ExplainEntry {
        let ent = ExplainEntry::new("Limit").with_value("offset", self.offset);
        match self.limit {
            Some(limit) => ent.with_value("limit", limit),
            None => ent,
        }
    }
}
