use fedexec_error::Result;

use super::{ChildPull, ExecuteOperator, pull_child};
use crate::execution::context::ExecutionContext;
use crate::execution::node::ExecNode;
use crate::execution::plan::NodeId;
use crate::execution::poll::PollOperator;
use crate::explain::{ExplainEntry, Explainable};

/// Concatenates the output of all children in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalUnionAll;

#[derive(Debug)]
pub struct UnionAllState {
    /// Index of the child currently being drained.
    current: usize,
}

impl ExecuteOperator for PhysicalUnionAll {
    type State = UnionAllState;

    fn create_state(&self, _ctx: &ExecutionContext, _id: NodeId) -> Result<Self::State> {
        Ok(UnionAllState { current: 0 })
    }

    fn poll_execute(
        &self,
        ctx: &ExecutionContext,
        state: &mut Self::State,
        children: &mut [ExecNode],
    ) -> Result<PollOperator> {
        loop {
            let Some(child) = children.get_mut(state.current) else {
                return Ok(PollOperator::Finished);
            };
            match pull_child(child, ctx)? {
                ChildPull::Rows(rows) => return Ok(PollOperator::Rows(rows)),
                ChildPull::Blocked => return Ok(PollOperator::Blocked),
                ChildPull::Exhausted => {
                    child.close();
                    state.current += 1;
                }
            }
        }
    }
}

impl Explainable for PhysicalUnionAll {
    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("UnionAll")
    }
}
