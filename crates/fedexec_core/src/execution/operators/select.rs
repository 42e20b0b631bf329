use fedexec_error::Result;

use super::{ChildPull, ExecuteOperator, pull_child, single_child};
use crate::execution::context::ExecutionContext;
use crate::execution::node::ExecNode;
use crate::execution::plan::NodeId;
use crate::execution::poll::PollOperator;
use crate::explain::{ExplainEntry, Explainable};
use crate::expr::Expression;

/// Filters rows with a predicate. Null results are filtered out.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalSelect {
    pub predicate: Expression,
}

impl ExecuteOperator for PhysicalSelect {
    type State = ();

    fn create_state(&self, _ctx: &ExecutionContext, _id: NodeId) -> Result<Self::State> {
        Ok(())
    }

    fn poll_execute(
        &self,
        ctx: &ExecutionContext,
        _state: &mut Self::State,
        children: &mut [ExecNode],
    ) -> Result<PollOperator> {
        let child = single_child(children, "Select")?;
        match pull_child(child, ctx)? {
            ChildPull::Rows(rows) => {
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    if self.predicate.eval_predicate(&row, &ctx.correlated)? {
                        out.push(row);
                    }
                }
                Ok(PollOperator::Rows(out))
            }
            ChildPull::Blocked => Ok(PollOperator::Blocked),
            ChildPull::Exhausted => Ok(PollOperator::Finished),
        }
    }
}

impl Explainable for PhysicalSelect {
    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("Select").with_value("predicate", &self.predicate)
    }
}
