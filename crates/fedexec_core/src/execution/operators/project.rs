use fedexec_error::Result;

use super::{ChildPull, ExecuteOperator, pull_child, single_child};
use crate::arrays::row::Row;
use crate::execution::context::ExecutionContext;
use crate::execution::node::ExecNode;
use crate::execution::plan::NodeId;
use crate::execution::poll::PollOperator;
use crate::explain::{ExplainEntry, Explainable};
use crate::expr::Expression;

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalProject {
    pub exprs: Vec<Expression>,
}

impl ExecuteOperator for PhysicalProject {
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
        let child = single_child(children, "Project")?;
        match pull_child(child, ctx)? {
            ChildPull::Rows(rows) => {
                let rows = rows
                    .iter()
                    .map(|row| {
                        self.exprs
                            .iter()
                            .map(|e| e.eval(row, &ctx.correlated))
                            .collect::<Result<Row>>()
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(PollOperator::Rows(rows))
            }
            ChildPull::Blocked => Ok(PollOperator::Blocked),
            ChildPull::Exhausted => Ok(PollOperator::Finished),
        }
    }
}

impl Explainable for PhysicalProject {
    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("Project").with_values("projections", &self.exprs)
    }
}
