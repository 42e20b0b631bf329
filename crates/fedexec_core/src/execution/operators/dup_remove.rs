use fedexec_error::Result;
use hashbrown::HashSet;

use super::{ChildPull, ExecuteOperator, pull_child, single_child};
use crate::arrays::row::Row;
use crate::buffer::Reservation;
use crate::execution::context::ExecutionContext;
use crate::execution::node::ExecNode;
use crate::execution::plan::NodeId;
use crate::execution::poll::PollOperator;
use crate::explain::{ExplainEntry, Explainable};

/// Suppresses rows that were already emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalDupRemove;

#[derive(Debug)]
pub struct DupRemoveState {
    seen: HashSet<Row>,
    reservation: Reservation,
}

impl ExecuteOperator for PhysicalDupRemove {
    type State = DupRemoveState;

    fn create_state(&self, ctx: &ExecutionContext, _id: NodeId) -> Result<Self::State> {
        Ok(DupRemoveState {
            seen: HashSet::new(),
            reservation: Reservation::new(&ctx.buffer_manager),
        })
    }

    fn poll_execute(
        &self,
        ctx: &ExecutionContext,
        state: &mut Self::State,
        children: &mut [ExecNode],
    ) -> Result<PollOperator> {
        let child = single_child(children, "DupRemove")?;
        match pull_child(child, ctx)? {
            ChildPull::Rows(rows) => {
                let mut out = Vec::new();
                for row in rows {
                    if state.seen.contains(&row) {
                        continue;
                    }
                    state.reservation.grow(1)?;
                    state.seen.insert(row.clone());
                    out.push(row);
                }
                Ok(PollOperator::Rows(out))
            }
            ChildPull::Blocked => Ok(PollOperator::Blocked),
            ChildPull::Exhausted => Ok(PollOperator::Finished),
        }
    }

    fn close(&self, state: &mut Self::State) {
        state.seen.clear();
        state.reservation.release_all();
    }
}

impl Explainable for PhysicalDupRemove {
    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("DupRemove")
    }
}
