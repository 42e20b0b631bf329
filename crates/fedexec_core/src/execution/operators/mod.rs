pub mod access;
pub mod dup_remove;
pub mod grouping;
pub mod join;
pub mod limit;
pub mod project;
pub mod select;
pub mod sort;
pub mod union_all;

use std::fmt::Debug;

use fedexec_error::{ExecError, Result};

use self::access::AccessState;
use self::dup_remove::DupRemoveState;
use self::grouping::GroupingState;
use self::join::JoinState;
use self::limit::LimitState;
use self::sort::SortState;
use self::union_all::UnionAllState;
use super::context::ExecutionContext;
use super::node::ExecNode;
use super::plan::{NodeId, PlanOperator};
use super::poll::{PollOperator, PollPull};
use crate::arrays::row::Row;

/// Execution logic for a single node kind.
pub trait ExecuteOperator: Debug + Sync + Send {
    type State: Debug + Send;

    /// Create the state for a newly opened node.
    ///
    /// Children that are opened with this node are already open.
    fn create_state(&self, ctx: &ExecutionContext, id: NodeId) -> Result<Self::State>;

    fn poll_execute(
        &self,
        ctx: &ExecutionContext,
        state: &mut Self::State,
        children: &mut [ExecNode],
    ) -> Result<PollOperator>;

    /// Release resources held by the state.
    fn close(&self, _state: &mut Self::State) {}
}

#[derive(Debug)]
pub enum OperatorState {
    Access(AccessState),
    Project,
    Select,
    Join(Box<JoinState>),
    Sort(SortState),
    Grouping(GroupingState),
    DupRemove(DupRemoveState),
    UnionAll(UnionAllState),
    Limit(LimitState),
}

impl OperatorState {
    pub(crate) fn close(&mut self, operator: &PlanOperator) {
        match (operator, self) {
            (PlanOperator::Access(op), OperatorState::Access(s)) => op.close(s),
            (PlanOperator::Join(op), OperatorState::Join(s)) => op.close(s),
            (PlanOperator::Sort(op), OperatorState::Sort(s)) => op.close(s),
            (PlanOperator::Grouping(op), OperatorState::Grouping(s)) => op.close(s),
            (PlanOperator::DupRemove(op), OperatorState::DupRemove(s)) => op.close(s),
            _ => (),
        }
    }
}

pub(crate) fn create_operator_state(
    operator: &PlanOperator,
    ctx: &ExecutionContext,
    id: NodeId,
) -> Result<OperatorState> {
    Ok(match operator {
        PlanOperator::Access(op) => OperatorState::Access(op.create_state(ctx, id)?),
        PlanOperator::Project(op) => {
            op.create_state(ctx, id)?;
            OperatorState::Project
        }
        PlanOperator::Select(op) => {
            op.create_state(ctx, id)?;
            OperatorState::Select
        }
        PlanOperator::Join(op) => OperatorState::Join(Box::new(op.create_state(ctx, id)?)),
        PlanOperator::Sort(op) => OperatorState::Sort(op.create_state(ctx, id)?),
        PlanOperator::Grouping(op) => OperatorState::Grouping(op.create_state(ctx, id)?),
        PlanOperator::DupRemove(op) => OperatorState::DupRemove(op.create_state(ctx, id)?),
        PlanOperator::UnionAll(op) => OperatorState::UnionAll(op.create_state(ctx, id)?),
        PlanOperator::Limit(op) => OperatorState::Limit(op.create_state(ctx, id)?),
    })
}

pub(crate) fn poll_operator(
    operator: &PlanOperator,
    state: &mut OperatorState,
    ctx: &ExecutionContext,
    children: &mut [ExecNode],
) -> Result<PollOperator> {
    match (operator, state) {
        (PlanOperator::Access(op), OperatorState::Access(s)) => op.poll_execute(ctx, s, children),
        (PlanOperator::Project(op), OperatorState::Project) => {
            op.poll_execute(ctx, &mut (), children)
        }
        (PlanOperator::Select(op), OperatorState::Select) => op.poll_execute(ctx, &mut (), children),
        (PlanOperator::Join(op), OperatorState::Join(s)) => op.poll_execute(ctx, s, children),
        (PlanOperator::Sort(op), OperatorState::Sort(s)) => op.poll_execute(ctx, s, children),
        (PlanOperator::Grouping(op), OperatorState::Grouping(s)) => {
            op.poll_execute(ctx, s, children)
        }
        (PlanOperator::DupRemove(op), OperatorState::DupRemove(s)) => {
            op.poll_execute(ctx, s, children)
        }
        (PlanOperator::UnionAll(op), OperatorState::UnionAll(s)) => {
            op.poll_execute(ctx, s, children)
        }
        (PlanOperator::Limit(op), OperatorState::Limit(s)) => op.poll_execute(ctx, s, children),
        (op, state) => Err(ExecError::invariant("Operator state mismatch")
            .with_field("operator", op.name())
            .with_field("state", format!("{state:?}"))),
    }
}

/// Rows pulled from a child node.
#[derive(Debug)]
pub(crate) enum ChildPull {
    Rows(Vec<Row>),
    Blocked,
    Exhausted,
}

/// Pull the next set of rows from a child.
///
/// A terminal batch containing rows is returned as `Rows`, the following
/// pull reports `Exhausted`.
pub(crate) fn pull_child(child: &mut ExecNode, ctx: &ExecutionContext) -> Result<ChildPull> {
    Ok(match child.next_batch(ctx)? {
        PollPull::Ready(batch) => ChildPull::Rows(batch.into_rows()),
        PollPull::Blocked => ChildPull::Blocked,
        PollPull::Done(batch) if batch.is_empty() => ChildPull::Exhausted,
        PollPull::Done(batch) => ChildPull::Rows(batch.into_rows()),
    })
}

pub(crate) fn single_child<'a>(children: &'a mut [ExecNode], name: &str) -> Result<&'a mut ExecNode> {
    let n = children.len();
    match children {
        [child] => Ok(child),
        _ => Err(ExecError::invariant("Expected exactly one child")
            .with_field("operator", name)
            .with_field("children", n)),
    }
}
