use std::collections::VecDeque;
use std::sync::Arc;

use fedexec_error::{ExecError, Result};
use tracing::trace;

use super::context::ExecutionContext;
use super::operators::{OperatorState, create_operator_state, poll_operator};
use super::plan::{NodeId, PhysicalPlan};
use super::poll::{PollOperator, PollPull};
use crate::arrays::batch::Batch;
use crate::arrays::datatype::DataType;
use crate::arrays::row::Row;

/// Lifecycle of a single node instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLifecycle {
    Unopened,
    Opened,
    Draining,
    Closed,
}

/// An executable instance of a node in a physical plan.
///
/// Owns its children and all of its execution state. The plan shape is
/// shared with every other instance created from the same plan.
#[derive(Debug)]
pub struct ExecNode {
    plan: Arc<PhysicalPlan>,
    id: NodeId,
    children: Vec<ExecNode>,
    lifecycle: NodeLifecycle,
    state: Option<OperatorState>,
    /// Row number of the next row returned.
    next_row: usize,
    /// Rows produced by the operator but not yet returned.
    pending: VecDeque<Row>,
    operator_finished: bool,
    /// The terminal batch has been returned.
    exhausted: bool,
}

impl ExecNode {
    pub(crate) fn instantiate(plan: Arc<PhysicalPlan>, id: NodeId) -> Result<Self> {
        let template = plan.node(id)?;
        let children = template
            .children
            .iter()
            .map(|&child| ExecNode::instantiate(plan.clone(), child))
            .collect::<Result<Vec<_>>>()?;

        Ok(ExecNode {
            plan,
            id,
            children,
            lifecycle: NodeLifecycle::Unopened,
            state: None,
            next_row: 1,
            pending: VecDeque::new(),
            operator_finished: false,
            exhausted: false,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn lifecycle(&self) -> NodeLifecycle {
        self.lifecycle
    }

    pub fn plan(&self) -> &Arc<PhysicalPlan> {
        &self.plan
    }

    pub fn output_types(&self) -> Result<&[DataType]> {
        Ok(&self.plan.node(self.id)?.output_types)
    }

    pub fn children(&self) -> &[ExecNode] {
        &self.children
    }

    /// Open this node and its children.
    ///
    /// Opening a node more than once without a reset is an invariant
    /// violation.
    pub fn open(&mut self, ctx: &ExecutionContext) -> Result<()> {
        if self.lifecycle != NodeLifecycle::Unopened {
            return Err(ExecError::invariant("Node opened more than once")
                .with_field("node", self.id)
                .with_field("lifecycle", format!("{:?}", self.lifecycle)));
        }

        let plan = self.plan.clone();
        let template = plan.node(self.id)?;

        for (idx, child) in self.children.iter_mut().enumerate() {
            if template.operator.opens_child(idx) {
                child.open(ctx)?;
            }
        }

        self.state = Some(create_operator_state(&template.operator, ctx, self.id)?);
        self.lifecycle = NodeLifecycle::Opened;
        trace!(node = self.id, operator = template.operator.name(), "opened node");

        Ok(())
    }

    /// Pull the next batch from this node.
    pub fn next_batch(&mut self, ctx: &ExecutionContext) -> Result<PollPull> {
        match self.lifecycle {
            NodeLifecycle::Opened | NodeLifecycle::Draining => (),
            other => {
                return Err(ExecError::invariant("Pulled from a node that isn't open")
                    .with_field("node", self.id)
                    .with_field("lifecycle", format!("{other:?}")));
            }
        }

        if self.exhausted {
            return Ok(PollPull::Done(Batch::empty_terminal(self.next_row)));
        }
        self.lifecycle = NodeLifecycle::Draining;

        let batch_size = ctx.batch_size();
        let plan = self.plan.clone();
        let template = plan.node(self.id)?;

        loop {
            if self.operator_finished {
                if self.pending.len() > batch_size {
                    return Ok(PollPull::Ready(self.take_batch(batch_size, false)));
                }
                self.exhausted = true;
                let n = self.pending.len();
                return Ok(PollPull::Done(self.take_batch(n, true)));
            }

            if self.pending.len() >= batch_size {
                return Ok(PollPull::Ready(self.take_batch(batch_size, false)));
            }

            let state = self
                .state
                .as_mut()
                .ok_or_else(|| ExecError::invariant("Missing operator state"))?;

            match poll_operator(&template.operator, state, ctx, &mut self.children)? {
                PollOperator::Rows(rows) => self.pending.extend(rows),
                PollOperator::Finished => self.operator_finished = true,
                PollOperator::Blocked => {
                    if self.pending.is_empty() {
                        return Ok(PollPull::Blocked);
                    }
                    let n = self.pending.len();
                    return Ok(PollPull::Ready(self.take_batch(n, false)));
                }
            }
        }
    }

    fn take_batch(&mut self, n: usize, terminal: bool) -> Batch {
        let rows: Vec<Row> = self.pending.drain(..n).collect();
        let batch = Batch::new(self.next_row, rows, terminal);
        self.next_row = batch.end_row();
        batch
    }

    /// Release all state held by this node and its children.
    ///
    /// Safe to call in any state, and more than once.
    pub fn close(&mut self) {
        if self.lifecycle == NodeLifecycle::Closed {
            return;
        }

        if let Some(mut state) = self.state.take() {
            if let Ok(template) = self.plan.node(self.id) {
                state.close(&template.operator);
            }
        }
        for child in &mut self.children {
            child.close();
        }
        self.pending.clear();
        self.lifecycle = NodeLifecycle::Closed;
    }

    /// Return this node and its children to the unopened state.
    pub fn reset(&mut self) {
        self.close();
        for child in &mut self.children {
            child.reset();
        }
        self.lifecycle = NodeLifecycle::Unopened;
        self.next_row = 1;
        self.operator_finished = false;
        self.exhausted = false;
    }

    /// Create a new unopened instance of this node sharing no execution
    /// state.
    pub fn clone_plan(&self) -> Result<ExecNode> {
        ExecNode::instantiate(self.plan.clone(), self.id)
    }
}

impl Drop for ExecNode {
    fn drop(&mut self) {
        self.close();
    }
}
