//! Drives a finalized plan to completion.

use std::sync::Arc;
use std::time::Duration;

use fedexec_error::{ExecError, Result};
use tracing::{debug, warn};

use crate::arrays::batch::Batch;
use crate::arrays::datatype::DataType;
use crate::arrays::row::Row;
use crate::buffer::TupleBuffer;
use crate::execution::context::ExecutionContext;
use crate::execution::node::ExecNode;
use crate::execution::plan::PhysicalPlan;
use crate::execution::poll::PollPull;
use crate::expr::CorrelatedBindings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Running,
    Complete,
    Failed,
}

/// Pulls batches from the root of a plan into a result buffer.
///
/// Rows delivered before a failure are kept in the buffer.
#[derive(Debug)]
pub struct QueryProcessor {
    ctx: ExecutionContext,
    root: ExecNode,
    results: TupleBuffer,
    state: ProcessorState,
    opened: bool,
}

impl QueryProcessor {
    pub fn try_new(plan: Arc<PhysicalPlan>, ctx: ExecutionContext) -> Result<Self> {
        let root = plan.instantiate()?;
        let results = TupleBuffer::new(&ctx.buffer_manager);
        Ok(QueryProcessor {
            ctx,
            root,
            results,
            state: ProcessorState::Running,
            opened: false,
        })
    }

    pub fn output_types(&self) -> Result<&[DataType]> {
        self.root.output_types()
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Rows received so far.
    pub fn rows(&self) -> &[Row] {
        self.results.rows()
    }

    pub fn into_rows(mut self) -> Vec<Row> {
        self.results.take_rows()
    }

    /// Pull a single batch from the plan.
    pub fn poll_step(&mut self) -> Result<PollPull> {
        match self.state {
            ProcessorState::Running => (),
            ProcessorState::Complete => {
                let next_row = self.results.len() + 1;
                return Ok(PollPull::Done(Batch::empty_terminal(next_row)));
            }
            ProcessorState::Failed => {
                return Err(ExecError::new("Query previously failed"));
            }
        }

        match self.step_inner() {
            Ok(poll) => Ok(poll),
            Err(e) => {
                warn!(
                    request_id = %self.ctx.request_id,
                    rows = self.results.len(),
                    error = %e,
                    "query failed"
                );
                self.state = ProcessorState::Failed;
                self.root.close();
                Err(e)
            }
        }
    }

    fn step_inner(&mut self) -> Result<PollPull> {
        if !self.opened {
            self.root.open(&self.ctx)?;
            self.opened = true;
        }

        let poll = self.root.next_batch(&self.ctx)?;
        match &poll {
            PollPull::Ready(batch) => self.results.append_all(batch.rows.iter().cloned())?,
            PollPull::Done(batch) => {
                self.results.append_all(batch.rows.iter().cloned())?;
                self.results.finalize();
                self.state = ProcessorState::Complete;
                self.root.close();
                debug!(
                    request_id = %self.ctx.request_id,
                    rows = self.results.len(),
                    "query complete"
                );
            }
            PollPull::Blocked => (),
        }
        Ok(poll)
    }

    /// Run the plan to completion, waiting between blocked polls.
    pub fn run(&mut self) -> Result<&[Row]> {
        let wait = Duration::from_millis(self.ctx.config.blocked_retry_interval_ms);
        loop {
            match self.poll_step()? {
                PollPull::Done(_) => return Ok(self.results.rows()),
                PollPull::Blocked => {
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                }
                PollPull::Ready(_) => (),
            }
        }
    }

    /// Return the plan to its initial state so it can be run again.
    pub fn reset(&mut self) {
        self.root.reset();
        self.results.clear();
        self.state = ProcessorState::Running;
        self.opened = false;
    }

    /// Reset and replace the correlated values used by the plan.
    pub fn rebind(&mut self, bindings: CorrelatedBindings) {
        self.reset();
        self.ctx = self.ctx.clone().with_correlated(bindings);
    }
}
