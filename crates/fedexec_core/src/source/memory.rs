//! An in-memory data manager.
//!
//! Evaluates atomic commands against tables held in memory, and records
//! every request for inspection.

use std::sync::Arc;

use ahash::HashMap;
use fedexec_error::{ExecError, Result};
use parking_lot::Mutex;
use tracing::trace;

use super::capabilities::{CapabilitiesFinder, NullOrder, SourceCapabilities};
use super::command::AtomicCommand;
use super::{DataManager, PollSource, RequestContext, TupleSource};
use crate::arrays::datatype::DataType;
use crate::arrays::row::Row;
use crate::arrays::scalar::ScalarValue;
use crate::expr::CorrelatedBindings;
use crate::expr::sort::{SortExpression, compare_sort_keys, eval_sort_keys};

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTable {
    pub columns: Vec<String>,
    pub types: Vec<DataType>,
    pub rows: Vec<Row>,
}

impl MemoryTable {
    pub fn new<S: Into<String>>(
        columns: impl IntoIterator<Item = (S, DataType)>,
        rows: Vec<Row>,
    ) -> Self {
        let (columns, types) = columns.into_iter().map(|(n, t)| (n.into(), t)).unzip();
        MemoryTable {
            columns,
            types,
            rows,
        }
    }
}

/// How a source should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Registering a request fails.
    OnRegister,
    /// Polling fails after the given number of rows were returned.
    AfterRows(usize),
}

/// A request registered with the data manager.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    pub request_num: usize,
    pub node_id: usize,
    pub source: String,
    pub command: AtomicCommand,
    /// Rendered form of the command.
    pub sql: String,
    pub params: Vec<ScalarValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEvent {
    Opened(usize),
    Closed(usize),
}

#[derive(Debug, Default)]
struct MemorySource {
    caps: SourceCapabilities,
    tables: HashMap<String, MemoryTable>,
    failure: Option<FailureMode>,
}

#[derive(Debug, Default)]
struct State {
    sources: HashMap<String, MemorySource>,
    commands: Vec<RecordedCommand>,
    events: Vec<RequestEvent>,
    open: usize,
    max_open: usize,
    /// Alternate between blocked and ready on every poll.
    blocking: bool,
    /// Max rows returned from a single poll.
    rows_per_poll: usize,
}

#[derive(Debug, Clone)]
pub struct MemoryDataManager {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryDataManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDataManager {
    pub fn new() -> Self {
        MemoryDataManager {
            state: Arc::new(Mutex::new(State {
                rows_per_poll: 1024,
                ..Default::default()
            })),
        }
    }

    pub fn add_source(&self, name: impl Into<String>, caps: SourceCapabilities) {
        self.state.lock().sources.insert(
            name.into(),
            MemorySource {
                caps,
                ..Default::default()
            },
        );
    }

    /// Add a table to a source, creating the source with default
    /// capabilities if needed.
    pub fn add_table(&self, source: &str, relation: impl Into<String>, table: MemoryTable) {
        self.state
            .lock()
            .sources
            .entry(source.to_string())
            .or_default()
            .tables
            .insert(relation.into(), table);
    }

    pub fn set_failure(&self, source: &str, mode: Option<FailureMode>) {
        self.state
            .lock()
            .sources
            .entry(source.to_string())
            .or_default()
            .failure = mode;
    }

    /// Make every tuple source alternate between blocked and ready polls.
    pub fn set_blocking(&self, blocking: bool) {
        self.state.lock().blocking = blocking;
    }

    pub fn set_rows_per_poll(&self, rows: usize) {
        self.state.lock().rows_per_poll = rows.max(1);
    }

    /// All commands registered so far.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.state.lock().commands.clone()
    }

    /// Commands registered against a single relation.
    pub fn commands_for(&self, relation: &str) -> Vec<RecordedCommand> {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| c.command.relation == relation)
            .cloned()
            .collect()
    }

    pub fn events(&self) -> Vec<RequestEvent> {
        self.state.lock().events.clone()
    }

    /// Number of requests currently open.
    pub fn open_requests(&self) -> usize {
        self.state.lock().open
    }

    /// Max number of requests open at the same time.
    pub fn max_open_requests(&self) -> usize {
        self.state.lock().max_open
    }

    pub fn total_requests(&self) -> usize {
        self.state.lock().commands.len()
    }

    /// Clear recorded commands and events.
    pub fn clear_history(&self) {
        let mut state = self.state.lock();
        state.commands.clear();
        state.events.clear();
        state.max_open = state.open;
    }

    fn execute(table: &MemoryTable, caps: &SourceCapabilities, command: &AtomicCommand) -> Result<Vec<Row>> {
        let indices = command
            .columns
            .iter()
            .map(|name| {
                table.columns.iter().position(|c| c == name).ok_or_else(|| {
                    ExecError::component("Unknown column")
                        .with_field("relation", &command.relation)
                        .with_field("column", name)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let bindings = CorrelatedBindings::new();
        let mut rows = Vec::new();
        'rows: for row in &table.rows {
            let row = row
                .project(&indices)
                .ok_or_else(|| ExecError::component("Table row has unexpected arity"))?;
            if let Some(filter) = &command.filter {
                if !filter.eval_predicate(&row, &bindings)? {
                    continue;
                }
            }
            for criteria in &command.dependent {
                if !criteria.matches(&row)? {
                    continue 'rows;
                }
            }
            rows.push(row);
        }

        if !command.order_by.is_empty() {
            // Null placement is decided by the source, not the command.
            let order_by: Vec<_> = command
                .order_by
                .iter()
                .map(|s| SortExpression {
                    expr: s.expr.clone(),
                    desc: s.desc,
                    nulls_first: (caps.null_order == NullOrder::Low) != s.desc,
                })
                .collect();
            let mut keyed = rows
                .into_iter()
                .map(|row| Ok((eval_sort_keys(&order_by, &row, &bindings)?, row)))
                .collect::<Result<Vec<_>>>()?;
            keyed.sort_by(|(a, _), (b, _)| compare_sort_keys(&order_by, a, b));
            rows = keyed.into_iter().map(|(_, row)| row).collect();
        }

        Ok(rows)
    }
}

impl CapabilitiesFinder for MemoryDataManager {
    fn find_capabilities(&self, source: &str) -> Option<SourceCapabilities> {
        self.state.lock().sources.get(source).map(|s| s.caps.clone())
    }
}

impl DataManager for MemoryDataManager {
    fn register_request(
        &self,
        context: &RequestContext,
        command: AtomicCommand,
        source_name: &str,
        params: Vec<ScalarValue>,
    ) -> Result<Box<dyn TupleSource>> {
        let mut state = self.state.lock();

        let source = state
            .sources
            .get(source_name)
            .ok_or_else(|| ExecError::component("Unknown source").with_field("source", source_name))?;

        if source.failure == Some(FailureMode::OnRegister) {
            return Err(ExecError::component("Source request failed").with_field("source", source_name));
        }
        let fail_after = match source.failure {
            Some(FailureMode::AfterRows(n)) => Some(n),
            _ => None,
        };

        if command.has_dependent_criteria() && !source.caps.supports_dependent_criteria() {
            return Err(ExecError::component("Source does not accept dependent criteria")
                .with_field("source", source_name));
        }

        let table = source.tables.get(&command.relation).ok_or_else(|| {
            ExecError::component("Unknown relation")
                .with_field("source", source_name)
                .with_field("relation", &command.relation)
        })?;

        let rows = Self::execute(table, &source.caps, &command)?;

        let request_num = state.commands.len();
        let sql = command.to_string();
        trace!(%sql, request_num, node_id = context.node_id, "registered memory request");

        state.commands.push(RecordedCommand {
            request_num,
            node_id: context.node_id,
            source: source_name.to_string(),
            command,
            sql,
            params,
        });
        state.events.push(RequestEvent::Opened(request_num));
        state.open += 1;
        state.max_open = state.max_open.max(state.open);

        Ok(Box::new(MemoryTupleSource {
            request_num,
            rows,
            pos: 0,
            rows_per_poll: state.rows_per_poll,
            blocking: state.blocking,
            blocked_last: false,
            fail_after,
            closed: false,
            state: self.state.clone(),
        }))
    }
}

#[derive(Debug)]
struct MemoryTupleSource {
    request_num: usize,
    rows: Vec<Row>,
    pos: usize,
    rows_per_poll: usize,
    blocking: bool,
    blocked_last: bool,
    fail_after: Option<usize>,
    closed: bool,
    state: Arc<Mutex<State>>,
}

impl TupleSource for MemoryTupleSource {
    fn poll_next(&mut self) -> Result<PollSource> {
        if self.closed {
            return Err(ExecError::invariant("Polled a closed tuple source"));
        }

        if self.blocking && !self.blocked_last {
            self.blocked_last = true;
            return Ok(PollSource::Blocked);
        }
        self.blocked_last = false;

        let mut end = (self.pos + self.rows_per_poll).min(self.rows.len());
        if let Some(fail_after) = self.fail_after {
            if self.pos >= fail_after {
                return Err(ExecError::component("Source failed while reading")
                    .with_field("request", self.request_num));
            }
            end = end.min(fail_after);
        }

        if self.pos >= self.rows.len() {
            return Ok(PollSource::Exhausted);
        }

        let rows = self.rows[self.pos..end].to_vec();
        self.pos = end;
        Ok(PollSource::Rows(rows))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.state.lock();
        state.open = state.open.saturating_sub(1);
        state.events.push(RequestEvent::Closed(self.request_num));
    }
}

impl Drop for MemoryTupleSource {
    fn drop(&mut self) {
        self.close();
    }
}
