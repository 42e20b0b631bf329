use fedexec_error::Result;
use tracing::debug;

use super::ExecuteOperator;
use crate::arrays::datatype::DataType;
use crate::execution::context::ExecutionContext;
use crate::execution::node::ExecNode;
use crate::execution::plan::NodeId;
use crate::execution::poll::PollOperator;
use crate::explain::{ExplainEntry, Explainable};
use crate::expr::Expression;
use crate::expr::sort::SortExpression;
use crate::planner::statistics::TableStatistics;
use crate::source::command::AtomicCommand;
use crate::source::{PollSource, RequestContext, TupleSource};

/// Reads rows from a single relation in a source.
///
/// A request is registered with the data manager when the node is opened,
/// carrying any dependent criteria the context holds for this node.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalAccess {
    pub source: String,
    pub relation: String,
    pub columns: Vec<String>,
    pub column_types: Vec<DataType>,
    /// Filter pushed to the source, referencing `columns` by position.
    pub filter: Option<Expression>,
    /// Ordering requested from the source.
    pub order_by: Vec<SortExpression>,
    pub statistics: TableStatistics,
}

impl PhysicalAccess {
    pub fn new<S: Into<String>>(
        source: impl Into<String>,
        relation: impl Into<String>,
        columns: impl IntoIterator<Item = (S, DataType)>,
    ) -> Self {
        let (columns, column_types): (Vec<String>, Vec<DataType>) =
            columns.into_iter().map(|(n, t)| (n.into(), t)).unzip();
        let statistics = TableStatistics::unknown(columns.len());
        PhysicalAccess {
            source: source.into(),
            relation: relation.into(),
            columns,
            column_types,
            filter: None,
            order_by: Vec::new(),
            statistics,
        }
    }

    pub fn with_filter(mut self, filter: Expression) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_statistics(mut self, statistics: TableStatistics) -> Self {
        self.statistics = statistics;
        self
    }

    /// Build the command sent to the data manager.
    pub fn build_command(&self, ctx: &ExecutionContext, id: NodeId) -> Result<AtomicCommand> {
        let filter = self
            .filter
            .as_ref()
            .map(|f| f.bind_correlated(&ctx.correlated))
            .transpose()?;
        let dependent = ctx.dependent_criteria(id).to_vec();
        let caps = ctx.capabilities.capabilities_or_default(&self.source);

        Ok(AtomicCommand {
            source: self.source.clone(),
            relation: self.relation.clone(),
            columns: self.columns.clone(),
            column_types: self.column_types.clone(),
            filter,
            use_bind_parameters: caps.supports_bind_parameters && !dependent.is_empty(),
            dependent,
            order_by: self.order_by.clone(),
        })
    }
}

#[derive(Debug)]
pub struct AccessState {
    source: Box<dyn TupleSource>,
    finished: bool,
}

impl ExecuteOperator for PhysicalAccess {
    type State = AccessState;

    fn create_state(&self, ctx: &ExecutionContext, id: NodeId) -> Result<Self::State> {
        let command = self.build_command(ctx, id)?;
        let params = command.bind_parameters();
        debug!(
            node = id,
            source = %self.source,
            dependent = command.dependent.len(),
            command = %command,
            "registering source request"
        );

        let request = RequestContext {
            request_id: ctx.request_id,
            node_id: id,
        };
        let source = ctx
            .data_manager
            .register_request(&request, command, &self.source, params)?;

        Ok(AccessState {
            source,
            finished: false,
        })
    }

    fn poll_execute(
        &self,
        _ctx: &ExecutionContext,
        state: &mut Self::State,
        _children: &mut [ExecNode],
    ) -> Result<PollOperator> {
        if state.finished {
            return Ok(PollOperator::Finished);
        }

        match state.source.poll_next()? {
            PollSource::Rows(rows) => Ok(PollOperator::Rows(rows)),
            PollSource::Blocked => Ok(PollOperator::Blocked),
            PollSource::Exhausted => {
                state.finished = true;
                state.source.close();
                Ok(PollOperator::Finished)
            }
        }
    }

    fn close(&self, state: &mut Self::State) {
        state.source.close();
    }
}

impl Explainable for PhysicalAccess {
    fn explain_entry(&self) -> ExplainEntry {
        let mut ent = ExplainEntry::new("Access")
            .with_value("source", &self.source)
            .with_value("relation", &self.relation)
            .with_values("columns", &self.columns);
        if let Some(filter) = &self.filter {
            ent = ent.with_value("filter", filter.display_with_names(&self.columns));
        }
        if !self.order_by.is_empty() {
            ent = ent.with_values(
                "order_by",
                self.order_by
                    .iter()
                    .map(|s| s.expr.display_with_names(&self.columns).to_string()),
            );
        }
        ent
    }
}
