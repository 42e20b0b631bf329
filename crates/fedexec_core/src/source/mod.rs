//! Interfaces to the data sources queried by access nodes.

pub mod capabilities;
pub mod command;
pub mod memory;

use std::fmt::Debug;

use fedexec_error::Result;
use uuid::Uuid;

use self::command::AtomicCommand;
use crate::arrays::row::Row;
use crate::arrays::scalar::ScalarValue;

/// Identifies the query a source request belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: Uuid,
    /// Id of the access node issuing the request.
    pub node_id: usize,
}

/// Result of polling a tuple source.
#[derive(Debug, Clone, PartialEq)]
pub enum PollSource {
    /// Some rows are available. May be empty.
    Rows(Vec<Row>),
    /// No rows are currently available, poll again later.
    Blocked,
    /// The source has no more rows.
    Exhausted,
}

/// Rows returned from a single registered request.
pub trait TupleSource: Debug + Send {
    fn poll_next(&mut self) -> Result<PollSource>;

    /// Release the request. Further polls are not allowed.
    ///
    /// Must be idempotent.
    fn close(&mut self);
}

/// Executes atomic commands against sources.
pub trait DataManager: Debug + Sync + Send {
    fn register_request(
        &self,
        context: &RequestContext,
        command: AtomicCommand,
        source_name: &str,
        params: Vec<ScalarValue>,
    ) -> Result<Box<dyn TupleSource>>;
}
