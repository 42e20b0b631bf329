use crate::arrays::batch::Batch;
use crate::arrays::row::Row;

/// Result of pulling the next batch from a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollPull {
    /// A non-terminal batch.
    Ready(Batch),
    /// No batch currently available. The same call should be retried later,
    /// no state was lost.
    Blocked,
    /// The terminal batch. May be empty. Every later pull returns an empty
    /// terminal batch.
    Done(Batch),
}

impl PollPull {
    pub fn is_blocked(&self) -> bool {
        matches!(self, PollPull::Blocked)
    }

    pub fn batch(&self) -> Option<&Batch> {
        match self {
            PollPull::Ready(b) | PollPull::Done(b) => Some(b),
            PollPull::Blocked => None,
        }
    }
}

/// Result of polling a single operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOperator {
    /// Rows were produced, the operator may have more. May be empty.
    Rows(Vec<Row>),
    /// The operator can't make progress right now.
    Blocked,
    /// The operator will produce no more rows.
    Finished,
}
