//! Execution core of a federated query engine.
//!
//! Plans are trees of relational nodes pulled in batches. Leaves push
//! commands to external sources through a `DataManager`. Joins may be
//! executed as dependent joins, where key values harvested from one side are
//! pushed as criteria into the source feeding the other side.

pub mod arrays;
pub mod buffer;
pub mod config;
pub mod dependent;
pub mod execution;
pub mod explain;
pub mod expr;
pub mod planner;
pub mod processor;
pub mod source;
