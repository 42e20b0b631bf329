pub mod context;
pub mod node;
pub mod operators;
pub mod plan;
pub mod poll;
