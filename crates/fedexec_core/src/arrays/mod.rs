pub mod batch;
pub mod datatype;
pub mod row;
pub mod scalar;
