use std::fmt;

use fedexec_error::{ExecError, Result};
use serde::{Deserialize, Serialize};

use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOperator {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOperator {
    /// Output type of this operator for the given input types.
    pub fn return_type(self, left: DataType, right: DataType) -> Result<DataType> {
        match (left, right) {
            (DataType::Null, other) | (other, DataType::Null) if other.is_numeric() => Ok(other),
            (DataType::Null, DataType::Null) => Ok(DataType::Null),
            (DataType::Int32, DataType::Int32) => Ok(DataType::Int32),
            (l, r) if l.is_integer() && r.is_integer() => Ok(DataType::Int64),
            (l, r) if l.is_numeric() && r.is_numeric() => Ok(DataType::Float64),
            (l, r) => Err(ExecError::processing(format!(
                "Cannot apply '{self}' to {l} and {r}"
            ))),
        }
    }

    /// Apply the operator to two values. Null inputs produce null.
    ///
    /// Integer overflow and division by zero are processing errors.
    pub fn eval(self, left: &ScalarValue, right: &ScalarValue) -> Result<ScalarValue> {
        if left.is_null() || right.is_null() {
            return Ok(ScalarValue::Null);
        }

        match self.return_type(left.datatype(), right.datatype())? {
            DataType::Int32 => {
                let l = left.try_as_i64()? as i32;
                let r = right.try_as_i64()? as i32;
                let out = match self {
                    Self::Add => l.checked_add(r),
                    Self::Sub => l.checked_sub(r),
                    Self::Mul => l.checked_mul(r),
                    Self::Div => {
                        if r == 0 {
                            return Err(ExecError::processing("Division by zero"));
                        }
                        l.checked_div(r)
                    }
                };
                out.map(ScalarValue::Int32)
                    .ok_or_else(|| self.overflow_error(left, right))
            }
            DataType::Int64 => {
                let l = left.try_as_i64()?;
                let r = right.try_as_i64()?;
                let out = match self {
                    Self::Add => l.checked_add(r),
                    Self::Sub => l.checked_sub(r),
                    Self::Mul => l.checked_mul(r),
                    Self::Div => {
                        if r == 0 {
                            return Err(ExecError::processing("Division by zero"));
                        }
                        l.checked_div(r)
                    }
                };
                out.map(ScalarValue::Int64)
                    .ok_or_else(|| self.overflow_error(left, right))
            }
            _ => {
                let l = left.try_as_f64()?;
                let r = right.try_as_f64()?;
                let out = match self {
                    Self::Add => l + r,
                    Self::Sub => l - r,
                    Self::Mul => l * r,
                    Self::Div => {
                        if r == 0.0 {
                            return Err(ExecError::processing("Division by zero"));
                        }
                        l / r
                    }
                };
                Ok(ScalarValue::Float64(out))
            }
        }
    }

    fn overflow_error(self, left: &ScalarValue, right: &ScalarValue) -> ExecError {
        ExecError::processing("Integer overflow")
            .with_field("operator", self)
            .with_field("left", left)
            .with_field("right", right)
    }
}

impl fmt::Display for ArithOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "+"),
            Self::Sub => write!(f, "-"),
            Self::Mul => write!(f, "*"),
            Self::Div => write!(f, "/"),
        }
    }
}
