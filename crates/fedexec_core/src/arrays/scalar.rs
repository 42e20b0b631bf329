use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use fedexec_error::{ExecError, Result};
use serde::{Deserialize, Serialize};

use super::datatype::DataType;

/// A single owned value.
///
/// Equality, hashing and ordering are total so that values can be used as
/// keys when de-duplicating and grouping. Int32 and Int64 values with the same
/// numeric value compare equal. SQL comparison semantics (NULL handling,
/// numeric coercion) are provided by `sql_cmp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl ScalarValue {
    pub fn datatype(&self) -> DataType {
        match self {
            Self::Null => DataType::Null,
            Self::Boolean(_) => DataType::Boolean,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Utf8(_) => DataType::Utf8,
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Rank used to order values of different types.
    const fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Int32(_) | Self::Int64(_) => 2,
            Self::Float64(_) => 3,
            Self::Utf8(_) => 4,
        }
    }

    fn normalized_float(v: f64) -> f64 {
        if v == 0.0 {
            0.0
        } else if v.is_nan() {
            f64::NAN
        } else {
            v
        }
    }

    pub fn try_as_bool(&self) -> Result<bool> {
        match self {
            Self::Boolean(v) => Ok(*v),
            other => Err(ExecError::processing(format!(
                "Expected a boolean value, got {}",
                other.datatype()
            ))),
        }
    }

    pub fn try_as_i64(&self) -> Result<i64> {
        match self {
            Self::Int32(v) => Ok(*v as i64),
            Self::Int64(v) => Ok(*v),
            other => Err(ExecError::processing(format!(
                "Expected an integer value, got {}",
                other.datatype()
            ))),
        }
    }

    pub fn try_as_f64(&self) -> Result<f64> {
        match self {
            Self::Int32(v) => Ok(*v as f64),
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) => Ok(*v),
            other => Err(ExecError::processing(format!(
                "Expected a numeric value, got {}",
                other.datatype()
            ))),
        }
    }

    pub fn try_as_str(&self) -> Result<&str> {
        match self {
            Self::Utf8(v) => Ok(v.as_str()),
            other => Err(ExecError::processing(format!(
                "Expected a string value, got {}",
                other.datatype()
            ))),
        }
    }

    /// Compare two values using SQL semantics.
    ///
    /// Returns `None` if either value is NULL. Integers and floats are
    /// compared numerically. Comparing incompatible types is a processing
    /// error.
    pub fn sql_cmp(&self, other: &ScalarValue) -> Result<Option<Ordering>> {
        let ord = match (self, other) {
            (Self::Null, _) | (_, Self::Null) => return Ok(None),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Utf8(a), Self::Utf8(b)) => a.cmp(b),
            (a, b) if a.datatype().is_integer() && b.datatype().is_integer() => {
                a.try_as_i64()?.cmp(&b.try_as_i64()?)
            }
            (a, b) if a.datatype().is_numeric() && b.datatype().is_numeric() => {
                let a = a.try_as_f64()?;
                let b = b.try_as_f64()?;
                a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
            }
            (a, b) => {
                return Err(ExecError::processing(format!(
                    "Cannot compare {} with {}",
                    a.datatype(),
                    b.datatype()
                )));
            }
        };

        Ok(Some(ord))
    }

    /// Format the value as a SQL literal, quoting strings.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::Utf8(s) => format!("'{}'", s.replace('\'', "''")),
            other => other.to_string(),
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScalarValue {}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScalarValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.type_rank().cmp(&other.type_rank()) {
            Ordering::Equal => (),
            ord => return ord,
        }

        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Int32(a), Self::Int32(b)) => a.cmp(b),
            (Self::Int32(a), Self::Int64(b)) => (*a as i64).cmp(b),
            (Self::Int64(a), Self::Int32(b)) => a.cmp(&(*b as i64)),
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Float64(a), Self::Float64(b)) => {
                Self::normalized_float(*a).total_cmp(&Self::normalized_float(*b))
            }
            (Self::Utf8(a), Self::Utf8(b)) => a.cmp(b),
            // Only remaining same-rank case.
            _ => Ordering::Equal,
        }
    }
}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            Self::Null => (),
            Self::Boolean(v) => v.hash(state),
            Self::Int32(v) => (*v as i64).hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => Self::normalized_float(*v).to_bits().hash(state),
            Self::Utf8(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Boolean(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int32(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int64(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float64(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Utf8(value)
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => ScalarValue::Null,
        }
    }
}
