use std::fmt;

use serde::{Deserialize, Serialize};

use super::scalar::ScalarValue;

/// A single fixed-arity tuple of values.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Row {
    pub columns: Vec<ScalarValue>,
}

impl Row {
    pub fn new(columns: Vec<ScalarValue>) -> Self {
        Row { columns }
    }

    /// Create a row containing `n` nulls.
    pub fn new_null(n: usize) -> Self {
        Row {
            columns: vec![ScalarValue::Null; n],
        }
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn get(&self, idx: usize) -> Option<&ScalarValue> {
        self.columns.get(idx)
    }

    /// Concatenate two rows, `self` first.
    pub fn concat(&self, other: &Row) -> Row {
        let mut columns = Vec::with_capacity(self.arity() + other.arity());
        columns.extend_from_slice(&self.columns);
        columns.extend_from_slice(&other.columns);
        Row { columns }
    }

    /// Produce a new row containing only the values at the given indices.
    ///
    /// Returns None if any index is out of bounds.
    pub fn project(&self, indices: &[usize]) -> Option<Row> {
        let columns = indices
            .iter()
            .map(|&idx| self.columns.get(idx).cloned())
            .collect::<Option<Vec<_>>>()?;
        Some(Row { columns })
    }

    /// If any value in the row is null.
    pub fn has_null(&self) -> bool {
        self.columns.iter().any(|v| v.is_null())
    }
}

impl FromIterator<ScalarValue> for Row {
    fn from_iter<T: IntoIterator<Item = ScalarValue>>(iter: T) -> Self {
        Row {
            columns: iter.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[ScalarValue; N]> for Row {
    fn from(value: [ScalarValue; N]) -> Self {
        Row {
            columns: value.into(),
        }
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (idx, val) in self.columns.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", val.to_sql_literal())?;
        }
        write!(f, ")")
    }
}

/// Create a row from a list of values convertible to scalars.
///
/// ```
/// use fedexec_core::row;
/// use fedexec_core::arrays::scalar::ScalarValue;
///
/// let r = row![1, "a", ScalarValue::Null];
/// assert_eq!(3, r.arity());
/// ```
#[macro_export]
macro_rules! row {
    ($($val:expr),* $(,)?) => {
        $crate::arrays::row::Row::new(vec![
            $($crate::arrays::scalar::ScalarValue::from($val)),*
        ])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_out_of_bounds() {
        let r = crate::row![1, 2];
        assert_eq!(Some(crate::row![2, 1]), r.project(&[1, 0]));
        assert_eq!(None, r.project(&[2]));
    }

    #[test]
    fn display_quotes_strings() {
        let r = crate::row![1, "a", ScalarValue::Null];
        assert_eq!("(1, 'a', NULL)", r.to_string());
    }
}
