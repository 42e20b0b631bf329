use std::cmp::Ordering;
use std::fmt;

use fedexec_error::{ExecError, Result};
use serde::{Deserialize, Serialize};

use crate::arrays::row::Row;
use crate::arrays::scalar::ScalarValue;

/// A filter built from dependent key values and pushed into a single source
/// request.
///
/// Column indices refer to the output columns of the access node receiving
/// the criteria. Multi-column criteria always list their columns in
/// ascending order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DependentCriteria {
    /// `col IN (v1, v2, ...)`
    InList {
        column: usize,
        values: Vec<ScalarValue>,
    },
    /// `(c1, c2) IN ((v1, v2), ...)`
    RowValueIn { columns: Vec<usize>, tuples: Vec<Row> },
    /// `c1 IN (...) AND c2 IN (...)`
    ///
    /// May match combinations of values that were never part of the key set.
    InListConjunction { lists: Vec<(usize, Vec<ScalarValue>)> },
    /// `(c1 = v1 AND c2 = v2) OR (c1 = v3 AND c2 = v4) ...`
    TupleDisjunction { columns: Vec<usize>, tuples: Vec<Row> },
    /// Semi-join against a temporary relation holding every key.
    TempRelation {
        name: String,
        columns: Vec<usize>,
        rows: Vec<Row>,
    },
}

impl DependentCriteria {
    /// Check if a row from the source satisfies this criteria.
    ///
    /// Null values never match.
    pub fn matches(&self, row: &Row) -> Result<bool> {
        match self {
            Self::InList { column, values } => {
                let v = column_value(row, *column)?;
                any_equal(v, values)
            }
            Self::RowValueIn { columns, tuples }
            | Self::TupleDisjunction { columns, tuples }
            | Self::TempRelation {
                columns,
                rows: tuples,
                ..
            } => {
                for tuple in tuples {
                    if tuple_matches(row, columns, tuple)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::InListConjunction { lists } => {
                for (column, values) in lists {
                    let v = column_value(row, *column)?;
                    if !any_equal(v, values)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Number of key tuples this criteria was built from.
    pub fn num_tuples(&self) -> usize {
        match self {
            Self::InList { values, .. } => values.len(),
            Self::RowValueIn { tuples, .. }
            | Self::TupleDisjunction { tuples, .. }
            | Self::TempRelation { rows: tuples, .. } => tuples.len(),
            Self::InListConjunction { lists } => lists
                .iter()
                .map(|(_, values)| values.len())
                .max()
                .unwrap_or(0),
        }
    }

    /// Values that are sent as bind parameters, in the order they are
    /// rendered.
    ///
    /// Temp relation rows are shipped as their own payload and never as
    /// parameters.
    pub fn bind_parameters(&self) -> Vec<ScalarValue> {
        match self {
            Self::InList { values, .. } => values.clone(),
            Self::RowValueIn { tuples, .. } | Self::TupleDisjunction { tuples, .. } => tuples
                .iter()
                .flat_map(|t| t.columns.iter().cloned())
                .collect(),
            Self::InListConjunction { lists } => lists
                .iter()
                .flat_map(|(_, values)| values.iter().cloned())
                .collect(),
            Self::TempRelation { .. } => Vec::new(),
        }
    }

    /// Name of the temp relation, if this criteria uses one.
    pub fn temp_relation(&self) -> Option<&str> {
        match self {
            Self::TempRelation { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Render the criteria as a predicate.
    ///
    /// If `params` is true, values are rendered as `?` placeholders.
    pub fn display<'a>(&'a self, names: &'a [String], params: bool) -> CriteriaDisplay<'a> {
        CriteriaDisplay {
            criteria: self,
            names,
            params,
        }
    }
}

fn column_value(row: &Row, column: usize) -> Result<&ScalarValue> {
    row.get(column).ok_or_else(|| {
        ExecError::invariant("Dependent criteria column out of bounds")
            .with_field("column", column)
            .with_field("arity", row.arity())
    })
}

fn any_equal(v: &ScalarValue, values: &[ScalarValue]) -> Result<bool> {
    if v.is_null() {
        return Ok(false);
    }
    for candidate in values {
        if v.sql_cmp(candidate)? == Some(Ordering::Equal) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn tuple_matches(row: &Row, columns: &[usize], tuple: &Row) -> Result<bool> {
    for (column, expected) in columns.iter().zip(&tuple.columns) {
        let v = column_value(row, *column)?;
        if v.sql_cmp(expected)? != Some(Ordering::Equal) {
            return Ok(false);
        }
    }
    Ok(true)
}

#[derive(Debug)]
pub struct CriteriaDisplay<'a> {
    criteria: &'a DependentCriteria,
    names: &'a [String],
    params: bool,
}

impl CriteriaDisplay<'_> {
    fn write_name(&self, f: &mut fmt::Formatter<'_>, column: usize) -> fmt::Result {
        match self.names.get(column) {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "#{column}"),
        }
    }

    fn write_value(&self, f: &mut fmt::Formatter<'_>, value: &ScalarValue) -> fmt::Result {
        if self.params {
            write!(f, "?")
        } else {
            write!(f, "{}", value.to_sql_literal())
        }
    }

    fn write_values(&self, f: &mut fmt::Formatter<'_>, values: &[ScalarValue]) -> fmt::Result {
        write!(f, "(")?;
        for (idx, v) in values.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            self.write_value(f, v)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for CriteriaDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.criteria {
            DependentCriteria::InList { column, values } => {
                self.write_name(f, *column)?;
                write!(f, " IN ")?;
                self.write_values(f, values)
            }
            DependentCriteria::RowValueIn { columns, tuples } => {
                write!(f, "(")?;
                for (idx, col) in columns.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    self.write_name(f, *col)?;
                }
                write!(f, ") IN (")?;
                for (idx, tuple) in tuples.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    self.write_values(f, &tuple.columns)?;
                }
                write!(f, ")")
            }
            DependentCriteria::InListConjunction { lists } => {
                for (idx, (column, values)) in lists.iter().enumerate() {
                    if idx > 0 {
                        write!(f, " AND ")?;
                    }
                    self.write_name(f, *column)?;
                    write!(f, " IN ")?;
                    self.write_values(f, values)?;
                }
                Ok(())
            }
            DependentCriteria::TupleDisjunction { columns, tuples } => {
                if tuples.len() > 1 {
                    write!(f, "(")?;
                }
                for (idx, tuple) in tuples.iter().enumerate() {
                    if idx > 0 {
                        write!(f, " OR ")?;
                    }
                    if columns.len() > 1 {
                        write!(f, "(")?;
                    }
                    for (col_idx, (column, value)) in columns.iter().zip(&tuple.columns).enumerate()
                    {
                        if col_idx > 0 {
                            write!(f, " AND ")?;
                        }
                        self.write_name(f, *column)?;
                        write!(f, " = ")?;
                        self.write_value(f, value)?;
                    }
                    if columns.len() > 1 {
                        write!(f, ")")?;
                    }
                }
                if tuples.len() > 1 {
                    write!(f, ")")?;
                }
                Ok(())
            }
            DependentCriteria::TempRelation { name, columns, .. } => {
                for (idx, column) in columns.iter().enumerate() {
                    if idx > 0 {
                        write!(f, " AND ")?;
                    }
                    self.write_name(f, *column)?;
                    write!(f, " = {name}.k{idx}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    fn names() -> Vec<String> {
        vec!["e1".to_string(), "e2".to_string()]
    }

    #[test]
    fn in_list_null_never_matches() {
        let c = DependentCriteria::InList {
            column: 0,
            values: vec![ScalarValue::Int32(1), ScalarValue::Null],
        };
        assert!(c.matches(&row![1, "a"]).unwrap());
        assert!(!c.matches(&row![ScalarValue::Null, "a"]).unwrap());
        assert!(!c.matches(&row![2, "a"]).unwrap());
    }

    #[test]
    fn conjunction_matches_cross_product() {
        let c = DependentCriteria::InListConjunction {
            lists: vec![
                (0, vec![1.into(), 2.into()]),
                (1, vec!["a".into(), "b".into()]),
            ],
        };
        // (1, 'b') may never have been a key, but still matches.
        assert!(c.matches(&row![1, "b"]).unwrap());
        assert!(!c.matches(&row![3, "a"]).unwrap());
    }

    #[test]
    fn render_in_list() {
        let c = DependentCriteria::InList {
            column: 1,
            values: vec!["a".into(), "b".into()],
        };
        assert_eq!("e2 IN ('a', 'b')", c.display(&names(), false).to_string());
        assert_eq!("e2 IN (?, ?)", c.display(&names(), true).to_string());
        assert_eq!(
            vec![ScalarValue::from("a"), ScalarValue::from("b")],
            c.bind_parameters()
        );
    }

    #[test]
    fn render_disjunction() {
        let c = DependentCriteria::TupleDisjunction {
            columns: vec![0, 1],
            tuples: vec![row![1, "a"], row![2, "b"]],
        };
        assert_eq!(
            "((e1 = 1 AND e2 = 'a') OR (e1 = 2 AND e2 = 'b'))",
            c.display(&names(), false).to_string()
        );
    }

    #[test]
    fn render_row_value_in() {
        let c = DependentCriteria::RowValueIn {
            columns: vec![0, 1],
            tuples: vec![row![1, "a"], row![2, "b"]],
        };
        assert_eq!(
            "(e1, e2) IN ((?, ?), (?, ?))",
            c.display(&names(), true).to_string()
        );
        assert_eq!(4, c.bind_parameters().len());
    }

    #[test]
    fn temp_relation_matches() {
        let c = DependentCriteria::TempRelation {
            name: "#dep_3".to_string(),
            columns: vec![0, 1],
            rows: vec![row![1, "a"]],
        };
        assert!(c.matches(&row![1, "a"]).unwrap());
        assert!(!c.matches(&row![1, "b"]).unwrap());
        assert!(c.bind_parameters().is_empty());
        assert_eq!(
            "e1 = #dep_3.k0 AND e2 = #dep_3.k1",
            c.display(&names(), false).to_string()
        );
    }
}
