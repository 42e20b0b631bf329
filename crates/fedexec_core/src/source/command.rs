use std::fmt;

use serde::{Deserialize, Serialize};

use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;
use crate::dependent::criteria::DependentCriteria;
use crate::expr::Expression;
use crate::expr::sort::SortExpression;

/// A single-source query pushed to the data manager.
///
/// All expressions and criteria reference columns by their position in
/// `columns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicCommand {
    pub source: String,
    pub relation: String,
    pub columns: Vec<String>,
    pub column_types: Vec<DataType>,
    pub filter: Option<Expression>,
    /// Criteria built from dependent join values, ANDed with the filter.
    pub dependent: Vec<DependentCriteria>,
    pub order_by: Vec<SortExpression>,
    /// Render dependent values as `?` placeholders.
    pub use_bind_parameters: bool,
}

impl AtomicCommand {
    pub fn new(
        source: impl Into<String>,
        relation: impl Into<String>,
        columns: Vec<String>,
        column_types: Vec<DataType>,
    ) -> Self {
        AtomicCommand {
            source: source.into(),
            relation: relation.into(),
            columns,
            column_types,
            filter: None,
            dependent: Vec::new(),
            order_by: Vec::new(),
            use_bind_parameters: false,
        }
    }

    /// Values to send alongside the command when using bind parameters.
    pub fn bind_parameters(&self) -> Vec<ScalarValue> {
        if !self.use_bind_parameters {
            return Vec::new();
        }
        self.dependent
            .iter()
            .flat_map(|c| c.bind_parameters())
            .collect()
    }

    pub fn has_dependent_criteria(&self) -> bool {
        !self.dependent.is_empty()
    }
}

impl fmt::Display for AtomicCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT {} FROM {}", self.columns.join(", "), self.relation)?;

        for c in &self.dependent {
            if let Some(name) = c.temp_relation() {
                write!(f, " JOIN {name} ON {}", c.display(&self.columns, false))?;
            }
        }

        let mut wrote_where = false;
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {}", filter.display_with_names(&self.columns))?;
            wrote_where = true;
        }
        for c in self.dependent.iter().filter(|c| c.temp_relation().is_none()) {
            if wrote_where {
                write!(f, " AND ")?;
            } else {
                write!(f, " WHERE ")?;
                wrote_where = true;
            }
            write!(f, "{}", c.display(&self.columns, self.use_bind_parameters))?;
        }

        if !self.order_by.is_empty() {
            write!(f, " ORDER BY ")?;
            for (idx, sort) in self.order_by.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", sort.expr.display_with_names(&self.columns))?;
                if sort.desc {
                    write!(f, " DESC")?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{col, eq, lit};
    use crate::row;

    fn command() -> AtomicCommand {
        AtomicCommand::new(
            "pm1",
            "pm1.g1",
            vec!["e1".to_string(), "e2".to_string()],
            vec![DataType::Utf8, DataType::Int32],
        )
    }

    #[test]
    fn render_plain() {
        let mut cmd = command();
        cmd.order_by = vec![SortExpression::asc(col(0))];
        assert_eq!("SELECT e1, e2 FROM pm1.g1 ORDER BY e1", cmd.to_string());
    }

    #[test]
    fn render_with_params() {
        let mut cmd = command();
        cmd.filter = Some(eq(col(1), lit(3)));
        cmd.dependent = vec![DependentCriteria::InList {
            column: 0,
            values: vec!["a".into(), "b".into()],
        }];
        cmd.use_bind_parameters = true;
        assert_eq!(
            "SELECT e1, e2 FROM pm1.g1 WHERE e2 = 3 AND e1 IN (?, ?)",
            cmd.to_string()
        );
        assert_eq!(
            vec![ScalarValue::from("a"), ScalarValue::from("b")],
            cmd.bind_parameters()
        );
    }

    #[test]
    fn render_temp_relation() {
        let mut cmd = command();
        cmd.dependent = vec![DependentCriteria::TempRelation {
            name: "#dep_1".to_string(),
            columns: vec![0],
            rows: vec![row!["a"]],
        }];
        assert_eq!(
            "SELECT e1, e2 FROM pm1.g1 JOIN #dep_1 ON e1 = #dep_1.k0",
            cmd.to_string()
        );
    }
}
