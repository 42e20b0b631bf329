use std::cmp::Ordering;
use std::fmt;

use fedexec_error::Result;
use serde::{Deserialize, Serialize};

use super::{CorrelatedBindings, Expression};
use crate::arrays::row::Row;
use crate::arrays::scalar::ScalarValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortExpression {
    pub expr: Expression,
    pub desc: bool,
    pub nulls_first: bool,
}

impl SortExpression {
    /// Ascending sort with nulls first.
    pub fn asc(expr: Expression) -> Self {
        SortExpression {
            expr,
            desc: false,
            nulls_first: true,
        }
    }

    pub fn desc(expr: Expression) -> Self {
        SortExpression {
            expr,
            desc: true,
            nulls_first: false,
        }
    }
}

impl fmt::Display for SortExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.expr,
            if self.desc { "DESC" } else { "ASC" },
            if self.nulls_first {
                "NULLS FIRST"
            } else {
                "NULLS LAST"
            }
        )
    }
}

/// Evaluate the sort keys for a row.
pub fn eval_sort_keys(
    exprs: &[SortExpression],
    row: &Row,
    bindings: &CorrelatedBindings,
) -> Result<Vec<ScalarValue>> {
    exprs.iter().map(|e| e.expr.eval(row, bindings)).collect()
}

/// Compare two sets of previously evaluated sort keys.
pub fn compare_sort_keys(exprs: &[SortExpression], a: &[ScalarValue], b: &[ScalarValue]) -> Ordering {
    for ((expr, a), b) in exprs.iter().zip(a).zip(b) {
        let ord = match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => {
                if expr.nulls_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, true) => {
                if expr.nulls_first {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, false) => {
                let ord = a.cmp(b);
                if expr.desc { ord.reverse() } else { ord }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::col;

    #[test]
    fn nulls_last_desc() {
        let exprs = [SortExpression::desc(col(0))];
        let mut keys = vec![
            vec![ScalarValue::Int32(1)],
            vec![ScalarValue::Null],
            vec![ScalarValue::Int32(3)],
        ];
        keys.sort_by(|a, b| compare_sort_keys(&exprs, a, b));
        assert_eq!(
            vec![
                vec![ScalarValue::Int32(3)],
                vec![ScalarValue::Int32(1)],
                vec![ScalarValue::Null],
            ],
            keys
        );
    }
}
