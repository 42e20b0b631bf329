pub mod arith;
pub mod comparison;
pub mod sort;

use std::fmt;

use ahash::HashMap;
use fedexec_error::{ExecError, OptionExt, Result};
use serde::{Deserialize, Serialize};

use self::arith::ArithOperator;
use self::comparison::{ComparisonOperator, ConjunctionOperator};
use crate::arrays::datatype::DataType;
use crate::arrays::row::Row;
use crate::arrays::scalar::ScalarValue;

/// Values bound to correlated references for one execution of a plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrelatedBindings {
    values: HashMap<String, ScalarValue>,
}

impl CorrelatedBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<ScalarValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        self.bind(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ScalarValue> {
        self.values.get(name)
    }
}

/// A scalar expression evaluated against a single input row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Reference to a column in the input row.
    Column(usize),
    Literal(ScalarValue),
    /// Reference to a value supplied by an outer query.
    Correlated {
        name: String,
        datatype: DataType,
    },
    Comparison {
        op: ComparisonOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Conjunction {
        op: ConjunctionOperator,
        children: Vec<Expression>,
    },
    Not(Box<Expression>),
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    Arith {
        op: ArithOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    /// Evaluate the expression for a row.
    pub fn eval(&self, row: &Row, bindings: &CorrelatedBindings) -> Result<ScalarValue> {
        match self {
            Self::Column(idx) => row.get(*idx).cloned().ok_or_else(|| {
                ExecError::invariant("Column reference out of bounds")
                    .with_field("column", idx)
                    .with_field("arity", row.arity())
            }),
            Self::Literal(v) => Ok(v.clone()),
            Self::Correlated { name, .. } => bindings.get(name).cloned().ok_or_else(|| {
                ExecError::processing("Missing binding for correlated reference")
                    .with_field("name", name)
            }),
            Self::Comparison { op, left, right } => {
                let l = left.eval(row, bindings)?;
                let r = right.eval(row, bindings)?;
                Ok(match l.sql_cmp(&r)? {
                    Some(ord) => ScalarValue::Boolean(op.matches(ord)),
                    None => ScalarValue::Null,
                })
            }
            Self::Conjunction { op, children } => {
                // Three-valued logic.
                let (short_circuit, otherwise) = match op {
                    ConjunctionOperator::And => (false, true),
                    ConjunctionOperator::Or => (true, false),
                };
                let mut saw_null = false;
                for child in children {
                    match child.eval(row, bindings)? {
                        ScalarValue::Null => saw_null = true,
                        v => {
                            if v.try_as_bool()? == short_circuit {
                                return Ok(ScalarValue::Boolean(short_circuit));
                            }
                        }
                    }
                }
                if saw_null {
                    Ok(ScalarValue::Null)
                } else {
                    Ok(ScalarValue::Boolean(otherwise))
                }
            }
            Self::Not(expr) => match expr.eval(row, bindings)? {
                ScalarValue::Null => Ok(ScalarValue::Null),
                v => Ok(ScalarValue::Boolean(!v.try_as_bool()?)),
            },
            Self::IsNull { expr, negated } => {
                let v = expr.eval(row, bindings)?;
                Ok(ScalarValue::Boolean(v.is_null() != *negated))
            }
            Self::InList {
                expr,
                list,
                negated,
            } => {
                let needle = expr.eval(row, bindings)?;
                if needle.is_null() {
                    return Ok(ScalarValue::Null);
                }
                let mut saw_null = false;
                for item in list {
                    let v = item.eval(row, bindings)?;
                    match needle.sql_cmp(&v)? {
                        Some(std::cmp::Ordering::Equal) => {
                            return Ok(ScalarValue::Boolean(!negated));
                        }
                        Some(_) => (),
                        None => saw_null = true,
                    }
                }
                if saw_null {
                    Ok(ScalarValue::Null)
                } else {
                    Ok(ScalarValue::Boolean(*negated))
                }
            }
            Self::Arith { op, left, right } => {
                let l = left.eval(row, bindings)?;
                let r = right.eval(row, bindings)?;
                op.eval(&l, &r)
            }
        }
    }

    /// Evaluate the expression as a filter. Null is treated as false.
    pub fn eval_predicate(&self, row: &Row, bindings: &CorrelatedBindings) -> Result<bool> {
        match self.eval(row, bindings)? {
            ScalarValue::Null => Ok(false),
            v => v.try_as_bool(),
        }
    }

    /// Get the output type of this expression given the input types.
    pub fn datatype(&self, inputs: &[DataType]) -> Result<DataType> {
        Ok(match self {
            Self::Column(idx) => *inputs.get(*idx).required("column type")?,
            Self::Literal(v) => v.datatype(),
            Self::Correlated { datatype, .. } => *datatype,
            Self::Comparison { .. }
            | Self::Conjunction { .. }
            | Self::Not(_)
            | Self::IsNull { .. }
            | Self::InList { .. } => DataType::Boolean,
            Self::Arith { op, left, right } => {
                op.return_type(left.datatype(inputs)?, right.datatype(inputs)?)?
            }
        })
    }

    /// Get all column indices referenced by this expression, in order of
    /// first appearance.
    pub fn column_refs(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.for_each_child(&mut |expr| {
            if let Expression::Column(idx) = expr {
                if !out.contains(idx) {
                    out.push(*idx);
                }
            }
        });
        out
    }

    /// If this expression is a bare column reference.
    pub fn as_column(&self) -> Option<usize> {
        match self {
            Self::Column(idx) => Some(*idx),
            _ => None,
        }
    }

    /// If this expression references correlated values.
    pub fn is_correlated(&self) -> bool {
        let mut correlated = false;
        self.for_each_child(&mut |expr| {
            if matches!(expr, Expression::Correlated { .. }) {
                correlated = true;
            }
        });
        correlated
    }

    /// Rewrite column references using `map`.
    ///
    /// Returns None if any referenced column has no mapping.
    pub fn try_remap_columns(&self, map: &impl Fn(usize) -> Option<usize>) -> Option<Expression> {
        Some(match self {
            Self::Column(idx) => Self::Column(map(*idx)?),
            Self::Literal(_) | Self::Correlated { .. } => self.clone(),
            Self::Comparison { op, left, right } => Self::Comparison {
                op: *op,
                left: Box::new(left.try_remap_columns(map)?),
                right: Box::new(right.try_remap_columns(map)?),
            },
            Self::Conjunction { op, children } => Self::Conjunction {
                op: *op,
                children: children
                    .iter()
                    .map(|c| c.try_remap_columns(map))
                    .collect::<Option<Vec<_>>>()?,
            },
            Self::Not(expr) => Self::Not(Box::new(expr.try_remap_columns(map)?)),
            Self::IsNull { expr, negated } => Self::IsNull {
                expr: Box::new(expr.try_remap_columns(map)?),
                negated: *negated,
            },
            Self::InList {
                expr,
                list,
                negated,
            } => Self::InList {
                expr: Box::new(expr.try_remap_columns(map)?),
                list: list
                    .iter()
                    .map(|c| c.try_remap_columns(map))
                    .collect::<Option<Vec<_>>>()?,
                negated: *negated,
            },
            Self::Arith { op, left, right } => Self::Arith {
                op: *op,
                left: Box::new(left.try_remap_columns(map)?),
                right: Box::new(right.try_remap_columns(map)?),
            },
        })
    }

    /// Replace correlated references with literals from `bindings`.
    pub fn bind_correlated(&self, bindings: &CorrelatedBindings) -> Result<Expression> {
        Ok(match self {
            Self::Correlated { name, .. } => {
                let v = bindings.get(name).ok_or_else(|| {
                    ExecError::processing("Missing binding for correlated reference")
                        .with_field("name", name)
                })?;
                Self::Literal(v.clone())
            }
            Self::Column(_) | Self::Literal(_) => self.clone(),
            Self::Comparison { op, left, right } => Self::Comparison {
                op: *op,
                left: Box::new(left.bind_correlated(bindings)?),
                right: Box::new(right.bind_correlated(bindings)?),
            },
            Self::Conjunction { op, children } => Self::Conjunction {
                op: *op,
                children: children
                    .iter()
                    .map(|c| c.bind_correlated(bindings))
                    .collect::<Result<Vec<_>>>()?,
            },
            Self::Not(expr) => Self::Not(Box::new(expr.bind_correlated(bindings)?)),
            Self::IsNull { expr, negated } => Self::IsNull {
                expr: Box::new(expr.bind_correlated(bindings)?),
                negated: *negated,
            },
            Self::InList {
                expr,
                list,
                negated,
            } => Self::InList {
                expr: Box::new(expr.bind_correlated(bindings)?),
                list: list
                    .iter()
                    .map(|c| c.bind_correlated(bindings))
                    .collect::<Result<Vec<_>>>()?,
                negated: *negated,
            },
            Self::Arith { op, left, right } => Self::Arith {
                op: *op,
                left: Box::new(left.bind_correlated(bindings)?),
                right: Box::new(right.bind_correlated(bindings)?),
            },
        })
    }

    /// Visit this expression and all of its children, depth first.
    fn for_each_child(&self, f: &mut impl FnMut(&Expression)) {
        f(self);
        match self {
            Self::Column(_) | Self::Literal(_) | Self::Correlated { .. } => (),
            Self::Comparison { left, right, .. } | Self::Arith { left, right, .. } => {
                left.for_each_child(f);
                right.for_each_child(f);
            }
            Self::Conjunction { children, .. } => {
                for child in children {
                    child.for_each_child(f);
                }
            }
            Self::Not(expr) | Self::IsNull { expr, .. } => expr.for_each_child(f),
            Self::InList { expr, list, .. } => {
                expr.for_each_child(f);
                for item in list {
                    item.for_each_child(f);
                }
            }
        }
    }

    /// Split a conjunction of ANDs into its individual predicates.
    pub fn split_conjunction(self) -> Vec<Expression> {
        match self {
            Self::Conjunction {
                op: ConjunctionOperator::And,
                children,
            } => children
                .into_iter()
                .flat_map(|c| c.split_conjunction())
                .collect(),
            other => vec![other],
        }
    }

    /// Display the expression using the given column names.
    pub fn display_with_names<'a>(&'a self, names: &'a [String]) -> ExpressionDisplay<'a> {
        ExpressionDisplay { expr: self, names }
    }
}

/// Create a column reference.
pub fn col(idx: usize) -> Expression {
    Expression::Column(idx)
}

/// Create a literal.
pub fn lit(value: impl Into<ScalarValue>) -> Expression {
    Expression::Literal(value.into())
}

pub fn compare(op: ComparisonOperator, left: Expression, right: Expression) -> Expression {
    Expression::Comparison {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn eq(left: Expression, right: Expression) -> Expression {
    compare(ComparisonOperator::Eq, left, right)
}

/// AND together expressions, returning None if there are none.
pub fn and(exprs: impl IntoIterator<Item = Expression>) -> Option<Expression> {
    conjunction(ConjunctionOperator::And, exprs)
}

/// OR together expressions, returning None if there are none.
pub fn or(exprs: impl IntoIterator<Item = Expression>) -> Option<Expression> {
    conjunction(ConjunctionOperator::Or, exprs)
}

fn conjunction(
    op: ConjunctionOperator,
    exprs: impl IntoIterator<Item = Expression>,
) -> Option<Expression> {
    let mut children: Vec<_> = exprs.into_iter().collect();
    match children.len() {
        0 => None,
        1 => children.pop(),
        _ => Some(Expression::Conjunction { op, children }),
    }
}

pub fn arith(op: ArithOperator, left: Expression, right: Expression) -> Expression {
    Expression::Arith {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[derive(Debug)]
pub struct ExpressionDisplay<'a> {
    expr: &'a Expression,
    names: &'a [String],
}

impl ExpressionDisplay<'_> {
    fn child<'b>(&'b self, expr: &'b Expression) -> ExpressionDisplay<'b> {
        ExpressionDisplay {
            expr,
            names: self.names,
        }
    }
}

impl fmt::Display for ExpressionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expr {
            Expression::Column(idx) => match self.names.get(*idx) {
                Some(name) => write!(f, "{name}"),
                None => write!(f, "#{idx}"),
            },
            Expression::Literal(v) => write!(f, "{}", v.to_sql_literal()),
            Expression::Correlated { name, .. } => write!(f, "{name}"),
            Expression::Comparison { op, left, right } => {
                write!(f, "{} {op} {}", self.child(left), self.child(right))
            }
            Expression::Conjunction { op, children } => {
                write!(f, "(")?;
                for (idx, child) in children.iter().enumerate() {
                    if idx > 0 {
                        write!(f, " {op} ")?;
                    }
                    write!(f, "{}", self.child(child))?;
                }
                write!(f, ")")
            }
            Expression::Not(expr) => write!(f, "NOT {}", self.child(expr)),
            Expression::IsNull { expr, negated } => {
                if *negated {
                    write!(f, "{} IS NOT NULL", self.child(expr))
                } else {
                    write!(f, "{} IS NULL", self.child(expr))
                }
            }
            Expression::InList {
                expr,
                list,
                negated,
            } => {
                write!(f, "{}", self.child(expr))?;
                if *negated {
                    write!(f, " NOT")?;
                }
                write!(f, " IN (")?;
                for (idx, item) in list.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", self.child(item))?;
                }
                write!(f, ")")
            }
            Expression::Arith { op, left, right } => {
                write!(f, "({} {op} {})", self.child(left), self.child(right))
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_with_names(&[]))
    }
}
