use std::cmp::Ordering;
use std::fmt;

use ahash::RandomState;
use fedexec_error::{ExecError, Result};
use hashbrown::HashSet;
use indexmap::IndexMap;

use super::{ChildPull, ExecuteOperator, pull_child, single_child};
use crate::arrays::datatype::DataType;
use crate::arrays::row::Row;
use crate::arrays::scalar::ScalarValue;
use crate::buffer::Reservation;
use crate::execution::context::ExecutionContext;
use crate::execution::node::ExecNode;
use crate::execution::plan::NodeId;
use crate::execution::poll::PollOperator;
use crate::explain::{ExplainEntry, Explainable};
use crate::expr::{CorrelatedBindings, Expression};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountStar | Self::Count => write!(f, "count"),
            Self::Sum => write!(f, "sum"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Avg => write!(f, "avg"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub function: AggregateFunction,
    /// Input to the aggregate. None only for `count(*)`.
    pub expr: Option<Expression>,
    pub distinct: bool,
}

impl Aggregate {
    pub fn count_star() -> Self {
        Aggregate {
            function: AggregateFunction::CountStar,
            expr: None,
            distinct: false,
        }
    }

    pub fn new(function: AggregateFunction, expr: Expression) -> Self {
        Aggregate {
            function,
            expr: Some(expr),
            distinct: false,
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn return_type(&self, inputs: &[DataType]) -> Result<DataType> {
        let input = match &self.expr {
            Some(expr) => expr.datatype(inputs)?,
            None if self.function == AggregateFunction::CountStar => DataType::Null,
            None => return Err(ExecError::new("Aggregate is missing an input expression")),
        };

        Ok(match self.function {
            AggregateFunction::CountStar | AggregateFunction::Count => DataType::Int64,
            AggregateFunction::Sum => match input {
                DataType::Int32 | DataType::Int64 => DataType::Int64,
                DataType::Float64 => DataType::Float64,
                other => {
                    return Err(ExecError::new(format!("Cannot sum values of type {other}")));
                }
            },
            AggregateFunction::Avg => {
                if !input.is_numeric() {
                    return Err(ExecError::new(format!("Cannot average values of type {input}")));
                }
                DataType::Float64
            }
            AggregateFunction::Min | AggregateFunction::Max => input,
        })
    }

    fn new_accumulator(&self) -> Accumulator {
        let value = match self.function {
            AggregateFunction::CountStar | AggregateFunction::Count => {
                AccumulatorValue::Count(0)
            }
            AggregateFunction::Sum | AggregateFunction::Min | AggregateFunction::Max => {
                AccumulatorValue::Value(ScalarValue::Null)
            }
            AggregateFunction::Avg => AccumulatorValue::Avg { sum: 0.0, count: 0 },
        };
        Accumulator {
            value,
            distinct: self.distinct.then(HashSet::new),
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expr {
            None => write!(f, "{}(*)", self.function),
            Some(expr) if self.distinct => write!(f, "{}(DISTINCT {expr})", self.function),
            Some(expr) => write!(f, "{}({expr})", self.function),
        }
    }
}

#[derive(Debug)]
enum AccumulatorValue {
    Count(i64),
    Value(ScalarValue),
    Avg { sum: f64, count: i64 },
}

#[derive(Debug)]
struct Accumulator {
    value: AccumulatorValue,
    /// Values already seen for DISTINCT aggregates.
    distinct: Option<HashSet<ScalarValue>>,
}

impl Accumulator {
    fn update(&mut self, agg: &Aggregate, row: &Row, bindings: &CorrelatedBindings) -> Result<()> {
        let input = match &agg.expr {
            Some(expr) => expr.eval(row, bindings)?,
            None => {
                if let AccumulatorValue::Count(c) = &mut self.value {
                    *c += 1;
                }
                return Ok(());
            }
        };

        // Nulls are ignored by every aggregate other than count(*).
        if input.is_null() {
            return Ok(());
        }
        if let Some(seen) = &mut self.distinct {
            if !seen.insert(input.clone()) {
                return Ok(());
            }
        }

        match (&mut self.value, agg.function) {
            (AccumulatorValue::Count(c), _) => *c += 1,
            (AccumulatorValue::Value(curr), AggregateFunction::Sum) => {
                *curr = match (&*curr, &input) {
                    (ScalarValue::Null, v) if v.datatype().is_integer() => {
                        ScalarValue::Int64(v.try_as_i64()?)
                    }
                    (ScalarValue::Null, v) => ScalarValue::Float64(v.try_as_f64()?),
                    (ScalarValue::Int64(a), v) if v.datatype().is_integer() => {
                        let b = v.try_as_i64()?;
                        ScalarValue::Int64(a.checked_add(b).ok_or_else(|| {
                            ExecError::processing("Integer overflow in sum")
                                .with_field("sum", a)
                                .with_field("value", b)
                        })?)
                    }
                    (a, b) => ScalarValue::Float64(a.try_as_f64()? + b.try_as_f64()?),
                };
            }
            (AccumulatorValue::Value(curr), func) => {
                let replace = match curr.sql_cmp(&input)? {
                    None => true,
                    Some(ord) => {
                        (func == AggregateFunction::Min && ord == Ordering::Greater)
                            || (func == AggregateFunction::Max && ord == Ordering::Less)
                    }
                };
                if replace {
                    *curr = input;
                }
            }
            (AccumulatorValue::Avg { sum, count }, _) => {
                *sum += input.try_as_f64()?;
                *count += 1;
            }
        }

        Ok(())
    }

    fn finish(&self) -> ScalarValue {
        match &self.value {
            AccumulatorValue::Count(c) => ScalarValue::Int64(*c),
            AccumulatorValue::Value(v) => v.clone(),
            AccumulatorValue::Avg { count: 0, .. } => ScalarValue::Null,
            AccumulatorValue::Avg { sum, count } => ScalarValue::Float64(sum / *count as f64),
        }
    }
}

/// Groups input rows by the group by expressions and computes aggregates
/// per group.
///
/// Output rows contain the group values followed by the aggregate values.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalGrouping {
    pub group_by: Vec<Expression>,
    pub aggregates: Vec<Aggregate>,
}

#[derive(Debug)]
pub struct GroupingState {
    groups: IndexMap<Row, Vec<Accumulator>, RandomState>,
    reservation: Reservation,
    /// Position of the next group to emit once the input is exhausted.
    emit_pos: Option<usize>,
}

impl PhysicalGrouping {
    fn output_row(&self, group: &Row, accs: &[Accumulator]) -> Row {
        group
            .columns
            .iter()
            .cloned()
            .chain(accs.iter().map(|a| a.finish()))
            .collect()
    }
}

impl ExecuteOperator for PhysicalGrouping {
    type State = GroupingState;

    fn create_state(&self, ctx: &ExecutionContext, _id: NodeId) -> Result<Self::State> {
        Ok(GroupingState {
            groups: IndexMap::default(),
            reservation: Reservation::new(&ctx.buffer_manager),
            emit_pos: None,
        })
    }

    fn poll_execute(
        &self,
        ctx: &ExecutionContext,
        state: &mut Self::State,
        children: &mut [ExecNode],
    ) -> Result<PollOperator> {
        loop {
            if let Some(pos) = state.emit_pos {
                if pos >= state.groups.len() {
                    return Ok(PollOperator::Finished);
                }
                let end = (pos + ctx.batch_size()).min(state.groups.len());
                let rows = (pos..end)
                    .filter_map(|idx| state.groups.get_index(idx))
                    .map(|(group, accs)| self.output_row(group, accs))
                    .collect();
                state.emit_pos = Some(end);
                return Ok(PollOperator::Rows(rows));
            }

            let child = single_child(children, "Grouping")?;
            match pull_child(child, ctx)? {
                ChildPull::Rows(rows) => {
                    for row in rows {
                        let key: Row = self
                            .group_by
                            .iter()
                            .map(|e| e.eval(&row, &ctx.correlated))
                            .collect::<Result<Row>>()?;

                        if !state.groups.contains_key(&key) {
                            state.reservation.grow(1)?;
                            let accs = self.aggregates.iter().map(|a| a.new_accumulator()).collect();
                            state.groups.insert(key.clone(), accs);
                        }
                        let accs = state
                            .groups
                            .get_mut(&key)
                            .ok_or_else(|| ExecError::invariant("Missing group"))?;
                        for (acc, agg) in accs.iter_mut().zip(&self.aggregates) {
                            acc.update(agg, &row, &ctx.correlated)?;
                        }
                    }
                }
                ChildPull::Blocked => return Ok(PollOperator::Blocked),
                ChildPull::Exhausted => {
                    if state.groups.is_empty() && self.group_by.is_empty() {
                        // Aggregates without grouping always produce a row.
                        let accs = self.aggregates.iter().map(|a| a.new_accumulator()).collect();
                        state.groups.insert(Row::default(), accs);
                    }
                    state.emit_pos = Some(0);
                }
            }
        }
    }

    fn close(&self, state: &mut Self::State) {
        state.groups.clear();
        state.reservation.release_all();
    }
}

impl Explainable for PhysicalGrouping {
    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("Grouping")
            .with_values("group_by", &self.group_by)
            .with_values("aggregates", &self.aggregates)
    }
}
