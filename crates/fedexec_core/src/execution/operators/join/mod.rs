//! Join types and the join node.
//!
//! The execution strategy of a join is chosen once during planning and
//! fixed for the lifetime of the node.

pub mod dependent;
pub mod merge;
pub mod nested_loop;
pub mod outer;

use std::fmt;

use fedexec_error::{ExecError, Result};

use self::dependent::DependentJoinState;
use self::merge::MergeJoinState;
use self::nested_loop::NestedLoopJoinState;
use super::ExecuteOperator;
use crate::arrays::row::Row;
use crate::execution::context::ExecutionContext;
use crate::execution::node::ExecNode;
use crate::execution::plan::NodeId;
use crate::execution::poll::PollOperator;
use crate::explain::{ExplainEntry, Explainable};
use crate::expr::comparison::ComparisonOperator;
use crate::expr::{self, Expression};
use crate::source::capabilities::SourceCapabilities;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub const fn preserves_left(&self) -> bool {
        matches!(self, Self::Left | Self::Full)
    }

    pub const fn preserves_right(&self) -> bool {
        matches!(self, Self::Right | Self::Full)
    }

    pub const fn preserves(&self, side: JoinSide) -> bool {
        match side {
            JoinSide::Left => self.preserves_left(),
            JoinSide::Right => self.preserves_right(),
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "INNER"),
            Self::Left => write!(f, "LEFT"),
            Self::Right => write!(f, "RIGHT"),
            Self::Full => write!(f, "FULL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinSide {
    Left,
    Right,
}

impl JoinSide {
    pub const fn other(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    pub const fn child_idx(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }
}

impl fmt::Display for JoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// A comparison between an expression on the left side and an expression on
/// the right side of a join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinCondition {
    /// Expression referencing the left child's output.
    pub left: Expression,
    /// Expression referencing the right child's output.
    pub right: Expression,
    pub op: ComparisonOperator,
}

impl JoinCondition {
    pub fn eq(left: Expression, right: Expression) -> Self {
        JoinCondition {
            left,
            right,
            op: ComparisonOperator::Eq,
        }
    }

    pub fn new(left: Expression, op: ComparisonOperator, right: Expression) -> Self {
        JoinCondition { left, right, op }
    }

    /// Swap the sides of the condition.
    pub fn flip_sides(&mut self) {
        self.op = self.op.flip();
        std::mem::swap(&mut self.left, &mut self.right);
    }

    pub fn expr_for(&self, side: JoinSide) -> &Expression {
        match side {
            JoinSide::Left => &self.left,
            JoinSide::Right => &self.right,
        }
    }

    /// Convert to an expression over the concatenated left and right rows.
    pub fn to_expression(&self, left_arity: usize) -> Result<Expression> {
        let right = self
            .right
            .try_remap_columns(&|idx| Some(idx + left_arity))
            .ok_or_else(|| ExecError::invariant("Failed to remap join condition"))?;
        Ok(expr::compare(self.op, self.left.clone(), right))
    }
}

impl fmt::Display for JoinCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op, self.right)
    }
}

/// Planner hint for a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinHint {
    /// Make the given side dependent if at all possible.
    MakeDep(JoinSide),
    /// Never plan a dependent join.
    MakeNotDep,
}

/// How rows from a dependent side execution are matched to independent
/// rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStrategy {
    /// Look up the run of independent rows with an equal key.
    Merge,
    /// Evaluate the full join predicate against every independent row in the
    /// value batch. Used when key types differ between the sides.
    NestedLoop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DependentJoinSpec {
    pub independent: JoinSide,
    pub probe: ProbeStrategy,
    /// Access node on the dependent side receiving the criteria.
    pub target: NodeId,
    /// Indices of the equality conditions used as keys.
    pub key_conditions: Vec<usize>,
    /// Target access columns in key order.
    pub target_columns: Vec<usize>,
    /// Source of the target access node.
    pub source: String,
    pub capabilities: SourceCapabilities,
    /// Overrides the configured source concurrency.
    pub source_concurrency: Option<usize>,
}

impl DependentJoinSpec {
    pub fn dependent(&self) -> JoinSide {
        self.independent.other()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinStrategy {
    Merge,
    NestedLoop { materialize: JoinSide },
    Dependent(DependentJoinSpec),
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Merge => write!(f, "merge"),
            Self::NestedLoop { .. } => write!(f, "nested_loop"),
            Self::Dependent(_) => write!(f, "dependent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalJoin {
    pub join_type: JoinType,
    pub conditions: Vec<JoinCondition>,
    /// Additional predicate over the concatenated left and right rows.
    pub residual: Option<Expression>,
    pub hint: Option<JoinHint>,
    /// Set during plan finalization.
    pub strategy: Option<JoinStrategy>,
    pub left_arity: usize,
    pub right_arity: usize,
}

impl PhysicalJoin {
    pub fn strategy(&self) -> Result<&JoinStrategy> {
        self.strategy
            .as_ref()
            .ok_or_else(|| ExecError::new("Join strategy not chosen, plan was not finalized"))
    }

    pub fn opens_child(&self, idx: usize) -> bool {
        match &self.strategy {
            Some(JoinStrategy::Dependent(spec)) => idx == spec.independent.child_idx(),
            _ => true,
        }
    }

    /// Indices of conditions that are equalities.
    pub fn equality_conditions(&self) -> Vec<usize> {
        self.conditions
            .iter()
            .enumerate()
            .filter_map(|(idx, c)| c.op.is_equality().then_some(idx))
            .collect()
    }

    /// Predicate over concatenated rows containing the residual and every
    /// condition not listed in `exclude`.
    pub fn pair_predicate(&self, exclude: &[usize]) -> Result<Option<Expression>> {
        let mut preds = Vec::new();
        for (idx, cond) in self.conditions.iter().enumerate() {
            if !exclude.contains(&idx) {
                preds.push(cond.to_expression(self.left_arity)?);
            }
        }
        if let Some(residual) = &self.residual {
            preds.push(residual.clone());
        }
        Ok(expr::and(preds))
    }

    /// Concatenate rows from each side into an output row.
    pub fn output_row(&self, left: &Row, right: &Row) -> Row {
        left.concat(right)
    }
}

#[derive(Debug)]
pub enum JoinState {
    Merge(MergeJoinState),
    NestedLoop(NestedLoopJoinState),
    Dependent(DependentJoinState),
}

impl ExecuteOperator for PhysicalJoin {
    type State = JoinState;

    fn create_state(&self, ctx: &ExecutionContext, id: NodeId) -> Result<Self::State> {
        Ok(match self.strategy()? {
            JoinStrategy::Merge => JoinState::Merge(MergeJoinState::try_new(self)?),
            JoinStrategy::NestedLoop { materialize } => {
                JoinState::NestedLoop(NestedLoopJoinState::try_new(self, ctx, *materialize)?)
            }
            JoinStrategy::Dependent(spec) => {
                JoinState::Dependent(DependentJoinState::try_new(self, spec, ctx, id)?)
            }
        })
    }

    fn poll_execute(
        &self,
        ctx: &ExecutionContext,
        state: &mut Self::State,
        children: &mut [ExecNode],
    ) -> Result<PollOperator> {
        let [left, right] = children else {
            return Err(ExecError::invariant("Join requires exactly two children")
                .with_field("children", children.len()));
        };

        match (self.strategy()?, state) {
            (JoinStrategy::Merge, JoinState::Merge(state)) => state.poll(self, ctx, left, right),
            (JoinStrategy::NestedLoop { .. }, JoinState::NestedLoop(state)) => {
                state.poll(self, ctx, left, right)
            }
            (JoinStrategy::Dependent(spec), JoinState::Dependent(state)) => {
                state.poll(self, spec, ctx, left, right)
            }
            _ => Err(ExecError::invariant("Join state does not match strategy")),
        }
    }

    fn close(&self, state: &mut Self::State) {
        match state {
            JoinState::Merge(state) => state.close(),
            JoinState::NestedLoop(state) => state.close(),
            JoinState::Dependent(state) => state.close(),
        }
    }
}

impl Explainable for PhysicalJoin {
    fn explain_entry(&self) -> ExplainEntry {
        let mut ent = ExplainEntry::new("Join")
            .with_value("join_type", self.join_type)
            .with_values("conditions", &self.conditions);
        if let Some(residual) = &self.residual {
            ent = ent.with_value("residual", residual);
        }
        match &self.strategy {
            Some(strategy @ JoinStrategy::Dependent(spec)) => {
                ent = ent
                    .with_value("strategy", strategy)
                    .with_value("independent", spec.independent)
                    .with_value("target", spec.target)
                    .with_value("source", &spec.source);
                if let Some(n) = spec.source_concurrency {
                    ent = ent.with_value("source_concurrency", n);
                }
            }
            Some(strategy @ JoinStrategy::NestedLoop { materialize }) => {
                ent = ent
                    .with_value("strategy", strategy)
                    .with_value("materialize", materialize);
            }
            Some(strategy) => ent = ent.with_value("strategy", strategy),
            None => (),
        }
        ent
    }
}
