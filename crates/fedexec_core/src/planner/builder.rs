use fedexec_error::{ExecError, Result};

use crate::arrays::datatype::DataType;
use crate::execution::operators::access::PhysicalAccess;
use crate::execution::operators::dup_remove::PhysicalDupRemove;
use crate::execution::operators::grouping::{Aggregate, PhysicalGrouping};
use crate::execution::operators::join::{
    JoinCondition,
    JoinHint,
    JoinStrategy,
    JoinType,
    PhysicalJoin,
};
use crate::execution::operators::limit::PhysicalLimit;
use crate::execution::operators::project::PhysicalProject;
use crate::execution::operators::select::PhysicalSelect;
use crate::execution::operators::sort::PhysicalSort;
use crate::execution::operators::union_all::PhysicalUnionAll;
use crate::execution::plan::{NodeId, PhysicalPlan, PlanOperator, PlanTemplate};
use crate::expr::Expression;
use crate::expr::sort::SortExpression;

/// Builds a plan arena bottom up, computing output types as nodes are
/// added.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    nodes: Vec<PlanTemplate>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, operator: PlanOperator, children: Vec<NodeId>, output_types: Vec<DataType>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(PlanTemplate {
            operator,
            children,
            output_types,
        });
        id
    }

    fn types(&self, id: NodeId) -> Result<&[DataType]> {
        self.nodes
            .get(id)
            .map(|n| n.output_types.as_slice())
            .ok_or_else(|| ExecError::invariant("Unknown child node").with_field("id", id))
    }

    pub fn access(&mut self, access: PhysicalAccess) -> NodeId {
        let types = access.column_types.clone();
        self.push(PlanOperator::Access(access), Vec::new(), types)
    }

    pub fn project(&mut self, child: NodeId, exprs: Vec<Expression>) -> Result<NodeId> {
        let inputs = self.types(child)?;
        let types = exprs
            .iter()
            .map(|e| e.datatype(inputs))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.push(
            PlanOperator::Project(PhysicalProject { exprs }),
            vec![child],
            types,
        ))
    }

    pub fn select(&mut self, child: NodeId, predicate: Expression) -> Result<NodeId> {
        let inputs = self.types(child)?;
        let datatype = predicate.datatype(inputs)?;
        if datatype != DataType::Boolean {
            return Err(ExecError::new("Select predicate must be boolean")
                .with_field("datatype", datatype));
        }
        let types = inputs.to_vec();
        Ok(self.push(
            PlanOperator::Select(PhysicalSelect { predicate }),
            vec![child],
            types,
        ))
    }

    pub fn join(
        &mut self,
        left: NodeId,
        right: NodeId,
        join_type: JoinType,
        conditions: Vec<JoinCondition>,
        residual: Option<Expression>,
    ) -> Result<NodeId> {
        let left_types = self.types(left)?.to_vec();
        let right_types = self.types(right)?.to_vec();
        for cond in &conditions {
            cond.left.datatype(&left_types)?;
            cond.right.datatype(&right_types)?;
        }

        let join = PhysicalJoin {
            join_type,
            conditions,
            residual,
            hint: None,
            strategy: None,
            left_arity: left_types.len(),
            right_arity: right_types.len(),
        };
        let types = left_types.into_iter().chain(right_types).collect();
        Ok(self.push(PlanOperator::Join(join), vec![left, right], types))
    }

    fn join_mut(&mut self, id: NodeId) -> Result<&mut PhysicalJoin> {
        match self.nodes.get_mut(id).map(|n| &mut n.operator) {
            Some(PlanOperator::Join(join)) => Ok(join),
            _ => Err(ExecError::new("Node is not a join").with_field("id", id)),
        }
    }

    /// Attach a planning hint to a join.
    pub fn hint(&mut self, join: NodeId, hint: JoinHint) -> Result<()> {
        self.join_mut(join)?.hint = Some(hint);
        Ok(())
    }

    /// Fix the strategy of a join, skipping strategy selection for it.
    pub fn strategy(&mut self, join: NodeId, strategy: JoinStrategy) -> Result<()> {
        self.join_mut(join)?.strategy = Some(strategy);
        Ok(())
    }

    pub fn sort(&mut self, child: NodeId, exprs: Vec<SortExpression>) -> Result<NodeId> {
        let inputs = self.types(child)?;
        for expr in &exprs {
            expr.expr.datatype(inputs)?;
        }
        let types = inputs.to_vec();
        Ok(self.push(PlanOperator::Sort(PhysicalSort { exprs }), vec![child], types))
    }

    pub fn grouping(
        &mut self,
        child: NodeId,
        group_by: Vec<Expression>,
        aggregates: Vec<Aggregate>,
    ) -> Result<NodeId> {
        let inputs = self.types(child)?;
        let mut types = group_by
            .iter()
            .map(|e| e.datatype(inputs))
            .collect::<Result<Vec<_>>>()?;
        for agg in &aggregates {
            types.push(agg.return_type(inputs)?);
        }
        Ok(self.push(
            PlanOperator::Grouping(PhysicalGrouping {
                group_by,
                aggregates,
            }),
            vec![child],
            types,
        ))
    }

    pub fn dup_remove(&mut self, child: NodeId) -> Result<NodeId> {
        let types = self.types(child)?.to_vec();
        Ok(self.push(PlanOperator::DupRemove(PhysicalDupRemove), vec![child], types))
    }

    pub fn union_all(&mut self, children: Vec<NodeId>) -> Result<NodeId> {
        let Some(&first) = children.first() else {
            return Err(ExecError::new("Union requires at least one input"));
        };
        let types = self.types(first)?.to_vec();
        for &child in &children[1..] {
            let child_types = self.types(child)?;
            if child_types.len() != types.len() {
                return Err(ExecError::new("Union inputs have different arity")
                    .with_field("expected", types.len())
                    .with_field("got", child_types.len()));
            }
        }
        Ok(self.push(PlanOperator::UnionAll(PhysicalUnionAll), children, types))
    }

    pub fn limit(&mut self, child: NodeId, offset: usize, limit: Option<usize>) -> Result<NodeId> {
        let types = self.types(child)?.to_vec();
        Ok(self.push(
            PlanOperator::Limit(PhysicalLimit { offset, limit }),
            vec![child],
            types,
        ))
    }

    /// Produce the plan rooted at `root`.
    pub fn build(self, root: NodeId) -> Result<PhysicalPlan> {
        if root >= self.nodes.len() {
            return Err(ExecError::invariant("Plan root out of bounds").with_field("root", root));
        }
        Ok(PhysicalPlan {
            nodes: self.nodes,
            root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{self, col, lit};

    fn access(b: &mut PlanBuilder) -> NodeId {
        b.access(PhysicalAccess::new(
            "pm1",
            "g1",
            [("e1", DataType::Int32), ("e2", DataType::Utf8)],
        ))
    }

    #[test]
    fn join_types_concatenate() {
        let mut b = PlanBuilder::new();
        let left = access(&mut b);
        let right = access(&mut b);
        let join = b
            .join(
                left,
                right,
                JoinType::Inner,
                vec![JoinCondition::eq(col(0), col(0))],
                None,
            )
            .unwrap();
        let plan = b.build(join).unwrap();
        assert_eq!(
            &[
                DataType::Int32,
                DataType::Utf8,
                DataType::Int32,
                DataType::Utf8
            ],
            plan.output_types().unwrap()
        );
    }

    #[test]
    fn select_requires_boolean() {
        let mut b = PlanBuilder::new();
        let a = access(&mut b);
        b.select(a, expr::eq(col(0), lit(1))).unwrap();
        b.select(a, col(1)).unwrap_err();
    }

    #[test]
    fn union_arity_mismatch() {
        let mut b = PlanBuilder::new();
        let a = access(&mut b);
        let p = b.project(a, vec![col(0)]).unwrap();
        b.union_all(vec![a, p]).unwrap_err();
    }
}
