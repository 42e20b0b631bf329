use fedexec_error::Result;

use crate::execution::plan::{NodeId, PhysicalPlan, PlanOperator};

/// The access node receiving dependent criteria, and the access columns the
/// join keys map to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentTarget {
    pub access: NodeId,
    pub source: String,
    /// Access columns in key order.
    pub columns: Vec<usize>,
}

/// Trace output columns of `node` down to a single access node.
///
/// Resolution passes through nodes where filtering the access rows on the
/// keys is equivalent to filtering the node's output on the keys. Returns
/// None if the columns can't be traced.
pub fn resolve_dependent_target(
    plan: &PhysicalPlan,
    node: NodeId,
    columns: &[usize],
) -> Result<Option<DependentTarget>> {
    let template = plan.node(node)?;

    match &template.operator {
        PlanOperator::Access(access) => {
            if columns.iter().any(|&c| c >= access.columns.len()) {
                return Ok(None);
            }
            Ok(Some(DependentTarget {
                access: node,
                source: access.source.clone(),
                columns: columns.to_vec(),
            }))
        }
        PlanOperator::Select(_) | PlanOperator::Sort(_) | PlanOperator::DupRemove(_) => {
            resolve_dependent_target(plan, template.children[0], columns)
        }
        PlanOperator::Project(project) => {
            let mapped: Option<Vec<usize>> = columns
                .iter()
                .map(|&c| project.exprs.get(c).and_then(|e| e.as_column()))
                .collect();
            match mapped {
                Some(mapped) => resolve_dependent_target(plan, template.children[0], &mapped),
                None => Ok(None),
            }
        }
        PlanOperator::Grouping(grouping) => {
            let mapped: Option<Vec<usize>> = columns
                .iter()
                .map(|&c| grouping.group_by.get(c).and_then(|e| e.as_column()))
                .collect();
            match mapped {
                Some(mapped) => resolve_dependent_target(plan, template.children[0], &mapped),
                None => Ok(None),
            }
        }
        PlanOperator::Join(join) => {
            if columns.iter().all(|&c| c < join.left_arity) {
                if join.join_type.preserves_right() || !join.opens_child(0) {
                    return Ok(None);
                }
                resolve_dependent_target(plan, template.children[0], columns)
            } else if columns.iter().all(|&c| c >= join.left_arity) {
                if join.join_type.preserves_left() || !join.opens_child(1) {
                    return Ok(None);
                }
                let mapped: Vec<usize> = columns.iter().map(|&c| c - join.left_arity).collect();
                resolve_dependent_target(plan, template.children[1], &mapped)
            } else {
                Ok(None)
            }
        }
        PlanOperator::UnionAll(_) | PlanOperator::Limit(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::datatype::DataType;
    use crate::execution::operators::access::PhysicalAccess;
    use crate::execution::operators::join::{JoinCondition, JoinType};
    use crate::expr::{self, col, lit};
    use crate::planner::builder::PlanBuilder;

    fn access(b: &mut PlanBuilder, source: &str) -> NodeId {
        b.access(PhysicalAccess::new(
            source,
            "g1",
            [
                ("e1", DataType::Int32),
                ("e2", DataType::Utf8),
                ("e3", DataType::Int64),
            ],
        ))
    }

    #[test]
    fn through_project_and_select() {
        let mut b = PlanBuilder::new();
        let a = access(&mut b, "pm1");
        let s = b.select(a, expr::eq(col(0), lit(1))).unwrap();
        let p = b.project(s, vec![col(2), col(0)]).unwrap();
        let plan = b.build(p).unwrap();

        let target = resolve_dependent_target(&plan, p, &[1, 0]).unwrap().unwrap();
        assert_eq!(a, target.access);
        assert_eq!("pm1", target.source);
        assert_eq!(vec![0, 2], target.columns);
    }

    #[test]
    fn computed_column_unresolved() {
        let mut b = PlanBuilder::new();
        let a = access(&mut b, "pm1");
        let p = b.project(a, vec![lit(4)]).unwrap();
        let plan = b.build(p).unwrap();
        assert_eq!(None, resolve_dependent_target(&plan, p, &[0]).unwrap());
    }

    #[test]
    fn join_sides() {
        let mut b = PlanBuilder::new();
        let l = access(&mut b, "pm1");
        let r = access(&mut b, "pm2");
        let inner = b
            .join(l, r, JoinType::Inner, vec![JoinCondition::eq(col(0), col(0))], None)
            .unwrap();
        let left = b
            .join(l, r, JoinType::Left, vec![JoinCondition::eq(col(0), col(0))], None)
            .unwrap();
        let plan = b.build(inner).unwrap();

        let target = resolve_dependent_target(&plan, inner, &[4]).unwrap().unwrap();
        assert_eq!("pm2", target.source);
        assert_eq!(vec![1], target.columns);

        // Filtering the null supplying side of an outer join changes its
        // output.
        assert_eq!(None, resolve_dependent_target(&plan, left, &[4]).unwrap());
        assert!(resolve_dependent_target(&plan, left, &[0]).unwrap().is_some());

        // Columns from both sides.
        assert_eq!(None, resolve_dependent_target(&plan, inner, &[0, 3]).unwrap());
    }

    #[test]
    fn limit_blocks_resolution() {
        let mut b = PlanBuilder::new();
        let a = access(&mut b, "pm1");
        let l = b.limit(a, 0, Some(10)).unwrap();
        let plan = b.build(l).unwrap();
        assert_eq!(None, resolve_dependent_target(&plan, l, &[0]).unwrap());
    }
}
