//! Plan finalization.
//!
//! Plans are built with `PlanBuilder` and finalized once before execution.
//! Finalization estimates statistics, fixes a strategy for every join,
//! arranges sorted inputs for merge joins and limits dependent fan-out.

pub mod builder;
pub mod dependent_target;
pub mod join_strategy;
pub mod statistics;

use std::sync::Arc;

use fedexec_error::{ExecError, Result};
use tracing::debug;

use self::join_strategy::{JoinInputs, choose_join_strategy};
use self::statistics::assumptions::{
    DEFAULT_SELECTIVITY,
    EQUALITY_SELECTIVITY,
    INEQUALITY_SELECTIVITY,
};
use self::statistics::{NodeStatistics, StatisticsValue};
use crate::config::execution::ExecutionConfig;
use crate::execution::operators::join::{JoinSide, JoinStrategy, PhysicalJoin};
use crate::execution::operators::sort::PhysicalSort;
use crate::execution::plan::{NodeId, PhysicalPlan, PlanOperator, PlanTemplate};
use crate::expr::comparison::ConjunctionOperator;
use crate::expr::sort::SortExpression;
use crate::expr::Expression;
use crate::source::capabilities::CapabilitiesFinder;

#[derive(Debug, Clone)]
pub struct Planner {
    config: Arc<ExecutionConfig>,
    capabilities: Arc<dyn CapabilitiesFinder>,
}

impl Planner {
    pub fn new(config: Arc<ExecutionConfig>, capabilities: Arc<dyn CapabilitiesFinder>) -> Self {
        Planner {
            config,
            capabilities,
        }
    }

    /// Finalize a plan for execution.
    ///
    /// Joins that already have a strategy keep it.
    pub fn finalize(&self, mut plan: PhysicalPlan) -> Result<PhysicalPlan> {
        let order = post_order(&plan)?;

        let mut stats: Vec<Option<NodeStatistics>> = vec![None; plan.nodes.len()];
        for &id in &order {
            let node_stats = estimate_node(&plan, id, &stats)?;
            stats[id] = Some(node_stats);

            let strategy = match &plan.node(id)?.operator {
                PlanOperator::Join(join) if join.strategy.is_none() => {
                    Some(self.choose(&plan, id, join, &stats)?)
                }
                _ => None,
            };
            if let Some(strategy) = strategy {
                debug!(join = id, %strategy, "chose join strategy");
                if let PlanOperator::Join(join) = &mut plan.node_mut(id)?.operator {
                    join.strategy = Some(strategy);
                }
            }
        }

        for &id in &order {
            let is_merge = matches!(
                &plan.node(id)?.operator,
                PlanOperator::Join(join) if join.strategy == Some(JoinStrategy::Merge)
            );
            if is_merge {
                self.arrange_merge_inputs(&mut plan, id)?;
            }
        }

        serialize_nested_dependent_joins(&mut plan, &order)?;

        Ok(plan)
    }

    fn choose(
        &self,
        plan: &PhysicalPlan,
        id: NodeId,
        join: &PhysicalJoin,
        stats: &[Option<NodeStatistics>],
    ) -> Result<JoinStrategy> {
        let node = plan.node(id)?;
        let &[left, right] = node.children.as_slice() else {
            return Err(ExecError::invariant("Join requires exactly two children").with_field("join", id));
        };
        let stats_for = |child: NodeId| {
            stats
                .get(child)
                .and_then(|s| s.as_ref())
                .ok_or_else(|| ExecError::invariant("Missing child statistics").with_field("node", child))
        };

        let inputs = JoinInputs {
            plan,
            join_id: id,
            join,
            children: [left, right],
            stats: [stats_for(left)?, stats_for(right)?],
            types: [
                plan.node(left)?.output_types.as_slice(),
                plan.node(right)?.output_types.as_slice(),
            ],
        };

        choose_join_strategy(&inputs, &self.config, self.capabilities.as_ref())
    }

    /// Ensure both inputs of a merge join are ordered on the join keys.
    ///
    /// Ordering is pushed into an access child when its source supports it,
    /// otherwise a sort node is placed between the join and the child.
    fn arrange_merge_inputs(&self, plan: &mut PhysicalPlan, id: NodeId) -> Result<()> {
        let PlanOperator::Join(join) = &plan.node(id)?.operator else {
            return Ok(());
        };
        let equalities = join.equality_conditions();
        let keys: [Vec<SortExpression>; 2] = [JoinSide::Left, JoinSide::Right].map(|side| {
            equalities
                .iter()
                .map(|&idx| SortExpression::asc(join.conditions[idx].expr_for(side).clone()))
                .collect()
        });

        for (child_idx, keys) in keys.into_iter().enumerate() {
            let child = plan.node(id)?.children[child_idx];
            if self.try_push_order(plan, child, &keys)? {
                debug!(join = id, access = child, "pushed merge ordering into access");
                continue;
            }

            let output_types = plan.node(child)?.output_types.clone();
            let sort_id = plan.nodes.len();
            plan.nodes.push(PlanTemplate {
                operator: PlanOperator::Sort(PhysicalSort { exprs: keys }),
                children: vec![child],
                output_types,
            });
            plan.node_mut(id)?.children[child_idx] = sort_id;
            debug!(join = id, child, sort = sort_id, "inserted sort for merge join");
        }

        Ok(())
    }

    fn try_push_order(&self, plan: &mut PhysicalPlan, child: NodeId, keys: &[SortExpression]) -> Result<bool> {
        let PlanOperator::Access(access) = &mut plan.node_mut(child)?.operator else {
            return Ok(false);
        };
        if !keys.iter().all(|k| k.expr.as_column().is_some()) {
            return Ok(false);
        }
        if !access.order_by.is_empty() {
            return Ok(access.order_by == keys);
        }
        let caps = self.capabilities.capabilities_or_default(&access.source);
        if !caps.supports_order_by {
            return Ok(false);
        }
        access.order_by = keys.to_vec();
        Ok(true)
    }
}

/// Node ids with children before parents.
fn post_order(plan: &PhysicalPlan) -> Result<Vec<NodeId>> {
    let mut ids = plan.subtree_ids(plan.root)?;
    ids.reverse();
    Ok(ids)
}

/// Force a fan-out of one for dependent joins whose dependent subtree holds
/// another dependent join targeting the same source.
fn serialize_nested_dependent_joins(plan: &mut PhysicalPlan, order: &[NodeId]) -> Result<()> {
    for &id in order {
        let node = plan.node(id)?;
        let PlanOperator::Join(PhysicalJoin {
            strategy: Some(JoinStrategy::Dependent(spec)),
            ..
        }) = &node.operator
        else {
            continue;
        };

        let dependent_child = node.children[spec.dependent().child_idx()];
        let mut nested_same_source = false;
        for sub in plan.subtree_ids(dependent_child)? {
            if let PlanOperator::Join(PhysicalJoin {
                strategy: Some(JoinStrategy::Dependent(nested)),
                ..
            }) = &plan.node(sub)?.operator
            {
                if nested.source == spec.source {
                    nested_same_source = true;
                    break;
                }
            }
        }

        if nested_same_source {
            debug!(join = id, source = %spec.source, "serializing dependent requests");
            if let PlanOperator::Join(PhysicalJoin {
                strategy: Some(JoinStrategy::Dependent(spec)),
                ..
            }) = &mut plan.node_mut(id)?.operator
            {
                spec.source_concurrency = Some(1);
            }
        }
    }
    Ok(())
}

/// Estimate how many rows satisfy a predicate.
pub fn predicate_selectivity(predicate: &Expression) -> f64 {
    match predicate {
        Expression::Comparison { op, .. } if op.is_equality() => EQUALITY_SELECTIVITY,
        Expression::Comparison { .. } => INEQUALITY_SELECTIVITY,
        Expression::Conjunction {
            op: ConjunctionOperator::And,
            children,
        } => children.iter().map(predicate_selectivity).product(),
        _ => DEFAULT_SELECTIVITY,
    }
}

fn estimate_node(plan: &PhysicalPlan, id: NodeId, stats: &[Option<NodeStatistics>]) -> Result<NodeStatistics> {
    let node = plan.node(id)?;
    let child = |idx: usize| child_statistics(node, stats, idx);

    let out = match &node.operator {
        PlanOperator::Access(access) => {
            let mut out = NodeStatistics::from(&access.statistics);
            if let Some(filter) = &access.filter {
                out.cardinality = out.cardinality.scaled(predicate_selectivity(filter));
            }
            out
        }
        PlanOperator::Select(select) => {
            let child = child(0)?;
            NodeStatistics {
                cardinality: child
                    .cardinality
                    .scaled(predicate_selectivity(&select.predicate)),
                column_ndv: child.column_ndv.clone(),
            }
        }
        PlanOperator::Project(project) => {
            let child = child(0)?;
            NodeStatistics {
                cardinality: child.cardinality,
                column_ndv: project
                    .exprs
                    .iter()
                    .map(|e| match e {
                        Expression::Column(idx) => child.ndv(*idx),
                        Expression::Literal(_) => StatisticsValue::Exact(1),
                        _ => StatisticsValue::Unknown,
                    })
                    .collect(),
            }
        }
        PlanOperator::Sort(_) => child(0)?.clone(),
        PlanOperator::DupRemove(_) => {
            let child = child(0)?;
            NodeStatistics {
                cardinality: child.cardinality.into_estimate(),
                column_ndv: child.column_ndv.clone(),
            }
        }
        PlanOperator::Grouping(grouping) => {
            let child = child(0)?;
            let num_columns = grouping.group_by.len() + grouping.aggregates.len();
            let mut out = NodeStatistics::unknown(num_columns);
            if grouping.group_by.is_empty() {
                out.cardinality = StatisticsValue::Exact(1);
            } else {
                let mut groups = Some(1usize);
                for (idx, expr) in grouping.group_by.iter().enumerate() {
                    let ndv = expr.as_column().map(|c| child.ndv(c));
                    if let Some(ndv) = ndv {
                        out.column_ndv[idx] = ndv;
                    }
                    groups = match (groups, ndv.and_then(|v| v.value().copied())) {
                        (Some(g), Some(v)) => Some(g.saturating_mul(v)),
                        _ => None,
                    };
                }
                out.cardinality = match (groups, child.cardinality.value()) {
                    (Some(g), Some(&c)) => StatisticsValue::Estimated(g.min(c)),
                    (None, Some(&c)) => StatisticsValue::Estimated(c),
                    _ => StatisticsValue::Unknown,
                };
            }
            out
        }
        PlanOperator::Limit(limit) => {
            let child = child(0)?;
            NodeStatistics {
                cardinality: match (child.cardinality, limit.limit) {
                    (card, None) => card,
                    (StatisticsValue::Unknown, Some(n)) => StatisticsValue::Estimated(n),
                    (card, Some(n)) => card.map(|c| c.saturating_sub(limit.offset).min(n)),
                },
                column_ndv: child.column_ndv.clone(),
            }
        }
        PlanOperator::UnionAll(_) => {
            let mut total = Some(0usize);
            for idx in 0..node.children.len() {
                total = match (total, child(idx)?.cardinality.value()) {
                    (Some(t), Some(&c)) => Some(t.saturating_add(c)),
                    _ => None,
                };
            }
            let mut out = NodeStatistics::unknown(node.output_types.len());
            if let Some(total) = total {
                out.cardinality = StatisticsValue::Estimated(total);
            }
            out
        }
        PlanOperator::Join(join) => {
            let left = child(0)?;
            let right = child(1)?;
            let cardinality = match (left.cardinality.value(), right.cardinality.value()) {
                (Some(&l), Some(&r)) => {
                    let card = if join.equality_conditions().is_empty() {
                        let product = l.saturating_mul(r) as f64;
                        match &join.residual {
                            Some(residual) => product * predicate_selectivity(residual),
                            None => product,
                        }
                    } else {
                        l.max(r) as f64
                    };
                    StatisticsValue::Estimated(card.ceil() as usize)
                }
                _ => StatisticsValue::Unknown,
            };
            NodeStatistics {
                cardinality,
                column_ndv: left
                    .column_ndv
                    .iter()
                    .chain(right.column_ndv.iter())
                    .map(|v| v.into_estimate())
                    .collect(),
            }
        }
    };

    Ok(out.clamp_ndv())
}

fn child_statistics<'a>(
    node: &PlanTemplate,
    stats: &'a [Option<NodeStatistics>],
    idx: usize,
) -> Result<&'a NodeStatistics> {
    node.children
        .get(idx)
        .and_then(|&c| stats.get(c))
        .and_then(|s| s.as_ref())
        .ok_or_else(|| ExecError::invariant("Missing child statistics").with_field("child", idx))
}
