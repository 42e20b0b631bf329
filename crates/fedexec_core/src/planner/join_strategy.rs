//! Join strategy selection.

use fedexec_error::Result;
use tracing::debug;

use super::dependent_target::resolve_dependent_target;
use super::statistics::{NodeStatistics, StatisticsValue};
use crate::arrays::datatype::DataType;
use crate::config::execution::ExecutionConfig;
use crate::execution::operators::join::{
    DependentJoinSpec,
    JoinHint,
    JoinSide,
    JoinStrategy,
    PhysicalJoin,
    ProbeStrategy,
};
use crate::execution::plan::{NodeId, PhysicalPlan};
use crate::source::capabilities::CapabilitiesFinder;

/// Inputs needed to pick a strategy for a single join.
#[derive(Debug)]
pub struct JoinInputs<'a> {
    pub plan: &'a PhysicalPlan,
    pub join_id: NodeId,
    pub join: &'a PhysicalJoin,
    pub children: [NodeId; 2],
    pub stats: [&'a NodeStatistics; 2],
    pub types: [&'a [DataType]; 2],
}

impl JoinInputs<'_> {
    fn child(&self, side: JoinSide) -> NodeId {
        self.children[side.child_idx()]
    }

    fn stats(&self, side: JoinSide) -> &NodeStatistics {
        self.stats[side.child_idx()]
    }

    fn types(&self, side: JoinSide) -> &[DataType] {
        self.types[side.child_idx()]
    }

    fn cardinality(&self, side: JoinSide) -> Option<usize> {
        self.stats(side).cardinality.value().copied()
    }
}

/// If rows keyed by these types can be merged using value ordering.
pub fn merge_compatible(a: DataType, b: DataType) -> bool {
    a == b || (a.is_integer() && b.is_integer())
}

/// Choose the strategy for a join.
///
/// A dependent join is planned when the dependent side's source accepts
/// pushed criteria and the independent side is estimated to be smaller,
/// unless the independent side's distinct keys approach the dependent
/// side's cardinality. Otherwise a merge join is used when there's an
/// equality condition, falling back to a nested loop join.
pub fn choose_join_strategy(
    inputs: &JoinInputs<'_>,
    config: &ExecutionConfig,
    capabilities: &dyn CapabilitiesFinder,
) -> Result<JoinStrategy> {
    let join = inputs.join;
    let equalities = join.equality_conditions();

    if equalities.is_empty() {
        return Ok(JoinStrategy::NestedLoop {
            materialize: smaller_side(inputs),
        });
    }

    if join.hint != Some(JoinHint::MakeNotDep) {
        let candidates: Vec<JoinSide> = match join.hint {
            Some(JoinHint::MakeDep(dependent)) => vec![dependent.other()],
            _ => vec![JoinSide::Left, JoinSide::Right],
        };

        let mut best: Option<(usize, DependentJoinSpec)> = None;
        for independent in candidates {
            if let Some(spec) = try_dependent(inputs, independent, config, capabilities)? {
                let card = inputs.cardinality(independent).unwrap_or(usize::MAX);
                if best.as_ref().is_none_or(|(best_card, _)| card < *best_card) {
                    best = Some((card, spec));
                }
            }
        }
        if let Some((_, spec)) = best {
            return Ok(JoinStrategy::Dependent(spec));
        }
    }

    for side in [JoinSide::Right, JoinSide::Left] {
        if inputs.cardinality(side).is_some_and(|c| c <= 1) {
            return Ok(JoinStrategy::NestedLoop { materialize: side });
        }
    }

    let mergeable = equalities.iter().all(|&idx| {
        let cond = &join.conditions[idx];
        match (
            cond.left.datatype(inputs.types(JoinSide::Left)),
            cond.right.datatype(inputs.types(JoinSide::Right)),
        ) {
            (Ok(l), Ok(r)) => merge_compatible(l, r),
            _ => false,
        }
    });

    if mergeable {
        Ok(JoinStrategy::Merge)
    } else {
        Ok(JoinStrategy::NestedLoop {
            materialize: smaller_side(inputs),
        })
    }
}

fn smaller_side(inputs: &JoinInputs<'_>) -> JoinSide {
    match (
        inputs.cardinality(JoinSide::Left),
        inputs.cardinality(JoinSide::Right),
    ) {
        (Some(l), Some(r)) if l < r => JoinSide::Left,
        _ => JoinSide::Right,
    }
}

fn try_dependent(
    inputs: &JoinInputs<'_>,
    independent: JoinSide,
    config: &ExecutionConfig,
    capabilities: &dyn CapabilitiesFinder,
) -> Result<Option<DependentJoinSpec>> {
    let join = inputs.join;
    let dependent = independent.other();
    let hinted = join.hint == Some(JoinHint::MakeDep(dependent));

    // Unmatched rows from the dependent side can't be produced since the
    // dependent side only ever returns rows matching the criteria.
    if join.join_type.preserves(dependent) {
        return Ok(None);
    }

    let mut key_conditions = Vec::new();
    let mut dependent_columns = Vec::new();
    for idx in join.equality_conditions() {
        if let Some(column) = join.conditions[idx].expr_for(dependent).as_column() {
            key_conditions.push(idx);
            dependent_columns.push(column);
        }
    }
    if key_conditions.is_empty() {
        return Ok(None);
    }

    let Some(target) =
        resolve_dependent_target(inputs.plan, inputs.child(dependent), &dependent_columns)?
    else {
        return Ok(None);
    };

    let caps = capabilities.capabilities_or_default(&target.source);
    if !caps.supports_dependent_criteria() {
        return Ok(None);
    }

    if !hinted {
        let (Some(ind_card), Some(dep_card)) = (
            inputs.cardinality(independent),
            inputs.cardinality(dependent),
        ) else {
            return Ok(None);
        };
        if ind_card >= dep_card {
            return Ok(None);
        }

        let ndv = key_ndv(inputs, independent, &key_conditions).unwrap_or(ind_card);
        let threshold = (dep_card as f64) * config.dependent_backoff_ratio;
        if (ndv as f64) >= threshold || ndv > config.max_dependent_values {
            debug!(
                join = inputs.join_id,
                %independent,
                ndv,
                dependent_cardinality = dep_card,
                "backing off dependent join"
            );
            return Ok(None);
        }
    }

    let probe = if key_conditions.iter().all(|&idx| {
        let cond = &join.conditions[idx];
        match (
            cond.expr_for(independent).datatype(inputs.types(independent)),
            cond.expr_for(dependent).datatype(inputs.types(dependent)),
        ) {
            (Ok(a), Ok(b)) => merge_compatible(a, b),
            _ => false,
        }
    }) {
        ProbeStrategy::Merge
    } else {
        ProbeStrategy::NestedLoop
    };

    Ok(Some(DependentJoinSpec {
        independent,
        probe,
        target: target.access,
        key_conditions,
        target_columns: target.columns,
        source: target.source,
        capabilities: caps,
        source_concurrency: None,
    }))
}

/// Estimated distinct key tuples on one side of the join.
fn key_ndv(inputs: &JoinInputs<'_>, side: JoinSide, key_conditions: &[usize]) -> Option<usize> {
    let stats = inputs.stats(side);
    let mut ndv: usize = 1;
    for &idx in key_conditions {
        let column = inputs.join.conditions[idx].expr_for(side).as_column()?;
        match stats.ndv(column) {
            StatisticsValue::Exact(v) | StatisticsValue::Estimated(v) => {
                ndv = ndv.saturating_mul(v)
            }
            StatisticsValue::Unknown => return None,
        }
    }
    match stats.cardinality.value() {
        Some(&card) => Some(ndv.min(card)),
        None => Some(ndv),
    }
}
