use ahash::{HashSet, HashSetExt, RandomState};
use fedexec_error::{ExecError, Result};
use indexmap::{IndexMap, IndexSet};

use super::DependentValueSet;
use super::criteria::DependentCriteria;
use crate::arrays::row::Row;
use crate::arrays::scalar::ScalarValue;
use crate::source::capabilities::SourceCapabilities;

/// Shape of the criteria built for a single value batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriteriaKind {
    InList,
    RowValueIn,
    InListConjunction,
    TupleDisjunction,
    TempRelation,
}

/// Keys assigned to a single value batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSpec {
    pub kind: CriteriaKind,
    /// Indices into the value set.
    pub keys: Vec<usize>,
}

/// A materialized value batch ready to be pushed to the dependent side.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueBatch {
    pub index: usize,
    pub keys: Vec<usize>,
    pub criteria: DependentCriteria,
}

/// Partitions a dependent value set into value batches according to the
/// capabilities of the dependent source.
///
/// Batch assignment is computed up front, criteria are only materialized as
/// batches are requested.
#[derive(Debug)]
pub struct ValueBatcher {
    /// Target columns in ascending order.
    columns: Vec<usize>,
    /// Key positions matching the order of `columns`.
    order: Vec<usize>,
    specs: Vec<BatchSpec>,
    temp_name: String,
    next: usize,
}

impl ValueBatcher {
    /// Create a batcher for the given value set.
    ///
    /// `target_columns` are the dependent access columns in key order.
    pub fn try_new(
        values: &DependentValueSet,
        target_columns: &[usize],
        caps: &SourceCapabilities,
        temp_name: impl Into<String>,
    ) -> Result<Self> {
        if target_columns.len() != values.arity() {
            return Err(ExecError::invariant(
                "Dependent target columns don't match key arity",
            )
            .with_field("columns", target_columns.len())
            .with_field("arity", values.arity()));
        }

        let mut order: Vec<usize> = (0..target_columns.len()).collect();
        order.sort_by_key(|&pos| target_columns[pos]);
        let columns: Vec<usize> = order.iter().map(|&pos| target_columns[pos]).collect();

        let all_keys: Vec<usize> = (0..values.len()).collect();
        let specs = if all_keys.is_empty() {
            Vec::new()
        } else {
            plan_batches(values, &order, caps, all_keys)?
        };

        Ok(ValueBatcher {
            columns,
            order,
            specs,
            temp_name: temp_name.into(),
            next: 0,
        })
    }

    pub fn num_batches(&self) -> usize {
        self.specs.len()
    }

    pub fn specs(&self) -> &[BatchSpec] {
        &self.specs
    }

    /// Map each key in the value set to the batch it was assigned to.
    pub fn key_assignments(&self, num_keys: usize) -> Vec<usize> {
        let mut out = vec![usize::MAX; num_keys];
        for (batch_idx, spec) in self.specs.iter().enumerate() {
            for &key in &spec.keys {
                out[key] = batch_idx;
            }
        }
        out
    }

    /// Materialize the next value batch.
    pub fn next_batch(&mut self, values: &DependentValueSet) -> Result<Option<ValueBatch>> {
        let Some(spec) = self.specs.get(self.next) else {
            return Ok(None);
        };
        let index = self.next;
        self.next += 1;

        let tuples = spec
            .keys
            .iter()
            .map(|&k| {
                let key = values
                    .key(k)
                    .ok_or_else(|| ExecError::invariant("Missing dependent key"))?;
                key.project(&self.order)
                    .ok_or_else(|| ExecError::invariant("Dependent key projection out of bounds"))
            })
            .collect::<Result<Vec<Row>>>()?;

        let criteria = match spec.kind {
            CriteriaKind::InList => DependentCriteria::InList {
                column: self.columns[0],
                values: tuples
                    .into_iter()
                    .filter_map(|t| t.columns.into_iter().next())
                    .collect(),
            },
            CriteriaKind::RowValueIn => DependentCriteria::RowValueIn {
                columns: self.columns.clone(),
                tuples,
            },
            CriteriaKind::InListConjunction => {
                let mut lists: Vec<IndexSet<ScalarValue, RandomState>> =
                    vec![IndexSet::default(); self.columns.len()];
                for tuple in tuples {
                    for (list, v) in lists.iter_mut().zip(tuple.columns) {
                        list.insert(v);
                    }
                }
                DependentCriteria::InListConjunction {
                    lists: self
                        .columns
                        .iter()
                        .copied()
                        .zip(lists.into_iter().map(|l| l.into_iter().collect()))
                        .collect(),
                }
            }
            CriteriaKind::TupleDisjunction => DependentCriteria::TupleDisjunction {
                columns: self.columns.clone(),
                tuples,
            },
            CriteriaKind::TempRelation => DependentCriteria::TempRelation {
                name: self.temp_name.clone(),
                columns: self.columns.clone(),
                rows: tuples,
            },
        };

        Ok(Some(ValueBatch {
            index,
            keys: spec.keys.clone(),
            criteria,
        }))
    }
}

fn chunked(kind: CriteriaKind, keys: Vec<usize>, size: usize) -> impl Iterator<Item = BatchSpec> {
    keys.chunks(size.max(1))
        .map(|chunk| BatchSpec {
            kind,
            keys: chunk.to_vec(),
        })
        .collect::<Vec<_>>()
        .into_iter()
}

fn disjunction_size(caps: &SourceCapabilities) -> usize {
    if caps.supports_or_criteria {
        caps.max_predicates()
    } else {
        1
    }
}

fn plan_batches(
    values: &DependentValueSet,
    order: &[usize],
    caps: &SourceCapabilities,
    keys: Vec<usize>,
) -> Result<Vec<BatchSpec>> {
    if caps.supports_full_dependent_join {
        return Ok(vec![BatchSpec {
            kind: CriteriaKind::TempRelation,
            keys,
        }]);
    }

    let arity = values.arity();
    if arity == 1 {
        if caps.supports_in_criteria {
            return Ok(chunked(CriteriaKind::InList, keys, caps.max_in_size()).collect());
        }
        if caps.supports_or_criteria {
            return Ok(chunked(CriteriaKind::TupleDisjunction, keys, caps.max_predicates()).collect());
        }
        return Err(ExecError::new("Source does not accept dependent criteria"));
    }

    if caps.supports_row_value_in {
        return Ok(chunked(CriteriaKind::RowValueIn, keys, caps.max_in_size()).collect());
    }
    if caps.supports_in_criteria {
        return plan_column_split(values, order, caps, keys);
    }
    if caps.supports_or_criteria {
        return Ok(chunked(CriteriaKind::TupleDisjunction, keys, caps.max_predicates()).collect());
    }

    Err(ExecError::new("Source does not accept dependent criteria"))
}

/// Current batch while packing leading column groups.
#[derive(Debug)]
struct PackState {
    keys: Vec<usize>,
    distinct: Vec<HashSet<ScalarValue>>,
}

/// Split multi-column keys into per-column IN lists.
///
/// Keys are grouped by the value of the first target column, and groups are
/// packed whole into batches so that the cross product of the IN lists in
/// different batches never overlaps. A group with too many distinct values
/// in some column is sent as a disjunction instead.
fn plan_column_split(
    values: &DependentValueSet,
    order: &[usize],
    caps: &SourceCapabilities,
    keys: Vec<usize>,
) -> Result<Vec<BatchSpec>> {
    let max_in = caps.max_in_size();
    let leading = order[0];

    let mut groups: IndexMap<&ScalarValue, Vec<usize>, RandomState> = IndexMap::default();
    for k in keys {
        let key = values
            .key(k)
            .ok_or_else(|| ExecError::invariant("Missing dependent key"))?;
        groups.entry(&key.columns[leading]).or_default().push(k);
    }

    let mut specs = Vec::new();
    let mut current: Option<PackState> = None;

    for (_, group) in groups {
        let mut group_distinct: Vec<HashSet<ScalarValue>> =
            (0..order.len()).map(|_| HashSet::new()).collect();
        for &k in &group {
            if let Some(key) = values.key(k) {
                for (set, &pos) in group_distinct.iter_mut().zip(order) {
                    set.insert(key.columns[pos].clone());
                }
            }
        }

        if group_distinct.iter().any(|set| set.len() > max_in) {
            if let Some(state) = current.take() {
                specs.push(BatchSpec {
                    kind: CriteriaKind::InListConjunction,
                    keys: state.keys,
                });
            }
            specs.extend(chunked(
                CriteriaKind::TupleDisjunction,
                group,
                disjunction_size(caps),
            ));
            continue;
        }

        let fits = match &current {
            Some(state) => state
                .distinct
                .iter()
                .zip(&group_distinct)
                .all(|(curr, add)| curr.len() + add.difference(curr).count() <= max_in),
            None => true,
        };

        if !fits {
            if let Some(state) = current.take() {
                specs.push(BatchSpec {
                    kind: CriteriaKind::InListConjunction,
                    keys: state.keys,
                });
            }
        }

        match current.as_mut() {
            Some(state) => {
                state.keys.extend(group);
                for (curr, add) in state.distinct.iter_mut().zip(group_distinct) {
                    curr.extend(add);
                }
            }
            None => {
                current = Some(PackState {
                    keys: group,
                    distinct: group_distinct,
                });
            }
        }
    }

    if let Some(state) = current {
        specs.push(BatchSpec {
            kind: CriteriaKind::InListConjunction,
            keys: state.keys,
        });
    }

    Ok(specs)
}
