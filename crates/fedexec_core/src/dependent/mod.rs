//! Dependent join key harvesting and value batching.

pub mod batcher;
pub mod criteria;

use ahash::RandomState;
use fedexec_error::{ExecError, Result};
use indexmap::IndexMap;

use crate::arrays::row::Row;

/// Distinct key tuples harvested from the independent side of a dependent
/// join, in discovery order.
///
/// Each key also tracks the indices of the independent rows that produced
/// it.
#[derive(Debug, Default)]
pub struct DependentValueSet {
    arity: usize,
    keys: IndexMap<Row, Vec<usize>, RandomState>,
}

impl DependentValueSet {
    pub fn new(arity: usize) -> Self {
        DependentValueSet {
            arity,
            keys: IndexMap::default(),
        }
    }

    /// Insert a key for an independent row.
    ///
    /// Keys containing a null are never inserted since they can't match
    /// anything. Returns true if the key was not previously in the set.
    pub fn insert(&mut self, key: Row, row_idx: usize) -> Result<bool> {
        if key.arity() != self.arity {
            return Err(ExecError::invariant("Dependent key has unexpected arity")
                .with_field("expected", self.arity)
                .with_field("got", key.arity()));
        }
        if key.has_null() {
            return Ok(false);
        }

        match self.keys.get_mut(&key) {
            Some(rows) => {
                rows.push(row_idx);
                Ok(false)
            }
            None => {
                self.keys.insert(key, vec![row_idx]);
                Ok(true)
            }
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key(&self, idx: usize) -> Option<&Row> {
        self.keys.get_index(idx).map(|(k, _)| k)
    }

    pub fn get_index_of(&self, key: &Row) -> Option<usize> {
        self.keys.get_index_of(key)
    }

    /// Independent row indices that produced the key at `idx`.
    pub fn rows_for_key(&self, idx: usize) -> &[usize] {
        self.keys
            .get_index(idx)
            .map(|(_, rows)| rows.as_slice())
            .unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &Row> {
        self.keys.keys()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}
