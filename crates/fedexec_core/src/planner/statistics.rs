//! Cardinality and distinct value estimates used when choosing join
//! strategies.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod assumptions {
    //! Assumptions when we don't have complete statistics available to us.

    /// Selectivity with '='.
    pub const EQUALITY_SELECTIVITY: f64 = 0.1;
    /// Selectivity with other comparison operators like '<', '>', '!=' etc.
    pub const INEQUALITY_SELECTIVITY: f64 = 0.3;
    /// Default selectivity to use if neither of the above apply.
    pub const DEFAULT_SELECTIVITY: f64 = 0.2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatisticsValue<T> {
    Exact(T),
    Estimated(T),
    Unknown,
}

impl<T> StatisticsValue<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Exact(v) | Self::Estimated(v) => Some(v),
            Self::Unknown => None,
        }
    }

    /// Demote an exact value to an estimate.
    pub fn into_estimate(self) -> Self {
        match self {
            Self::Exact(v) => Self::Estimated(v),
            other => other,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StatisticsValue<U> {
        match self {
            Self::Exact(v) => StatisticsValue::Exact(f(v)),
            Self::Estimated(v) => StatisticsValue::Estimated(f(v)),
            Self::Unknown => StatisticsValue::Unknown,
        }
    }
}

impl StatisticsValue<usize> {
    /// Scale an estimate by a selectivity.
    pub fn scaled(self, selectivity: f64) -> Self {
        match self.value() {
            Some(&v) => Self::Estimated(((v as f64) * selectivity).ceil() as usize),
            None => Self::Unknown,
        }
    }
}

impl<T: fmt::Display> fmt::Display for StatisticsValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "{v}"),
            Self::Estimated(v) => write!(f, "~{v}"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Statistics for a relation read by an access node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStatistics {
    pub cardinality: StatisticsValue<usize>,
    /// Number of distinct values per column.
    pub column_ndv: Vec<StatisticsValue<usize>>,
}

impl TableStatistics {
    pub fn unknown(num_columns: usize) -> Self {
        TableStatistics {
            cardinality: StatisticsValue::Unknown,
            column_ndv: vec![StatisticsValue::Unknown; num_columns],
        }
    }

    pub fn with_cardinality(mut self, cardinality: usize) -> Self {
        self.cardinality = StatisticsValue::Exact(cardinality);
        self
    }

    pub fn with_ndv(mut self, column: usize, ndv: usize) -> Self {
        if let Some(v) = self.column_ndv.get_mut(column) {
            *v = StatisticsValue::Exact(ndv);
        }
        self
    }
}

/// Estimated statistics for the output of a plan node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatistics {
    pub cardinality: StatisticsValue<usize>,
    pub column_ndv: Vec<StatisticsValue<usize>>,
}

impl NodeStatistics {
    pub fn unknown(num_columns: usize) -> Self {
        NodeStatistics {
            cardinality: StatisticsValue::Unknown,
            column_ndv: vec![StatisticsValue::Unknown; num_columns],
        }
    }

    pub fn ndv(&self, column: usize) -> StatisticsValue<usize> {
        self.column_ndv
            .get(column)
            .copied()
            .unwrap_or(StatisticsValue::Unknown)
    }

    /// Cap every distinct value count at the cardinality.
    pub fn clamp_ndv(mut self) -> Self {
        if let Some(&card) = self.cardinality.value() {
            for ndv in &mut self.column_ndv {
                if let Some(&v) = ndv.value() {
                    if v > card {
                        *ndv = StatisticsValue::Estimated(card);
                    }
                }
            }
        }
        self
    }
}

impl From<&TableStatistics> for NodeStatistics {
    fn from(stats: &TableStatistics) -> Self {
        NodeStatistics {
            cardinality: stats.cardinality,
            column_ndv: stats.column_ndv.clone(),
        }
    }
}
