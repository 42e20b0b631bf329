use std::fmt::Debug;

use ahash::HashMap;
use serde::{Deserialize, Serialize};

/// Where a source places nulls when ordering ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullOrder {
    /// Nulls sort before all other values.
    #[default]
    Low,
    /// Nulls sort after all other values.
    High,
}

/// What a source can accept in a pushed down request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceCapabilities {
    pub supports_in_criteria: bool,
    /// Multi-column `(a, b) IN ((1, 2), ...)` predicates.
    pub supports_row_value_in: bool,
    pub supports_or_criteria: bool,
    pub supports_order_by: bool,
    /// The source can join against a temporary relation holding every key.
    pub supports_full_dependent_join: bool,
    pub supports_bind_parameters: bool,
    /// Max number of values in a single IN list. None for unbounded.
    pub max_in_criteria_size: Option<usize>,
    /// Max number of ORed predicates in a single request. None for unbounded.
    pub max_dependent_predicates: Option<usize>,
    pub null_order: NullOrder,
}

impl Default for SourceCapabilities {
    fn default() -> Self {
        SourceCapabilities {
            supports_in_criteria: true,
            supports_row_value_in: false,
            supports_or_criteria: true,
            supports_order_by: true,
            supports_full_dependent_join: false,
            supports_bind_parameters: false,
            max_in_criteria_size: Some(1000),
            max_dependent_predicates: Some(50),
            null_order: NullOrder::Low,
        }
    }
}

impl SourceCapabilities {
    /// If dependent values can be pushed into this source at all.
    pub fn supports_dependent_criteria(&self) -> bool {
        self.supports_full_dependent_join || self.supports_in_criteria || self.supports_or_criteria
    }

    pub fn max_in_size(&self) -> usize {
        self.max_in_criteria_size.unwrap_or(usize::MAX).max(1)
    }

    pub fn max_predicates(&self) -> usize {
        self.max_dependent_predicates.unwrap_or(usize::MAX).max(1)
    }
}

/// Looks up the capabilities of a source by name.
pub trait CapabilitiesFinder: Debug + Sync + Send {
    fn find_capabilities(&self, source: &str) -> Option<SourceCapabilities>;

    /// Capabilities for a source, falling back to the defaults for unknown
    /// sources.
    fn capabilities_or_default(&self, source: &str) -> SourceCapabilities {
        self.find_capabilities(source).unwrap_or_default()
    }
}

/// A static map of source capabilities.
#[derive(Debug, Clone, Default)]
pub struct CapabilitiesRegistry {
    sources: HashMap<String, SourceCapabilities>,
}

impl CapabilitiesRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: impl Into<String>, caps: SourceCapabilities) {
        self.sources.insert(source.into(), caps);
    }

    pub fn with_source(mut self, source: impl Into<String>, caps: SourceCapabilities) -> Self {
        self.register(source, caps);
        self
    }
}

impl CapabilitiesFinder for CapabilitiesRegistry {
    fn find_capabilities(&self, source: &str) -> Option<SourceCapabilities> {
        self.sources.get(source).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_sizes() {
        let caps = SourceCapabilities {
            max_in_criteria_size: None,
            max_dependent_predicates: Some(0),
            ..Default::default()
        };
        assert_eq!(usize::MAX, caps.max_in_size());
        assert_eq!(1, caps.max_predicates());
    }

    #[test]
    fn registry_default_fallback() {
        let reg = CapabilitiesRegistry::new().with_source(
            "pm1",
            SourceCapabilities {
                supports_row_value_in: true,
                ..Default::default()
            },
        );
        assert!(reg.capabilities_or_default("pm1").supports_row_value_in);
        assert!(!reg.capabilities_or_default("pm2").supports_row_value_in);
        assert!(reg.find_capabilities("pm2").is_none());
    }

    #[test]
    fn deserialize_partial() {
        let caps: SourceCapabilities =
            serde_json::from_str(r#"{"max_in_criteria_size": 2, "null_order": "high"}"#).unwrap();
        assert_eq!(Some(2), caps.max_in_criteria_size);
        assert_eq!(NullOrder::High, caps.null_order);
        assert!(caps.supports_in_criteria);
    }
}
