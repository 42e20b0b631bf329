use std::sync::Arc;

use ahash::HashMap;
use uuid::Uuid;

use super::plan::NodeId;
use crate::buffer::BufferManager;
use crate::config::execution::ExecutionConfig;
use crate::dependent::criteria::DependentCriteria;
use crate::expr::CorrelatedBindings;
use crate::source::DataManager;
use crate::source::capabilities::CapabilitiesFinder;

/// Collaborators and settings shared by every node executing a single
/// plan.
///
/// Cloning is cheap. Dependent joins derive a new context for each
/// dependent side execution carrying the criteria for its access node.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub request_id: Uuid,
    pub config: Arc<ExecutionConfig>,
    pub data_manager: Arc<dyn DataManager>,
    pub buffer_manager: Arc<BufferManager>,
    pub capabilities: Arc<dyn CapabilitiesFinder>,
    pub correlated: Arc<CorrelatedBindings>,
    dependent: Arc<HashMap<NodeId, Vec<DependentCriteria>>>,
}

impl ExecutionContext {
    pub fn new(
        config: ExecutionConfig,
        data_manager: Arc<dyn DataManager>,
        capabilities: Arc<dyn CapabilitiesFinder>,
    ) -> Self {
        let buffer_manager = BufferManager::new(config.max_buffered_rows);
        ExecutionContext {
            request_id: Uuid::new_v4(),
            config: Arc::new(config),
            data_manager,
            buffer_manager,
            capabilities,
            correlated: Arc::new(CorrelatedBindings::new()),
            dependent: Arc::new(HashMap::default()),
        }
    }

    pub fn with_buffer_manager(mut self, buffer_manager: Arc<BufferManager>) -> Self {
        self.buffer_manager = buffer_manager;
        self
    }

    /// Replace the correlated bindings used by expressions.
    pub fn with_correlated(mut self, bindings: CorrelatedBindings) -> Self {
        self.correlated = Arc::new(bindings);
        self
    }

    /// Derive a context that pushes `criteria` into the access node `target`.
    pub fn with_dependent_criteria(&self, target: NodeId, criteria: DependentCriteria) -> Self {
        let mut dependent = (*self.dependent).clone();
        dependent.entry(target).or_default().push(criteria);
        ExecutionContext {
            dependent: Arc::new(dependent),
            ..self.clone()
        }
    }

    /// Criteria to push into the access node with the given id.
    pub fn dependent_criteria(&self, node: NodeId) -> &[DependentCriteria] {
        self.dependent
            .get(&node)
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }
}
