//! Arena of plan templates.
//!
//! Nodes reference their children by index into the arena. Execution state
//! lives in `ExecNode`s instantiated from the arena, so the same plan can be
//! instantiated any number of times.

use std::sync::Arc;

use fedexec_error::{ExecError, Result};

use super::node::ExecNode;
use super::operators::access::PhysicalAccess;
use super::operators::dup_remove::PhysicalDupRemove;
use super::operators::grouping::PhysicalGrouping;
use super::operators::join::PhysicalJoin;
use super::operators::limit::PhysicalLimit;
use super::operators::project::PhysicalProject;
use super::operators::select::PhysicalSelect;
use super::operators::sort::PhysicalSort;
use super::operators::union_all::PhysicalUnionAll;
use crate::arrays::datatype::DataType;
use crate::explain::{ExplainEntry, Explainable};

pub type NodeId = usize;

/// All node kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOperator {
    Access(PhysicalAccess),
    Project(PhysicalProject),
    Select(PhysicalSelect),
    Join(PhysicalJoin),
    Sort(PhysicalSort),
    Grouping(PhysicalGrouping),
    DupRemove(PhysicalDupRemove),
    UnionAll(PhysicalUnionAll),
    Limit(PhysicalLimit),
}

impl PlanOperator {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Access(_) => "Access",
            Self::Project(_) => "Project",
            Self::Select(_) => "Select",
            Self::Join(_) => "Join",
            Self::Sort(_) => "Sort",
            Self::Grouping(_) => "Grouping",
            Self::DupRemove(_) => "DupRemove",
            Self::UnionAll(_) => "UnionAll",
            Self::Limit(_) => "Limit",
        }
    }

    /// If the child at `idx` is opened when this node is opened.
    ///
    /// The dependent side of a dependent join is only ever executed through
    /// fresh instantiations.
    pub fn opens_child(&self, idx: usize) -> bool {
        match self {
            Self::Join(join) => join.opens_child(idx),
            _ => true,
        }
    }

    pub fn explain_entry(&self) -> ExplainEntry {
        match self {
            Self::Access(op) => op.explain_entry(),
            Self::Project(op) => op.explain_entry(),
            Self::Select(op) => op.explain_entry(),
            Self::Join(op) => op.explain_entry(),
            Self::Sort(op) => op.explain_entry(),
            Self::Grouping(op) => op.explain_entry(),
            Self::DupRemove(op) => op.explain_entry(),
            Self::UnionAll(op) => op.explain_entry(),
            Self::Limit(op) => op.explain_entry(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanTemplate {
    pub operator: PlanOperator,
    pub children: Vec<NodeId>,
    pub output_types: Vec<DataType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalPlan {
    pub nodes: Vec<PlanTemplate>,
    pub root: NodeId,
}

impl PhysicalPlan {
    pub fn node(&self, id: NodeId) -> Result<&PlanTemplate> {
        self.nodes
            .get(id)
            .ok_or_else(|| ExecError::invariant("Missing plan node").with_field("id", id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut PlanTemplate> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| ExecError::invariant("Missing plan node").with_field("id", id))
    }

    pub fn output_types(&self) -> Result<&[DataType]> {
        Ok(&self.node(self.root)?.output_types)
    }

    /// Instantiate the full plan.
    pub fn instantiate(self: &Arc<Self>) -> Result<ExecNode> {
        ExecNode::instantiate(self.clone(), self.root)
    }

    /// Ids of all nodes in the subtree rooted at `id`, including `id`.
    pub fn subtree_ids(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.node(id)?.children.iter().rev());
        }
        Ok(out)
    }

    /// Produce an explain tree for the plan.
    pub fn explain(&self) -> Result<ExplainEntry> {
        self.explain_node(self.root)
    }

    fn explain_node(&self, id: NodeId) -> Result<ExplainEntry> {
        let node = self.node(id)?;
        let mut ent = node.operator.explain_entry().with_value("id", id);
        for &child in &node.children {
            ent = ent.with_child(self.explain_node(child)?);
        }
        Ok(ent)
    }
}
