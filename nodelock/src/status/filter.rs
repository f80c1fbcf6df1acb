//! Predicates over node records.

use crate::types::{NodeRecord, NodeStatus};

/// One narrowing predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeFilter {
    MachineType(String),
    /// Current lease holder; free nodes never match
    Owner(String),
    Status(NodeStatus),
    Locked(bool),
    /// Exact description
    Description(String),
    /// Description substring; nodes without a description never match
    DescriptionContains(String),
}

impl NodeFilter {
    pub fn matches(&self, node: &NodeRecord) -> bool {
        match self {
            NodeFilter::MachineType(t) => &node.machine_type == t,
            NodeFilter::Owner(owner) => node.owner() == Some(owner.as_str()),
            NodeFilter::Status(status) => node.up == status.is_up(),
            NodeFilter::Locked(locked) => node.locked == *locked,
            NodeFilter::Description(d) => node.description.as_deref() == Some(d.as_str()),
            NodeFilter::DescriptionContains(pattern) => node
                .description
                .as_deref()
                .map_or(false, |d| d.contains(pattern.as_str())),
        }
    }
}

/// Ordered sequence of filters, applied left to right.
///
/// Each filter narrows the set independently of the others, so the final
/// result does not depend on the order; the order only fixes when an empty
/// set stops the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterChain {
    filters: Vec<NodeFilter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: NodeFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Append `filter` when present.
    pub fn with_opt(self, filter: Option<NodeFilter>) -> Self {
        match filter {
            Some(filter) => self.with(filter),
            None => self,
        }
    }

    pub fn filters(&self) -> &[NodeFilter] {
        &self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn apply(&self, mut nodes: Vec<NodeRecord>) -> Vec<NodeRecord> {
        for filter in &self.filters {
            if nodes.is_empty() {
                break;
            }
            nodes.retain(|n| filter.matches(n));
        }
        nodes
    }
}
