//! Status queries over the node pool.

use std::sync::Arc;

use tracing::{error, warn};

use super::filter::{FilterChain, NodeFilter};
use crate::client::LockService;
use crate::context::LockContext;
use crate::error::LockError;
use crate::keyscan::KeyScanner;
use crate::types::{NodeRecord, NodeStatus};

/// What to fetch and how to narrow it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusQuery {
    /// Specific nodes; empty means the whole pool
    pub names: Vec<String>,
    pub machine_type: Option<String>,
    pub owner: Option<String>,
    pub status: Option<NodeStatus>,
    pub locked: Option<bool>,
    pub description: Option<String>,
    pub description_contains: Option<String>,
    /// Do not default the owner filter to the current user
    pub all: bool,
}

impl StatusQuery {
    /// Filters in their fixed order: type, default owner, explicit owner,
    /// status, locked, exact description, description substring.
    ///
    /// A pool-wide query without an owner and without `all` is limited to
    /// nodes held by `current_owner`.
    pub fn filter_chain(&self, current_owner: &str) -> FilterChain {
        let default_owner = (self.names.is_empty() && self.owner.is_none() && !self.all)
            .then(|| NodeFilter::Owner(current_owner.to_string()));

        FilterChain::new()
            .with_opt(self.machine_type.clone().map(NodeFilter::MachineType))
            .with_opt(default_owner)
            .with_opt(self.owner.clone().map(NodeFilter::Owner))
            .with_opt(self.status.map(NodeFilter::Status))
            .with_opt(self.locked.map(NodeFilter::Locked))
            .with_opt(self.description.clone().map(NodeFilter::Description))
            .with_opt(
                self.description_contains
                    .clone()
                    .map(NodeFilter::DescriptionContains),
            )
    }
}

/// Answers "who holds what".
#[derive(Clone)]
pub struct StatusQueryEngine {
    ctx: Arc<LockContext>,
    service: Arc<dyn LockService>,
    scanner: KeyScanner,
}

impl StatusQueryEngine {
    pub fn new(ctx: Arc<LockContext>, service: Arc<dyn LockService>, scanner: KeyScanner) -> Self {
        Self {
            ctx,
            service,
            scanner,
        }
    }

    /// Fetch, refresh VM keys where cheap, and filter.
    ///
    /// Named nodes unknown to the service are logged and skipped. Locked VMs
    /// among named nodes get a fresh key scan before the final fetch; a
    /// pool-wide query only re-lists, since scanning every VM is too costly.
    pub async fn query(&self, query: &StatusQuery) -> Result<Vec<NodeRecord>, LockError> {
        let mut nodes = self.fetch(query).await?;

        let locked_vms: Vec<String> = nodes
            .iter()
            .filter(|n| n.is_virtual() && n.locked)
            .map(|n| n.name.clone())
            .collect();

        if !locked_vms.is_empty() {
            if !query.names.is_empty() {
                match self.scanner.scan_and_update(&locked_vms).await {
                    Ok(report) if !report.is_success() => {
                        warn!(errors = report.error_count(), "Some host keys could not be refreshed");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Host key refresh failed"),
                }
            }
            nodes = self.fetch(query).await?;
        }

        if nodes.is_empty() {
            error!("Error retrieving lock statuses");
            return Err(LockError::request_failed(
                "status",
                "lock server",
                "no node status retrieved",
            ));
        }

        Ok(query.filter_chain(&self.ctx.owner).apply(nodes))
    }

    async fn fetch(&self, query: &StatusQuery) -> Result<Vec<NodeRecord>, LockError> {
        if query.names.is_empty() {
            return self
                .service
                .list_nodes(query.machine_type.as_deref())
                .await?
                .ok_or_else(|| {
                    LockError::request_failed("list nodes", "lock server", "request refused")
                });
        }

        let mut nodes = Vec::with_capacity(query.names.len());
        for name in &query.names {
            match self.service.get_node(name).await? {
                Some(node) => nodes.push(node),
                None => error!(node = %name, "Lock server doesn't know about machine"),
            }
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockLockService;
    use crate::keyscan::StaticKeyScan;
    use tokio_util::sync::CancellationToken;

    const ME: &str = "alice@laptop";

    fn engine(service: Arc<MockLockService>, scan: StaticKeyScan) -> StatusQueryEngine {
        let ctx = Arc::new(LockContext::new("http://lock", ME));
        let scanner = KeyScanner::new(
            ctx.clone(),
            service.clone(),
            Arc::new(scan),
            CancellationToken::new(),
        );
        StatusQueryEngine::new(ctx, service, scanner)
    }

    fn pool() -> MockLockService {
        MockLockService::new()
            .with_node(NodeRecord::new("ubuntu@plana01.lab", "plana").locked_by(ME))
            .with_node(NodeRecord::new("ubuntu@plana02.lab", "plana").locked_by("bob@desk"))
            .with_node(NodeRecord::new("ubuntu@plana03.lab", "plana"))
            .with_node(
                NodeRecord::new("ubuntu@vpm001.lab", "vps")
                    .on_vm_host("mira01")
                    .locked_by(ME)
                    .with_key("OLD"),
            )
    }

    fn names(nodes: &[NodeRecord]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn test_default_owner_only_for_unqualified_pool_query() {
        let pool_wide = StatusQuery::default();
        assert_eq!(
            pool_wide.filter_chain(ME).filters(),
            &[NodeFilter::Owner(ME.to_string())]
        );

        let all = StatusQuery {
            all: true,
            ..Default::default()
        };
        assert!(all.filter_chain(ME).is_empty());

        let named = StatusQuery {
            names: vec!["ubuntu@plana02.lab".to_string()],
            ..Default::default()
        };
        assert!(named.filter_chain(ME).is_empty());
    }

    #[tokio::test]
    async fn test_pool_query_defaults_to_current_owner() {
        let service = Arc::new(pool());
        let engine = engine(service.clone(), StaticKeyScan::new());

        let nodes = engine.query(&StatusQuery::default()).await.unwrap();
        assert_eq!(names(&nodes), vec!["ubuntu@plana01.lab", "ubuntu@vpm001.lab"]);
        // pool-wide queries re-list instead of scanning
        assert_eq!(service.call_count("list"), 2);
    }

    #[tokio::test]
    async fn test_named_query_skips_unknown_and_refreshes_keys() {
        let service = Arc::new(pool());
        let engine = engine(
            service.clone(),
            StaticKeyScan::new().with_key("vpm001.lab", "NEW"),
        );
        let query = StatusQuery {
            names: vec![
                "ubuntu@vpm001.lab".to_string(),
                "ubuntu@ghost.lab".to_string(),
                "ubuntu@plana02.lab".to_string(),
            ],
            ..Default::default()
        };

        let nodes = engine.query(&query).await.unwrap();
        assert_eq!(names(&nodes), vec!["ubuntu@vpm001.lab", "ubuntu@plana02.lab"]);
        assert_eq!(nodes[0].pub_key(), "NEW");
    }

    #[tokio::test]
    async fn test_filters_apply_in_order() {
        let service = Arc::new(pool());
        let engine = engine(service, StaticKeyScan::new());
        let query = StatusQuery {
            machine_type: Some("plana".to_string()),
            locked: Some(false),
            all: true,
            ..Default::default()
        };

        let nodes = engine.query(&query).await.unwrap();
        assert_eq!(names(&nodes), vec!["ubuntu@plana03.lab"]);
    }

    #[tokio::test]
    async fn test_nothing_fetched_is_an_error() {
        let engine = engine(Arc::new(MockLockService::new()), StaticKeyScan::new());
        let query = StatusQuery {
            names: vec!["ubuntu@ghost.lab".to_string()],
            ..Default::default()
        };
        assert!(engine.query(&query).await.is_err());
    }
}
