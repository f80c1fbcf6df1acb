//! Lease acquisition with per-node rollback for virtual nodes.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info};

use super::batch::{run_batch, BatchOutcome, BatchPolicy};
use super::release::LeaseReleaser;
use crate::client::LockService;
use crate::context::LockContext;
use crate::error::LockError;
use crate::provision::Provisioner;
use crate::types::{split_machine_types, LeaseRequest, LockManyResponse, LockOutcome, LockedNodes};

/// Nodes won by [`LeaseAcquirer::acquire_many`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acquisition {
    /// The alternative that supplied the nodes; `None` when none did
    pub machine_type: Option<String>,
    pub nodes: LockedNodes,
}

impl Acquisition {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// Acquires one or many leases.
#[derive(Clone)]
pub struct LeaseAcquirer {
    ctx: Arc<LockContext>,
    service: Arc<dyn LockService>,
    provisioner: Arc<dyn Provisioner>,
    releaser: LeaseReleaser,
}

impl LeaseAcquirer {
    pub fn new(
        ctx: Arc<LockContext>,
        service: Arc<dyn LockService>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        let releaser = LeaseReleaser::new(ctx.clone(), service.clone(), provisioner.clone());
        Self {
            ctx,
            service,
            provisioner,
            releaser,
        }
    }

    /// Lock `request.count` nodes.
    ///
    /// A compound machine type is a list of ordered alternatives: each type is
    /// tried in turn and the first one that yields any node wins; results are
    /// never combined across types. For the virtual type every locked node is
    /// provisioned; a node whose VM cannot be created is released again and
    /// left out of the result, without affecting its siblings.
    ///
    /// The result names the winning type and holds at most `count` nodes,
    /// possibly fewer. No nodes is a failure.
    pub async fn acquire_many(&self, request: &LeaseRequest) -> Result<Acquisition, LockError> {
        let owner = request.owner.as_deref().unwrap_or(&self.ctx.owner);
        let machine_types = split_machine_types(&request.machine_type);
        if machine_types.is_empty() {
            return Err(LockError::InvalidInput(format!(
                "no machine type in {:?}",
                request.machine_type
            )));
        }

        for machine_type in &machine_types {
            let response = self
                .service
                .lock_many(
                    request.count,
                    machine_type,
                    owner,
                    request.description.as_deref(),
                )
                .await?;

            match response {
                LockManyResponse::Locked(nodes) if !nodes.is_empty() => {
                    let nodes = self.keep_at_most(nodes, request.count, owner).await;
                    debug!(
                        machine_type = %machine_type,
                        nodes = ?nodes.keys().collect::<Vec<_>>(),
                        "Locked"
                    );
                    let nodes = if self.ctx.is_virtual_type(machine_type) {
                        self.provision_all(nodes, owner).await
                    } else {
                        nodes
                    };
                    return Ok(Acquisition {
                        machine_type: Some(machine_type.clone()),
                        nodes,
                    });
                }
                LockManyResponse::Locked(_) => {
                    info!(machine_type = %machine_type, "Lock service returned no nodes");
                }
                LockManyResponse::Unavailable { reason } => {
                    let err = LockError::ServiceUnavailable {
                        count: request.count,
                        machine_type: machine_type.clone(),
                        reason,
                    };
                    error!(error = %err, "Insufficient capacity");
                }
                LockManyResponse::Rejected { status, reason } => {
                    error!(
                        count = request.count,
                        machine_type = %machine_type,
                        status,
                        reason = %reason,
                        "Could not lock nodes"
                    );
                }
            }
        }

        Ok(Acquisition::default())
    }

    /// Unlock whatever the service granted beyond `count`. Surplus nodes are
    /// not provisioned yet, so a plain unlock is enough.
    async fn keep_at_most(
        &self,
        mut nodes: LockedNodes,
        count: usize,
        owner: &str,
    ) -> LockedNodes {
        if nodes.len() <= count {
            return nodes;
        }
        let surplus: Vec<String> = nodes.keys().skip(count).cloned().collect();
        error!(
            wanted = count,
            got = nodes.len(),
            surplus = ?surplus,
            "Lock service granted too many nodes, unlocking the surplus"
        );

        for name in surplus {
            nodes.remove(&name);
            match self.service.unlock_one(&name, owner).await {
                Ok(outcome) if outcome.success => {}
                Ok(outcome) => {
                    error!(node = %name, reason = outcome.reason(), "Surplus unlock was refused")
                }
                Err(e) => error!(node = %name, error = %e, "Surplus unlock failed"),
            }
        }
        nodes
    }

    /// Create a VM for every node; release the ones that fail.
    async fn provision_all(&self, nodes: LockedNodes, owner: &str) -> LockedNodes {
        let attempts = nodes.into_iter().map(|(name, key)| async move {
            if self.provisioner.create_if_vm(&name).await {
                return Some((name, key));
            }

            let err = LockError::ProvisioningFailed {
                action: "create",
                node: name.clone(),
            };
            error!(node = %name, error = %err, "Unable to create virtual machine, releasing");
            match self.releaser.release(&name, Some(owner)).await {
                Ok(true) => {}
                Ok(false) => error!(node = %name, "Compensating release was refused"),
                Err(e) => error!(node = %name, error = %e, "Compensating release failed"),
            }
            None
        });

        join_all(attempts).await.into_iter().flatten().collect()
    }

    /// Lock a single named node. No provisioning is involved.
    pub async fn acquire_one(
        &self,
        name: &str,
        owner: Option<&str>,
        description: Option<&str>,
    ) -> Result<LockOutcome, LockError> {
        let owner = owner.unwrap_or(&self.ctx.owner);
        let outcome = self.service.lock_one(name, owner, description).await?;

        if outcome.success {
            debug!(node = name, owner, "Locked");
        } else {
            error!(node = name, reason = outcome.reason(), "Failed to lock");
        }
        Ok(outcome)
    }

    /// Lock each of `names` for the context owner, creating VMs as needed.
    ///
    /// A node whose VM cannot be created is released again and counts as a
    /// failed element.
    pub async fn lock_names(
        &self,
        names: &[String],
        description: Option<&str>,
        policy: BatchPolicy,
    ) -> BatchOutcome {
        run_batch("lock", names, policy, |name| async move {
            if !self.acquire_one(&name, None, description).await?.success {
                return Ok(false);
            }
            if self.provisioner.create_if_vm(&name).await {
                return Ok(true);
            }

            error!(node = %name, "Unable to create virtual machine, releasing");
            self.releaser.release(&name, None).await?;
            Ok::<_, LockError>(false)
        })
        .await
    }

    pub fn releaser(&self) -> &LeaseReleaser {
        &self.releaser
    }
}
