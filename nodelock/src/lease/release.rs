//! Lease release with VM teardown.

use std::sync::Arc;

use tracing::{debug, error, info};

use super::batch::{run_batch, BatchOutcome, BatchPolicy};
use crate::client::LockService;
use crate::context::LockContext;
use crate::error::LockError;
use crate::provision::Provisioner;

/// Releases leases and tears down virtual nodes.
#[derive(Clone)]
pub struct LeaseReleaser {
    ctx: Arc<LockContext>,
    service: Arc<dyn LockService>,
    provisioner: Arc<dyn Provisioner>,
}

impl LeaseReleaser {
    pub fn new(
        ctx: Arc<LockContext>,
        service: Arc<dyn LockService>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self {
            ctx,
            service,
            provisioner,
        }
    }

    /// Release `name` held by `owner` (the context owner when `None`).
    ///
    /// Once the service accepts the unlock the lease is gone. A failed VM
    /// teardown afterwards is logged and leaves the node unlocked but not
    /// torn down; it does not change the result.
    pub async fn release(&self, name: &str, owner: Option<&str>) -> Result<bool, LockError> {
        let owner = owner.unwrap_or(&self.ctx.owner);
        let outcome = self.service.unlock_one(name, owner).await?;

        if !outcome.success {
            error!(node = name, reason = outcome.reason(), "Failed to unlock");
            return Ok(false);
        }
        debug!(node = name, "Unlocked");

        if !self.provisioner.destroy_if_vm(name).await {
            let err = LockError::ProvisioningFailed {
                action: "destroy",
                node: name.to_string(),
            };
            error!(node = name, error = %err, "VM teardown failed");
            info!(node = name, "Node is unlocked but not torn down");
        }
        Ok(true)
    }

    /// Release each of `names` for the context owner.
    pub async fn release_names(&self, names: &[String], policy: BatchPolicy) -> BatchOutcome {
        run_batch("unlock", names, policy, |name| async move {
            self.release(&name, None).await
        })
        .await
    }
}
