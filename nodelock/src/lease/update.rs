//! Lease metadata updates, gated on VM readiness.

use std::sync::Arc;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::batch::{run_batch, BatchOutcome, BatchPolicy};
use crate::client::LockService;
use crate::context::LockContext;
use crate::error::LockError;
use crate::keyscan::{HostKeyScan, KeyScanner};
use crate::types::NodeUpdate;

/// Updates description, status and host key of a node.
#[derive(Clone)]
pub struct LeaseUpdater {
    ctx: Arc<LockContext>,
    service: Arc<dyn LockService>,
    host_scan: Arc<dyn HostKeyScan>,
    cancel: CancellationToken,
}

impl LeaseUpdater {
    pub fn new(
        ctx: Arc<LockContext>,
        service: Arc<dyn LockService>,
        host_scan: Arc<dyn HostKeyScan>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            service,
            host_scan,
            cancel,
        }
    }

    /// Apply `update` to `name`.
    ///
    /// An empty update succeeds without contacting the service. When no host
    /// key is supplied and the node is a VM, this first waits for the VM to
    /// answer a host key scan; see [`KeyWait`](crate::context::KeyWait) for
    /// the bounds and the cancellation token passed at construction.
    pub async fn update(&self, name: &str, update: &NodeUpdate) -> Result<bool, LockError> {
        if update.is_empty() {
            return Ok(true);
        }

        if update.ssh_pub_key.is_none() {
            let node = self
                .service
                .get_node(name)
                .await?
                .ok_or_else(|| LockError::UnknownHost(name.to_string()))?;
            if node.is_virtual() {
                self.wait_for_host_key(name).await?;
            }
        }

        let ok = self.service.update_node(name, &update.to_patch()).await?;
        if ok {
            debug!(node = name, "Updated");
        } else {
            error!(node = name, "Lock server refused the update");
        }
        Ok(ok)
    }

    /// Apply the same update to each of `names`.
    pub async fn update_names(&self, names: &[String], update: &NodeUpdate) -> BatchOutcome {
        run_batch("update", names, BatchPolicy::ContinueOnError, |name| async move {
            self.update(&name, update).await
        })
        .await
    }

    /// Block until a scan of `name` returns a key, the deadline passes, or
    /// the token is cancelled.
    async fn wait_for_host_key(&self, name: &str) -> Result<(), LockError> {
        let scanner = KeyScanner::new(
            self.ctx.clone(),
            self.service.clone(),
            self.host_scan.clone(),
            self.cancel.clone(),
        );
        let wait = &self.ctx.key_wait;
        let started = Instant::now();
        let deadline = wait.timeout.map(|t| started + t);
        let targets = [name.to_string()];

        loop {
            let scan = scanner.scan(&targets).await?;
            if !scan.output.trim().is_empty() {
                return Ok(());
            }

            let mut wake = Instant::now() + wait.poll_interval;
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(LockError::KeyWaitTimeout {
                        node: name.to_string(),
                        waited_secs: started.elapsed().as_secs(),
                    });
                }
                wake = wake.min(deadline);
            }

            info!(node = name, "Waiting for virtual machine to boot");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(LockError::Cancelled(name.to_string()));
                }
                _ = sleep_until(wake) => {}
            }
        }
    }
}
