//! Entry point wiring the lease components together.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::client::LockService;
use crate::context::LockContext;
use crate::keyscan::{HostKeyScan, KeyScanner};
use crate::lease::{LeaseAcquirer, LeaseReleaser, LeaseUpdater};
use crate::provision::Provisioner;
use crate::status::StatusQueryEngine;
use crate::summary::SummaryReporter;

/// Shared handles for one invocation.
///
/// Components are cheap to build and are handed out on demand, each holding
/// clones of the same service, provisioner and cancellation token.
#[derive(Clone)]
pub struct LeaseCoordinator {
    ctx: Arc<LockContext>,
    service: Arc<dyn LockService>,
    provisioner: Arc<dyn Provisioner>,
    host_scan: Arc<dyn HostKeyScan>,
    cancel: CancellationToken,
}

impl LeaseCoordinator {
    pub fn new(
        ctx: LockContext,
        service: Arc<dyn LockService>,
        provisioner: Arc<dyn Provisioner>,
        host_scan: Arc<dyn HostKeyScan>,
    ) -> Self {
        Self {
            ctx: Arc::new(ctx),
            service,
            provisioner,
            host_scan,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` to abort VM readiness waits.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn context(&self) -> &LockContext {
        &self.ctx
    }

    pub fn service(&self) -> &Arc<dyn LockService> {
        &self.service
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn acquirer(&self) -> LeaseAcquirer {
        LeaseAcquirer::new(self.ctx.clone(), self.service.clone(), self.provisioner.clone())
    }

    pub fn releaser(&self) -> LeaseReleaser {
        LeaseReleaser::new(self.ctx.clone(), self.service.clone(), self.provisioner.clone())
    }

    pub fn updater(&self) -> LeaseUpdater {
        LeaseUpdater::new(
            self.ctx.clone(),
            self.service.clone(),
            self.host_scan.clone(),
            self.cancel.clone(),
        )
    }

    pub fn scanner(&self) -> KeyScanner {
        KeyScanner::new(
            self.ctx.clone(),
            self.service.clone(),
            self.host_scan.clone(),
            self.cancel.clone(),
        )
    }

    pub fn status(&self) -> StatusQueryEngine {
        StatusQueryEngine::new(self.ctx.clone(), self.service.clone(), self.scanner())
    }

    pub fn summary(&self) -> SummaryReporter {
        SummaryReporter::new(self.service.clone())
    }
}
