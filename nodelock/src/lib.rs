//! Nodelock - client-side lease coordination for a shared test-node pool
//!
//! A central lock service owns node state. This crate talks to it and adds
//! the failure handling the service cannot provide on its own:
//! - Bulk and single-node lock/unlock with rollback of partially usable leases
//! - Metadata updates gated on virtual-node readiness
//! - SSH host key synchronization for freshly provisioned VMs
//! - Status queries, filters and a pool-wide summary
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           LeaseCoordinator              │
//! │  (shared context, service, cancel)      │
//! └────────────────┬────────────────────────┘
//!                  │
//!      ┌───────────┼───────────┬────────────┐
//!      ▼           ▼           ▼            ▼
//! ┌─────────┐ ┌─────────┐ ┌──────────┐ ┌─────────┐
//! │Acquirer/│ │ Updater │ │  Status  │ │ Summary │
//! │Releaser │ │         │ │  Query   │ │Reporter │
//! └────┬────┘ └────┬────┘ └────┬─────┘ └────┬────┘
//!      │           ▼           ▼            │
//!      │      ┌─────────────────────┐       │
//!      │      │  KeyScanner         │       │
//!      │      │  (ssh-keyscan)      │       │
//!      │      └──────────┬──────────┘       │
//!      ▼                 ▼                  ▼
//! ┌─────────────────────────────────────────────┐
//! │  LockService (HTTP / Mock)  +  Provisioner  │
//! └─────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod hostname;
pub mod keyscan;
pub mod lease;
pub mod provision;
pub mod status;
pub mod summary;
pub mod targets;
pub mod types;

// Re-export main types for convenience
pub use client::{HttpLockService, LockService, MockLockService};
pub use context::{default_owner, KeyWait, LockContext};
pub use coordinator::LeaseCoordinator;
pub use error::LockError;
pub use keyscan::{HostKeyScan, KeyScanner, ScanReport, SshKeyscan, StaticKeyScan};
pub use lease::{
    Acquisition, BatchOutcome, BatchPolicy, LeaseAcquirer, LeaseReleaser, LeaseUpdater,
};
pub use provision::{CommandProvisioner, MockProvisioner, Provisioner};
pub use status::{RenderFormat, StatusQuery, StatusQueryEngine};
pub use summary::{SummaryReport, SummaryReporter};
pub use types::*;
