//! Lease lifecycle: acquire, release, update.
//!
//! Multi-node acquisition is not atomic at the service boundary, so the
//! acquirer detects partial success and compensates by releasing what it
//! cannot use.

pub mod acquire;
pub mod batch;
pub mod release;
pub mod update;

pub use acquire::{Acquisition, LeaseAcquirer};
pub use batch::{BatchOutcome, BatchPolicy};
pub use release::LeaseReleaser;
pub use update::LeaseUpdater;
