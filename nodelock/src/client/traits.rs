//! Core trait for the remote lock service.
//!
//! The service is the sole arbiter of who holds a node. Implementations are
//! thin: no retries and no business logic. Expected refusals are reported in
//! the return value; `Err` is reserved for transport failures and bodies that
//! do not decode.

use async_trait::async_trait;

use crate::error::LockError;
use crate::types::{LockManyResponse, LockOutcome, NodePatch, NodeRecord};

#[async_trait]
pub trait LockService: Send + Sync {
    /// Lock `count` free nodes of a single `machine_type` for `owner`.
    async fn lock_many(
        &self,
        count: usize,
        machine_type: &str,
        owner: &str,
        description: Option<&str>,
    ) -> Result<LockManyResponse, LockError>;

    /// Lock a named node. Fails when the service reports it already held.
    async fn lock_one(
        &self,
        name: &str,
        owner: &str,
        description: Option<&str>,
    ) -> Result<LockOutcome, LockError>;

    /// Release a named node held by `owner`.
    async fn unlock_one(&self, name: &str, owner: &str) -> Result<LockOutcome, LockError>;

    /// Every node, optionally filtered server-side by type. `None` on refusal.
    async fn list_nodes(
        &self,
        machine_type: Option<&str>,
    ) -> Result<Option<Vec<NodeRecord>>, LockError>;

    /// One node's record. `None` when the service does not know the name.
    async fn get_node(&self, name: &str) -> Result<Option<NodeRecord>, LockError>;

    /// Apply a sparse patch. An empty patch succeeds without a request.
    async fn update_node(&self, name: &str, patch: &NodePatch) -> Result<bool, LockError>;
}
