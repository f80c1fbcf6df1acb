//! In-memory lock service for testing.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::traits::LockService;
use crate::error::LockError;
use crate::types::{LockManyResponse, LockOutcome, LockedNodes, NodePatch, NodeRecord};

/// Mock lock service.
///
/// Holds a node table with the same per-node compare-and-set semantics as the
/// real service and records every call for assertions.
#[derive(Default)]
pub struct MockLockService {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    nodes: BTreeMap<String, NodeRecord>,
    calls: Vec<String>,
    updates: Vec<(String, NodePatch)>,
    unavailable: bool,
    list_refused: bool,
    lookup_failing: bool,
    over_grant: bool,
}

impl MockLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a node.
    pub fn with_node(self, record: NodeRecord) -> Self {
        self.insert(record);
        self
    }

    /// Answer every bulk lock with 503.
    pub fn with_unavailable(self) -> Self {
        self.lock().unavailable = true;
        self
    }

    /// Refuse every list request.
    pub fn with_list_refused(self) -> Self {
        self.lock().list_refused = true;
        self
    }

    /// Fail every single-node lookup with a network error.
    pub fn with_lookup_failure(self) -> Self {
        self.lock().lookup_failing = true;
        self
    }

    /// Grant every free node of the type on a bulk lock, ignoring the count.
    pub fn with_over_grant(self) -> Self {
        self.lock().over_grant = true;
        self
    }

    pub fn insert(&self, record: NodeRecord) {
        self.lock().nodes.insert(record.name.clone(), record);
    }

    /// Current record of a node.
    pub fn node(&self, name: &str) -> Option<NodeRecord> {
        self.lock().nodes.get(name).cloned()
    }

    /// Every call so far, as `operation:target`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls whose log entry equals `call`.
    pub fn call_count(&self, call: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.as_str() == call).count()
    }

    /// Patches sent to `update_node`, in order.
    pub fn updates(&self) -> Vec<(String, NodePatch)> {
        self.lock().updates.clone()
    }

    pub fn reset_calls(&self) {
        let mut state = self.lock();
        state.calls.clear();
        state.updates.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // a panicked test thread must not hide later assertions
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LockService for MockLockService {
    async fn lock_many(
        &self,
        count: usize,
        machine_type: &str,
        owner: &str,
        description: Option<&str>,
    ) -> Result<LockManyResponse, LockError> {
        let mut state = self.lock();
        state.calls.push(format!("lock_many:{}", machine_type));

        if state.unavailable {
            return Ok(LockManyResponse::Unavailable {
                reason: "pool exhausted".to_string(),
            });
        }

        let limit = if state.over_grant { usize::MAX } else { count };
        let free: Vec<String> = state
            .nodes
            .values()
            .filter(|n| !n.locked && n.machine_type == machine_type)
            .map(|n| n.name.clone())
            .take(limit)
            .collect();

        if free.len() < count {
            return Ok(LockManyResponse::Unavailable {
                reason: format!("only {} free {} nodes", free.len(), machine_type),
            });
        }

        let mut locked = LockedNodes::new();
        for name in free {
            if let Some(node) = state.nodes.get_mut(&name) {
                node.locked = true;
                node.locked_by = Some(owner.to_string());
                node.description = description.map(str::to_string);
                locked.insert(name, node.pub_key().to_string());
            }
        }
        Ok(LockManyResponse::Locked(locked))
    }

    async fn lock_one(
        &self,
        name: &str,
        owner: &str,
        description: Option<&str>,
    ) -> Result<LockOutcome, LockError> {
        let mut state = self.lock();
        state.calls.push(format!("lock:{}", name));

        let Some(node) = state.nodes.get_mut(name) else {
            return Ok(LockOutcome::failed("404"));
        };
        if node.locked {
            return Ok(LockOutcome::failed("node is already locked"));
        }
        node.locked = true;
        node.locked_by = Some(owner.to_string());
        node.description = description.map(str::to_string);
        Ok(LockOutcome::ok())
    }

    async fn unlock_one(&self, name: &str, owner: &str) -> Result<LockOutcome, LockError> {
        let mut state = self.lock();
        state.calls.push(format!("unlock:{}", name));

        let Some(node) = state.nodes.get_mut(name) else {
            return Ok(LockOutcome::failed("404"));
        };
        if !node.locked {
            return Ok(LockOutcome::failed("node is not locked"));
        }
        if node.locked_by.as_deref() != Some(owner) {
            return Ok(LockOutcome::failed("node is locked by someone else"));
        }
        // the real service leaves locked_by behind
        node.locked = false;
        node.description = None;
        Ok(LockOutcome::ok())
    }

    async fn list_nodes(
        &self,
        machine_type: Option<&str>,
    ) -> Result<Option<Vec<NodeRecord>>, LockError> {
        let mut state = self.lock();
        state.calls.push("list".to_string());

        if state.list_refused {
            return Ok(None);
        }
        Ok(Some(
            state
                .nodes
                .values()
                .filter(|n| machine_type.map_or(true, |t| n.machine_type == t))
                .cloned()
                .collect(),
        ))
    }

    async fn get_node(&self, name: &str) -> Result<Option<NodeRecord>, LockError> {
        let mut state = self.lock();
        state.calls.push(format!("get:{}", name));
        if state.lookup_failing {
            return Err(LockError::Network(format!("connection reset fetching {}", name)));
        }
        Ok(state.nodes.get(name).cloned())
    }

    async fn update_node(&self, name: &str, patch: &NodePatch) -> Result<bool, LockError> {
        if patch.is_empty() {
            return Ok(true);
        }

        let mut state = self.lock();
        state.calls.push(format!("update:{}", name));
        state.updates.push((name.to_string(), patch.clone()));

        let Some(node) = state.nodes.get_mut(name) else {
            return Ok(false);
        };
        if let Some(description) = &patch.description {
            node.description = Some(description.clone());
        }
        if let Some(up) = patch.up {
            node.up = up;
        }
        if let Some(key) = &patch.ssh_pub_key {
            node.ssh_pub_key = Some(key.clone());
        }
        Ok(true)
    }
}
