//! Bridge to the VM provisioning subsystem.
//!
//! Provisioning itself lives outside this crate. The coordinator only needs
//! to ask for a node to be created after it is locked and destroyed after it
//! is released; both calls are no-ops for physical nodes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::client::LockService;
use crate::error::LockError;
use crate::hostname::decanonicalize_hostname;
use crate::types::NodeRecord;

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create the VM behind `name` if it is virtual. `true` on success or
    /// when there is nothing to do.
    async fn create_if_vm(&self, name: &str) -> bool;

    /// Destroy the VM behind `name` if it is virtual.
    async fn destroy_if_vm(&self, name: &str) -> bool;
}

/// Runs an external command per VM.
///
/// Command templates are argument vectors where `{name}`, `{short}` and
/// `{vm_host}` are substituted, e.g. `["downburst", "create", "{short}"]`.
pub struct CommandProvisioner {
    service: Arc<dyn LockService>,
    create: Vec<String>,
    destroy: Vec<String>,
}

impl CommandProvisioner {
    pub fn new(service: Arc<dyn LockService>, create: Vec<String>, destroy: Vec<String>) -> Self {
        Self {
            service,
            create,
            destroy,
        }
    }

    /// The node's record when it is virtual, `None` for physical or unknown
    /// nodes. A failed lookup is an error: the node's kind is not known.
    async fn virtual_node(&self, name: &str) -> Result<Option<NodeRecord>, LockError> {
        match self.service.get_node(name).await? {
            Some(node) if node.is_virtual() => Ok(Some(node)),
            _ => Ok(None),
        }
    }

    async fn run(&self, action: &'static str, template: &[String], node: &NodeRecord) -> bool {
        let Some((program, args)) = template.split_first() else {
            error!(node = %node.name, action, "No provisioning command configured");
            return false;
        };

        let vm_host = node.vm_host.as_ref().map(|h| h.name()).unwrap_or("");
        let expand = |arg: &String| {
            arg.replace("{name}", &node.name)
                .replace("{short}", decanonicalize_hostname(&node.name))
                .replace("{vm_host}", vm_host)
        };

        info!(node = %node.name, action, "Running provisioning command");
        let status = Command::new(expand(program))
            .args(args.iter().map(expand))
            .status()
            .await;

        match status {
            Ok(s) if s.success() => true,
            Ok(s) => {
                error!(node = %node.name, action, status = %s, "Provisioning command failed");
                false
            }
            Err(e) => {
                error!(node = %node.name, action, error = %e, "Could not run provisioning command");
                false
            }
        }
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn create_if_vm(&self, name: &str) -> bool {
        match self.virtual_node(name).await {
            Ok(Some(node)) => self.run("create", &self.create, &node).await,
            Ok(None) => {
                debug!(node = name, "Not a virtual node, nothing to create");
                true
            }
            Err(e) => {
                error!(node = name, error = %e, "Could not look up node before create");
                false
            }
        }
    }

    async fn destroy_if_vm(&self, name: &str) -> bool {
        match self.virtual_node(name).await {
            Ok(Some(node)) => self.run("destroy", &self.destroy, &node).await,
            Ok(None) => true,
            Err(e) => {
                error!(node = name, error = %e, "Could not look up node before destroy");
                false
            }
        }
    }
}

/// Mock provisioner for testing.
#[derive(Default)]
pub struct MockProvisioner {
    failing: Mutex<HashSet<String>>,
    create_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make both create and destroy fail for `name`.
    pub fn with_failure(self, name: impl Into<String>) -> Self {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into());
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    fn succeeds(&self, name: &str) -> bool {
        !self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name)
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn create_if_vm(&self, name: &str) -> bool {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.succeeds(name)
    }

    async fn destroy_if_vm(&self, name: &str) -> bool {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.succeeds(name)
    }
}
