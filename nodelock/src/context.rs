//! Explicit per-invocation context.
//!
//! Built once at the entry point and shared by every component, in place of
//! process-wide configuration.

use std::time::Duration;

/// Default SSH user prefixed to canonical node names.
pub const DEFAULT_SSH_USER: &str = "ubuntu";

/// Default lab domain appended to bare short names.
pub const DEFAULT_LAB_DOMAIN: &str = "front.sepia.ceph.com";

/// Machine type that marks virtual nodes.
pub const DEFAULT_VM_MACHINE_TYPE: &str = "vps";

/// Pause between host key scans while a VM boots.
pub const DEFAULT_KEY_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How long to wait for a VM host key before giving up.
pub const DEFAULT_KEY_WAIT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Bounds for the VM-readiness wait in `LeaseUpdater::update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyWait {
    pub poll_interval: Duration,
    /// `None` waits until cancelled
    pub timeout: Option<Duration>,
}

impl Default for KeyWait {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_KEY_POLL_INTERVAL,
            timeout: Some(DEFAULT_KEY_WAIT_TIMEOUT),
        }
    }
}

/// Who is acting, against which service, with which site conventions.
#[derive(Debug, Clone)]
pub struct LockContext {
    /// Lock service base URL, e.g. `http://paddles.example.com:8080`
    pub lock_server: String,
    /// Identity leases are taken under
    pub owner: String,
    pub ssh_user: String,
    pub lab_domain: String,
    pub vm_machine_type: String,
    pub key_wait: KeyWait,
    pub verbose: bool,
}

impl LockContext {
    pub fn new(lock_server: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            lock_server: lock_server.into(),
            owner: owner.into(),
            ssh_user: DEFAULT_SSH_USER.to_string(),
            lab_domain: DEFAULT_LAB_DOMAIN.to_string(),
            vm_machine_type: DEFAULT_VM_MACHINE_TYPE.to_string(),
            key_wait: KeyWait::default(),
            verbose: false,
        }
    }

    pub fn with_key_wait(mut self, key_wait: KeyWait) -> Self {
        self.key_wait = key_wait;
        self
    }

    pub fn with_vm_machine_type(mut self, machine_type: impl Into<String>) -> Self {
        self.vm_machine_type = machine_type.into();
        self
    }

    pub fn with_lab_domain(mut self, domain: impl Into<String>) -> Self {
        self.lab_domain = domain.into();
        self
    }

    pub fn with_ssh_user(mut self, user: impl Into<String>) -> Self {
        self.ssh_user = user.into();
        self
    }

    /// Whether a bulk lock of `machine_type` needs provisioning.
    pub fn is_virtual_type(&self, machine_type: &str) -> bool {
        machine_type == self.vm_machine_type
    }
}

/// `<login>@<hostname>` for the invoking user.
pub fn default_owner() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = ::hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}@{}", user, host)
}
