//! SSH host key discovery and reconciliation.
//!
//! A freshly provisioned VM has no host key until it boots. The scanner asks
//! the external `ssh-keyscan` tool for keys and pushes changed keys back to
//! the lock service.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::client::LockService;
use crate::context::LockContext;
use crate::error::LockError;
use crate::hostname::strip_user;
use crate::lease::LeaseUpdater;
use crate::types::{NodeRecord, NodeUpdate};

/// Default key type requested from `ssh-keyscan`.
pub const DEFAULT_KEY_TYPE: &str = "rsa";

/// The external host key scan tool.
#[async_trait]
pub trait HostKeyScan: Send + Sync {
    /// Scan `hosts` in one invocation, returning `hostname public-key` lines.
    async fn scan(&self, hosts: &[String]) -> Result<String, LockError>;
}

/// Shells out to `ssh-keyscan -t <type>`.
pub struct SshKeyscan {
    key_type: String,
}

impl SshKeyscan {
    pub fn new(key_type: impl Into<String>) -> Self {
        Self {
            key_type: key_type.into(),
        }
    }
}

impl Default for SshKeyscan {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_TYPE)
    }
}

#[async_trait]
impl HostKeyScan for SshKeyscan {
    async fn scan(&self, hosts: &[String]) -> Result<String, LockError> {
        let output = Command::new("ssh-keyscan")
            .arg("-t")
            .arg(&self.key_type)
            .args(hosts)
            .output()
            .await
            .map_err(|e| LockError::ScanFailed(e.to_string()))?;

        if !output.status.success() {
            debug!(status = %output.status, hosts = hosts.len(), "ssh-keyscan exited non-zero");
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Raw scan output plus the lock-service view taken just before scanning.
#[derive(Debug, Clone, Default)]
pub struct KeyScan {
    pub output: String,
    pub current: BTreeMap<String, NodeRecord>,
}

/// Outcome of [`KeyScanner::update_from_scan`].
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Nodes whose stored key was replaced
    pub updated: Vec<String>,
    pub failures: Vec<LockError>,
}

impl ScanReport {
    pub fn updated_count(&self) -> usize {
        self.updated.len()
    }

    pub fn error_count(&self) -> usize {
        self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Resolves node names, scans their host keys and reconciles the results.
#[derive(Clone)]
pub struct KeyScanner {
    ctx: Arc<LockContext>,
    service: Arc<dyn LockService>,
    host_scan: Arc<dyn HostKeyScan>,
    cancel: CancellationToken,
}

impl KeyScanner {
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

    /// Scan `names`, or every known node when `names` is empty.
    ///
    /// Only the named records are fetched when names are given; a name the
    /// service does not know is left out of `current`.
    pub async fn scan(&self, names: &[String]) -> Result<KeyScan, LockError> {
        let current = self.current_records(names).await?;

        let hosts: Vec<String> = if names.is_empty() {
            current.keys().map(|n| strip_user(n).to_string()).collect()
        } else {
            names.iter().map(|n| strip_user(n).to_string()).collect()
        };

        if hosts.is_empty() {
            return Ok(KeyScan {
                output: String::new(),
                current,
            });
        }

        debug!(hosts = hosts.len(), "Scanning host keys");
        let output = self.host_scan.scan(&hosts).await?;
        Ok(KeyScan { output, current })
    }

    async fn current_records(
        &self,
        names: &[String],
    ) -> Result<BTreeMap<String, NodeRecord>, LockError> {
        if names.is_empty() {
            let nodes = self.service.list_nodes(None).await?.ok_or_else(|| {
                LockError::request_failed("list nodes", "lock server", "request refused")
            })?;
            return Ok(nodes.into_iter().map(|n| (n.name.clone(), n)).collect());
        }

        let mut current = BTreeMap::new();
        for name in names {
            match self.service.get_node(name).await? {
                Some(node) => {
                    current.insert(node.name.clone(), node);
                }
                None => debug!(node = %name, "Not in the lock database"),
            }
        }
        Ok(current)
    }

    /// Push every scanned key that differs from the stored one.
    ///
    /// A line whose host is missing from `current` is an
    /// [`LockError::UnknownHost`] failure; remaining lines are still processed.
    pub async fn update_from_scan(
        &self,
        output: &str,
        current: &BTreeMap<String, NodeRecord>,
    ) -> ScanReport {
        let updater = LeaseUpdater::new(
            self.ctx.clone(),
            self.service.clone(),
            self.host_scan.clone(),
            self.cancel.clone(),
        );
        let mut report = ScanReport::default();

        for line in output.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((hostname, pub_key)) = line.split_once(' ') else {
                error!(line, "Unparseable host key line");
                report
                    .failures
                    .push(LockError::malformed("host key scan", line));
                continue;
            };

            let full_name = format!("{}@{}", self.ctx.ssh_user, hostname);
            info!(node = %full_name, "Checking host key");

            let Some(record) = current.get(&full_name) else {
                error!(node = %full_name, "Host is not in the lock database");
                report.failures.push(LockError::UnknownHost(full_name));
                continue;
            };
            if record.pub_key() == pub_key {
                continue;
            }

            info!(node = %full_name, "New key found, updating");
            match updater.update(&full_name, &NodeUpdate::key(pub_key)).await {
                Ok(true) => report.updated.push(full_name),
                Ok(false) => {
                    error!(node = %full_name, "Failed to update host key");
                    report.failures.push(LockError::request_failed(
                        "update",
                        full_name,
                        "lock server refused the key update",
                    ));
                }
                Err(e) => {
                    error!(node = %full_name, error = %e, "Failed to update host key");
                    report.failures.push(e);
                }
            }
        }

        report
    }

    /// Scan `names` and reconcile in one step.
    pub async fn scan_and_update(&self, names: &[String]) -> Result<ScanReport, LockError> {
        let scan = self.scan(names).await?;
        Ok(self.update_from_scan(&scan.output, &scan.current).await)
    }
}

/// Canned host keys for testing.
///
/// A key can be held back for the first few scans to mimic a booting VM.
#[derive(Default)]
pub struct StaticKeyScan {
    keys: Mutex<HashMap<String, (String, usize)>>,
    calls: AtomicUsize,
}

impl StaticKeyScan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `key` for `host` on every scan.
    pub fn with_key(self, host: impl Into<String>, key: impl Into<String>) -> Self {
        self.with_key_after(host, key, 0)
    }

    /// Report `key` for `host` once `scans` earlier scans have come back empty.
    pub fn with_key_after(
        self,
        host: impl Into<String>,
        key: impl Into<String>,
        scans: usize,
    ) -> Self {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(host.into(), (key.into(), scans));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostKeyScan for StaticKeyScan {
    async fn scan(&self, hosts: &[String]) -> Result<String, LockError> {
        let previous = self.calls.fetch_add(1, Ordering::SeqCst);
        let keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());

        let mut output = String::new();
        for host in hosts {
            if let Some((key, after)) = keys.get(host) {
                if previous >= *after {
                    output.push_str(&format!("{} {}\n", host, key));
                }
            }
        }
        Ok(output)
    }
}
