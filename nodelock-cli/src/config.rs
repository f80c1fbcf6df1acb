//! Client configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use nodelock::context::{
    DEFAULT_KEY_POLL_INTERVAL, DEFAULT_KEY_WAIT_TIMEOUT, DEFAULT_LAB_DOMAIN, DEFAULT_SSH_USER,
    DEFAULT_VM_MACHINE_TYPE,
};
use nodelock::keyscan::DEFAULT_KEY_TYPE;
use nodelock::{KeyWait, LockContext};

/// Config file looked up in the home directory when `--config` is absent.
pub const CONFIG_FILE_NAME: &str = ".nodelock.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub lock_server: LockServerConfig,
    #[serde(default)]
    pub hosts: HostsConfig,
    #[serde(default)]
    pub provision: ProvisionConfig,
    #[serde(default)]
    pub keyscan: KeyscanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockServerConfig {
    /// Base URL of the lock service
    #[serde(default = "default_url")]
    pub url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Lease owner (defaults to `<login>@<hostname>`)
    #[serde(default)]
    pub owner: Option<String>,
}

impl Default for LockServerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_secs: default_timeout_secs(),
            owner: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostsConfig {
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    /// Domain appended to short machine names
    #[serde(default = "default_lab_domain")]
    pub lab_domain: String,

    /// Machine type of virtual nodes
    #[serde(default = "default_vm_machine_type")]
    pub vm_machine_type: String,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            ssh_user: default_ssh_user(),
            lab_domain: default_lab_domain(),
            vm_machine_type: default_vm_machine_type(),
        }
    }
}

/// VM provisioning commands. `{name}`, `{short}` and `{vm_host}` are
/// substituted in every argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    #[serde(default = "default_create_command")]
    pub create: Vec<String>,

    #[serde(default = "default_destroy_command")]
    pub destroy: Vec<String>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            create: default_create_command(),
            destroy: default_destroy_command(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyscanConfig {
    /// Key type passed to `ssh-keyscan -t`
    #[serde(default = "default_key_type")]
    pub key_type: String,

    /// Seconds between scans while a VM boots
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Give up waiting for a VM after this many seconds (0 = default)
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,

    /// Wait for VM keys until interrupted
    #[serde(default)]
    pub wait_forever: bool,
}

impl Default for KeyscanConfig {
    fn default() -> Self {
        Self {
            key_type: default_key_type(),
            poll_interval_secs: default_poll_interval_secs(),
            wait_timeout_secs: None,
            wait_forever: false,
        }
    }
}

impl KeyscanConfig {
    pub fn key_wait(&self) -> KeyWait {
        let timeout = if self.wait_forever {
            None
        } else {
            match self.wait_timeout_secs {
                Some(0) | None => Some(DEFAULT_KEY_WAIT_TIMEOUT),
                Some(secs) => Some(Duration::from_secs(secs)),
            }
        };
        KeyWait {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            timeout,
        }
    }
}

impl Config {
    /// `~/.nodelock.toml`, when a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_FILE_NAME))
    }

    /// Load `path`, or the default file when `path` is `None`.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_server.timeout_secs)
    }

    /// Per-invocation context for `owner`.
    pub fn to_context(&self, owner: String, verbose: bool) -> LockContext {
        let mut ctx = LockContext::new(self.lock_server.url.clone(), owner)
            .with_ssh_user(self.hosts.ssh_user.clone())
            .with_lab_domain(self.hosts.lab_domain.clone())
            .with_vm_machine_type(self.hosts.vm_machine_type.clone())
            .with_key_wait(self.keyscan.key_wait());
        ctx.verbose = verbose;
        ctx
    }
}

// Defaults
fn default_url() -> String { "http://localhost:8080".to_string() }
fn default_timeout_secs() -> u64 { 60 }
fn default_ssh_user() -> String { DEFAULT_SSH_USER.to_string() }
fn default_lab_domain() -> String { DEFAULT_LAB_DOMAIN.to_string() }
fn default_vm_machine_type() -> String { DEFAULT_VM_MACHINE_TYPE.to_string() }
fn default_key_type() -> String { DEFAULT_KEY_TYPE.to_string() }
fn default_poll_interval_secs() -> u64 { DEFAULT_KEY_POLL_INTERVAL.as_secs() }
fn default_create_command() -> Vec<String> {
    ["downburst", "-c", "{vm_host}", "create", "{short}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_destroy_command() -> Vec<String> {
    ["downburst", "-c", "{vm_host}", "destroy", "{short}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
