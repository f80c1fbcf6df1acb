//! Shared data model for nodes, leases and patches.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::LockError;

/// Node name to SSH host public key, as returned by a bulk lock.
pub type LockedNodes = BTreeMap<String, String>;

/// The lock service's view of one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Owner-qualified identity, e.g. `ubuntu@box1.front.sepia.ceph.com`
    pub name: String,

    /// Category tag (physical class name, or the virtual type)
    #[serde(alias = "type")]
    pub machine_type: String,

    #[serde(deserialize_with = "flexible_bool")]
    pub locked: bool,

    /// Only meaningful while `locked` is set; use [`NodeRecord::owner`]
    #[serde(deserialize_with = "Option::deserialize")]
    pub locked_by: Option<String>,

    #[serde(deserialize_with = "Option::deserialize")]
    pub description: Option<String>,

    #[serde(deserialize_with = "flexible_bool")]
    pub up: bool,

    #[serde(deserialize_with = "Option::deserialize")]
    pub vm_host: Option<VmHost>,

    #[serde(deserialize_with = "Option::deserialize")]
    pub ssh_pub_key: Option<String>,
}

impl NodeRecord {
    /// A free, up, physical node with no key.
    pub fn new(name: impl Into<String>, machine_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            machine_type: machine_type.into(),
            locked: false,
            locked_by: None,
            description: None,
            up: true,
            vm_host: None,
            ssh_pub_key: None,
        }
    }

    pub fn locked_by(mut self, owner: impl Into<String>) -> Self {
        self.locked = true;
        self.locked_by = Some(owner.into());
        self
    }

    pub fn on_vm_host(mut self, host: impl Into<String>) -> Self {
        self.vm_host = Some(VmHost::Name(host.into()));
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.ssh_pub_key = Some(key.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_up(mut self, up: bool) -> Self {
        self.up = up;
        self
    }

    /// Current lease holder. `None` for a free node, whatever `locked_by` says.
    pub fn owner(&self) -> Option<&str> {
        if self.locked {
            self.locked_by.as_deref()
        } else {
            None
        }
    }

    /// A node with a non-empty `vm_host` is virtual.
    pub fn is_virtual(&self) -> bool {
        self.vm_host
            .as_ref()
            .map(|h| !h.name().is_empty())
            .unwrap_or(false)
    }

    /// Stored host key, empty when unknown.
    pub fn pub_key(&self) -> &str {
        self.ssh_pub_key.as_deref().unwrap_or("")
    }
}

/// Hypervisor a virtual node runs on.
///
/// Older servers send the host name, newer ones embed the host record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VmHost {
    Name(String),
    Record { name: String },
}

impl VmHost {
    pub fn name(&self) -> &str {
        match self {
            VmHost::Name(name) => name,
            VmHost::Record { name } => name,
        }
    }
}

/// Accepts `true`/`false` as well as the `1`/`0` some servers emit.
fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrInt {
        Bool(bool),
        Int(i64),
    }

    Ok(match BoolOrInt::deserialize(deserializer)? {
        BoolOrInt::Bool(b) => b,
        BoolOrInt::Int(i) => i != 0,
    })
}

/// Sparse metadata patch for `PUT /nodes/{name}`.
///
/// Only fields that are `Some` are sent; the server leaves the rest untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_pub_key: Option<String>,
}

impl NodePatch {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.up.is_none() && self.ssh_pub_key.is_none()
    }
}

/// Requested metadata changes for [`LeaseUpdater::update`](crate::lease::LeaseUpdater::update).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub description: Option<String>,
    pub status: Option<NodeStatus>,
    pub ssh_pub_key: Option<String>,
}

impl NodeUpdate {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.status.is_none() && self.ssh_pub_key.is_none()
    }

    /// Only a new host key.
    pub fn key(ssh_pub_key: impl Into<String>) -> Self {
        Self {
            ssh_pub_key: Some(ssh_pub_key.into()),
            ..Default::default()
        }
    }

    pub fn to_patch(&self) -> NodePatch {
        NodePatch {
            description: self.description.clone(),
            up: self.status.map(|s| s == NodeStatus::Up),
            ssh_pub_key: self.ssh_pub_key.clone(),
        }
    }
}

/// The `up` flag as users spell it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Up,
    Down,
}

impl NodeStatus {
    pub fn is_up(self) -> bool {
        self == NodeStatus::Up
    }
}

impl FromStr for NodeStatus {
    type Err = LockError;

    /// `"up"` is up; every other spelling means down.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s == "up" {
            NodeStatus::Up
        } else {
            NodeStatus::Down
        })
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeStatus::Up => "up",
            NodeStatus::Down => "down",
        })
    }
}

/// Result of a single-node lock or unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOutcome {
    pub success: bool,
    /// Server-supplied message, or the numeric status when none decodes
    pub reason: Option<String>,
}

impl LockOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
        }
    }

    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("unknown")
    }
}

/// Result of `POST /nodes/lock_many/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockManyResponse {
    /// The nodes now held, with their current host keys
    Locked(LockedNodes),
    /// Not enough free nodes of the type (HTTP 503)
    Unavailable { reason: String },
    /// Any other non-success response
    Rejected { status: u16, reason: String },
}

impl LockManyResponse {
    /// Locked nodes, empty on any failure.
    pub fn into_nodes(self) -> LockedNodes {
        match self {
            LockManyResponse::Locked(nodes) => nodes,
            _ => LockedNodes::new(),
        }
    }
}

/// A desired bulk acquisition. Lives for one `acquire_many` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRequest {
    pub count: usize,
    /// One type, or several separated by commas or whitespace
    pub machine_type: String,
    /// Defaults to the context owner
    pub owner: Option<String>,
    pub description: Option<String>,
}

impl LeaseRequest {
    pub fn new(count: usize, machine_type: impl Into<String>) -> Self {
        Self {
            count,
            machine_type: machine_type.into(),
            owner: None,
            description: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Split a compound machine-type request into its ordered alternatives.
///
/// `"plana,burnupi mira"` yields `["plana", "burnupi", "mira"]`.
pub fn split_machine_types(machine_type: &str) -> Vec<String> {
    machine_type
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
