//! Target-list documents.
//!
//! Downstream automation consumes a YAML mapping of node name to host key:
//!
//! ```yaml
//! targets:
//!   ubuntu@box1.front.sepia.ceph.com: ssh-rsa AAAA...
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LockError;
use crate::types::NodeRecord;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetsDocument {
    pub targets: BTreeMap<String, String>,
}

impl TargetsDocument {
    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a NodeRecord>) -> Self {
        Self {
            targets: nodes
                .into_iter()
                .map(|n| (n.name.clone(), n.pub_key().to_string()))
                .collect(),
        }
    }

    pub fn to_yaml(&self) -> Result<String, LockError> {
        serde_yaml::to_string(self).map_err(|e| LockError::malformed("render targets", e))
    }
}

impl From<BTreeMap<String, String>> for TargetsDocument {
    fn from(targets: BTreeMap<String, String>) -> Self {
        Self { targets }
    }
}

/// Node names listed under `targets` in every document of a YAML stream.
///
/// Documents without a `targets` key are ignored.
pub fn parse_targets(yaml: &str) -> Result<Vec<String>, LockError> {
    let mut names = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| LockError::InvalidInput(format!("bad targets document: {}", e)))?;

        let Some(targets) = value.get("targets") else {
            continue;
        };
        let targets = targets.as_mapping().ok_or_else(|| {
            LockError::InvalidInput("`targets` must be a mapping of node names".to_string())
        })?;

        for key in targets.keys() {
            let name = key.as_str().ok_or_else(|| {
                LockError::InvalidInput(format!("target name is not a string: {:?}", key))
            })?;
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Read and parse a targets file.
pub fn read_targets_file(path: &Path) -> Result<Vec<String>, LockError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| LockError::InvalidInput(format!("{}: {}", path.display(), e)))?;
    parse_targets(&content)
}
