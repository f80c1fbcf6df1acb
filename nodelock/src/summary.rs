//! Pool-wide summary of node counts by owner and machine type.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::client::LockService;
use crate::error::LockError;
use crate::types::NodeRecord;

/// Owner label for nodes nobody holds.
pub const FREE_OWNER: &str = "(free)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub owner: String,
    pub machine_type: String,
    pub count: usize,
    pub up: usize,
}

/// Grouped rows, sorted by `(machine_type, count)`, with totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryReport {
    pub rows: Vec<SummaryRow>,
    pub total_count: usize,
    pub total_up: usize,
}

impl SummaryReport {
    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a NodeRecord>) -> Self {
        let mut groups: BTreeMap<(String, String), (usize, usize)> = BTreeMap::new();
        for node in nodes {
            let owner = node.owner().unwrap_or(FREE_OWNER).to_string();
            let entry = groups
                .entry((owner, node.machine_type.clone()))
                .or_default();
            entry.0 += 1;
            if node.up {
                entry.1 += 1;
            }
        }

        // BTreeMap iteration already orders by owner, so the stable sort
        // leaves equal (type, count) rows in owner order
        let mut rows: Vec<SummaryRow> = groups
            .into_iter()
            .map(|((owner, machine_type), (count, up))| SummaryRow {
                owner,
                machine_type,
                count,
                up,
            })
            .collect();
        rows.sort_by(|a, b| {
            (a.machine_type.as_str(), a.count).cmp(&(b.machine_type.as_str(), b.count))
        });

        let total_count = rows.iter().map(|r| r.count).sum();
        let total_up = rows.iter().map(|r| r.up).sum();
        Self {
            rows,
            total_count,
            total_up,
        }
    }

    pub fn row(&self, owner: &str, machine_type: &str) -> Option<&SummaryRow> {
        self.rows
            .iter()
            .find(|r| r.owner == owner && r.machine_type == machine_type)
    }
}

impl fmt::Display for SummaryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TYPE     COUNT  UP  OWNER")?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<8} {:>3}  {:>3}  {}",
                row.machine_type, row.count, row.up, row.owner
            )?;
        }
        writeln!(f, "         ---  ---")?;
        writeln!(f, "{:>12}  {:>3}", self.total_count, self.total_up)
    }
}

pub struct SummaryReporter {
    service: Arc<dyn LockService>,
}

impl SummaryReporter {
    pub fn new(service: Arc<dyn LockService>) -> Self {
        Self { service }
    }

    /// Summarize the pool, optionally restricted to one machine type.
    pub async fn summarize(&self, machine_type: Option<&str>) -> Result<SummaryReport, LockError> {
        let nodes = self
            .service
            .list_nodes(machine_type)
            .await?
            .ok_or_else(|| LockError::request_failed("list nodes", "lock server", "request refused"))?;
        debug!(nodes = nodes.len(), "Summarizing pool");
        Ok(SummaryReport::from_nodes(&nodes))
    }
}
