//! Output formats for status queries.

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use crate::error::LockError;
use crate::hostname::short_host;
use crate::targets::TargetsDocument;
use crate::types::NodeRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderFormat {
    /// Full records as indented JSON
    #[default]
    Json,
    /// One line per node
    Brief,
    /// YAML target-list document
    Targets,
}

pub fn render(nodes: &[NodeRecord], format: RenderFormat) -> Result<String, LockError> {
    match format {
        RenderFormat::Json => render_json(nodes),
        RenderFormat::Brief => Ok(nodes.iter().map(|n| brief_line(n) + "\n").collect()),
        RenderFormat::Targets => TargetsDocument::from_nodes(nodes).to_yaml(),
    }
}

fn render_json(nodes: &[NodeRecord]) -> Result<String, LockError> {
    let mut buf = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    nodes
        .serialize(&mut serializer)
        .map_err(|e| LockError::malformed("render json", e))?;
    let mut out = String::from_utf8_lossy(&buf).into_owned();
    out.push('\n');
    Ok(out)
}

/// `<short-host> <un>locked <owner> "<description>"`
pub fn brief_line(node: &NodeRecord) -> String {
    format!(
        "{} {}locked {} \"{}\"",
        short_host(&node.name),
        if node.locked { "  " } else { "un" },
        node.owner().unwrap_or("-"),
        node.description.as_deref().unwrap_or(""),
    )
}
