//! Who holds what: fetching, filtering and rendering node status.

pub mod filter;
pub mod query;
pub mod render;

pub use filter::{FilterChain, NodeFilter};
pub use query::{StatusQuery, StatusQueryEngine};
pub use render::{brief_line, render, RenderFormat};
