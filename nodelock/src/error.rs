//! Error types for lease coordination.

/// Errors surfaced by the lease coordinator.
///
/// Expected service-side refusals (a node already held, a pool without spare
/// capacity) are usually reported through return values such as
/// [`LockOutcome`](crate::types::LockOutcome) and an empty acquisition map.
/// This enum covers the cases a caller cannot recover from in-line.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The pool cannot satisfy a bulk lock (HTTP 503)
    #[error("Insufficient nodes available to lock {count} {machine_type} nodes: {reason}")]
    ServiceUnavailable {
        count: usize,
        machine_type: String,
        reason: String,
    },

    /// Any other non-success response
    #[error("{operation} failed for {target}, reason: {reason}")]
    RequestFailed {
        operation: &'static str,
        target: String,
        reason: String,
    },

    /// A scanned or named host is absent from the lock database
    #[error("Host is not in the lock database: {0}")]
    UnknownHost(String),

    /// VM creation or destruction failed
    #[error("Provisioning {action} failed for {node}")]
    ProvisioningFailed { action: &'static str, node: String },

    /// Response body did not decode into the expected structure
    #[error("Malformed response from {operation}: {reason}")]
    MalformedResponse {
        operation: &'static str,
        reason: String,
    },

    /// Transport-level failure talking to the lock service
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid caller input, rejected before any network call
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The host key of a virtual node did not appear before the deadline
    #[error("Timed out after {waited_secs}s waiting for the host key of {node}")]
    KeyWaitTimeout { node: String, waited_secs: u64 },

    /// The operation was cancelled by the caller
    #[error("Operation cancelled while waiting on {0}")]
    Cancelled(String),

    /// The external host-key scan tool could not be run
    #[error("Host key scan failed: {0}")]
    ScanFailed(String),
}

impl From<reqwest::Error> for LockError {
    fn from(e: reqwest::Error) -> Self {
        LockError::Network(e.to_string())
    }
}

impl LockError {
    /// Shorthand for a failed request.
    pub fn request_failed(
        operation: &'static str,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        LockError::RequestFailed {
            operation,
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an undecodable response.
    pub fn malformed(operation: &'static str, reason: impl ToString) -> Self {
        LockError::MalformedResponse {
            operation,
            reason: reason.to_string(),
        }
    }
}
