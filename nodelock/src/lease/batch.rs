//! Batch execution policy for operations over a list of node names.

use std::future::Future;

use tracing::{error, warn};

use crate::error::LockError;

/// What a batch does after an element fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPolicy {
    /// Stop at the first failure
    #[default]
    FailFast,
    /// Keep going; the batch still reports failure at the end
    ContinueOnError,
}

impl BatchPolicy {
    /// `ContinueOnError` when `force` is set.
    pub fn from_force(force: bool) -> Self {
        if force {
            BatchPolicy::ContinueOnError
        } else {
            BatchPolicy::FailFast
        }
    }
}

/// Per-name results of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// Names never attempted because a fail-fast batch stopped early
    pub skipped: Vec<String>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// Process exit status for the batch.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Run `op` for each name in order under `policy`.
///
/// `op` returns `Ok(false)` for a refused element; an `Err` is logged and
/// counted as a failed element.
pub(crate) async fn run_batch<F, Fut>(
    operation: &'static str,
    names: &[String],
    policy: BatchPolicy,
    mut op: F,
) -> BatchOutcome
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, LockError>>,
{
    let mut outcome = BatchOutcome::default();

    for (i, name) in names.iter().enumerate() {
        let ok = match op(name.clone()).await {
            Ok(ok) => ok,
            Err(e) => {
                error!(node = %name, operation, error = %e, "Batch element failed");
                false
            }
        };

        if ok {
            outcome.succeeded.push(name.clone());
            continue;
        }

        outcome.failed.push(name.clone());
        if policy == BatchPolicy::FailFast {
            outcome.skipped = names[i + 1..].to_vec();
            if !outcome.skipped.is_empty() {
                warn!(
                    operation,
                    skipped = outcome.skipped.len(),
                    "Stopping at first failure"
                );
            }
            break;
        }
    }

    outcome
}
