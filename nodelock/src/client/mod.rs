//! Lock service client layer.
//!
//! - [`LockService`]: the trait every component talks to
//! - [`HttpLockService`]: the JSON HTTP API
//! - [`MockLockService`]: in-memory node table for tests

pub mod http;
pub mod mock;
pub mod traits;

pub use http::{HttpLockService, DEFAULT_REQUEST_TIMEOUT};
pub use mock::MockLockService;
pub use traits::LockService;
