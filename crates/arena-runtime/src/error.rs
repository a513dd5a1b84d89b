//! Runtime client error types.

use thiserror::Error;

/// Result type alias for runtime client operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors from a host's container control API.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The remote host rejected the create (bad image, exhausted resources,
    /// malformed response). The slot can be rolled back safely.
    #[error("provision failed: {0}")]
    Provision(String),

    /// The remote host rejected the destroy. The container may still exist.
    #[error("destroy failed: {0}")]
    Destroy(String),

    /// The control endpoint could not be reached or timed out. The outcome
    /// of the operation on the host is unknown.
    #[error("host unreachable: {0}")]
    Unreachable(String),
}
