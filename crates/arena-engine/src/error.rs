//! Engine error types.

use thiserror::Error;

/// Errors surfaced by orchestration operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("host {host} does not offer image {image}")]
    UnknownImage { host: String, image: String },

    #[error("no free port on host {0}")]
    NoFreePort(String),

    /// A concurrent stop claimed the slot while the container was being
    /// created; the stop won and the container was torn down.
    #[error("instance for owner {owner_id} challenge {challenge_id} was stopped while starting")]
    StoppedWhileStarting { owner_id: u32, challenge_id: u32 },

    #[error(transparent)]
    Runtime(#[from] arena_runtime::RuntimeError),

    #[error("ledger error: {0}")]
    Ledger(#[from] arena_ledger::LedgerError),
}

impl EngineError {
    /// Caller error (unknown host/image) — surfaced immediately, not retried.
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownHost(_) | EngineError::UnknownImage { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
