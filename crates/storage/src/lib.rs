#![forbid(unsafe_code)]

//! File-backed persistence and the coordination services built on it.
//!
//! All state lives under one data root. Mutations (and most reads) run
//! inside [`FileStore::with_lock`], an exclusive advisory flock on
//! `{root}/.global.lock`, which serializes concurrent processes sharing
//! the root. Blocking waits release the lock between poll iterations.

pub mod store;

pub use store::fs::FileStore;
pub use store::{
    CoordConfig, DocsService, IssueService, LockService, TraceService, WorkerService,
};
pub use store::deliveries::DeliveryFilter;
pub use store::issues::CreateIssueParams;
pub use store::next_step::NextStepOutcome;
pub use store::tasks::{CreateTaskParams, ReviewTaskParams, TaskSpec};

/// Failure taxonomy surfaced to the RPC layer. Each variant carries the
/// human-readable message verbatim; the variant classifies it for callers
/// that branch on kind.
#[derive(Debug)]
pub enum CoordError {
    Io(std::io::Error),
    Json(serde_json::Error),
    /// Referenced issue/task/lease/token/submission/message does not exist.
    NotFound(String),
    /// State machine violation ("task 'x' is not open (status: done)").
    Precondition(String),
    /// Missing/empty required field, bad enum value, misaligned arrays.
    InvalidArgument(String),
    /// File locked by another owner; message carries owner and expiry.
    Conflict(String),
    /// Missing/expired/unattached/used next-step token.
    TokenInvalid(String),
    /// Blocking call elapsed without reaching its terminal condition.
    Timeout(String),
    /// `max_task_count` reached.
    LimitExceeded(String),
}

impl std::fmt::Display for CoordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Json(err) => write!(f, "json: {err}"),
            Self::NotFound(msg)
            | Self::Precondition(msg)
            | Self::InvalidArgument(msg)
            | Self::Conflict(msg)
            | Self::TokenInvalid(msg)
            | Self::Timeout(msg)
            | Self::LimitExceeded(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CoordError {}

impl From<std::io::Error> for CoordError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for CoordError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

pub type Result<T> = std::result::Result<T, CoordError>;
