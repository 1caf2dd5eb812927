//! Crate-wide error type. Step-level code returns narrower `thiserror` enums
//! that convert into [`OrchestratorError`] at the public-operation boundary
//! (see orchestrator.rs), mirroring the layered error enums in the teacher's
//! `pagi-governance`/`pagi-parsers` crates rather than one flat stringly
//! typed error.

use thiserror::Error;

/// Top-level error surfaced by every public [`crate::orchestrator::Orchestrator`] operation.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("agent '{role}' call failed: {source}")]
    AgentCall {
        role: String,
        #[source]
        source: AgentError,
    },

    #[error("agent adapter unavailable: {0}")]
    AgentUnavailable(#[from] AgentError),

    #[error("validation exhausted for chapter {chapter} ({kind})")]
    ValidationExhausted { chapter: i32, kind: &'static str },

    #[error("structural plan rejected after {attempts} regenerations")]
    StructuralPlanRejected { attempts: u32 },

    #[error("operation cancelled (token superseded or external stop requested)")]
    Cancelled,

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("precondition failed: {0}")]
    Precondition(String),
}

/// Errors from the storage backend (§6 storage interface).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backend I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// Errors from an agent adapter call (§6 agent adapter interface).
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent returned no content")]
    EmptyResponse,

    #[error("agent returned unparseable output: {0}")]
    ParseFailure(String),

    #[error("unknown agent role: {0}")]
    UnknownRole(String),

    #[error("rate limited after exhausting retry budget")]
    RateLimitExhausted,

    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
