//! Crate-wide error taxonomy.
//!
//! Mirrors the categories in the durability contract: validation errors
//! never enqueue, transient errors retry then fall back, saturation
//! errors divert or drop, shutdown errors redirect, and factory/connect
//! errors surface without caching.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid entry: {0}")]
    Validation(String),

    #[error("unknown entry type: {0}")]
    UnknownEntryType(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("fallback file error: {0}")]
    Fallback(#[from] std::io::Error),

    #[error("fallback entry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("pipeline is shut down")]
    PipelineClosed,

    #[error("decision chain tracker is shut down")]
    TrackerClosed,

    #[error("connector configuration not found for {tenant}:{connector}")]
    ConnectorConfigMissing { tenant: String, connector: String },

    #[error("unknown connector type: {0}")]
    UnknownConnectorType(String),

    #[error("connector factory failed: {0}")]
    FactoryFailed(String),

    #[error("connector connect failed: {0}")]
    ConnectFailed(String),

    #[error("operation timed out or was cancelled: {0}")]
    Cancelled(String),
}
