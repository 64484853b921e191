//! Error types for the engine.

use crate::adapter::AdapterError;
use fieldsync_protocol::EntityKind;
use fieldsync_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the sync processors.
///
/// Per-item problems inside a push batch never surface as these; they
/// become reason strings in the failed/conflict partitions. These errors
/// are for whole-call problems: a pull whose adapter fails must error out
/// rather than hand back a short page, or the client would persist a
/// checkpoint past changes it never received.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A store operation failed outside the per-item path.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An adapter read failed while serving a pull page.
    #[error("adapter failure for entity type {0}: {1}")]
    Adapter(EntityKind, #[source] AdapterError),

    /// An adapter call outlived the configured bound.
    #[error("adapter call timed out after {0:?}")]
    AdapterTimeout(std::time::Duration),
}
