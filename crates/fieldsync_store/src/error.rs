//! Error types for the store crate.

use thiserror::Error;
use uuid::Uuid;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the ledger, queue or conflict store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A bump tried to move a version backwards or sideways. This is a
    /// programming error in the caller and must fail loudly.
    #[error("version regression for {key}: stored {stored}, attempted {attempted}")]
    VersionRegression {
        /// The entity key, rendered as org/kind/id.
        key: String,
        /// Version currently stored.
        stored: u64,
        /// Version the caller attempted to write.
        attempted: u64,
    },

    /// A conditional bump found a different stored version than expected.
    /// The caller should treat this as a fresh conflict, not an overwrite.
    #[error("version check failed for {key}: expected {expected:?}, stored {stored:?}")]
    VersionCheckFailed {
        /// The entity key, rendered as org/kind/id.
        key: String,
        /// Version the caller read before applying.
        expected: Option<u64>,
        /// Version found at write time.
        stored: Option<u64>,
    },

    /// A queue entry id was not found.
    #[error("sync queue entry not found: {0}")]
    EntryNotFound(Uuid),

    /// A queue entry was asked to make an illegal status transition.
    #[error("invalid queue transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// Entry id.
        id: Uuid,
        /// Current status.
        from: String,
        /// Attempted status.
        to: String,
    },

    /// A conflict id was not found in the caller's organization.
    #[error("conflict not found: {0}")]
    ConflictNotFound(Uuid),

    /// A conflict was already resolved; resolutions are immutable.
    #[error("conflict already resolved: {0}")]
    AlreadyResolved(Uuid),
}
