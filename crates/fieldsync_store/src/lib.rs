//! # Fieldsync Store
//!
//! Persistence seams for the sync core:
//! - `VersionLedger`: the per-entity version record behind optimistic
//!   concurrency, with a conditional-write bump
//! - `SyncQueue`: the append-only audit log of inbound change attempts
//! - `ConflictStore`: detected conflicts held until explicitly resolved
//!
//! Each seam is a trait with an in-memory implementation; durable backends
//! plug in behind the same traits.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflicts;
mod error;
mod ledger;
mod queue;

pub use conflicts::{ConflictStore, MemoryConflicts, SyncConflict};
pub use error::{StoreError, StoreResult};
pub use ledger::{MemoryLedger, VersionEntry, VersionLedger};
pub use queue::{MemoryQueue, QueueEntry, QueueStatus, SyncQueue};
