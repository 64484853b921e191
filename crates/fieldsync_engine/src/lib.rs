//! # Fieldsync Engine
//!
//! The synchronization core:
//! - Adapter registry and dispatch (the boundary to the CRUD/business layer)
//! - Push processor: per-entity optimistic-concurrency checks over a batch
//! - Pull processor: incremental change feed since a checkpoint
//! - Conflict resolver: applies operator decisions and advances the ledger
//!
//! ## Key invariants
//!
//! - Ledger versions only increase; a lost conditional write becomes a fresh
//!   conflict, never a silent overwrite
//! - One bad item never fails a batch; outcomes are partitioned per item
//! - Every adapter call is bounded by the configured timeout

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod config;
mod error;
mod pull;
mod push;
mod resolve;
mod timeout;

pub use adapter::{
    AdapterContext, AdapterError, AdapterRegistry, AdapterResult, EntityAdapter, EntityChange,
    MemoryAdapter,
};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use pull::PullProcessor;
pub use push::PushProcessor;
pub use resolve::ConflictResolver;
