//! # Fieldsync Protocol
//!
//! Wire-contract types for the fieldsync offline synchronization protocol.
//!
//! This crate provides:
//! - `EntityKind`, `SyncAction` and `Resolution` enumerations
//! - `ChangeRequest` / `ChangeRecord` for uploaded and downloaded changes
//! - Request/response pairs for the push, pull, resolve and status calls
//!
//! Payloads stay opaque `serde_json` maps at this boundary; each entity
//! adapter validates shape on its own side. This is a pure protocol crate
//! with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changes;
mod entity;
mod messages;

pub use changes::{ChangeRecord, ChangeRequest, ConflictNotice, FailedItem};
pub use entity::{EntityKey, EntityKind, ParseKindError, Resolution, SyncAction};
pub use messages::{
    EntityStatus, PullRequest, PullResponse, PushRequest, PushResponse, ResolutionRequest,
    ResolveRequest, ResolveResponse,
};
