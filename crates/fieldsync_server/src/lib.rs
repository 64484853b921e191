//! # Fieldsync Server
//!
//! Transport-agnostic sync service for fieldsync:
//! - [`SyncService`]: push/pull/resolve/status over shared stores
//! - Device token authentication (HMAC-SHA256)
//! - Whole-request guards (batch caps); per-item outcomes live in the
//!   responses themselves
//!
//! An HTTP layer maps endpoints onto the service after resolving the
//! caller's organization from its token.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod error;
mod service;

pub use auth::{TokenClaims, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use service::SyncService;
