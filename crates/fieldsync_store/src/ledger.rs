//! The per-entity version ledger.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use fieldsync_protocol::EntityKey;
use parking_lot::Mutex;
use std::collections::HashMap;

/// The ledger row for one entity: its version, last write time and writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    /// Monotonically increasing positive version.
    pub version: u64,
    /// When the version last advanced.
    pub updated_at: DateTime<Utc>,
    /// Actor attributed with the last write.
    pub updated_by: String,
}

/// Durable record of the current version of every synced entity.
///
/// The ledger is the single source of truth for "what version is this
/// entity at". Absence of a key means the entity was never written under
/// sync. Versions only ever increase; `bump_if` gives the conditional-write
/// primitive that catches writers racing through a different processor
/// instance, where no in-process lock can serialize them.
pub trait VersionLedger: Send + Sync {
    /// Returns the full ledger row for a key.
    fn entry(&self, key: &EntityKey) -> Option<VersionEntry>;

    /// Returns the current version for a key, if it was ever written.
    fn version(&self, key: &EntityKey) -> Option<u64> {
        self.entry(key).map(|e| e.version)
    }

    /// Upserts the version for a key, attributed to `actor`.
    ///
    /// Fails with [`StoreError::VersionRegression`] if `new_version` is not
    /// strictly greater than the stored version.
    fn bump(&self, key: &EntityKey, new_version: u64, actor: &str) -> StoreResult<()>;

    /// Upserts the version only if the stored version still equals
    /// `expected` (`None` meaning the key is absent).
    ///
    /// Fails with [`StoreError::VersionCheckFailed`] when another write
    /// landed in between; callers treat that as a fresh conflict.
    fn bump_if(
        &self,
        key: &EntityKey,
        expected: Option<u64>,
        new_version: u64,
        actor: &str,
    ) -> StoreResult<()>;
}

/// In-memory ledger. Concurrent bumps for the same key serialize on the
/// table lock.
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<EntityKey, VersionEntry>>,
}

impl MemoryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledgered entities.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no entity was ever ledgered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl VersionLedger for MemoryLedger {
    fn entry(&self, key: &EntityKey) -> Option<VersionEntry> {
        self.entries.lock().get(key).cloned()
    }

    fn bump(&self, key: &EntityKey, new_version: u64, actor: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(key) {
            if new_version <= existing.version {
                return Err(StoreError::VersionRegression {
                    key: key.to_string(),
                    stored: existing.version,
                    attempted: new_version,
                });
            }
        }
        entries.insert(
            key.clone(),
            VersionEntry {
                version: new_version,
                updated_at: Utc::now(),
                updated_by: actor.to_string(),
            },
        );
        Ok(())
    }

    fn bump_if(
        &self,
        key: &EntityKey,
        expected: Option<u64>,
        new_version: u64,
        actor: &str,
    ) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        let stored = entries.get(key).map(|e| e.version);
        if stored != expected {
            return Err(StoreError::VersionCheckFailed {
                key: key.to_string(),
                expected,
                stored,
            });
        }
        if let Some(stored) = stored {
            if new_version <= stored {
                return Err(StoreError::VersionRegression {
                    key: key.to_string(),
                    stored,
                    attempted: new_version,
                });
            }
        }
        entries.insert(
            key.clone(),
            VersionEntry {
                version: new_version,
                updated_at: Utc::now(),
                updated_by: actor.to_string(),
            },
        );
        Ok(())
    }
}
