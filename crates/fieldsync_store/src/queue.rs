//! The append-only sync queue.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use fieldsync_protocol::{EntityKey, EntityKind, SyncAction};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle status of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    /// Recorded, not yet processed.
    Pending,
    /// The change was applied and the ledger bumped.
    Synced,
    /// A version mismatch was detected; a conflict row exists.
    Conflict,
    /// The adapter rejected the change; see `failure_reason`.
    Failed,
}

impl QueueStatus {
    fn name(self) -> &'static str {
        match self {
            QueueStatus::Pending => "PENDING",
            QueueStatus::Synced => "SYNCED",
            QueueStatus::Conflict => "CONFLICT",
            QueueStatus::Failed => "FAILED",
        }
    }
}

/// One attempted change, kept forever as an audit record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Entry id.
    pub id: Uuid,
    /// Owning organization.
    pub org_id: String,
    /// Acting user.
    pub user_id: String,
    /// Originating device, when the client reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Entity kind.
    pub entity_type: EntityKind,
    /// Entity id.
    pub entity_id: String,
    /// Create, update or delete.
    pub action: SyncAction,
    /// The change payload as the device sent it.
    pub payload: Value,
    /// The version the device believed was current.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_version: Option<u64>,
    /// Lifecycle status.
    pub status: QueueStatus,
    /// When the entry was recorded.
    pub created_at: DateTime<Utc>,
    /// When the entry left Pending (synced, conflicted or failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// Why the adapter rejected the change, when status is Failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl QueueEntry {
    /// Creates a pending entry for a change attempt.
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        org_id: impl Into<String>,
        user_id: impl Into<String>,
        device_id: Option<String>,
        entity_type: EntityKind,
        entity_id: impl Into<String>,
        action: SyncAction,
        payload: Value,
        client_version: Option<u64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id: org_id.into(),
            user_id: user_id.into(),
            device_id,
            entity_type,
            entity_id: entity_id.into(),
            action,
            payload,
            client_version,
            status: QueueStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
            failure_reason: None,
        }
    }

    /// The ledger key this entry targets.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.org_id.clone(), self.entity_type, self.entity_id.clone())
    }
}

/// Append-only log of change attempts.
///
/// Entries are never deleted. Legal transitions are
/// Pending -> {Synced, Conflict, Failed} and Conflict -> Synced (when the
/// conflict is resolved); anything else is an `InvalidTransition`.
pub trait SyncQueue: Send + Sync {
    /// Appends an entry, returning its id.
    fn append(&self, entry: QueueEntry) -> StoreResult<Uuid>;

    /// Looks up an entry by id.
    fn entry(&self, id: Uuid) -> Option<QueueEntry>;

    /// Marks a pending entry as synced.
    fn mark_synced(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Marks a pending entry as conflicting.
    fn mark_conflict(&self, id: Uuid) -> StoreResult<()>;

    /// Marks a pending entry as failed with a reason.
    fn mark_failed(&self, id: Uuid, reason: &str) -> StoreResult<()>;

    /// Marks a conflicting entry as synced after its conflict is resolved.
    fn mark_conflict_synced(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Returns true if any entry for the key is still pending.
    fn has_pending(&self, key: &EntityKey) -> bool;

    /// All entries recorded for a key, in append order.
    fn entries_for(&self, key: &EntityKey) -> Vec<QueueEntry>;
}

/// In-memory queue.
#[derive(Default)]
pub struct MemoryQueue {
    entries: Mutex<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    log: Vec<QueueEntry>,
    by_id: HashMap<Uuid, usize>,
}

impl MemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries ever recorded.
    pub fn len(&self) -> usize {
        self.entries.lock().log.len()
    }

    /// Returns true if nothing was ever recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().log.is_empty()
    }

    fn transition(
        &self,
        id: Uuid,
        allowed_from: QueueStatus,
        to: QueueStatus,
        at: Option<DateTime<Utc>>,
        reason: Option<&str>,
    ) -> StoreResult<()> {
        let mut inner = self.entries.lock();
        let idx = *inner.by_id.get(&id).ok_or(StoreError::EntryNotFound(id))?;
        let entry = &mut inner.log[idx];
        if entry.status != allowed_from {
            return Err(StoreError::InvalidTransition {
                id,
                from: entry.status.name().to_string(),
                to: to.name().to_string(),
            });
        }
        entry.status = to;
        entry.processed_at = Some(at.unwrap_or_else(Utc::now));
        entry.failure_reason = reason.map(str::to_string);
        Ok(())
    }
}

impl SyncQueue for MemoryQueue {
    fn append(&self, entry: QueueEntry) -> StoreResult<Uuid> {
        let id = entry.id;
        let mut inner = self.entries.lock();
        let idx = inner.log.len();
        inner.by_id.insert(id, idx);
        inner.log.push(entry);
        Ok(id)
    }

    fn entry(&self, id: Uuid) -> Option<QueueEntry> {
        let inner = self.entries.lock();
        inner.by_id.get(&id).map(|&idx| inner.log[idx].clone())
    }

    fn mark_synced(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.transition(id, QueueStatus::Pending, QueueStatus::Synced, Some(at), None)
    }

    fn mark_conflict(&self, id: Uuid) -> StoreResult<()> {
        self.transition(id, QueueStatus::Pending, QueueStatus::Conflict, None, None)
    }

    fn mark_failed(&self, id: Uuid, reason: &str) -> StoreResult<()> {
        self.transition(
            id,
            QueueStatus::Pending,
            QueueStatus::Failed,
            None,
            Some(reason),
        )
    }

    fn mark_conflict_synced(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.transition(
            id,
            QueueStatus::Conflict,
            QueueStatus::Synced,
            Some(at),
            None,
        )
    }

    fn has_pending(&self, key: &EntityKey) -> bool {
        let inner = self.entries.lock();
        inner
            .log
            .iter()
            .any(|e| e.status == QueueStatus::Pending && &e.key() == key)
    }

    fn entries_for(&self, key: &EntityKey) -> Vec<QueueEntry> {
        let inner = self.entries.lock();
        inner
            .log
            .iter()
            .filter(|e| &e.key() == key)
            .cloned()
            .collect()
    }
}
