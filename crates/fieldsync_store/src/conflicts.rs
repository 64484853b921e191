//! The conflict store.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use fieldsync_protocol::{EntityKey, EntityKind, Resolution};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// One detected version mismatch, held until explicitly resolved.
///
/// Both snapshots are persisted so the operator can render a diff long
/// after the originating device went back offline. Conflicts are never
/// deleted; a resolution is written at most once, and only a claim whose
/// winning write failed may be handed back via [`ConflictStore::reopen`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    /// Conflict id.
    pub id: Uuid,
    /// Owning organization.
    pub org_id: String,
    /// The queue entry whose push raised this conflict.
    pub sync_queue_id: Uuid,
    /// Entity kind.
    pub entity_type: EntityKind,
    /// Entity id.
    pub entity_id: String,
    /// Version the device pushed against.
    pub client_version: u64,
    /// Version the server held at detection time.
    pub server_version: u64,
    /// The device's queued payload.
    pub client_data: Value,
    /// The server's snapshot at detection time.
    pub server_data: Value,
    /// Chosen outcome; `None` until resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    /// Who resolved it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    /// When it was resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SyncConflict {
    /// Creates an unresolved conflict as detected by the push processor.
    #[allow(clippy::too_many_arguments)]
    pub fn detected(
        org_id: impl Into<String>,
        sync_queue_id: Uuid,
        entity_type: EntityKind,
        entity_id: impl Into<String>,
        client_version: u64,
        server_version: u64,
        client_data: Value,
        server_data: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id: org_id.into(),
            sync_queue_id,
            entity_type,
            entity_id: entity_id.into(),
            client_version,
            server_version,
            client_data,
            server_data,
            resolution: None,
            resolved_by: None,
            resolved_at: None,
        }
    }

    /// The ledger key this conflict is about.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.org_id.clone(), self.entity_type, self.entity_id.clone())
    }

    /// Returns true if the conflict has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

/// Persistence for detected conflicts. Lookups are always org-scoped.
pub trait ConflictStore: Send + Sync {
    /// Persists a freshly detected conflict.
    fn insert(&self, conflict: SyncConflict) -> StoreResult<Uuid>;

    /// Looks up a conflict by id within an organization.
    fn get(&self, org_id: &str, id: Uuid) -> Option<SyncConflict>;

    /// All unresolved conflicts for an organization, oldest first.
    fn unresolved(&self, org_id: &str) -> Vec<SyncConflict>;

    /// The unresolved conflict for one entity, if any.
    fn unresolved_for(&self, key: &EntityKey) -> Option<SyncConflict>;

    /// Records the resolution. Fails with [`StoreError::ConflictNotFound`]
    /// for an unknown id and [`StoreError::AlreadyResolved`] on a second
    /// attempt; a resolution is written at most once.
    fn mark_resolved(
        &self,
        org_id: &str,
        id: Uuid,
        resolution: Resolution,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<SyncConflict>;

    /// Reverts a resolution whose winning write failed, making the
    /// conflict resolvable again. Fails with
    /// [`StoreError::ConflictNotFound`] for an unknown id.
    fn reopen(&self, org_id: &str, id: Uuid) -> StoreResult<()>;
}

/// In-memory conflict store.
#[derive(Default)]
pub struct MemoryConflicts {
    rows: Mutex<Vec<SyncConflict>>,
}

impl MemoryConflicts {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of conflicts ever detected.
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Returns true if no conflict was ever detected.
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl ConflictStore for MemoryConflicts {
    fn insert(&self, conflict: SyncConflict) -> StoreResult<Uuid> {
        let id = conflict.id;
        self.rows.lock().push(conflict);
        Ok(id)
    }

    fn get(&self, org_id: &str, id: Uuid) -> Option<SyncConflict> {
        self.rows
            .lock()
            .iter()
            .find(|c| c.org_id == org_id && c.id == id)
            .cloned()
    }

    fn unresolved(&self, org_id: &str) -> Vec<SyncConflict> {
        self.rows
            .lock()
            .iter()
            .filter(|c| c.org_id == org_id && !c.is_resolved())
            .cloned()
            .collect()
    }

    fn unresolved_for(&self, key: &EntityKey) -> Option<SyncConflict> {
        self.rows
            .lock()
            .iter()
            .find(|c| !c.is_resolved() && &c.key() == key)
            .cloned()
    }

    fn mark_resolved(
        &self,
        org_id: &str,
        id: Uuid,
        resolution: Resolution,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<SyncConflict> {
        let mut rows = self.rows.lock();
        let row = rows
            .iter_mut()
            .find(|c| c.org_id == org_id && c.id == id)
            .ok_or(StoreError::ConflictNotFound(id))?;
        if row.is_resolved() {
            return Err(StoreError::AlreadyResolved(id));
        }
        row.resolution = Some(resolution);
        row.resolved_by = Some(resolved_by.to_string());
        row.resolved_at = Some(at);
        Ok(row.clone())
    }

    fn reopen(&self, org_id: &str, id: Uuid) -> StoreResult<()> {
        let mut rows = self.rows.lock();
        let row = rows
            .iter_mut()
            .find(|c| c.org_id == org_id && c.id == id)
            .ok_or(StoreError::ConflictNotFound(id))?;
        row.resolution = None;
        row.resolved_by = None;
        row.resolved_at = None;
        Ok(())
    }
}
