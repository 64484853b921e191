//! Uploaded and downloaded change records.

use crate::entity::{EntityKind, SyncAction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One change a device queued while offline.
///
/// `entity_type` arrives as a plain string so an unknown kind can be
/// reported as a per-item failure instead of failing the whole batch at
/// deserialization time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    /// Entity kind, by wire name.
    pub entity_type: String,
    /// Entity id within the caller's organization.
    pub entity_id: String,
    /// Create, update or delete.
    pub action: SyncAction,
    /// Opaque field map; validated by the entity adapter.
    pub payload: Value,
    /// The version the device believed was current, if it had seen one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<u64>,
    /// Originating device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// When the device recorded the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChangeRequest {
    /// Creates a change request without a client version.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: SyncAction,
        payload: Value,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action,
            payload,
            client_version: None,
            device_id: None,
            timestamp: None,
        }
    }

    /// Sets the version the device believed was current.
    pub fn with_client_version(mut self, version: u64) -> Self {
        self.client_version = Some(version);
        self
    }

    /// Sets the originating device.
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// One entity change served by the pull feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Entity kind.
    pub entity_type: EntityKind,
    /// Entity id.
    pub entity_id: String,
    /// Action the client should apply locally.
    pub action: SyncAction,
    /// Current snapshot of the entity.
    pub data: Value,
    /// Current ledger version (1 if the entity was never versioned).
    pub version: u64,
    /// When the entity last changed.
    pub updated_at: DateTime<Utc>,
}

/// A per-item failure in a push or resolve batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    /// The entity id (push) or conflict id (resolve) that failed.
    pub id: String,
    /// Human-readable reason.
    pub error: String,
}

impl FailedItem {
    /// Creates a failed item.
    pub fn new(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            error: error.into(),
        }
    }
}

/// A version mismatch raised by the push processor.
///
/// Carries both snapshots so the device or operator can render a diff and
/// decide the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictNotice {
    /// Id of the persisted conflict row, used to resolve it later.
    pub conflict_id: Uuid,
    /// Entity kind.
    pub entity_type: EntityKind,
    /// Entity id.
    pub entity_id: String,
    /// Version the device pushed against.
    pub client_version: u64,
    /// Version the server holds.
    pub server_version: u64,
    /// The device's queued payload.
    pub client_data: Value,
    /// The server's current snapshot.
    pub server_data: Value,
}
