//! Request/response pairs for the sync calls.

use crate::changes::{ChangeRecord, ChangeRequest, ConflictNotice, FailedItem};
use crate::entity::{EntityKind, Resolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A batch of queued changes uploaded by one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    /// Changes in the order the device queued them.
    pub changes: Vec<ChangeRequest>,
}

/// The three-way outcome of a push batch.
///
/// Every item of the request lands in exactly one of the three lists, so a
/// device can always tell whether a write landed, was rejected, or needs a
/// decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushResponse {
    /// Entity ids whose change was applied.
    pub synced: Vec<String>,
    /// Items rejected outright, with reasons.
    pub failed: Vec<FailedItem>,
    /// Items that need a conflict decision.
    pub conflicts: Vec<ConflictNotice>,
}

impl PushResponse {
    /// Total number of items accounted for.
    pub fn total(&self) -> usize {
        self.synced.len() + self.failed.len() + self.conflicts.len()
    }
}

/// Parameters of an incremental pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    /// Serve changes strictly newer than this checkpoint.
    pub since: Option<DateTime<Utc>>,
    /// Restrict the feed to these kinds; `None` means all syncable kinds.
    pub kinds: Option<Vec<EntityKind>>,
    /// Page size cap.
    pub limit: Option<usize>,
}

impl PullRequest {
    /// A pull of everything from the epoch.
    pub fn everything() -> Self {
        Self {
            since: None,
            kinds: None,
            limit: None,
        }
    }

    /// Sets the checkpoint.
    pub fn since(mut self, checkpoint: DateTime<Utc>) -> Self {
        self.since = Some(checkpoint);
        self
    }

    /// Restricts the feed to the given kinds.
    pub fn kinds(mut self, kinds: Vec<EntityKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    /// Sets the page size.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One page of the incremental change feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Changes ascending by update timestamp.
    pub changes: Vec<ChangeRecord>,
    /// Checkpoint the client should persist for its next pull.
    pub last_sync: DateTime<Utc>,
    /// True if the page was truncated and more changes are available.
    pub has_more: bool,
}

/// One requested conflict resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionRequest {
    /// The conflict to resolve.
    pub conflict_id: Uuid,
    /// Which side wins.
    pub resolution: Resolution,
    /// Required when `resolution` is `Merged`; ignored otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_data: Option<Value>,
}

/// A batch of conflict resolutions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    /// Resolutions, processed independently.
    pub resolutions: Vec<ResolutionRequest>,
}

/// The resolved/failed partition of a resolve batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveResponse {
    /// Conflict ids that were applied.
    pub resolved: Vec<Uuid>,
    /// Resolutions that failed, with reasons.
    pub failed: Vec<FailedItem>,
}

/// Sync state of one entity, served by the status call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityStatus {
    /// Current ledger version (1 if never versioned).
    pub version: u64,
    /// When the ledger last recorded a write, if ever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// True if a queue entry for this entity is still pending.
    pub has_pending_changes: bool,
    /// True if an unresolved conflict exists for this entity.
    pub has_conflict: bool,
    /// Id of the unresolved conflict, if one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::SyncAction;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn push_response_partition_total() {
        let response = PushResponse {
            synced: vec!["c1".into(), "c2".into()],
            failed: vec![FailedItem::new("c3", "missing required fields")],
            conflicts: vec![],
        };
        assert_eq!(response.total(), 3);
    }

    #[test]
    fn pull_request_builder() {
        let req = PullRequest::everything()
            .kinds(vec![EntityKind::Clients, EntityKind::Loans])
            .limit(20);
        assert_eq!(req.since, None);
        assert_eq!(req.limit, Some(20));
        assert_eq!(
            req.kinds,
            Some(vec![EntityKind::Clients, EntityKind::Loans])
        );
    }

    #[test]
    fn pull_response_wire_shape() {
        let now = Utc::now();
        let response = PullResponse {
            changes: vec![ChangeRecord {
                entity_type: EntityKind::Visits,
                entity_id: "v1".into(),
                action: SyncAction::Update,
                data: json!({"note": "ok"}),
                version: 4,
                updated_at: now,
            }],
            last_sync: now,
            has_more: false,
        };

        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["hasMore"], json!(false));
        assert_eq!(wire["changes"][0]["entityType"], json!("visits"));
        assert_eq!(wire["changes"][0]["version"], json!(4));
    }

    #[test]
    fn merged_without_data_deserializes() {
        // Validation happens in the resolver, not at the wire boundary.
        let req: ResolutionRequest = serde_json::from_value(json!({
            "conflictId": Uuid::new_v4(),
            "resolution": "MERGED",
        }))
        .unwrap();
        assert_eq!(req.resolution, Resolution::Merged);
        assert!(req.merged_data.is_none());
    }
}
