//! Conflict resolution.

use crate::adapter::{AdapterContext, AdapterRegistry, EntityAdapter};
use crate::config::EngineConfig;
use crate::timeout::run_bounded;
use chrono::Utc;
use fieldsync_protocol::{FailedItem, Resolution, ResolutionRequest, ResolveResponse};
use fieldsync_store::{ConflictStore, SyncConflict, SyncQueue, VersionLedger};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Applies explicit resolution decisions to stored conflicts.
///
/// Resolution is never automatic: a conflict sits in the store until a
/// user picks a winner. Applying a decision writes the winning data
/// through the adapter, bumps the version past both sides, and closes
/// the queue entry that raised the conflict.
pub struct ConflictResolver {
    registry: Arc<AdapterRegistry>,
    ledger: Arc<dyn VersionLedger>,
    queue: Arc<dyn SyncQueue>,
    conflicts: Arc<dyn ConflictStore>,
    config: EngineConfig,
}

impl ConflictResolver {
    /// Creates a resolver over the shared stores and adapters.
    pub fn new(
        registry: Arc<AdapterRegistry>,
        ledger: Arc<dyn VersionLedger>,
        queue: Arc<dyn SyncQueue>,
        conflicts: Arc<dyn ConflictStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            queue,
            conflicts,
            config,
        }
    }

    /// Applies a batch of resolution decisions, each independently.
    pub fn resolve(
        &self,
        org_id: &str,
        resolver_id: &str,
        requests: &[ResolutionRequest],
    ) -> ResolveResponse {
        let mut response = ResolveResponse::default();
        for request in requests {
            match self.resolve_one(org_id, resolver_id, request) {
                Ok(()) => response.resolved.push(request.conflict_id),
                Err(reason) => {
                    warn!(
                        org = org_id,
                        conflict = %request.conflict_id,
                        reason,
                        "conflict resolution failed"
                    );
                    response
                        .failed
                        .push(FailedItem::new(request.conflict_id.to_string(), reason));
                }
            }
        }
        info!(
            org = org_id,
            resolved = response.resolved.len(),
            failed = response.failed.len(),
            "resolution batch processed"
        );
        response
    }

    fn resolve_one(
        &self,
        org_id: &str,
        resolver_id: &str,
        request: &ResolutionRequest,
    ) -> Result<(), String> {
        let conflict = self
            .conflicts
            .get(org_id, request.conflict_id)
            .ok_or_else(|| format!("conflict not found: {}", request.conflict_id))?;

        // Everything a bad request can be rejected for is checked before
        // the claim below, so a malformed decision never churns the store.
        let adapter = self.registry.get(conflict.entity_type).ok_or_else(|| {
            format!(
                "no adapter registered for entity type: {}",
                conflict.entity_type
            )
        })?;
        let winning = winning_data(request, &conflict)?;

        // Claim the conflict first. `mark_resolved` writes at most once,
        // so of two concurrent decisions exactly one gets to push data
        // through the adapter; the other stops here without writing.
        self.conflicts
            .mark_resolved(
                org_id,
                request.conflict_id,
                request.resolution,
                resolver_id,
                Utc::now(),
            )
            .map_err(|e| e.to_string())?;

        // Past both sides, so neither the device's retry nor a concurrent
        // web edit at the old version can slip in unnoticed.
        let key = conflict.key();
        let next = conflict.client_version.max(conflict.server_version) + 1;
        let applied = self
            .apply_winner(org_id, resolver_id, adapter, &conflict, &winning)
            .and_then(|()| {
                self.ledger
                    .bump(&key, next, resolver_id)
                    .map_err(|e| format!("version bump failed: {e}"))
            });
        if let Err(reason) = applied {
            // Hand the claim back so the decision can be retried once the
            // adapter recovers.
            if let Err(e) = self.conflicts.reopen(org_id, request.conflict_id) {
                warn!(
                    org = org_id,
                    conflict = %request.conflict_id,
                    error = %e,
                    "conflict not reopened after failed winning write"
                );
            }
            return Err(reason);
        }

        // The queue entry may have been pruned since detection; its absence
        // does not undo the resolution.
        if let Err(e) = self
            .queue
            .mark_conflict_synced(conflict.sync_queue_id, Utc::now())
        {
            warn!(
                org = org_id,
                entry = %conflict.sync_queue_id,
                error = %e,
                "queue entry not closed after resolution"
            );
        }

        info!(
            org = org_id,
            conflict = %request.conflict_id,
            entity = %key,
            resolution = %request.resolution,
            version = next,
            "conflict resolved"
        );
        Ok(())
    }

    fn apply_winner(
        &self,
        org_id: &str,
        resolver_id: &str,
        adapter: Arc<dyn EntityAdapter>,
        conflict: &SyncConflict,
        data: &Value,
    ) -> Result<(), String> {
        let ctx = AdapterContext::new(org_id, resolver_id);
        let entity_id = conflict.entity_id.clone();
        let payload = data.clone();

        run_bounded(self.config.item_timeout, move || {
            adapter.update(&ctx, &entity_id, &payload)
        })
        .ok_or_else(|| {
            format!(
                "adapter call timed out after {:?}",
                self.config.item_timeout
            )
        })?
        .map_err(|e| e.to_string())
    }
}

/// Picks the payload that wins under the requested strategy.
fn winning_data(request: &ResolutionRequest, conflict: &SyncConflict) -> Result<Value, String> {
    match request.resolution {
        Resolution::ClientWins => Ok(conflict.client_data.clone()),
        Resolution::ServerWins => Ok(conflict.server_data.clone()),
        Resolution::Merged => request
            .merged_data
            .clone()
            .ok_or_else(|| "MERGED resolution requires mergedData".to_string()),
    }
}
