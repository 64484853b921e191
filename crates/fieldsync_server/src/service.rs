//! The sync service facade.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use fieldsync_engine::{AdapterRegistry, ConflictResolver, PullProcessor, PushProcessor};
use fieldsync_protocol::{
    EntityKey, EntityKind, EntityStatus, PullRequest, PullResponse, PushRequest, PushResponse,
    ResolveRequest, ResolveResponse,
};
use fieldsync_store::{
    ConflictStore, MemoryConflicts, MemoryLedger, MemoryQueue, SyncConflict, SyncQueue,
    VersionLedger,
};
use std::sync::Arc;
use tracing::info;

/// One service instance wiring the processors to shared stores.
///
/// Transport-agnostic: an HTTP layer maps requests onto `handle_push`,
/// `handle_pull` and `handle_resolve` after resolving the caller's
/// organization. Per-item problems are reported inside the responses;
/// a [`ServerError`] means the request as a whole was rejected.
pub struct SyncService {
    push: PushProcessor,
    pull: PullProcessor,
    resolver: ConflictResolver,
    ledger: Arc<dyn VersionLedger>,
    queue: Arc<dyn SyncQueue>,
    conflicts: Arc<dyn ConflictStore>,
    config: ServerConfig,
}

impl SyncService {
    /// Creates a service over fresh in-memory stores.
    pub fn new(registry: Arc<AdapterRegistry>, config: ServerConfig) -> Self {
        Self::with_stores(
            registry,
            config,
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryQueue::new()),
            Arc::new(MemoryConflicts::new()),
        )
    }

    /// Creates a service over existing stores.
    pub fn with_stores(
        registry: Arc<AdapterRegistry>,
        config: ServerConfig,
        ledger: Arc<dyn VersionLedger>,
        queue: Arc<dyn SyncQueue>,
        conflicts: Arc<dyn ConflictStore>,
    ) -> Self {
        let engine = config.engine.clone();
        Self {
            push: PushProcessor::new(
                registry.clone(),
                ledger.clone(),
                queue.clone(),
                conflicts.clone(),
                engine.clone(),
            ),
            pull: PullProcessor::new(registry.clone(), ledger.clone(), engine.clone()),
            resolver: ConflictResolver::new(
                registry,
                ledger.clone(),
                queue.clone(),
                conflicts.clone(),
                engine,
            ),
            ledger,
            queue,
            conflicts,
            config,
        }
    }

    /// Processes one push batch for a user of an organization.
    pub fn handle_push(
        &self,
        org_id: &str,
        user_id: &str,
        request: &PushRequest,
    ) -> ServerResult<PushResponse> {
        // The batch cap is the only whole-request rejection on this path;
        // everything after it settles per item.
        if request.changes.len() > self.config.max_push_batch {
            return Err(ServerError::BatchTooLarge {
                size: request.changes.len(),
                max: self.config.max_push_batch,
            });
        }
        Ok(self.push.process(org_id, user_id, &request.changes))
    }

    /// Serves one page of the incremental change feed.
    pub fn handle_pull(&self, org_id: &str, request: &PullRequest) -> ServerResult<PullResponse> {
        Ok(self.pull.process(org_id, request)?)
    }

    /// Applies a batch of conflict resolutions.
    pub fn handle_resolve(
        &self,
        org_id: &str,
        resolver_id: &str,
        request: &ResolveRequest,
    ) -> ServerResult<ResolveResponse> {
        if request.resolutions.len() > self.config.max_resolve_batch {
            return Err(ServerError::BatchTooLarge {
                size: request.resolutions.len(),
                max: self.config.max_resolve_batch,
            });
        }
        Ok(self
            .resolver
            .resolve(org_id, resolver_id, &request.resolutions))
    }

    /// All unresolved conflicts for an organization, oldest first.
    pub fn list_conflicts(&self, org_id: &str) -> Vec<SyncConflict> {
        self.conflicts.unresolved(org_id)
    }

    /// The sync state of one entity.
    pub fn entity_status(&self, org_id: &str, kind: EntityKind, entity_id: &str) -> EntityStatus {
        let key = EntityKey::new(org_id, kind, entity_id);
        let entry = self.ledger.entry(&key);
        let conflict = self.conflicts.unresolved_for(&key);
        EntityStatus {
            version: entry.as_ref().map(|e| e.version).unwrap_or(1),
            last_updated: entry.map(|e| e.updated_at),
            has_pending_changes: self.queue.has_pending(&key),
            has_conflict: conflict.is_some(),
            conflict_id: conflict.map(|c| c.id),
        }
    }

    /// Issues a token for a device, when authentication is configured.
    pub fn issue_token(&self, org_id: &str, device_id: &str) -> ServerResult<String> {
        let validator = self.token_validator()?.ok_or_else(|| {
            ServerError::InvalidRequest("authentication is not configured".into())
        })?;
        let token = validator.create_token(org_id, device_id)?;
        info!(org = org_id, device = device_id, "device token issued");
        Ok(token)
    }

    /// The validator for incoming tokens, if authentication is configured.
    pub fn token_validator(&self) -> ServerResult<Option<crate::auth::TokenValidator>> {
        if !self.config.require_auth {
            return Ok(None);
        }
        let secret = self.config.auth_secret.clone().ok_or_else(|| {
            ServerError::Internal("authentication enabled without a secret".into())
        })?;
        Ok(Some(crate::auth::TokenValidator::new(
            secret,
            self.config.token_expiry,
        )))
    }
}
