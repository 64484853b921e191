//! The push processor.

use crate::adapter::{AdapterContext, AdapterRegistry, EntityAdapter};
use crate::config::EngineConfig;
use crate::timeout::run_bounded;
use chrono::Utc;
use fieldsync_protocol::{
    ChangeRequest, ConflictNotice, EntityKey, EntityKind, FailedItem, PushResponse, SyncAction,
};
use fieldsync_store::{ConflictStore, QueueEntry, StoreError, SyncConflict, SyncQueue, VersionLedger};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Applies a batch of device-originated changes under per-entity optimistic
/// concurrency.
///
/// Items are processed in batch order but independently: a rejected,
/// conflicting or timed-out item never aborts its neighbours. A per-key
/// lock serializes the version check, the adapter write and the bump, so
/// a writer that loses the race loses before its payload lands; the
/// ledger's conditional bump backstops writers going through a different
/// processor instance.
pub struct PushProcessor {
    registry: Arc<AdapterRegistry>,
    ledger: Arc<dyn VersionLedger>,
    queue: Arc<dyn SyncQueue>,
    conflicts: Arc<dyn ConflictStore>,
    config: EngineConfig,
    locks: Mutex<HashMap<EntityKey, Arc<Mutex<()>>>>,
}

impl PushProcessor {
    /// Creates a push processor over shared stores and adapters.
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
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn key_lock(&self, key: &EntityKey) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(key.clone()).or_default())
    }

    /// Processes one batch for an (organization, user) pair.
    pub fn process(&self, org_id: &str, user_id: &str, changes: &[ChangeRequest]) -> PushResponse {
        let mut response = PushResponse::default();

        for change in changes {
            self.process_item(org_id, user_id, change, &mut response);
        }

        info!(
            org = org_id,
            synced = response.synced.len(),
            failed = response.failed.len(),
            conflicts = response.conflicts.len(),
            "push batch processed"
        );
        response
    }

    fn process_item(
        &self,
        org_id: &str,
        user_id: &str,
        change: &ChangeRequest,
        response: &mut PushResponse,
    ) {
        // Unknown kinds and payment writes are terminal rejections; they
        // leave no queue or ledger trace.
        let kind: EntityKind = match change.entity_type.parse() {
            Ok(kind) => kind,
            Err(err) => {
                response
                    .failed
                    .push(FailedItem::new(&change.entity_id, err.to_string()));
                return;
            }
        };
        if !kind.is_writable() {
            response.failed.push(FailedItem::new(
                &change.entity_id,
                "payments cannot be modified via offline sync",
            ));
            return;
        }
        let Some(adapter) = self.registry.get(kind) else {
            response.failed.push(FailedItem::new(
                &change.entity_id,
                format!("no adapter registered for entity type: {kind}"),
            ));
            return;
        };

        let key = EntityKey::new(org_id, kind, change.entity_id.clone());
        let entry = QueueEntry::pending(
            org_id,
            user_id,
            change.device_id.clone(),
            kind,
            change.entity_id.clone(),
            change.action,
            change.payload.clone(),
            change.client_version,
        );
        let entry_id = match self.queue.append(entry) {
            Ok(id) => id,
            Err(err) => {
                response
                    .failed
                    .push(FailedItem::new(&change.entity_id, err.to_string()));
                return;
            }
        };

        // From here to the bump the key is ours alone; a concurrent writer
        // for the same entity waits and then fails the version check
        // before its payload touches the adapter.
        let key_lock = self.key_lock(&key);
        let _guard = key_lock.lock();

        let ctx = AdapterContext::new(org_id, user_id);
        let server_version = self.ledger.version(&key);

        // Conflict detection requires the client to state the version it
        // wrote against; a versionless push always applies (trust boundary).
        if let (Some(server), Some(client)) = (server_version, change.client_version) {
            if server > client {
                self.raise_conflict(
                    &adapter, &ctx, &key, entry_id, change, client, server, response,
                );
                return;
            }
        }

        let outcome = {
            let adapter = Arc::clone(&adapter);
            let ctx = ctx.clone();
            let entity_id = change.entity_id.clone();
            let payload = change.payload.clone();
            let action = change.action;
            run_bounded(self.config.item_timeout, move || match action {
                SyncAction::Create => adapter.create(&ctx, &entity_id, &payload),
                SyncAction::Update => adapter.update(&ctx, &entity_id, &payload),
                SyncAction::Delete => adapter.delete(&ctx, &entity_id),
            })
        };

        let apply_error = match outcome {
            Some(Ok(())) => None,
            Some(Err(err)) => Some(err.to_string()),
            None => Some(format!(
                "adapter call timed out after {:?}",
                self.config.item_timeout
            )),
        };
        if let Some(reason) = apply_error {
            self.fail_entry(entry_id, &change.entity_id, &reason, response);
            return;
        }

        // Spec'd version arithmetic: the client's claimed base, else the
        // version read, else an unseeded zero - plus one.
        let new_version = change.client_version.or(server_version).unwrap_or(0) + 1;
        match self
            .ledger
            .bump_if(&key, server_version, new_version, user_id)
        {
            Ok(()) => {
                if let Err(err) = self.queue.mark_synced(entry_id, Utc::now()) {
                    warn!(entry = %entry_id, error = %err, "queue entry not marked synced");
                }
                debug!(key = %key, version = new_version, "change applied");
                response.synced.push(change.entity_id.clone());
            }
            Err(StoreError::VersionCheckFailed { stored, .. }) => {
                // Another writer landed between our read and our bump.
                warn!(key = %key, "conditional bump lost a race, raising conflict");
                let client = change.client_version.or(server_version).unwrap_or(0);
                let server = stored.unwrap_or(0);
                self.raise_conflict(
                    &adapter, &ctx, &key, entry_id, change, client, server, response,
                );
            }
            Err(err) => {
                self.fail_entry(entry_id, &change.entity_id, &err.to_string(), response);
            }
        }
    }

    /// Persists a conflict with both snapshots and flags the queue entry.
    #[allow(clippy::too_many_arguments)]
    fn raise_conflict(
        &self,
        adapter: &Arc<dyn EntityAdapter>,
        ctx: &AdapterContext,
        key: &EntityKey,
        entry_id: uuid::Uuid,
        change: &ChangeRequest,
        client_version: u64,
        server_version: u64,
        response: &mut PushResponse,
    ) {
        let server_data = match self.fetch_snapshot_bounded(adapter, ctx, &change.entity_id) {
            Ok(data) => data,
            Err(reason) => {
                self.fail_entry(entry_id, &change.entity_id, &reason, response);
                return;
            }
        };

        let conflict = SyncConflict::detected(
            key.org_id.clone(),
            entry_id,
            key.kind,
            key.entity_id.clone(),
            client_version,
            server_version,
            change.payload.clone(),
            server_data.clone(),
        );
        let notice = ConflictNotice {
            conflict_id: conflict.id,
            entity_type: key.kind,
            entity_id: key.entity_id.clone(),
            client_version,
            server_version,
            client_data: change.payload.clone(),
            server_data,
        };

        if let Err(err) = self.conflicts.insert(conflict) {
            self.fail_entry(entry_id, &change.entity_id, &err.to_string(), response);
            return;
        }
        if let Err(err) = self.queue.mark_conflict(entry_id) {
            warn!(entry = %entry_id, error = %err, "queue entry not marked conflict");
        }
        warn!(key = %key, client_version, server_version, "version conflict raised");
        response.conflicts.push(notice);
    }

    fn fetch_snapshot_bounded(
        &self,
        adapter: &Arc<dyn EntityAdapter>,
        ctx: &AdapterContext,
        entity_id: &str,
    ) -> Result<Value, String> {
        let adapter = Arc::clone(adapter);
        let ctx = ctx.clone();
        let entity_id = entity_id.to_string();
        match run_bounded(self.config.item_timeout, move || {
            adapter.fetch_snapshot(&ctx, &entity_id)
        }) {
            Some(Ok(data)) => Ok(data),
            Some(Err(err)) => Err(err.to_string()),
            None => Err(format!(
                "adapter call timed out after {:?}",
                self.config.item_timeout
            )),
        }
    }

    fn fail_entry(
        &self,
        entry_id: uuid::Uuid,
        entity_id: &str,
        reason: &str,
        response: &mut PushResponse,
    ) {
        if let Err(err) = self.queue.mark_failed(entry_id, reason) {
            warn!(entry = %entry_id, error = %err, "queue entry not marked failed");
        }
        debug!(entity = entity_id, reason, "change rejected");
        response.failed.push(FailedItem::new(entity_id, reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use fieldsync_store::{MemoryConflicts, MemoryLedger, MemoryQueue, QueueStatus};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        push: PushProcessor,
        clients: Arc<MemoryAdapter>,
        ledger: Arc<MemoryLedger>,
        queue: Arc<MemoryQueue>,
        conflicts: Arc<MemoryConflicts>,
    }

    fn harness() -> Harness {
        let clients = Arc::new(MemoryAdapter::new().with_delete());
        let mut registry = AdapterRegistry::new();
        registry.register(EntityKind::Clients, clients.clone());
        registry.register(EntityKind::Loans, Arc::new(MemoryAdapter::new()));
        registry.register(EntityKind::Payments, Arc::new(MemoryAdapter::new().read_only()));

        let ledger = Arc::new(MemoryLedger::new());
        let queue = Arc::new(MemoryQueue::new());
        let conflicts = Arc::new(MemoryConflicts::new());
        let push = PushProcessor::new(
            Arc::new(registry),
            ledger.clone(),
            queue.clone(),
            conflicts.clone(),
            EngineConfig::default(),
        );
        Harness {
            push,
            clients,
            ledger,
            queue,
            conflicts,
        }
    }

    fn create(entity_id: &str) -> ChangeRequest {
        ChangeRequest::new(
            "clients",
            entity_id,
            SyncAction::Create,
            json!({"clientNumber": "CL-1", "phone": "+263771111111"}),
        )
    }

    #[test]
    fn first_create_lands_at_version_one() {
        let h = harness();
        let response = h.push.process("org-1", "u1", &[create("c1")]);

        assert_eq!(response.synced, vec!["c1".to_string()]);
        assert!(response.failed.is_empty());
        assert!(response.conflicts.is_empty());

        let key = EntityKey::new("org-1", EntityKind::Clients, "c1");
        assert_eq!(h.ledger.version(&key), Some(1));
        let entry = &h.queue.entries_for(&key)[0];
        assert_eq!(entry.status, QueueStatus::Synced);
        assert!(entry.processed_at.is_some());
    }

    #[test]
    fn stale_client_version_raises_conflict() {
        let h = harness();
        h.push.process("org-1", "u1", &[create("c1")]);
        // Web backend edits the same client; version advances to 2.
        let key = EntityKey::new("org-1", EntityKind::Clients, "c1");
        h.clients
            .update(&AdapterContext::new("org-1", "web"), "c1", &json!({"phone": "x"}))
            .unwrap();
        h.ledger.bump(&key, 2, "web").unwrap();

        let stale = ChangeRequest::new(
            "clients",
            "c1",
            SyncAction::Update,
            json!({"phone": "+263772222222"}),
        )
        .with_client_version(1);
        let response = h.push.process("org-1", "u1", &[stale]);

        assert!(response.synced.is_empty());
        assert_eq!(response.conflicts.len(), 1);
        let notice = &response.conflicts[0];
        assert_eq!(notice.client_version, 1);
        assert_eq!(notice.server_version, 2);
        assert_eq!(notice.server_data["phone"], json!("x"));

        // The client payload was not applied and the version did not move.
        assert_eq!(h.ledger.version(&key), Some(2));
        assert_eq!(h.conflicts.unresolved("org-1").len(), 1);
        assert_eq!(h.queue.entries_for(&key)[1].status, QueueStatus::Conflict);
    }

    #[test]
    fn versionless_push_bypasses_detection() {
        let h = harness();
        h.push.process("org-1", "u1", &[create("c1")]);
        let key = EntityKey::new("org-1", EntityKind::Clients, "c1");
        h.ledger.bump(&key, 4, "web").unwrap();

        let versionless =
            ChangeRequest::new("clients", "c1", SyncAction::Update, json!({"phone": "y"}));
        let response = h.push.process("org-1", "u1", &[versionless]);

        assert_eq!(response.synced, vec!["c1".to_string()]);
        assert_eq!(h.ledger.version(&key), Some(5));
    }

    #[test]
    fn one_bad_item_does_not_abort_the_batch() {
        let h = harness();
        let mut changes: Vec<ChangeRequest> = (0..9).map(|i| create(&format!("c{i}"))).collect();
        changes.insert(
            4,
            ChangeRequest::new("invoices", "x1", SyncAction::Create, json!({})),
        );

        let response = h.push.process("org-1", "u1", &changes);
        assert_eq!(response.synced.len(), 9);
        assert_eq!(response.failed.len(), 1);
        assert_eq!(response.failed[0].id, "x1");
        assert!(response.failed[0].error.contains("unsupported entity type"));
    }

    #[test]
    fn payment_writes_are_terminal_and_traceless() {
        let h = harness();
        for action in [SyncAction::Create, SyncAction::Update, SyncAction::Delete] {
            let change = ChangeRequest::new("payments", "p1", action, json!({"amount": 50}));
            let response = h.push.process("org-1", "u1", &[change]);

            assert_eq!(response.failed.len(), 1);
            assert!(response.failed[0]
                .error
                .contains("payments cannot be modified via offline sync"));
        }
        // No queue entry, no ledger row, no conflict was written.
        assert!(h.queue.is_empty());
        assert!(h.ledger.is_empty());
        assert!(h.conflicts.is_empty());
    }

    #[test]
    fn unregistered_kind_fails_per_item() {
        let h = harness();
        let change = ChangeRequest::new("groups", "g1", SyncAction::Create, json!({}));
        let response = h.push.process("org-1", "u1", &[change]);

        assert_eq!(response.failed.len(), 1);
        assert!(response.failed[0].error.contains("no adapter registered"));
        assert!(h.queue.is_empty());
    }

    #[test]
    fn adapter_rejection_marks_entry_failed() {
        let h = harness();
        // Update of an entity that does not exist.
        let change = ChangeRequest::new("clients", "ghost", SyncAction::Update, json!({"a": 1}));
        let response = h.push.process("org-1", "u1", &[change]);

        assert_eq!(response.failed.len(), 1);
        assert!(response.failed[0].error.contains("not found"));

        let key = EntityKey::new("org-1", EntityKind::Clients, "ghost");
        assert_eq!(h.queue.entries_for(&key)[0].status, QueueStatus::Failed);
        assert_eq!(h.ledger.version(&key), None);
    }

    #[test]
    fn delete_is_soft_and_client_only() {
        let h = harness();
        h.push.process("org-1", "u1", &[create("c1")]);
        let del = ChangeRequest::new("clients", "c1", SyncAction::Delete, json!({}))
            .with_client_version(1);
        let response = h.push.process("org-1", "u1", &[del]);
        assert_eq!(response.synced, vec!["c1".to_string()]);

        // Loans do not support delete through sync.
        let loan = ChangeRequest::new("loans", "l1", SyncAction::Create, json!({"amount": 100}));
        h.push.process("org-1", "u1", &[loan]);
        let del = ChangeRequest::new("loans", "l1", SyncAction::Delete, json!({}));
        let response = h.push.process("org-1", "u1", &[del]);
        assert_eq!(response.failed.len(), 1);
        assert!(response.failed[0].error.contains("not supported"));
    }

    #[test]
    fn losing_writer_never_lands_its_payload() {
        let h = harness();
        h.push.process("org-1", "u1", &[create("c1")]);

        // Two devices race an update against version 1. One must win the
        // version check; the other must conflict without its payload ever
        // reaching the adapter.
        let barrier = std::sync::Barrier::new(2);
        let results: Vec<(&str, PushResponse)> = std::thread::scope(|s| {
            let handles: Vec<_> = ["left", "right"]
                .into_iter()
                .map(|tag| {
                    let barrier = &barrier;
                    let push = &h.push;
                    s.spawn(move || {
                        barrier.wait();
                        let change = ChangeRequest::new(
                            "clients",
                            "c1",
                            SyncAction::Update,
                            json!({"phone": tag}),
                        )
                        .with_client_version(1);
                        (tag, push.process("org-1", "u1", &[change]))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let (winner_tag, _) = results.iter().find(|(_, r)| !r.synced.is_empty()).unwrap();
        let (_, loser) = results.iter().find(|(_, r)| !r.conflicts.is_empty()).unwrap();

        // The entity holds the winner's payload, and the loser's conflict
        // shows the winner's data as the server side, not its own.
        let snapshot = h
            .clients
            .fetch_snapshot(&AdapterContext::new("org-1", "u1"), "c1")
            .unwrap();
        assert_eq!(snapshot["phone"], json!(*winner_tag));
        assert_eq!(loser.conflicts[0].server_data["phone"], json!(*winner_tag));

        let key = EntityKey::new("org-1", EntityKind::Clients, "c1");
        assert_eq!(h.ledger.version(&key), Some(2));
        assert_eq!(h.conflicts.unresolved("org-1").len(), 1);
    }

    struct StalledAdapter;

    impl EntityAdapter for StalledAdapter {
        fn create(&self, _: &AdapterContext, _: &str, _: &Value) -> crate::AdapterResult<()> {
            std::thread::sleep(Duration::from_secs(60));
            Ok(())
        }
        fn update(&self, _: &AdapterContext, _: &str, _: &Value) -> crate::AdapterResult<()> {
            unreachable!()
        }
        fn fetch_snapshot(&self, _: &AdapterContext, _: &str) -> crate::AdapterResult<Value> {
            unreachable!()
        }
        fn changed_since(
            &self,
            _: &AdapterContext,
            _: chrono::DateTime<Utc>,
            _: usize,
        ) -> crate::AdapterResult<Vec<crate::EntityChange>> {
            unreachable!()
        }
    }

    #[test]
    fn stalled_adapter_times_out_per_item() {
        let mut registry = AdapterRegistry::new();
        registry.register(EntityKind::Visits, Arc::new(StalledAdapter));
        registry.register(EntityKind::Clients, Arc::new(MemoryAdapter::new()));

        let push = PushProcessor::new(
            Arc::new(registry),
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryQueue::new()),
            Arc::new(MemoryConflicts::new()),
            EngineConfig::default().with_item_timeout(Duration::from_millis(50)),
        );

        let changes = vec![
            ChangeRequest::new("visits", "v1", SyncAction::Create, json!({})),
            create("c1"),
        ];
        let response = push.process("org-1", "u1", &changes);

        // The stalled item fails alone; the batch keeps moving.
        assert_eq!(response.failed.len(), 1);
        assert!(response.failed[0].error.contains("timed out"));
        assert_eq!(response.synced, vec!["c1".to_string()]);
    }
}
