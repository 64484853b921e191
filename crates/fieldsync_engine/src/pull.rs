//! The pull processor.

use crate::adapter::{AdapterContext, AdapterRegistry, EntityAdapter, EntityChange};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::timeout::run_bounded;
use chrono::{DateTime, Utc};
use fieldsync_protocol::{
    ChangeRecord, EntityKey, EntityKind, PullRequest, PullResponse, SyncAction,
};
use fieldsync_store::VersionLedger;
use std::sync::Arc;
use tracing::debug;

/// Serves the incremental change feed a device polls to catch up.
///
/// Read-only: pulls take no locks beyond snapshot reads and run freely in
/// parallel with pushes. A write landing mid-pull may surface in the next
/// page rather than this one; the checkpoint mechanism exists for exactly
/// that repeated catch-up polling.
pub struct PullProcessor {
    registry: Arc<AdapterRegistry>,
    ledger: Arc<dyn VersionLedger>,
    config: EngineConfig,
}

impl PullProcessor {
    /// Creates a pull processor over shared adapters and the ledger.
    pub fn new(
        registry: Arc<AdapterRegistry>,
        ledger: Arc<dyn VersionLedger>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            config,
        }
    }

    /// Serves one page of changes newer than the client's checkpoint.
    pub fn process(&self, org_id: &str, request: &PullRequest) -> EngineResult<PullResponse> {
        // The checkpoint handed back is "now" at call time, matching the
        // original service. Under sustained writes this can duplicate or
        // skip a boundary item on the next page; changing it to the
        // last-item timestamp is a pending product decision.
        let checkpoint = Utc::now();
        let since = request.since.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let limit = request
            .limit
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size);

        let kinds: Vec<EntityKind> = match &request.kinds {
            Some(kinds) => kinds.clone(),
            None => {
                let mut registered = self.registry.registered_kinds();
                registered.sort_by_key(|k| k.as_str());
                registered
            }
        };

        // Even sharing across kinds so a chatty kind cannot starve the
        // others within one page.
        let per_kind = (limit / kinds.len().max(1)).max(1);
        let ctx = AdapterContext::new(org_id, "pull");

        let mut merged: Vec<ChangeRecord> = Vec::new();
        for kind in kinds {
            // Kinds without an adapter (groups, until its CRUD side lands)
            // simply contribute nothing to the feed.
            let Some(adapter) = self.registry.get(kind) else {
                continue;
            };
            // An adapter failure poisons the whole page. Serving a short
            // page instead would hand the client a checkpoint past changes
            // it never received.
            let changes = self.changed_since_bounded(&adapter, kind, &ctx, since, per_kind)?;
            for change in changes {
                let key = EntityKey::new(org_id, kind, change.entity_id.clone());
                merged.push(ChangeRecord {
                    entity_type: kind,
                    entity_id: change.entity_id,
                    action: if change.deleted {
                        SyncAction::Delete
                    } else {
                        SyncAction::Update
                    },
                    data: change.data,
                    version: self.ledger.version(&key).unwrap_or(1),
                    updated_at: change.updated_at,
                });
            }
        }

        merged.sort_by_key(|c| c.updated_at);
        let fetched = merged.len();
        merged.truncate(limit);
        let has_more = fetched >= limit;

        debug!(
            org = org_id,
            since = %since,
            served = merged.len(),
            has_more,
            "pull page served"
        );
        Ok(PullResponse {
            changes: merged,
            last_sync: checkpoint,
            has_more,
        })
    }

    fn changed_since_bounded(
        &self,
        adapter: &Arc<dyn EntityAdapter>,
        kind: EntityKind,
        ctx: &AdapterContext,
        since: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<EntityChange>> {
        let adapter = Arc::clone(adapter);
        let ctx = ctx.clone();
        match run_bounded(self.config.item_timeout, move || {
            adapter.changed_since(&ctx, since, limit)
        }) {
            Some(Ok(changes)) => Ok(changes),
            Some(Err(err)) => Err(EngineError::Adapter(kind, err)),
            None => Err(EngineError::AdapterTimeout(self.config.item_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, MemoryAdapter};
    use chrono::Duration;
    use fieldsync_store::MemoryLedger;
    use serde_json::json;

    struct Harness {
        pull: PullProcessor,
        clients: Arc<MemoryAdapter>,
        loans: Arc<MemoryAdapter>,
        ledger: Arc<MemoryLedger>,
    }

    fn harness() -> Harness {
        let clients = Arc::new(MemoryAdapter::new());
        let loans = Arc::new(MemoryAdapter::new());
        let mut registry = AdapterRegistry::new();
        registry.register(EntityKind::Clients, clients.clone());
        registry.register(EntityKind::Loans, loans.clone());

        let ledger = Arc::new(MemoryLedger::new());
        let pull = PullProcessor::new(
            Arc::new(registry),
            ledger.clone(),
            EngineConfig::default(),
        );
        Harness {
            pull,
            clients,
            loans,
            ledger,
        }
    }

    #[test]
    fn default_pull_serves_everything_ascending() {
        let h = harness();
        let base = Utc::now() - Duration::minutes(30);
        h.clients
            .seed_at("org-1", "c1", json!({"n": 1}), base + Duration::minutes(3));
        h.loans
            .seed_at("org-1", "l1", json!({"n": 2}), base + Duration::minutes(1));
        h.loans
            .seed_at("org-1", "l2", json!({"n": 3}), base + Duration::minutes(5));

        let response = h
            .pull
            .process("org-1", &PullRequest::everything())
            .unwrap();

        let ids: Vec<_> = response
            .changes
            .iter()
            .map(|c| c.entity_id.as_str())
            .collect();
        assert_eq!(ids, ["l1", "c1", "l2"]);
        assert!(!response.has_more);
        assert!(response.last_sync <= Utc::now());
    }

    #[test]
    fn checkpoint_is_strictly_greater_than() {
        let h = harness();
        let base = Utc::now() - Duration::minutes(30);
        h.clients.seed_at("org-1", "c1", json!({}), base);
        h.clients
            .seed_at("org-1", "c2", json!({}), base + Duration::minutes(1));

        let request = PullRequest::everything().since(base);
        let response = h.pull.process("org-1", &request).unwrap();

        // c1 sits exactly at the checkpoint and is excluded.
        assert_eq!(response.changes.len(), 1);
        assert_eq!(response.changes[0].entity_id, "c2");
    }

    #[test]
    fn unversioned_entities_report_version_one() {
        let h = harness();
        h.clients.seed("org-1", "c1", json!({}));
        h.clients.seed("org-1", "c2", json!({}));
        h.ledger
            .bump(
                &EntityKey::new("org-1", EntityKind::Clients, "c2"),
                7,
                "u1",
            )
            .unwrap();

        let response = h
            .pull
            .process("org-1", &PullRequest::everything())
            .unwrap();
        let by_id = |id: &str| {
            response
                .changes
                .iter()
                .find(|c| c.entity_id == id)
                .unwrap()
                .version
        };
        assert_eq!(by_id("c1"), 1);
        assert_eq!(by_id("c2"), 7);
    }

    #[test]
    fn page_shares_evenly_across_kinds() {
        let h = harness();
        let base = Utc::now() - Duration::hours(1);
        for i in 0..10 {
            h.clients.seed_at(
                "org-1",
                &format!("c{i}"),
                json!({}),
                base + Duration::seconds(i),
            );
            h.loans.seed_at(
                "org-1",
                &format!("l{i}"),
                json!({}),
                base + Duration::seconds(100 + i),
            );
        }

        let request = PullRequest::everything()
            .kinds(vec![EntityKind::Clients, EntityKind::Loans])
            .limit(8);
        let response = h.pull.process("org-1", &request).unwrap();

        assert_eq!(response.changes.len(), 8);
        assert!(response.has_more);
        // Loans changed later, yet they cannot starve clients out of the page:
        // each kind contributes its even share of four.
        let client_count = response
            .changes
            .iter()
            .filter(|c| c.entity_type == EntityKind::Clients)
            .count();
        assert_eq!(client_count, 4);
    }

    #[test]
    fn kind_allow_list_restricts_the_feed() {
        let h = harness();
        h.clients.seed("org-1", "c1", json!({}));
        h.loans.seed("org-1", "l1", json!({}));

        let request = PullRequest::everything().kinds(vec![EntityKind::Loans]);
        let response = h.pull.process("org-1", &request).unwrap();
        assert_eq!(response.changes.len(), 1);
        assert_eq!(response.changes[0].entity_type, EntityKind::Loans);
    }

    #[test]
    fn pull_is_idempotent_without_intervening_writes() {
        let h = harness();
        let base = Utc::now() - Duration::minutes(30);
        for i in 0..5 {
            h.clients.seed_at(
                "org-1",
                &format!("c{i}"),
                json!({"i": i}),
                base + Duration::seconds(i),
            );
        }

        let request = PullRequest::everything().since(base - Duration::minutes(1));
        let first = h.pull.process("org-1", &request).unwrap();
        let second = h.pull.process("org-1", &request).unwrap();
        assert_eq!(first.changes, second.changes);
        assert_eq!(first.has_more, second.has_more);
    }

    #[test]
    fn requesting_an_unregistered_kind_is_empty_not_an_error() {
        let h = harness();
        let request = PullRequest::everything().kinds(vec![EntityKind::Groups]);
        let response = h.pull.process("org-1", &request).unwrap();
        assert!(response.changes.is_empty());
        assert!(!response.has_more);
    }

    #[test]
    fn soft_deleted_entities_surface_as_deletes() {
        let clients = Arc::new(MemoryAdapter::new().with_delete());
        let mut registry = AdapterRegistry::new();
        registry.register(EntityKind::Clients, clients.clone());
        let pull = PullProcessor::new(
            Arc::new(registry),
            Arc::new(MemoryLedger::new()),
            EngineConfig::default(),
        );

        clients.seed("org-1", "c1", json!({}));
        clients
            .delete(&AdapterContext::new("org-1", "u1"), "c1")
            .unwrap();

        let response = pull.process("org-1", &PullRequest::everything()).unwrap();
        assert_eq!(response.changes[0].action, SyncAction::Delete);
    }

    struct UnavailableAdapter;

    impl EntityAdapter for UnavailableAdapter {
        fn create(&self, _: &AdapterContext, _: &str, _: &serde_json::Value) -> crate::AdapterResult<()> {
            unreachable!()
        }
        fn update(&self, _: &AdapterContext, _: &str, _: &serde_json::Value) -> crate::AdapterResult<()> {
            unreachable!()
        }
        fn fetch_snapshot(
            &self,
            _: &AdapterContext,
            _: &str,
        ) -> crate::AdapterResult<serde_json::Value> {
            unreachable!()
        }
        fn changed_since(
            &self,
            _: &AdapterContext,
            _: DateTime<Utc>,
            _: usize,
        ) -> crate::AdapterResult<Vec<EntityChange>> {
            Err(AdapterError::Other("database unavailable".into()))
        }
    }

    #[test]
    fn adapter_failure_fails_the_whole_pull() {
        let clients = Arc::new(MemoryAdapter::new());
        clients.seed("org-1", "c1", json!({}));
        let mut registry = AdapterRegistry::new();
        registry.register(EntityKind::Clients, clients);
        registry.register(EntityKind::Loans, Arc::new(UnavailableAdapter));
        let pull = PullProcessor::new(
            Arc::new(registry),
            Arc::new(MemoryLedger::new()),
            EngineConfig::default(),
        );

        // No partial page, no advanced checkpoint: the caller must retry
        // with its old one.
        let err = pull
            .process("org-1", &PullRequest::everything())
            .unwrap_err();
        assert!(matches!(err, EngineError::Adapter(EntityKind::Loans, _)));
        assert!(err.to_string().contains("database unavailable"));
    }

    struct StalledAdapter;

    impl EntityAdapter for StalledAdapter {
        fn create(&self, _: &AdapterContext, _: &str, _: &serde_json::Value) -> crate::AdapterResult<()> {
            unreachable!()
        }
        fn update(&self, _: &AdapterContext, _: &str, _: &serde_json::Value) -> crate::AdapterResult<()> {
            unreachable!()
        }
        fn fetch_snapshot(
            &self,
            _: &AdapterContext,
            _: &str,
        ) -> crate::AdapterResult<serde_json::Value> {
            unreachable!()
        }
        fn changed_since(
            &self,
            _: &AdapterContext,
            _: DateTime<Utc>,
            _: usize,
        ) -> crate::AdapterResult<Vec<EntityChange>> {
            std::thread::sleep(std::time::Duration::from_secs(60));
            Ok(Vec::new())
        }
    }

    #[test]
    fn stalled_adapter_fails_the_pull() {
        let mut registry = AdapterRegistry::new();
        registry.register(EntityKind::Clients, Arc::new(StalledAdapter));
        let pull = PullProcessor::new(
            Arc::new(registry),
            Arc::new(MemoryLedger::new()),
            EngineConfig::default().with_item_timeout(std::time::Duration::from_millis(50)),
        );

        let err = pull
            .process("org-1", &PullRequest::everything())
            .unwrap_err();
        assert!(matches!(err, EngineError::AdapterTimeout(_)));
    }
}
