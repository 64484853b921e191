//! The entity-adapter boundary.
//!
//! The sync core does not create, update or read business entities itself;
//! it dispatches to one adapter per entity kind, owned by the surrounding
//! CRUD layer. Adapters enforce their own invariants (required fields,
//! legal state transitions) and report failures as human-readable errors
//! the processors thread back to the caller per item.

use chrono::{DateTime, Utc};
use fieldsync_protocol::EntityKind;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Result type for adapter calls.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Failure reported by an entity adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// A CREATE payload is missing a required field.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// The payload is malformed or violates a business rule.
    #[error("invalid payload: {0}")]
    Invalid(String),

    /// The entity does not exist.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// The operation is not supported for this kind.
    #[error("{0}")]
    Unsupported(String),

    /// Anything else the business layer reports.
    #[error("{0}")]
    Other(String),
}

/// Request scope an adapter call runs under.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    /// Caller's organization; every lookup is scoped by it.
    pub org_id: String,
    /// Acting user, for attribution.
    pub user_id: String,
}

impl AdapterContext {
    /// Creates a context.
    pub fn new(org_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// One entity change reported by `changed_since`, feeding the pull feed.
#[derive(Debug, Clone)]
pub struct EntityChange {
    /// Entity id.
    pub entity_id: String,
    /// Current snapshot.
    pub data: Value,
    /// Last-modified timestamp.
    pub updated_at: DateTime<Utc>,
    /// True if the entity is soft-deleted.
    pub deleted: bool,
}

/// Per-entity-kind capabilities the sync core depends on but does not own.
///
/// `delete` defaults to unsupported; kinds that allow it through sync (soft
/// delete for clients) override it. Payments implement only the read side.
pub trait EntityAdapter: Send + Sync {
    /// Creates an entity from a payload.
    fn create(&self, ctx: &AdapterContext, entity_id: &str, payload: &Value) -> AdapterResult<()>;

    /// Updates an entity with a payload.
    fn update(&self, ctx: &AdapterContext, entity_id: &str, payload: &Value) -> AdapterResult<()>;

    /// Soft-deletes an entity, where the kind supports it.
    fn delete(&self, ctx: &AdapterContext, entity_id: &str) -> AdapterResult<()> {
        let _ = (ctx, entity_id);
        Err(AdapterError::Unsupported(
            "delete is not supported for this entity type".into(),
        ))
    }

    /// Returns the entity's current snapshot.
    fn fetch_snapshot(&self, ctx: &AdapterContext, entity_id: &str) -> AdapterResult<Value>;

    /// Entities modified strictly after `since`, ascending by modification
    /// time, at most `limit` of them.
    fn changed_since(
        &self,
        ctx: &AdapterContext,
        since: DateTime<Utc>,
        limit: usize,
    ) -> AdapterResult<Vec<EntityChange>>;
}

/// Maps entity kinds to their adapters.
///
/// Adding an entity kind to sync means registering an adapter here; the
/// processors never branch on the kind themselves. A kind without an
/// adapter (groups, until its CRUD side lands) is reported per item as
/// unregistered, not as a protocol error.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<EntityKind, Arc<dyn EntityAdapter>>,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter for a kind, replacing any previous one.
    pub fn register(&mut self, kind: EntityKind, adapter: Arc<dyn EntityAdapter>) -> &mut Self {
        self.adapters.insert(kind, adapter);
        self
    }

    /// Returns the adapter for a kind.
    pub fn get(&self, kind: EntityKind) -> Option<Arc<dyn EntityAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Kinds with a registered adapter, in no particular order.
    pub fn registered_kinds(&self) -> Vec<EntityKind> {
        self.adapters.keys().copied().collect()
    }
}

#[derive(Debug, Clone)]
struct StoredEntity {
    data: Map<String, Value>,
    updated_at: DateTime<Utc>,
    deleted: bool,
}

/// In-memory adapter for tests and examples.
///
/// Mimics the CRUD layer's contract: required fields on create, not-found
/// on updates of unknown ids, shallow field merge on update, soft delete
/// when enabled.
pub struct MemoryAdapter {
    entities: Mutex<HashMap<(String, String), StoredEntity>>,
    required_fields: Vec<&'static str>,
    supports_delete: bool,
    read_only: bool,
}

impl MemoryAdapter {
    /// Creates a writable adapter with no required fields.
    pub fn new() -> Self {
        Self {
            entities: Mutex::new(HashMap::new()),
            required_fields: Vec::new(),
            supports_delete: false,
            read_only: false,
        }
    }

    /// Requires these fields on every create payload.
    pub fn with_required_fields(mut self, fields: &[&'static str]) -> Self {
        self.required_fields = fields.to_vec();
        self
    }

    /// Enables soft delete.
    pub fn with_delete(mut self) -> Self {
        self.supports_delete = true;
        self
    }

    /// Makes the adapter read-only: only `fetch_snapshot` and
    /// `changed_since` work. This is the payment shape.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Seeds an entity directly, as the authoritative non-sync path would.
    pub fn seed(&self, org_id: &str, entity_id: &str, data: Value) {
        let fields = match data {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        self.entities.lock().insert(
            (org_id.to_string(), entity_id.to_string()),
            StoredEntity {
                data: fields,
                updated_at: Utc::now(),
                deleted: false,
            },
        );
    }

    /// Seeds an entity with an explicit modification time.
    pub fn seed_at(&self, org_id: &str, entity_id: &str, data: Value, at: DateTime<Utc>) {
        self.seed(org_id, entity_id, data);
        if let Some(entity) = self
            .entities
            .lock()
            .get_mut(&(org_id.to_string(), entity_id.to_string()))
        {
            entity.updated_at = at;
        }
    }

    /// Number of entities for an organization, soft-deleted ones included.
    pub fn count(&self, org_id: &str) -> usize {
        self.entities
            .lock()
            .keys()
            .filter(|(org, _)| org == org_id)
            .count()
    }

    fn as_fields(payload: &Value) -> AdapterResult<&Map<String, Value>> {
        payload
            .as_object()
            .ok_or_else(|| AdapterError::Invalid("payload must be a field map".into()))
    }

    fn guard_writable(&self) -> AdapterResult<()> {
        if self.read_only {
            Err(AdapterError::Unsupported(
                "this entity type is read-only".into(),
            ))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityAdapter for MemoryAdapter {
    fn create(&self, ctx: &AdapterContext, entity_id: &str, payload: &Value) -> AdapterResult<()> {
        self.guard_writable()?;
        let fields = Self::as_fields(payload)?;
        for required in &self.required_fields {
            if !fields.contains_key(*required) {
                return Err(AdapterError::MissingField((*required).to_string()));
            }
        }

        let key = (ctx.org_id.clone(), entity_id.to_string());
        let mut entities = self.entities.lock();
        if entities.contains_key(&key) {
            return Err(AdapterError::Invalid(format!(
                "entity already exists: {entity_id}"
            )));
        }
        entities.insert(
            key,
            StoredEntity {
                data: fields.clone(),
                updated_at: Utc::now(),
                deleted: false,
            },
        );
        Ok(())
    }

    fn update(&self, ctx: &AdapterContext, entity_id: &str, payload: &Value) -> AdapterResult<()> {
        self.guard_writable()?;
        let fields = Self::as_fields(payload)?;

        let key = (ctx.org_id.clone(), entity_id.to_string());
        let mut entities = self.entities.lock();
        let entity = entities
            .get_mut(&key)
            .ok_or_else(|| AdapterError::NotFound(entity_id.to_string()))?;
        for (field, value) in fields {
            entity.data.insert(field.clone(), value.clone());
        }
        entity.updated_at = Utc::now();
        Ok(())
    }

    fn delete(&self, ctx: &AdapterContext, entity_id: &str) -> AdapterResult<()> {
        self.guard_writable()?;
        if !self.supports_delete {
            return Err(AdapterError::Unsupported(
                "delete is not supported for this entity type".into(),
            ));
        }
        let key = (ctx.org_id.clone(), entity_id.to_string());
        let mut entities = self.entities.lock();
        let entity = entities
            .get_mut(&key)
            .ok_or_else(|| AdapterError::NotFound(entity_id.to_string()))?;
        entity.deleted = true;
        entity.updated_at = Utc::now();
        Ok(())
    }

    fn fetch_snapshot(&self, ctx: &AdapterContext, entity_id: &str) -> AdapterResult<Value> {
        let key = (ctx.org_id.clone(), entity_id.to_string());
        self.entities
            .lock()
            .get(&key)
            .map(|e| Value::Object(e.data.clone()))
            .ok_or_else(|| AdapterError::NotFound(entity_id.to_string()))
    }

    fn changed_since(
        &self,
        ctx: &AdapterContext,
        since: DateTime<Utc>,
        limit: usize,
    ) -> AdapterResult<Vec<EntityChange>> {
        let entities = self.entities.lock();
        let mut changes: Vec<EntityChange> = entities
            .iter()
            .filter(|((org, _), entity)| org == &ctx.org_id && entity.updated_at > since)
            .map(|((_, id), entity)| EntityChange {
                entity_id: id.clone(),
                data: Value::Object(entity.data.clone()),
                updated_at: entity.updated_at,
                deleted: entity.deleted,
            })
            .collect();
        changes.sort_by_key(|c| c.updated_at);
        changes.truncate(limit);
        Ok(changes)
    }
}
