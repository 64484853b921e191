//! Entity kinds, actions and resolutions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when an entity-kind string is not recognized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported entity type: {0}")]
pub struct ParseKindError(pub String);

/// A syncable entity type.
///
/// The set is fixed by the protocol. `Payment` is enumerated because payment
/// snapshots flow through the pull feed, but settled payments are immutable
/// through sync and have no write path. `Group` is enumerated ahead of its
/// adapter being implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Client records (borrowers).
    Clients,
    /// Loan records.
    Loans,
    /// Field-visit records.
    Visits,
    /// Collateral pledges.
    Pledges,
    /// Client assessments.
    Assessments,
    /// Repayment transactions (read-only through sync).
    Payments,
    /// Client groups (no adapter registered yet).
    Groups,
}

impl EntityKind {
    /// All kinds that accept writes through the push path.
    pub const WRITABLE: [EntityKind; 5] = [
        EntityKind::Clients,
        EntityKind::Loans,
        EntityKind::Visits,
        EntityKind::Pledges,
        EntityKind::Assessments,
    ];

    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Clients => "clients",
            EntityKind::Loans => "loans",
            EntityKind::Visits => "visits",
            EntityKind::Pledges => "pledges",
            EntityKind::Assessments => "assessments",
            EntityKind::Payments => "payments",
            EntityKind::Groups => "groups",
        }
    }

    /// Returns true if this kind accepts writes through sync.
    ///
    /// Payments are created through the authoritative repayment path only;
    /// a settled transaction must never be rewritten from a device queue.
    pub fn is_writable(&self) -> bool {
        !matches!(self, EntityKind::Payments)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clients" => Ok(EntityKind::Clients),
            "loans" => Ok(EntityKind::Loans),
            "visits" => Ok(EntityKind::Visits),
            "pledges" => Ok(EntityKind::Pledges),
            "assessments" => Ok(EntityKind::Assessments),
            "payments" => Ok(EntityKind::Payments),
            "groups" => Ok(EntityKind::Groups),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

/// The action a change request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncAction {
    /// Create a new entity.
    Create,
    /// Update an existing entity.
    Update,
    /// Soft-delete an entity (supported for clients only).
    Delete,
}

impl SyncAction {
    /// Returns the wire name of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "CREATE",
            SyncAction::Update => "UPDATE",
            SyncAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The chosen outcome of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    /// The device's queued data wins.
    ClientWins,
    /// The server's current data wins.
    ServerWins,
    /// A manually merged payload wins.
    Merged,
}

impl Resolution {
    /// Returns the wire name of this resolution.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::ClientWins => "CLIENT_WINS",
            Resolution::ServerWins => "SERVER_WINS",
            Resolution::Merged => "MERGED",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The key every ledger, queue and conflict lookup is scoped by.
///
/// The organization id is part of the key; entity ids from one organization
/// are never visible to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    /// Owning organization.
    pub org_id: String,
    /// Entity kind.
    pub kind: EntityKind,
    /// Entity id within (org, kind).
    pub entity_id: String,
}

impl EntityKey {
    /// Creates a new key.
    pub fn new(org_id: impl Into<String>, kind: EntityKind, entity_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            kind,
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.org_id, self.kind, self.entity_id)
    }
}
