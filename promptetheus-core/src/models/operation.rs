use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::method::HttpMethod;

/// What a queued mutation does on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    Forge,
    Execute,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
            OperationKind::Forge => write!(f, "forge"),
            OperationKind::Execute => write!(f, "execute"),
        }
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            "forge" => Ok(OperationKind::Forge),
            "execute" => Ok(OperationKind::Execute),
            _ => Err(format!(
                "Unknown operation kind '{}'. Valid options: create, update, delete, forge, execute",
                s
            )),
        }
    }
}

/// A queued mutation awaiting replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: i64,
    pub kind: OperationKind,
    pub endpoint: String,
    pub method: HttpMethod,
    pub payload: Option<Value>,
    /// Draft this operation confirms, if any.
    pub draft_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An operation that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub kind: OperationKind,
    pub endpoint: String,
    pub method: HttpMethod,
    pub payload: Option<Value>,
    pub draft_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewOperation {
    pub fn new(kind: OperationKind, method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
            method,
            payload: None,
            draft_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_draft(mut self, draft_id: impl Into<String>) -> Self {
        self.draft_id = Some(draft_id.into());
        self
    }

    /// Overrides the creation timestamp, e.g. when importing an existing queue.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// A stored record whose kind or method could not be recognized.
///
/// These are never replayed and never removed automatically.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MalformedOperation {
    pub id: i64,
    pub kind: String,
    pub endpoint: String,
    pub method: String,
    pub created_at: DateTime<Utc>,
    pub reason: String,
}

/// One row of the queue, in creation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum QueueEntry {
    Ready(PendingOperation),
    Malformed(MalformedOperation),
}

impl QueueEntry {
    pub fn id(&self) -> i64 {
        match self {
            QueueEntry::Ready(op) => op.id,
            QueueEntry::Malformed(op) => op.id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            QueueEntry::Ready(op) => op.created_at,
            QueueEntry::Malformed(op) => op.created_at,
        }
    }
}

impl fmt::Display for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueEntry::Ready(op) => write!(
                f,
                "#{} {} {} {} ({})",
                op.id,
                op.kind,
                op.method,
                op.endpoint,
                op.created_at.to_rfc3339()
            ),
            QueueEntry::Malformed(op) => write!(
                f,
                "#{} [malformed] {} {} {} - {}",
                op.id, op.kind, op.method, op.endpoint, op.reason
            ),
        }
    }
}
