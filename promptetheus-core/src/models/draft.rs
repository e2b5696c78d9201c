use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Conflict,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Conflict => write!(f, "conflict"),
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "conflict" => Ok(SyncStatus::Conflict),
            _ => Err(format!(
                "Invalid sync status '{}'. Valid options: pending, synced, conflict",
                s
            )),
        }
    }
}

/// A locally cached, editable snapshot of a remote-owned document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftDocument {
    pub id: String,
    /// Owning collection, e.g. the project an intent belongs to.
    pub parent_id: String,
    pub body: Value,
    pub sync_status: SyncStatus,
    pub updated_at: DateTime<Utc>,
}

impl DraftDocument {
    pub fn new(id: impl Into<String>, parent_id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.into(),
            body,
            sync_status: SyncStatus::Pending,
            updated_at: Utc::now(),
        }
    }
}

impl fmt::Display for DraftDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Draft: {}", self.id)?;
        writeln!(f, "{}", "=".repeat(30))?;
        writeln!(f, "Parent:  {}", self.parent_id)?;
        writeln!(f, "Status:  {}", self.sync_status)?;
        writeln!(f, "Updated: {}", self.updated_at.to_rfc3339())?;
        let body = serde_json::to_string_pretty(&self.body).map_err(|_| fmt::Error)?;
        write!(f, "\n{}", body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_draft_is_pending() {
        let draft = DraftDocument::new("intent-1", "project-1", json!({"name": "Summarize"}));
        assert_eq!(draft.sync_status, SyncStatus::Pending);
        assert_eq!(draft.parent_id, "project-1");
    }

    #[test]
    fn test_sync_status_from_str() {
        assert_eq!(SyncStatus::from_str("SYNCED").unwrap(), SyncStatus::Synced);
        assert_eq!(SyncStatus::from_str("conflict").unwrap(), SyncStatus::Conflict);
        assert!(SyncStatus::from_str("stale").is_err());
    }

    #[test]
    fn test_draft_display_includes_body() {
        let draft = DraftDocument::new("intent-1", "project-1", json!({"name": "Summarize"}));
        let text = draft.to_string();
        assert!(text.contains("Draft: intent-1"));
        assert!(text.contains("Summarize"));
        assert!(text.contains("pending"));
    }
}
