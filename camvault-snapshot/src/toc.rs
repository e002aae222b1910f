//! The `.toc` completion-marker record.
//!
//! The marker's presence is what makes a snapshot valid; its body is an
//! extensible JSON record kept for operators and the status command. A
//! snapshot with an unreadable body is still a valid snapshot.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Body of a snapshot's `.toc` marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocRecord {
    /// Snapshot ID, matching the directory name.
    pub id: u64,

    /// Creation time, Unix seconds.
    pub created_at: u64,

    /// Creation time rendered for humans.
    pub created_at_rfc3339: String,

    /// Size of the source cam disk at snapshot time, bytes.
    pub source_size: u64,
}

impl TocRecord {
    /// Build a record for a snapshot created now.
    pub fn new(id: u64, created_at: u64, source_size: u64) -> Self {
        Self {
            id,
            created_at,
            created_at_rfc3339: format_rfc3339(created_at),
            source_size,
        }
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("TocRecord serialization cannot fail")
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Render Unix seconds as RFC 3339, falling back to the raw number for
/// out-of-range values.
pub fn format_rfc3339(unix_sec: u64) -> String {
    Utc.timestamp_opt(unix_sec as i64, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| unix_sec.to_string())
}
