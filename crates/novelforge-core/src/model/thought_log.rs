//! Agent "thought" trace record (§3), used for debugging/observability of the
//! detect-and-fix loop, not for control flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtLog {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub chapter_number: Option<i32>,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
