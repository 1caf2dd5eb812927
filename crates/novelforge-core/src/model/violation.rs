//! Consistency violations raised by the QA audit pass and tracked through the
//! detect-and-fix cycle (§4.4, §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    DeathGating,
    AttributeDrift,
    Timeline,
    PlotThreadDangling,
    GarbledText,
    WordCount,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationStatus {
    Open,
    Resolved,
    Persistent,
    Ignored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyViolation {
    pub id: String,
    pub project_id: String,
    pub chapter_number: i32,
    pub violation_type: ViolationType,
    pub severity: ViolationSeverity,
    pub description: String,
    /// Stable djb2-style hash of the normalized issue text (§4.8), used to
    /// track the same issue across detect-and-fix cycles.
    pub issue_hash: String,
    pub status: ViolationStatus,
    #[serde(default)]
    pub cycles_seen: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
