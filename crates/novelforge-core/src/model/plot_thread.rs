//! Plot thread tracking (§3): open narrative threads the orchestrator checks
//! are resolved (or deliberately left dangling) before final review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotThreadStatus {
    Open,
    Resolved,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotThread {
    pub id: String,
    pub project_id: String,
    pub description: String,
    pub chapter_introduced: i32,
    #[serde(default)]
    pub chapter_resolved: Option<i32>,
    pub status: PlotThreadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
