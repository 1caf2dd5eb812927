//! Chapter record and scene plan (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chapter lifecycle status (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    Planned,
    Drafted,
    UnderReview,
    Approved,
    Failed,
}

/// One scene in a chapter's structural plan, produced by the Chapter Architect
/// role and consumed by the Ghostwriter role (§4.2 steps 1-2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenePlan {
    pub index: u32,
    pub summary: String,
    #[serde(default)]
    pub pov_character: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub target_word_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub project_id: String,
    /// Chapter number in its raw (possibly aliased) form as received; always
    /// normalize via [`crate::normalize::normalize_chapter`] before comparing.
    pub number: i32,
    pub title: String,
    #[serde(default)]
    pub scene_plan: Vec<ScenePlan>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub status: ChapterStatus,
    #[serde(default)]
    pub word_count: u32,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub generation_token: Option<String>,
    #[serde(default)]
    pub correction_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chapter {
    pub fn word_count_of(text: &str) -> u32 {
        text.split_whitespace().count() as u32
    }
}
