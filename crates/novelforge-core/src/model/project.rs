//! Project record (§3). Grounded on the teacher's `CoreConfig`/`shared.rs` style:
//! plain serde structs, `HashMap` for sparse maps, `chrono::DateTime<Utc>` timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Project status lifecycle (§3): `draft -> generating -> (paused | error |
/// final_review_in_progress | completed | failed_final_review)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Generating,
    Paused,
    Error,
    FinalReviewInProgress,
    Completed,
    FailedFinalReview,
}

/// Structural/feature flags on a project (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectFlags {
    #[serde(default)]
    pub has_prologue: bool,
    #[serde(default)]
    pub has_epilogue: bool,
    #[serde(default)]
    pub has_author_note: bool,
    #[serde(default)]
    pub ku_optimized: bool,
}

/// Reserved key in `chapter_correction_counts` holding persistent-issue-hash -> cycle count (§4.8).
pub const PERSISTENT_ISSUES_KEY: &str = "_persistentIssues";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub premise: String,
    pub genre: String,
    #[serde(default)]
    pub tone: Option<String>,
    pub target_chapter_count: u32,
    pub min_words_per_chapter: u32,
    pub max_words_per_chapter: u32,
    #[serde(default)]
    pub flags: ProjectFlags,
    #[serde(default)]
    pub style_guide_ref: Option<String>,
    #[serde(default)]
    pub extended_guide_ref: Option<String>,
    #[serde(default)]
    pub series_ref: Option<String>,
    #[serde(default)]
    pub pseudonym_ref: Option<String>,
    pub status: ProjectStatus,
    /// Opaque per-project generation token; compared for supersession (§4.1).
    #[serde(default)]
    pub generation_token: Option<String>,
    #[serde(default)]
    pub revision_cycle: u32,
    #[serde(default)]
    pub consecutive_high_scores: u32,
    #[serde(default)]
    pub qa_audit_completed: bool,
    /// chapter_number (as string key) -> attempt count, plus the reserved
    /// `_persistentIssues` key mapping issue-hash -> persistence count (§4.8).
    #[serde(default)]
    pub chapter_correction_counts: HashMap<String, u32>,
    #[serde(default)]
    pub resolved_issue_hashes: HashSet<String>,
    #[serde(default)]
    pub cumulative_input_tokens: u64,
    #[serde(default)]
    pub cumulative_output_tokens: u64,
    #[serde(default)]
    pub cumulative_thinking_tokens: u64,
    #[serde(default)]
    pub final_score: Option<f64>,
    #[serde(default)]
    pub final_review_result: Option<serde_json::Value>,
    #[serde(default)]
    pub objective_evaluation: Option<serde_json::Value>,
    #[serde(default)]
    pub beta_reader_report: Option<serde_json::Value>,
    #[serde(default)]
    pub qa_audit_report: Option<serde_json::Value>,
    #[serde(default)]
    pub rewrite_guidance: Option<String>,
    /// "correction cancelled" flag checked by `should_stop_processing` (§4.1).
    #[serde(default)]
    pub correction_cancelled: bool,
    #[serde(default)]
    pub externally_cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Returns the attempt count for the given chapter (normalized DB form should be passed).
    pub fn correction_count_for(&self, chapter_number: i32) -> u32 {
        self.chapter_correction_counts
            .get(&chapter_number.to_string())
            .copied()
            .unwrap_or(0)
    }

    pub fn increment_correction_count(&mut self, chapter_number: i32) {
        *self
            .chapter_correction_counts
            .entry(chapter_number.to_string())
            .or_insert(0) += 1;
    }

    /// Persistent-issue counter access. Issue hashes live in the same map under a
    /// `_persistentIssues:<hash>` composite key so the reserved `_persistentIssues`
    /// namespace (§4.8) doesn't need a second storage column.
    pub fn persistent_issue_count(&self, issue_hash: &str) -> u32 {
        self.chapter_correction_counts
            .get(&persistent_issue_key(issue_hash))
            .copied()
            .unwrap_or(0)
    }

    pub fn increment_persistent_issue(&mut self, issue_hash: &str) -> u32 {
        let entry = self
            .chapter_correction_counts
            .entry(persistent_issue_key(issue_hash))
            .or_insert(0);
        *entry += 1;
        *entry
    }
}

fn persistent_issue_key(issue_hash: &str) -> String {
    format!("{PERSISTENT_ISSUES_KEY}:{issue_hash}")
}
