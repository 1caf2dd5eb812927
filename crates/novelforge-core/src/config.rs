//! Orchestrator configuration loaded from the environment.
//!
//! Grounded on the teacher's `SovereignConfig::from_env` (`pagi-core/src/config.rs`):
//! every field has a hardcoded default so the system runs with zero
//! configuration, and `dotenvy::dotenv()` is read once, before any
//! `env::var` calls, by the binary entry point (see `novelforge-cli`).

use serde::{Deserialize, Serialize};

fn default_min_word_count() -> u32 {
    1500
}

fn default_special_min_word_count() -> u32 {
    150
}

fn default_regular_min_word_count() -> u32 {
    500
}

fn default_max_corrections_per_chapter() -> u32 {
    4
}

fn default_max_cycles() -> u32 {
    15
}

fn default_checkpoint_interval() -> u32 {
    5
}

fn default_high_score_threshold() -> f64 {
    9.0
}

fn default_consecutive_high_scores_needed() -> u32 {
    2
}

fn default_persistent_issue_cycles() -> u32 {
    3
}

fn default_max_triple_audit_attempts() -> u32 {
    3
}

fn default_convergence_ratio() -> f64 {
    0.01
}

fn default_backoff_schedule_secs() -> Vec<u64> {
    vec![15, 30, 60, 90, 120]
}

/// Runtime configuration for the orchestrator. Every field maps to a `NOVELFORGE_*`
/// environment variable; unset or unparsable values fall back to the spec's
/// defaults (documented per-field below).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// NOVELFORGE_MIN_WORD_COUNT: default minimum words per regular chapter. Default 1500.
    #[serde(default = "default_min_word_count")]
    pub min_word_count: u32,
    /// Minimum words for prologue/epilogue/author-note chapters (§3): 150, fixed by spec.
    #[serde(default = "default_special_min_word_count")]
    pub special_chapter_min_word_count: u32,
    /// Minimum words a chapter needs to be eligible for `approved` status (§3): 500, fixed by spec.
    #[serde(default = "default_regular_min_word_count")]
    pub regular_chapter_approval_floor: u32,
    /// NOVELFORGE_MAX_CORRECTIONS_PER_CHAPTER: per-chapter correction cap (§4.4). Default 4.
    #[serde(default = "default_max_corrections_per_chapter")]
    pub max_corrections_per_chapter: u32,
    /// NOVELFORGE_MAX_CYCLES: default `max_cycles` for detect-and-fix (§4.4). Default 15.
    #[serde(default = "default_max_cycles")]
    pub default_max_cycles: u32,
    /// NOVELFORGE_CHECKPOINT_INTERVAL: structural checkpoint cadence in chapters (§4.3). Default 5.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,
    /// NOVELFORGE_HIGH_SCORE_THRESHOLD: score needed to count as "high" (§4.4 step 5). Default 9.0.
    #[serde(default = "default_high_score_threshold")]
    pub high_score_threshold: f64,
    /// Consecutive high-score cycles required to converge (§4.4 step 5). Default 2.
    #[serde(default = "default_consecutive_high_scores_needed")]
    pub consecutive_high_scores_needed: u32,
    /// Cycles an issue hash must persist unresolved before escalation (§4.4/§4.8). Default 3.
    #[serde(default = "default_persistent_issue_cycles")]
    pub persistent_issue_cycles: u32,
    /// Max triple cross-audit + correction attempts per chapter (§4.2 step 6). Default 3.
    #[serde(default = "default_max_triple_audit_attempts")]
    pub max_triple_audit_attempts: u32,
    /// Levenshtein-ratio convergence threshold for the triple-audit loop (§4.2 step 6). Default 0.01 (1%).
    #[serde(default = "default_convergence_ratio")]
    pub convergence_ratio: f64,
    /// NOVELFORGE_BACKOFF_SCHEDULE_SECS: comma-separated backoff schedule for rate-limited agent calls (§5).
    #[serde(default = "default_backoff_schedule_secs")]
    pub backoff_schedule_secs: Vec<u64>,
    /// NOVELFORGE_STORAGE_PATH: base directory for the Sled-backed demo storage backend.
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
}

fn default_storage_path() -> String {
    "./data/novelforge".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_word_count: default_min_word_count(),
            special_chapter_min_word_count: default_special_min_word_count(),
            regular_chapter_approval_floor: default_regular_min_word_count(),
            max_corrections_per_chapter: default_max_corrections_per_chapter(),
            default_max_cycles: default_max_cycles(),
            checkpoint_interval: default_checkpoint_interval(),
            high_score_threshold: default_high_score_threshold(),
            consecutive_high_scores_needed: default_consecutive_high_scores_needed(),
            persistent_issue_cycles: default_persistent_issue_cycles(),
            max_triple_audit_attempts: default_max_triple_audit_attempts(),
            convergence_ratio: default_convergence_ratio(),
            backoff_schedule_secs: default_backoff_schedule_secs(),
            storage_path: default_storage_path(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables, falling back to spec defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_word_count: env_u32("NOVELFORGE_MIN_WORD_COUNT", defaults.min_word_count),
            max_corrections_per_chapter: env_u32(
                "NOVELFORGE_MAX_CORRECTIONS_PER_CHAPTER",
                defaults.max_corrections_per_chapter,
            ),
            default_max_cycles: env_u32("NOVELFORGE_MAX_CYCLES", defaults.default_max_cycles),
            checkpoint_interval: env_u32(
                "NOVELFORGE_CHECKPOINT_INTERVAL",
                defaults.checkpoint_interval,
            ),
            high_score_threshold: env_f64(
                "NOVELFORGE_HIGH_SCORE_THRESHOLD",
                defaults.high_score_threshold,
            ),
            storage_path: std::env::var("NOVELFORGE_STORAGE_PATH")
                .unwrap_or(defaults.storage_path),
            backoff_schedule_secs: env_backoff_schedule(defaults.backoff_schedule_secs.clone()),
            ..defaults
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_backoff_schedule(default: Vec<u64>) -> Vec<u64> {
    std::env::var("NOVELFORGE_BACKOFF_SCHEDULE_SECS")
        .ok()
        .map(|s| {
            s.split(',')
                .filter_map(|p| p.trim().parse::<u64>().ok())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}
