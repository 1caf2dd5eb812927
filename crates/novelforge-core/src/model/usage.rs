//! Token/cost usage records (§3, §2 ambient usage accounting). Cost values use
//! `rust_decimal` rather than `f64` so accumulation doesn't drift.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub thinking_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.thinking_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.thinking_tokens += other.thinking_tokens;
    }
}

/// One recorded agent call, used both for the usage rollup and for audit trails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiUsageEvent {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub chapter_number: Option<i32>,
    pub role: String,
    pub model: String,
    pub usage: TokenUsage,
    #[serde(default)]
    pub estimated_cost: Decimal,
    pub created_at: DateTime<Utc>,
}
