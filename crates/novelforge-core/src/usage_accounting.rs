//! Usage rollup (§2 [SUPPLEMENT]): aggregates [`AiUsageEvent`] rows into a
//! per-project total, using `rust_decimal` for cost so repeated addition
//! never drifts the way `f64` summation would over a long generation run.

use crate::model::{AiUsageEvent, TokenUsage};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Default)]
pub struct UsageTotals {
    pub tokens: TokenUsage,
    pub estimated_cost: Decimal,
    pub event_count: u64,
}

/// Accumulates usage events for a project. Constructed fresh per read rather
/// than kept as mutable shared state, since usage events are append-only.
pub struct UsageAccount<'a> {
    events: &'a [AiUsageEvent],
}

impl<'a> UsageAccount<'a> {
    pub fn new(events: &'a [AiUsageEvent]) -> Self {
        Self { events }
    }

    pub fn totals(&self) -> UsageTotals {
        let mut totals = UsageTotals::default();
        for event in self.events {
            totals.tokens.add(&event.usage);
            totals.estimated_cost += event.estimated_cost;
            totals.event_count += 1;
        }
        totals
    }

    pub fn totals_for_chapter(&self, chapter_number: i32) -> UsageTotals {
        let norm = crate::normalize::normalize_chapter(chapter_number);
        let mut totals = UsageTotals::default();
        for event in self.events {
            if event
                .chapter_number
                .map(crate::normalize::normalize_chapter)
                != Some(norm)
            {
                continue;
            }
            totals.tokens.add(&event.usage);
            totals.estimated_cost += event.estimated_cost;
            totals.event_count += 1;
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn event(chapter: Option<i32>, input: u64, cost: Decimal) -> AiUsageEvent {
        AiUsageEvent {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: "p1".into(),
            chapter_number: chapter,
            role: "ghostwriter".into(),
            model: "test-model".into(),
            usage: TokenUsage {
                input_tokens: input,
                output_tokens: 0,
                thinking_tokens: 0,
            },
            estimated_cost: cost,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn totals_sum_across_events() {
        let events = vec![
            event(Some(1), 100, dec!(0.01)),
            event(Some(2), 200, dec!(0.02)),
        ];
        let totals = UsageAccount::new(&events).totals();
        assert_eq!(totals.tokens.input_tokens, 300);
        assert_eq!(totals.estimated_cost, dec!(0.03));
        assert_eq!(totals.event_count, 2);
    }

    #[test]
    fn per_chapter_totals_normalize_aliases() {
        let events = vec![event(Some(998), 50, dec!(0.5))];
        let totals = UsageAccount::new(&events).totals_for_chapter(-1);
        assert_eq!(totals.tokens.input_tokens, 50);
    }
}
