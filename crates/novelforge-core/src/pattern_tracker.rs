//! Pattern Tracker (§2): per-project, per-process, in-memory record of scene
//! patterns used to produce anti-repetition advice for the next chapter's
//! planning step. Purely advisory — losing it on restart changes nothing
//! about correctness, so it is never persisted to [`crate::storage::StorageBackend`]
//! (§9 Open Question, decided in favor of "leave purely advisory").

use dashmap::DashMap;
use std::collections::VecDeque;

/// Coarse fingerprint of one scene's shape, registered after scene planning
/// (§4.2 step 4) so later chapters can be steered away from repeating it.
#[derive(Debug, Clone)]
pub struct ScenePattern {
    pub chapter_number: i32,
    pub setting: String,
    pub plot_beat: String,
    pub emotional_beat: String,
    pub ending_hook: String,
}

/// How many chapters of pattern history to retain per project before the
/// oldest entries age out; keeps advice focused on recent repetition rather
/// than flagging a motif that last appeared 40 chapters ago.
const HISTORY_DEPTH: usize = 8;

#[derive(Default)]
struct ProjectHistory {
    patterns: VecDeque<ScenePattern>,
}

/// Tracks scene patterns across every project the process is generating.
/// Cheap to construct; intended to be held for the orchestrator's lifetime.
#[derive(Default)]
pub struct PatternTracker {
    projects: DashMap<String, ProjectHistory>,
}

impl PatternTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_chapter(&self, project_id: &str, pattern: ScenePattern) {
        let mut entry = self.projects.entry(project_id.to_string()).or_default();
        if entry.patterns.len() == HISTORY_DEPTH {
            entry.patterns.pop_front();
        }
        entry.patterns.push_back(pattern);
    }

    /// Produces short anti-repetition advice for the next chapter's Chapter
    /// Architect prompt: settings, plot beats, and ending hooks that have
    /// recurred and should be varied. Empty advice is valid (no history yet).
    pub fn advice_for_next_chapter(&self, project_id: &str) -> Vec<String> {
        let Some(entry) = self.projects.get(project_id) else {
            return Vec::new();
        };

        let mut advice = Vec::new();
        if let Some(repeated) = most_common(entry.patterns.iter().map(|p| p.setting.as_str())) {
            advice.push(format!(
                "The setting \"{repeated}\" has recurred recently; vary the location for this chapter."
            ));
        }
        if let Some(repeated) =
            most_common(entry.patterns.iter().map(|p| p.ending_hook.as_str()))
        {
            advice.push(format!(
                "Recent chapters have ended on a similar hook (\"{repeated}\"); choose a different kind of ending beat."
            ));
        }
        if let Some(repeated) =
            most_common(entry.patterns.iter().map(|p| p.emotional_beat.as_str()))
        {
            advice.push(format!(
                "The emotional beat \"{repeated}\" has been used repeatedly; shift the emotional register."
            ));
        }
        advice
    }

    pub fn clear_project(&self, project_id: &str) {
        self.projects.remove(project_id);
    }
}

/// Returns a value that appears 2+ times in the iterator, if any (the
/// threshold that actually constitutes "a pattern" rather than coincidence).
fn most_common<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: std::collections::HashMap<&str, u32> = std::collections::HashMap::new();
    for v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .max_by_key(|(_, count)| *count)
        .map(|(v, _)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(chapter: i32, setting: &str, hook: &str, beat: &str) -> ScenePattern {
        ScenePattern {
            chapter_number: chapter,
            setting: setting.to_string(),
            plot_beat: "beat".to_string(),
            emotional_beat: beat.to_string(),
            ending_hook: hook.to_string(),
        }
    }

    #[test]
    fn no_history_gives_no_advice() {
        let tracker = PatternTracker::new();
        assert!(tracker.advice_for_next_chapter("p1").is_empty());
    }

    #[test]
    fn repeated_setting_triggers_advice() {
        let tracker = PatternTracker::new();
        tracker.register_chapter("p1", pattern(1, "the tavern", "cliffhanger", "fear"));
        tracker.register_chapter("p1", pattern(2, "the tavern", "reveal", "hope"));
        let advice = tracker.advice_for_next_chapter("p1");
        assert!(advice.iter().any(|a| a.contains("the tavern")));
    }

    #[test]
    fn history_beyond_depth_ages_out() {
        let tracker = PatternTracker::new();
        for i in 0..HISTORY_DEPTH as i32 + 2 {
            tracker.register_chapter("p1", pattern(i, "unique_setting", "hook", "beat"));
        }
        tracker.register_chapter("p1", pattern(99, "the forge", "hook2", "beat2"));
        // only the most recent HISTORY_DEPTH entries remain, so the long-ago
        // "unique_setting" chapters shouldn't dominate the advice forever.
        let advice = tracker.advice_for_next_chapter("p1");
        assert!(!advice.is_empty());
    }

    #[test]
    fn projects_are_isolated() {
        let tracker = PatternTracker::new();
        tracker.register_chapter("p1", pattern(1, "castle", "hook", "beat"));
        tracker.register_chapter("p1", pattern(2, "castle", "hook", "beat"));
        assert!(tracker.advice_for_next_chapter("p2").is_empty());
    }
}
