//! Progress callbacks (§6). The orchestrator reports progress through this
//! trait instead of returning a stream, the way the teacher's skills report
//! through a plain status-update trait rather than an event bus. Every method
//! has a default no-op so callers only implement what they care about.

use crate::agents::AgentRole;

/// Progress and lifecycle hooks a caller can implement to observe a run
/// without polling storage. All methods default to doing nothing.
pub trait Callbacks: Send + Sync {
    fn on_agent_status(&self, _role: AgentRole, _status: &str, _message: &str) {}

    fn on_scene_complete(&self, _chapter_number: i32, _scene_index: u32, _total_scenes: u32, _words: u32) {}

    fn on_chapter_complete(&self, _chapter_number: i32, _words: u32, _title: &str) {}

    fn on_project_complete(&self) {}

    fn on_error(&self, _message: &str) {}

    /// Fired when a structural checkpoint or detect-and-fix cycle is about to
    /// rewrite a batch of chapters, so a caller can surface "revising chapters
    /// 3, 7, 9" rather than only seeing chapters change silently.
    fn on_chapters_being_corrected(&self, _chapters: &[i32], _cycle: u32) {}

    /// Fired at each detect-and-fix phase transition (§4.4 steps).
    fn on_detect_and_fix_progress(&self, _phase: &str, _current: u32, _total: u32, _details: &str) {}

    /// Fired as the Final Reviewer works through manuscript tranches (§4.4 step 3).
    fn on_tranche_progress(&self, _current: usize, _total: usize, _label: &str) {}
}

/// A [`Callbacks`] implementation that does nothing, for callers that only
/// want final results and don't care about progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCallbacks;

impl Callbacks for NullCallbacks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_callbacks_are_inert() {
        let callbacks = NullCallbacks;
        callbacks.on_agent_status(AgentRole::Ghostwriter, "running", "writing chapter 1");
        callbacks.on_chapter_complete(1, 1600, "Opening");
        callbacks.on_project_complete();
    }
}
