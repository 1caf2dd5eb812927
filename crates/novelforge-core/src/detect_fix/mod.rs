//! Detect-and-fix cycle (§4.4): the post-draft revision loop that runs a QA
//! audit once, then repeatedly reviews, corrects, and re-reviews the whole
//! manuscript until the Final Reviewer's score converges or `max_cycles`
//! is exhausted.

mod process_results;

pub use process_results::{
    aggregate_by_chapter, convergence_gate, process_final_review_results, CorrectionSeverity,
    ProcessResultOutcome, ReviewIssue,
};

use crate::agents::{AgentAdapter, AgentRequest, AgentRole};
use crate::error::{OrchestratorError, Result};
use crate::model::Project;
use crate::patcher::{apply_patches, Patch};
use serde::{Deserialize, Serialize};

fn agent_err(role: AgentRole, source: crate::error::AgentError) -> OrchestratorError {
    OrchestratorError::AgentCall {
        role: role.as_str().to_string(),
        source,
    }
}

/// Chapters per continuity-check block (§4.4 step 1).
pub const CONTINUITY_BLOCK_SIZE: usize = 5;
/// Chapters per voice/rhythm-check block (§4.4 step 1).
pub const VOICE_RHYTHM_BLOCK_SIZE: usize = 10;
/// Maximum full-rewrite correction retries before falling back to a
/// simplified top-3-issues rewrite (§4.4 step 6).
pub const MAX_CORRECTION_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QaAuditReport {
    pub continuity_findings: Vec<String>,
    pub voice_rhythm_findings: Vec<String>,
    pub repetition_findings: Vec<String>,
    pub beta_reader_notes: Vec<String>,
}

fn chunk_numbers(chapter_numbers: &[i32], size: usize) -> Vec<Vec<i32>> {
    chapter_numbers.chunks(size.max(1)).map(|c| c.to_vec()).collect()
}

/// §4.4 step 1: runs once, on the first cycle only. Scans the whole
/// manuscript in blocks for continuity drift, voice/rhythm inconsistency,
/// and semantic repetition, then gets a holistic Beta Reader pass.
pub async fn run_qa_audit(
    qa_auditor: &dyn AgentAdapter,
    beta_reader: &dyn AgentAdapter,
    chapter_numbers: &[i32],
    chapter_text_by_number: impl Fn(i32) -> Option<String>,
) -> Result<QaAuditReport> {
    let mut report = QaAuditReport::default();

    for block in chunk_numbers(chapter_numbers, CONTINUITY_BLOCK_SIZE) {
        let joined = joined_block_text(&block, &chapter_text_by_number);
        if joined.is_empty() {
            continue;
        }
        let request = AgentRequest::new(
            AgentRole::QaAuditor,
            "You are the continuity sentinel: scan this block of chapters for continuity drift.",
            joined,
        );
        let response = qa_auditor.execute(request).await.map_err(|e| agent_err(AgentRole::QaAuditor, e))?;
        if !response.content.trim().is_empty() {
            report.continuity_findings.push(response.content);
        }
    }

    for block in chunk_numbers(chapter_numbers, VOICE_RHYTHM_BLOCK_SIZE) {
        let joined = joined_block_text(&block, &chapter_text_by_number);
        if joined.is_empty() {
            continue;
        }
        let request = AgentRequest::new(
            AgentRole::QaAuditor,
            "You are the voice/rhythm auditor: scan this block of chapters for inconsistent voice or pacing.",
            joined,
        );
        let response = qa_auditor.execute(request).await.map_err(|e| agent_err(AgentRole::QaAuditor, e))?;
        if !response.content.trim().is_empty() {
            report.voice_rhythm_findings.push(response.content);
        }
    }

    let whole_manuscript = joined_block_text(chapter_numbers, &chapter_text_by_number);
    if !whole_manuscript.is_empty() {
        let repetition_request = AgentRequest::new(
            AgentRole::QaAuditor,
            "You are the semantic repetition detector: find recurring phrases, images, or beats across the manuscript.",
            whole_manuscript.clone(),
        );
        let repetition_response = qa_auditor
            .execute(repetition_request)
            .await
            .map_err(|e| agent_err(AgentRole::QaAuditor, e))?;
        if !repetition_response.content.trim().is_empty() {
            report.repetition_findings.push(repetition_response.content);
        }

        let beta_request = AgentRequest::new(
            AgentRole::BetaReader,
            "You are a beta reader: give holistic impressions of the manuscript as a reader would.",
            whole_manuscript,
        );
        let beta_response = beta_reader.execute(beta_request).await.map_err(|e| agent_err(AgentRole::BetaReader, e))?;
        if !beta_response.content.trim().is_empty() {
            report.beta_reader_notes.push(beta_response.content);
        }
    }

    Ok(report)
}

fn joined_block_text(block: &[i32], chapter_text_by_number: &impl Fn(i32) -> Option<String>) -> String {
    block
        .iter()
        .filter_map(|&n| chapter_text_by_number(n).map(|text| format!("--- Chapter {n} ---\n{text}")))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Overall disposition the Final Reviewer attaches to a tranche (§4.4 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    #[default]
    Continue,
    Approved,
    RequiresRewrite,
}

/// A plot decision the Final Reviewer made explicit while reviewing (e.g.
/// resolving an ambiguous thread), to be folded back into the World Bible.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlotDecision {
    pub description: String,
    #[serde(default)]
    pub affected_chapters: Vec<i32>,
}

/// A persistent injury the Final Reviewer surfaced that the draft pass
/// hadn't yet recorded against the character.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewPersistentInjury {
    pub character_name: String,
    pub description: String,
    pub chapter_introduced: i32,
}

/// Raw Final Reviewer output for one cycle (§4.4 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReviewResult {
    pub score: f64,
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub verdict: ReviewVerdict,
    /// Chapters the reviewer says need a full rewrite rather than a surgical
    /// correction. Empty is not itself an error: callers fall back to
    /// deriving the set from `issues` when this is empty but issues exist.
    #[serde(default)]
    pub chapters_to_rewrite: Vec<i32>,
    #[serde(default)]
    pub new_plot_decisions: Vec<PlotDecision>,
    #[serde(default)]
    pub new_persistent_injuries: Vec<NewPersistentInjury>,
}

/// §4.4 step 3: runs the Final Reviewer, optionally reporting tranche
/// progress through `on_tranche` as large manuscripts are reviewed in parts.
pub async fn run_final_review(
    final_reviewer: &dyn AgentAdapter,
    manuscript_tranches: &[String],
    mut on_tranche: impl FnMut(usize, usize),
) -> Result<FinalReviewResult> {
    let total = manuscript_tranches.len();
    let mut issues = Vec::new();
    let mut scores = Vec::new();
    let mut chapters_to_rewrite = Vec::new();
    let mut new_plot_decisions = Vec::new();
    let mut new_persistent_injuries = Vec::new();
    let mut requires_rewrite = false;
    let mut all_approved = true;

    for (idx, tranche) in manuscript_tranches.iter().enumerate() {
        on_tranche(idx + 1, total);
        let request = AgentRequest::new(
            AgentRole::FinalReviewer,
            "You are the final reviewer: score this tranche of the manuscript 0-10 and list concrete issues as JSON.",
            tranche.clone(),
        );
        let response = final_reviewer.execute(request).await.map_err(|e| agent_err(AgentRole::FinalReviewer, e))?;
        match serde_json::from_str::<FinalReviewResult>(&response.content) {
            Ok(parsed) => {
                scores.push(parsed.score);
                issues.extend(parsed.issues);
                chapters_to_rewrite.extend(parsed.chapters_to_rewrite);
                new_plot_decisions.extend(parsed.new_plot_decisions);
                new_persistent_injuries.extend(parsed.new_persistent_injuries);
                match parsed.verdict {
                    ReviewVerdict::RequiresRewrite => requires_rewrite = true,
                    ReviewVerdict::Approved => {}
                    ReviewVerdict::Continue => all_approved = false,
                }
            }
            Err(_) => {
                // unparseable tranche output is treated as a neutral score with no issues
                // rather than aborting the whole review over one malformed response
                scores.push(5.0);
                all_approved = false;
            }
        }
    }

    let score = if scores.is_empty() { 0.0 } else { scores.iter().sum::<f64>() / scores.len() as f64 };
    let verdict = if requires_rewrite {
        ReviewVerdict::RequiresRewrite
    } else if all_approved {
        ReviewVerdict::Approved
    } else {
        ReviewVerdict::Continue
    };
    Ok(FinalReviewResult {
        score,
        issues,
        verdict,
        chapters_to_rewrite,
        new_plot_decisions,
        new_persistent_injuries,
    })
}

/// §4.4 step 6: applies corrections for one chapter, escalating
/// aggressiveness across retries. Attempts a fuzzy surgical patch first when
/// the issues carry concrete locators; escalates to a full rewrite, and on
/// the final retry falls back to a simplified rewrite addressing only the
/// top 3 issues by severity.
pub async fn apply_corrections_for_chapter(
    editor: &dyn AgentAdapter,
    chapter_text: &str,
    issues: &[ReviewIssue],
    attempt: u32,
) -> Result<String> {
    if attempt >= MAX_CORRECTION_RETRIES {
        let mut sorted = issues.to_vec();
        sorted.sort_by(|a, b| b.severity_rank().cmp(&a.severity_rank()));
        let top_issues: Vec<&ReviewIssue> = sorted.iter().take(3).collect();
        let guidance = top_issues
            .iter()
            .map(|i| i.description.clone())
            .collect::<Vec<_>>()
            .join("\n");
        let request = AgentRequest::new(AgentRole::SmartEditor, "Apply only the most severe corrections.", chapter_text.to_string());
        let response = editor
            .full_rewrite(request, &guidance)
            .await
            .map_err(|e| agent_err(AgentRole::SmartEditor, e))?;
        return Ok(response.content);
    }

    let locatable: Vec<&ReviewIssue> = issues.iter().filter(|i| i.locator.is_some()).collect();
    if !locatable.is_empty() {
        let patches: Vec<Patch> = locatable
            .iter()
            .filter_map(|i| {
                i.locator.clone().map(|locator| Patch {
                    locator,
                    replacement: i.suggested_replacement.clone().unwrap_or_default(),
                })
            })
            .filter(|p| !p.replacement.is_empty())
            .collect();
        if !patches.is_empty() {
            let result = apply_patches(chapter_text, &patches);
            if result.success {
                return Ok(result.patched_text);
            }
        }
    }

    let guidance = issues.iter().map(|i| i.description.clone()).collect::<Vec<_>>().join("\n");
    let request = AgentRequest::new(AgentRole::SmartEditor, "Apply the requested corrections.", chapter_text.to_string());
    let response = editor
        .full_rewrite(request, &guidance)
        .await
        .map_err(|e| agent_err(AgentRole::SmartEditor, e))?;
    Ok(response.content)
}

/// §4.4 step 7/8: whether the project should keep cycling. Purely a
/// bookkeeping check; the caller still must respect [`crate::token_gate::should_stop_processing`].
pub fn should_continue_cycling(project: &Project, cycles_run: u32, max_cycles: u32) -> bool {
    cycles_run < max_cycles && !project.correction_cancelled && !project.externally_cancelled
}
