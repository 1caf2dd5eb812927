//! Generation pipeline (§4.2): the per-chapter loop that drives a project
//! from its structural outline to persisted, validated chapters. Each
//! numbered step in the spec is its own async fn, composed by
//! [`run_chapter_pipeline`], mirroring the teacher's one-fn-per-concern
//! orchestration style (`orchestrator::mod.rs`'s `dispatch`/`route_to_experts`).

mod constraints;
mod scenes;
mod triple_audit;

pub use constraints::{build_consistency_constraints, ConsistencyConstraints};
pub use scenes::{plan_scenes, write_scenes, SceneWriteOutcome};
pub use triple_audit::{triple_cross_audit_and_correct, TripleAuditOutcome};

use crate::agents::registry::AgentRegistry;
use crate::config::OrchestratorConfig;
use crate::consistency::{apply_consistency_output, ConsistencyAgentOutput};
use crate::error::{OrchestratorError, Result};
use crate::model::{
    Chapter, ChapterStatus, PlotThread, PlotThreadStatus, Project, WorldBible, WorldEntity,
};
use crate::pattern_tracker::PatternTracker;
use crate::storage::StorageBackend;
use crate::token_gate::should_stop_processing;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// One entry from the structural plan (§3 plot_outline.chapter_outlines),
/// the unit the pipeline iterates in outline order. Also the on-disk shape
/// of an outline file passed to `novelforge-cli generate --outline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub number: i32,
    pub title: String,
    pub summary: String,
    pub key_event: String,
    pub structural_role: Option<String>,
}

/// Bundles the collaborators every pipeline step needs, the way the
/// teacher's `Orchestrator` struct holds `Arc<dyn AgentSkill>` registries
/// and storage rather than threading them through every call manually.
pub struct PipelineContext {
    pub storage: Arc<dyn StorageBackend>,
    pub agents: Arc<AgentRegistry>,
    pub pattern_tracker: Arc<PatternTracker>,
    pub config: OrchestratorConfig,
}

/// Step 1: true if the chapter at this outline entry is already complete
/// and needs no further work.
pub async fn is_already_complete(ctx: &PipelineContext, project_id: &str, number: i32) -> Result<bool> {
    let Some(chapter) = ctx.storage.get_chapter(project_id, number).await? else {
        return Ok(false);
    };
    let min_words = if crate::normalize::is_special_chapter(number) {
        ctx.config.special_chapter_min_word_count
    } else {
        ctx.config.regular_chapter_approval_floor
    };
    let approved = matches!(chapter.status, ChapterStatus::Approved);
    let long_enough = chapter.word_count >= min_words;
    let clean = crate::garbled::detect_garbled(&chapter.content).is_empty();
    Ok(approved && long_enough && clean)
}

/// Step 8: minimum-length repair. Regular chapters must reach
/// `min_word_count`; the prologue only needs 60% of that (§4.2 step 8).
pub fn minimum_word_count_for(config: &OrchestratorConfig, chapter_number: i32) -> u32 {
    if chapter_number == crate::normalize::PROLOGUE {
        (config.min_word_count as f64 * 0.6).round() as u32
    } else if crate::normalize::is_special_chapter(chapter_number) {
        config.special_chapter_min_word_count
    } else {
        config.min_word_count
    }
}

/// Step 9: truncation detection independent of the garbled-text heuristics:
/// the last non-empty line must end on sentence-terminal punctuation and
/// contain at least 3 words.
pub fn is_truncated(text: &str) -> bool {
    let Some(last_line) = text.lines().rev().find(|l| !l.trim().is_empty()) else {
        return false;
    };
    let trimmed = last_line.trim();
    let word_count = trimmed.split_whitespace().count();
    let ends_terminal = trimmed
        .chars()
        .last()
        .map(|c| matches!(c, '.' | '!' | '?' | '"' | '\u{201d}' | '\u{2019}'))
        .unwrap_or(false);
    word_count < 3 || !ends_terminal
}

/// Step 10: rebuilds the rolling summary from the last 3 chapter summaries
/// in `Cap N: ...` form, the format consumed by the next chapter's constraints.
pub fn rebuild_rolling_summary(recent_summaries: &[(i32, String)]) -> String {
    recent_summaries
        .iter()
        .rev()
        .take(3)
        .rev()
        .map(|(num, summary)| format!("Cap {num}: {summary}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Step 12: keyword-based plot thread status update. Negation-aware
/// resolution detection: a resolution score ≥ 3 marks the thread resolved;
/// otherwise any advancement keyword marks it developing.
pub fn update_plot_thread_status(thread: &mut PlotThread, chapter_summary: &str, chapter_number: i32) {
    const RESOLUTION_KEYWORDS: &[&str] = &[
        "resolved", "concluded", "settled", "finally", "ended", "closure", "defeated", "reunited",
    ];
    const NEGATIONS: &[&str] = &["not", "never", "failed to", "unable to", "without"];
    const ADVANCEMENT_KEYWORDS: &[&str] = &[
        "progress", "closer", "discovered", "revealed", "advanced", "continued",
    ];

    let lower = chapter_summary.to_lowercase();
    let mut score = 0i32;
    for keyword in RESOLUTION_KEYWORDS {
        if !lower.contains(keyword) {
            continue;
        }
        let negated = NEGATIONS.iter().any(|neg| {
            if let Some(pos) = lower.find(keyword) {
                let window_start = pos.saturating_sub(20);
                lower[window_start..pos].contains(neg)
            } else {
                false
            }
        });
        score += if negated { -1 } else { 2 };
    }

    if score >= 3 {
        thread.status = PlotThreadStatus::Resolved;
        thread.chapter_resolved = Some(chapter_number);
    } else if ADVANCEMENT_KEYWORDS.iter().any(|k| lower.contains(k)) {
        if thread.status == PlotThreadStatus::Open {
            thread.status = PlotThreadStatus::Open; // "developing" has no distinct Open sub-state in storage form
        }
    }
}

/// Runs the full per-chapter pipeline for one outline entry (§4.2). Returns
/// the persisted chapter, or `Ok(None)` if processing stopped early because
/// [`should_stop_processing`] tripped at a breakpoint.
pub async fn run_chapter_pipeline(
    ctx: &PipelineContext,
    project: &mut Project,
    world_bible: &mut WorldBible,
    entities: &[WorldEntity],
    entry: &OutlineEntry,
    captured_token: &str,
) -> Result<Option<Chapter>> {
    if should_stop_processing(project, captured_token) {
        return Ok(None);
    }

    // Step 1: skip if already complete.
    if is_already_complete(ctx, &project.id, entry.number).await? {
        info!(chapter = entry.number, "chapter already complete, skipping");
        return Ok(ctx.storage.get_chapter(&project.id, entry.number).await?);
    }

    // Step 2: World Bible sync happens in the caller (orchestrator.rs) right
    // before invoking this pipeline, since it needs the full entity list and
    // persists the result; by the time we're here `world_bible` is current.

    // Step 3: build consistency constraints.
    let plot_threads = ctx.storage.list_plot_threads(&project.id).await?;
    let constraints = build_consistency_constraints(world_bible, &plot_threads, project, entry);

    if should_stop_processing(project, captured_token) {
        return Ok(None);
    }

    // Step 4: plan scenes.
    let architect = ctx.agents.get(crate::agents::AgentRole::ChapterArchitect)?;
    let advice = ctx.pattern_tracker.advice_for_next_chapter(&project.id);
    let scene_plan = plan_scenes(architect.as_ref(), world_bible, entry, &constraints, &advice).await?;

    // Step 5: write scenes.
    let writer = ctx.agents.get(crate::agents::AgentRole::Ghostwriter)?;
    let write_outcome = write_scenes(writer.as_ref(), world_bible, &constraints, &scene_plan).await?;

    if should_stop_processing(project, captured_token) {
        return Ok(None);
    }

    // Step 6: triple cross-audit and correction loop.
    let inquisidor = ctx.agents.get(crate::agents::AgentRole::Inquisidor)?;
    let estilista = ctx.agents.get(crate::agents::AgentRole::Estilista)?;
    let ritmo = ctx.agents.get(crate::agents::AgentRole::Ritmo)?;
    let editor = ctx.agents.get(crate::agents::AgentRole::SmartEditor)?;
    let audit_outcome = triple_cross_audit_and_correct(
        inquisidor.as_ref(),
        estilista.as_ref(),
        ritmo.as_ref(),
        editor.as_ref(),
        &write_outcome.content,
        world_bible,
        ctx.config.max_triple_audit_attempts,
        ctx.config.convergence_ratio,
    )
    .await?;

    let mut content = audit_outcome.final_text;

    // Step 7: consistency enforcement.
    content = enforce_consistency(ctx, project, world_bible, entities, entry.number, &content).await?;

    // Step 8: minimum-length repair. Ask the Smart Editor to extend, up to
    // twice, accepting a rewrite only if it actually grows the chapter.
    let min_words = minimum_word_count_for(&ctx.config, entry.number);
    if crate::model::Chapter::word_count_of(&content) < min_words {
        warn!(chapter = entry.number, "chapter below minimum word count after drafting");
        content = repair_minimum_length(editor.as_ref(), &content, min_words).await?;
    }

    // Step 9: truncation repair. Ask for an explicit repair, accepting the
    // rewrite only if it keeps at least 90% of the current length.
    if is_truncated(&content) || !crate::garbled::detect_garbled(&content).is_empty() {
        warn!(chapter = entry.number, "chapter flagged as truncated or garbled");
        content = repair_truncation(editor.as_ref(), &content).await?;
    }

    // Step 10: summarize.
    let summarizer = ctx.agents.get(crate::agents::AgentRole::Summarizer)?;
    let summary = summarize_chapter(summarizer.as_ref(), &content).await.unwrap_or_else(|_| {
        format!("Chapter {} (summary unavailable)", entry.number)
    });

    let word_count = crate::model::Chapter::word_count_of(&content);
    let now = chrono::Utc::now();
    let chapter = Chapter {
        id: format!("{}:{}", project.id, crate::normalize::normalize_chapter(entry.number)),
        project_id: project.id.clone(),
        number: entry.number,
        title: entry.title.clone(),
        scene_plan: scene_plan.clone(),
        content,
        summary: Some(summary),
        status: if word_count >= min_words {
            ChapterStatus::Approved
        } else {
            ChapterStatus::Drafted
        },
        word_count,
        score: None,
        generation_token: Some(captured_token.to_string()),
        correction_attempts: 0,
        created_at: now,
        updated_at: now,
    };

    // Step 11: persist (upsert by project_id, chapter_number; never duplicate).
    persist_chapter(ctx, &chapter).await?;

    // Step 12: derived updates (plot thread statuses; injuries are handled by
    // the orchestrator, which owns the Injury Extractor round-trip).
    apply_plot_thread_updates(ctx, &project.id, entry.number, chapter.summary.as_deref().unwrap_or("")).await?;

    // Step 14: cumulative token persistence is handled by the caller, which
    // owns the usage-event records this pipeline run produced.
    let _ = &write_outcome.last_context; // retained for the next chapter's step 5 seed, owned by caller

    Ok(Some(chapter))
}

/// Step 8: extend-mode repair. Up to two Smart Editor passes asking it to
/// lengthen the chapter; a rewrite is accepted only if it actually grows the
/// word count, otherwise the previous best attempt is kept (§4.2 step 8).
async fn repair_minimum_length(
    editor: &dyn crate::agents::AgentAdapter,
    content: &str,
    min_words: u32,
) -> Result<String> {
    let mut current = content.to_string();
    let mut best_count = Chapter::word_count_of(&current);

    for _ in 0..2 {
        if best_count >= min_words {
            break;
        }
        let request = crate::agents::AgentRequest::new(
            crate::agents::AgentRole::SmartEditor,
            "Extend this chapter with additional scene content, preserving voice and continuity.",
            current.clone(),
        );
        let guidance = format!(
            "The chapter is {best_count} words but must reach at least {min_words}. Add material, do not summarize or truncate."
        );
        let rewritten = editor
            .full_rewrite(request, &guidance)
            .await
            .map_err(|e| agent_err(crate::agents::AgentRole::SmartEditor, e))?;
        let new_count = Chapter::word_count_of(&rewritten.content);
        if new_count > best_count {
            current = rewritten.content;
            best_count = new_count;
        }
    }
    Ok(current)
}

/// Step 9: truncation/garble repair. A single Smart Editor pass with an
/// explicit repair instruction; the rewrite is accepted only if it keeps at
/// least 90% of the current chapter's length, otherwise the draft stands (§4.2 step 9).
async fn repair_truncation(editor: &dyn crate::agents::AgentAdapter, content: &str) -> Result<String> {
    let request = crate::agents::AgentRequest::new(
        crate::agents::AgentRole::SmartEditor,
        "This chapter appears truncated or garbled mid-sentence. Rewrite it in full, ending on a complete sentence.",
        content.to_string(),
    );
    let rewritten = editor
        .full_rewrite(request, "Repair the truncated or garbled ending; do not shorten the chapter.")
        .await
        .map_err(|e| agent_err(crate::agents::AgentRole::SmartEditor, e))?;

    let current_len = content.chars().count().max(1);
    let new_len = rewritten.content.chars().count();
    if (new_len as f64) >= 0.9 * (current_len as f64) {
        Ok(rewritten.content)
    } else {
        Ok(content.to_string())
    }
}

fn agent_err(role: crate::agents::AgentRole, source: crate::error::AgentError) -> OrchestratorError {
    OrchestratorError::AgentCall {
        role: role.as_str().to_string(),
        source,
    }
}

async fn enforce_consistency(
    ctx: &PipelineContext,
    project: &Project,
    world_bible: &WorldBible,
    entities: &[WorldEntity],
    chapter_number: i32,
    content: &str,
) -> Result<String> {
    let inquisidor = ctx.agents.get(crate::agents::AgentRole::Inquisidor)?;
    let request = crate::agents::AgentRequest::new(
        crate::agents::AgentRole::Inquisidor,
        "You are the universal consistency agent. Read the chapter against the World Bible and \
         respond with a JSON object: {\"is_valid\": bool, \"critical_error\": string|null, \
         \"correction_instructions\": string|null, \"warnings\": [string], \"new_facts\": \
         [{\"entity_name\", \"entity_type\", \"key\", \"value\"}], \"new_rules\": \
         [{\"statement\", \"related_character\"}], \"new_relationships\": \
         [{\"entity_a\", \"entity_b\", \"kind\", \"description\"}].",
        content.to_string(),
    )
    .with_context(serde_json::to_string(world_bible).unwrap_or_default());

    let response = inquisidor
        .execute(request)
        .await
        .map_err(|e| agent_err(crate::agents::AgentRole::Inquisidor, e))?;

    let output = serde_json::from_str::<ConsistencyAgentOutput>(&response.content)
        .unwrap_or_else(|_| ConsistencyAgentOutput::clean_pass());

    let known: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
    let result = apply_consistency_output(chapter_number, content, &output, entities, &known);

    for mut entity in result.updated_entities {
        entity.project_id = project.id.clone();
        ctx.storage.put_world_entity(&entity).await?;
    }
    for mut rule in result.new_rules {
        rule.project_id = project.id.clone();
        ctx.storage.put_world_rule(&rule).await?;
    }
    for mut relationship in result.new_relationships {
        relationship.project_id = project.id.clone();
        ctx.storage.put_relationship(&relationship).await?;
    }

    for violation in &result.violations {
        let record = crate::model::ConsistencyViolation {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project.id.clone(),
            chapter_number,
            violation_type: violation.violation_type,
            severity: violation.severity,
            description: violation.description.clone(),
            issue_hash: crate::issue_hash::compute_issue_hash(
                chapter_number,
                violation_description_kind(violation.violation_type),
                &violation.description,
            ),
            status: crate::model::ViolationStatus::Open,
            cycles_seen: 1,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        ctx.storage.put_violation(&record).await?;
    }

    // §4.2 step 7: up to two forced Smart Editor rewrites for a critical
    // violation, re-validating against the same agent output each time.
    let mut repaired = content.to_string();
    let mut attempts = 0;
    while !result.is_valid && attempts < 2 {
        let editor = ctx.agents.get(crate::agents::AgentRole::SmartEditor)?;
        let guidance = result
            .error
            .clone()
            .unwrap_or_else(|| "resolve the flagged consistency violation".to_string());
        let request = crate::agents::AgentRequest::new(
            crate::agents::AgentRole::SmartEditor,
            "Correct the consistency violation described in the guidance without otherwise changing the chapter.",
            repaired.clone(),
        );
        let rewritten = editor
            .full_rewrite(request, &guidance)
            .await
            .map_err(|e| agent_err(crate::agents::AgentRole::SmartEditor, e))?;
        repaired = rewritten.content;
        attempts += 1;
    }

    Ok(repaired)
}

fn violation_description_kind(kind: crate::model::ViolationType) -> &'static str {
    match kind {
        crate::model::ViolationType::DeathGating => "death_gating",
        crate::model::ViolationType::AttributeDrift => "attribute_drift",
        crate::model::ViolationType::Timeline => "timeline",
        crate::model::ViolationType::PlotThreadDangling => "plot_thread_dangling",
        crate::model::ViolationType::GarbledText => "garbled_text",
        crate::model::ViolationType::WordCount => "word_count",
        crate::model::ViolationType::Other => "other",
    }
}

async fn summarize_chapter(
    summarizer: &dyn crate::agents::AgentAdapter,
    content: &str,
) -> Result<String> {
    let request = crate::agents::AgentRequest::new(
        crate::agents::AgentRole::Summarizer,
        "Summarize the chapter in 2-3 sentences for continuity tracking.",
        content,
    );
    let response = summarizer
        .execute(request)
        .await
        .map_err(|source| OrchestratorError::AgentCall {
            role: crate::agents::AgentRole::Summarizer.as_str().to_string(),
            source,
        })?;
    Ok(response.content)
}

async fn persist_chapter(ctx: &PipelineContext, chapter: &Chapter) -> Result<()> {
    // §4.2 step 11: always re-read and check before inserting, never blind-upsert.
    let existing = ctx.storage.get_chapter(&chapter.project_id, chapter.number).await?;
    if existing.is_some() {
        info!(chapter = chapter.number, "updating existing chapter record");
    }
    ctx.storage.put_chapter(chapter).await?;
    Ok(())
}

async fn apply_plot_thread_updates(
    ctx: &PipelineContext,
    project_id: &str,
    chapter_number: i32,
    chapter_summary: &str,
) -> Result<()> {
    let mut threads = ctx.storage.list_plot_threads(project_id).await?;
    for thread in &mut threads {
        if thread.status == PlotThreadStatus::Resolved {
            continue;
        }
        update_plot_thread_status(thread, chapter_summary, chapter_number);
        ctx.storage.put_plot_thread(thread).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prologue_gets_reduced_minimum() {
        let config = OrchestratorConfig::default();
        assert_eq!(minimum_word_count_for(&config, 0), 900);
    }

    #[test]
    fn regular_chapter_uses_full_minimum() {
        let config = OrchestratorConfig::default();
        assert_eq!(minimum_word_count_for(&config, 5), 1500);
    }

    #[test]
    fn truncation_detects_short_final_line() {
        assert!(is_truncated("She walked in.\n\nAnd then"));
    }

    #[test]
    fn truncation_allows_properly_terminated_text() {
        assert!(!is_truncated("She walked into the room and smiled warmly."));
    }

    #[test]
    fn rolling_summary_keeps_last_three() {
        let summaries = vec![
            (1, "one".to_string()),
            (2, "two".to_string()),
            (3, "three".to_string()),
            (4, "four".to_string()),
        ];
        let rolling = rebuild_rolling_summary(&summaries);
        assert!(rolling.contains("Cap 2: two"));
        assert!(rolling.contains("Cap 4: four"));
        assert!(!rolling.contains("Cap 1: one"));
    }

    #[test]
    fn resolution_keyword_with_high_score_resolves_thread() {
        let mut thread = PlotThread {
            id: "t1".into(),
            project_id: "p1".into(),
            description: "find the amulet".into(),
            chapter_introduced: 1,
            chapter_resolved: None,
            status: PlotThreadStatus::Open,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        update_plot_thread_status(
            &mut thread,
            "The quest finally concluded with closure for everyone involved.",
            7,
        );
        assert_eq!(thread.status, PlotThreadStatus::Resolved);
        assert_eq!(thread.chapter_resolved, Some(7));
    }

    #[test]
    fn negated_resolution_keyword_does_not_resolve() {
        let mut thread = PlotThread {
            id: "t1".into(),
            project_id: "p1".into(),
            description: "find the amulet".into(),
            chapter_introduced: 1,
            chapter_resolved: None,
            status: PlotThreadStatus::Open,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        update_plot_thread_status(&mut thread, "They were unable to reach closure this time.", 7);
        assert_eq!(thread.status, PlotThreadStatus::Open);
    }
}
