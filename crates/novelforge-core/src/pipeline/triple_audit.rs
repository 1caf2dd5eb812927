//! Triple cross-audit and correction loop (§4.2 step 6): Inquisidor,
//! Estilista, and Ritmo review a drafted chapter concurrently; on any
//! non-approval the Smart Editor rewrites, and the loop repeats until
//! either every auditor approves, successive rewrites converge (Levenshtein
//! ratio change below `convergence_ratio`), or `max_attempts` is exhausted.

use crate::agents::{AgentAdapter, AgentRequest, AgentRole};
use crate::error::{OrchestratorError, Result};
use crate::model::WorldBible;
use strsim::normalized_levenshtein;

fn agent_err(role: AgentRole, source: crate::error::AgentError) -> OrchestratorError {
    OrchestratorError::AgentCall {
        role: role.as_str().to_string(),
        source,
    }
}

/// §4.2 step 6's exit phrase: an auditor signals approval by including this
/// token (case-insensitively) in its response.
const APPROVAL_MARKER: &str = "aprobado";

/// Hard cap on distinct style ("Estilista") issues collected across attempts
/// before treating the chapter as unsalvageable by further rewriting alone (§4.2 step 6).
const ESTILISTA_ERROR_CAP: usize = 10;

#[derive(Debug, Clone)]
pub struct TripleAuditOutcome {
    pub final_text: String,
    pub attempts_used: u32,
    pub all_approved: bool,
    pub converged: bool,
}

fn is_approved(response: &str) -> bool {
    response.to_lowercase().contains(APPROVAL_MARKER)
}

async fn audit_request(role: AgentRole, chapter_text: &str) -> AgentRequest {
    AgentRequest::new(
        role,
        format!("You are {}: review the chapter and state veredicto: aprobado or list issues.", role.as_str()),
        chapter_text.to_string(),
    )
}

pub async fn triple_cross_audit_and_correct(
    inquisidor: &dyn AgentAdapter,
    estilista: &dyn AgentAdapter,
    ritmo: &dyn AgentAdapter,
    editor: &dyn AgentAdapter,
    chapter_text: &str,
    world_bible: &WorldBible,
    max_attempts: u32,
    convergence_ratio: f64,
) -> Result<TripleAuditOutcome> {
    let mut current = chapter_text.to_string();
    let mut estilista_issue_count = 0usize;

    for attempt in 1..=max_attempts.max(1) {
        let (inquisidor_req, estilista_req, ritmo_req) = (
            audit_request(AgentRole::Inquisidor, &current).await,
            audit_request(AgentRole::Estilista, &current).await,
            audit_request(AgentRole::Ritmo, &current).await,
        );

        let (inquisidor_res, estilista_res, ritmo_res) = futures::join!(
            inquisidor.execute(inquisidor_req),
            estilista.execute(estilista_req),
            ritmo.execute(ritmo_req),
        );

        let inquisidor_res = inquisidor_res.map_err(|e| agent_err(AgentRole::Inquisidor, e))?;
        let estilista_res = estilista_res.map_err(|e| agent_err(AgentRole::Estilista, e))?;
        let ritmo_res = ritmo_res.map_err(|e| agent_err(AgentRole::Ritmo, e))?;

        let approved = is_approved(&inquisidor_res.content)
            && is_approved(&estilista_res.content)
            && is_approved(&ritmo_res.content);

        if approved {
            return Ok(TripleAuditOutcome {
                final_text: current,
                attempts_used: attempt,
                all_approved: true,
                converged: false,
            });
        }

        if !is_approved(&estilista_res.content) {
            estilista_issue_count += 1;
        }

        if attempt == max_attempts || estilista_issue_count >= ESTILISTA_ERROR_CAP {
            return Ok(TripleAuditOutcome {
                final_text: current,
                attempts_used: attempt,
                all_approved: false,
                converged: false,
            });
        }

        let combined_feedback = format!(
            "Continuity: {}\nStyle: {}\nRhythm: {}",
            inquisidor_res.content, estilista_res.content, ritmo_res.content
        );

        let rewrite_request = AgentRequest::new(AgentRole::SmartEditor, "Apply the requested corrections.", current.clone())
            .with_context(serde_json::to_string(world_bible).unwrap_or_default());
        let rewritten = editor
            .full_rewrite(rewrite_request, &combined_feedback)
            .await
            .map_err(|e| agent_err(AgentRole::SmartEditor, e))?;

        let similarity = normalized_levenshtein(&current, &rewritten.content);
        let change_ratio = 1.0 - similarity;
        current = rewritten.content;

        if change_ratio < convergence_ratio {
            return Ok(TripleAuditOutcome {
                final_text: current,
                attempts_used: attempt,
                all_approved: false,
                converged: true,
            });
        }
    }

    Ok(TripleAuditOutcome {
        final_text: current,
        attempts_used: max_attempts,
        all_approved: false,
        converged: false,
    })
}
