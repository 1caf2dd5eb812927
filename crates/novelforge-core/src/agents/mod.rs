//! Agent adapter abstraction (§6). Every LLM-backed role in the pipeline is
//! reached through [`AgentAdapter`], the way the teacher routes reasoning
//! through `OpenRouterBridge::plan`/`plan_structured` rather than hand-rolling
//! a client per call site. `novelforge-cli` wires concrete adapters; this
//! crate only depends on the trait.

pub mod registry;
pub mod retry;

use crate::error::AgentError;
use crate::model::TokenUsage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Every role the orchestrator can dispatch a prompt to (§1, §4.2, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    GlobalArchitect,
    ChapterArchitect,
    Ghostwriter,
    SmartEditor,
    Summarizer,
    NarrativeDirector,
    Inquisidor,
    Estilista,
    Ritmo,
    Ensamblador,
    FinalReviewer,
    BetaReader,
    QaAuditor,
    SeriesThreadFixer,
    InjuryExtractor,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::GlobalArchitect => "global_architect",
            AgentRole::ChapterArchitect => "chapter_architect",
            AgentRole::Ghostwriter => "ghostwriter",
            AgentRole::SmartEditor => "smart_editor",
            AgentRole::Summarizer => "summarizer",
            AgentRole::NarrativeDirector => "narrative_director",
            AgentRole::Inquisidor => "inquisidor",
            AgentRole::Estilista => "estilista",
            AgentRole::Ritmo => "ritmo",
            AgentRole::Ensamblador => "ensamblador",
            AgentRole::FinalReviewer => "final_reviewer",
            AgentRole::BetaReader => "beta_reader",
            AgentRole::QaAuditor => "qa_auditor",
            AgentRole::SeriesThreadFixer => "series_thread_fixer",
            AgentRole::InjuryExtractor => "injury_extractor",
        }
    }
}

/// Input handed to an adapter: the assembled prompt plus grounding context
/// (world bible excerpt, prior chapter text, etc). Kept as a single opaque
/// string bundle since prompt construction is the orchestrator's job, not the
/// adapter's.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub role: AgentRole,
    pub system_prompt: String,
    pub user_prompt: String,
    pub context: Option<String>,
}

impl AgentRequest {
    pub fn new(role: AgentRole, system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            role,
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

/// Adapter over a single agent role (§6). `execute` is the only required
/// method; `full_rewrite`/`surgical_fix` let an adapter opt into the two
/// correction strategies the detect-and-fix loop can request (§4.4 step 6),
/// defaulting to a full rewrite expressed in terms of `execute`.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    fn role(&self) -> AgentRole;

    async fn execute(&self, request: AgentRequest) -> Result<AgentResponse, AgentError>;

    /// Regenerate the entire chapter from scratch given corrective guidance.
    async fn full_rewrite(
        &self,
        request: AgentRequest,
        guidance: &str,
    ) -> Result<AgentResponse, AgentError> {
        let combined = format!("{}\n\nCorrective guidance:\n{}", request.user_prompt, guidance);
        self.execute(AgentRequest {
            user_prompt: combined,
            ..request
        })
        .await
    }

    /// Apply a targeted patch rather than a full rewrite. Adapters that can't
    /// do surgical edits fall back to `full_rewrite`; `patcher` decides
    /// whether the result is usable via fuzzy locator matching.
    async fn surgical_fix(
        &self,
        request: AgentRequest,
        guidance: &str,
    ) -> Result<AgentResponse, AgentError> {
        self.full_rewrite(request, guidance).await
    }
}
