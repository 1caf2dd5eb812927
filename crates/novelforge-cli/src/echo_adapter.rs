//! Placeholder agent adapter used until a real LLM client is wired in.
//!
//! Mirrors the way the teacher's `pagi-daemon` ships a `NoopBridge` for local
//! smoke-testing (see `add-ons/pagi-daemon/src/bridge.rs`): it satisfies the
//! trait so the orchestrator can run end-to-end without network access, but
//! produces no real content.

use async_trait::async_trait;
use novelforge_core::agents::{AgentAdapter, AgentRequest, AgentResponse, AgentRole};
use novelforge_core::error::AgentError;
use novelforge_core::model::TokenUsage;

pub struct EchoAdapter {
    role: AgentRole,
}

impl EchoAdapter {
    pub fn new(role: AgentRole) -> Self {
        Self { role }
    }
}

#[async_trait]
impl AgentAdapter for EchoAdapter {
    fn role(&self) -> AgentRole {
        self.role
    }

    async fn execute(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        Ok(AgentResponse {
            content: request.user_prompt,
            usage: TokenUsage::default(),
            model: format!("echo:{}", self.role.as_str()),
        })
    }
}
