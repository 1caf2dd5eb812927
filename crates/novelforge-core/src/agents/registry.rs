//! Role -> adapter lookup, mirroring the teacher's `SkillRegistry` keyed
//! dispatch (`orchestrator::skills`).

use super::{AgentAdapter, AgentRole};
use crate::error::AgentError;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct AgentRegistry {
    adapters: HashMap<AgentRole, Arc<dyn AgentAdapter>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn AgentAdapter>) {
        self.adapters.insert(adapter.role(), adapter);
    }

    pub fn get(&self, role: AgentRole) -> Result<Arc<dyn AgentAdapter>, AgentError> {
        self.adapters
            .get(&role)
            .cloned()
            .ok_or_else(|| AgentError::UnknownRole(role.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentRequest, AgentResponse};
    use crate::model::TokenUsage;
    use async_trait::async_trait;

    struct EchoAdapter(AgentRole);

    #[async_trait]
    impl AgentAdapter for EchoAdapter {
        fn role(&self) -> AgentRole {
            self.0
        }

        async fn execute(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
            Ok(AgentResponse {
                content: request.user_prompt,
                usage: TokenUsage::default(),
                model: "echo".into(),
            })
        }
    }

    #[test]
    fn unregistered_role_is_an_error() {
        let registry = AgentRegistry::new();
        let err = registry.get(AgentRole::Ghostwriter).unwrap_err();
        assert!(matches!(err, AgentError::UnknownRole(_)));
    }

    #[test]
    fn registered_role_resolves() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(EchoAdapter(AgentRole::Ghostwriter)));
        assert!(registry.get(AgentRole::Ghostwriter).is_ok());
    }
}
