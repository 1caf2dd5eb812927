//! Rate-limit retry wrapper around an [`AgentAdapter`] call (§5). Retries on
//! [`AgentError::RateLimitExhausted`]-adjacent transport failures using a
//! fixed backoff schedule, the way the teacher's maintenance loop sleeps
//! between polling passes (`tokio::time::sleep` in `orchestrator::maintenance`)
//! rather than a crate like `backoff`.

use super::{AgentAdapter, AgentRequest, AgentResponse};
use crate::error::AgentError;
use std::time::Duration;
use tracing::warn;

/// Executes `request` against `adapter`, retrying on transport/rate-limit
/// errors per `backoff_schedule_secs` (§5: 15s, 30s, 60s, 90s, 120s by
/// default). Returns [`AgentError::RateLimitExhausted`] once the schedule is
/// exhausted.
pub async fn execute_with_retry(
    adapter: &dyn AgentAdapter,
    request: AgentRequest,
    backoff_schedule_secs: &[u64],
) -> Result<AgentResponse, AgentError> {
    let role = adapter.role();
    let mut last_err = None;

    for (attempt, &delay_secs) in std::iter::once(&0).chain(backoff_schedule_secs).enumerate() {
        if attempt > 0 {
            warn!(
                role = role.as_str(),
                attempt, delay_secs, "retrying agent call after transient failure"
            );
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
        }
        match adapter.execute(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(AgentError::Transport(msg)) => last_err = Some(AgentError::Transport(msg)),
            Err(other) => return Err(other),
        }
    }

    warn!(role = role.as_str(), "retry budget exhausted");
    let _ = last_err;
    Err(AgentError::RateLimitExhausted)
}
