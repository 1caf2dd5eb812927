//! Generation token supersession (§5): the sole concurrency-coordination
//! primitive. Starting a new generation run issues a fresh token and stores
//! it on the project; every in-flight step compares its captured token
//! against the project's current token before committing a write, so an
//! old run quietly stops instead of clobbering a newer one. No locks.

use crate::model::Project;
use uuid::Uuid;

/// Mints a new generation token, to be stored on the project before a run starts.
pub fn new_generation_token() -> String {
    Uuid::new_v4().to_string()
}

/// True if `captured_token` no longer matches the project's live token, i.e.
/// a newer run has superseded the one that captured it.
pub fn is_superseded(project: &Project, captured_token: &str) -> bool {
    match &project.generation_token {
        Some(live) => live != captured_token,
        None => true,
    }
}

/// Centralizes every reason a pipeline step should stop without writing
/// further state (§4.1): token supersession, explicit cancellation requests,
/// or an external stop flag set by the caller (e.g. via `Callbacks`).
pub fn should_stop_processing(project: &Project, captured_token: &str) -> bool {
    project.correction_cancelled
        || project.externally_cancelled
        || is_superseded(project, captured_token)
}
