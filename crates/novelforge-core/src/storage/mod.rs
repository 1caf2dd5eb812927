//! Storage interface (§6). The orchestrator talks to persistence only through
//! [`StorageBackend`]; [`crate::storage::sled_store::SledStorageBackend`] is the
//! demo-grade implementation (one Sled tree per record kind plus a DashMap hot
//! cache, grounded on the teacher's `MemoryManager`/`KnowledgeStore`), and
//! [`crate::storage::memory::InMemoryStorageBackend`] backs unit/integration tests.

pub mod memory;
pub mod sled_store;

use crate::error::StorageError;
use crate::model::{
    AiUsageEvent, Chapter, ConsistencyViolation, EntityRelationship, PlotThread, Project,
    ThoughtLog, WorldEntity, WorldRule,
};
use async_trait::async_trait;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A free-text activity log line (§6), write-only from the orchestrator's
/// perspective, never read back for control flow.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ActivityLogEntry {
    pub id: String,
    pub project_id: String,
    pub message: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A milestone marker (§6 [SUPPLEMENT]): write-only progress record with no
/// control-flow impact, e.g. "chapter 10 drafted", "final review started".
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MilestoneEntry {
    pub id: String,
    pub project_id: String,
    pub label: String,
    #[serde(default)]
    pub chapter_number: Option<i32>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// CRUD surface the orchestrator needs over every record kind in the data model (§3, §6).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get_project(&self, id: &str) -> StorageResult<Project>;
    async fn put_project(&self, project: &Project) -> StorageResult<()>;

    async fn get_chapter(&self, project_id: &str, number: i32) -> StorageResult<Option<Chapter>>;
    async fn put_chapter(&self, chapter: &Chapter) -> StorageResult<()>;
    async fn list_chapters(&self, project_id: &str) -> StorageResult<Vec<Chapter>>;

    async fn list_world_entities(&self, project_id: &str) -> StorageResult<Vec<WorldEntity>>;
    async fn put_world_entity(&self, entity: &WorldEntity) -> StorageResult<()>;

    async fn list_world_rules(&self, project_id: &str) -> StorageResult<Vec<WorldRule>>;
    async fn put_world_rule(&self, rule: &WorldRule) -> StorageResult<()>;

    async fn list_relationships(&self, project_id: &str) -> StorageResult<Vec<EntityRelationship>>;
    async fn put_relationship(&self, relationship: &EntityRelationship) -> StorageResult<()>;

    async fn list_violations(&self, project_id: &str) -> StorageResult<Vec<ConsistencyViolation>>;
    async fn put_violation(&self, violation: &ConsistencyViolation) -> StorageResult<()>;

    async fn list_plot_threads(&self, project_id: &str) -> StorageResult<Vec<PlotThread>>;
    async fn put_plot_thread(&self, thread: &PlotThread) -> StorageResult<()>;

    async fn put_thought_log(&self, log: &ThoughtLog) -> StorageResult<()>;
    async fn list_thought_logs(&self, project_id: &str) -> StorageResult<Vec<ThoughtLog>>;

    async fn put_usage_event(&self, event: &AiUsageEvent) -> StorageResult<()>;
    async fn list_usage_events(&self, project_id: &str) -> StorageResult<Vec<AiUsageEvent>>;

    async fn append_activity_log(&self, entry: &ActivityLogEntry) -> StorageResult<()>;
    async fn append_milestone(&self, entry: &MilestoneEntry) -> StorageResult<()>;
}
