//! Sled-backed storage, one tree per record kind plus a DashMap hot cache.
//! Grounded on the teacher's `MemoryManager` (cache-then-Sled get/put) and
//! `KnowledgeStore` (one tree per logical slot, via an enum -> tree-name map).

use super::{ActivityLogEntry, MilestoneEntry, StorageBackend, StorageResult};
use crate::error::StorageError;
use crate::model::{
    AiUsageEvent, Chapter, ConsistencyViolation, EntityRelationship, PlotThread, Project,
    ThoughtLog, WorldEntity, WorldRule,
};
use async_trait::async_trait;
use dashmap::DashMap;
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;

/// One Sled tree per record kind (§6), named the way the teacher names KB slots.
#[derive(Debug, Clone, Copy)]
enum TreeKind {
    Projects,
    Chapters,
    WorldEntities,
    WorldRules,
    Relationships,
    Violations,
    PlotThreads,
    ThoughtLogs,
    UsageEvents,
    ActivityLog,
    Milestones,
}

impl TreeKind {
    fn name(self) -> &'static str {
        match self {
            TreeKind::Projects => "projects",
            TreeKind::Chapters => "chapters",
            TreeKind::WorldEntities => "world_entities",
            TreeKind::WorldRules => "world_rules",
            TreeKind::Relationships => "entity_relationships",
            TreeKind::Violations => "consistency_violations",
            TreeKind::PlotThreads => "plot_threads",
            TreeKind::ThoughtLogs => "thought_logs",
            TreeKind::UsageEvents => "ai_usage_events",
            TreeKind::ActivityLog => "activity_log",
            TreeKind::Milestones => "milestones",
        }
    }
}

pub struct SledStorageBackend {
    db: Db,
    trees: DashMap<&'static str, Tree>,
    /// Hot cache for single-record reads (projects, chapter-by-number), mirroring
    /// the teacher's `MemoryManager::cache`.
    cache: Arc<DashMap<String, Vec<u8>>>,
}

impl SledStorageBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            trees: DashMap::new(),
            cache: Arc::new(DashMap::new()),
        })
    }

    fn tree(&self, kind: TreeKind) -> StorageResult<Tree> {
        if let Some(t) = self.trees.get(kind.name()) {
            return Ok(t.clone());
        }
        let t = self.db.open_tree(kind.name())?;
        self.trees.insert(kind.name(), t.clone());
        Ok(t)
    }

    fn put_record<T: serde::Serialize>(
        &self,
        kind: TreeKind,
        key: &str,
        value: &T,
    ) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.tree(kind)?.insert(key.as_bytes(), bytes.clone())?;
        self.cache.insert(format!("{}:{key}", kind.name()), bytes);
        Ok(())
    }

    fn get_record<T: serde::de::DeserializeOwned>(
        &self,
        kind: TreeKind,
        key: &str,
    ) -> StorageResult<Option<T>> {
        let cache_key = format!("{}:{key}", kind.name());
        if let Some(bytes) = self.cache.get(&cache_key) {
            return Ok(Some(serde_json::from_slice(&bytes)?));
        }
        let Some(ivec) = self.tree(kind)?.get(key.as_bytes())? else {
            return Ok(None);
        };
        self.cache.insert(cache_key, ivec.to_vec());
        Ok(Some(serde_json::from_slice(&ivec)?))
    }

    fn list_records<T: serde::de::DeserializeOwned>(&self, kind: TreeKind) -> StorageResult<Vec<T>> {
        let tree = self.tree(kind)?;
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_, v) = item?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }

    fn list_records_filtered<T: serde::de::DeserializeOwned>(
        &self,
        kind: TreeKind,
        project_id: &str,
        get_project_id: impl Fn(&T) -> &str,
    ) -> StorageResult<Vec<T>> {
        Ok(self
            .list_records::<T>(kind)?
            .into_iter()
            .filter(|r| get_project_id(r) == project_id)
            .collect())
    }

    fn chapter_key(project_id: &str, number: i32) -> String {
        let norm = crate::normalize::normalize_chapter(number);
        format!("{project_id}:{norm}")
    }
}

#[async_trait]
impl StorageBackend for SledStorageBackend {
    async fn get_project(&self, id: &str) -> StorageResult<Project> {
        self.get_record(TreeKind::Projects, id)?
            .ok_or_else(|| StorageError::NotFound(format!("project {id}")))
    }

    async fn put_project(&self, project: &Project) -> StorageResult<()> {
        self.put_record(TreeKind::Projects, &project.id, project)
    }

    async fn get_chapter(&self, project_id: &str, number: i32) -> StorageResult<Option<Chapter>> {
        self.get_record(TreeKind::Chapters, &Self::chapter_key(project_id, number))
    }

    async fn put_chapter(&self, chapter: &Chapter) -> StorageResult<()> {
        let key = Self::chapter_key(&chapter.project_id, chapter.number);
        self.put_record(TreeKind::Chapters, &key, chapter)
    }

    async fn list_chapters(&self, project_id: &str) -> StorageResult<Vec<Chapter>> {
        let mut out = self.list_records_filtered::<Chapter>(TreeKind::Chapters, project_id, |c| {
            c.project_id.as_str()
        })?;
        out.sort_by_key(|c| crate::normalize::normalize_chapter(c.number));
        Ok(out)
    }

    async fn list_world_entities(&self, project_id: &str) -> StorageResult<Vec<WorldEntity>> {
        self.list_records_filtered(TreeKind::WorldEntities, project_id, |e: &WorldEntity| {
            e.project_id.as_str()
        })
    }

    async fn put_world_entity(&self, entity: &WorldEntity) -> StorageResult<()> {
        self.put_record(TreeKind::WorldEntities, &entity.id, entity)
    }

    async fn list_world_rules(&self, project_id: &str) -> StorageResult<Vec<WorldRule>> {
        self.list_records_filtered(TreeKind::WorldRules, project_id, |r: &WorldRule| {
            r.project_id.as_str()
        })
    }

    async fn put_world_rule(&self, rule: &WorldRule) -> StorageResult<()> {
        self.put_record(TreeKind::WorldRules, &rule.id, rule)
    }

    async fn list_relationships(&self, project_id: &str) -> StorageResult<Vec<EntityRelationship>> {
        self.list_records_filtered(TreeKind::Relationships, project_id, |r: &EntityRelationship| {
            r.project_id.as_str()
        })
    }

    async fn put_relationship(&self, relationship: &EntityRelationship) -> StorageResult<()> {
        self.put_record(TreeKind::Relationships, &relationship.id, relationship)
    }

    async fn list_violations(&self, project_id: &str) -> StorageResult<Vec<ConsistencyViolation>> {
        self.list_records_filtered(TreeKind::Violations, project_id, |v: &ConsistencyViolation| {
            v.project_id.as_str()
        })
    }

    async fn put_violation(&self, violation: &ConsistencyViolation) -> StorageResult<()> {
        self.put_record(TreeKind::Violations, &violation.id, violation)
    }

    async fn list_plot_threads(&self, project_id: &str) -> StorageResult<Vec<PlotThread>> {
        self.list_records_filtered(TreeKind::PlotThreads, project_id, |t: &PlotThread| {
            t.project_id.as_str()
        })
    }

    async fn put_plot_thread(&self, thread: &PlotThread) -> StorageResult<()> {
        self.put_record(TreeKind::PlotThreads, &thread.id, thread)
    }

    async fn put_thought_log(&self, log: &ThoughtLog) -> StorageResult<()> {
        self.put_record(TreeKind::ThoughtLogs, &log.id, log)
    }

    async fn list_thought_logs(&self, project_id: &str) -> StorageResult<Vec<ThoughtLog>> {
        self.list_records_filtered(TreeKind::ThoughtLogs, project_id, |l: &ThoughtLog| {
            l.project_id.as_str()
        })
    }

    async fn put_usage_event(&self, event: &AiUsageEvent) -> StorageResult<()> {
        self.put_record(TreeKind::UsageEvents, &event.id, event)
    }

    async fn list_usage_events(&self, project_id: &str) -> StorageResult<Vec<AiUsageEvent>> {
        self.list_records_filtered(TreeKind::UsageEvents, project_id, |e: &AiUsageEvent| {
            e.project_id.as_str()
        })
    }

    async fn append_activity_log(&self, entry: &ActivityLogEntry) -> StorageResult<()> {
        self.put_record(TreeKind::ActivityLog, &entry.id, entry)
    }

    async fn append_milestone(&self, entry: &MilestoneEntry) -> StorageResult<()> {
        self.put_record(TreeKind::Milestones, &entry.id, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProjectFlags, ProjectStatus};
    use chrono::Utc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_then_get_project_survives_cache_bypass() {
        let dir = tempdir().unwrap();
        let store = SledStorageBackend::open(dir.path()).unwrap();
        let project = Project {
            id: "p1".into(),
            title: "Test Novel".into(),
            premise: "premise".into(),
            genre: "scifi".into(),
            tone: None,
            target_chapter_count: 5,
            min_words_per_chapter: 1500,
            max_words_per_chapter: 3000,
            flags: ProjectFlags::default(),
            style_guide_ref: None,
            extended_guide_ref: None,
            series_ref: None,
            pseudonym_ref: None,
            status: ProjectStatus::Draft,
            generation_token: None,
            revision_cycle: 0,
            consecutive_high_scores: 0,
            qa_audit_completed: false,
            chapter_correction_counts: Default::default(),
            resolved_issue_hashes: Default::default(),
            cumulative_input_tokens: 0,
            cumulative_output_tokens: 0,
            cumulative_thinking_tokens: 0,
            final_score: None,
            final_review_result: None,
            objective_evaluation: None,
            beta_reader_report: None,
            qa_audit_report: None,
            rewrite_guidance: None,
            correction_cancelled: false,
            externally_cancelled: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.put_project(&project).await.unwrap();
        store.cache.clear();
        let fetched = store.get_project("p1").await.unwrap();
        assert_eq!(fetched.genre, "scifi");
    }
}
