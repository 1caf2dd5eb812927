//! In-memory storage backend backed by `DashMap`, used by unit and
//! integration tests so they never touch disk.

use super::{ActivityLogEntry, MilestoneEntry, StorageBackend, StorageResult};
use crate::error::StorageError;
use crate::model::{
    AiUsageEvent, Chapter, ConsistencyViolation, EntityRelationship, PlotThread, Project,
    ThoughtLog, WorldEntity, WorldRule,
};
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryStorageBackend {
    projects: DashMap<String, Project>,
    chapters: DashMap<(String, i32), Chapter>,
    world_entities: DashMap<String, WorldEntity>,
    world_rules: DashMap<String, WorldRule>,
    relationships: DashMap<String, EntityRelationship>,
    violations: DashMap<String, ConsistencyViolation>,
    plot_threads: DashMap<String, PlotThread>,
    thought_logs: DashMap<String, ThoughtLog>,
    usage_events: DashMap<String, AiUsageEvent>,
    activity_log: DashMap<String, ActivityLogEntry>,
    milestones: DashMap<String, MilestoneEntry>,
}

impl InMemoryStorageBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn by_project<'a, V: Clone>(
    map: &'a DashMap<String, V>,
    project_id: &str,
    get_project_id: impl Fn(&V) -> &str,
) -> Vec<V> {
    map.iter()
        .filter(|e| get_project_id(e.value()) == project_id)
        .map(|e| e.value().clone())
        .collect()
}

#[async_trait]
impl StorageBackend for InMemoryStorageBackend {
    async fn get_project(&self, id: &str) -> StorageResult<Project> {
        self.projects
            .get(id)
            .map(|p| p.clone())
            .ok_or_else(|| StorageError::NotFound(format!("project {id}")))
    }

    async fn put_project(&self, project: &Project) -> StorageResult<()> {
        self.projects.insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn get_chapter(&self, project_id: &str, number: i32) -> StorageResult<Option<Chapter>> {
        let norm = crate::normalize::normalize_chapter(number);
        Ok(self
            .chapters
            .get(&(project_id.to_string(), norm))
            .map(|c| c.clone()))
    }

    async fn put_chapter(&self, chapter: &Chapter) -> StorageResult<()> {
        let norm = crate::normalize::normalize_chapter(chapter.number);
        self.chapters
            .insert((chapter.project_id.clone(), norm), chapter.clone());
        Ok(())
    }

    async fn list_chapters(&self, project_id: &str) -> StorageResult<Vec<Chapter>> {
        let mut out: Vec<Chapter> = self
            .chapters
            .iter()
            .filter(|e| e.key().0 == project_id)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|c| crate::normalize::normalize_chapter(c.number));
        Ok(out)
    }

    async fn list_world_entities(&self, project_id: &str) -> StorageResult<Vec<WorldEntity>> {
        Ok(by_project(&self.world_entities, project_id, |e| {
            e.project_id.as_str()
        }))
    }

    async fn put_world_entity(&self, entity: &WorldEntity) -> StorageResult<()> {
        self.world_entities
            .insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn list_world_rules(&self, project_id: &str) -> StorageResult<Vec<WorldRule>> {
        Ok(by_project(&self.world_rules, project_id, |r| {
            r.project_id.as_str()
        }))
    }

    async fn put_world_rule(&self, rule: &WorldRule) -> StorageResult<()> {
        self.world_rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn list_relationships(&self, project_id: &str) -> StorageResult<Vec<EntityRelationship>> {
        Ok(by_project(&self.relationships, project_id, |r| {
            r.project_id.as_str()
        }))
    }

    async fn put_relationship(&self, relationship: &EntityRelationship) -> StorageResult<()> {
        self.relationships
            .insert(relationship.id.clone(), relationship.clone());
        Ok(())
    }

    async fn list_violations(&self, project_id: &str) -> StorageResult<Vec<ConsistencyViolation>> {
        Ok(by_project(&self.violations, project_id, |v| {
            v.project_id.as_str()
        }))
    }

    async fn put_violation(&self, violation: &ConsistencyViolation) -> StorageResult<()> {
        self.violations
            .insert(violation.id.clone(), violation.clone());
        Ok(())
    }

    async fn list_plot_threads(&self, project_id: &str) -> StorageResult<Vec<PlotThread>> {
        Ok(by_project(&self.plot_threads, project_id, |t| {
            t.project_id.as_str()
        }))
    }

    async fn put_plot_thread(&self, thread: &PlotThread) -> StorageResult<()> {
        self.plot_threads.insert(thread.id.clone(), thread.clone());
        Ok(())
    }

    async fn put_thought_log(&self, log: &ThoughtLog) -> StorageResult<()> {
        self.thought_logs.insert(log.id.clone(), log.clone());
        Ok(())
    }

    async fn list_thought_logs(&self, project_id: &str) -> StorageResult<Vec<ThoughtLog>> {
        Ok(by_project(&self.thought_logs, project_id, |l| {
            l.project_id.as_str()
        }))
    }

    async fn put_usage_event(&self, event: &AiUsageEvent) -> StorageResult<()> {
        self.usage_events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn list_usage_events(&self, project_id: &str) -> StorageResult<Vec<AiUsageEvent>> {
        Ok(by_project(&self.usage_events, project_id, |e| {
            e.project_id.as_str()
        }))
    }

    async fn append_activity_log(&self, entry: &ActivityLogEntry) -> StorageResult<()> {
        self.activity_log.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn append_milestone(&self, entry: &MilestoneEntry) -> StorageResult<()> {
        self.milestones.insert(entry.id.clone(), entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProjectFlags, ProjectStatus};
    use chrono::Utc;

    fn sample_project(id: &str) -> Project {
        Project {
            id: id.to_string(),
            title: "Test Novel".into(),
            premise: "A premise".into(),
            genre: "fantasy".into(),
            tone: None,
            target_chapter_count: 10,
            min_words_per_chapter: 1500,
            max_words_per_chapter: 4000,
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
        }
    }

    #[tokio::test]
    async fn put_then_get_project_round_trips() {
        let store = InMemoryStorageBackend::new();
        let project = sample_project("p1");
        store.put_project(&project).await.unwrap();
        let fetched = store.get_project("p1").await.unwrap();
        assert_eq!(fetched.title, "Test Novel");
    }

    #[tokio::test]
    async fn get_missing_project_returns_not_found() {
        let store = InMemoryStorageBackend::new();
        let err = store.get_project("missing").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn chapter_lookup_normalizes_epilogue_alias() {
        let store = InMemoryStorageBackend::new();
        let chapter = Chapter {
            id: "c1".into(),
            project_id: "p1".into(),
            number: 998,
            title: "Epilogue".into(),
            scene_plan: vec![],
            content: String::new(),
            summary: None,
            status: crate::model::ChapterStatus::Drafted,
            word_count: 0,
            score: None,
            generation_token: None,
            correction_attempts: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.put_chapter(&chapter).await.unwrap();
        let by_alias = store.get_chapter("p1", -1).await.unwrap();
        assert!(by_alias.is_some());
        assert_eq!(by_alias.unwrap().title, "Epilogue");
    }
}
