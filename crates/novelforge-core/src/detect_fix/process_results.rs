//! Pure bookkeeping logic for processing one cycle's Final Reviewer output
//! (§4.4 step 4): stable-hash dedup against prior resolutions, structural
//! auto-resolve for chapters that have already eaten their correction
//! budget, merge-request and resurrection reinterpretation, persistent-issue
//! escalation, and the convergence gate (§4.4 step 5).

use crate::model::{CharacterProfile, Project, ViolationSeverity};
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub struct ReviewIssue {
    pub category: String,
    pub affected_chapters: Vec<i32>,
    pub description: String,
    pub severity: ViolationSeverity,
    pub locator: Option<String>,
    pub suggested_replacement: Option<String>,
}

impl ReviewIssue {
    pub fn severity_rank(&self) -> u8 {
        match self.severity {
            ViolationSeverity::Low => 0,
            ViolationSeverity::Medium => 1,
            ViolationSeverity::High => 2,
            ViolationSeverity::Critical => 3,
        }
    }

    /// The lowest affected chapter, used wherever a single representative
    /// chapter number is needed (grouping, logging). An issue with no
    /// affected chapters (malformed agent output) reports chapter 0.
    pub fn primary_chapter(&self) -> i32 {
        self.affected_chapters.iter().copied().min().unwrap_or(0)
    }

    pub fn issue_hash(&self) -> String {
        crate::issue_hash::compute_issue_hash_multi(&self.affected_chapters, &self.category, &self.description)
    }
}

impl<'de> serde::Deserialize<'de> for ReviewIssue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Field names carry `serde(alias = ...)` for the Spanish keys the Final
        // Reviewer agent's own JSON schema actually uses (categoria,
        // capitulos_afectados, descripcion, severidad, instrucciones_correccion).
        #[derive(serde::Deserialize)]
        struct Raw {
            #[serde(alias = "categoria", default = "default_category")]
            category: String,
            #[serde(alias = "capitulos_afectados", default)]
            affected_chapters: Vec<i32>,
            #[serde(default)]
            chapter_number: Option<i32>,
            #[serde(alias = "descripcion")]
            description: String,
            #[serde(alias = "severidad", default)]
            severity: Option<String>,
            #[serde(default)]
            locator: Option<String>,
            #[serde(alias = "instrucciones_correccion", default)]
            suggested_replacement: Option<String>,
        }
        let raw = Raw::deserialize(deserializer)?;
        let severity = match raw.severity.as_deref().map(str::to_lowercase).as_deref() {
            Some("critical") => ViolationSeverity::Critical,
            Some("high") => ViolationSeverity::High,
            Some("low") => ViolationSeverity::Low,
            _ => ViolationSeverity::Medium,
        };
        // Tolerate an older single-chapter response shape (`chapter_number`)
        // alongside the current multi-chapter `affected_chapters` field.
        let affected_chapters = if !raw.affected_chapters.is_empty() {
            raw.affected_chapters
        } else if let Some(n) = raw.chapter_number {
            vec![n]
        } else {
            Vec::new()
        };
        Ok(ReviewIssue {
            category: raw.category,
            affected_chapters,
            description: raw.description,
            severity,
            locator: raw.locator,
            suggested_replacement: raw.suggested_replacement,
        })
    }
}

fn default_category() -> String {
    "final_review".to_string()
}

impl serde::Serialize for ReviewIssue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("ReviewIssue", 6)?;
        s.serialize_field("category", &self.category)?;
        s.serialize_field("affected_chapters", &self.affected_chapters)?;
        s.serialize_field("description", &self.description)?;
        s.serialize_field("severity", &format!("{:?}", self.severity).to_lowercase())?;
        s.serialize_field("locator", &self.locator)?;
        s.serialize_field("suggested_replacement", &self.suggested_replacement)?;
        s.end()
    }
}

/// Groups issues by chapter number. An issue spanning several chapters is
/// exploded into one group-entry per affected chapter, each carrying the
/// full original issue (with its complete `affected_chapters` list intact
/// for hashing) so a correction pass for any one chapter sees the whole picture.
pub fn aggregate_by_chapter(issues: &[ReviewIssue]) -> HashMap<i32, Vec<ReviewIssue>> {
    let mut grouped: HashMap<i32, Vec<ReviewIssue>> = HashMap::new();
    for issue in issues {
        if issue.affected_chapters.is_empty() {
            grouped.entry(issue.primary_chapter()).or_default().push(issue.clone());
            continue;
        }
        for &chapter in &issue.affected_chapters {
            grouped.entry(chapter).or_default().push(issue.clone());
        }
    }
    grouped
}

impl Clone for ReviewIssue {
    fn clone(&self) -> Self {
        Self {
            category: self.category.clone(),
            affected_chapters: self.affected_chapters.clone(),
            description: self.description.clone(),
            severity: self.severity,
            locator: self.locator.clone(),
            suggested_replacement: self.suggested_replacement.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionSeverity {
    Light,
    Full,
}

/// Picks full vs. light correction for a chapter based on its worst issue
/// (§4.4 step 2: pre-review correction severity by issue severity).
pub fn correction_severity_for(issues: &[ReviewIssue]) -> CorrectionSeverity {
    if issues.iter().any(|i| matches!(i.severity, ViolationSeverity::Critical | ViolationSeverity::High)) {
        CorrectionSeverity::Full
    } else {
        CorrectionSeverity::Light
    }
}

/// Chapters that have already eaten this many *structural*-pattern
/// corrections are auto-resolved rather than corrected again (§4.4 step 4).
/// General (non-structural) issues instead respect `config.max_corrections_per_chapter`.
pub const STRUCTURAL_AUTO_RESOLVE_THRESHOLD: u32 = 2;

/// Keywords identifying a structural-pattern issue (move/reorder/rename, or
/// a beginning/ending placement complaint) rather than a prose-level one.
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "move", "reorder", "re-order", "rename", "beginning of the novel", "end of the novel",
    "beginning of the book", "end of the book", "opening chapter", "final chapter",
    "out of order", "wrong position",
];

/// Keywords identifying a request to merge/fuse/combine two chapters, which
/// is reinterpreted as a pacing ("ritmo") issue rather than acted on literally (§4.4 step 4).
const MERGE_KEYWORDS: &[&str] = &["merge", "fuse", "combine"];

fn is_structural_pattern(description: &str) -> bool {
    let lower = description.to_lowercase();
    STRUCTURAL_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn is_merge_request(description: &str) -> bool {
    let lower = description.to_lowercase();
    MERGE_KEYWORDS.iter().any(|k| lower.contains(k)) && lower.contains("chapter")
}

fn mentions_resurrection(description: &str) -> bool {
    let lower = description.to_lowercase();
    lower.contains("resurrect")
        || lower.contains("back from the dead")
        || lower.contains("alive again")
        || (lower.contains("dead") && lower.contains("appears") )
        || (lower.contains("died") && lower.contains("alive"))
}

fn dead_character_mentioned<'a>(description: &str, characters: &'a [CharacterProfile]) -> Option<&'a CharacterProfile> {
    let lower = description.to_lowercase();
    characters
        .iter()
        .filter(|c| c.is_dead && c.death_chapter.is_some())
        .find(|c| lower.contains(&c.name.to_lowercase()))
}

#[derive(Debug, Clone, Default)]
pub struct ProcessResultOutcome {
    pub carry_forward: Vec<ReviewIssue>,
    pub newly_resolved_hashes: HashSet<String>,
    pub structural_auto_resolved_chapters: HashSet<i32>,
    pub escalated_issue_hashes: HashSet<String>,
}

/// §4.4 step 4: filters this cycle's Final Reviewer issues against prior
/// resolutions (stable-hash dedup), reinterprets merge requests as pacing
/// issues, escalates resurrection contradictions across every chapter after
/// the character's death, auto-resolves structurally-capped chapters, and
/// escalates issues that have persisted across `persistent_issue_cycles`
/// consecutive cycles.
pub fn process_final_review_results(
    issues: &[ReviewIssue],
    project: &Project,
    persistent_issue_cycles: u32,
    max_corrections_per_chapter: u32,
    characters: &[CharacterProfile],
    total_chapters: i32,
) -> ProcessResultOutcome {
    let mut outcome = ProcessResultOutcome::default();

    for issue in issues {
        let mut issue = issue.clone();

        if is_merge_request(&issue.description) {
            issue.category = "ritmo".to_string();
        }

        if mentions_resurrection(&issue.description) {
            if let Some(character) = dead_character_mentioned(&issue.description, characters) {
                let death_chapter = character.death_chapter.unwrap_or(0);
                let last = total_chapters.max(death_chapter);
                issue.affected_chapters = (death_chapter + 1..=last).collect();
                if issue.affected_chapters.is_empty() {
                    issue.affected_chapters = vec![death_chapter + 1];
                }
                issue.suggested_replacement = Some(format!(
                    "Remove every post-death appearance of {} introduced after chapter {death_chapter}; the character is confirmed dead and must not reappear.",
                    character.name
                ));
                issue.severity = ViolationSeverity::Critical;
                let hash = issue.issue_hash();
                outcome.escalated_issue_hashes.insert(hash);
                outcome.carry_forward.push(issue);
                continue;
            }
        }

        let hash = issue.issue_hash();
        if project.resolved_issue_hashes.contains(&hash) {
            outcome.newly_resolved_hashes.insert(hash);
            continue;
        }

        let chapter_correction_count = issue
            .affected_chapters
            .iter()
            .map(|&c| project.correction_count_for(c))
            .max()
            .unwrap_or(0);

        if is_structural_pattern(&issue.description) {
            if chapter_correction_count >= STRUCTURAL_AUTO_RESOLVE_THRESHOLD {
                outcome.structural_auto_resolved_chapters.insert(issue.primary_chapter());
                outcome.newly_resolved_hashes.insert(hash);
                continue;
            }
        } else if chapter_correction_count >= max_corrections_per_chapter {
            outcome.structural_auto_resolved_chapters.insert(issue.primary_chapter());
            outcome.newly_resolved_hashes.insert(hash);
            continue;
        }

        let cycle_count = project.persistent_issue_count(&hash) + 1;
        if cycle_count >= persistent_issue_cycles {
            outcome.escalated_issue_hashes.insert(hash.clone());
        }
        outcome.carry_forward.push(issue);
    }

    outcome
}

/// §4.4 step 5: convergence requires `score >= high_score_threshold` AND
/// zero outstanding issues, sustained for `consecutive_needed` cycles in a row.
/// Returns `(converged, updated_consecutive_count)`.
pub fn convergence_gate(
    score: f64,
    outstanding_issue_count: usize,
    high_score_threshold: f64,
    consecutive_high_scores: u32,
    consecutive_needed: u32,
) -> (bool, u32) {
    if score >= high_score_threshold && outstanding_issue_count == 0 {
        let updated = consecutive_high_scores + 1;
        (updated >= consecutive_needed, updated)
    } else {
        (false, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn deserializes_spanish_keyed_agent_output() {
        let json = r#"{
            "categoria": "consistencia",
            "capitulos_afectados": [3, 4],
            "descripcion": "el color de ojos cambia sin razón",
            "severidad": "high",
            "instrucciones_correccion": "restaurar ojos azules"
        }"#;
        let issue: ReviewIssue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.category, "consistencia");
        assert_eq!(issue.affected_chapters, vec![3, 4]);
        assert_eq!(issue.severity, ViolationSeverity::High);
        assert_eq!(issue.suggested_replacement.as_deref(), Some("restaurar ojos azules"));
    }

    fn project() -> Project {
        Project {
            id: "p1".into(),
            title: "t".into(),
            premise: "p".into(),
            genre: "g".into(),
            tone: None,
            target_chapter_count: 10,
            min_words_per_chapter: 1500,
            max_words_per_chapter: 3000,
            flags: Default::default(),
            style_guide_ref: None,
            extended_guide_ref: None,
            series_ref: None,
            pseudonym_ref: None,
            status: crate::model::ProjectStatus::Generating,
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

    fn issue(chapter: i32, desc: &str, severity: ViolationSeverity) -> ReviewIssue {
        ReviewIssue {
            category: "final_review".to_string(),
            affected_chapters: vec![chapter],
            description: desc.to_string(),
            severity,
            locator: None,
            suggested_replacement: None,
        }
    }

    #[test]
    fn already_resolved_issue_is_filtered_out() {
        let mut p = project();
        let i = issue(3, "dangling thread", ViolationSeverity::Medium);
        p.resolved_issue_hashes.insert(i.issue_hash());
        let outcome = process_final_review_results(&[i], &p, 3, 4, &[], 10);
        assert!(outcome.carry_forward.is_empty());
    }

    #[test]
    fn structural_issue_auto_resolves_after_threshold() {
        let mut p = project();
        p.chapter_correction_counts.insert("5".to_string(), 2);
        let i = issue(5, "move this scene to the beginning of the novel", ViolationSeverity::Low);
        let outcome = process_final_review_results(&[i], &p, 3, 4, &[], 10);
        assert!(outcome.structural_auto_resolved_chapters.contains(&5));
        assert!(outcome.carry_forward.is_empty());
    }

    #[test]
    fn non_structural_issue_survives_past_structural_threshold() {
        let mut p = project();
        p.chapter_correction_counts.insert("5".to_string(), 2);
        let i = issue(5, "minor style issue", ViolationSeverity::Low);
        let outcome = process_final_review_results(&[i], &p, 3, 4, &[], 10);
        assert!(outcome.structural_auto_resolved_chapters.is_empty());
        assert_eq!(outcome.carry_forward.len(), 1);
    }

    #[test]
    fn non_structural_issue_auto_resolves_at_general_cap() {
        let mut p = project();
        p.chapter_correction_counts.insert("5".to_string(), 4);
        let i = issue(5, "minor style issue", ViolationSeverity::Low);
        let outcome = process_final_review_results(&[i], &p, 3, 4, &[], 10);
        assert!(outcome.structural_auto_resolved_chapters.contains(&5));
    }

    #[test]
    fn persistent_issue_escalates_at_threshold() {
        let mut p = project();
        let i = issue(2, "recurring contradiction", ViolationSeverity::High);
        let hash = i.issue_hash();
        p.chapter_correction_counts
            .insert(format!("_persistentIssues:{hash}"), 2);
        let outcome = process_final_review_results(&[i], &p, 3, 4, &[], 10);
        assert!(outcome.escalated_issue_hashes.contains(&hash));
    }

    #[test]
    fn merge_request_is_reinterpreted_as_ritmo() {
        let p = project();
        let i = issue(4, "merge chapter 4 and chapter 5 for pacing", ViolationSeverity::Medium);
        let outcome = process_final_review_results(&[i], &p, 3, 4, &[], 10);
        assert_eq!(outcome.carry_forward[0].category, "ritmo");
    }

    #[test]
    fn resurrection_escalates_across_every_chapter_after_death() {
        let p = project();
        let character = CharacterProfile {
            entity_id: "e1".into(),
            name: "Dana Ruiz".into(),
            role: crate::model::StructuralRole::Supporting,
            is_dead: true,
            death_chapter: Some(4),
            injuries: vec![],
            immutable_attributes: Default::default(),
            mutable_attributes: Default::default(),
            last_seen_chapter: None,
            personal_items: vec![],
            known_secrets: vec![],
        };
        let i = issue(6, "Dana Ruiz appears alive again in this chapter", ViolationSeverity::High);
        let outcome = process_final_review_results(&[i], &p, 3, 4, &[character], 8);
        assert!(!outcome.carry_forward.is_empty());
        assert_eq!(outcome.carry_forward[0].affected_chapters, vec![5, 6, 7, 8]);
        assert!(!outcome.escalated_issue_hashes.is_empty());
    }

    #[test]
    fn convergence_requires_consecutive_high_scores() {
        let (converged, updated) = convergence_gate(9.5, 0, 9.0, 0, 2);
        assert!(!converged);
        assert_eq!(updated, 1);
        let (converged2, updated2) = convergence_gate(9.5, 0, 9.0, updated, 2);
        assert!(converged2);
        assert_eq!(updated2, 2);
    }

    #[test]
    fn nonzero_issues_resets_consecutive_count() {
        let (converged, updated) = convergence_gate(9.5, 1, 9.0, 1, 2);
        assert!(!converged);
        assert_eq!(updated, 0);
    }

    #[test]
    fn full_severity_escalation_for_critical_issue() {
        let issues = vec![issue(1, "x", ViolationSeverity::Critical)];
        assert_eq!(correction_severity_for(&issues), CorrectionSeverity::Full);
    }

    #[test]
    fn light_severity_for_only_low_issues() {
        let issues = vec![issue(1, "x", ViolationSeverity::Low)];
        assert_eq!(correction_severity_for(&issues), CorrectionSeverity::Light);
    }
}
