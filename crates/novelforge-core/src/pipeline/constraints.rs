//! Consistency constraints builder (§4.2 step 3): assembles the block of
//! hard constraints handed to the Chapter Architect and Ghostwriter prompts
//! before any scene is planned or written, so capability limits and dangling
//! plot threads are enforced by construction rather than caught after the fact.

use crate::model::{PersistentInjury, PlotThread, PlotThreadStatus, Project, WorldBible};

use super::OutlineEntry;

/// Fully assembled constraint block for one chapter's generation (§4.2 step 3).
#[derive(Debug, Clone, Default)]
pub struct ConsistencyConstraints {
    /// One line per dead or injured character describing what they can and
    /// cannot physically do, e.g. "PUEDE: sentarse; NO PUEDE: correr, saltar".
    pub character_capabilities: Vec<String>,
    /// Standing World Rules in force as of this chapter.
    pub world_rules: Vec<String>,
    /// Plot threads open long enough to need resolution pressure in this chapter.
    pub plot_urgency: Vec<String>,
    /// Free-text guidance carried over from a prior correction cycle, if any.
    pub rewrite_guidance: Option<String>,
}

impl ConsistencyConstraints {
    /// Flattens the constraint block into the prompt-ready text handed to
    /// the Chapter Architect / Ghostwriter.
    pub fn to_prompt_block(&self) -> String {
        let mut lines = Vec::new();
        if !self.character_capabilities.is_empty() {
            lines.push("CHARACTER CAPABILITY CONSTRAINTS:".to_string());
            lines.extend(self.character_capabilities.iter().cloned());
        }
        if !self.world_rules.is_empty() {
            lines.push("ESTABLISHED WORLD RULES:".to_string());
            lines.extend(self.world_rules.iter().cloned());
        }
        if !self.plot_urgency.is_empty() {
            lines.push("PLOT THREADS NEEDING ATTENTION:".to_string());
            lines.extend(self.plot_urgency.iter().cloned());
        }
        if let Some(guidance) = &self.rewrite_guidance {
            lines.push(format!("REWRITE GUIDANCE FROM PRIOR CYCLE: {guidance}"));
        }
        lines.join("\n")
    }
}

/// Number of chapters an open plot thread can go untouched before it's
/// flagged as needing resolution pressure (loosely grounded on the spec's
/// "no orphan threads referenced in fewer than 3 chapters" final-review check).
const PLOT_THREAD_URGENCY_AGE: i32 = 5;

fn capability_line_for_injury(character_name: &str, injury: &PersistentInjury) -> String {
    let description = injury.description.to_lowercase();
    let (can_not, with_difficulty, can) = if description.contains("leg")
        || description.contains("ankle")
        || description.contains("knee")
    {
        ("run, jump", "walk with a limp", "sit, use their hands")
    } else if description.contains("arm") || description.contains("hand") || description.contains("wrist") {
        ("fight, climb, write", "carry light objects", "walk, speak")
    } else if description.contains("eye") || description.contains("sight") || description.contains("blind") {
        ("read, aim, notice visual detail", "navigate a familiar room", "hear, speak, touch")
    } else {
        ("exert themselves strenuously", "move carefully", "rest, speak")
    };
    format!(
        "{character_name} ({description}, ch. {}): CANNOT: {can_not}; WITH DIFFICULTY: {with_difficulty}; CAN: {can}.",
        injury.chapter_introduced
    )
}

/// Builds the full constraint block for the chapter at `entry` (§4.2 step 3).
pub fn build_consistency_constraints(
    world_bible: &WorldBible,
    plot_threads: &[PlotThread],
    project: &Project,
    entry: &OutlineEntry,
) -> ConsistencyConstraints {
    let mut character_capabilities = Vec::new();

    for character in &world_bible.characters {
        if character.is_dead {
            character_capabilities.push(format!(
                "{} is dead (since chapter {}): must not appear alive, speaking, or acting in any chapter after that point.",
                character.name,
                character.death_chapter.unwrap_or(entry.number)
            ));
            continue;
        }
        for injury in &character.injuries {
            if injury.healed {
                continue;
            }
            character_capabilities.push(capability_line_for_injury(&character.name, injury));
        }
    }

    let plot_urgency = plot_threads
        .iter()
        .filter(|t| t.status == PlotThreadStatus::Open)
        .filter(|t| entry.number - t.chapter_introduced >= PLOT_THREAD_URGENCY_AGE)
        .map(|t| {
            format!(
                "\"{}\" has been open since chapter {} with no resolution; consider advancing or closing it.",
                t.description, t.chapter_introduced
            )
        })
        .collect();

    ConsistencyConstraints {
        character_capabilities,
        world_rules: world_bible.rules_summary.clone(),
        plot_urgency,
        rewrite_guidance: project.rewrite_guidance.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CharacterProfile, StructuralRole};
    use std::collections::HashMap;

    fn project_with_guidance(guidance: Option<&str>) -> Project {
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
            rewrite_guidance: guidance.map(String::from),
            correction_cancelled: false,
            externally_cancelled: false,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn entry(number: i32) -> OutlineEntry {
        OutlineEntry {
            number,
            title: "Chapter".into(),
            summary: "summary".into(),
            key_event: "event".into(),
            structural_role: None,
        }
    }

    #[test]
    fn dead_character_produces_hard_constraint() {
        let mut bible = WorldBible {
            project_id: "p1".into(),
            characters: vec![],
            rules_summary: vec![],
            relationships_summary: vec![],
            plot_outline: None,
            locations: vec![],
            objects: vec![],
            as_of_chapter: 6,
        };
        bible.characters.push(CharacterProfile {
            entity_id: "e1".into(),
            name: "Alex".into(),
            role: StructuralRole::Protagonist,
            is_dead: true,
            death_chapter: Some(4),
            injuries: vec![],
            immutable_attributes: HashMap::new(),
            mutable_attributes: HashMap::new(),
            last_seen_chapter: None,
        personal_items: vec![],
        known_secrets: vec![],
        });
        let constraints = build_consistency_constraints(&bible, &[], &project_with_guidance(None), &entry(6));
        assert!(constraints.character_capabilities[0].contains("is dead"));
    }

    #[test]
    fn leg_injury_produces_can_cannot_lines() {
        let mut bible = WorldBible {
            project_id: "p1".into(),
            characters: vec![],
            rules_summary: vec![],
            relationships_summary: vec![],
            plot_outline: None,
            locations: vec![],
            objects: vec![],
            as_of_chapter: 6,
        };
        bible.characters.push(CharacterProfile {
            entity_id: "e1".into(),
            name: "Alex".into(),
            role: StructuralRole::Protagonist,
            is_dead: false,
            death_chapter: None,
            injuries: vec![PersistentInjury {
                description: "broken leg".into(),
                chapter_introduced: 5,
                healed: false,
                healed_chapter: None,
            }],
            immutable_attributes: HashMap::new(),
            mutable_attributes: HashMap::new(),
            last_seen_chapter: None,
        personal_items: vec![],
        known_secrets: vec![],
        });
        let constraints = build_consistency_constraints(&bible, &[], &project_with_guidance(None), &entry(6));
        let line = &constraints.character_capabilities[0];
        assert!(line.contains("CANNOT: run, jump"));
        assert!(line.contains("WITH DIFFICULTY: walk with a limp"));
    }

    #[test]
    fn long_open_thread_gets_urgency_note() {
        let bible = WorldBible {
            project_id: "p1".into(),
            characters: vec![],
            rules_summary: vec![],
            relationships_summary: vec![],
            plot_outline: None,
            locations: vec![],
            objects: vec![],
            as_of_chapter: 10,
        };
        let threads = vec![PlotThread {
            id: "t1".into(),
            project_id: "p1".into(),
            description: "find the amulet".into(),
            chapter_introduced: 1,
            chapter_resolved: None,
            status: PlotThreadStatus::Open,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }];
        let constraints = build_consistency_constraints(&bible, &threads, &project_with_guidance(None), &entry(10));
        assert_eq!(constraints.plot_urgency.len(), 1);
    }

    #[test]
    fn rewrite_guidance_surfaces_in_prompt_block() {
        let bible = WorldBible {
            project_id: "p1".into(),
            characters: vec![],
            rules_summary: vec![],
            relationships_summary: vec![],
            plot_outline: None,
            locations: vec![],
            objects: vec![],
            as_of_chapter: 1,
        };
        let constraints = build_consistency_constraints(
            &bible,
            &[],
            &project_with_guidance(Some("tighten the pacing")),
            &entry(1),
        );
        assert!(constraints.to_prompt_block().contains("tighten the pacing"));
    }
}
