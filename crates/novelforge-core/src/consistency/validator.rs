//! Consistency Validator (§4.6): folds the universal consistency agent's
//! extracted facts/rules/relationships into the consistency DB, applying
//! death gating and write-once physical attributes before anything is
//! persisted.

use super::death_gate::{self, DeathVerdict};
use crate::model::{
    EntityRelationship, EntityType, RelationshipKind, ViolationSeverity, ViolationType, WorldEntity,
    WorldRule,
};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Attribute keys (~14) treated as write-once physical traits (§4.6): once
/// set, a matching key is renamed `<key>_INMUTABLE` and never overwritten.
pub const PHYSICAL_ATTRIBUTE_KEYS: &[&str] = &[
    "eyes",
    "eye_color",
    "hair",
    "hair_color",
    "height",
    "age",
    "build",
    "skin",
    "skin_tone",
    "weight",
    "scar",
    "tattoo",
    "voice",
    "posture",
];

pub const IMMUTABLE_SUFFIX: &str = "_INMUTABLE";

fn is_physical_attribute_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    PHYSICAL_ATTRIBUTE_KEYS.iter().any(|k| lower == *k)
}

/// A fact extracted by the universal consistency agent: an attribute update
/// targeting a named entity.
#[derive(Debug, Clone, Deserialize)]
pub struct NewFact {
    pub entity_name: String,
    #[serde(default = "default_entity_type")]
    pub entity_type: EntityType,
    pub key: String,
    pub value: String,
}

fn default_entity_type() -> EntityType {
    EntityType::Character
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRule {
    pub statement: String,
    #[serde(default)]
    pub related_character: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRelationship {
    pub entity_a: String,
    pub entity_b: String,
    pub kind: RelationshipKind,
    #[serde(default)]
    pub description: Option<String>,
}

/// Raw output of the universal consistency agent for one chapter (§4.6).
/// Parsed directly from the agent's JSON response in `pipeline::enforce_consistency`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsistencyAgentOutput {
    pub is_valid: bool,
    #[serde(default)]
    pub critical_error: Option<String>,
    #[serde(default)]
    pub correction_instructions: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub new_facts: Vec<NewFact>,
    #[serde(default)]
    pub new_rules: Vec<NewRule>,
    #[serde(default)]
    pub new_relationships: Vec<NewRelationship>,
}

impl ConsistencyAgentOutput {
    /// Fallback used when the agent's response can't be parsed as JSON: treat
    /// the chapter as clean rather than blocking generation on a malformed reply.
    pub fn clean_pass() -> Self {
        Self {
            is_valid: true,
            critical_error: None,
            correction_instructions: None,
            warnings: Vec::new(),
            new_facts: Vec::new(),
            new_rules: Vec::new(),
            new_relationships: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationViolation {
    pub violation_type: ViolationType,
    pub severity: ViolationSeverity,
    pub description: String,
}

/// Outcome of applying one chapter's consistency-agent output.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
    pub violations: Vec<ValidationViolation>,
    pub updated_entities: Vec<WorldEntity>,
    pub new_rules: Vec<WorldRule>,
    pub new_relationships: Vec<EntityRelationship>,
}

/// Applies one chapter's consistency-agent output against the existing
/// entity/rule store, producing the updated records to persist plus any
/// violations to record (§4.6, §4.7's death-gating invariant).
pub fn apply_consistency_output(
    chapter_number: i32,
    chapter_text: &str,
    output: &ConsistencyAgentOutput,
    existing_entities: &[WorldEntity],
    known_entity_names: &[String],
) -> ValidationResult {
    let mut violations = Vec::new();

    if let Some(critical) = &output.critical_error {
        let mut description = critical.clone();
        if let Some(instructions) = &output.correction_instructions {
            description = format!("{description}: {instructions}");
        }
        violations.push(ValidationViolation {
            violation_type: ViolationType::Other,
            severity: ViolationSeverity::Critical,
            description,
        });
    }

    for warning in &output.warnings {
        violations.push(ValidationViolation {
            violation_type: ViolationType::Other,
            severity: ViolationSeverity::High,
            description: warning.clone(),
        });
    }

    let mut by_name: HashMap<String, WorldEntity> = existing_entities
        .iter()
        .map(|e| (e.name.to_lowercase(), e.clone()))
        .collect();

    for fact in &output.new_facts {
        let is_death_proposal = death_gate::proposes_death_status(&fact.value);

        if is_death_proposal {
            match death_gate::evaluate_death_claim(chapter_text, &fact.entity_name) {
                DeathVerdict::Unconfirmed => {
                    apply_fact(
                        &mut by_name,
                        fact,
                        "inconsciente o gravemente herido",
                        chapter_number,
                    );
                    continue;
                }
                DeathVerdict::Confirmed => {
                    apply_fact(&mut by_name, fact, &fact.value, chapter_number);
                    continue;
                }
            }
        }

        apply_fact(&mut by_name, fact, &fact.value, chapter_number);
    }

    let mut new_rules = Vec::new();
    for rule in &output.new_rules {
        if let Some(character) = &rule.related_character {
            if death_gate::blocks_death_event_rule(&rule.statement, character, chapter_text) {
                violations.push(ValidationViolation {
                    violation_type: ViolationType::DeathGating,
                    severity: ViolationSeverity::Medium,
                    description: format!(
                        "blocked unconfirmed DEATH_EVENT rule for {character}: {}",
                        rule.statement
                    ),
                });
                continue;
            }
        }
        new_rules.push(WorldRule {
            id: Uuid::new_v4().to_string(),
            project_id: String::new(), // filled in by caller, which knows the project id
            statement: rule.statement.clone(),
            chapter_established: Some(chapter_number),
            superseded_by: None,
        });
    }

    let mut new_relationships = Vec::new();
    for relationship in &output.new_relationships {
        let known_a = known_entity_names
            .iter()
            .any(|n| n.eq_ignore_ascii_case(&relationship.entity_a))
            || by_name.contains_key(&relationship.entity_a.to_lowercase());
        let known_b = known_entity_names
            .iter()
            .any(|n| n.eq_ignore_ascii_case(&relationship.entity_b))
            || by_name.contains_key(&relationship.entity_b.to_lowercase());
        if !known_a || !known_b {
            continue; // §4.6: both subject and target must be known entities
        }
        new_relationships.push(EntityRelationship {
            id: Uuid::new_v4().to_string(),
            project_id: String::new(),
            entity_a: relationship.entity_a.clone(),
            entity_b: relationship.entity_b.clone(),
            kind: relationship.kind,
            description: relationship.description.clone(),
            chapter_established: Some(chapter_number),
        });
    }

    ValidationResult {
        is_valid: output.is_valid && violations.iter().all(|v| v.severity != ViolationSeverity::Critical),
        error: output.critical_error.clone().map(|c| {
            output
                .correction_instructions
                .as_ref()
                .map(|i| format!("{c}: {i}"))
                .unwrap_or(c)
        }),
        violations,
        updated_entities: by_name.into_values().collect(),
        new_rules,
        new_relationships,
    }
}

fn apply_fact(
    by_name: &mut HashMap<String, WorldEntity>,
    fact: &NewFact,
    effective_value: &str,
    chapter_number: i32,
) {
    let key = fact.entity_name.to_lowercase();
    let now = Utc::now();
    let entity = by_name.entry(key).or_insert_with(|| WorldEntity {
        id: Uuid::new_v4().to_string(),
        project_id: String::new(),
        entity_type: fact.entity_type,
        name: fact.entity_name.clone(),
        aliases: Vec::new(),
        attributes: HashMap::new(),
        is_dead: false,
        death_chapter: None,
        first_seen_chapter: Some(chapter_number),
        created_at: now,
        updated_at: now,
    });

    let storage_key = if is_physical_attribute_key(&fact.key) {
        format!("{}{IMMUTABLE_SUFFIX}", fact.key)
    } else {
        fact.key.clone()
    };

    if storage_key.ends_with(IMMUTABLE_SUFFIX) && entity.attributes.contains_key(&storage_key) {
        // write-once: never overwrite a set physical attribute
    } else {
        entity.attributes.insert(storage_key, effective_value.to_string());
    }

    if death_gate::proposes_death_status(effective_value) {
        if !entity.is_dead {
            entity.is_dead = true;
            entity.death_chapter = Some(chapter_number);
        }
    }
    entity.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_with_death_fact(value: &str) -> ConsistencyAgentOutput {
        ConsistencyAgentOutput {
            is_valid: true,
            critical_error: None,
            correction_instructions: None,
            warnings: vec![],
            new_facts: vec![NewFact {
                entity_name: "Alex".into(),
                entity_type: EntityType::Character,
                key: "vital_status".into(),
                value: value.into(),
            }],
            new_rules: vec![],
            new_relationships: vec![],
        }
    }

    #[test]
    fn unconfirmed_death_strips_marker_and_records_unconscious() {
        let text = "A Alex lo drogaron y quedo inconsciente tras el ataque.";
        let output = output_with_death_fact("muerto");
        let result = apply_consistency_output(4, text, &output, &[], &["Alex".to_string()]);
        let entity = result
            .updated_entities
            .iter()
            .find(|e| e.name == "Alex")
            .unwrap();
        assert!(!entity.is_dead);
        assert_eq!(
            entity.attributes.get("vital_status").map(String::as_str),
            Some("inconsciente o gravemente herido")
        );
    }

    #[test]
    fn confirmed_death_marks_entity_dead() {
        let text = "Alex cayo al suelo. Alex murio por las heridas recibidas en la batalla.";
        let output = output_with_death_fact("muerto");
        let result = apply_consistency_output(4, text, &output, &[], &["Alex".to_string()]);
        let entity = result
            .updated_entities
            .iter()
            .find(|e| e.name == "Alex")
            .unwrap();
        assert!(entity.is_dead);
        assert_eq!(entity.death_chapter, Some(4));
    }

    #[test]
    fn physical_attribute_is_write_once() {
        let existing = WorldEntity {
            id: "e1".into(),
            project_id: "p1".into(),
            entity_type: EntityType::Character,
            name: "Alex".into(),
            aliases: vec![],
            attributes: HashMap::from([("eyes_INMUTABLE".to_string(), "green".to_string())]),
            is_dead: false,
            death_chapter: None,
            first_seen_chapter: Some(1),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let output = ConsistencyAgentOutput {
            is_valid: true,
            critical_error: None,
            correction_instructions: None,
            warnings: vec![],
            new_facts: vec![NewFact {
                entity_name: "Alex".into(),
                entity_type: EntityType::Character,
                key: "eyes".into(),
                value: "blue".into(),
            }],
            new_rules: vec![],
            new_relationships: vec![],
        };
        let result = apply_consistency_output(5, "text", &output, &[existing], &["Alex".to_string()]);
        let entity = result.updated_entities.iter().find(|e| e.name == "Alex").unwrap();
        assert_eq!(
            entity.attributes.get("eyes_INMUTABLE").map(String::as_str),
            Some("green")
        );
    }

    #[test]
    fn relationship_requires_both_entities_known() {
        let output = ConsistencyAgentOutput {
            is_valid: true,
            critical_error: None,
            correction_instructions: None,
            warnings: vec![],
            new_facts: vec![],
            new_rules: vec![],
            new_relationships: vec![NewRelationship {
                entity_a: "Alex".into(),
                entity_b: "Unknown Stranger".into(),
                kind: RelationshipKind::Ally,
                description: None,
            }],
        };
        let result = apply_consistency_output(2, "text", &output, &[], &["Alex".to_string()]);
        assert!(result.new_relationships.is_empty());
    }

    #[test]
    fn critical_error_marks_result_invalid() {
        let output = ConsistencyAgentOutput {
            is_valid: false,
            critical_error: Some("timeline contradiction".into()),
            correction_instructions: Some("move scene to chapter 3".into()),
            warnings: vec![],
            new_facts: vec![],
            new_rules: vec![],
            new_relationships: vec![],
        };
        let result = apply_consistency_output(3, "text", &output, &[], &[]);
        assert!(!result.is_valid);
        assert_eq!(
            result.error.as_deref(),
            Some("timeline contradiction: move scene to chapter 3")
        );
    }
}
