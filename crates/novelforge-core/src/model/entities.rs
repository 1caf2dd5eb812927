//! Normalized Consistency DB rows (§3). `world_bible::sync` folds these into
//! the derived [`crate::model::WorldBible`] projection; nothing else reads them directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// World entity kinds (§3): `CHARACTER | PHYSICAL_TRAIT | PERSONAL_ITEM |
/// LOCATION | OBJECT | EVIDENCE | SECRET`. Each drives its own World Bible
/// sync rule (§4.5): characters and physical traits fold into the character
/// roster, personal items append to their owner's `personal_items`, locations
/// and objects upsert by name into their own lists, and secrets append to
/// every `known_by` character's `known_secrets`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Character,
    PhysicalTrait,
    PersonalItem,
    Location,
    Object,
    Evidence,
    Secret,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldEntity {
    pub id: String,
    pub project_id: String,
    pub entity_type: EntityType,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Attribute key -> value; keys ending in `_INMUTABLE` are death/physical
    /// constants enforced by `consistency::death_gate` and attribute validators (§4.6).
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub is_dead: bool,
    #[serde(default)]
    pub death_chapter: Option<i32>,
    #[serde(default)]
    pub first_seen_chapter: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldRule {
    pub id: String,
    pub project_id: String,
    pub statement: String,
    #[serde(default)]
    pub chapter_established: Option<i32>,
    #[serde(default)]
    pub superseded_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Ally,
    Rival,
    Family,
    Romantic,
    Employer,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelationship {
    pub id: String,
    pub project_id: String,
    pub entity_a: String,
    pub entity_b: String,
    pub kind: RelationshipKind,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub chapter_established: Option<i32>,
}
