//! World Bible: the derived read-side projection over the Consistency DB
//! (World Entities, World Rules, Entity Relationships). Never written to
//! directly — rebuilt by `world_bible::sync` after each chapter (§4.5).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralRole {
    Protagonist,
    Antagonist,
    Supporting,
    #[default]
    Minor,
}

/// A physical injury tracked separately from general character attributes so
/// healing/aggravation can be reasoned about without touching `_INMUTABLE` state (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentInjury {
    pub description: String,
    pub chapter_introduced: i32,
    #[serde(default)]
    pub healed: bool,
    #[serde(default)]
    pub healed_chapter: Option<i32>,
}

/// Derived per-character projection surfaced to agent prompts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub entity_id: String,
    pub name: String,
    pub role: StructuralRole,
    #[serde(default)]
    pub is_dead: bool,
    #[serde(default)]
    pub death_chapter: Option<i32>,
    #[serde(default)]
    pub injuries: Vec<PersistentInjury>,
    /// Physical attributes whose keys end in `_INMUTABLE` (eye color, etc.) that
    /// must never silently change once set (§4.6).
    #[serde(default)]
    pub immutable_attributes: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub mutable_attributes: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub last_seen_chapter: Option<i32>,
    /// Names of PERSONAL_ITEM entities owned by this character (§4.5).
    #[serde(default)]
    pub personal_items: Vec<String>,
    /// Secret descriptions this character is known to know (§4.5: SECRET
    /// entities with a matching `known_by` name).
    #[serde(default)]
    pub known_secrets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterOutline {
    pub number: i32,
    pub working_title: String,
    pub synopsis: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotOutline {
    #[serde(default)]
    pub chapters: Vec<ChapterOutline>,
    #[serde(default)]
    pub themes: Vec<String>,
}

/// The assembled World Bible handed to agent adapters as grounding context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldBible {
    pub project_id: String,
    #[serde(default)]
    pub characters: Vec<CharacterProfile>,
    #[serde(default)]
    pub rules_summary: Vec<String>,
    #[serde(default)]
    pub relationships_summary: Vec<String>,
    #[serde(default)]
    pub plot_outline: Option<PlotOutline>,
    /// LOCATION entities upserted by name (§4.5).
    #[serde(default)]
    pub locations: Vec<String>,
    /// OBJECT entities upserted by name (§4.5).
    #[serde(default)]
    pub objects: Vec<String>,
    pub as_of_chapter: i32,
}
