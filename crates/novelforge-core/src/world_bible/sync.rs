//! World Bible synchronization (§4.5): runs after every chapter and before
//! constraint generation. The World Bible is always a derived view rebuilt
//! from the consistency DB; nothing ever writes to it directly.

use crate::consistency::death_gate;
use crate::model::{
    CharacterProfile, EntityType, PersistentInjury, StructuralRole, WorldBible, WorldEntity,
};

/// Minimum token length for the case-insensitive, whitespace-split token
/// match between a consistency-DB entity name and a World Bible character (§4.5).
const MIN_TOKEN_MATCH_LEN: usize = 3;

fn tokens(name: &str) -> Vec<String> {
    name.split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| t.chars().count() >= MIN_TOKEN_MATCH_LEN)
        .collect()
}

fn matches_character(entity_name: &str, character_name: &str) -> bool {
    let entity_tokens = tokens(entity_name);
    let character_tokens = tokens(character_name);
    entity_tokens
        .iter()
        .any(|t| character_tokens.contains(t))
}

/// Rebuilds the World Bible's character roster from the current entity
/// store, folding in attributes, upgrading death status, and treating
/// physical attributes as write-once (§4.5). CHARACTER and PHYSICAL_TRAIT
/// entities both fold into this roster; a PHYSICAL_TRAIT carries no name of
/// its own worth keeping, only attributes to merge onto the matched character.
fn sync_characters(
    existing: &[CharacterProfile],
    entities: &[WorldEntity],
    as_of_chapter: i32,
) -> Vec<CharacterProfile> {
    let mut characters: Vec<CharacterProfile> = existing.to_vec();

    for entity in entities {
        if !matches!(entity.entity_type, EntityType::Character | EntityType::PhysicalTrait) {
            continue;
        }

        let matched_idx = characters
            .iter()
            .position(|c| matches_character(&entity.name, &c.name));

        match matched_idx {
            Some(idx) => {
                let profile = &mut characters[idx];
                for (key, value) in &entity.attributes {
                    if key.ends_with(crate::consistency::validator::IMMUTABLE_SUFFIX) {
                        profile
                            .immutable_attributes
                            .entry(key.clone())
                            .or_insert_with(|| value.clone());
                    } else {
                        profile.mutable_attributes.insert(key.clone(), value.clone());
                    }
                }
                if entity.is_dead && !profile.is_dead {
                    profile.is_dead = true;
                    profile.death_chapter = entity.death_chapter.or(Some(as_of_chapter));
                }
                profile.last_seen_chapter = Some(as_of_chapter);
            }
            None => {
                // A bare PHYSICAL_TRAIT with no matching character yet has
                // nothing to attach to; only CHARACTER entities seed a new profile.
                if matches!(entity.entity_type, EntityType::PhysicalTrait) {
                    continue;
                }
                let mut immutable_attributes = std::collections::HashMap::new();
                let mut mutable_attributes = std::collections::HashMap::new();
                for (key, value) in &entity.attributes {
                    if key.ends_with(crate::consistency::validator::IMMUTABLE_SUFFIX) {
                        immutable_attributes.insert(key.clone(), value.clone());
                    } else {
                        mutable_attributes.insert(key.clone(), value.clone());
                    }
                }
                characters.push(CharacterProfile {
                    entity_id: entity.id.clone(),
                    name: entity.name.clone(),
                    role: StructuralRole::Minor,
                    is_dead: entity.is_dead,
                    death_chapter: entity.death_chapter,
                    injuries: Vec::new(),
                    immutable_attributes,
                    mutable_attributes,
                    last_seen_chapter: Some(as_of_chapter),
                    personal_items: Vec::new(),
                    known_secrets: Vec::new(),
                });
            }
        }
    }

    characters
}

/// Appends each PERSONAL_ITEM entity's name to its owner's `personal_items`
/// (owner resolved by the `owner` attribute, matched against the roster the
/// same way character entities are).
fn sync_personal_items(characters: &mut [CharacterProfile], entities: &[WorldEntity]) {
    for entity in entities {
        if !matches!(entity.entity_type, EntityType::PersonalItem) {
            continue;
        }
        let Some(owner_name) = entity.attributes.get("owner") else {
            continue;
        };
        if let Some(profile) = characters
            .iter_mut()
            .find(|c| matches_character(owner_name, &c.name))
        {
            if !profile.personal_items.iter().any(|i| i == &entity.name) {
                profile.personal_items.push(entity.name.clone());
            }
        }
    }
}

/// Appends each SECRET entity's description to every character named in its
/// `known_by` attribute (a comma-separated list of character names).
fn sync_secrets(characters: &mut [CharacterProfile], entities: &[WorldEntity]) {
    for entity in entities {
        if !matches!(entity.entity_type, EntityType::Secret) {
            continue;
        }
        let Some(known_by) = entity.attributes.get("known_by") else {
            continue;
        };
        for knower in known_by.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if let Some(profile) = characters
                .iter_mut()
                .find(|c| matches_character(knower, &c.name))
            {
                if !profile.known_secrets.iter().any(|s| s == &entity.name) {
                    profile.known_secrets.push(entity.name.clone());
                }
            }
        }
    }
}

/// Upserts LOCATION or OBJECT entity names into `target` by name, preserving
/// insertion order and never duplicating an already-known name (§4.5).
fn upsert_names(target: &mut Vec<String>, entities: &[WorldEntity], kind: EntityType) {
    for entity in entities {
        if entity.entity_type != kind {
            continue;
        }
        if !target.iter().any(|n| n == &entity.name) {
            target.push(entity.name.clone());
        }
    }
}

fn project_injuries(characters: &mut [CharacterProfile], injuries: &[(String, PersistentInjury)]) {
    for (character_name, injury) in injuries {
        if injury.healed {
            continue;
        }
        if let Some(profile) = characters
            .iter_mut()
            .find(|c| matches_character(character_name, &c.name))
        {
            let already_present = profile.injuries.iter().any(|i| {
                i.description == injury.description && i.chapter_introduced == injury.chapter_introduced
            });
            if !already_present {
                profile.injuries.push(injury.clone());
            }
        }
    }
}

/// Rebuilds the entire World Bible document from current storage state.
/// `active_injuries` pairs a character name with a not-yet-healed injury
/// record pulled from the persistent-injuries store. Processes all seven
/// `EntityType` variants per their own sync rule (§4.5).
pub fn rebuild_world_bible(
    project_id: &str,
    existing: &WorldBible,
    entities: &[WorldEntity],
    active_injuries: &[(String, PersistentInjury)],
    as_of_chapter: i32,
) -> WorldBible {
    let mut characters = sync_characters(&existing.characters, entities, as_of_chapter);
    sync_personal_items(&mut characters, entities);
    sync_secrets(&mut characters, entities);
    project_injuries(&mut characters, active_injuries);

    let mut locations = existing.locations.clone();
    upsert_names(&mut locations, entities, EntityType::Location);
    let mut objects = existing.objects.clone();
    upsert_names(&mut objects, entities, EntityType::Object);

    WorldBible {
        project_id: project_id.to_string(),
        characters,
        rules_summary: existing.rules_summary.clone(),
        relationships_summary: existing.relationships_summary.clone(),
        plot_outline: existing.plot_outline.clone(),
        locations,
        objects,
        as_of_chapter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn entity(name: &str, dead: bool, attrs: &[(&str, &str)]) -> WorldEntity {
        entity_of_type(name, EntityType::Character, dead, attrs)
    }

    fn entity_of_type(name: &str, entity_type: EntityType, dead: bool, attrs: &[(&str, &str)]) -> WorldEntity {
        WorldEntity {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: "p1".into(),
            entity_type,
            name: name.to_string(),
            aliases: vec![],
            attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            is_dead: dead,
            death_chapter: if dead { Some(3) } else { None },
            first_seen_chapter: Some(1),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn empty_bible() -> WorldBible {
        WorldBible {
            project_id: "p1".into(),
            characters: vec![],
            rules_summary: vec![],
            relationships_summary: vec![],
            plot_outline: None,
            locations: vec![],
            objects: vec![],
            as_of_chapter: 0,
        }
    }

    fn character_profile(name: &str) -> CharacterProfile {
        CharacterProfile {
            entity_id: "e1".into(),
            name: name.to_string(),
            role: StructuralRole::Protagonist,
            is_dead: false,
            death_chapter: None,
            injuries: vec![],
            immutable_attributes: HashMap::new(),
            mutable_attributes: HashMap::new(),
            last_seen_chapter: None,
            personal_items: vec![],
            known_secrets: vec![],
        }
    }

    #[test]
    fn unknown_character_entity_creates_new_profile() {
        let entities = vec![entity("Alex Rivera", false, &[])];
        let bible = rebuild_world_bible("p1", &empty_bible(), &entities, &[], 1);
        assert_eq!(bible.characters.len(), 1);
        assert_eq!(bible.characters[0].name, "Alex Rivera");
    }

    #[test]
    fn token_match_folds_attributes_into_existing_character() {
        let mut existing = empty_bible();
        existing.characters.push(character_profile("Alex Rivera"));
        let entities = vec![entity("Rivera", false, &[("mood", "anxious")])];
        let bible = rebuild_world_bible("p1", &existing, &entities, &[], 5);
        assert_eq!(bible.characters.len(), 1);
        assert_eq!(
            bible.characters[0].mutable_attributes.get("mood").map(String::as_str),
            Some("anxious")
        );
    }

    #[test]
    fn death_status_upgrades_but_never_downgrades() {
        let mut existing = empty_bible();
        let mut dead = character_profile("Alex Rivera");
        dead.is_dead = true;
        dead.death_chapter = Some(3);
        existing.characters.push(dead);
        let entities = vec![entity("Alex Rivera", false, &[])];
        let bible = rebuild_world_bible("p1", &existing, &entities, &[], 10);
        assert!(bible.characters[0].is_dead);
        assert_eq!(bible.characters[0].death_chapter, Some(3));
    }

    #[test]
    fn immutable_attribute_is_not_overwritten_on_resync() {
        let mut existing = empty_bible();
        let mut alex = character_profile("Alex Rivera");
        alex.immutable_attributes =
            HashMap::from([("eyes_INMUTABLE".to_string(), "green".to_string())]);
        existing.characters.push(alex);
        let entities = vec![entity("Alex Rivera", false, &[("eyes_INMUTABLE", "blue")])];
        let bible = rebuild_world_bible("p1", &existing, &entities, &[], 6);
        assert_eq!(
            bible.characters[0].immutable_attributes.get("eyes_INMUTABLE").map(String::as_str),
            Some("green")
        );
    }

    #[test]
    fn physical_trait_folds_onto_matched_character_without_new_profile() {
        let mut existing = empty_bible();
        existing.characters.push(character_profile("Alex Rivera"));
        let entities = vec![entity_of_type(
            "Rivera",
            EntityType::PhysicalTrait,
            false,
            &[("limp", "left leg")],
        )];
        let bible = rebuild_world_bible("p1", &existing, &entities, &[], 2);
        assert_eq!(bible.characters.len(), 1);
        assert_eq!(
            bible.characters[0].mutable_attributes.get("limp").map(String::as_str),
            Some("left leg")
        );
    }

    #[test]
    fn personal_item_attaches_to_owner_by_name() {
        let mut existing = empty_bible();
        existing.characters.push(character_profile("Alex Rivera"));
        let entities = vec![entity_of_type(
            "brass pocket watch",
            EntityType::PersonalItem,
            false,
            &[("owner", "Alex Rivera")],
        )];
        let bible = rebuild_world_bible("p1", &existing, &entities, &[], 2);
        assert_eq!(bible.characters[0].personal_items, vec!["brass pocket watch".to_string()]);
    }

    #[test]
    fn secret_appends_to_every_named_knower() {
        let mut existing = empty_bible();
        existing.characters.push(character_profile("Alex Rivera"));
        existing.characters.push(character_profile("Dana Ruiz"));
        let entities = vec![entity_of_type(
            "the ledger was forged",
            EntityType::Secret,
            false,
            &[("known_by", "Alex Rivera, Dana Ruiz")],
        )];
        let bible = rebuild_world_bible("p1", &existing, &entities, &[], 2);
        assert!(bible.characters[0].known_secrets.contains(&"the ledger was forged".to_string()));
        assert!(bible.characters[1].known_secrets.contains(&"the ledger was forged".to_string()));
    }

    #[test]
    fn locations_and_objects_upsert_without_duplicating() {
        let mut existing = empty_bible();
        existing.locations.push("the lighthouse".to_string());
        let entities = vec![
            entity_of_type("the lighthouse", EntityType::Location, false, &[]),
            entity_of_type("the cellar", EntityType::Location, false, &[]),
            entity_of_type("shipping ledger", EntityType::Object, false, &[]),
        ];
        let bible = rebuild_world_bible("p1", &existing, &entities, &[], 3);
        assert_eq!(bible.locations, vec!["the lighthouse".to_string(), "the cellar".to_string()]);
        assert_eq!(bible.objects, vec!["shipping ledger".to_string()]);
    }

    #[test]
    fn death_gate_proposal_helper_still_reachable() {
        assert!(death_gate::proposes_death_status("muerto"));
    }
}
