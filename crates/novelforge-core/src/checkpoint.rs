//! Structural checkpoint (§4.3): runs every `checkpoint_interval` regular
//! chapters (default 5) and once more as part of the final novel review.
//! Compares drafted chapters against their planned outline entries and
//! flags deviations worth a targeted rewrite, capped at a handful of
//! chapters per invocation so one checkpoint pass can't rewrite the whole book.

use crate::model::{Chapter, CharacterProfile, ChapterOutline};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Positional tolerance (as a fraction of total chapter count) allowed
/// between a structural role's expected position and the chapter that
/// actually carries it (§4.3: act1_turn/midpoint/act2_crisis at 25/50/75%, ±10%).
const STRUCTURAL_POSITION_TOLERANCE: f64 = 0.10;

/// Minimum fraction of the outline's key-event words that must appear in the
/// chapter's own summary for the key event to count as present (§4.3).
const KEY_EVENT_LEXICAL_COVERAGE: f64 = 0.30;

/// Chapters rewritten per checkpoint invocation is capped at this (§4.3).
const MAX_REWRITES_PER_CHECKPOINT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviationKind {
    MissingKeyEvent,
    WrongStructuralPosition,
    AttributeContradiction,
    TimelineOrderViolation,
}

#[derive(Debug, Clone)]
pub struct Deviation {
    pub chapter_number: i32,
    pub kind: DeviationKind,
    pub detail: String,
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() > 3)
        .collect()
}

fn lexical_coverage(key_event: &str, chapter_summary: &str) -> f64 {
    let key_words = word_set(key_event);
    if key_words.is_empty() {
        return 1.0;
    }
    let summary_words = word_set(chapter_summary);
    let covered = key_words.iter().filter(|w| summary_words.contains(*w)).count();
    covered as f64 / key_words.len() as f64
}

/// Expected fractional position (0.0-1.0) for named structural beats (§4.3).
fn expected_position(role: &str) -> Option<f64> {
    match role {
        "act1_turn" => Some(0.25),
        "midpoint" => Some(0.50),
        "act2_crisis" => Some(0.75),
        _ => None,
    }
}

/// Closed sets of mutually-exclusive canonical attribute values (§4.3: "characters
/// contradicting canonical attributes"). A character whose immutable attribute
/// is recorded as one member of a group, but whose chapter prose names a
/// different member of the same group, has drifted off its canonical attribute.
const ATTRIBUTE_VALUE_GROUPS: &[&[&str]] = &[
    &["ojos azules", "ojos verdes", "ojos café", "ojos cafe", "ojos negros", "ojos grises", "ojos miel"],
    &["cabello rubio", "cabello castaño", "cabello castano", "cabello negro", "cabello rojo", "cabello gris", "cabello blanco"],
    &["piel clara", "piel morena", "piel oscura", "piel pálida", "piel palida"],
];

fn attribute_group_for(value: &str) -> Option<&'static [&'static str]> {
    let lower = value.to_lowercase();
    ATTRIBUTE_VALUE_GROUPS
        .iter()
        .find(|group| group.iter().any(|member| lower.contains(member)))
        .copied()
}

/// Matches an explicit "Día N" / "Day N" narrative-time marker, the device
/// chapters use to anchor themselves on the story's internal calendar.
static DAY_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bd[ií]a\s+(\d+)\b").unwrap());

fn day_markers(text: &str) -> Vec<u32> {
    DAY_MARKER
        .captures_iter(text)
        .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse::<u32>().ok()))
        .collect()
}

/// Flags a character whose immutable attribute value is contradicted by a
/// different member of the same canonical-value group appearing in a
/// chapter's own prose alongside the character's name (§4.3).
fn detect_attribute_contradictions(chapters: &[Chapter], characters: &[CharacterProfile]) -> Vec<Deviation> {
    let mut deviations = Vec::new();
    for character in characters {
        for recorded_value in character.immutable_attributes.values() {
            let Some(group) = attribute_group_for(recorded_value) else {
                continue;
            };
            let recorded_lower = recorded_value.to_lowercase();
            for chapter in chapters {
                let text = chapter.content.to_lowercase();
                if !text.contains(&character.name.to_lowercase()) {
                    continue;
                }
                if let Some(conflicting) = group.iter().find(|m| text.contains(**m) && !recorded_lower.contains(**m)) {
                    deviations.push(Deviation {
                        chapter_number: chapter.number,
                        kind: DeviationKind::AttributeContradiction,
                        detail: format!(
                            "{} is canonically \"{recorded_value}\" but chapter {} describes \"{conflicting}\"",
                            character.name, chapter.number
                        ),
                    });
                }
            }
        }
    }
    deviations
}

/// Flags a chapter whose own internal day marker regresses behind an earlier
/// chapter's, in normalized chapter order (§4.3).
fn detect_timeline_order_violations(chapters: &[Chapter]) -> Vec<Deviation> {
    let mut sorted: Vec<&Chapter> = chapters.iter().collect();
    sorted.sort_by_key(|c| crate::normalize::normalize_chapter(c.number));

    let mut deviations = Vec::new();
    let mut last_day: Option<u32> = None;
    let mut last_chapter = 0;
    for chapter in sorted {
        let markers = day_markers(&chapter.content);
        let Some(&max_day) = markers.iter().max() else {
            continue;
        };
        if let Some(prev) = last_day {
            if max_day < prev {
                deviations.push(Deviation {
                    chapter_number: chapter.number,
                    kind: DeviationKind::TimelineOrderViolation,
                    detail: format!(
                        "chapter {} marks day {max_day}, regressing behind chapter {last_chapter}'s day {prev}",
                        chapter.number
                    ),
                });
            }
        }
        last_day = Some(max_day);
        last_chapter = chapter.number;
    }
    deviations
}

/// Scans chapters against outline entries in the checkpoint range and
/// returns every detected deviation, in outline order.
pub fn detect_deviations(
    chapters: &[Chapter],
    outline: &[ChapterOutline],
    structural_roles: &[(i32, String)],
    total_chapters: u32,
    characters: &[CharacterProfile],
) -> Vec<Deviation> {
    let mut deviations = Vec::new();

    for outline_entry in outline {
        let Some(chapter) = chapters.iter().find(|c| {
            crate::normalize::normalize_chapter(c.number) == crate::normalize::normalize_chapter(outline_entry.number)
        }) else {
            continue;
        };
        let summary = chapter.summary.as_deref().unwrap_or(&chapter.content);

        let coverage = lexical_coverage(&outline_entry.synopsis, summary);
        if coverage < KEY_EVENT_LEXICAL_COVERAGE {
            deviations.push(Deviation {
                chapter_number: outline_entry.number,
                kind: DeviationKind::MissingKeyEvent,
                detail: format!(
                    "key-event lexical coverage {:.0}% is below the {:.0}% threshold",
                    coverage * 100.0,
                    KEY_EVENT_LEXICAL_COVERAGE * 100.0
                ),
            });
        }
    }

    if total_chapters > 0 {
        for (expected_chapter, role) in structural_roles {
            let Some(expected_fraction) = expected_position(role) else {
                continue;
            };
            let actual_fraction = *expected_chapter as f64 / total_chapters as f64;
            if (actual_fraction - expected_fraction).abs() > STRUCTURAL_POSITION_TOLERANCE {
                deviations.push(Deviation {
                    chapter_number: *expected_chapter,
                    kind: DeviationKind::WrongStructuralPosition,
                    detail: format!(
                        "\"{role}\" expected near {:.0}% of the book but lands at {:.0}%",
                        expected_fraction * 100.0,
                        actual_fraction * 100.0
                    ),
                });
            }
        }
    }

    deviations.extend(detect_attribute_contradictions(chapters, characters));
    deviations.extend(detect_timeline_order_violations(chapters));

    deviations
}

/// Picks which chapters to rewrite this checkpoint pass, skipping any
/// already corrected and respecting the per-invocation cap (§4.3).
pub fn select_chapters_to_rewrite(deviations: &[Deviation], already_corrected: &HashSet<i32>) -> Vec<i32> {
    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for deviation in deviations {
        if already_corrected.contains(&deviation.chapter_number) {
            continue;
        }
        if seen.insert(deviation.chapter_number) {
            selected.push(deviation.chapter_number);
        }
        if selected.len() == MAX_REWRITES_PER_CHECKPOINT {
            break;
        }
    }
    selected
}

/// Final-novel-review structural checks (§4.3): required roles present
/// exactly once, protagonist name present in enough summaries, every plot
/// thread resolved before the epilogue, and no orphan threads.
#[derive(Debug, Clone, Default)]
pub struct FinalReviewStructuralReport {
    pub missing_or_duplicate_roles: Vec<String>,
    pub protagonist_presence_ratio: f64,
    pub protagonist_presence_ok: bool,
    pub unresolved_threads_before_epilogue: Vec<String>,
}

const PROTAGONIST_PRESENCE_FLOOR: f64 = 0.40;
const REQUIRED_STRUCTURAL_ROLES: &[&str] = &["act1_turn", "midpoint", "act2_crisis"];

pub fn final_structural_review(
    structural_roles: &[(i32, String)],
    chapter_summaries: &[(i32, String)],
    protagonist_name: &str,
    unresolved_threads: &[String],
) -> FinalReviewStructuralReport {
    let mut role_counts: std::collections::HashMap<&str, u32> = std::collections::HashMap::new();
    for (_, role) in structural_roles {
        *role_counts.entry(role.as_str()).or_insert(0) += 1;
    }
    let missing_or_duplicate_roles = REQUIRED_STRUCTURAL_ROLES
        .iter()
        .filter(|role| role_counts.get(*role).copied().unwrap_or(0) != 1)
        .map(|role| role.to_string())
        .collect();

    let mentions = chapter_summaries
        .iter()
        .filter(|(_, summary)| summary.to_lowercase().contains(&protagonist_name.to_lowercase()))
        .count();
    let ratio = if chapter_summaries.is_empty() {
        1.0
    } else {
        mentions as f64 / chapter_summaries.len() as f64
    };

    FinalReviewStructuralReport {
        missing_or_duplicate_roles,
        protagonist_presence_ratio: ratio,
        protagonist_presence_ok: ratio >= PROTAGONIST_PRESENCE_FLOOR,
        unresolved_threads_before_epilogue: unresolved_threads.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChapterStatus;

    fn chapter(number: i32, summary: &str) -> Chapter {
        Chapter {
            id: format!("c{number}"),
            project_id: "p1".into(),
            number,
            title: "t".into(),
            scene_plan: vec![],
            content: String::new(),
            summary: Some(summary.to_string()),
            status: ChapterStatus::Approved,
            word_count: 1600,
            score: None,
            generation_token: None,
            correction_attempts: 0,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn missing_key_event_is_flagged() {
        let chapters = vec![chapter(3, "A quiet evening with nothing of note.")];
        let outline = vec![ChapterOutline {
            number: 3,
            working_title: "Reveal".into(),
            synopsis: "Alex discovers the hidden letter behind the painting.".into(),
        }];
        let deviations = detect_deviations(&chapters, &outline, &[], 0, &[]);
        assert!(deviations.iter().any(|d| d.kind == DeviationKind::MissingKeyEvent));
    }

    #[test]
    fn covered_key_event_is_not_flagged() {
        let chapters = vec![chapter(
            3,
            "Alex discovers the hidden letter behind the painting and reads it in shock.",
        )];
        let outline = vec![ChapterOutline {
            number: 3,
            working_title: "Reveal".into(),
            synopsis: "Alex discovers the hidden letter behind the painting.".into(),
        }];
        let deviations = detect_deviations(&chapters, &outline, &[], 0, &[]);
        assert!(!deviations.iter().any(|d| d.kind == DeviationKind::MissingKeyEvent));
    }

    #[test]
    fn midpoint_outside_tolerance_is_flagged() {
        let deviations = detect_deviations(&[], &[], &[(15, "midpoint".to_string())], 20, &[]);
        assert!(deviations
            .iter()
            .any(|d| d.kind == DeviationKind::WrongStructuralPosition));
    }

    #[test]
    fn midpoint_within_tolerance_is_not_flagged() {
        let deviations = detect_deviations(&[], &[], &[(10, "midpoint".to_string())], 20, &[]);
        assert!(deviations.is_empty());
    }

    fn chapter_with_content(number: i32, content: &str) -> Chapter {
        let mut c = chapter(number, "");
        c.content = content.to_string();
        c
    }

    fn character_with_eye_color(name: &str, color: &str) -> CharacterProfile {
        let mut attrs = std::collections::HashMap::new();
        attrs.insert("eyes_INMUTABLE".to_string(), color.to_string());
        CharacterProfile {
            entity_id: format!("e-{name}"),
            name: name.to_string(),
            role: crate::model::StructuralRole::Supporting,
            is_dead: false,
            death_chapter: None,
            injuries: vec![],
            immutable_attributes: attrs,
            mutable_attributes: Default::default(),
            last_seen_chapter: None,
            personal_items: vec![],
            known_secrets: vec![],
        }
    }

    #[test]
    fn attribute_contradiction_is_flagged_when_prose_conflicts_with_canon() {
        let characters = vec![character_with_eye_color("Marguerite", "ojos azules")];
        let chapters = vec![chapter_with_content(4, "Marguerite clavó sus ojos verdes en la carta.")];
        let deviations = detect_deviations(&chapters, &[], &[], 0, &characters);
        assert!(deviations.iter().any(|d| d.kind == DeviationKind::AttributeContradiction));
    }

    #[test]
    fn matching_attribute_is_not_flagged() {
        let characters = vec![character_with_eye_color("Marguerite", "ojos azules")];
        let chapters = vec![chapter_with_content(4, "Marguerite clavó sus ojos azules en la carta.")];
        let deviations = detect_deviations(&chapters, &[], &[], 0, &characters);
        assert!(!deviations.iter().any(|d| d.kind == DeviationKind::AttributeContradiction));
    }

    #[test]
    fn timeline_regression_is_flagged() {
        let chapters = vec![
            chapter_with_content(1, "Era el día 3 de la travesía."),
            chapter_with_content(2, "El día 1 amaneció frío y despejado."),
        ];
        let deviations = detect_deviations(&chapters, &[], &[], 0, &[]);
        assert!(deviations.iter().any(|d| d.kind == DeviationKind::TimelineOrderViolation));
    }

    #[test]
    fn increasing_timeline_is_not_flagged() {
        let chapters = vec![
            chapter_with_content(1, "Era el día 1 de la travesía."),
            chapter_with_content(2, "El día 3 amaneció frío y despejado."),
        ];
        let deviations = detect_deviations(&chapters, &[], &[], 0, &[]);
        assert!(!deviations.iter().any(|d| d.kind == DeviationKind::TimelineOrderViolation));
    }

    #[test]
    fn rewrite_selection_respects_cap_and_skips_already_corrected() {
        let deviations = vec![
            Deviation { chapter_number: 1, kind: DeviationKind::MissingKeyEvent, detail: "".into() },
            Deviation { chapter_number: 2, kind: DeviationKind::MissingKeyEvent, detail: "".into() },
            Deviation { chapter_number: 3, kind: DeviationKind::MissingKeyEvent, detail: "".into() },
            Deviation { chapter_number: 4, kind: DeviationKind::MissingKeyEvent, detail: "".into() },
        ];
        let mut already = HashSet::new();
        already.insert(2);
        let selected = select_chapters_to_rewrite(&deviations, &already);
        assert_eq!(selected, vec![1, 3, 4]);
    }

    #[test]
    fn protagonist_presence_below_floor_fails() {
        let summaries = vec![(1, "a quiet town".to_string()), (2, "a storm approaches".to_string())];
        let report = final_structural_review(&[], &summaries, "Alex", &[]);
        assert!(!report.protagonist_presence_ok);
    }
}
