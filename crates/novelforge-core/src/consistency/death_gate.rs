//! Death gating (§4.6): the critical invariant that a character marked dead
//! stays dead. Before any fact update is allowed to set a character's vital
//! status to dead, the chapter text must contain an explicit death phrase
//! near the character's name, and not be better explained by a
//! drugging/unconscious outcome that merely resembles death.

/// Words/phrases that mark a fact update as attempting to set death status
/// (checked against proposed entity attribute values, not the chapter text).
const DEATH_STATUS_MARKERS: &[&str] = &[
    "dead", "muerto", "muerta", "fallecido", "fallecida", "deceased", "killed",
];

/// ~17 explicit death phrases (Spanish-genre prose, matching the project's
/// working language) whose presence in the text is required to confirm a death.
const EXPLICIT_DEATH_PHRASES: &[&str] = &[
    "murio",
    "murió",
    "ha muerto",
    "esta muerto",
    "está muerto",
    "esta muerta",
    "está muerta",
    "dejo de respirar",
    "dejó de respirar",
    "su corazon dejo de latir",
    "su corazón dejó de latir",
    "cayo muerto",
    "cayó muerto",
    "cayo muerta",
    "cayó muerta",
    "lo mataron",
    "la mataron",
    "fue asesinado",
    "fue asesinada",
    "perdio la vida",
    "perdió la vida",
    "exhalo su ultimo aliento",
    "exhaló su último aliento",
];

/// ~12 phrases indicating unconsciousness/drugging/near-death survival rather
/// than an actual death, which can override a lone explicit phrase match.
const UNCONSCIOUS_OR_SURVIVAL_PHRASES: &[&str] = &[
    "lo drogaron",
    "la drogaron",
    "perdio el conocimiento",
    "perdió el conocimiento",
    "quedo inconsciente",
    "quedó inconsciente",
    "sigue con vida",
    "sigue con vida a duras penas",
    "sobrevivio",
    "sobrevivió",
    "malherido pero con vida",
    "malherida pero con vida",
    "cayo al suelo sin sentido",
    "cayó al suelo sin sentido",
];

const NAME_WINDOW_CHARS: usize = 500;

fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

/// Name parts at least 4 characters long, the granularity the spec's name
/// matching works at (so "Al" in "Alex Rivera" wouldn't spuriously match).
fn name_parts(name: &str) -> Vec<String> {
    name.split_whitespace()
        .map(normalize)
        .filter(|p| p.chars().count() >= 4)
        .collect()
}

/// True if any proposed attribute value looks like it's trying to mark death.
pub fn proposes_death_status(proposed_value: &str) -> bool {
    let normalized = normalize(proposed_value);
    DEATH_STATUS_MARKERS
        .iter()
        .any(|marker| normalized.contains(marker))
}

fn windows_around_name<'a>(text_norm: &'a str, parts: &[String]) -> Vec<&'a str> {
    let mut windows = Vec::new();
    for part in parts {
        let mut search_from = 0;
        while let Some(pos) = text_norm[search_from..].find(part.as_str()) {
            let abs = search_from + pos;
            let start = abs.saturating_sub(NAME_WINDOW_CHARS);
            let end = (abs + part.len() + NAME_WINDOW_CHARS).min(text_norm.len());
            windows.push(&text_norm[start..end]);
            search_from = abs + part.len();
        }
    }
    windows
}

/// Result of evaluating whether a chapter's text confirms a proposed death.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeathVerdict {
    /// Confirmed: safe to mark the character dead and record a DEATH_EVENT rule.
    Confirmed,
    /// Not confirmed: strip the death marking and record as unconscious/injured instead.
    Unconfirmed,
}

/// Evaluates a proposed death fact against the chapter text and the
/// character's name, per §4.6's three conditions:
/// (a) explicit phrase within ±500 chars of a ≥4-char name part,
/// (b) explicit phrase anywhere in the text,
/// (c) an unconscious/survival phrase near the name.
/// Death is confirmed iff (a), or (b) AND NOT (c).
pub fn evaluate_death_claim(chapter_text: &str, character_name: &str) -> DeathVerdict {
    let text_norm = normalize(chapter_text);
    let parts = name_parts(character_name);

    let explicit_anywhere = EXPLICIT_DEATH_PHRASES
        .iter()
        .any(|phrase| text_norm.contains(phrase));

    if parts.is_empty() {
        return if explicit_anywhere {
            DeathVerdict::Confirmed
        } else {
            DeathVerdict::Unconfirmed
        };
    }

    let windows = windows_around_name(&text_norm, &parts);

    let explicit_near_name = windows
        .iter()
        .any(|w| EXPLICIT_DEATH_PHRASES.iter().any(|phrase| w.contains(phrase)));

    if explicit_near_name {
        return DeathVerdict::Confirmed;
    }

    let survival_near_name = windows.iter().any(|w| {
        UNCONSCIOUS_OR_SURVIVAL_PHRASES
            .iter()
            .any(|phrase| w.contains(phrase))
    });

    if explicit_anywhere && !survival_near_name {
        DeathVerdict::Confirmed
    } else {
        DeathVerdict::Unconfirmed
    }
}

/// True if a proposed DEATH_EVENT rule's text references the character's
/// name and the death claim it implies isn't confirmed; such rules must be
/// blocked even though no entity attribute update is involved.
pub fn blocks_death_event_rule(rule_text: &str, character_name: &str, chapter_text: &str) -> bool {
    let rule_norm = normalize(rule_text);
    let parts = name_parts(character_name);
    let mentions_character = parts.iter().any(|p| rule_norm.contains(p.as_str()));
    mentions_character && evaluate_death_claim(chapter_text, character_name) == DeathVerdict::Unconfirmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_death_near_name_is_confirmed() {
        let text = "Alex cayó al suelo. Un instante después, Alex murió entre los escombros.";
        assert_eq!(evaluate_death_claim(text, "Alex Rivera"), DeathVerdict::Confirmed);
    }

    #[test]
    fn drugging_without_explicit_death_phrase_is_unconfirmed() {
        let text = "A Alex lo drogaron y cayó al suelo, inconsciente pero respirando.";
        assert_eq!(evaluate_death_claim(text, "Alex Rivera"), DeathVerdict::Unconfirmed);
    }

    #[test]
    fn explicit_phrase_far_away_plus_survival_near_name_is_unconfirmed() {
        let text = format!(
            "{}{}{}",
            "x ".repeat(600),
            "alguien murio en la guerra hace anos. ",
            "Mientras tanto Alex sigue con vida a duras penas tras el ataque."
        );
        assert_eq!(
            evaluate_death_claim(&text, "Alex Rivera"),
            DeathVerdict::Unconfirmed
        );
    }

    #[test]
    fn explicit_phrase_anywhere_without_survival_contradiction_confirms() {
        let text = format!(
            "{}{}{}",
            "x ".repeat(600),
            "fue asesinado brutalmente en el callejon. ",
            "Alex no estaba cerca del lugar cuando ocurrio."
        );
        assert_eq!(evaluate_death_claim(&text, "Alex Rivera"), DeathVerdict::Confirmed);
    }

    #[test]
    fn proposes_death_status_detects_markers() {
        assert!(proposes_death_status("muerto"));
        assert!(proposes_death_status("Deceased"));
        assert!(!proposes_death_status("inconsciente"));
    }

    #[test]
    fn death_event_rule_blocked_when_unconfirmed() {
        let text = "A Alex lo drogaron y quedo inconsciente tras la emboscada.";
        assert!(blocks_death_event_rule(
            "Alex Rivera ha muerto en la emboscada",
            "Alex Rivera",
            text
        ));
    }
}
