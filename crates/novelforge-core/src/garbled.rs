//! Garbled-text detection (§4.7): four independent heuristics run over a
//! chapter's prose to catch output corrupted in ways a word-count check
//! alone would miss. Each heuristic is a pure function over `&str` so the
//! detect-and-fix loop can call them without any agent round-trip.
//!
//! All four are fraction-over-sample-size checks: each only fires once its
//! population clears a minimum instance count, so a clean short paragraph
//! never trips a heuristic tuned for full chapters.

use once_cell::sync::Lazy;
use regex::Regex;

/// Minimum chapter length before garbled-text detection runs at all (§4.7).
const MIN_CHAPTER_CHARS: usize = 200;

/// Above this length the chapter is checked in three 2KB windows (start,
/// middle, end) rather than as a whole, so a corrupted passage isn't diluted
/// by thousands of clean words around it (§4.7).
const LONG_CHAPTER_CHARS: usize = 6000;
const WINDOW_CHARS: usize = 2000;

/// Final letters a normally-formed Spanish word can end on. A content word
/// ending outside this set more than 15% of the time suggests truncation
/// mid-word across the sample (§4.7 check 1).
const VALID_SPANISH_FINAL_LETTERS: &[char] =
    &['a', 'e', 'i', 'o', 'u', 'y', 'á', 'é', 'í', 'ó', 'ú', 'n', 's', 'l', 'r', 'd', 'z'];

/// Closed set (~80 words) of Spanish articles, prepositions, conjunctions,
/// and pronouns. Normal prose runs roughly 40% function words; a collapse
/// toward telegram-style fragments drops this well below 20% (§4.7 check 2).
const SPANISH_FUNCTION_WORDS: &[&str] = &[
    // articles
    "el", "la", "los", "las", "un", "una", "unos", "unas", "lo",
    // prepositions
    "a", "ante", "bajo", "cabe", "con", "contra", "de", "desde", "durante", "en", "entre", "hacia",
    "hasta", "mediante", "para", "por", "según", "segun", "sin", "so", "sobre", "tras", "versus",
    "vía", "via",
    // conjunctions
    "y", "e", "o", "u", "pero", "mas", "sino", "porque", "pues", "que", "si", "aunque", "mientras",
    "cuando", "como", "donde", "ni",
    // pronouns and possessives
    "yo", "tú", "tu", "vos", "usted", "él", "el", "ella", "nosotros", "nosotras", "vosotros",
    "vosotras", "ustedes", "ellos", "ellas", "me", "te", "se", "nos", "os", "le", "les", "mi", "mis",
    "su", "sus", "nuestro", "nuestra", "nuestros", "nuestras", "vuestro", "vuestra", "vuestros",
    "vuestras", "este", "esta", "estos", "estas", "ese", "esa", "esos", "esas", "aquel", "aquella",
    "aquellos", "aquellas", "esto", "eso", "aquello", "quien", "quienes", "cual", "cuales", "cuyo",
    "cuya",
];

/// Matches a run of Unicode letters, used to extract alphabetic words for
/// the truncated-ending and telegram-mode checks.
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{L}+").unwrap());

fn alphabetic_words(text: &str) -> Vec<String> {
    WORD.find_iter(text).map(|m| m.as_str().to_lowercase()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GarbledReason {
    TruncatedEnding,
    TelegramMode,
    SpaceCollapse,
    CaseCorruption,
}

/// Check 1: of content words (4+ letters, fully alphabetic) with at least 20
/// instances in the sample, the fraction ending in a letter outside
/// [`VALID_SPANISH_FINAL_LETTERS`] exceeds 15%.
pub fn has_truncated_ending(text: &str) -> bool {
    let content_words: Vec<String> = alphabetic_words(text)
        .into_iter()
        .filter(|w| w.chars().count() >= 4)
        .collect();
    if content_words.len() < 20 {
        return false;
    }
    let bad = content_words
        .iter()
        .filter(|w| {
            w.chars()
                .last()
                .map(|c| !VALID_SPANISH_FINAL_LETTERS.contains(&c))
                .unwrap_or(true)
        })
        .count();
    (bad as f64 / content_words.len() as f64) > 0.15
}

/// Check 2: of all alphabetic words with at least 40 instances, the fraction
/// that are closed-set Spanish function words falls below 20%.
pub fn has_telegram_mode(text: &str) -> bool {
    let words = alphabetic_words(text);
    if words.len() < 40 {
        return false;
    }
    let function_count = words
        .iter()
        .filter(|w| SPANISH_FUNCTION_WORDS.contains(&w.as_str()))
        .count();
    (function_count as f64 / words.len() as f64) < 0.20
}

/// Check 3: of all whitespace-split tokens with at least 20 instances, the
/// fraction longer than 25 characters exceeds 5% — whitespace between words
/// has collapsed into long smashed-together runs.
pub fn has_space_collapse(text: &str) -> bool {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() < 20 {
        return false;
    }
    let long = tokens.iter().filter(|t| t.chars().count() > 25).count();
    (long as f64 / tokens.len() as f64) > 0.05
}

/// Check 4: of all whitespace-split tokens with at least 20 instances, the
/// fraction of length-3-or-more tokens that start lowercase but contain a
/// later uppercase letter exceeds 5%.
pub fn has_case_corruption(text: &str) -> bool {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() < 20 {
        return false;
    }
    let corrupted = tokens
        .iter()
        .filter(|t| {
            let chars: Vec<char> = t.chars().collect();
            chars.len() >= 3
                && chars[0].is_lowercase()
                && chars[1..].iter().any(|c| c.is_uppercase())
        })
        .count();
    (corrupted as f64 / tokens.len() as f64) > 0.05
}

/// Runs all four heuristics over a single segment, in a fixed order so
/// callers get deterministic issue ordering.
fn detect_in_segment(text: &str) -> Vec<GarbledReason> {
    let mut reasons = Vec::new();
    if has_truncated_ending(text) {
        reasons.push(GarbledReason::TruncatedEnding);
    }
    if has_telegram_mode(text) {
        reasons.push(GarbledReason::TelegramMode);
    }
    if has_space_collapse(text) {
        reasons.push(GarbledReason::SpaceCollapse);
    }
    if has_case_corruption(text) {
        reasons.push(GarbledReason::CaseCorruption);
    }
    reasons
}

/// Takes a `count`-character window of `text` starting at character offset
/// `start`, respecting UTF-8 character boundaries (Spanish text carries
/// plenty of multi-byte accented letters).
fn char_window(text: &str, start: usize, count: usize) -> String {
    text.chars().skip(start).take(count).collect()
}

/// Splits a chapter into the segments §4.7 actually checks: the whole text
/// when short enough, otherwise the first/middle/last 2KB windows. Chapters
/// under [`MIN_CHAPTER_CHARS`] are never segmented at all by the caller.
fn segments(text: &str) -> Vec<String> {
    let total = text.chars().count();
    if total <= LONG_CHAPTER_CHARS {
        return vec![text.to_string()];
    }
    let middle_start = (total - WINDOW_CHARS) / 2;
    vec![
        char_window(text, 0, WINDOW_CHARS),
        char_window(text, middle_start, WINDOW_CHARS),
        char_window(text, total - WINDOW_CHARS, WINDOW_CHARS),
    ]
}

/// Runs the full §4.7 detection pipeline: a length gate, then per-segment
/// heuristics with each segment only checked once it has at least 20
/// whitespace-split tokens. Reasons are deduplicated across segments.
pub fn detect_garbled(text: &str) -> Vec<GarbledReason> {
    if text.chars().count() < MIN_CHAPTER_CHARS {
        return Vec::new();
    }

    let mut found = Vec::new();
    for segment in segments(text) {
        if segment.split_whitespace().count() < 20 {
            continue;
        }
        for reason in detect_in_segment(&segment) {
            if !found.contains(&reason) {
                found.push(reason);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_spanish_prose(repeats: usize) -> String {
        "Ella entró en la habitación y se detuvo un momento. El fuego ya se había apagado. \
         Nadie habló durante un largo rato, y entonces Marguerite se aclaró la garganta. "
            .repeat(repeats)
    }

    #[test]
    fn well_formed_prose_is_clean() {
        assert!(detect_garbled(&clean_spanish_prose(10)).is_empty());
    }

    #[test]
    fn short_text_is_never_checked() {
        assert!(detect_garbled("Ella entró y se detuvo.").is_empty());
    }

    #[test]
    fn detects_truncated_ending() {
        let text = "absurdot ".repeat(25) + &"completa ".repeat(5);
        assert!(has_truncated_ending(&text));
    }

    #[test]
    fn clean_prose_does_not_trip_truncated_ending() {
        assert!(!has_truncated_ending(&clean_spanish_prose(10)));
    }

    #[test]
    fn detects_telegram_mode() {
        let text = "Corrio. Cayo. Grito. Sangro. Disparo. Huyo. Lloro. Temblo. Miro. Espero. \
            Dudo. Avanzo. Retrocedio. Tropezo. Resistio. Ataco. Defendio. Escapo. Regreso. Peleo. \
            Gano. Perdio. Busco. Encontro. Sono. Desperto. Recordo. Olvido. Hablo. Callo. \
            Escribio. Leyo. Pinto. Canto. Bailo. Salto. Camino. Corrio. Nado. Volo."
            .to_string();
        assert!(has_telegram_mode(&text));
    }

    #[test]
    fn normal_prose_is_not_telegram_mode() {
        assert!(!has_telegram_mode(&clean_spanish_prose(10)));
    }

    #[test]
    fn detects_space_collapse() {
        let long_runs = "estapalabraestademasiadolargaparaserunapalabranormalenelidioma "
            .repeat(6);
        let padding = "de en la y el a ".repeat(10);
        let text = format!("{long_runs} {padding}");
        assert!(has_space_collapse(&text));
    }

    #[test]
    fn detects_case_corruption() {
        let text = "eSto esTa maL esCrito toDo el raTo de esTa maNera corRupta en caDa paLabra \
            otRa vez paRa llegAr al umBral de vEinte toKens en esTa prUeba"
            .to_string();
        assert!(has_case_corruption(&text));
    }

    #[test]
    fn long_chapter_uses_three_windows() {
        let clean = clean_spanish_prose(200);
        assert!(clean.chars().count() > LONG_CHAPTER_CHARS);
        let windows = segments(&clean);
        assert_eq!(windows.len(), 3);
        assert!(detect_garbled(&clean).is_empty());
    }
}
