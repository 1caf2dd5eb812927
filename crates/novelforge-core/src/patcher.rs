//! Patcher contract (§6): applies Smart Editor surgical-fix patches to
//! chapter text via fuzzy locator matching, so a patch whose locator text
//! drifted slightly from the stored chapter (whitespace, a reworded clause)
//! still lands instead of silently no-opping. Grounded on the pack's use of
//! `strsim` for approximate string matching (Alb-O-xeno).

use strsim::normalized_levenshtein;

/// A single edit: find `locator` in the text (fuzzily) and replace it with `replacement`.
#[derive(Debug, Clone)]
pub struct Patch {
    pub locator: String,
    pub replacement: String,
}

#[derive(Debug, Clone)]
pub struct AppliedPatchLog {
    pub locator: String,
    pub applied: bool,
    pub match_score: f64,
}

#[derive(Debug, Clone)]
pub struct PatchResult {
    pub patched_text: String,
    pub applied_patches_count: usize,
    pub log: Vec<AppliedPatchLog>,
    pub success: bool,
}

/// Minimum normalized-similarity score (0.0-1.0) a sliding window must reach
/// against the locator to be treated as a match, below which the patch is
/// logged as unapplied rather than risking a wrong edit.
const MIN_MATCH_SCORE: f64 = 0.85;

/// Applies each patch in order against the running text, fuzzily locating
/// `locator` via a sliding window of the locator's word length and replacing
/// the best-scoring window above [`MIN_MATCH_SCORE`]. Patches that don't find
/// an adequate match leave the text unchanged and are logged, not dropped.
pub fn apply_patches(text: &str, patches: &[Patch]) -> PatchResult {
    let mut current = text.to_string();
    let mut log = Vec::with_capacity(patches.len());
    let mut applied_count = 0;

    for patch in patches {
        match find_best_window(&current, &patch.locator) {
            Some((start, end, score)) if score >= MIN_MATCH_SCORE => {
                current.replace_range(start..end, &patch.replacement);
                applied_count += 1;
                log.push(AppliedPatchLog {
                    locator: patch.locator.clone(),
                    applied: true,
                    match_score: score,
                });
            }
            Some((_, _, score)) => {
                log.push(AppliedPatchLog {
                    locator: patch.locator.clone(),
                    applied: false,
                    match_score: score,
                });
            }
            None => {
                log.push(AppliedPatchLog {
                    locator: patch.locator.clone(),
                    applied: false,
                    match_score: 0.0,
                });
            }
        }
    }

    PatchResult {
        patched_text: current,
        applied_patches_count: applied_count,
        success: applied_count > 0,
        log,
    }
}

/// Finds the best-scoring exact-length window of `text` (in characters) that
/// resembles `locator`, sliding one word at a time. Returns the byte range and score.
fn find_best_window(text: &str, locator: &str) -> Option<(usize, usize, f64)> {
    if locator.trim().is_empty() || text.is_empty() {
        return None;
    }
    if let Some(start) = text.find(locator) {
        return Some((start, start + locator.len(), 1.0));
    }

    let word_starts: Vec<usize> = text
        .char_indices()
        .filter(|(i, c)| *i == 0 || (!c.is_whitespace() && text[..*i].ends_with(char::is_whitespace)))
        .map(|(i, _)| i)
        .collect();
    let locator_word_count = locator.split_whitespace().count().max(1);

    let mut best: Option<(usize, usize, f64)> = None;
    for window in word_starts.windows(locator_word_count + 1) {
        let start = window[0];
        let end = *window.last().unwrap();
        if end <= start {
            continue;
        }
        let candidate = text[start..end].trim_end();
        let score = normalized_levenshtein(candidate, locator);
        if best.map(|(_, _, s)| score > s).unwrap_or(true) {
            best = Some((start, start + candidate.len(), score));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_applies_with_perfect_score() {
        let text = "The sky was blue and calm.";
        let patches = vec![Patch {
            locator: "blue and calm".into(),
            replacement: "grey and stormy".into(),
        }];
        let result = apply_patches(text, &patches);
        assert_eq!(result.patched_text, "The sky was grey and stormy.");
        assert_eq!(result.applied_patches_count, 1);
        assert!(result.success);
    }

    #[test]
    fn fuzzy_match_tolerates_minor_drift() {
        let text = "Marguerite looked out over the quiet harbor at dusk.";
        let patches = vec![Patch {
            locator: "looked out over the quiet harbour at dusk".into(),
            replacement: "stared out over the storm-wrecked harbor".into(),
        }];
        let result = apply_patches(text, &patches);
        assert!(result.success);
        assert!(result.patched_text.contains("storm-wrecked harbor"));
    }

    #[test]
    fn unmatched_locator_leaves_text_unchanged_and_logs_failure() {
        let text = "Completely unrelated sentence about nothing in particular here.";
        let patches = vec![Patch {
            locator: "the dragon breathed fire across the valley of kings".into(),
            replacement: "replacement".into(),
        }];
        let result = apply_patches(text, &patches);
        assert_eq!(result.patched_text, text);
        assert_eq!(result.applied_patches_count, 0);
        assert!(!result.success);
        assert!(!result.log[0].applied);
    }
}
