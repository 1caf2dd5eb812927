//! Stable issue hashing (§4.8): a djb2-style hash of the normalized issue
//! description, used to recognize "the same issue" across detect-and-fix
//! cycles regardless of incidental wording changes an agent might introduce
//! when re-describing it.

/// djb2 hash, seeded the traditional way (5381, `hash * 33 + byte`).
fn djb2(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &b in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(b as u64);
    }
    hash
}

/// Normalizes an issue description before hashing: lowercase, collapse
/// whitespace, strip punctuation, so "Character Bob is dead!" and
/// "character bob is dead" hash identically.
fn normalize_issue_text(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut last_was_space = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            normalized.push(c.to_ascii_lowercase());
            last_was_space = false;
        } else if !last_was_space {
            normalized.push(' ');
            last_was_space = true;
        }
    }
    normalized.trim().to_string()
}

/// Computes the stable hash for an issue of the given violation type
/// affecting one chapter, as a lowercase hex string for use as a storage key.
pub fn compute_issue_hash(chapter_number: i32, violation_kind: &str, description: &str) -> String {
    compute_issue_hash_multi(&[chapter_number], violation_kind, description)
}

/// Computes the stable hash for an issue spanning one or more chapters
/// (§4.8): chapter numbers are normalized to DB form, sorted, and joined so
/// the same set of affected chapters always hashes identically regardless of
/// the order an agent lists them in.
pub fn compute_issue_hash_multi(chapters: &[i32], violation_kind: &str, description: &str) -> String {
    let normalized = normalize_issue_text(description);
    let mut chapter_norms: Vec<i32> = chapters
        .iter()
        .map(|&c| crate::normalize::normalize_chapter(c))
        .collect();
    chapter_norms.sort_unstable();
    let chapters_joined = chapter_norms
        .iter()
        .map(i32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let seed = format!("{chapters_joined}:{violation_kind}:{normalized}");
    format!("{:016x}", djb2(seed.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_issue_text_hashes_identically() {
        let a = compute_issue_hash(3, "death_gating", "Character Bob is dead!");
        let b = compute_issue_hash(3, "death_gating", "character bob is dead");
        assert_eq!(a, b);
    }

    #[test]
    fn different_chapters_hash_differently() {
        let a = compute_issue_hash(3, "death_gating", "Bob is dead");
        let b = compute_issue_hash(4, "death_gating", "Bob is dead");
        assert_ne!(a, b);
    }

    #[test]
    fn chapter_alias_hashes_identically_to_db_form() {
        let a = compute_issue_hash(-1, "timeline", "epilogue contradicts chapter 10");
        let b = compute_issue_hash(998, "timeline", "epilogue contradicts chapter 10");
        assert_eq!(a, b);
    }

    #[test]
    fn different_violation_kind_hashes_differently() {
        let a = compute_issue_hash(3, "death_gating", "Bob is dead");
        let b = compute_issue_hash(3, "timeline", "Bob is dead");
        assert_ne!(a, b);
    }

    #[test]
    fn multi_chapter_hash_ignores_listed_order() {
        let a = compute_issue_hash_multi(&[5, 2, 8], "pacing", "chapters should be merged");
        let b = compute_issue_hash_multi(&[8, 5, 2], "pacing", "chapters should be merged");
        assert_eq!(a, b);
    }

    #[test]
    fn multi_chapter_hash_differs_from_single_chapter_hash() {
        let a = compute_issue_hash(5, "pacing", "chapters should be merged");
        let b = compute_issue_hash_multi(&[5, 8], "pacing", "chapters should be merged");
        assert_ne!(a, b);
    }
}
