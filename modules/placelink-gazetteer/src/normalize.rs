//! Identity normalization for place names.
//!
//! Pure functions producing a canonical grouping key and a preferred display
//! label from raw name/category/coordinate variants. Every function here is
//! deterministic under reordering, duplication, and coordinate jitter of its
//! input — the linchpin for "same entity, same URI".

use std::cmp::Ordering;
use std::collections::BTreeSet;

use placelink_common::GeoPoint;

use crate::coords::round_bucket;

/// Strip wrapping angle brackets and quotes. `-` is the "unknown" sentinel
/// in the atlas index and maps to empty.
pub fn clean_term(term: &str) -> String {
    if term.is_empty() || term == "-" {
        return String::new();
    }

    term.trim_start_matches('<')
        .trim_end_matches('>')
        .trim_matches('"')
        .trim()
        .to_string()
}

/// Normalize a term for comparison and deduplication: lowercase, ascii
/// alphanumerics only (punctuation and diacritics dropped).
pub fn normalize_term(term: &str) -> String {
    if term.is_empty() || term == "-" {
        return String::new();
    }

    term.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Preference order between two candidate terms. Terms with question marks
/// (uncertain readings) sort last, then parenthesised forms, then large
/// length differences, slash-joined bilingual forms sort first, all-caps
/// forms last, lexicographic as the final tie-break.
fn cmp_preference(a: &str, b: &str) -> Ordering {
    let a_question = a.contains('?');
    let b_question = b.contains('?');
    if a_question != b_question {
        return a_question.cmp(&b_question);
    }

    let a_parens = a.contains('(') || a.contains(')');
    let b_parens = b.contains('(') || b.contains(')');
    if a_parens != b_parens {
        return a_parens.cmp(&b_parens);
    }

    if a.len() >= 3 && b.len() >= 3 {
        let diff = a.len() as i64 - b.len() as i64;
        if diff.abs() > 5 {
            return a.len().cmp(&b.len());
        }
    }

    let a_slash = a.contains('/');
    let b_slash = b.contains('/');
    if a_slash != b_slash {
        return b_slash.cmp(&a_slash);
    }

    let a_caps = !a.is_empty() && a == a.to_uppercase();
    let b_caps = !b.is_empty() && b == b.to_uppercase();
    if a_caps != b_caps {
        return a_caps.cmp(&b_caps);
    }

    a.cmp(b)
}

/// Select the best preferred term from candidate names.
///
/// A pure function of the unordered candidate *set*: the candidates are
/// deduplicated and canonically ordered before scoring, so the result never
/// depends on input order.
pub fn select_preferred_term<I, S>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let valid: BTreeSet<String> = candidates
        .into_iter()
        .map(|c| clean_term(c.as_ref()))
        .filter(|c| !c.is_empty())
        .collect();

    valid
        .iter()
        .min_by(|a, b| cmp_preference(a, b))
        .cloned()
}

/// Canonical grouping key: `{category}:{normalized_name}` plus a coordinate
/// bucket when coordinates exist. Two records sharing a key denote the same
/// real-world entity regardless of ingestion order.
pub fn concept_key(preferred_term: &str, category: &str, coordinates: Option<GeoPoint>) -> String {
    let normalized = normalize_term(preferred_term);
    let category = category
        .split('/')
        .next()
        .unwrap_or_default()
        .to_lowercase();

    match coordinates {
        Some(c) => {
            let lat = round_bucket(c.latitude);
            let lon = round_bucket(c.longitude);
            format!("{category}:{normalized}_{lat:.2}_{lon:.2}")
        }
        None => format!("{category}:{normalized}"),
    }
}

/// Stable concept id: 32-bit rolling hash of the key, rendered base-36.
pub fn concept_id(key: &str) -> String {
    let mut hash: i32 = 0;
    for c in key.chars() {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(c as i32);
    }

    to_base36(hash.unsigned_abs() as u64)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}

/// Web-friendly slug from a display term.
pub fn slug_from_term(term: &str) -> String {
    if term.is_empty() || term == "-" {
        return String::new();
    }

    let mut slug = String::with_capacity(term.len());
    let mut last_dash = true; // suppress leading dashes
    for c in term.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if (c.is_whitespace() || c == '-') && !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_strips_brackets_and_sentinel() {
        assert_eq!(clean_term("<Cochin>"), "Cochin");
        assert_eq!(clean_term("\"Cochin\""), "Cochin");
        assert_eq!(clean_term("-"), "");
        assert_eq!(clean_term(""), "");
    }

    #[test]
    fn normalize_drops_punctuation_and_case() {
        assert_eq!(normalize_term("Sint-Annabaai"), "sintannabaai");
        assert_eq!(normalize_term("COCHIN"), "cochin");
        assert_eq!(normalize_term("-"), "");
    }

    #[test]
    fn preferred_term_is_order_independent() {
        let forward = select_preferred_term(["Paris", "Parigi", "Lutetia"]);
        let backward = select_preferred_term(["Lutetia", "Paris", "Parigi"]);
        assert_eq!(forward, backward);
        assert!(forward.is_some());
    }

    #[test]
    fn preferred_term_ignores_duplicates() {
        let once = select_preferred_term(["Cochin", "Cochim"]);
        let twice = select_preferred_term(["Cochim", "Cochin", "Cochin", "Cochim"]);
        assert_eq!(once, twice);
    }

    #[test]
    fn uncertain_readings_lose() {
        let picked = select_preferred_term(["Cochin?", "Cochin"]).unwrap();
        assert_eq!(picked, "Cochin");
    }

    #[test]
    fn parenthesised_forms_lose() {
        let picked = select_preferred_term(["Goa (Velha)", "Goa"]).unwrap();
        assert_eq!(picked, "Goa");
    }

    #[test]
    fn same_place_jittered_coordinates_share_a_key() {
        let a = concept_key(
            "Paris",
            "stad/city",
            Some(GeoPoint { latitude: 48.8566, longitude: 2.3522 }),
        );
        let b = concept_key(
            "Paris",
            "stad/city",
            Some(GeoPoint { latitude: 48.8601, longitude: 2.3499 }),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_places_get_distinct_keys() {
        let france = concept_key(
            "Paris",
            "stad/city",
            Some(GeoPoint { latitude: 48.8566, longitude: 2.3522 }),
        );
        let texas = concept_key(
            "Paris",
            "stad/city",
            Some(GeoPoint { latitude: 33.66, longitude: -95.56 }),
        );
        assert_ne!(france, texas);
    }

    #[test]
    fn key_without_coordinates_uses_name_and_category() {
        let key = concept_key("Cochin", "stad/city", None);
        assert_eq!(key, "stad:cochin");
    }

    #[test]
    fn category_uses_primary_token() {
        let key = concept_key("Cochin", "Eiland/Island", None);
        assert!(key.starts_with("eiland:"));
    }

    #[test]
    fn concept_id_is_stable() {
        let a = concept_id("stad:cochin_9.97_76.28");
        let b = concept_id("stad:cochin_9.97_76.28");
        assert_eq!(a, b);
        assert!(!a.is_empty());
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn slugs_collapse_whitespace_and_punctuation() {
        assert_eq!(slug_from_term("Sint   Anna-baai"), "sint-anna-baai");
        assert_eq!(slug_from_term("  Goa (Velha) "), "goa-velha");
        assert_eq!(slug_from_term("-"), "");
    }
}
