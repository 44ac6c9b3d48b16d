//! Concept thesaurus: groups place records into canonical concepts.
//!
//! One build pass per call, no state carried between passes. Every decision
//! (preferred term, concept id, slug, URI) is a function of the final
//! accumulated record set, so shuffled input yields an identical thesaurus.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::coords::round_bucket;
use crate::normalize::{clean_term, concept_id, concept_key, select_preferred_term, slug_from_term};
use crate::records::RawPlaceRecord;
use placelink_common::GeoPoint;

/// A canonical place entity aggregating every name/location variant that
/// refers to one real-world feature.
#[derive(Debug, Clone, Serialize)]
pub struct Concept {
    pub id: String,
    pub preferred_term: String,
    pub alternative_terms: Vec<String>,
    pub category: String,
    pub coordinates: Option<GeoPoint>,
    pub uri: String,
    pub url_path: String,
    /// Ids of the records grouped under this concept.
    pub locations: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct Thesaurus {
    pub entries: Vec<Concept>,
    pub total_concepts: usize,
    pub total_locations: usize,
    pub concepts_by_category: BTreeMap<String, usize>,
}

impl Thesaurus {
    pub fn find_by_id(&self, id: &str) -> Option<&Concept> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Case-insensitive substring search over preferred and alternative terms.
    pub fn search(&self, term: &str) -> Vec<&Concept> {
        let needle = term.to_lowercase();
        self.entries
            .iter()
            .filter(|e| {
                e.preferred_term.to_lowercase().contains(&needle)
                    || e.alternative_terms
                        .iter()
                        .any(|alt| alt.to_lowercase().contains(&needle))
            })
            .collect()
    }
}

impl Concept {
    /// Preferred term plus all alternatives.
    pub fn all_terms(&self) -> Vec<&str> {
        std::iter::once(self.preferred_term.as_str())
            .chain(self.alternative_terms.iter().map(String::as_str))
            .collect()
    }
}

struct Candidate {
    names: BTreeSet<String>,
    /// Raw category strings seen across the group. They share the key's
    /// primary token but may differ in casing or the translated half; the
    /// smallest is the canonical one, so the pick is order-independent.
    categories: BTreeSet<String>,
    coordinates: Option<GeoPoint>,
    locations: Vec<String>,
}

/// Build the thesaurus from parsed place records.
///
/// `uri_base` is the absolute base for concept URIs, e.g.
/// `https://necessaryreunions.org/gavoc`.
pub fn build_thesaurus(records: &[RawPlaceRecord], uri_base: &str) -> Thesaurus {
    let mut candidates: BTreeMap<String, Candidate> = BTreeMap::new();

    for record in records {
        let best_name = record.best_name();
        if best_name.is_empty() {
            continue;
        }

        let key = concept_key(&best_name, &record.category, record.coordinates);
        let candidate = candidates.entry(key).or_insert_with(|| Candidate {
            names: BTreeSet::new(),
            categories: BTreeSet::new(),
            // Bucket-rounded so the canonical point does not depend on
            // which jittered record arrived first.
            coordinates: record.coordinates.map(|c| GeoPoint {
                latitude: round_bucket(c.latitude),
                longitude: round_bucket(c.longitude),
            }),
            locations: Vec::new(),
        });
        candidate.categories.insert(record.category.clone());

        let present = clean_term(&record.present_name);
        if !present.is_empty() {
            candidate.names.insert(present);
        }
        let original = clean_term(&record.original_name);
        if !original.is_empty() {
            candidate.names.insert(original);
        }
        candidate.locations.push(record.id.clone());
    }

    let mut entries: Vec<Concept> = Vec::with_capacity(candidates.len());
    for (key, candidate) in candidates {
        // Preferred term from the FINAL accumulated name set, never the
        // first-seen name.
        let Some(preferred_term) = select_preferred_term(&candidate.names) else {
            continue;
        };

        let alternative_terms: Vec<String> = candidate
            .names
            .iter()
            .filter(|n| **n != preferred_term)
            .cloned()
            .collect();

        let category = candidate
            .categories
            .iter()
            .next()
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        entries.push(Concept {
            id: concept_id(&key),
            preferred_term,
            alternative_terms,
            category,
            coordinates: candidate.coordinates,
            uri: String::new(),
            url_path: String::new(),
            locations: candidate.locations,
        });
    }

    // Slug suffixing runs over the SORTED concept list so a collision always
    // resolves the same way no matter what order the records arrived in.
    entries.sort_by(|a, b| {
        a.preferred_term
            .cmp(&b.preferred_term)
            .then_with(|| a.id.cmp(&b.id))
    });

    let path_base = path_of(uri_base);
    let mut used_slugs: HashSet<String> = HashSet::new();
    for entry in &mut entries {
        let base_slug = slug_from_term(&entry.preferred_term);
        let mut slug = base_slug.clone();
        let mut counter = 1;
        while !used_slugs.insert(slug_key(&slug, entry.coordinates)) {
            slug = format!("{base_slug}-{counter}");
            counter += 1;
        }

        let tail = match entry.coordinates {
            Some(c) => format!("{}/{:.2}/{:.2}", slug, c.latitude, c.longitude),
            None => slug,
        };
        entry.uri = format!("{uri_base}/c/{tail}");
        entry.url_path = format!("{path_base}/c/{tail}");
    }

    let mut concepts_by_category: BTreeMap<String, usize> = BTreeMap::new();
    for entry in &entries {
        *concepts_by_category.entry(entry.category.clone()).or_default() += 1;
    }

    Thesaurus {
        total_concepts: entries.len(),
        total_locations: records.len(),
        concepts_by_category,
        entries,
    }
}

/// Link each record to its concept: sets `thesaurus_id`, `uri`, `url_path`.
/// Records whose concept cannot be found (e.g. nameless) fall back to a
/// per-record URI.
pub fn assign_record_uris(records: &mut [RawPlaceRecord], thesaurus: &Thesaurus, uri_base: &str) {
    let by_id: HashMap<&str, &Concept> = thesaurus
        .entries
        .iter()
        .map(|e| (e.id.as_str(), e))
        .collect();

    for record in records {
        let best_name = record.best_name();
        if !best_name.is_empty() {
            let key = concept_key(&best_name, &record.category, record.coordinates);
            let id = concept_id(&key);
            if let Some(concept) = by_id.get(id.as_str()) {
                record.thesaurus_id = id;
                record.uri = concept.uri.clone();
                record.url_path = concept.url_path.clone();
                continue;
            }
            record.thesaurus_id = id;
        }

        record.uri = location_uri(record, uri_base);
        record.url_path = location_uri(record, path_of(uri_base));
    }
}

/// Per-record fallback URI: `{base}/{index}/{slug}`, with a coordinate slug
/// when the record has no usable name.
fn location_uri(record: &RawPlaceRecord, base: &str) -> String {
    let id = record.id.strip_prefix("place-").unwrap_or(&record.id);

    let mut slug = slug_from_term(&record.best_name());
    if slug.is_empty() {
        if let Some(c) = record.coordinates {
            slug = format!("{:.2}_{:.2}", c.latitude, c.longitude).replace(['.', '-'], "_");
        }
    }

    if slug.is_empty() {
        format!("{base}/{id}")
    } else {
        format!("{base}/{id}/{slug}")
    }
}

/// Slug uniqueness is scoped per coordinate bucket, matching the URI shape.
fn slug_key(slug: &str, coordinates: Option<GeoPoint>) -> String {
    match coordinates {
        Some(c) => format!("{}_{:.2}_{:.2}", slug, c.latitude, c.longitude),
        None => slug.to_string(),
    }
}

/// Path portion of an absolute base URL (`https://x.org/gavoc` → `/gavoc`).
fn path_of(uri_base: &str) -> &str {
    uri_base
        .find("://")
        .and_then(|i| uri_base[i + 3..].find('/').map(|j| &uri_base[i + 3 + j..]))
        .unwrap_or("")
}

/// Render records as CSV, the tabular export surface of the gazetteer.
pub fn export_csv(records: &[RawPlaceRecord]) -> String {
    let mut out = String::from(
        "ID,URI,URL Path,Original Name on Map,Present Name,Alternative Names,Category,\
         Coordinates,Latitude (Decimal),Longitude (Decimal),Map Grid Square,Map,Page\n",
    );

    for r in records {
        let (lat, lon) = match r.coordinates {
            Some(c) => (format!("{:.6}", c.latitude), format!("{:.6}", c.longitude)),
            None => (String::new(), String::new()),
        };
        let fields = [
            &r.index_page,
            &r.uri,
            &r.url_path,
            &r.original_name,
            &r.present_name,
            &r.alternative_names.join("; "),
            &r.category,
            &r.coordinate_text,
            &lat,
            &lon,
            &r.map_grid_square,
            &r.map,
            &r.page,
        ];
        let row: Vec<String> = fields
            .iter()
            .map(|f| format!("\"{}\"", f.replace('"', "\"\"")))
            .collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }

    out
}
