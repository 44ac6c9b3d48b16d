//! Raw atlas-index place records and the skip-and-count ingestion pass.
//!
//! The tabular source (CSV parsing lives with the caller) hands us one
//! [`PlaceRow`] per index line; we parse coordinates, derive alternative
//! names, and drop malformed rows without ever aborting the pass.

use serde::{Deserialize, Serialize};
use tracing::warn;

use placelink_common::GeoPoint;

use crate::coords::parse_coordinates;
use crate::normalize::clean_term;

/// One row of the tabular atlas index, as handed over by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaceRow {
    pub id: String,
    pub index_page: String,
    pub original_name: String,
    pub present_name: String,
    /// Possibly bilingual `local/english` category string.
    pub category: String,
    /// Degree-minute-direction text, or blank/`-` for unknown.
    pub coordinates: String,
    pub map_grid_square: String,
    pub map: String,
    pub page: String,
}

/// A parsed place record. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct RawPlaceRecord {
    pub id: String,
    pub index_page: String,
    pub original_name: String,
    pub present_name: String,
    pub category: String,
    pub coordinate_text: String,
    pub map_grid_square: String,
    pub map: String,
    pub page: String,
    pub coordinates: Option<GeoPoint>,
    pub alternative_names: Vec<String>,
    /// Concept linkage, filled in by [`crate::thesaurus::assign_record_uris`].
    pub thesaurus_id: String,
    pub uri: String,
    pub url_path: String,
}

impl RawPlaceRecord {
    /// The name a record is grouped under: present name when known, the
    /// original map label otherwise. Empty when neither is usable.
    pub fn best_name(&self) -> String {
        let present = clean_term(&self.present_name);
        if !present.is_empty() {
            return present;
        }
        clean_term(&self.original_name)
    }

    pub fn has_coordinates(&self) -> bool {
        self.coordinates.is_some()
    }
}

/// Outcome of an ingestion pass.
#[derive(Debug, Default)]
pub struct ProcessedRecords {
    pub records: Vec<RawPlaceRecord>,
    /// Rows dropped for unparseable coordinates or missing names.
    pub skipped: u32,
    pub coordinates_count: u32,
    /// Distinct raw category strings, sorted.
    pub categories: Vec<String>,
}

/// Alternative names: the original map label plus each separator-delimited
/// variant of the present name.
pub fn extract_alternative_names(original_name: &str, present_name: &str) -> Vec<String> {
    let mut names = Vec::new();

    let original = clean_term(original_name);
    if !original.is_empty() {
        names.push(original.clone());
    }

    let present = clean_term(present_name);
    if !present.is_empty() && present != original {
        for part in present.split(['/', '\\', ',', ';']) {
            let part = part.trim();
            if !part.is_empty() && !names.iter().any(|n| n == part) {
                names.push(part.to_string());
            }
        }
    }

    names
}

/// Parse tabular rows into place records. Malformed rows are counted and
/// skipped; the pass always completes.
pub fn process_rows(rows: Vec<PlaceRow>) -> ProcessedRecords {
    let mut out = ProcessedRecords::default();
    let mut categories = std::collections::BTreeSet::new();

    for (index, row) in rows.into_iter().enumerate() {
        let coordinates = match parse_coordinates(&row.coordinates) {
            Ok(c) => c,
            Err(e) => {
                warn!(row = index, error = %e, "Skipping row with malformed coordinates");
                out.skipped += 1;
                continue;
            }
        };

        if clean_term(&row.present_name).is_empty() && clean_term(&row.original_name).is_empty() {
            out.skipped += 1;
            continue;
        }

        if coordinates.is_some() {
            out.coordinates_count += 1;
        }

        let category = if row.category.is_empty() {
            "unknown".to_string()
        } else {
            row.category.clone()
        };
        categories.insert(category.clone());

        let id = if row.id.is_empty() {
            format!("place-{}", index + 1)
        } else {
            format!("place-{}", row.id)
        };
        let index_page = if row.index_page.is_empty() {
            (index + 1).to_string()
        } else {
            row.index_page.clone()
        };

        out.records.push(RawPlaceRecord {
            id,
            index_page,
            alternative_names: extract_alternative_names(&row.original_name, &row.present_name),
            original_name: row.original_name,
            present_name: row.present_name,
            category,
            coordinate_text: row.coordinates,
            map_grid_square: row.map_grid_square,
            map: row.map,
            page: row.page,
            coordinates,
            thesaurus_id: String::new(),
            uri: String::new(),
            url_path: String::new(),
        });
    }

    out.categories = categories.into_iter().collect();
    out
}
