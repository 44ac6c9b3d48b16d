//! Canonical gazetteer built from historical atlas index records.
//!
//! Ingestion ([`records`]) parses tabular rows into [`RawPlaceRecord`]s,
//! [`thesaurus`] groups them into stable [`Concept`]s, and [`normalize`] /
//! [`coords`] hold the pure term and coordinate machinery both passes share.

pub mod coords;
pub mod normalize;
pub mod records;
pub mod thesaurus;

pub use coords::{parse_coordinates, round_bucket, COORDINATE_PRECISION};
pub use normalize::{
    clean_term, concept_id, concept_key, normalize_term, select_preferred_term, slug_from_term,
};
pub use records::{process_rows, PlaceRow, ProcessedRecords, RawPlaceRecord};
pub use thesaurus::{assign_record_uris, build_thesaurus, export_csv, Concept, Thesaurus};
