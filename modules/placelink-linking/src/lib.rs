//! Duplicate-free linking-annotation graph over a W3C annotation store.
//!
//! [`fetch`] walks the store's pages and aggregates linking annotations,
//! [`resolve`] decides create/merge/conflict per candidate, [`merge`]
//! applies merges write-new-before-delete-old, and [`places`] clusters
//! geotagged annotations into a place index. [`cache`] and [`breaker`]
//! are the degradation plumbing the fetcher runs on.

pub mod breaker;
pub mod cache;
pub mod fetch;
pub mod merge;
pub mod model;
pub mod places;
pub mod resolve;

pub use breaker::CircuitBreaker;
pub use cache::TtlCache;
pub use fetch::{AnnotationSource, FetchResult, Fetcher};
pub use merge::{
    merge_annotations, AnnotationStore, AppliedAction, ConsolidationOutcome, Consolidator,
};
pub use model::{Geotag, LinkingAnnotation};
pub use places::{build_place_index, PlaceFeature, PlaceIndex};
pub use resolve::{
    resolve, scan_duplicates, ConsolidationAction, ConsolidationDecision, DecisionReason,
    DuplicateReport,
};
