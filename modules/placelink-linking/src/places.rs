//! Canvas-independent place index derived from geotagged linking
//! annotations.

use std::collections::BTreeMap;

use placelink_common::{GeoPoint, PixelPoint};
use placelink_gazetteer::concept_key;
use serde::Serialize;
use tracing::debug;

use crate::fetch::FetchResult;
use crate::model::LinkingAnnotation;

/// One clustered place: everything the geotagged annotations agree on about
/// a single real-world feature.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceFeature {
    /// Canonical grouping key (shared with the gazetteer thesaurus).
    pub key: String,
    pub name: String,
    pub category: String,
    pub coordinates: Option<GeoPoint>,
    pub modern_name: Option<String>,
    pub alternative_names: Vec<String>,
    /// Pixel point of the primary annotation's selecting body, if any.
    pub point: Option<PixelPoint>,
    /// Annotation the display fields were taken from.
    pub primary_annotation: String,
    /// Every annotation in the cluster.
    pub annotation_ids: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct PlaceIndex {
    /// Features sorted by name.
    pub features: Vec<PlaceFeature>,
    /// Annotations that contributed to a feature.
    pub processed: usize,
    /// Annotations without a usable geotag.
    pub skipped: usize,
    /// Carried through from the fetch pass that produced the input.
    pub partial: bool,
}

/// Cluster geotagged linking annotations into place features. Annotations
/// without a geotag are counted and skipped; clustering uses the same
/// canonical key as the gazetteer, so a place here and a thesaurus concept
/// with the same name, category, and coordinate bucket coincide.
pub fn build_place_index(fetch: &FetchResult) -> PlaceIndex {
    let mut clusters: BTreeMap<String, Vec<&LinkingAnnotation>> = BTreeMap::new();
    let mut skipped = 0usize;

    for annotation in &fetch.annotations {
        let Some(geotag) = &annotation.geotag else {
            skipped += 1;
            continue;
        };
        let category = geotag.category.as_deref().unwrap_or("unknown");
        let key = concept_key(&geotag.name, category, geotag.coordinates);
        clusters.entry(key).or_default().push(annotation);
    }

    let mut features = Vec::with_capacity(clusters.len());
    let mut processed = 0usize;
    for (key, members) in clusters {
        processed += members.len();

        // Newest annotation speaks for the cluster, same rule the duplicate
        // resolver uses for survivors.
        let primary = members
            .iter()
            .copied()
            .max_by(|a, b| {
                a.created_or_epoch()
                    .cmp(&b.created_or_epoch())
                    .then_with(|| a.id.cmp(&b.id))
            })
            .expect("non-empty cluster");
        let geotag = primary.geotag.as_ref().expect("clustered on geotag");

        let mut alternative_names: Vec<String> = geotag.alternative_names.clone();
        for member in &members {
            let name = &member.geotag.as_ref().expect("clustered on geotag").name;
            if *name != geotag.name && !alternative_names.contains(name) {
                alternative_names.push(name.clone());
            }
        }

        features.push(PlaceFeature {
            key,
            name: geotag.name.clone(),
            category: geotag.category.clone().unwrap_or_else(|| "unknown".to_string()),
            coordinates: geotag.coordinates,
            modern_name: geotag.modern_name.clone(),
            alternative_names,
            point: primary.point,
            primary_annotation: primary.id.clone(),
            annotation_ids: members.iter().map(|m| m.id.clone()).collect(),
        });
    }

    features.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.key.cmp(&b.key)));

    debug!(
        features = features.len(),
        processed, skipped, "Place index built"
    );

    PlaceIndex {
        features,
        processed,
        skipped,
        partial: fetch.partial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annorepo_client::Annotation;
    use serde_json::json;

    fn geotagged(id: &str, created: &str, name: &str, lat: f64, lon: f64) -> LinkingAnnotation {
        let wire: Annotation = serde_json::from_value(json!({
            "id": format!("https://repo.example/anno/{id}"),
            "type": "Annotation",
            "motivation": "linking",
            "created": created,
            "target": ["X"],
            "body": [{
                "purpose": "geotagging",
                "source": {
                    "type": "Feature",
                    "properties": {"title": name, "category": "stad/city"},
                    "geometry": {"type": "Point", "coordinates": [lon, lat]}
                }
            }]
        }))
        .unwrap();
        LinkingAnnotation::from_annotation(wire).unwrap()
    }

    fn bare(id: &str) -> LinkingAnnotation {
        let wire: Annotation = serde_json::from_value(json!({
            "id": format!("https://repo.example/anno/{id}"),
            "type": "Annotation",
            "motivation": "linking",
            "target": ["X"],
        }))
        .unwrap();
        LinkingAnnotation::from_annotation(wire).unwrap()
    }

    fn fetch(annotations: Vec<LinkingAnnotation>, partial: bool) -> FetchResult {
        FetchResult {
            annotations,
            partial,
            ..FetchResult::default()
        }
    }

    #[test]
    fn jittered_coordinates_cluster_together() {
        let result = fetch(
            vec![
                geotagged("a", "2025-06-01T10:00:00Z", "Paris", 48.8566, 2.3522),
                geotagged("b", "2025-06-02T10:00:00Z", "Paris", 48.8601, 2.3499),
                geotagged("c", "2025-06-01T10:00:00Z", "Paris", 33.66, -95.56),
            ],
            false,
        );
        let index = build_place_index(&result);

        assert_eq!(index.features.len(), 2, "Texas stays separate");
        assert_eq!(index.processed, 3);
        let french = index
            .features
            .iter()
            .find(|f| f.annotation_ids.len() == 2)
            .unwrap();
        // Newer annotation is primary.
        assert!(french.primary_annotation.ends_with("/b"));
    }

    #[test]
    fn annotations_without_geotags_are_skipped_and_counted() {
        let result = fetch(
            vec![
                geotagged("a", "2025-06-01T10:00:00Z", "Goa", 15.4989, 73.8278),
                bare("b"),
            ],
            false,
        );
        let index = build_place_index(&result);
        assert_eq!(index.features.len(), 1);
        assert_eq!(index.skipped, 1);
    }

    #[test]
    fn partial_flag_is_carried_through() {
        let result = fetch(vec![], true);
        assert!(build_place_index(&result).partial);
    }

    #[test]
    fn differing_member_names_become_alternatives() {
        // Same normalized key ("cochin" vs "Cochin"), different raw spelling.
        let result = fetch(
            vec![
                geotagged("a", "2025-06-01T10:00:00Z", "cochin", 9.9658, 76.2144),
                geotagged("b", "2025-06-02T10:00:00Z", "Cochin", 9.9661, 76.2139),
            ],
            false,
        );
        let index = build_place_index(&result);
        assert_eq!(index.features.len(), 1);
        let feature = &index.features[0];
        assert_eq!(feature.name, "Cochin");
        assert_eq!(feature.alternative_names, vec!["cochin"]);
    }
}
