//! Domain view over wire annotations with motivation `linking`.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use annorepo_client::{Annotation, Body};
use placelink_common::{GeoPoint, PixelPoint};

/// The place a geotagging body claims its annotation refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct Geotag {
    pub name: String,
    pub category: Option<String>,
    pub coordinates: Option<GeoPoint>,
    pub modern_name: Option<String>,
    pub alternative_names: Vec<String>,
}

/// A linking annotation: binds together other annotations (text spotting,
/// geotag, point) that describe one feature on a map. Target order carries
/// reading-sequence meaning and is preserved exactly as stored.
#[derive(Debug, Clone)]
pub struct LinkingAnnotation {
    pub id: String,
    /// Target ids in document order.
    pub targets: Vec<String>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub geotag: Option<Geotag>,
    pub point: Option<PixelPoint>,
    /// The full wire document, kept so merges never drop fields we do not
    /// model.
    pub annotation: Annotation,
}

impl LinkingAnnotation {
    /// Build the domain view. Returns `None` for annotations whose
    /// motivation is not `linking`.
    pub fn from_annotation(annotation: Annotation) -> Option<Self> {
        if !annotation.has_motivation("linking") {
            return None;
        }

        let targets = annotation.target_ids();
        let geotag = annotation
            .body_with_purpose("geotagging")
            .and_then(geotag_from_body);
        let point = annotation
            .body_with_purpose("selecting")
            .and_then(point_from_body);

        Some(Self {
            id: annotation.id.clone(),
            targets,
            created: annotation.created.or_else(|| newest_body_time(&annotation)),
            modified: annotation.modified,
            geotag,
            point,
            annotation,
        })
    }

    /// Whether this annotation carries more than bare target grouping.
    pub fn has_substantial_content(&self) -> bool {
        self.geotag.is_some() || self.point.is_some()
    }

    /// The instant used for recency comparisons: creation time, falling back
    /// to the epoch so undated annotations always lose.
    pub fn created_or_epoch(&self) -> DateTime<Utc> {
        self.created.unwrap_or(DateTime::UNIX_EPOCH)
    }
}

fn newest_body_time(annotation: &Annotation) -> Option<DateTime<Utc>> {
    annotation
        .bodies()
        .iter()
        .filter_map(|b| b.created.or(b.modified))
        .max()
}

fn point_from_body(body: &Body) -> Option<PixelPoint> {
    let selector = body.selector.as_ref()?;
    if selector.kind != "PointSelector" {
        return None;
    }
    Some(PixelPoint {
        x: selector.x?,
        y: selector.y?,
    })
}

/// Parse a geotagging body's `source` (typically a GeoJSON feature or a
/// gazetteer entry) into a [`Geotag`].
fn geotag_from_body(body: &Body) -> Option<Geotag> {
    let source = body.source.as_ref()?;

    let name = first_string(
        source,
        &[
            &["properties", "title"],
            &["properties", "preferred_title"],
            &["label"],
            &["display_name"],
            &["name"],
        ],
    )?;

    let category = first_string(
        source,
        &[&["properties", "category"], &["properties", "type"]],
    )
    .or_else(|| {
        first_string(source, &[&["type"]]).filter(|t| t != "Feature")
    });

    let modern_name = first_string(
        source,
        &[
            &["properties", "preferred_modern_title"],
            &["properties", "modern_name"],
            &["display_name"],
        ],
    )
    .filter(|m| *m != name);

    let alternative_names = source
        .get("properties")
        .and_then(|p| p.get("alternative_names"))
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(Geotag {
        name,
        category,
        coordinates: coordinates_from_source(source),
        modern_name,
        alternative_names,
    })
}

/// Coordinates appear in three shapes across sources: GeoJSON
/// `geometry.coordinates` ([lon, lat]), flat `properties` lat/lon fields,
/// or a WKT `POINT(lon lat)` string.
fn coordinates_from_source(source: &Value) -> Option<GeoPoint> {
    if let Some(coords) = source
        .get("geometry")
        .and_then(|g| g.get("coordinates"))
        .and_then(Value::as_array)
    {
        if let (Some(lon), Some(lat)) = (
            coords.first().and_then(number),
            coords.get(1).and_then(number),
        ) {
            return Some(GeoPoint {
                latitude: lat,
                longitude: lon,
            });
        }
    }

    if let Some(props) = source.get("properties") {
        let lat = props
            .get("latitude")
            .or_else(|| props.get("lat"))
            .and_then(number);
        let lon = props
            .get("longitude")
            .or_else(|| props.get("lon"))
            .and_then(number);
        if let (Some(latitude), Some(longitude)) = (lat, lon) {
            return Some(GeoPoint {
                latitude,
                longitude,
            });
        }
    }

    let wkt = first_string(
        source,
        &[&["defined_by"], &["properties", "defined_by"], &["geometry"]],
    )?;
    parse_wkt_point(&wkt)
}

/// `POINT(lon lat)`, whitespace-tolerant.
fn parse_wkt_point(wkt: &str) -> Option<GeoPoint> {
    static WKT_POINT: OnceLock<Regex> = OnceLock::new();
    let re = WKT_POINT.get_or_init(|| {
        Regex::new(r"(?i)POINT\s*\(\s*(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)\s*\)")
            .expect("static pattern")
    });

    let captures = re.captures(wkt)?;
    let longitude: f64 = captures[1].parse().ok()?;
    let latitude: f64 = captures[2].parse().ok()?;
    Some(GeoPoint {
        latitude,
        longitude,
    })
}

/// First path that resolves to a non-empty string. Paths are tried in order
/// so callers encode field preference directly.
fn first_string(source: &Value, paths: &[&[&str]]) -> Option<String> {
    for path in paths {
        let mut node = source;
        let mut found = true;
        for segment in *path {
            match node.get(segment) {
                Some(next) => node = next,
                None => {
                    found = false;
                    break;
                }
            }
        }
        if found {
            if let Some(s) = node.as_str() {
                let s = s.trim();
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            }
        }
    }
    None
}

fn number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}
