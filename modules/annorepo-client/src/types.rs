use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value that a W3C annotation document stores either as a single element
/// or as an array. `target`, `body`, and `motivation` all do this.
///
/// `Many` must be declared first: untagged deserialization tries variants in
/// order, and element types that match any JSON (like [`Target::Resource`])
/// would otherwise swallow whole arrays as a single element.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(v) => std::slice::from_ref(v),
            OneOrMany::Many(vs) => vs.as_slice(),
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(vs) => vs,
        }
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(vs: Vec<T>) -> Self {
        OneOrMany::Many(vs)
    }
}

/// An annotation target: either a bare id URL or a specific resource object
/// carrying `source`/`id` plus selector fields we pass through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    Id(String),
    Resource(Value),
}

impl Target {
    /// The target's id URL, whichever field the document used for it.
    pub fn id(&self) -> Option<&str> {
        match self {
            Target::Id(s) => Some(s.as_str()),
            Target::Resource(v) => v
                .get("source")
                .and_then(Value::as_str)
                .or_else(|| v.get("id").and_then(Value::as_str)),
        }
    }
}

/// A `PointSelector` (or other selector — unknown kinds pass through).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selector {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One body fragment of an annotation, typed by `purpose`. Fields we do not
/// model are kept in `extra` so merge/rewrite operations never drop them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A W3C Web Annotation document as the repository hands it to us.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "annotation_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motivation: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<OneOrMany<Target>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<OneOrMany<Body>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn annotation_type() -> String {
    "Annotation".to_string()
}

impl Annotation {
    pub fn has_motivation(&self, motivation: &str) -> bool {
        self.motivation
            .as_ref()
            .map(|m| m.as_slice().iter().any(|s| s == motivation))
            .unwrap_or(false)
    }

    /// Target id URLs in document order. Non-URL resource targets without a
    /// `source`/`id` are skipped.
    pub fn target_ids(&self) -> Vec<String> {
        self.target
            .as_ref()
            .map(|t| {
                t.as_slice()
                    .iter()
                    .filter_map(|t| t.id().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn bodies(&self) -> &[Body] {
        self.body.as_ref().map(OneOrMany::as_slice).unwrap_or(&[])
    }

    /// First body fragment with the given purpose.
    pub fn body_with_purpose(&self, purpose: &str) -> Option<&Body> {
        self.bodies()
            .iter()
            .find(|b| b.purpose.as_deref() == Some(purpose))
    }
}

/// One page of a W3C annotation container.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnnotationPage {
    #[serde(default)]
    pub items: Vec<Annotation>,
    #[serde(default)]
    pub next: Option<String>,
}

/// Result envelope of a custom query (`/services/../custom-query/..`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub items: Vec<Annotation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_ids_handle_strings_and_resources() {
        let ann: Annotation = serde_json::from_str(
            r#"{
                "id": "https://repo.example/anno/1",
                "type": "Annotation",
                "motivation": "linking",
                "target": [
                    "https://repo.example/anno/a",
                    {"source": "https://repo.example/anno/b"},
                    {"id": "https://repo.example/anno/c"}
                ]
            }"#,
        )
        .unwrap();

        assert!(ann.has_motivation("linking"));
        assert_eq!(
            ann.target_ids(),
            vec![
                "https://repo.example/anno/a",
                "https://repo.example/anno/b",
                "https://repo.example/anno/c"
            ]
        );
    }

    #[test]
    fn array_valued_target_never_collapses_into_one_resource() {
        // Resource targets are arbitrary JSON objects, so an array target
        // must parse element-by-element rather than as a single resource
        // that happens to be an array.
        let ann: Annotation = serde_json::from_str(
            r#"{"id": "x", "target": [{"source": "https://repo.example/anno/a"}]}"#,
        )
        .unwrap();

        assert!(matches!(ann.target, Some(OneOrMany::Many(ref v)) if v.len() == 1));
        assert_eq!(ann.target_ids(), vec!["https://repo.example/anno/a"]);
    }

    #[test]
    fn single_target_and_body_deserialize() {
        let ann: Annotation = serde_json::from_str(
            r#"{
                "id": "x",
                "target": "https://repo.example/anno/a",
                "body": {"purpose": "selecting", "selector": {"type": "PointSelector", "x": 668, "y": 1165}}
            }"#,
        )
        .unwrap();

        assert_eq!(ann.target_ids(), vec!["https://repo.example/anno/a"]);
        let body = ann.body_with_purpose("selecting").unwrap();
        let sel = body.selector.as_ref().unwrap();
        assert_eq!(sel.kind, "PointSelector");
        assert_eq!(sel.x, Some(668.0));
    }

    #[test]
    fn unknown_body_fields_round_trip() {
        let raw = r#"{"id":"x","body":[{"purpose":"geotagging","source":{"label":"Cochin"},"confidence":0.9}]}"#;
        let ann: Annotation = serde_json::from_str(raw).unwrap();
        let body = ann.body_with_purpose("geotagging").unwrap();
        assert_eq!(body.extra.get("confidence"), Some(&serde_json::json!(0.9)));

        let back = serde_json::to_value(&ann).unwrap();
        assert_eq!(back["body"][0]["confidence"], serde_json::json!(0.9));
    }
}
