//! Merging a duplicate linking annotation into its survivor, locally and
//! against the remote store.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use annorepo_client::{Annotation, AnnoRepoClient, Body, OneOrMany, Target};
use placelink_common::PlacelinkError;

use crate::model::LinkingAnnotation;
use crate::resolve::{ConsolidationAction, ConsolidationDecision};

/// Build the merged wire document for a duplicate pair.
///
/// Body fragments from both sides are unioned: at most one body survives per
/// purpose (the more recent side wins), untyped bodies are kept verbatim and
/// deduplicated by content. The target list is rebuilt in `surviving_order`,
/// reusing each side's full target objects so selector details survive.
pub fn merge_annotations(
    survivor: &LinkingAnnotation,
    duplicate: &LinkingAnnotation,
    surviving_order: &[String],
    now: DateTime<Utc>,
) -> Annotation {
    let mut merged = survivor.annotation.clone();

    merged.body = Some(OneOrMany::Many(merge_bodies(survivor, duplicate)));
    merged.target = Some(OneOrMany::Many(rebuild_targets(
        surviving_order,
        &survivor.annotation,
        &duplicate.annotation,
    )));
    merged.modified = Some(now);

    merged
}

/// Union of both sides' body fragments, one per purpose, newest wins.
fn merge_bodies(survivor: &LinkingAnnotation, duplicate: &LinkingAnnotation) -> Vec<Body> {
    // (purpose, effective timestamp, body), in first-appearance order.
    let mut typed: Vec<(String, DateTime<Utc>, Body)> = Vec::new();
    let mut untyped: Vec<Body> = Vec::new();

    let sides = [
        (survivor, survivor.created_or_epoch()),
        (duplicate, duplicate.created_or_epoch()),
    ];
    for (side, side_time) in sides {
        for body in side.annotation.bodies() {
            let time = body.modified.or(body.created).unwrap_or(side_time);
            match body.purpose.clone() {
                Some(purpose) => {
                    match typed.iter_mut().find(|(p, _, _)| *p == purpose) {
                        Some(slot) if time > slot.1 => *slot = (purpose, time, body.clone()),
                        Some(_) => {}
                        None => typed.push((purpose, time, body.clone())),
                    }
                }
                None => {
                    let rendered = serde_json::to_string(body).unwrap_or_default();
                    let seen = untyped
                        .iter()
                        .any(|b| serde_json::to_string(b).unwrap_or_default() == rendered);
                    if !seen {
                        untyped.push(body.clone());
                    }
                }
            }
        }
    }

    typed
        .into_iter()
        .map(|(_, _, body)| body)
        .chain(untyped)
        .collect()
}

/// Targets in the decided order. Full target objects are preferred over bare
/// id strings, the survivor's copy over the duplicate's.
fn rebuild_targets(order: &[String], survivor: &Annotation, duplicate: &Annotation) -> Vec<Target> {
    let lookup = |id: &str| -> Option<Target> {
        survivor
            .target
            .as_ref()
            .and_then(|t| t.as_slice().iter().find(|t| t.id() == Some(id)))
            .or_else(|| {
                duplicate
                    .target
                    .as_ref()
                    .and_then(|t| t.as_slice().iter().find(|t| t.id() == Some(id)))
            })
            .cloned()
    };

    order
        .iter()
        .map(|id| lookup(id).unwrap_or_else(|| Target::Id(id.clone())))
        .collect()
}

/// What a remote consolidation actually did.
#[derive(Debug)]
pub struct ConsolidationOutcome {
    /// The survivor document as the store returned it after the write.
    pub survivor: Annotation,
    pub deleted: Vec<String>,
    /// Superseded ids whose delete failed. Left in place; the next
    /// consolidation pass rediscovers and re-merges them.
    pub failed_deletes: Vec<String>,
}

/// Write access to the annotation store. [`AnnoRepoClient`] implements this
/// against the real repository; tests use in-memory fakes, like the read
/// side's `AnnotationSource`.
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    async fn create_annotation(
        &self,
        annotation: &Annotation,
    ) -> annorepo_client::Result<Annotation>;
    async fn update_annotation(
        &self,
        annotation_url: &str,
        annotation: &Annotation,
    ) -> annorepo_client::Result<Annotation>;
    async fn delete_annotation(&self, annotation_url: &str) -> annorepo_client::Result<()>;
}

#[async_trait]
impl AnnotationStore for AnnoRepoClient {
    async fn create_annotation(
        &self,
        annotation: &Annotation,
    ) -> annorepo_client::Result<Annotation> {
        AnnoRepoClient::create_annotation(self, annotation).await
    }

    async fn update_annotation(
        &self,
        annotation_url: &str,
        annotation: &Annotation,
    ) -> annorepo_client::Result<Annotation> {
        AnnoRepoClient::update_annotation(self, annotation_url, annotation).await
    }

    async fn delete_annotation(&self, annotation_url: &str) -> annorepo_client::Result<()> {
        AnnoRepoClient::delete_annotation(self, annotation_url).await
    }
}

/// What applying one decision against the store actually did.
#[derive(Debug)]
pub enum AppliedAction {
    Created(Annotation),
    Merged(ConsolidationOutcome),
    /// Conflicts are surfaced, never written.
    SurfacedConflict(Vec<String>),
}

/// Applies merge decisions against the remote store, write-new-before-
/// delete-old: the superseded document is only removed once the survivor
/// write has succeeded, so an interruption mid-consolidation leaves a
/// recoverable duplicate rather than data loss.
pub struct Consolidator<'a> {
    store: &'a dyn AnnotationStore,
}

impl<'a> Consolidator<'a> {
    pub fn new(store: &'a dyn AnnotationStore) -> Self {
        Self { store }
    }

    /// Execute a [`ConsolidationDecision`] for a candidate. `existing` must
    /// be the population the decision was resolved against.
    pub async fn apply(
        &self,
        candidate: &LinkingAnnotation,
        decision: &ConsolidationDecision,
        existing: &[LinkingAnnotation],
        now: DateTime<Utc>,
    ) -> Result<AppliedAction, PlacelinkError> {
        match &decision.action {
            ConsolidationAction::Create => {
                let created = self
                    .store
                    .create_annotation(&candidate.annotation)
                    .await
                    .map_err(|e| {
                        PlacelinkError::RemoteUnavailable(format!(
                            "creating annotation {}: {e}",
                            candidate.id
                        ))
                    })?;
                info!(id = %created.id, "Annotation created");
                Ok(AppliedAction::Created(created))
            }
            ConsolidationAction::MergeInto(survivor_id) => {
                let survivor = existing
                    .iter()
                    .find(|e| e.id == *survivor_id)
                    .ok_or_else(|| {
                        anyhow!("merge target {survivor_id} is not in the resolved population")
                    })?;
                let outcome = self
                    .consolidate(survivor, candidate, &decision.surviving_order, now)
                    .await?;
                Ok(AppliedAction::Merged(outcome))
            }
            ConsolidationAction::Conflict(ids) => {
                warn!(
                    candidate = %candidate.id,
                    conflicts = ?ids,
                    "Partial target overlap, left for manual resolution"
                );
                Ok(AppliedAction::SurfacedConflict(ids.clone()))
            }
        }
    }

    pub async fn consolidate(
        &self,
        survivor: &LinkingAnnotation,
        duplicate: &LinkingAnnotation,
        surviving_order: &[String],
        now: DateTime<Utc>,
    ) -> Result<ConsolidationOutcome, PlacelinkError> {
        let merged = merge_annotations(survivor, duplicate, surviving_order, now);

        let written = self
            .store
            .update_annotation(&survivor.id, &merged)
            .await
            .map_err(|e| {
                PlacelinkError::RemoteUnavailable(format!(
                    "writing merged survivor {}: {e}",
                    survivor.id
                ))
            })?;

        let mut outcome = ConsolidationOutcome {
            survivor: written,
            deleted: Vec::new(),
            failed_deletes: Vec::new(),
        };

        match self.store.delete_annotation(&duplicate.id).await {
            Ok(()) => {
                info!(survivor = %survivor.id, deleted = %duplicate.id, "Consolidated duplicate");
                outcome.deleted.push(duplicate.id.clone());
            }
            Err(e) => {
                warn!(
                    survivor = %survivor.id,
                    duplicate = %duplicate.id,
                    error = %e,
                    "Survivor written but superseded annotation not deleted"
                );
                outcome.failed_deletes.push(duplicate.id.clone());
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;

    use annorepo_client::AnnoRepoError;
    use crate::resolve::DecisionReason;

    #[derive(Debug, PartialEq)]
    enum Op {
        Create(String),
        Update(String),
        Delete(String),
    }

    #[derive(Default)]
    struct FakeStore {
        ops: Mutex<Vec<Op>>,
        fail_update: bool,
        fail_delete: bool,
    }

    #[async_trait]
    impl AnnotationStore for FakeStore {
        async fn create_annotation(
            &self,
            annotation: &Annotation,
        ) -> annorepo_client::Result<Annotation> {
            self.ops
                .lock()
                .unwrap()
                .push(Op::Create(annotation.id.clone()));
            Ok(annotation.clone())
        }

        async fn update_annotation(
            &self,
            annotation_url: &str,
            annotation: &Annotation,
        ) -> annorepo_client::Result<Annotation> {
            self.ops
                .lock()
                .unwrap()
                .push(Op::Update(annotation_url.to_string()));
            if self.fail_update {
                return Err(AnnoRepoError::Api {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(annotation.clone())
        }

        async fn delete_annotation(&self, annotation_url: &str) -> annorepo_client::Result<()> {
            self.ops
                .lock()
                .unwrap()
                .push(Op::Delete(annotation_url.to_string()));
            if self.fail_delete {
                return Err(AnnoRepoError::MissingEtag(annotation_url.to_string()));
            }
            Ok(())
        }
    }

    fn linking(id: &str, created: &str, value: serde_json::Value) -> LinkingAnnotation {
        let mut doc = json!({
            "id": format!("https://repo.example/anno/{id}"),
            "type": "Annotation",
            "motivation": "linking",
            "created": created,
        });
        doc.as_object_mut()
            .unwrap()
            .extend(value.as_object().unwrap().clone());
        let wire: Annotation = serde_json::from_value(doc).unwrap();
        LinkingAnnotation::from_annotation(wire).unwrap()
    }

    fn now() -> DateTime<Utc> {
        "2025-06-10T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn newer_side_wins_per_purpose() {
        let survivor = linking(
            "old",
            "2025-06-01T10:00:00Z",
            json!({
                "target": ["X", "Y"],
                "body": [
                    {"purpose": "geotagging", "source": {"label": "Old Goa"}},
                    {"purpose": "identifying", "value": "kept from survivor"}
                ]
            }),
        );
        let duplicate = linking(
            "new",
            "2025-06-02T10:00:00Z",
            json!({
                "target": ["Y", "X"],
                "body": [
                    {"purpose": "geotagging", "source": {"label": "Goa"}}
                ]
            }),
        );

        let order = vec!["Y".to_string(), "X".to_string()];
        let merged = merge_annotations(&survivor, &duplicate, &order, now());

        let bodies = merged.bodies();
        assert_eq!(bodies.len(), 2);
        let geotag = bodies
            .iter()
            .find(|b| b.purpose.as_deref() == Some("geotagging"))
            .unwrap();
        assert_eq!(
            geotag.source.as_ref().unwrap()["label"],
            json!("Goa"),
            "geotag from the newer side wins"
        );
        assert!(bodies
            .iter()
            .any(|b| b.value.as_deref() == Some("kept from survivor")));
    }

    #[test]
    fn merged_document_carries_the_decided_order() {
        let survivor = linking(
            "a",
            "2025-06-01T10:00:00Z",
            json!({"target": ["X", "Y", "Z"]}),
        );
        let duplicate = linking(
            "b",
            "2025-06-01T11:00:00Z",
            json!({"target": ["Z", "Y", "X"]}),
        );

        let order = vec!["Z".to_string(), "Y".to_string(), "X".to_string()];
        let merged = merge_annotations(&survivor, &duplicate, &order, now());
        assert_eq!(merged.target_ids(), vec!["Z", "Y", "X"]);
        assert_eq!(merged.modified, Some(now()));
        assert_eq!(merged.id, survivor.id, "survivor keeps its id");
    }

    #[test]
    fn at_most_one_point_selector_survives() {
        let survivor = linking(
            "a",
            "2025-06-01T10:00:00Z",
            json!({
                "target": ["X", "Y"],
                "body": [{
                    "purpose": "selecting",
                    "selector": {"type": "PointSelector", "x": 1.0, "y": 2.0}
                }]
            }),
        );
        let duplicate = linking(
            "b",
            "2025-06-03T10:00:00Z",
            json!({
                "target": ["Y", "X"],
                "body": [{
                    "purpose": "selecting",
                    "selector": {"type": "PointSelector", "x": 668.0, "y": 1165.0}
                }]
            }),
        );

        let order = vec!["X".to_string(), "Y".to_string()];
        let merged = merge_annotations(&survivor, &duplicate, &order, now());
        let selecting: Vec<&Body> = merged
            .bodies()
            .iter()
            .filter(|b| b.purpose.as_deref() == Some("selecting"))
            .collect();
        assert_eq!(selecting.len(), 1);
        assert_eq!(selecting[0].selector.as_ref().unwrap().x, Some(668.0));
    }

    fn pair() -> (LinkingAnnotation, LinkingAnnotation) {
        let survivor = linking("a", "2025-06-01T10:00:00Z", json!({"target": ["X", "Y"]}));
        let duplicate = linking("b", "2025-06-02T10:00:00Z", json!({"target": ["Y", "X"]}));
        (survivor, duplicate)
    }

    #[tokio::test]
    async fn survivor_is_written_before_the_duplicate_is_deleted() {
        let store = FakeStore::default();
        let (survivor, duplicate) = pair();
        let order = vec!["Y".to_string(), "X".to_string()];

        let outcome = Consolidator::new(&store)
            .consolidate(&survivor, &duplicate, &order, now())
            .await
            .unwrap();

        assert_eq!(outcome.deleted, vec![duplicate.id.clone()]);
        assert!(outcome.failed_deletes.is_empty());
        assert_eq!(
            *store.ops.lock().unwrap(),
            vec![Op::Update(survivor.id), Op::Delete(duplicate.id)]
        );
    }

    #[tokio::test]
    async fn failed_survivor_write_never_deletes_the_duplicate() {
        let store = FakeStore {
            fail_update: true,
            ..FakeStore::default()
        };
        let (survivor, duplicate) = pair();
        let order = vec!["X".to_string(), "Y".to_string()];

        let err = Consolidator::new(&store)
            .consolidate(&survivor, &duplicate, &order, now())
            .await
            .unwrap_err();

        assert!(matches!(err, PlacelinkError::RemoteUnavailable(_)));
        let ops = store.ops.lock().unwrap();
        assert!(!ops.iter().any(|op| matches!(op, Op::Delete(_))));
    }

    #[tokio::test]
    async fn failed_delete_is_reported_not_fatal() {
        let store = FakeStore {
            fail_delete: true,
            ..FakeStore::default()
        };
        let (survivor, duplicate) = pair();
        let order = vec!["X".to_string(), "Y".to_string()];

        let outcome = Consolidator::new(&store)
            .consolidate(&survivor, &duplicate, &order, now())
            .await
            .unwrap();

        assert!(outcome.deleted.is_empty());
        assert_eq!(outcome.failed_deletes, vec![duplicate.id]);
    }

    #[tokio::test]
    async fn apply_executes_each_decision_kind() {
        let store = FakeStore::default();
        let consolidator = Consolidator::new(&store);
        let (existing, candidate) = pair();

        let create = ConsolidationDecision {
            action: ConsolidationAction::Create,
            reason: DecisionReason::NoMatch,
            surviving_order: candidate.targets.clone(),
        };
        let applied = consolidator
            .apply(&candidate, &create, std::slice::from_ref(&existing), now())
            .await
            .unwrap();
        assert!(matches!(applied, AppliedAction::Created(_)));

        let merge = ConsolidationDecision {
            action: ConsolidationAction::MergeInto(existing.id.clone()),
            reason: DecisionReason::SamePoint,
            surviving_order: candidate.targets.clone(),
        };
        let applied = consolidator
            .apply(&candidate, &merge, std::slice::from_ref(&existing), now())
            .await
            .unwrap();
        assert!(matches!(applied, AppliedAction::Merged(_)));

        let conflict = ConsolidationDecision {
            action: ConsolidationAction::Conflict(vec![existing.id.clone()]),
            reason: DecisionReason::PartialOverlap,
            surviving_order: candidate.targets.clone(),
        };
        let ops_before = store.ops.lock().unwrap().len();
        let applied = consolidator
            .apply(&candidate, &conflict, std::slice::from_ref(&existing), now())
            .await
            .unwrap();
        assert!(matches!(applied, AppliedAction::SurfacedConflict(_)));
        assert_eq!(
            store.ops.lock().unwrap().len(),
            ops_before,
            "conflicts never touch the store"
        );
    }
}
