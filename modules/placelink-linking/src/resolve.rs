//! Duplicate/conflict resolution for linking annotations.
//!
//! Every decision is computed per candidate against a snapshot of existing
//! annotations, with no global state: conflicts and ambiguities come back as
//! data, never as errors.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

use crate::model::LinkingAnnotation;

/// Two same-set annotations created within this window count as accidental
/// double submissions rather than intentional reorders.
pub const DUPLICATE_RECENCY_WINDOW_HOURS: i64 = 48;

/// Partial target overlap above this ratio (of the smaller set) is a
/// structural conflict.
pub const CONFLICT_OVERLAP_RATIO: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsolidationAction {
    /// No equivalent annotation exists; store the candidate as-is.
    Create,
    /// The candidate duplicates the named existing annotation.
    MergeInto(String),
    /// Partial target overlap with the named annotations; left for manual
    /// resolution, never auto-merged.
    Conflict(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    NoMatch,
    /// Same targets in the same order.
    ExactOrder,
    /// Same target set, different order, numerically identical point
    /// selectors on both sides.
    SamePoint,
    /// Same target set, different order, created close together with
    /// substantial content on at least one side.
    RecentResubmission,
    /// Same target set but the reorder looks deliberate.
    IntentionalReorder,
    PartialOverlap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationDecision {
    pub action: ConsolidationAction,
    pub reason: DecisionReason,
    /// Target order the surviving annotation must carry after consolidation.
    pub surviving_order: Vec<String>,
}

impl ConsolidationDecision {
    fn create(reason: DecisionReason, order: &[String]) -> Self {
        Self {
            action: ConsolidationAction::Create,
            reason,
            surviving_order: order.to_vec(),
        }
    }
}

/// Decide what to do with `candidate` given the current population.
pub fn resolve(
    candidate: &LinkingAnnotation,
    existing: &[LinkingAnnotation],
    now: DateTime<Utc>,
) -> ConsolidationDecision {
    let candidate_set: BTreeSet<&str> = candidate.targets.iter().map(String::as_str).collect();
    if candidate_set.is_empty() {
        return ConsolidationDecision::create(DecisionReason::NoMatch, &candidate.targets);
    }

    let same_set: Vec<&LinkingAnnotation> = existing
        .iter()
        .filter(|e| e.id != candidate.id)
        .filter(|e| {
            let set: BTreeSet<&str> = e.targets.iter().map(String::as_str).collect();
            set == candidate_set
        })
        .collect();

    if same_set.is_empty() {
        return non_merge_outcome(candidate, &candidate_set, existing, DecisionReason::NoMatch);
    }

    // Same targets, same order: trivial duplicate.
    let exact: Vec<&LinkingAnnotation> = same_set
        .iter()
        .copied()
        .filter(|e| e.targets == candidate.targets)
        .collect();
    if let Some(survivor) = pick_newest(candidate, &exact) {
        return ConsolidationDecision {
            action: ConsolidationAction::MergeInto(survivor.id.clone()),
            reason: DecisionReason::ExactOrder,
            surviving_order: candidate.targets.clone(),
        };
    }

    // Same set, different order. Order encodes reading sequence, so a
    // reorder only collapses when the evidence says "same submission".
    let same_point: Vec<&LinkingAnnotation> = same_set
        .iter()
        .copied()
        .filter(|e| {
            matches!((candidate.point, e.point), (Some(a), Some(b)) if a == b)
        })
        .collect();
    if let Some(survivor) = pick_newest(candidate, &same_point) {
        return ConsolidationDecision {
            action: ConsolidationAction::MergeInto(survivor.id.clone()),
            reason: DecisionReason::SamePoint,
            surviving_order: newer_order(candidate, survivor),
        };
    }

    // A candidate without a timestamp is being submitted right now.
    let candidate_created = candidate.created.unwrap_or(now);
    let window = Duration::hours(DUPLICATE_RECENCY_WINDOW_HOURS);
    let recent: Vec<&LinkingAnnotation> = same_set
        .iter()
        .copied()
        .filter(|e| {
            let gap = (candidate_created - e.created_or_epoch()).abs();
            gap <= window && (candidate.has_substantial_content() || e.has_substantial_content())
        })
        .collect();
    if let Some(survivor) = pick_newest(candidate, &recent) {
        return ConsolidationDecision {
            action: ConsolidationAction::MergeInto(survivor.id.clone()),
            reason: DecisionReason::RecentResubmission,
            surviving_order: newer_order(candidate, survivor),
        };
    }

    non_merge_outcome(
        candidate,
        &candidate_set,
        existing,
        DecisionReason::IntentionalReorder,
    )
}

/// When no merge applies, partial-overlap conflicts still take precedence
/// over a plain create: a same-set sibling that turned out to be an
/// intentional reorder does not excuse an overlap with a third annotation.
fn non_merge_outcome(
    candidate: &LinkingAnnotation,
    candidate_set: &BTreeSet<&str>,
    existing: &[LinkingAnnotation],
    reason: DecisionReason,
) -> ConsolidationDecision {
    let overlapping = partial_overlaps(candidate_set, candidate, existing);
    if !overlapping.is_empty() {
        return ConsolidationDecision {
            action: ConsolidationAction::Conflict(overlapping),
            reason: DecisionReason::PartialOverlap,
            surviving_order: candidate.targets.clone(),
        };
    }
    ConsolidationDecision::create(reason, &candidate.targets)
}

/// Existing annotations whose target sets partially overlap the candidate's:
/// non-empty intersection, neither a subset of the other, and overlap ratio
/// (relative to the smaller set) above the threshold.
fn partial_overlaps(
    candidate_set: &BTreeSet<&str>,
    candidate: &LinkingAnnotation,
    existing: &[LinkingAnnotation],
) -> Vec<String> {
    existing
        .iter()
        .filter(|e| e.id != candidate.id)
        .filter(|e| {
            let set: BTreeSet<&str> = e.targets.iter().map(String::as_str).collect();
            if set.is_empty() {
                return false;
            }
            let intersection = candidate_set.intersection(&set).count();
            if intersection == 0 {
                return false;
            }
            if candidate_set.is_subset(&set) || set.is_subset(candidate_set) {
                return false;
            }
            let smaller = candidate_set.len().min(set.len());
            intersection as f64 / smaller as f64 > CONFLICT_OVERLAP_RATIO
        })
        .map(|e| e.id.clone())
        .collect()
}

/// Pick the merge target among duplicate matches. More than one match is an
/// ambiguous merge: the most recently created wins (ties broken by id) and
/// the rest are logged as unresolved.
fn pick_newest<'a>(
    candidate: &LinkingAnnotation,
    matches: &[&'a LinkingAnnotation],
) -> Option<&'a LinkingAnnotation> {
    let survivor = matches
        .iter()
        .copied()
        .max_by(|a, b| {
            a.created_or_epoch()
                .cmp(&b.created_or_epoch())
                .then_with(|| a.id.cmp(&b.id))
        })?;

    if matches.len() > 1 {
        let unresolved: Vec<&str> = matches
            .iter()
            .filter(|m| m.id != survivor.id)
            .map(|m| m.id.as_str())
            .collect();
        warn!(
            candidate = %candidate.id,
            survivor = %survivor.id,
            unresolved = ?unresolved,
            "Ambiguous merge: multiple duplicate matches, merging into newest"
        );
    }

    Some(survivor)
}

/// The newer side's target order wins when a reorder is being collapsed.
fn newer_order(candidate: &LinkingAnnotation, survivor: &LinkingAnnotation) -> Vec<String> {
    if candidate.created_or_epoch() >= survivor.created_or_epoch() {
        candidate.targets.clone()
    } else {
        survivor.targets.clone()
    }
}

// ---------------------------------------------------------------------------
// Batch duplicate scanning
// ---------------------------------------------------------------------------

/// One group of annotations sharing a target set.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    /// Id of the annotation the group should consolidate into.
    pub survivor: String,
    /// Ids superseded by the survivor.
    pub duplicates: Vec<String>,
    /// The shared target set, sorted.
    pub target_set: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DuplicateReport {
    pub groups: Vec<DuplicateGroup>,
    pub total_annotations: usize,
    /// Annotations marked for consolidation (survivors excluded).
    pub duplicate_count: usize,
}

/// Scan a whole population for same-set duplicate groups and score the best
/// survivor per group. Used by the consolidation report surface.
pub fn scan_duplicates(annotations: &[LinkingAnnotation]) -> DuplicateReport {
    let mut by_set: HashMap<Vec<&str>, Vec<&LinkingAnnotation>> = HashMap::new();
    for annotation in annotations {
        if annotation.targets.is_empty() {
            continue;
        }
        let mut key: Vec<&str> = annotation.targets.iter().map(String::as_str).collect();
        key.sort_unstable();
        key.dedup();
        by_set.entry(key).or_default().push(annotation);
    }

    let mut groups = Vec::new();
    let mut duplicate_count = 0;
    for (target_set, members) in by_set {
        if members.len() < 2 {
            continue;
        }
        let survivor = members
            .iter()
            .copied()
            .max_by(|a, b| {
                survivor_score(a)
                    .cmp(&survivor_score(b))
                    .then_with(|| a.created_or_epoch().cmp(&b.created_or_epoch()))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .expect("non-empty group");

        let duplicates: Vec<String> = members
            .iter()
            .filter(|m| m.id != survivor.id)
            .map(|m| m.id.clone())
            .collect();
        duplicate_count += duplicates.len();

        groups.push(DuplicateGroup {
            survivor: survivor.id.clone(),
            duplicates,
            target_set: target_set.iter().map(|s| s.to_string()).collect(),
        });
    }

    // Stable report ordering for diffing between runs.
    groups.sort_by(|a, b| a.survivor.cmp(&b.survivor));

    DuplicateReport {
        groups,
        total_annotations: annotations.len(),
        duplicate_count,
    }
}

/// Richer annotations make better survivors: more body fragments, more
/// distinct purposes, more targets.
fn survivor_score(annotation: &LinkingAnnotation) -> usize {
    let bodies = annotation.annotation.bodies();
    let purposes: BTreeSet<&str> = bodies
        .iter()
        .filter_map(|b| b.purpose.as_deref())
        .collect();
    bodies.len() + purposes.len() * 2 + annotation.targets.len()
}
