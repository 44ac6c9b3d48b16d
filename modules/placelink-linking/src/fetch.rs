//! Paginated fetching and aggregation of linking annotations.
//!
//! The remote store offers no consumer-defined server-side filtering, so
//! every view is recomputed by walking the container pages. A failed or
//! timed-out unit degrades to "empty for that unit" and flips the partial
//! flag; only a wholly empty result with failures escalates to an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use futures::{stream, StreamExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use annorepo_client::{AnnoRepoClient, Annotation, AnnotationPage};
use placelink_common::{Clock, PlacelinkError};

use crate::breaker::CircuitBreaker;
use crate::cache::TtlCache;
use crate::model::LinkingAnnotation;

/// Pages fetched in flight at once.
pub const PAGE_CONCURRENCY: usize = 4;

/// How many of an annotation's targets are probed when resolving its canvas.
pub const MAX_TARGET_PROBES: usize = 3;

/// How long a 404'd target id stays blacklisted.
const DEAD_TARGET_TTL_MINUTES: i64 = 30;

/// Read access to the annotation store. [`AnnoRepoClient`] implements this
/// against the real repository; tests use in-memory fakes.
#[async_trait]
pub trait AnnotationSource: Send + Sync {
    async fn fetch_page(&self, page: u32) -> annorepo_client::Result<AnnotationPage>;
    async fn fetch_annotation(&self, url: &str) -> annorepo_client::Result<Annotation>;
    /// All annotations targeting the given id.
    async fn query_by_target(&self, target: &str) -> annorepo_client::Result<Vec<Annotation>>;
}

#[async_trait]
impl AnnotationSource for AnnoRepoClient {
    async fn fetch_page(&self, page: u32) -> annorepo_client::Result<AnnotationPage> {
        AnnoRepoClient::fetch_page(self, page).await
    }

    async fn fetch_annotation(&self, url: &str) -> annorepo_client::Result<Annotation> {
        AnnoRepoClient::fetch_annotation(self, url).await
    }

    async fn query_by_target(&self, target: &str) -> annorepo_client::Result<Vec<Annotation>> {
        AnnoRepoClient::query_by_target(self, target).await
    }
}

/// What one full fetch pass produced.
#[derive(Debug, Default)]
pub struct FetchResult {
    pub annotations: Vec<LinkingAnnotation>,
    /// True when any page failed, timed out, or the deadline cut the pass
    /// short. The result is usable but known-incomplete.
    pub partial: bool,
    pub pages_fetched: u32,
    pub failed_pages: Vec<u32>,
}

enum PageOutcome {
    Items(Vec<Annotation>),
    /// Page past the end of the container (the store 404s these).
    End,
    Failed(String),
}

pub struct Fetcher {
    source: Arc<dyn AnnotationSource>,
    breaker: Arc<CircuitBreaker>,
    dead_targets: TtlCache<String, ()>,
    per_request_timeout: Duration,
}

impl Fetcher {
    pub fn new(
        source: Arc<dyn AnnotationSource>,
        breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
        per_request_timeout: Duration,
    ) -> Self {
        Self {
            source,
            breaker,
            dead_targets: TtlCache::new(
                ChronoDuration::minutes(DEAD_TARGET_TTL_MINUTES),
                clock,
            ),
            per_request_timeout,
        }
    }

    /// Fetch up to `max_pages` container pages and keep the annotations with
    /// motivation `linking`. `deadline` bounds the whole pass; on expiry
    /// whatever was collected comes back flagged partial.
    ///
    /// Errors only when every page failed and nothing was collected.
    pub async fn fetch_all_linking(
        &self,
        max_pages: u32,
        deadline: Option<Duration>,
    ) -> Result<FetchResult, PlacelinkError> {
        let mut result = FetchResult::default();

        let mut pages = stream::iter(0..max_pages)
            .map(|page| async move { (page, self.fetch_one_page(page).await) })
            .buffer_unordered(PAGE_CONCURRENCY);

        let deadline_at = deadline.map(|d| tokio::time::Instant::now() + d);
        loop {
            let next = match deadline_at {
                Some(at) => match tokio::time::timeout_at(at, pages.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            collected = result.annotations.len(),
                            "Fetch deadline reached, returning partial result"
                        );
                        result.partial = true;
                        break;
                    }
                },
                None => pages.next().await,
            };
            let Some((page, outcome)) = next else { break };

            match outcome {
                PageOutcome::Items(items) => {
                    result.pages_fetched += 1;
                    result.annotations.extend(
                        items
                            .into_iter()
                            .filter_map(LinkingAnnotation::from_annotation),
                    );
                }
                PageOutcome::End => {}
                PageOutcome::Failed(reason) => {
                    warn!(page, reason = %reason, "Page fetch failed, continuing without it");
                    result.failed_pages.push(page);
                    result.partial = true;
                }
            }
        }
        drop(pages);

        if result.annotations.is_empty() && !result.failed_pages.is_empty() {
            return Err(PlacelinkError::RemoteUnavailable(format!(
                "all {} attempted pages failed",
                result.failed_pages.len()
            )));
        }

        result.failed_pages.sort_unstable();
        debug!(
            annotations = result.annotations.len(),
            pages = result.pages_fetched,
            partial = result.partial,
            "Linking fetch pass complete"
        );
        Ok(result)
    }

    async fn fetch_one_page(&self, page: u32) -> PageOutcome {
        if !self.breaker.allows() {
            return PageOutcome::Failed("circuit open".to_string());
        }

        match timeout(self.per_request_timeout, self.source.fetch_page(page)).await {
            Ok(Ok(fetched)) => {
                self.breaker.record_success();
                PageOutcome::Items(fetched.items)
            }
            Ok(Err(annorepo_client::AnnoRepoError::Api { status: 404, .. })) => {
                self.breaker.record_success();
                PageOutcome::End
            }
            Ok(Err(e)) => {
                self.breaker.record_failure();
                PageOutcome::Failed(e.to_string())
            }
            Err(_) => {
                self.breaker.record_failure();
                PageOutcome::Failed("timed out".to_string())
            }
        }
    }

    /// Resolve which canvas an annotation belongs to by probing a bounded
    /// prefix of its targets: the first target whose own document names a
    /// source wins. Targets that 404 are blacklisted for a while so repeat
    /// builds skip them. `None` means the annotation is omitted from
    /// canvas-scoped views.
    pub async fn resolve_target_canvas(&self, annotation: &LinkingAnnotation) -> Option<String> {
        for target in annotation.targets.iter().take(MAX_TARGET_PROBES) {
            if self.dead_targets.contains(target) {
                continue;
            }
            if !self.breaker.allows() {
                return None;
            }

            match timeout(self.per_request_timeout, self.source.fetch_annotation(target)).await {
                Ok(Ok(doc)) => {
                    self.breaker.record_success();
                    if let Some(canvas) = doc.target_ids().into_iter().next() {
                        return Some(canvas);
                    }
                }
                Ok(Err(annorepo_client::AnnoRepoError::Api { status: 404, .. })) => {
                    self.breaker.record_success();
                    self.dead_targets.insert(target.clone(), ());
                }
                Ok(Err(e)) => {
                    self.breaker.record_failure();
                    debug!(target, error = %e, "Target probe failed");
                }
                Err(_) => {
                    self.breaker.record_failure();
                    debug!(target, "Target probe timed out");
                }
            }
        }
        None
    }

    /// The existing population a new candidate must be resolved against:
    /// every linking annotation sharing at least one target with it, via the
    /// store's targeted query instead of a full container walk. Failed
    /// sub-queries degrade to empty; an error comes back only when every
    /// query failed.
    pub async fn existing_for(
        &self,
        candidate: &LinkingAnnotation,
    ) -> Result<Vec<LinkingAnnotation>, PlacelinkError> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        let mut failures = 0usize;

        for target in &candidate.targets {
            if !self.breaker.allows() {
                failures += 1;
                continue;
            }
            match timeout(self.per_request_timeout, self.source.query_by_target(target)).await {
                Ok(Ok(items)) => {
                    self.breaker.record_success();
                    for annotation in items.into_iter().filter_map(LinkingAnnotation::from_annotation)
                    {
                        if annotation.id != candidate.id && seen.insert(annotation.id.clone()) {
                            out.push(annotation);
                        }
                    }
                }
                Ok(Err(e)) => {
                    self.breaker.record_failure();
                    warn!(target, error = %e, "Target query failed, continuing without it");
                    failures += 1;
                }
                Err(_) => {
                    self.breaker.record_failure();
                    warn!(target, "Target query timed out, continuing without it");
                    failures += 1;
                }
            }
        }

        if out.is_empty() && failures > 0 && failures == candidate.targets.len() {
            return Err(PlacelinkError::RemoteUnavailable(format!(
                "all {failures} target queries failed"
            )));
        }
        Ok(out)
    }

    /// All linking annotations belonging to one canvas. Recomputed per call;
    /// safe to retry wholesale.
    pub async fn linking_for_canvas(
        &self,
        canvas_id: &str,
        max_pages: u32,
        deadline: Option<Duration>,
    ) -> Result<FetchResult, PlacelinkError> {
        let mut all = self.fetch_all_linking(max_pages, deadline).await?;

        let annotations = std::mem::take(&mut all.annotations);
        let mut resolved = stream::iter(annotations)
            .map(|annotation| async move {
                let canvas = self.resolve_target_canvas(&annotation).await;
                (annotation, canvas)
            })
            .buffer_unordered(PAGE_CONCURRENCY);

        let mut matching = Vec::new();
        while let Some((annotation, canvas)) = resolved.next().await {
            if canvas.as_deref() == Some(canvas_id) {
                matching.push(annotation);
            }
        }
        drop(resolved);

        all.annotations = matching;
        Ok(all)
    }
}
