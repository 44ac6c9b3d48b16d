pub mod error;
pub mod types;

pub use error::{AnnoRepoError, Result};
pub use types::{Annotation, AnnotationPage, Body, OneOrMany, QueryResult, Selector, Target};

use std::time::Duration;

use base64::Engine;

/// Media type the annotation repository expects on reads and writes.
const LD_JSON_PROFILE: &str =
    "application/ld+json; profile=\"http://www.w3.org/ns/anno.jsonld\"";

/// Client for a W3C Web Annotation repository (AnnoRepo). One instance per
/// container. All mutating calls require a bearer token; reads work without.
pub struct AnnoRepoClient {
    client: reqwest::Client,
    base_url: String,
    container: String,
    token: Option<String>,
}

impl AnnoRepoClient {
    pub fn new(base_url: &str, container: &str, token: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            container: container.to_string(),
            token: token.map(String::from),
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url).header("Accept", LD_JSON_PROFILE);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Fetch one page of the container. Pages are zero-based; a page past the
    /// end comes back as a 404 from the server.
    pub async fn fetch_page(&self, page: u32) -> Result<AnnotationPage> {
        let url = format!("{}/w3c/{}?page={}", self.base_url, self.container, page);
        let resp = self.get(&url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AnnoRepoError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }

    /// Fetch a single annotation document by its id URL.
    pub async fn fetch_annotation(&self, annotation_url: &str) -> Result<Annotation> {
        let resp = self.get(annotation_url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AnnoRepoError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }

    /// Run the `with-target` custom query: all annotations targeting the
    /// given id. The parameter is base64 per the AnnoRepo query convention.
    pub async fn query_by_target(&self, target: &str) -> Result<Vec<Annotation>> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(target);
        let url = format!(
            "{}/services/{}/custom-query/with-target:target={}",
            self.base_url, self.container, encoded
        );
        let resp = self.get(&url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AnnoRepoError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let result: QueryResult = resp.json().await?;
        Ok(result.items)
    }

    /// Create a new annotation in the container. The server mints the id.
    pub async fn create_annotation(&self, annotation: &Annotation) -> Result<Annotation> {
        let url = format!("{}/w3c/{}", self.base_url, self.container);
        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", LD_JSON_PROFILE)
            .header("Accept", LD_JSON_PROFILE)
            .json(annotation);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AnnoRepoError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }

    /// Replace an annotation in place. Like deletes, updates require
    /// `If-Match` with the current ETag.
    pub async fn update_annotation(
        &self,
        annotation_url: &str,
        annotation: &Annotation,
    ) -> Result<Annotation> {
        let mut etag = self.probe_etag(annotation_url, reqwest::Method::HEAD).await?;
        if etag.is_none() {
            etag = self.probe_etag(annotation_url, reqwest::Method::GET).await?;
        }
        let etag = etag.ok_or_else(|| AnnoRepoError::MissingEtag(annotation_url.to_string()))?;

        let mut req = self
            .client
            .put(annotation_url)
            .header("Content-Type", LD_JSON_PROFILE)
            .header("Accept", LD_JSON_PROFILE)
            .header("If-Match", etag)
            .json(annotation);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AnnoRepoError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }

    /// Delete an annotation. The repository requires `If-Match` with the
    /// current ETag, so this does a HEAD first (GET as fallback — some
    /// deployments omit the ETag on HEAD).
    pub async fn delete_annotation(&self, annotation_url: &str) -> Result<()> {
        let mut etag = self.probe_etag(annotation_url, reqwest::Method::HEAD).await?;
        if etag.is_none() {
            etag = self.probe_etag(annotation_url, reqwest::Method::GET).await?;
        }
        let etag = etag.ok_or_else(|| AnnoRepoError::MissingEtag(annotation_url.to_string()))?;

        let mut req = self
            .client
            .delete(annotation_url)
            .header("If-Match", etag);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AnnoRepoError::Api {
                status: status.as_u16(),
                message,
            });
        }

        tracing::debug!(url = annotation_url, "Annotation deleted");
        Ok(())
    }

    async fn probe_etag(
        &self,
        annotation_url: &str,
        method: reqwest::Method,
    ) -> Result<Option<String>> {
        let mut req = self
            .client
            .request(method, annotation_url)
            .header("Accept", LD_JSON_PROFILE);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Ok(None);
        }

        Ok(resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }
}
