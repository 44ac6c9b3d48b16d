use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use annorepo_client::AnnoRepoClient;
use placelink_common::{Config, SystemClock};
use placelink_linking::{scan_duplicates, CircuitBreaker, Fetcher};

/// Dry-run duplicate report: walks the container, scans for same-set
/// duplicate groups, and logs what a consolidation pass would merge.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("placelink=info".parse()?))
        .init();

    info!("Placelink cleanup report starting...");

    let config = Config::from_env();
    config.log_redacted();

    let client = AnnoRepoClient::new(
        &config.annorepo_base_url,
        &config.annorepo_container,
        config.annorepo_token.as_deref(),
    );
    let clock = Arc::new(SystemClock);
    let breaker = Arc::new(CircuitBreaker::new("annorepo", clock.clone()));
    let fetcher = Fetcher::new(
        Arc::new(client),
        breaker,
        clock,
        Duration::from_millis(config.fetch_timeout_ms),
    );

    let fetched = fetcher
        .fetch_all_linking(config.fetch_max_pages, None)
        .await?;
    if fetched.partial {
        warn!(
            failed_pages = ?fetched.failed_pages,
            "Fetch was partial; the report may undercount duplicates"
        );
    }
    info!(
        annotations = fetched.annotations.len(),
        pages = fetched.pages_fetched,
        "Fetched linking annotations"
    );

    let report = scan_duplicates(&fetched.annotations);
    for group in &report.groups {
        info!(
            survivor = %group.survivor,
            duplicates = ?group.duplicates,
            targets = group.target_set.len(),
            "Duplicate group"
        );
    }
    info!(
        total = report.total_annotations,
        groups = report.groups.len(),
        duplicates = report.duplicate_count,
        "Scan complete"
    );

    Ok(())
}
