use std::env;

use tracing::info;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Annotation repository
    pub annorepo_base_url: String,
    pub annorepo_container: String,
    pub annorepo_token: Option<String>,

    // Concept URIs
    pub concept_uri_base: String,

    // Fetch budgets
    pub fetch_max_pages: u32,
    pub fetch_timeout_ms: u64,
}

const DEFAULT_BASE_URL: &str = "https://annorepo.globalise.huygens.knaw.nl";
const DEFAULT_URI_BASE: &str = "https://necessaryreunions.org/gavoc";

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            annorepo_base_url: env::var("ANNOREPO_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            annorepo_container: required_env("ANNOREPO_CONTAINER"),
            annorepo_token: env::var("ANNOREPO_TOKEN").ok(),
            concept_uri_base: env::var("CONCEPT_URI_BASE")
                .unwrap_or_else(|_| DEFAULT_URI_BASE.to_string()),
            fetch_max_pages: env::var("FETCH_MAX_PAGES")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .expect("FETCH_MAX_PAGES must be a number"),
            fetch_timeout_ms: env::var("FETCH_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .expect("FETCH_TIMEOUT_MS must be a number"),
        }
    }

    /// Log the loaded configuration without leaking the token.
    pub fn log_redacted(&self) {
        info!(
            base_url = %self.annorepo_base_url,
            container = %self.annorepo_container,
            token = if self.annorepo_token.is_some() { "set" } else { "unset" },
            max_pages = self.fetch_max_pages,
            timeout_ms = self.fetch_timeout_ms,
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
