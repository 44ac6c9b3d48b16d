use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnnoRepoError>;

#[derive(Debug, Error)]
pub enum AnnoRepoError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Annotation has no ETag, cannot delete: {0}")]
    MissingEtag(String),
}

impl From<reqwest::Error> for AnnoRepoError {
    fn from(err: reqwest::Error) -> Self {
        AnnoRepoError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for AnnoRepoError {
    fn from(err: serde_json::Error) -> Self {
        AnnoRepoError::Parse(err.to_string())
    }
}
