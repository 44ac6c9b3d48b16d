use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlacelinkError {
    /// Unparseable name or coordinate in a place record. Recorded and
    /// skipped; a build pass never aborts on these.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// The remote store (or one of its sub-fetches) was unreachable. Only
    /// surfaced when a whole operation came back empty — single failed units
    /// degrade to empty results with a partial flag instead.
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// A candidate matched more than one existing annotation under the
    /// duplicate heuristics. The newest match was used; the rest are listed.
    #[error("Ambiguous merge: {0}")]
    AmbiguousMerge(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
