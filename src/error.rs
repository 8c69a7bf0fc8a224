//! Error taxonomy for the ingestion pipeline.
//!
//! Every failure a run can hit is classified into one of these variants so
//! the orchestrator can log it with a stable category. Conditions that are
//! expected for individual items (an unparseable timestamp, a duplicate
//! listen, a draft entity the database rejects) are not errors; they are
//! expressed as `Option`/outcome values on the operations that produce them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Required configuration is missing or unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Spotify rejected our credentials. Never retried.
    #[error("spotify authentication rejected: {0}")]
    Auth(String),

    /// The Spotify API failed in a non-auth way after retries were exhausted.
    #[error("spotify api request failed: {0}")]
    RemoteApi(String),

    /// HTTP transport failure talking to Spotify.
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Database failure outside the expected per-item conflict paths.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// A bug or broken invariant inside the pipeline itself.
    #[error("internal error: {0}")]
    Internal(String),
}
