//! Spotify Listening History Ingestion Library
//!
//! This library ingests a user's recently-played Spotify history (tracks and
//! podcast episodes) into a local SQLite database. It includes modules for
//! talking to the Spotify Web API, normalizing raw payloads into canonical
//! entities, and persisting them transactionally with duplicate detection.
//!
//! # Modules
//!
//! - `cli` - Command-line subcommand implementations
//! - `config` - Configuration management and environment variables
//! - `error` - The crate-wide error taxonomy
//! - `ingest` - The ingestion run orchestrator
//! - `model` - Canonical entity types
//! - `normalizer` - Raw payload to canonical entity conversion
//! - `spotify` - Spotify Web API client implementation
//! - `store` - SQLite persistence layer
//! - `types` - Raw Spotify API payload shapes

pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod normalizer;
pub mod spotify;
pub mod store;
pub mod types;

/// A convenient Result type alias for operations that may fail.
///
/// Every fallible operation in the crate reports an [`error::IngestError`].
/// Conditions that are expected for individual history items (skips,
/// duplicate listens) are modeled in return types instead of errors.
pub type Res<T> = std::result::Result<T, error::IngestError>;
