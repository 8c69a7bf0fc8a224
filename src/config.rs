//! Configuration management for the listening history ingester.
//!
//! This module handles loading and accessing configuration values from
//! environment variables and `.env` files. Credentials and the database
//! location are required; API endpoints fall back to the production Spotify
//! URLs so a deployment only has to override them for testing.
//!
//! The configuration system follows a hierarchical approach:
//! 1. Environment variables (highest priority)
//! 2. `.env` file in the local data directory
//! 3. Application defaults (endpoint URLs only)

use std::{env, path::PathBuf};

use crate::{Res, error::IngestError};

/// Loads environment variables from a `.env` file in the local data directory.
///
/// Creates the necessary directory structure if it doesn't exist and loads
/// environment variables from a `.env` file located in the platform-specific
/// local data directory under `sporlog/.env`. When that file is absent, a
/// `.env` in the working directory is tried instead; already-set environment
/// variables always win.
///
/// # Directory Structure
///
/// The function looks for the `.env` file in:
/// - Linux: `~/.local/share/sporlog/.env`
/// - macOS: `~/Library/Application Support/sporlog/.env`
/// - Windows: `%LOCALAPPDATA%/sporlog/.env`
pub async fn load_env() -> Result<(), String> {
    let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("sporlog/.env");
    if let Some(parent) = path.parent() {
        async_fs::create_dir_all(parent)
            .await
            .map_err(|e| e.to_string())?;
    }

    if path.is_file() {
        dotenv::from_path(path).map_err(|e| e.to_string())?;
    } else {
        // No data-dir config; a working-directory .env is optional.
        dotenv::dotenv().ok();
    }
    Ok(())
}

fn require(name: &str) -> Res<String> {
    env::var(name).map_err(|_| IngestError::Config(format!("{} must be set", name)))
}

/// Returns the SQLite database URL, e.g. `sqlite:///home/user/sporlog.db`.
pub fn database_url() -> Res<String> {
    require("DATABASE_URL")
}

/// Returns the Spotify Web API base URL.
///
/// Defaults to the production endpoint; override `SPOTIFY_API_URL` to point
/// the ingester at a mock server.
pub fn spotify_api_url() -> String {
    env::var("SPOTIFY_API_URL").unwrap_or_else(|_| "https://api.spotify.com/v1".to_string())
}

/// Returns the Spotify OAuth token exchange URL.
///
/// Defaults to the production accounts endpoint; override
/// `SPOTIFY_TOKEN_URL` for testing.
pub fn spotify_token_url() -> String {
    env::var("SPOTIFY_TOKEN_URL")
        .unwrap_or_else(|_| "https://accounts.spotify.com/api/token".to_string())
}

/// The OAuth application credentials plus the long-lived refresh token for
/// the single user whose history is ingested.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

/// Source of Spotify credentials for a run.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self) -> Res<Credentials>;
}

/// Reads credentials from the environment, reporting every missing variable
/// at once instead of failing on the first.
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn credentials(&self) -> Res<Credentials> {
        let mut missing = Vec::new();
        let mut get = |name: &str| match env::var(name) {
            Ok(v) if !v.is_empty() => Some(v),
            _ => {
                missing.push(name.to_string());
                None
            }
        };

        let client_id = get("SPOTIFY_CLIENT_ID");
        let client_secret = get("SPOTIFY_CLIENT_SECRET");
        let refresh_token = get("SPOTIFY_REFRESH_TOKEN");

        if !missing.is_empty() {
            return Err(IngestError::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        // All three are Some once missing is empty.
        match (client_id, client_secret, refresh_token) {
            (Some(client_id), Some(client_secret), Some(refresh_token)) => Ok(Credentials {
                client_id,
                client_secret,
                refresh_token,
            }),
            _ => Err(IngestError::Internal(
                "credential collection out of sync".to_string(),
            )),
        }
    }
}
