//! Recently-played history retrieval.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::time::sleep;
use tracing::warn;

use crate::{
    Res, config,
    error::IngestError,
    spotify::{MAX_ATTEMPTS, backoff_delay, is_retryable_status, is_retryable_transport},
    types::RecentlyPlayedPage,
};

/// One fetched page, both parsed and as the raw JSON document for archival.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub page: RecentlyPlayedPage,
    pub raw: Value,
}

/// Fetches one page of the user's recently-played history.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    /// `after_ms` restricts the page to plays strictly after that epoch
    /// millisecond; `limit` must be between 1 and 50 per the API contract.
    async fn recently_played(
        &self,
        access_token: &str,
        limit: u32,
        after_ms: Option<i64>,
    ) -> Res<FetchedPage>;
}

pub struct SpotifyHistoryFetcher {
    client: Client,
    api_url: String,
}

impl SpotifyHistoryFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            api_url: config::spotify_api_url(),
        }
    }
}

impl Default for SpotifyHistoryFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryFetcher for SpotifyHistoryFetcher {
    async fn recently_played(
        &self,
        access_token: &str,
        limit: u32,
        after_ms: Option<i64>,
    ) -> Res<FetchedPage> {
        if !(1..=50).contains(&limit) {
            return Err(IngestError::Internal(format!(
                "recently-played limit out of range: {}",
                limit
            )));
        }

        let mut url = format!(
            "{uri}/me/player/recently-played?limit={limit}",
            uri = &self.api_url,
        );
        if let Some(after) = after_ms {
            url.push_str(&format!("&after={}", after));
        }

        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let response = self.client.get(&url).bearer_auth(access_token).send().await;

            let response = match response {
                Ok(resp) => resp,
                Err(err) => {
                    if is_retryable_transport(&err) && attempt < MAX_ATTEMPTS {
                        warn!(attempt, error = %err, "history fetch transport failure, retrying");
                        sleep(backoff_delay(attempt)).await;
                        continue;
                    }
                    return Err(err.into());
                }
            };

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(IngestError::Auth(format!(
                    "history fetch rejected with status {}",
                    status
                )));
            }
            if !status.is_success() {
                if is_retryable_status(status) && attempt < MAX_ATTEMPTS {
                    warn!(attempt, %status, "history fetch failed, retrying");
                    sleep(backoff_delay(attempt)).await;
                    continue;
                }
                return Err(IngestError::RemoteApi(format!(
                    "history fetch failed with status {}",
                    status
                )));
            }

            // Keep the raw document for archival, then parse it.
            let raw: Value = response.json().await?;
            let page: RecentlyPlayedPage = serde_json::from_value(raw.clone()).map_err(|e| {
                IngestError::RemoteApi(format!("malformed recently-played response: {}", e))
            })?;

            return Ok(FetchedPage { page, raw });
        }
    }
}
