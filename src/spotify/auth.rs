//! Access token refresh against the Spotify accounts service.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    Res,
    config::{self, Credentials},
    error::IngestError,
    spotify::{MAX_ATTEMPTS, backoff_delay, is_retryable_status, is_retryable_transport},
    types::TokenResponse,
};

/// Exchanges a long-lived refresh token for a fresh access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, credentials: &Credentials) -> Res<String>;
}

pub struct SpotifyTokenRefresher {
    client: Client,
    token_url: String,
}

impl SpotifyTokenRefresher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            token_url: config::spotify_token_url(),
        }
    }
}

impl Default for SpotifyTokenRefresher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenRefresher for SpotifyTokenRefresher {
    async fn refresh(&self, credentials: &Credentials) -> Res<String> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let response = self
                .client
                .post(&self.token_url)
                .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
                .form(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", credentials.refresh_token.as_str()),
                ])
                .send()
                .await;

            let response = match response {
                Ok(resp) => resp,
                Err(err) => {
                    if is_retryable_transport(&err) && attempt < MAX_ATTEMPTS {
                        warn!(attempt, error = %err, "token refresh transport failure, retrying");
                        sleep(backoff_delay(attempt)).await;
                        continue;
                    }
                    return Err(err.into());
                }
            };

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(IngestError::Auth(format!(
                    "token refresh rejected with status {}",
                    status
                )));
            }
            if !status.is_success() {
                if is_retryable_status(status) && attempt < MAX_ATTEMPTS {
                    warn!(attempt, %status, "token refresh failed, retrying");
                    sleep(backoff_delay(attempt)).await;
                    continue;
                }
                return Err(IngestError::RemoteApi(format!(
                    "token refresh failed with status {}",
                    status
                )));
            }

            let body: TokenResponse = response.json().await?;
            debug!(scope = body.scope.as_deref().unwrap_or(""), "token refreshed");

            return body.access_token.ok_or_else(|| {
                IngestError::Auth("access token not found in refresh response".to_string())
            });
        }
    }
}
