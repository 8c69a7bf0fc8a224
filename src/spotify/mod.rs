//! Spotify Web API clients.
//!
//! Two collaborators live here: the token refresher ([`auth`]) and the
//! recently-played fetcher ([`history`]). Both share the same retry policy:
//! up to [`MAX_ATTEMPTS`] attempts, exponential backoff starting at two
//! seconds and capped at ten, retrying only on connection failures, 429 and
//! 5xx responses. Authentication rejections (401/403) are never retried.

use std::time::Duration;

use reqwest::StatusCode;

pub mod auth;
pub mod history;

pub use auth::{SpotifyTokenRefresher, TokenRefresher};
pub use history::{FetchedPage, HistoryFetcher, SpotifyHistoryFetcher};

pub(crate) const MAX_ATTEMPTS: u32 = 3;

/// Backoff before retry number `attempt` (1-based): 2s, 4s, 8s, capped at 10s.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs((1u64 << attempt).clamp(2, 10))
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub(crate) fn is_retryable_transport(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}
