//! Raw Spotify Web API payload shapes.
//!
//! These structs mirror the JSON the recently-played endpoint and the token
//! endpoint return. Every field is optional and defaulted: the API contract
//! is loose and the normalizer, not the deserializer, decides which absences
//! make an item unusable. Podcast episodes arrive under the same `track` key
//! as songs, distinguished only by the `type` tag and the nested `show`.

use serde::{Deserialize, Serialize};

/// One page of the `/me/player/recently-played` response, items newest-first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecentlyPlayedPage {
    pub items: Vec<PlayHistoryItem>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayHistoryItem {
    pub track: Option<PlayedItem>,
    pub played_at: Option<String>,
}

/// The played object itself. Track fields and episode fields share this
/// shape; `item_type` says which subset is meaningful.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayedItem {
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub duration_ms: Option<i64>,
    pub explicit: Option<bool>,
    pub popularity: Option<i32>,
    pub preview_url: Option<String>,
    pub external_urls: Option<ExternalUrls>,
    pub artists: Option<Vec<PlayedArtist>>,
    pub album: Option<PlayedAlbum>,
    pub available_markets: Option<Vec<String>>,
    pub description: Option<String>,
    pub release_date: Option<String>,
    pub release_date_precision: Option<String>,
    pub show: Option<PlayedShow>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayedArtist {
    pub id: Option<String>,
    pub name: Option<String>,
    pub external_urls: Option<ExternalUrls>,
    pub genres: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayedAlbum {
    pub id: Option<String>,
    pub name: Option<String>,
    pub release_date: Option<String>,
    pub release_date_precision: Option<String>,
    pub album_type: Option<String>,
    pub external_urls: Option<ExternalUrls>,
    pub images: Option<Vec<Image>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayedShow {
    pub id: Option<String>,
    pub name: Option<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub images: Option<Vec<Image>>,
    pub external_urls: Option<ExternalUrls>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Image {
    pub url: Option<String>,
    pub height: Option<i32>,
    pub width: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalUrls {
    pub spotify: Option<String>,
}

/// Response of the refresh-token grant at the accounts token endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
}
