//! Canonical entities produced by the normalizer and persisted by the store.
//!
//! Entity ids stay optional on the drafts; the database's NOT NULL and
//! foreign key constraints are the authority on whether a draft is storable.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Discriminator for what kind of item a listen refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Track,
    Episode,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Track => "track",
            ItemType::Episode => "episode",
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub artist_id: Option<String>,
    pub name: Option<String>,
    pub profile_url: Option<String>,
    pub image_url: Option<String>,
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub album_id: Option<String>,
    pub name: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub album_type: Option<String>,
    pub profile_url: Option<String>,
    pub image_url: Option<String>,
    pub primary_artist_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub track_id: Option<String>,
    pub name: Option<String>,
    pub duration_ms: Option<i64>,
    pub explicit: Option<bool>,
    pub popularity: Option<i32>,
    pub preview_url: Option<String>,
    pub profile_url: Option<String>,
    pub album_id: Option<String>,
    pub available_markets: Vec<String>,
    /// Most recent play observed for this track, kept monotonic by the store.
    pub last_played_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodcastSeries {
    pub series_id: Option<String>,
    pub name: Option<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub profile_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodcastEpisode {
    pub episode_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub duration_ms: Option<i64>,
    pub explicit: Option<bool>,
    pub release_date: Option<NaiveDate>,
    pub profile_url: Option<String>,
    pub series_id: Option<String>,
}

/// One play event. `played_at` is unique across the whole history; the
/// reference columns must agree with `item_type` (track listens carry
/// track/artist/album ids, episode listens carry only an episode id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listen {
    pub played_at: DateTime<Utc>,
    pub item_type: ItemType,
    pub track_id: Option<String>,
    pub episode_id: Option<String>,
    pub artist_id: Option<String>,
    pub album_id: Option<String>,
}
