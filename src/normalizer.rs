//! Conversion of raw play-history items into canonical entity drafts.
//!
//! Normalization is pure and total: any item it cannot make sense of yields
//! `None` and the caller decides how to log the skip. Field-level absences
//! are tolerated (the drafts keep `Option` fields); only a missing payload,
//! a missing or unparseable timestamp, an unknown item type, or an episode
//! without its show make the whole item unusable.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::warn;

use crate::{
    model::{Album, Artist, ItemType, Listen, PodcastEpisode, PodcastSeries, Track},
    types::{Image, PlayHistoryItem, PlayedItem},
};

/// Everything a single track play contributes: the catalog drafts plus the
/// listen row referring to them.
#[derive(Debug, Clone)]
pub struct TrackBundle {
    pub artist: Artist,
    pub album: Album,
    pub track: Track,
    pub listen: Listen,
}

#[derive(Debug, Clone)]
pub struct EpisodeBundle {
    pub series: PodcastSeries,
    pub episode: PodcastEpisode,
    pub listen: Listen,
}

/// Result of normalizing one usable history item.
#[derive(Debug, Clone)]
pub enum NormalizedItem {
    Track(TrackBundle),
    Episode(EpisodeBundle),
}

/// Parses the `played_at` timestamp of a history item.
///
/// The API reports RFC 3339 with millisecond precision and a trailing `Z`;
/// an explicit offset is accepted too and converted to UTC.
pub fn parse_played_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_year(raw: &str) -> Option<i32> {
    // A year must be exactly four digits; "23" is not a usable year.
    if raw.len() != 4 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// Parses a release date according to its declared precision.
///
/// `day` expects `YYYY-MM-DD`, `month` expects `YYYY-MM` (mapped to the
/// first of the month), `year` expects `YYYY` (mapped to January 1st).
/// Anything else, including invalid calendar values, yields `None`.
pub fn parse_release_date(raw: &str, precision: &str) -> Option<NaiveDate> {
    if raw.is_empty() {
        return None;
    }
    match precision {
        "day" => NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok(),
        "month" => {
            let (year, month) = raw.split_once('-')?;
            let year = parse_year(year)?;
            let month: u32 = month.parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, 1)
        }
        "year" => {
            let year = parse_year(raw)?;
            NaiveDate::from_ymd_opt(year, 1, 1)
        }
        _ => None,
    }
}

fn release_date_from(raw: Option<&str>, precision: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?;
    let precision = precision?;
    let parsed = parse_release_date(raw, precision);
    if parsed.is_none() {
        warn!(release_date = raw, precision, "unparseable release date");
    }
    parsed
}

fn first_image_url(images: Option<&Vec<Image>>) -> Option<String> {
    images.and_then(|imgs| imgs.first()).and_then(|i| i.url.clone())
}

/// Normalizes one history item into entity drafts.
///
/// Returns `None` when the item has no payload, no usable `played_at`, an
/// unknown item type, or is an episode without show metadata.
pub fn normalize_item(item: &PlayHistoryItem) -> Option<NormalizedItem> {
    let payload = item.track.as_ref()?;
    let played_at = parse_played_at(item.played_at.as_deref()?)?;

    match payload.item_type.as_deref()? {
        "track" => Some(NormalizedItem::Track(normalize_track(payload, played_at))),
        "episode" => normalize_episode(payload, played_at).map(NormalizedItem::Episode),
        _ => None,
    }
}

fn normalize_track(payload: &PlayedItem, played_at: DateTime<Utc>) -> TrackBundle {
    let primary = payload.artists.as_ref().and_then(|a| a.first());
    let album = payload.album.as_ref();

    // The history payload carries no artist images; album art stands in.
    let album_image = first_image_url(album.and_then(|a| a.images.as_ref()));

    let artist = Artist {
        artist_id: primary.and_then(|a| a.id.clone()),
        name: primary.and_then(|a| a.name.clone()),
        profile_url: primary
            .and_then(|a| a.external_urls.as_ref())
            .and_then(|u| u.spotify.clone()),
        image_url: album_image.clone(),
        genres: primary.and_then(|a| a.genres.clone()).unwrap_or_default(),
    };

    let album_draft = Album {
        album_id: album.and_then(|a| a.id.clone()),
        name: album.and_then(|a| a.name.clone()),
        release_date: release_date_from(
            album.and_then(|a| a.release_date.as_deref()),
            album.and_then(|a| a.release_date_precision.as_deref()),
        ),
        album_type: album.and_then(|a| a.album_type.clone()),
        profile_url: album
            .and_then(|a| a.external_urls.as_ref())
            .and_then(|u| u.spotify.clone()),
        image_url: album_image,
        primary_artist_id: artist.artist_id.clone(),
    };

    let track = Track {
        track_id: payload.id.clone(),
        name: payload.name.clone(),
        duration_ms: payload.duration_ms,
        explicit: payload.explicit,
        popularity: payload.popularity,
        preview_url: payload.preview_url.clone(),
        profile_url: payload
            .external_urls
            .as_ref()
            .and_then(|u| u.spotify.clone()),
        album_id: album_draft.album_id.clone(),
        available_markets: payload.available_markets.clone().unwrap_or_default(),
        last_played_at: Some(played_at),
    };

    let listen = Listen {
        played_at,
        item_type: ItemType::Track,
        track_id: track.track_id.clone(),
        episode_id: None,
        artist_id: artist.artist_id.clone(),
        album_id: album_draft.album_id.clone(),
    };

    TrackBundle {
        artist,
        album: album_draft,
        track,
        listen,
    }
}

fn normalize_episode(payload: &PlayedItem, played_at: DateTime<Utc>) -> Option<EpisodeBundle> {
    // An episode without its show cannot be attached to a series.
    let show = payload.show.as_ref()?;

    let series = PodcastSeries {
        series_id: show.id.clone(),
        name: show.name.clone(),
        publisher: show.publisher.clone(),
        description: show.description.clone(),
        image_url: first_image_url(show.images.as_ref()),
        profile_url: show
            .external_urls
            .as_ref()
            .and_then(|u| u.spotify.clone()),
    };

    let episode = PodcastEpisode {
        episode_id: payload.id.clone(),
        name: payload.name.clone(),
        description: payload.description.clone(),
        duration_ms: payload.duration_ms,
        explicit: payload.explicit,
        release_date: release_date_from(
            payload.release_date.as_deref(),
            payload.release_date_precision.as_deref(),
        ),
        profile_url: payload
            .external_urls
            .as_ref()
            .and_then(|u| u.spotify.clone()),
        series_id: series.series_id.clone(),
    };

    let listen = Listen {
        played_at,
        item_type: ItemType::Episode,
        track_id: None,
        episode_id: episode.episode_id.clone(),
        artist_id: None,
        album_id: None,
    };

    Some(EpisodeBundle {
        series,
        episode,
        listen,
    })
}
