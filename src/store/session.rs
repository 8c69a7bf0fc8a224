//! Transactional storage interface and its SQLite implementation.
//!
//! A run opens one [`StorageSession`] (one transaction), performs all of its
//! upserts and listen inserts through it, then commits or rolls back. Draft
//! entities the database rejects (NULL id or name, dangling reference) are
//! an expected per-item condition and surface as `Ok(None)`; every other
//! database failure is fatal for the run.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::{
    Row, Sqlite, SqlitePool, Transaction, error::ErrorKind, sqlite::SqliteRow,
};
use tracing::warn;

use crate::{
    Res,
    error::IngestError,
    model::{Album, Artist, Listen, PodcastEpisode, PodcastSeries, Track},
    store::schema,
};

/// Outcome of inserting a listen row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenOutcome {
    Inserted,
    /// A listen at this `played_at` already exists; nothing was written.
    Duplicate,
}

/// Session factory plus the out-of-transaction raw archive.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn open_session(&self) -> Res<Box<dyn StorageSession>>;

    /// Archives a raw response page. Independent of any open session.
    async fn archive_raw_page(&self, payload: &Value) -> Res<()>;
}

/// One transaction's worth of storage operations.
///
/// Catalog upserts return the stored row snapshot, or `None` when the draft
/// was rejected by a constraint. Track and artist and album upserts
/// overwrite stored fields; series and episode upserts keep the first
/// version seen; `upsert_track` keeps `last_played_at` monotonic.
#[async_trait]
pub trait StorageSession: Send {
    async fn max_played_at(&mut self) -> Res<Option<DateTime<Utc>>>;

    async fn upsert_artist(&mut self, artist: &Artist) -> Res<Option<Artist>>;
    async fn upsert_album(&mut self, album: &Album) -> Res<Option<Album>>;
    async fn upsert_track(&mut self, track: &Track) -> Res<Option<Track>>;
    async fn upsert_series(&mut self, series: &PodcastSeries) -> Res<Option<PodcastSeries>>;
    async fn upsert_episode(&mut self, episode: &PodcastEpisode) -> Res<Option<PodcastEpisode>>;

    async fn insert_listen(&mut self, listen: &Listen) -> Res<ListenOutcome>;

    async fn commit(&mut self) -> Res<()>;
    async fn rollback(&mut self) -> Res<()>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to the database at `url`, creating the file if needed.
    pub async fn connect(url: &str) -> Res<Self> {
        let pool = schema::connect(url).await?;
        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Res<()> {
        schema::init_schema(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStore {
    async fn open_session(&self) -> Res<Box<dyn StorageSession>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteSession { tx: Some(tx) }))
    }

    async fn archive_raw_page(&self, payload: &Value) -> Res<()> {
        sqlx::query("INSERT INTO recently_played_raw (payload, fetched_at_ms) VALUES (?, ?)")
            .bind(payload.to_string())
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct SqliteSession {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteSession {
    fn tx(&mut self) -> Res<&mut Transaction<'static, Sqlite>> {
        self.tx
            .as_mut()
            .ok_or_else(|| IngestError::Internal("storage session already finished".to_string()))
    }
}

/// Maps constraint violations caused by draft data to the `None` upsert
/// result. Anything else stays an error.
fn draft_violation_to_none<T>(err: sqlx::Error, entity: &str) -> Res<Option<T>> {
    if let sqlx::Error::Database(db) = &err {
        match db.kind() {
            ErrorKind::NotNullViolation | ErrorKind::ForeignKeyViolation | ErrorKind::CheckViolation => {
                warn!(entity, cause = %db, "draft rejected by constraint");
                return Ok(None);
            }
            _ => {}
        }
    }
    Err(err.into())
}

fn encode_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn decode_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn iso_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_iso_date(raw: Option<String>) -> Option<NaiveDate> {
    raw.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn artist_from_row(row: &SqliteRow) -> Result<Artist, sqlx::Error> {
    Ok(Artist {
        artist_id: row.try_get("artist_id")?,
        name: row.try_get("name")?,
        profile_url: row.try_get("profile_url")?,
        image_url: row.try_get("image_url")?,
        genres: decode_list(&row.try_get::<String, _>("genres")?),
    })
}

fn album_from_row(row: &SqliteRow) -> Result<Album, sqlx::Error> {
    Ok(Album {
        album_id: row.try_get("album_id")?,
        name: row.try_get("name")?,
        release_date: parse_iso_date(row.try_get("release_date")?),
        album_type: row.try_get("album_type")?,
        profile_url: row.try_get("profile_url")?,
        image_url: row.try_get("image_url")?,
        primary_artist_id: row.try_get("primary_artist_id")?,
    })
}

fn track_from_row(row: &SqliteRow) -> Result<Track, sqlx::Error> {
    Ok(Track {
        track_id: row.try_get("track_id")?,
        name: row.try_get("name")?,
        duration_ms: row.try_get("duration_ms")?,
        explicit: row.try_get("explicit")?,
        popularity: row.try_get("popularity")?,
        preview_url: row.try_get("preview_url")?,
        profile_url: row.try_get("profile_url")?,
        album_id: row.try_get("album_id")?,
        available_markets: decode_list(&row.try_get::<String, _>("available_markets")?),
        last_played_at: row
            .try_get::<Option<i64>, _>("last_played_at_ms")?
            .and_then(DateTime::from_timestamp_millis),
    })
}

fn series_from_row(row: &SqliteRow) -> Result<PodcastSeries, sqlx::Error> {
    Ok(PodcastSeries {
        series_id: row.try_get("series_id")?,
        name: row.try_get("name")?,
        publisher: row.try_get("publisher")?,
        description: row.try_get("description")?,
        image_url: row.try_get("image_url")?,
        profile_url: row.try_get("profile_url")?,
    })
}

fn episode_from_row(row: &SqliteRow) -> Result<PodcastEpisode, sqlx::Error> {
    Ok(PodcastEpisode {
        episode_id: row.try_get("episode_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        duration_ms: row.try_get("duration_ms")?,
        explicit: row.try_get("explicit")?,
        release_date: parse_iso_date(row.try_get("release_date")?),
        profile_url: row.try_get("profile_url")?,
        series_id: row.try_get("series_id")?,
    })
}

#[async_trait]
impl StorageSession for SqliteSession {
    async fn max_played_at(&mut self) -> Res<Option<DateTime<Utc>>> {
        let tx = self.tx()?;
        let max_ms: Option<i64> = sqlx::query_scalar("SELECT MAX(played_at_ms) FROM listens")
            .fetch_one(&mut **tx)
            .await?;

        match max_ms {
            None => Ok(None),
            Some(ms) => DateTime::from_timestamp_millis(ms)
                .map(Some)
                .ok_or_else(|| {
                    IngestError::Internal(format!("stored played_at out of range: {}", ms))
                }),
        }
    }

    async fn upsert_artist(&mut self, artist: &Artist) -> Res<Option<Artist>> {
        let tx = self.tx()?;
        let result = sqlx::query(
            r#"
            INSERT INTO artists (artist_id, name, profile_url, image_url, genres)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(artist_id) DO UPDATE SET
                name = excluded.name,
                profile_url = excluded.profile_url,
                image_url = excluded.image_url,
                genres = excluded.genres
            RETURNING artist_id, name, profile_url, image_url, genres
            "#,
        )
        .bind(&artist.artist_id)
        .bind(&artist.name)
        .bind(&artist.profile_url)
        .bind(&artist.image_url)
        .bind(encode_list(&artist.genres))
        .fetch_one(&mut **tx)
        .await;

        match result {
            Ok(row) => Ok(Some(artist_from_row(&row)?)),
            Err(err) => draft_violation_to_none(err, "artist"),
        }
    }

    async fn upsert_album(&mut self, album: &Album) -> Res<Option<Album>> {
        let tx = self.tx()?;
        let result = sqlx::query(
            r#"
            INSERT INTO albums
                (album_id, name, release_date, album_type, profile_url, image_url, primary_artist_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(album_id) DO UPDATE SET
                name = excluded.name,
                release_date = excluded.release_date,
                album_type = excluded.album_type,
                profile_url = excluded.profile_url,
                image_url = excluded.image_url,
                primary_artist_id = excluded.primary_artist_id
            RETURNING album_id, name, release_date, album_type, profile_url, image_url,
                      primary_artist_id
            "#,
        )
        .bind(&album.album_id)
        .bind(&album.name)
        .bind(iso_date(album.release_date))
        .bind(&album.album_type)
        .bind(&album.profile_url)
        .bind(&album.image_url)
        .bind(&album.primary_artist_id)
        .fetch_one(&mut **tx)
        .await;

        match result {
            Ok(row) => Ok(Some(album_from_row(&row)?)),
            Err(err) => draft_violation_to_none(err, "album"),
        }
    }

    async fn upsert_track(&mut self, track: &Track) -> Res<Option<Track>> {
        let tx = self.tx()?;
        // last_played_at only ever moves forward; everything else follows
        // the latest payload.
        let result = sqlx::query(
            r#"
            INSERT INTO tracks
                (track_id, name, duration_ms, explicit, popularity, preview_url,
                 profile_url, album_id, available_markets, last_played_at_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(track_id) DO UPDATE SET
                name = excluded.name,
                duration_ms = excluded.duration_ms,
                explicit = excluded.explicit,
                popularity = excluded.popularity,
                preview_url = excluded.preview_url,
                profile_url = excluded.profile_url,
                album_id = excluded.album_id,
                available_markets = excluded.available_markets,
                last_played_at_ms = CASE
                    WHEN excluded.last_played_at_ms IS NULL
                        THEN tracks.last_played_at_ms
                    WHEN tracks.last_played_at_ms IS NULL
                        OR excluded.last_played_at_ms > tracks.last_played_at_ms
                        THEN excluded.last_played_at_ms
                    ELSE tracks.last_played_at_ms
                END
            RETURNING track_id, name, duration_ms, explicit, popularity, preview_url,
                      profile_url, album_id, available_markets, last_played_at_ms
            "#,
        )
        .bind(&track.track_id)
        .bind(&track.name)
        .bind(track.duration_ms)
        .bind(track.explicit)
        .bind(track.popularity)
        .bind(&track.preview_url)
        .bind(&track.profile_url)
        .bind(&track.album_id)
        .bind(encode_list(&track.available_markets))
        .bind(track.last_played_at.map(|t| t.timestamp_millis()))
        .fetch_one(&mut **tx)
        .await;

        match result {
            Ok(row) => Ok(Some(track_from_row(&row)?)),
            Err(err) => draft_violation_to_none(err, "track"),
        }
    }

    async fn upsert_series(&mut self, series: &PodcastSeries) -> Res<Option<PodcastSeries>> {
        let tx = self.tx()?;
        // First version seen wins; the no-op update keeps RETURNING usable.
        let result = sqlx::query(
            r#"
            INSERT INTO podcast_series
                (series_id, name, publisher, description, image_url, profile_url)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(series_id) DO UPDATE SET series_id = excluded.series_id
            RETURNING series_id, name, publisher, description, image_url, profile_url
            "#,
        )
        .bind(&series.series_id)
        .bind(&series.name)
        .bind(&series.publisher)
        .bind(&series.description)
        .bind(&series.image_url)
        .bind(&series.profile_url)
        .fetch_one(&mut **tx)
        .await;

        match result {
            Ok(row) => Ok(Some(series_from_row(&row)?)),
            Err(err) => draft_violation_to_none(err, "podcast series"),
        }
    }

    async fn upsert_episode(&mut self, episode: &PodcastEpisode) -> Res<Option<PodcastEpisode>> {
        let tx = self.tx()?;
        let result = sqlx::query(
            r#"
            INSERT INTO podcast_episodes
                (episode_id, name, description, duration_ms, explicit, release_date,
                 profile_url, series_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(episode_id) DO UPDATE SET episode_id = excluded.episode_id
            RETURNING episode_id, name, description, duration_ms, explicit, release_date,
                      profile_url, series_id
            "#,
        )
        .bind(&episode.episode_id)
        .bind(&episode.name)
        .bind(&episode.description)
        .bind(episode.duration_ms)
        .bind(episode.explicit)
        .bind(iso_date(episode.release_date))
        .bind(&episode.profile_url)
        .bind(&episode.series_id)
        .fetch_one(&mut **tx)
        .await;

        match result {
            Ok(row) => Ok(Some(episode_from_row(&row)?)),
            Err(err) => draft_violation_to_none(err, "podcast episode"),
        }
    }

    async fn insert_listen(&mut self, listen: &Listen) -> Res<ListenOutcome> {
        let tx = self.tx()?;
        let result = sqlx::query(
            r#"
            INSERT INTO listens
                (played_at_ms, item_type, track_id, episode_id, artist_id, album_id)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(played_at_ms) DO NOTHING
            "#,
        )
        .bind(listen.played_at.timestamp_millis())
        .bind(listen.item_type.as_str())
        .bind(&listen.track_id)
        .bind(&listen.episode_id)
        .bind(&listen.artist_id)
        .bind(&listen.album_id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            Ok(ListenOutcome::Duplicate)
        } else {
            Ok(ListenOutcome::Inserted)
        }
    }

    async fn commit(&mut self) -> Res<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| IngestError::Internal("storage session already finished".to_string()))?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Res<()> {
        // Idempotent; rolling back a finished session is a no-op.
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
