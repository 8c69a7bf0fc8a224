//! Database connection setup and schema creation.
//!
//! Timestamps are stored as epoch milliseconds UTC in `*_ms` INTEGER
//! columns, dates as ISO `YYYY-MM-DD` TEXT, string lists as JSON TEXT.

use std::{str::FromStr, time::Duration};

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use crate::Res;

/// Opens a connection pool to the given SQLite URL, creating the database
/// file if it does not exist and enforcing foreign keys on every connection.
pub async fn connect(url: &str) -> Res<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Creates all tables and indexes. Idempotent.
pub async fn init_schema(pool: &SqlitePool) -> Res<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artists (
            artist_id   TEXT PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            profile_url TEXT,
            image_url   TEXT,
            genres      TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS albums (
            album_id          TEXT PRIMARY KEY NOT NULL,
            name              TEXT NOT NULL,
            release_date      TEXT,
            album_type        TEXT,
            profile_url       TEXT,
            image_url         TEXT,
            primary_artist_id TEXT REFERENCES artists(artist_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            track_id          TEXT PRIMARY KEY NOT NULL,
            name              TEXT NOT NULL,
            duration_ms       INTEGER,
            explicit          INTEGER,
            popularity        INTEGER,
            preview_url       TEXT,
            profile_url       TEXT,
            album_id          TEXT REFERENCES albums(album_id),
            available_markets TEXT NOT NULL DEFAULT '[]',
            last_played_at_ms INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS podcast_series (
            series_id   TEXT PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            publisher   TEXT,
            description TEXT,
            image_url   TEXT,
            profile_url TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS podcast_episodes (
            episode_id   TEXT PRIMARY KEY NOT NULL,
            name         TEXT NOT NULL,
            description  TEXT,
            duration_ms  INTEGER,
            explicit     INTEGER,
            release_date TEXT,
            profile_url  TEXT,
            series_id    TEXT REFERENCES podcast_series(series_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS listens (
            listen_id    INTEGER PRIMARY KEY AUTOINCREMENT,
            played_at_ms INTEGER NOT NULL UNIQUE,
            item_type    TEXT NOT NULL,
            track_id     TEXT REFERENCES tracks(track_id),
            episode_id   TEXT REFERENCES podcast_episodes(episode_id),
            artist_id    TEXT REFERENCES artists(artist_id),
            album_id     TEXT REFERENCES albums(album_id),
            CONSTRAINT ck_listen_item_type CHECK (
                (item_type = 'track'
                    AND track_id IS NOT NULL
                    AND artist_id IS NOT NULL
                    AND album_id IS NOT NULL
                    AND episode_id IS NULL)
                OR
                (item_type = 'episode'
                    AND episode_id IS NOT NULL
                    AND track_id IS NULL
                    AND artist_id IS NULL
                    AND album_id IS NULL)
            )
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_listens_track ON listens(track_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_listens_episode ON listens(episode_id)")
        .execute(pool)
        .await?;

    // Raw page archive, written outside the run transaction.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recently_played_raw (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            payload       TEXT NOT NULL,
            fetched_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
