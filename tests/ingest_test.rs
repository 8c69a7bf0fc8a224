use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sporlog::config::{CredentialProvider, Credentials};
use sporlog::error::IngestError;
use sporlog::ingest::Ingestor;
use sporlog::model::{Album, Artist, Listen, PodcastEpisode, PodcastSeries, Track};
use sporlog::spotify::{FetchedPage, HistoryFetcher, TokenRefresher};
use sporlog::store::{ListenOutcome, SqliteStore, Storage, StorageSession};
use sporlog::types::{PlayHistoryItem, RecentlyPlayedPage};
use sporlog::Res;
use tempfile::TempDir;

async fn test_store() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("sporlog-test.db").display());
    let store = SqliteStore::connect(&url).await.unwrap();
    store.init_schema().await.unwrap();
    (dir, store)
}

fn ms(played_at: &str) -> i64 {
    DateTime::parse_from_rfc3339(played_at)
        .unwrap()
        .timestamp_millis()
}

fn track_item(id: &str, played_at: &str) -> PlayHistoryItem {
    serde_json::from_value(json!({
        "played_at": played_at,
        "track": {
            "type": "track",
            "id": id,
            "name": format!("{} name", id),
            "duration_ms": 180000,
            "artists": [{ "id": format!("artist-{}", id), "name": "Artist" }],
            "album": { "id": format!("album-{}", id), "name": "Album" }
        }
    }))
    .unwrap()
}

fn episode_item(id: &str, played_at: &str) -> PlayHistoryItem {
    serde_json::from_value(json!({
        "played_at": played_at,
        "track": {
            "type": "episode",
            "id": id,
            "name": format!("{} name", id),
            "duration_ms": 3600000,
            "show": { "id": format!("show-{}", id), "name": "Show", "publisher": "Publisher" }
        }
    }))
    .unwrap()
}

fn page(items: Vec<PlayHistoryItem>) -> RecentlyPlayedPage {
    RecentlyPlayedPage { items, next: None }
}

struct FakeCreds;

impl CredentialProvider for FakeCreds {
    fn credentials(&self) -> Res<Credentials> {
        Ok(Credentials {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "refresh".to_string(),
        })
    }
}

struct FakeRefresher;

#[async_trait]
impl TokenRefresher for FakeRefresher {
    async fn refresh(&self, _credentials: &Credentials) -> Res<String> {
        Ok("test-token".to_string())
    }
}

struct FailingRefresher;

#[async_trait]
impl TokenRefresher for FailingRefresher {
    async fn refresh(&self, _credentials: &Credentials) -> Res<String> {
        Err(IngestError::Auth("refresh token revoked".to_string()))
    }
}

// Serves queued pages and records the `after` bound of every fetch.
#[derive(Clone, Default)]
struct FakeFetcher {
    pages: Arc<Mutex<VecDeque<RecentlyPlayedPage>>>,
    seen_after: Arc<Mutex<Vec<Option<i64>>>>,
}

impl FakeFetcher {
    fn with_pages(pages: Vec<RecentlyPlayedPage>) -> Self {
        Self {
            pages: Arc::new(Mutex::new(pages.into())),
            seen_after: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl HistoryFetcher for FakeFetcher {
    async fn recently_played(
        &self,
        _access_token: &str,
        _limit: u32,
        after_ms: Option<i64>,
    ) -> Res<FetchedPage> {
        self.seen_after.lock().unwrap().push(after_ms);
        let page = self.pages.lock().unwrap().pop_front().unwrap_or_default();
        let raw = serde_json::to_value(&page).unwrap();
        Ok(FetchedPage { page, raw })
    }
}

// Delegates to a real SQLite session but rejects every album draft.
struct FailingAlbumStore {
    inner: SqliteStore,
}

#[async_trait]
impl Storage for FailingAlbumStore {
    async fn open_session(&self) -> Res<Box<dyn StorageSession>> {
        let inner = self.inner.open_session().await?;
        Ok(Box::new(FailingAlbumSession { inner }))
    }

    async fn archive_raw_page(&self, payload: &serde_json::Value) -> Res<()> {
        self.inner.archive_raw_page(payload).await
    }
}

struct FailingAlbumSession {
    inner: Box<dyn StorageSession>,
}

#[async_trait]
impl StorageSession for FailingAlbumSession {
    async fn max_played_at(&mut self) -> Res<Option<DateTime<Utc>>> {
        self.inner.max_played_at().await
    }

    async fn upsert_artist(&mut self, artist: &Artist) -> Res<Option<Artist>> {
        self.inner.upsert_artist(artist).await
    }

    async fn upsert_album(&mut self, _album: &Album) -> Res<Option<Album>> {
        Ok(None)
    }

    async fn upsert_track(&mut self, track: &Track) -> Res<Option<Track>> {
        self.inner.upsert_track(track).await
    }

    async fn upsert_series(&mut self, series: &PodcastSeries) -> Res<Option<PodcastSeries>> {
        self.inner.upsert_series(series).await
    }

    async fn upsert_episode(&mut self, episode: &PodcastEpisode) -> Res<Option<PodcastEpisode>> {
        self.inner.upsert_episode(episode).await
    }

    async fn insert_listen(&mut self, listen: &Listen) -> Res<ListenOutcome> {
        self.inner.insert_listen(listen).await
    }

    async fn commit(&mut self) -> Res<()> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Res<()> {
        self.inner.rollback().await
    }
}

fn ingestor(fetcher: FakeFetcher, store: SqliteStore) -> Ingestor {
    Ingestor::new(
        Box::new(FakeCreds),
        Box::new(FakeRefresher),
        Box::new(fetcher),
        Box::new(store),
    )
}

async fn listen_rows(store: &SqliteStore) -> Vec<(i64, String)> {
    sqlx::query_as("SELECT played_at_ms, item_type FROM listens ORDER BY listen_id")
        .fetch_all(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_run_records_listens_oldest_first() {
    let (_dir, store) = test_store().await;

    // The API reports newest-first
    let fetcher = FakeFetcher::with_pages(vec![page(vec![
        track_item("c", "2024-05-01T10:02:00.000Z"),
        track_item("b", "2024-05-01T10:01:00.000Z"),
        track_item("a", "2024-05-01T10:00:00.000Z"),
    ])]);

    let report = ingestor(fetcher, store.clone()).try_run().await.unwrap();
    assert_eq!(report.fetched, 3);
    assert_eq!(report.processed, 3);
    assert_eq!(report.new_listens, 3);

    // Insertion order follows play order
    let rows = listen_rows(&store).await;
    let stamps: Vec<i64> = rows.iter().map(|(t, _)| *t).collect();
    assert_eq!(
        stamps,
        vec![
            ms("2024-05-01T10:00:00.000Z"),
            ms("2024-05-01T10:01:00.000Z"),
            ms("2024-05-01T10:02:00.000Z"),
        ]
    );
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let (_dir, store) = test_store().await;

    let items = vec![
        track_item("b", "2024-05-01T10:01:00.000Z"),
        track_item("a", "2024-05-01T10:00:00.000Z"),
    ];
    let fetcher = FakeFetcher::with_pages(vec![page(items.clone()), page(items)]);

    let ing = ingestor(fetcher.clone(), store.clone());
    let first = ing.try_run().await.unwrap();
    assert_eq!(first.new_listens, 2);

    let second = ing.try_run().await.unwrap();
    assert_eq!(second.new_listens, 0);
    assert_eq!(second.processed, 0);

    // The second fetch was bounded by the stored high-water mark
    let seen = fetcher.seen_after.lock().unwrap().clone();
    assert_eq!(seen, vec![None, Some(ms("2024-05-01T10:01:00.000Z"))]);

    assert_eq!(listen_rows(&store).await.len(), 2);
}

#[tokio::test]
async fn test_high_water_mark_filters_old_plays() {
    let (_dir, store) = test_store().await;

    // Seed one run's worth of history ending at 10:01
    let fetcher = FakeFetcher::with_pages(vec![
        page(vec![track_item("a", "2024-05-01T10:01:00.000Z")]),
        page(vec![
            track_item("d", "2024-05-01T10:02:00.000Z"),
            track_item("a", "2024-05-01T10:01:00.000Z"),
            track_item("e", "2024-05-01T10:00:00.000Z"),
        ]),
    ]);

    let ing = ingestor(fetcher, store.clone());
    ing.try_run().await.unwrap();

    // Only the play after the mark survives; the at-mark and older ones don't
    let report = ing.try_run().await.unwrap();
    assert_eq!(report.fetched, 3);
    assert_eq!(report.processed, 1);
    assert_eq!(report.new_listens, 1);

    let rows = listen_rows(&store).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.last().unwrap().0, ms("2024-05-01T10:02:00.000Z"));
}

#[tokio::test]
async fn test_mixed_page_with_duplicate_timestamp() {
    let (_dir, store) = test_store().await;

    let fetcher = FakeFetcher::with_pages(vec![page(vec![
        episode_item("ep1", "2024-05-01T10:02:00.000Z"),
        track_item("a", "2024-05-01T10:01:00.000Z"),
        track_item("a", "2024-05-01T10:01:00.000Z"),
    ])]);

    let report = ingestor(fetcher, store.clone()).try_run().await.unwrap();
    assert_eq!(report.new_listens, 2);

    let rows = listen_rows(&store).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].1, "track");
    assert_eq!(rows[1].1, "episode");
}

#[tokio::test]
async fn test_failed_catalog_upsert_skips_item_but_run_continues() {
    let (_dir, store) = test_store().await;

    let fetcher = FakeFetcher::with_pages(vec![page(vec![
        episode_item("ep1", "2024-05-01T10:02:00.000Z"),
        track_item("a", "2024-05-01T10:01:00.000Z"),
    ])]);

    let failing = FailingAlbumStore {
        inner: store.clone(),
    };
    let ing = Ingestor::new(
        Box::new(FakeCreds),
        Box::new(FakeRefresher),
        Box::new(fetcher),
        Box::new(failing),
    );

    let report = ing.try_run().await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.new_listens, 1);

    // Only the episode made it; the track with the rejected album was skipped
    let rows = listen_rows(&store).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].1, "episode");
}

#[tokio::test]
async fn test_auth_failure_aborts_run_cleanly() {
    let (_dir, store) = test_store().await;

    let fetcher = FakeFetcher::with_pages(vec![page(vec![track_item(
        "a",
        "2024-05-01T10:00:00.000Z",
    )])]);

    let ing = Ingestor::new(
        Box::new(FakeCreds),
        Box::new(FailingRefresher),
        Box::new(fetcher),
        Box::new(store.clone()),
    );

    let err = ing.try_run().await.unwrap_err();
    assert!(matches!(err, IngestError::Auth(_)));

    // run() classifies the same failure without panicking
    ing.run().await;

    assert!(listen_rows(&store).await.is_empty());
}
