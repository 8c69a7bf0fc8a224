//! The ingestion run orchestrator.
//!
//! One [`Ingestor::run`] call performs one full run: refresh the access
//! token, open a storage session, fetch a single page of recently-played
//! history, and walk its items oldest-first against the high-water mark.
//! Only the first page is fetched; the `next` cursor is ignored and older
//! plays that fell out of the 50-item window are lost, which matches the
//! endpoint's own retention.

use tracing::{debug, error, info, warn};

use crate::{
    Res,
    config::CredentialProvider,
    error::IngestError,
    normalizer::{self, NormalizedItem},
    spotify::{HistoryFetcher, TokenRefresher},
    store::{ListenOutcome, Storage, StorageSession},
};

/// Page size requested from the recently-played endpoint (the API maximum).
pub const PAGE_LIMIT: u32 = 50;

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Items on the fetched page.
    pub fetched: usize,
    /// Items that survived the high-water filter and were attempted.
    pub processed: usize,
    /// Listen rows actually written.
    pub new_listens: usize,
}

pub struct Ingestor {
    credentials: Box<dyn CredentialProvider>,
    refresher: Box<dyn TokenRefresher>,
    fetcher: Box<dyn HistoryFetcher>,
    store: Box<dyn Storage>,
}

impl Ingestor {
    pub fn new(
        credentials: Box<dyn CredentialProvider>,
        refresher: Box<dyn TokenRefresher>,
        fetcher: Box<dyn HistoryFetcher>,
        store: Box<dyn Storage>,
    ) -> Self {
        Self {
            credentials,
            refresher,
            fetcher,
            store,
        }
    }

    /// Runs one ingestion pass, classifying and logging any failure.
    ///
    /// Never panics and never propagates an error; a cron invocation should
    /// log and exit cleanly either way.
    pub async fn run(&self) {
        match self.try_run().await {
            Ok(report) => {
                info!(
                    fetched = report.fetched,
                    processed = report.processed,
                    new_listens = report.new_listens,
                    "ingestion run finished"
                );
            }
            Err(err) => match &err {
                IngestError::Config(_) => error!(cause = %err, "run aborted: configuration"),
                IngestError::Auth(_) => error!(cause = %err, "run aborted: authentication"),
                IngestError::RemoteApi(_) | IngestError::Http(_) => {
                    error!(cause = %err, "run aborted: spotify api")
                }
                IngestError::Storage(_) => error!(cause = %err, "run aborted: storage"),
                IngestError::Internal(_) => error!(cause = %err, "run aborted: internal"),
            },
        }
    }

    /// Runs one ingestion pass, returning the counters or the first fatal
    /// error. The storage transaction is committed only when at least one
    /// new listen was written.
    pub async fn try_run(&self) -> Res<IngestReport> {
        let credentials = self.credentials.credentials()?;
        let access_token = self.refresher.refresh(&credentials).await?;

        let mut session = self.store.open_session().await?;

        let outcome = self.ingest_page(&access_token, &mut *session).await;

        match outcome {
            Ok(report) => {
                if report.new_listens > 0 {
                    session.commit().await?;
                } else {
                    debug!("no new listens, rolling back no-op transaction");
                    session.rollback().await?;
                }
                Ok(report)
            }
            Err(err) => {
                // Best-effort rollback; never mask the primary failure.
                if let Err(rb_err) = session.rollback().await {
                    error!(cause = %rb_err, "rollback after failed run also failed");
                }
                Err(err)
            }
        }
    }

    async fn ingest_page(
        &self,
        access_token: &str,
        session: &mut dyn StorageSession,
    ) -> Res<IngestReport> {
        let high_water = session.max_played_at().await?;
        let after_ms = high_water.map(|t| t.timestamp_millis());

        let fetched = self
            .fetcher
            .recently_played(access_token, PAGE_LIMIT, after_ms)
            .await?;

        if let Err(err) = self.store.archive_raw_page(&fetched.raw).await {
            warn!(cause = %err, "failed to archive raw history page");
        }

        let mut report = IngestReport {
            fetched: fetched.page.items.len(),
            ..Default::default()
        };

        // The API returns newest-first; process oldest-first so listen ids
        // follow play order and a mid-run abort keeps a contiguous history.
        for item in fetched.page.items.iter().rev() {
            let Some(raw_played_at) = item.played_at.as_deref() else {
                warn!("history item without played_at, skipping");
                continue;
            };
            if item.track.is_none() {
                warn!(played_at = raw_played_at, "history item without payload, skipping");
                continue;
            }
            let Some(played_at) = normalizer::parse_played_at(raw_played_at) else {
                warn!(played_at = raw_played_at, "unparseable played_at, skipping");
                continue;
            };
            if let Some(mark) = high_water {
                if played_at <= mark {
                    debug!(%played_at, "at or before high-water mark, skipping");
                    continue;
                }
            }

            report.processed += 1;

            let Some(normalized) = normalizer::normalize_item(item) else {
                warn!(%played_at, "item could not be normalized, skipping");
                continue;
            };

            match normalized {
                NormalizedItem::Track(bundle) => {
                    let artist = session.upsert_artist(&bundle.artist).await?;
                    let album = session.upsert_album(&bundle.album).await?;
                    let track = session.upsert_track(&bundle.track).await?;

                    let (Some(artist), Some(album), Some(track)) = (artist, album, track) else {
                        error!(%played_at, "catalog upsert failed for track item, skipping listen");
                        continue;
                    };

                    let mut listen = bundle.listen;
                    listen.track_id = track.track_id;
                    listen.artist_id = artist.artist_id;
                    listen.album_id = album.album_id;

                    match session.insert_listen(&listen).await? {
                        ListenOutcome::Inserted => {
                            report.new_listens += 1;
                            info!(%played_at, track = listen.track_id.as_deref().unwrap_or(""), "recorded track listen");
                        }
                        ListenOutcome::Duplicate => {
                            debug!(%played_at, "duplicate listen, skipping");
                        }
                    }
                }
                NormalizedItem::Episode(bundle) => {
                    let series = session.upsert_series(&bundle.series).await?;
                    let episode = session.upsert_episode(&bundle.episode).await?;

                    let (Some(_), Some(episode)) = (series, episode) else {
                        error!(%played_at, "catalog upsert failed for episode item, skipping listen");
                        continue;
                    };

                    let mut listen = bundle.listen;
                    listen.episode_id = episode.episode_id;

                    match session.insert_listen(&listen).await? {
                        ListenOutcome::Inserted => {
                            report.new_listens += 1;
                            info!(%played_at, episode = listen.episode_id.as_deref().unwrap_or(""), "recorded episode listen");
                        }
                        ListenOutcome::Duplicate => {
                            debug!(%played_at, "duplicate listen, skipping");
                        }
                    }
                }
            }
        }

        Ok(report)
    }
}
