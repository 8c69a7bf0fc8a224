//! Command-line subcommand implementations.
//!
//! These wire the real collaborators together; failures are logged and the
//! process exits cleanly so a cron schedule is never disrupted.

use tracing::{error, info};

use crate::{
    config::{self, EnvCredentials},
    ingest::Ingestor,
    spotify::{SpotifyHistoryFetcher, SpotifyTokenRefresher},
    store::SqliteStore,
};

async fn open_store() -> Option<SqliteStore> {
    let url = match config::database_url() {
        Ok(url) => url,
        Err(e) => {
            error!(cause = %e, "cannot determine database location");
            return None;
        }
    };

    let store = match SqliteStore::connect(&url).await {
        Ok(store) => store,
        Err(e) => {
            error!(cause = %e, "cannot open database");
            return None;
        }
    };

    if let Err(e) = store.init_schema().await {
        error!(cause = %e, "cannot initialize database schema");
        return None;
    }

    Some(store)
}

/// Runs one full ingestion pass.
pub async fn ingest() {
    let Some(store) = open_store().await else {
        return;
    };

    let ingestor = Ingestor::new(
        Box::new(EnvCredentials),
        Box::new(SpotifyTokenRefresher::new()),
        Box::new(SpotifyHistoryFetcher::new()),
        Box::new(store),
    );

    ingestor.run().await;
}

/// Creates the database and schema without ingesting anything.
pub async fn init_db() {
    if open_store().await.is_some() {
        info!("database schema ready");
    }
}
