//! SQLite persistence layer.
//!
//! `schema` owns pool creation and table definitions; `session` exposes the
//! transactional `Storage`/`StorageSession` interface the orchestrator runs
//! against.

pub mod schema;
pub mod session;

pub use session::{ListenOutcome, SqliteStore, Storage, StorageSession};
