//! Sqlite backing for the peer: the remote state store and the session
//! journal share one pool.

use quorum_sdk::exception::*;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::Path;
use tracing::info;

mod journal;
mod sql;
mod store;
pub use journal::{JournalEntry, SessionJournal};
pub use sql::*;
pub use store::SqliteStateStore;

/// Open (creating if needed) the database at `sqlite_path`. Existing data is
/// kept: it is the user's state.
pub async fn connect(sqlite_path: &str) -> Outcome<SqlitePool> {
    if let Some(dir) = Path::new(sqlite_path).parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            tokio::fs::create_dir_all(dir)
                .await
                .or_persistence(&format!("CannotCreateDir {}", dir.display()))?;
        }
    }
    let options = SqliteConnectOptions::new()
        .filename(sqlite_path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options)
        .await
        .or_persistence(&format!("CannotConnectSqlite {sqlite_path}"))?;
    for ddl in [SQL_CREATE_STATE_TABLE, SQL_CREATE_JOURNAL_TABLE] {
        sqlx::query(ddl)
            .execute(&pool)
            .await
            .or_persistence(&format!("CannotCreateTable {sqlite_path}"))?;
    }
    info!(sqlite_path, "database ready");
    Ok(pool)
}
