use super::sql::*;
use async_trait::async_trait;
use quorum_sdk::exception::*;
use quorum_sdk::util::{CompressAble, DecompressAble};
use quorum_sdk::{AppState, Identity, StateStore};
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// One row per identity holding its compressed [`AppState`].
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// When the identity's state was last written, RFC 3339.
    pub async fn updated_at(&self, identity: &Identity) -> Outcome<Option<String>> {
        let row = sqlx::query(SQL_SELECT_STATE)
            .bind(identity.as_str())
            .fetch_optional(&self.pool)
            .await
            .or_persistence(&format!("query state of {identity}"))?;
        row.map(|r| r.try_get::<String, _>("updated_at"))
            .transpose()
            .or_persistence("read updated_at")
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load(&self, identity: &Identity) -> Outcome<Option<AppState>> {
        let row = sqlx::query(SQL_SELECT_STATE)
            .bind(identity.as_str())
            .fetch_optional(&self.pool)
            .await
            .or_persistence(&format!("query state of {identity}"))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let blob: Vec<u8> = row.try_get("state").or_persistence("read state blob")?;
        let state: AppState = blob.decompress()?;
        Ok(Some(state))
    }

    async fn save(&self, identity: &Identity, state: &AppState) -> Outcome<()> {
        let blob = state.compress()?;
        let updated_at = chrono::Utc::now().to_rfc3339();
        sqlx::query(SQL_UPSERT_STATE)
            .bind(identity.as_str())
            .bind(&blob)
            .bind(&updated_at)
            .execute(&self.pool)
            .await
            .or_persistence(&format!("write state of {identity}"))?;
        debug!(%identity, bytes = blob.len(), "state row written");
        Ok(())
    }
}
