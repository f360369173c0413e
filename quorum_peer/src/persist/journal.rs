use super::sql::*;
use async_trait::async_trait;
use quorum_proto::prelude::Message;
use quorum_proto::protogen::quorum as pb;
use quorum_sdk::exception::*;
use quorum_sdk::{Identity, SessionFruit, SessionKey, SessionLog, SessionReport};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::error;

/// How one session ended for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub key: SessionKey,
    pub identity: Identity,
    pub finished_at: String,
    /// Key shares are journaled without their material.
    pub fruit: Option<SessionFruit>,
    pub exception: Option<String>,
}

impl JournalEntry {
    fn from_row(row: &SqliteRow) -> Outcome<Self> {
        let group_id: String = row.try_get("group_id").or_persistence("read group_id")?;
        let session_id: String = row.try_get("session_id").or_persistence("read session_id")?;
        let identity: String = row.try_get("identity").or_persistence("read identity")?;
        let finished_at: String = row.try_get("finished_at").or_persistence("read finished_at")?;
        let fb: Option<Vec<u8>> = row.try_get("fruit").or_persistence("read fruit")?;
        let exception: Option<String> = row.try_get("exception").or_persistence("read exception")?;
        let fruit = match fb {
            Some(fb) => {
                let record = pb::SessionFruit::decode(fb.as_slice())
                    .or_persistence(&format!("decode fruit of {group_id}/{session_id}"))?;
                Some(SessionFruit::try_from(record)?)
            }
            None => None,
        };
        Ok(Self {
            key: SessionKey::new(&group_id, &session_id)?,
            identity: identity.parse()?,
            finished_at,
            fruit,
            exception,
        })
    }
}

#[derive(Clone)]
pub struct SessionJournal {
    pool: SqlitePool,
}

impl SessionJournal {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn entries(&self, key: &SessionKey) -> Outcome<Vec<JournalEntry>> {
        let rows = sqlx::query(SQL_SELECT_JOURNAL_BY_SESSION)
            .bind(&key.group_id)
            .bind(&key.session_id)
            .fetch_all(&self.pool)
            .await
            .or_persistence(&format!("query journal of {key}"))?;
        rows.iter().map(JournalEntry::from_row).collect()
    }

    /// Most recent first.
    pub async fn recent(&self, identity: &Identity, limit: u32) -> Outcome<Vec<JournalEntry>> {
        let rows = sqlx::query(SQL_SELECT_JOURNAL_BY_IDENTITY)
            .bind(identity.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .or_persistence(&format!("query journal of {identity}"))?;
        rows.iter().map(JournalEntry::from_row).collect()
    }

    async fn insert(&self, identity: &Identity, report: &SessionReport) -> Outcome<()> {
        let (fb, ex) = match report {
            SessionReport::Completed {
                fruit, persisted, ..
            } => (
                Some(without_material(fruit).encode_to_vec()),
                persisted.as_ref().err().map(|e| e.to_string()),
            ),
            SessionReport::Aborted { error, .. } => (None, Some(error.to_string())),
        };
        let key = report.key();
        sqlx::query(SQL_INSERT_JOURNAL)
            .bind(&key.group_id)
            .bind(&key.session_id)
            .bind(identity.as_str())
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(fb)
            .bind(ex)
            .execute(&self.pool)
            .await
            .or_persistence(&format!("journal {key}"))?;
        Ok(())
    }
}

fn without_material(fruit: &SessionFruit) -> pb::SessionFruit {
    let mut record = pb::SessionFruit::from(fruit);
    if let Some(pb::session_fruit::Value::KeyShare(ks)) = record.value.as_mut() {
        ks.share.clear();
    }
    record
}

#[async_trait]
impl SessionLog for SessionJournal {
    async fn record(&self, identity: &Identity, report: &SessionReport) {
        if let Err(err) = self.insert(identity, report).await {
            error!("Failed to insert session outcome to db -- {}", err);
        }
    }
}
