use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::models::WatcherRow;
use crate::db::StateStore;
use crate::error::Result;
use crate::types::Subscription;
use crate::watcher::WatcherState;

/// SQLite-backed store. One row per subscription, state serialized as JSON.
///
/// Each save is a single UPSERT, so a crash can lose at most the write in
/// progress and never touches other rows.
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub async fn connect(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load_all(&self) -> Result<HashMap<String, WatcherState>> {
        let rows: Vec<WatcherRow> = sqlx::query_as(
            "SELECT subscription_id, chat_id, league, state_json, updated_at FROM watchers",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut states = HashMap::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_str::<WatcherState>(&row.state_json) {
                Ok(state) => {
                    states.insert(row.subscription_id, state);
                }
                Err(e) => warn!(
                    subscription = %row.subscription_id,
                    chat_id = %row.chat_id,
                    league = %row.league,
                    updated_at = row.updated_at,
                    "skipping undecodable watcher row: {e}",
                ),
            }
        }
        info!(count = states.len(), "loaded persisted watchers");
        Ok(states)
    }

    async fn save(&self, state: &WatcherState) -> Result<()> {
        let state_json = serde_json::to_string(state)?;
        let sub = &state.subscription;
        sqlx::query(
            r#"
            INSERT INTO watchers (subscription_id, chat_id, league, state_json, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(subscription_id) DO UPDATE SET
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(sub.key())
        .bind(&sub.chat_id)
        .bind(&sub.league)
        .bind(state_json)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, subscription: &Subscription) -> Result<()> {
        sqlx::query("DELETE FROM watchers WHERE subscription_id = ?1")
            .bind(subscription.key())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
