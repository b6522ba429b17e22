/// Row of the `watchers` table (see migrations/0001_watchers.sql).
#[derive(Debug, sqlx::FromRow)]
pub struct WatcherRow {
    pub subscription_id: String,
    pub chat_id: String,
    pub league: String,
    pub state_json: String,
    pub updated_at: i64,
}
