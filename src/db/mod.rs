pub mod models;
pub mod store;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Subscription;
use crate::watcher::WatcherState;

pub use store::SqliteStateStore;

/// Durable home of every subscription's watcher state, keyed by `Subscription::key()`.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_all(&self) -> Result<HashMap<String, WatcherState>>;
    async fn save(&self, state: &WatcherState) -> Result<()>;
    async fn remove(&self, subscription: &Subscription) -> Result<()>;
}
