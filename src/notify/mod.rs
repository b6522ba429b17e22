pub mod message;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::types::{MessageRef, Subscription};

pub use message::{Notification, StandingLine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyMode {
    NewMessage,
    EditMessage(MessageRef),
}

/// Chat-side delivery. Returns the reference to use for later edits.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        subscription: &Subscription,
        content: &Notification,
        mode: NotifyMode,
    ) -> Result<MessageRef>;
}

/// Writes every notification to the log. Used when no chat transport is wired in.
#[derive(Default)]
pub struct LogNotifier {
    next_ref: AtomicU64,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        subscription: &Subscription,
        content: &Notification,
        mode: NotifyMode,
    ) -> Result<MessageRef> {
        let message_ref = match mode {
            NotifyMode::EditMessage(existing) => existing,
            NotifyMode::NewMessage => {
                MessageRef((self.next_ref.fetch_add(1, Ordering::Relaxed) + 1).to_string())
            }
        };
        info!(
            subscription = %subscription,
            kind = content.kind(),
            message_ref = %message_ref,
            "NOTIFY\n{content}",
        );
        Ok(message_ref)
    }
}
