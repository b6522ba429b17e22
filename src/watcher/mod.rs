pub mod backoff;
pub mod phase;
pub mod registry;
pub mod reminders;
pub mod scheduler;
pub mod state;

pub use registry::{Registry, WatcherSummary};
pub use scheduler::{CycleOutcome, Watcher, WatcherDeps};
pub use state::WatcherState;
