//! Real-time change capture: notify → debounce → per-mode queues

pub mod coalescer;
pub mod queue;
pub mod watcher;

pub use coalescer::{EventCoalescer, canonicalize};
pub use queue::{ModeQueueStatus, QueueStatus, SyncQueue};
pub use watcher::{FolderWatcher, WatcherError, WatcherStatus};
