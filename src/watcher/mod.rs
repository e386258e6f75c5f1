//! The fetch, materialize, wait loop.

mod readiness;
mod retry;
mod watcher;

pub use retry::RetryPolicy;
pub use watcher::{WatchError, Watcher};
