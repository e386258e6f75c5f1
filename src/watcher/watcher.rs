use std::collections::HashSet;
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use compio::dispatcher::{Dispatcher, DispatcherBuilder};
use compio::fs::Permissions;
use snafu::prelude::*;
use tracing::{debug, info, warn};

use crate::application::RuntimeConfig;
use crate::materializer::Materializer;
use crate::store::{ChangeIndex, KeysApi, StoreError};
use crate::watcher::readiness::notify_ready;

/// Mode of the output directory when it has to be created.
const DIR_MODE: u32 = 0o755;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchState {
    Bootstrapping,
    Materializing,
    Watching(ChangeIndex),
}

/// Keeps the output directory in sync with the watched prefix.
///
/// The loop is strictly sequential: fetch, write, wait, repeat. Store calls
/// block, so they run on a single dedicated worker thread while the loop
/// awaits their result.
pub struct Watcher<S> {
    store: Arc<S>,
    config: Arc<RuntimeConfig>,
    materializer: Materializer,
    dispatcher: Dispatcher,
    /// Groups seen in the last snapshot, used to find stale files.
    known_groups: HashSet<String>,
    /// Called once, after the first snapshot is on disk.
    on_ready: fn(),
    ready_notified: bool,
}

impl<S> Watcher<S>
where
    S: KeysApi + Send + Sync + 'static,
{
    pub fn new(store: Arc<S>, config: Arc<RuntimeConfig>) -> Result<Self, WatchError> {
        let dispatcher = DispatcherBuilder::new()
            .worker_threads(NonZeroUsize::MIN)
            .build()
            .context(WorkerCreationSnafu)?;

        Ok(Self {
            store,
            materializer: Materializer::new(&config.output_dir),
            config,
            dispatcher,
            known_groups: HashSet::new(),
            on_ready: notify_ready,
            ready_notified: false,
        })
    }

    #[cfg(test)]
    fn with_ready_hook(mut self, on_ready: fn()) -> Self {
        self.on_ready = on_ready;
        self
    }

    /// Runs until a fatal error occurs, or after the first pass when watching
    /// is disabled.
    pub async fn run(&mut self) -> Result<(), WatchError> {
        let mut state = WatchState::Bootstrapping;

        loop {
            debug!("Watch loop state: {:?}", state);
            state = match state {
                WatchState::Bootstrapping => {
                    self.bootstrap().await?;
                    WatchState::Materializing
                }
                WatchState::Materializing => {
                    let index = self.materialize_snapshot().await?;
                    if !self.ready_notified {
                        (self.on_ready)();
                        self.ready_notified = true;
                    }
                    if !self.config.watch {
                        info!("Watching disabled, exiting after a single pass");
                        return Ok(());
                    }
                    WatchState::Watching(index)
                }
                WatchState::Watching(index) => {
                    self.wait_for_change(index).await?;
                    WatchState::Materializing
                }
            };
        }
    }

    async fn bootstrap(&self) -> Result<(), WatchError> {
        ensure_output_dir(self.materializer.output_dir()).await?;

        let client_urls = self
            .call_store(|store| store.sync())
            .await
            .context(StoreConnectSnafu)?;
        info!("Connected to store, cluster client URLs: {:?}", client_urls);
        Ok(())
    }

    /// Fetches the prefix and rewrites every group file. Returns the index the
    /// snapshot was taken at.
    async fn materialize_snapshot(&mut self) -> Result<ChangeIndex, WatchError> {
        let prefix = self.config.prefix.clone();
        let snapshot = self
            .call_store_with_retry("fetch", move |store| store.get_recursive(&prefix))
            .await
            .context(StoreReadSnafu)?;
        info!(
            "Fetched {} groups under '{}' at index {}",
            snapshot.root.children().len(),
            self.config.prefix,
            snapshot.index
        );

        let mut report = self.materializer.materialize(&snapshot.root).await;

        let current_groups: HashSet<String> = snapshot
            .root
            .children()
            .iter()
            .map(|group| group.name().to_string())
            .collect();
        if self.config.prune {
            let stale = self
                .known_groups
                .difference(&current_groups)
                .map(String::as_str);
            let failures = self.materializer.prune(stale).await;
            report.failures.extend(failures);
        }
        self.known_groups = current_groups;

        if !report.is_complete() {
            warn!(
                "{} config files could not be updated, they keep their previous state",
                report.failures.len()
            );
        }

        Ok(snapshot.index)
    }

    async fn wait_for_change(&self, after: ChangeIndex) -> Result<(), WatchError> {
        let prefix = self.config.prefix.clone();
        let result = self
            .call_store_with_retry("watch", move |store| {
                store.wait_for_change(&prefix, after)
            })
            .await;

        match result {
            Ok(index) => info!("Change detected at index {}", index),
            Err(e) if e.is_index_cleared() => {
                warn!("Watch index {} is no longer available, re-fetching", after)
            }
            Err(e) => return Err(e).context(StoreReadSnafu),
        }
        Ok(())
    }

    async fn call_store_with_retry<T, F>(&self, operation: &str, call: F) -> Result<T, StoreError>
    where
        F: Fn(&S) -> Result<T, StoreError> + Clone + Send + 'static,
        T: Send + 'static,
    {
        let policy = self.config.retry;
        let mut attempt = 0;

        loop {
            match self.call_store(call.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if policy.should_retry(attempt, &e) => {
                    let backoff = policy.backoff(attempt);
                    attempt += 1;
                    warn!(
                        "Transient store error during {}: {}. Retry {}/{} in {:?}",
                        operation, e, attempt, policy.max_retries, backoff
                    );
                    compio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs a blocking store call on the worker thread and awaits its result.
    async fn call_store<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: FnOnce(&S) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        let receiver = self
            .dispatcher
            .dispatch(move || async move { call(&store) })
            .map_err(|e| StoreError::DispatchError {
                reason: e.to_string(),
            })?;

        receiver
            .await
            .map_err(|source| StoreError::WorkerCanceled { source })?
    }
}

/// Makes sure `path` is a directory, creating it when missing.
async fn ensure_output_dir(path: &Path) -> Result<(), WatchError> {
    match compio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => {
            debug!("Output directory {} exists", path.display());
            Ok(())
        }
        Ok(_) => NotADirectorySnafu { path }.fail(),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("Creating output directory {}", path.display());
            compio::fs::create_dir_all(path)
                .await
                .context(OutputDirectorySnafu { path })?;
            compio::fs::set_permissions(path, Permissions::from_mode(DIR_MODE))
                .await
                .context(OutputDirectorySnafu { path })
        }
        Err(e) => Err(e).context(OutputDirectorySnafu { path }),
    }
}

#[derive(Debug, Snafu)]
pub enum WatchError {
    #[snafu(display("Failed to start the store worker"))]
    WorkerCreationError { source: std::io::Error },
    #[snafu(display("Failed to prepare output directory {}", path.display()))]
    OutputDirectoryError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Output path {} exists but is not a directory", path.display()))]
    NotADirectory { path: PathBuf },
    #[snafu(display("Failed to connect to the store"))]
    StoreConnectError { source: StoreError },
    #[snafu(display("Failed to read from the store"))]
    StoreReadError { source: StoreError },
}
