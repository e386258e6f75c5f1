use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::config::ConfigFile;
use crate::watcher::RetryPolicy;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:2379";
pub const DEFAULT_OUTPUT_DIR: &str = "/run/conf";
pub const DEFAULT_PREFIX: &str = "/conf";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 1000;

/// Everything the watch loop needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub endpoint: String,
    pub output_dir: PathBuf,
    pub prefix: String,
    pub watch: bool,
    pub prune: bool,
    /// Applies to every request except the watch itself.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            prefix: DEFAULT_PREFIX.to_string(),
            watch: true,
            prune: false,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            retry: RetryPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    /// Command line flags win over the config file, which wins over the defaults.
    pub fn resolve(cli: Cli, file: ConfigFile) -> Self {
        let defaults = Self::default();

        let retry = RetryPolicy {
            max_retries: cli
                .max_retries
                .or(file.max_retries)
                .unwrap_or(defaults.retry.max_retries),
            initial_backoff: cli
                .retry_backoff_ms
                .or(file.retry_backoff_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.initial_backoff),
        };

        Self {
            endpoint: cli.endpoint.or(file.endpoint).unwrap_or(defaults.endpoint),
            output_dir: cli
                .output_dir
                .or(file.output_dir)
                .unwrap_or(defaults.output_dir),
            prefix: cli.etcd_prefix.or(file.prefix).unwrap_or(defaults.prefix),
            watch: cli.watch.or(file.watch).unwrap_or(defaults.watch),
            prune: cli.prune.or(file.prune).unwrap_or(defaults.prune),
            request_timeout: cli
                .request_timeout_ms
                .or(file.request_timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            retry,
        }
    }
}
