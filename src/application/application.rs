use std::sync::Arc;

use snafu::Snafu;
use snafu::prelude::*;
use tracing::{debug, info};

use crate::application::RuntimeConfig;
use crate::cli::Cli;
use crate::config::{ConfigFile, ConfigFileError};
use crate::store::{EtcdClient, StoreError};
use crate::watcher::{WatchError, Watcher};

pub struct Application;

impl Application {
    pub async fn run(cli: Cli) -> Result<(), ApplicationError> {
        let config_file = match &cli.config {
            Some(path) => ConfigFile::from_path(path).await.context(ConfigFileSnafu)?,
            None => ConfigFile::default(),
        };
        let config = RuntimeConfig::resolve(cli, config_file);
        debug!("Resolved runtime config: {:?}", config);
        info!(
            "Mirroring '{}' from {} into {}",
            config.prefix,
            config.endpoint,
            config.output_dir.display()
        );

        let client = EtcdClient::new(&config).context(StoreClientSnafu)?;

        Watcher::new(Arc::new(client), Arc::new(config))
            .context(WatchLoopSnafu)?
            .run()
            .await
            .context(WatchLoopSnafu)?;

        Ok(())
    }
}

#[derive(Debug, Snafu)]
pub enum ApplicationError {
    #[snafu(display("Critical failure encountered while loading the config file"))]
    ConfigFileError { source: ConfigFileError },
    #[snafu(display("Critical failure encountered while creating the store client"))]
    StoreClientError { source: StoreError },
    #[snafu(display("Critical failure encountered while mirroring the store"))]
    WatchLoopError { source: WatchError },
}
