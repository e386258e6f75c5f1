use std::path::{Path, PathBuf};

use compio::fs;
use hashlink::LinkedHashMap;
use saphyr::{LoadableYamlNode, Scalar, Yaml};
use snafu::prelude::*;
use tracing::{debug, warn};

/// Settings read from the optional YAML config file. Every field is optional;
/// unset fields fall back to the command line or the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub endpoint: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub prefix: Option<String>,
    pub watch: Option<bool>,
    pub prune: Option<bool>,
    pub request_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

impl ConfigFile {
    pub async fn from_path(path: &Path) -> Result<Self, ConfigFileError> {
        debug!("Reading config file: {}", path.display());
        let bytes = fs::read(path).await.context(ReadSnafu {
            file_path: path.to_path_buf(),
        })?;
        let contents = String::from_utf8(bytes).context(NotUtf8Snafu {
            file_path: path.to_path_buf(),
        })?;
        debug!("Successfully read config file: {} bytes", contents.len());
        contents.as_str().try_into()
    }

    fn apply_field(&mut self, key: &str, value: &Yaml) -> Result<(), ConfigFileError> {
        match key {
            "etcd" => self.endpoint = Some(expect_string(key, value)?),
            "outputDir" => self.output_dir = Some(PathBuf::from(expect_string(key, value)?)),
            "etcdPrefix" => self.prefix = Some(expect_string(key, value)?),
            "watch" => self.watch = Some(expect_bool(key, value)?),
            "prune" => self.prune = Some(expect_bool(key, value)?),
            "requestTimeoutMs" => self.request_timeout_ms = Some(expect_unsigned(key, value)?),
            "maxRetries" => {
                let retries = expect_unsigned(key, value)?;
                self.max_retries = Some(u32::try_from(retries).ok().context(InvalidFieldSnafu {
                    field: key,
                    expected: "an unsigned 32-bit integer",
                })?);
            }
            "retryBackoffMs" => self.retry_backoff_ms = Some(expect_unsigned(key, value)?),
            _ => warn!("Ignoring unknown config key '{}'", key),
        }
        Ok(())
    }

    fn from_mapping(top_level: &LinkedHashMap<Yaml, Yaml>) -> Result<Self, ConfigFileError> {
        let mut config = ConfigFile::default();
        for (key, value) in top_level {
            match key {
                Yaml::Value(Scalar::String(key)) => config.apply_field(key, value)?,
                _ => debug!("Skipping non-string config key: {:?}", key),
            }
        }
        Ok(config)
    }
}

impl TryFrom<&str> for ConfigFile {
    type Error = ConfigFileError;

    fn try_from(contents: &str) -> Result<Self, Self::Error> {
        let documents = Yaml::load_from_str(contents).context(ParseSnafu)?;
        let Some(document) = documents.first() else {
            debug!("Config file is empty, using defaults");
            return Ok(ConfigFile::default());
        };
        ensure!(documents.len() == 1, MultipleDocumentsSnafu);

        let top_level = document
            .as_mapping()
            .ok_or(ConfigFileError::TopLevelNotMap)?;
        Self::from_mapping(top_level)
    }
}

fn expect_string(field: &str, value: &Yaml) -> Result<String, ConfigFileError> {
    match value {
        Yaml::Value(Scalar::String(s)) => Ok(s.to_string()),
        _ => InvalidFieldSnafu {
            field,
            expected: "a string",
        }
        .fail(),
    }
}

fn expect_bool(field: &str, value: &Yaml) -> Result<bool, ConfigFileError> {
    match value {
        Yaml::Value(Scalar::Boolean(b)) => Ok(*b),
        _ => InvalidFieldSnafu {
            field,
            expected: "a boolean",
        }
        .fail(),
    }
}

fn expect_unsigned(field: &str, value: &Yaml) -> Result<u64, ConfigFileError> {
    match value {
        Yaml::Value(Scalar::Integer(i)) if *i >= 0 => Ok(*i as u64),
        _ => InvalidFieldSnafu {
            field,
            expected: "a non-negative integer",
        }
        .fail(),
    }
}

#[derive(Debug, Snafu)]
pub enum ConfigFileError {
    #[snafu(display("Failed to read the config file: {}", file_path.display()))]
    ReadError {
        file_path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Config file {} is not valid UTF-8", file_path.display()))]
    NotUtf8Error {
        file_path: PathBuf,
        source: std::string::FromUtf8Error,
    },
    #[snafu(display("Failed to parse the config file"))]
    ParseError { source: saphyr::ScanError },
    #[snafu(display("Config file must contain a single YAML document"))]
    MultipleDocuments,
    #[snafu(display("Top level of config should be a map"))]
    TopLevelNotMap,
    #[snafu(display("Config key '{}' should be {}", field, expected))]
    InvalidField { field: String, expected: String },
}
