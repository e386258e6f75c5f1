use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::application::data::LogLevel;

/// Mirrors an etcd prefix into a directory of env files.
///
/// Options left unset fall back to the config file, then to the defaults
/// shown below.
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct Cli {
    /// Store endpoint [default: http://127.0.0.1:2379]
    #[clap(long = "etcd", value_name = "URL")]
    pub endpoint: Option<String>,

    /// Directory receiving one env file per group [default: /run/conf]
    #[clap(long, alias = "outputDir")]
    pub output_dir: Option<PathBuf>,

    /// Watched key prefix [default: /conf]
    #[clap(long, alias = "etcdPrefix")]
    pub etcd_prefix: Option<String>,

    /// Keep watching for changes after the first pass [default: true]
    #[clap(long, action = ArgAction::Set, value_name = "BOOL")]
    pub watch: Option<bool>,

    /// Delete files of groups removed from the store [default: false]
    #[clap(long, action = ArgAction::Set, value_name = "BOOL")]
    pub prune: Option<bool>,

    /// Timeout of every store request except the watch [default: 1000]
    #[clap(long)]
    pub request_timeout_ms: Option<u64>,

    /// Retries for transient store errors before giving up [default: 0]
    #[clap(long)]
    pub max_retries: Option<u32>,

    /// Delay before the first retry, doubled on each further retry [default: 500]
    #[clap(long)]
    pub retry_backoff_ms: Option<u64>,

    /// Optional YAML config file
    #[clap(long, short)]
    pub config: Option<PathBuf>,

    #[clap(long, short, default_value = "info", value_enum)]
    pub log_level: LogLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_flags_take_explicit_values() {
        let cli = Cli::try_parse_from(["etcd-envfile", "--watch", "false", "--prune", "true"])
            .expect("valid arguments");
        assert_eq!(cli.watch, Some(false));
        assert_eq!(cli.prune, Some(true));
    }

    #[test]
    fn unset_flags_stay_unset() {
        let cli = Cli::try_parse_from(["etcd-envfile"]).expect("valid arguments");
        assert_eq!(cli.endpoint, None);
        assert_eq!(cli.watch, None);
        assert_eq!(cli.config, None);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(Cli::try_parse_from(["etcd-envfile", "--watch", "maybe"]).is_err());
        assert!(Cli::try_parse_from(["etcd-envfile", "--max-retries", "-1"]).is_err());
    }

    #[test]
    fn log_level_parses_value_enum() {
        let cli = Cli::try_parse_from(["etcd-envfile", "-l", "silent", "-c", "/etc/envfile.yaml"])
            .expect("valid arguments");
        assert!(cli.log_level.to_tracing_level().is_none());
        assert_eq!(cli.config, Some(PathBuf::from("/etc/envfile.yaml")));
    }

    #[test]
    fn camel_case_flag_names_are_accepted() {
        let cli = Cli::try_parse_from([
            "etcd-envfile",
            "--outputDir",
            "/run/app",
            "--etcdPrefix",
            "/app",
        ])
        .expect("valid arguments");
        assert_eq!(cli.output_dir, Some(PathBuf::from("/run/app")));
        assert_eq!(cli.etcd_prefix.as_deref(), Some("/app"));
    }
}
