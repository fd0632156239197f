//! Parse from either cli or env var

use std::path::PathBuf;

pub use clap::Parser;
use clap::ValueEnum;

/// the default path to config
pub static DEFAULT_CONFIG_PATH: &str = "/etc/nats-connect/config.yaml";
/// default log level. Can use this argument or NATS_CONNECT_LOG env var
pub const DEFAULT_LOG: &str = "info";
/// tokio worker thread name
pub static DEFAULT_THREAD_NAME: &str = "nats-connect-worker";
/// client name reported to the nats server
pub static DEFAULT_CLIENT_NAME: &str = "nats-connect";

/// log as "json", "pretty" or "standard" (unstructured)
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Standard,
    Json,
    Pretty,
}

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(author, name = "nats-connect", bin_name = "nats-connect", about, long_about = None)]
/// connects to nats using a config file and holds the connection until shutdown.
/// `.env` in the working directory is loaded as well
pub struct Config {
    /// path to config file (json or yaml)
    #[clap(
        short,
        long,
        value_parser,
        env,
        default_value = DEFAULT_CONFIG_PATH
    )]
    pub config_path: PathBuf,
    /// set the log level. All valid RUST_LOG arguments are accepted
    #[clap(long, env = "NATS_CONNECT_LOG", value_parser, default_value = DEFAULT_LOG)]
    pub log: String,
    /// formatting to apply to logs
    #[clap(long, env, value_enum, default_value_t = LogFormat::Standard)]
    pub log_format: LogFormat,
    /// number of worker threads, defaults to the number of logical CPUs
    #[clap(long, env, value_parser)]
    pub threads: Option<usize>,
    /// Worker thread name
    #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
    pub thread_name: String,
    /// client name reported to the nats server
    #[clap(long, env, value_parser, default_value = DEFAULT_CLIENT_NAME)]
    pub client_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::try_parse_from(["nats-connect"]).unwrap();
        assert_eq!(cfg.config_path, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(cfg.log, DEFAULT_LOG);
        assert_eq!(cfg.log_format, LogFormat::Standard);
        assert_eq!(cfg.threads, None);
        assert_eq!(cfg.client_name, DEFAULT_CLIENT_NAME);
    }

    #[test]
    fn test_args() {
        let cfg = Config::try_parse_from([
            "nats-connect",
            "-c",
            "/tmp/nats.json",
            "--log",
            "debug,async_nats=warn",
            "--log-format",
            "json",
            "--threads",
            "2",
        ])
        .unwrap();
        assert_eq!(cfg.config_path, PathBuf::from("/tmp/nats.json"));
        assert_eq!(cfg.log, "debug,async_nats=warn");
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.threads, Some(2));
    }

    #[test]
    fn test_invalid_log_format() {
        assert!(Config::try_parse_from(["nats-connect", "--log-format", "xml"]).is_err());
    }
}
