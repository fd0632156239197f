use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use tracing::{Span, debug, field, info_span, warn};

pub mod wire;

/// application config, everything here is optional
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    nats: Option<NatsConfig>,
    metrics: Option<MetricsConfig>,
    path: Option<PathBuf>,
}

impl Config {
    /// the nats connection config, `None` means messaging is not configured
    pub fn nats(&self) -> Option<&NatsConfig> {
        self.nats.as_ref()
    }
    pub fn metrics(&self) -> Option<&MetricsConfig> {
        self.metrics.as_ref()
    }
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// reads the config at `path`. The format is determined from the extension,
    /// with no known extension we attempt JSON then YAML
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("failed to find config at {}", &path.display()))?;
        let mut config = match path.extension() {
            Some(ext) if ext == "json" => Self::json(&input)?,
            Some(ext) if ext == "yaml" || ext == "yml" => Self::yaml(&input)?,
            _ => Self::new(&input)?,
        };
        debug!(?config);
        config.path = Some(path.to_path_buf());

        Ok(config)
    }
    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse_str<S: AsRef<str>>(s: S) -> Result<Self> {
        let config = Self::new(s)?;
        debug!(?config);
        Ok(config)
    }
    /// Create a new Config. Pass in the wire config format from yaml
    pub fn yaml<S: AsRef<str>>(input: S) -> Result<Self> {
        Self::try_from(serde_yaml::from_str::<wire::Config>(input.as_ref())?)
    }
    /// Create a new Config. Pass in the wire config format from json
    pub fn json<S: AsRef<str>>(input: S) -> Result<Self> {
        Self::try_from(serde_json::from_str::<wire::Config>(input.as_ref())?)
    }
    /// Attempts to decode input as json, then yaml, and if both fail will return Err
    pub fn new<S: AsRef<str>>(input: S) -> Result<Self> {
        match Self::json(input.as_ref()) {
            Ok(r) => Ok(r),
            Err(_err) => Self::yaml(input.as_ref()),
        }
    }
}

impl TryFrom<wire::Config> for Config {
    type Error = anyhow::Error;

    fn try_from(cfg: wire::Config) -> Result<Self> {
        Ok(Self {
            nats: cfg.nats.map(NatsConfig::from),
            metrics: cfg.metrics.map(MetricsConfig::try_from).transpose()?,
            path: None,
        })
    }
}

/// Where the server addresses for a connection come from. When a discovery
/// name is configured it always takes precedence over explicit servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerSource {
    /// server urls used verbatim, in order
    Explicit(Vec<String>),
    /// service name resolved through discovery at connect time
    Discovered(String),
}

impl fmt::Display for ServerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerSource::Explicit(servers) => write!(f, "{}", servers.join(",")),
            ServerSource::Discovered(name) => write!(f, "discover:{name}"),
        }
    }
}

/// nats connection config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsConfig {
    /// present iff the connection must use TLS
    pub tls: Option<TlsSettings>,
    pub servers: ServerSource,
    /// log records are also published to the bus under this subject
    pub log_subject: Option<String>,
}

impl NatsConfig {
    /// config with an explicit server list and no TLS or log subject
    pub fn explicit<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tls: None,
            servers: ServerSource::Explicit(servers.into_iter().map(Into::into).collect()),
            log_subject: None,
        }
    }

    /// config resolving its servers through discovery of `name`
    pub fn discovered(name: impl Into<String>) -> Self {
        Self {
            tls: None,
            servers: ServerSource::Discovered(name.into()),
            log_subject: None,
        }
    }

    /// a span carrying the connection settings worth logging. TLS fields are
    /// only recorded when TLS is configured
    pub fn span(&self) -> Span {
        let span = info_span!(
            "nats",
            logs_subject = %self.log_subject.as_deref().unwrap_or_default(),
            servers = %self.servers,
            ca_files = field::Empty,
            key_file = field::Empty,
            cert_file = field::Empty,
        );
        if let Some(tls) = &self.tls {
            let ca_files = tls
                .ca_files
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(",");
            span.record("ca_files", field::display(ca_files));
            span.record("key_file", field::display(display_opt(&tls.key_file)));
            span.record("cert_file", field::display(display_opt(&tls.cert_file)));
        }
        span
    }
}

fn display_opt(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

impl From<wire::NatsConfig> for NatsConfig {
    fn from(cfg: wire::NatsConfig) -> Self {
        let servers = if cfg.discovery_name.is_empty() {
            ServerSource::Explicit(cfg.servers)
        } else {
            if !cfg.servers.is_empty() {
                warn!(
                    discovery_name = %cfg.discovery_name,
                    servers = %cfg.servers.join(","),
                    "both discovery_name and servers configured, discovered servers take precedence"
                );
            }
            ServerSource::Discovered(cfg.discovery_name)
        };
        Self {
            tls: cfg.tls.map(TlsSettings::from),
            servers,
            log_subject: Some(cfg.log_subject).filter(|s| !s.is_empty()),
        }
    }
}

/// TLS material locations. An empty value is a valid "no TLS material" config
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsSettings {
    pub ca_files: Vec<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

impl TlsSettings {
    /// true if no TLS material is configured at all
    pub fn is_empty(&self) -> bool {
        self.ca_files.is_empty() && self.cert_file.is_none() && self.key_file.is_none()
    }
}

impl From<wire::TlsConfig> for TlsSettings {
    fn from(cfg: wire::TlsConfig) -> Self {
        Self {
            ca_files: cfg.ca_files,
            cert_file: cfg.cert_file,
            key_file: cfg.key_file,
        }
    }
}

/// subject & default dimensions for metrics published to the bus
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricsConfig {
    pub subject: String,
    pub default_dims: HashMap<String, serde_json::Value>,
}

impl TryFrom<wire::MetricsConfig> for MetricsConfig {
    type Error = anyhow::Error;

    fn try_from(cfg: wire::MetricsConfig) -> Result<Self> {
        if cfg.subject.trim().is_empty() {
            bail!("metrics config requires a non-empty 'subject'");
        }
        Ok(Self {
            subject: cfg.subject,
            default_dims: cfg.default_dims.unwrap_or_default(),
        })
    }
}
