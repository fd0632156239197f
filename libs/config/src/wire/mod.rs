//! # Wire format
//!
//! The shapes in this module are exactly what is read from a config file. They
//! are converted into the types in the crate root with `TryFrom`, which is where
//! precedence rules (discovery vs. explicit servers) are applied.
//!
//! ```yaml
//! nats:
//!   discovery_name: _nats._tcp.example.internal
//!   servers:
//!     - nats://10.0.0.1:4222
//!   log_subject: app.logs
//!   tls_conf:
//!     ca_files: [/etc/ssl/nats/ca.pem]
//!     cert_file: /etc/ssl/nats/client.pem
//!     key_file: /etc/ssl/nats/client-key.pem
//! metrics:
//!   subject: app.metrics
//!   default_dims:
//!     env: prod
//! ```
use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};

/// top-level config type
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Config {
    pub nats: Option<NatsConfig>,
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct NatsConfig {
    #[serde(default, rename = "tls_conf")]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub discovery_name: String,
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub log_subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub ca_files: Vec<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    pub subject: String,
    pub default_dims: Option<HashMap<String, serde_json::Value>>,
}
