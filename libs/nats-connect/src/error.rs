//! Error types for connection resolution and transport callbacks.
//!
//! Pre-connect failures (discovery, TLS, connect) are returned to the caller as
//! [`ConnectError`], each wrapping the collaborator's error unchanged.
//! Post-connect failures arrive as [`TransportError`] through the error handler
//! and are only ever logged.

use std::path::PathBuf;

use discovery::DiscoveryError;
use thiserror::Error;

/// Failure of a connect attempt. Display and source are those of the wrapped
/// error, the variant tells which stage failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// service discovery for the configured name failed
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// TLS settings could not be built from the configured material
    #[error(transparent)]
    TlsBuild(#[from] TlsError),

    /// the transport could not establish a connection
    #[error(transparent)]
    Connect(#[from] TransportError),
}

impl ConnectError {
    pub fn is_discovery(&self) -> bool {
        matches!(self, ConnectError::Discovery(_))
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, ConnectError::TlsBuild(_))
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, ConnectError::Connect(_))
    }
}

/// Errors reported by the transport, either from `connect` or asynchronously
/// through the error handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// A subscriber is not draining messages fast enough and messages were dropped.
    #[error("slow consumer, messages dropped")]
    SlowConsumer,

    /// Error sent by the server, e.g. a permissions violation.
    #[error("server error: {0}")]
    Server(String),

    /// Error raised inside the client.
    #[error("client error: {0}")]
    Client(String),

    /// Connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The pending message count of a subscription could not be read.
    #[error("slow consumer on subscription {sid}: pending message count unavailable")]
    PendingUnavailable { sid: u64 },
}

impl TransportError {
    pub fn is_slow_consumer(&self) -> bool {
        matches!(self, TransportError::SlowConsumer)
    }
}

/// Errors building TLS settings from configured material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TlsError {
    /// a PEM file could not be read or decoded
    #[error("failed to load PEM file '{}': {reason}", path.display())]
    Pem { path: PathBuf, reason: String },

    /// a certificate file held no certificates
    #[error("no certificates found in '{}'", .0.display())]
    NoCertificates(PathBuf),

    /// only one of cert_file and key_file was configured
    #[error("cert_file and key_file must be configured together")]
    IncompleteKeyPair,
}
