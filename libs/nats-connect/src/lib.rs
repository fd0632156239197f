//! # nats-connect
//!
//! Connection setup for NATS-backed services.
//!
//! This library provides:
//! - **Connection resolution**: explicit or DNS-discovered servers, optional
//!   TLS material, and the error handler, assembled into one connect call.
//! - **Error handler** that turns asynchronous transport errors (slow
//!   consumers, server and client errors) into structured error events.
//! - **Log sink** publishing application log records on a subject, attached
//!   through an explicit registry rather than a global hook.
//!
//! Discovery, TLS loading and the transport are traits, with DNS SRV,
//! PEM files and `async-nats` as the implementations used in production.
//!
//! ```no_run
//! # async fn run(cfg: config::Config) -> Result<(), nats_connect::ConnectError> {
//! use nats_connect::{NatsConnector, NatsTransport, SinkRegistry, configure_connection};
//!
//! let sinks = SinkRegistry::new();
//! let connector = NatsConnector::nats(NatsTransport::new());
//! let span = tracing::info_span!("messaging");
//! if let Some(configured) = configure_connection(&connector, cfg.nats(), &span, &sinks).await? {
//!     configured.connection.publish("greetings", "hello".into()).await.ok();
//! }
//! # Ok(())
//! # }
//! ```
#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod connector;
pub mod error;
pub mod handler;
pub mod sink;
pub mod tls;
pub mod transport;

// Re-export key types for convenient access
pub use connector::{
    Configured, Connector, Discover, NATS_SCHEME, NatsConnector, SystemDiscovery,
    configure_connection,
};
pub use error::{ConnectError, TlsError, TransportError};
pub use handler::{
    ConnectionInfo, ConnectionStatus, ErrorHandler, SubscriptionInfo, build_error_handler,
};
pub use sink::{LogPublisher, NatsLogPublisher, SinkHandle, SinkLayer, SinkRegistry, SinkTarget};
pub use tls::{ClientCertificate, PemTlsBuilder, SecureTransport, TlsBuilder};
pub use transport::{ConnectOption, NatsTransport, Transport};
