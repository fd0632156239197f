//! Turning a [`NatsConfig`] into a live connection.
//!
//! Resolution order for one connect attempt:
//! 1. servers: discovered endpoints when a discovery name is configured,
//!    otherwise the explicit list, joined with `,` in order
//! 2. TLS, when configured and the builder yields usable material
//! 3. the error handler, when one is given
//!
//! Every failure is returned as-is. Nothing here retries; the transport
//! applies its own reconnect policy once connected.

use async_trait::async_trait;
use config::{NatsConfig, ServerSource};
use discovery::{DiscoveryError, DnsServiceDiscovery, Endpoint};
use tracing::{Span, debug};

use crate::error::ConnectError;
use crate::handler::{ErrorHandler, build_error_handler};
use crate::sink::{SinkHandle, SinkRegistry, SinkTarget};
use crate::tls::{PemTlsBuilder, TlsBuilder};
use crate::transport::{ConnectOption, NatsTransport, Transport};

/// URL scheme of discovered server addresses.
pub const NATS_SCHEME: &str = "nats";

/// Resolves a service name to its endpoints.
#[async_trait]
pub trait Discover: Send + Sync {
    async fn discover(&self, service: &str) -> Result<Vec<Endpoint>, DiscoveryError>;
}

#[async_trait]
impl Discover for DnsServiceDiscovery {
    async fn discover(&self, service: &str) -> Result<Vec<Endpoint>, DiscoveryError> {
        self.discover_endpoints(service).await
    }
}

/// DNS discovery using the system resolver config, read when a lookup is made.
/// Configs that never use discovery never touch the resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDiscovery;

#[async_trait]
impl Discover for SystemDiscovery {
    async fn discover(&self, service: &str) -> Result<Vec<Endpoint>, DiscoveryError> {
        DnsServiceDiscovery::new()?.discover_endpoints(service).await
    }
}

/// Connector wired to DNS discovery, PEM TLS material and async-nats.
pub type NatsConnector = Connector<SystemDiscovery, PemTlsBuilder, NatsTransport>;

/// Resolves connection config and connects through the transport.
#[derive(Debug, Clone)]
pub struct Connector<D, B, T> {
    discovery: D,
    tls: B,
    transport: T,
}

impl NatsConnector {
    pub fn nats(transport: NatsTransport) -> Self {
        Self::new(SystemDiscovery, PemTlsBuilder, transport)
    }
}

impl<D, B, T> Connector<D, B, T>
where
    D: Discover,
    B: TlsBuilder,
    T: Transport,
{
    pub fn new(discovery: D, tls: B, transport: T) -> Self {
        Self {
            discovery,
            tls,
            transport,
        }
    }

    /// The server string to connect to. Explicit servers are used verbatim;
    /// discovered endpoints are formatted as `nats://host:port`.
    pub async fn resolve_servers(&self, config: &NatsConfig) -> Result<String, ConnectError> {
        match &config.servers {
            ServerSource::Explicit(servers) => Ok(servers.join(",")),
            ServerSource::Discovered(name) => {
                let endpoints = self.discovery.discover(name).await?;
                debug!(discovery_name = %name, count = endpoints.len(), "discovered nats servers");
                Ok(endpoints
                    .iter()
                    .map(|endpoint| endpoint.url(NATS_SCHEME))
                    .collect::<Vec<_>>()
                    .join(","))
            }
        }
    }

    /// Connect options in application order: TLS first, then the error handler.
    pub fn resolve_options(
        &self,
        config: &NatsConfig,
        handler: Option<ErrorHandler>,
    ) -> Result<Vec<ConnectOption>, ConnectError> {
        let mut options = Vec::with_capacity(2);
        if let Some(settings) = &config.tls {
            match self.tls.build(settings)? {
                Some(secure) => options.push(ConnectOption::Secure(secure)),
                None => debug!("tls configured without any material, connecting without tls"),
            }
        }
        if let Some(handler) = handler {
            options.push(ConnectOption::ErrorHandler(handler));
        }
        Ok(options)
    }

    /// Resolve `config` and connect.
    pub async fn connect(
        &self,
        config: &NatsConfig,
        handler: Option<ErrorHandler>,
    ) -> Result<T::Connection, ConnectError> {
        let servers = self.resolve_servers(config).await?;
        let options = self.resolve_options(config, handler)?;
        debug!(%servers, options = options.len(), "connecting to nats");

        Ok(self.transport.connect(&servers, options).await?)
    }
}

/// A connection made by [`configure_connection`].
#[derive(Debug)]
pub struct Configured<C> {
    pub connection: C,
    /// present when a log subject is configured; log records are published
    /// for as long as this is held. Close it to wait for queued records
    pub sink: Option<SinkHandle>,
}

/// Connect using `config`, reporting async errors in the context of `span`.
///
/// No config means messaging is not in use: `Ok(None)` is returned and
/// nothing is connected. When the config has a log subject, a log sink is
/// attached to `sinks` once the connection is up.
pub async fn configure_connection<D, B, T>(
    connector: &Connector<D, B, T>,
    config: Option<&NatsConfig>,
    span: &Span,
    sinks: &SinkRegistry,
) -> Result<Option<Configured<T::Connection>>, ConnectError>
where
    D: Discover,
    B: TlsBuilder,
    T: Transport,
    T::Connection: SinkTarget,
{
    let Some(config) = config else {
        debug!(parent: span, "Skipping nats connection because there is no config");
        return Ok(None);
    };

    let connection = connector
        .connect(config, Some(build_error_handler(span)))
        .await?;

    let sink = config.log_subject.as_deref().map(|subject| {
        let (publisher, task) = connection.log_publisher(subject);
        let handle = sinks.attach_with_task(publisher, task);
        debug!(parent: span, subject, "Configured nats log sink");
        handle
    });

    Ok(Some(Configured { connection, sink }))
}
