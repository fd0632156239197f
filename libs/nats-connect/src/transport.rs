//! The transport seam and its async-nats implementation.
//!
//! Reconnection, flow control and any retry policy belong to the transport;
//! nothing here changes them.

use std::sync::{Arc, OnceLock};

use async_nats::{ConnectOptions, Event};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::handler::{ConnectionInfo, ConnectionStatus, ErrorHandler, SubscriptionInfo};
use crate::tls::SecureTransport;

/// A connect option, applied in order.
#[derive(Debug, Clone)]
pub enum ConnectOption {
    /// require TLS using the given material
    Secure(SecureTransport),
    /// report asynchronous errors to this handler
    ErrorHandler(ErrorHandler),
}

/// Establishes connections to the bus.
#[async_trait]
pub trait Transport: Send + Sync {
    type Connection: Send;

    /// `servers` is a comma separated list of server urls.
    async fn connect(
        &self,
        servers: &str,
        options: Vec<ConnectOption>,
    ) -> Result<Self::Connection, TransportError>;
}

/// [`Transport`] backed by `async-nats`.
#[derive(Debug, Clone, Default)]
pub struct NatsTransport {
    name: Option<String>,
}

impl NatsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// client name reported to the server
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn build_connect_options(
        &self,
        options: Vec<ConnectOption>,
        client: &Arc<OnceLock<async_nats::Client>>,
    ) -> ConnectOptions {
        let mut opts = ConnectOptions::new();
        if let Some(name) = &self.name {
            opts = opts.name(name);
        }

        for option in options {
            opts = match option {
                ConnectOption::Secure(secure) => {
                    for ca in secure.root_certificates {
                        opts = opts.add_root_certificates(ca);
                    }
                    if let Some(client_cert) = secure.client_certificate {
                        opts = opts.add_client_certificate(client_cert.cert, client_cert.key);
                    }
                    opts.require_tls(true)
                }
                ConnectOption::ErrorHandler(handler) => {
                    let dispatch = EventDispatch::new(handler, Arc::clone(client));
                    opts.event_callback(move |event| {
                        let dispatch = dispatch.clone();
                        async move { dispatch.dispatch(event) }
                    })
                }
            };
        }
        opts
    }
}

#[async_trait]
impl Transport for NatsTransport {
    type Connection = async_nats::Client;

    async fn connect(
        &self,
        servers: &str,
        options: Vec<ConnectOption>,
    ) -> Result<Self::Connection, TransportError> {
        // the callback may fire before connect returns, it reports `Connecting` until then
        let cell = Arc::new(OnceLock::new());
        let opts = self.build_connect_options(options, &cell);
        let addrs = servers.split(',').map(str::to_owned).collect::<Vec<_>>();

        let client = opts
            .connect(addrs)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let _ = cell.set(client.clone());
        Ok(client)
    }
}

/// Routes async-nats events to the error handler.
#[derive(Debug, Clone)]
struct EventDispatch {
    handler: ErrorHandler,
    client: Arc<OnceLock<async_nats::Client>>,
}

impl EventDispatch {
    fn new(handler: ErrorHandler, client: Arc<OnceLock<async_nats::Client>>) -> Self {
        Self { handler, client }
    }

    fn dispatch(&self, event: Event) {
        match event {
            Event::SlowConsumer(sid) => self.handler.handle(
                self,
                &EventScope::subscription(sid),
                TransportError::SlowConsumer,
            ),
            Event::ServerError(err) => self.handler.handle(
                self,
                &EventScope::connection(),
                TransportError::Server(err.to_string()),
            ),
            Event::ClientError(err) => self.handler.handle(
                self,
                &EventScope::connection(),
                TransportError::Client(err.to_string()),
            ),
            Event::Connected => info!("nats connection established"),
            Event::Disconnected => warn!("nats connection lost"),
            other => debug!(event = %other, "nats connection event"),
        }
    }
}

impl ConnectionInfo for EventDispatch {
    fn status(&self) -> ConnectionStatus {
        match self.client.get().map(|c| c.connection_state()) {
            Some(async_nats::connection::State::Connected) => ConnectionStatus::Connected,
            Some(async_nats::connection::State::Disconnected) => ConnectionStatus::Disconnected,
            Some(async_nats::connection::State::Pending) | None => ConnectionStatus::Connecting,
        }
    }
}

/// Subscription context for an async-nats event.
///
/// Events carry at most the subscription id, so subject and queue are unknown
/// and the pending count cannot be read.
#[derive(Debug, Clone, Copy)]
struct EventScope {
    sid: Option<u64>,
}

impl EventScope {
    fn subscription(sid: u64) -> Self {
        Self { sid: Some(sid) }
    }

    fn connection() -> Self {
        Self { sid: None }
    }
}

impl SubscriptionInfo for EventScope {
    fn subject(&self) -> &str {
        ""
    }

    fn queue(&self) -> Option<&str> {
        None
    }

    fn pending(&self) -> Result<u64, TransportError> {
        Err(TransportError::PendingUnavailable {
            sid: self.sid.unwrap_or_default(),
        })
    }

    fn sid(&self) -> Option<u64> {
        self.sid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::build_error_handler;
    use tracing::Span;
    use tracing_test::traced_test;

    fn dispatch() -> EventDispatch {
        EventDispatch::new(
            build_error_handler(&Span::current()),
            Arc::new(OnceLock::new()),
        )
    }

    #[test]
    #[traced_test]
    fn test_slow_consumer_event() {
        dispatch().dispatch(Event::SlowConsumer(7));

        assert!(logs_contain(
            "error=slow consumer on subscription 7: pending message count unavailable"
        ));
        assert!(logs_contain("sid=7"));
        assert!(logs_contain("conn_status=connecting"));
        assert!(!logs_contain("pending_messages"));
    }

    #[test]
    #[traced_test]
    fn test_server_error_event() {
        dispatch().dispatch(Event::ServerError(async_nats::ServerError::Other(
            "permissions violation for subscription".into(),
        )));

        assert!(logs_contain("error=server error:"));
        assert!(logs_contain("permissions violation for subscription"));
        assert!(logs_contain("component=\"error-logger\""));
        assert!(!logs_contain("sid="));
    }

    #[test]
    #[traced_test]
    fn test_lifecycle_events_are_not_errors() {
        let dispatch = dispatch();
        dispatch.dispatch(Event::Connected);
        dispatch.dispatch(Event::Disconnected);

        assert!(logs_contain("nats connection established"));
        assert!(logs_contain("nats connection lost"));
        assert!(!logs_contain("error-logger"));
    }

    #[test]
    fn test_status_before_connect() {
        assert_eq!(dispatch().status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn test_build_connect_options() {
        let transport = NatsTransport::new().with_name("nats-connect-test");
        let cell = Arc::new(OnceLock::new());
        // options are opaque once built, this checks every option kind applies
        let _opts = transport.build_connect_options(
            vec![
                ConnectOption::Secure(SecureTransport {
                    root_certificates: vec!["/etc/ca.pem".into()],
                    client_certificate: None,
                }),
                ConnectOption::ErrorHandler(build_error_handler(&Span::none())),
            ],
            &cell,
        );
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let err = NatsTransport::new()
            .connect("nats://127.0.0.1:1", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
