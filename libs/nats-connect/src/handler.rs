//! Error handler invoked by the transport for asynchronous errors.
//!
//! The handler only observes: it never closes the connection, unsubscribes or
//! retries. Each invocation emits exactly one error-level event enriched with
//! the subscription and connection context.

use std::fmt;

use tracing::{Span, error};

use crate::error::TransportError;

const COMPONENT: &str = "error-logger";

/// Snapshot of the transport connection's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Initial connect (or a reconnect) is in progress.
    Connecting,
    /// Connected and operating normally.
    Connected,
    /// Connection lost; the transport may be reconnecting.
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// The connection an error was reported on.
pub trait ConnectionInfo {
    fn status(&self) -> ConnectionStatus;
}

/// The subscription an error was reported for.
pub trait SubscriptionInfo {
    fn subject(&self) -> &str;
    /// queue group name, `None` if this is not a queue subscription
    fn queue(&self) -> Option<&str>;
    /// number of messages queued for this subscription but not yet delivered
    fn pending(&self) -> Result<u64, TransportError>;
    /// transport-assigned subscription id, when the transport reports one
    fn sid(&self) -> Option<u64> {
        None
    }
}

/// Turns transport-reported errors into structured log events.
///
/// Holds nothing but the span events are parented on, so it is cheap to clone
/// and safe to call from any number of dispatch tasks at once.
#[derive(Debug, Clone)]
pub struct ErrorHandler {
    span: Span,
}

/// Create the error handler for connections made in the context of `span`.
pub fn build_error_handler(span: &Span) -> ErrorHandler {
    ErrorHandler::new(span.clone())
}

impl ErrorHandler {
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    /// Log `err` with the context of `conn` and `sub`.
    ///
    /// For a slow consumer the subscription's pending count is attached. If
    /// reading the pending count fails, that failure is what gets reported and
    /// the slow consumer error itself is not logged.
    pub fn handle<C, S>(&self, conn: &C, sub: &S, err: TransportError)
    where
        C: ConnectionInfo + ?Sized,
        S: SubscriptionInfo + ?Sized,
    {
        let subject = sub.subject();
        let group = sub.queue().unwrap_or_default();
        let conn_status = conn.status();
        let sid = sub.sid();

        let mut err = err;
        let mut pending_messages = None;
        if err.is_slow_consumer() {
            match sub.pending() {
                Ok(pending) => pending_messages = Some(pending),
                Err(perr) => err = perr,
            }
        }

        error!(
            parent: &self.span,
            component = COMPONENT,
            subject = %subject,
            group = %group,
            sid,
            conn_status = %conn_status,
            pending_messages,
            error = %err,
            "Error while consuming from {}",
            subject
        );
    }
}
