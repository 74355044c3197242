//! Per-request activity reporting
//!
//! The connection handler builds one [`ActivityEvent`] per completed request
//! and hands it to the engine's [`ActivitySink`] after the response has been
//! written. Socket failures go to [`ActivitySink::transport_error`] instead.

use crate::status::{Status, StatusFamily};
use crate::Method;
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Service name used when the config does not carry one
pub const UNNAMED_SERVICE: &str = "unnamed";

/// One completed request
#[derive(Debug, Clone)]
pub struct ActivityEvent {
    pub service_name: String,
    pub timestamp: SystemTime,
    pub method: Method,
    pub path: String,
    pub status: Status,
    pub client_address: Option<String>,
    /// From `X-Request-ID`, if present
    pub request_id: Option<String>,
    pub user_agent: Option<String>,
    /// Time from first byte of the message to response flush
    pub duration: Option<Duration>,
}

impl fmt::Display for ActivityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.service_name)?;
        if let Some(client) = &self.client_address {
            write!(f, "[{client}] ")?;
        }
        write!(f, "{} {} -> {}", self.method, self.path, self.status.code)
    }
}

/// Receiver for activity events
pub trait ActivitySink: Send + Sync {
    fn record(&self, event: &ActivityEvent);

    /// A connection failed at the socket level
    fn transport_error(&self, _peer: Option<SocketAddr>, _error: &std::io::Error) {}
}

impl<F> ActivitySink for F
where
    F: Fn(&ActivityEvent) + Send + Sync,
{
    fn record(&self, event: &ActivityEvent) {
        self(event)
    }
}

/// Which events a log sink writes
#[derive(Clone)]
pub enum ActivitySelection {
    All,
    /// Status 400 and above
    FailuresOnly,
    Families(HashSet<StatusFamily>),
    Custom(Arc<dyn Fn(&ActivityEvent) -> bool + Send + Sync>),
}

impl ActivitySelection {
    pub fn matches(&self, event: &ActivityEvent) -> bool {
        match self {
            ActivitySelection::All => true,
            ActivitySelection::FailuresOnly => event.status.code >= 400,
            ActivitySelection::Families(families) => families.contains(&event.status.family()),
            ActivitySelection::Custom(predicate) => predicate(event),
        }
    }
}

impl Default for ActivitySelection {
    fn default() -> Self {
        ActivitySelection::FailuresOnly
    }
}

impl fmt::Debug for ActivitySelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivitySelection::All => f.write_str("All"),
            ActivitySelection::FailuresOnly => f.write_str("FailuresOnly"),
            ActivitySelection::Families(set) => f.debug_tuple("Families").field(set).finish(),
            ActivitySelection::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Activity sink that writes through `tracing`
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    selection: ActivitySelection,
}

impl ActivityLog {
    pub fn tracing(selection: ActivitySelection) -> Self {
        Self { selection }
    }
}

impl ActivitySink for ActivityLog {
    fn record(&self, event: &ActivityEvent) {
        if !self.selection.matches(event) {
            return;
        }

        let duration_ms = event.duration.map(|d| d.as_secs_f64() * 1000.0);
        match event.status.family() {
            StatusFamily::ServerError => tracing::error!(
                service = %event.service_name,
                request_id = ?event.request_id,
                user_agent = ?event.user_agent,
                duration_ms = ?duration_ms,
                "{event}"
            ),
            StatusFamily::ClientError | StatusFamily::Other => tracing::warn!(
                service = %event.service_name,
                request_id = ?event.request_id,
                user_agent = ?event.user_agent,
                duration_ms = ?duration_ms,
                "{event}"
            ),
            _ => tracing::info!(
                service = %event.service_name,
                request_id = ?event.request_id,
                user_agent = ?event.user_agent,
                duration_ms = ?duration_ms,
                "{event}"
            ),
        }
    }

    fn transport_error(&self, peer: Option<SocketAddr>, error: &std::io::Error) {
        tracing::warn!(peer = ?peer, error = %error, "connection failed");
    }
}
