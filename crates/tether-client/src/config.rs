//! Client configuration.

use std::time::Duration;

use tether_protocol::EngineIoVersion;
use tether_transport::{ConnectionUrl, TransportKind};

use crate::backoff::BackoffPolicy;

/// Settings consumed by the protocol engine.
///
/// Keepalive timing is not configured here: it always comes from the
/// negotiated handshake.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL, e.g. `http://localhost:4200/socket.io`.
    pub url: String,
    /// Wire-format generation, fixed for the session.
    pub version: EngineIoVersion,
    /// Namespace to join, default "/".
    pub namespace: String,
    /// Deadline for one full handshake attempt.
    pub connection_timeout: Duration,
    /// Whether dropped connections are re-established automatically.
    pub reconnection: bool,
    /// Delay before the first reconnection attempt.
    pub reconnection_delay: Duration,
    /// Upper bound on the computed inter-attempt delay.
    pub reconnection_delay_max: Duration,
    /// Attempt budget before the supervisor reports permanent failure.
    pub reconnection_attempts: usize,
    /// Jitter bound in `[0, 1]`, sampled once per session.
    pub randomization_factor: f64,
    /// Auth payload sent with the Connect packet (v4 only).
    pub auth: Option<serde_json::Value>,
    /// Upgrade polling to websocket when both ends allow it.
    pub auto_upgrade: bool,
    /// Extra query pairs appended to every connection URL.
    pub query: Vec<(String, String)>,
    /// Explicit transport selection; `None` lets the session pick.
    pub transport: Option<TransportKind>,
}

impl ClientConfig {
    /// Configuration with defaults for the given server URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            version: EngineIoVersion::default(),
            namespace: "/".to_string(),
            connection_timeout: Duration::from_secs(30),
            reconnection: true,
            reconnection_delay: Duration::from_millis(1000),
            reconnection_delay_max: Duration::from_millis(5000),
            reconnection_attempts: usize::MAX,
            randomization_factor: 0.5,
            auth: None,
            auto_upgrade: true,
            query: Vec::new(),
            transport: None,
        }
    }

    /// Backoff policy derived from the reconnection settings.
    ///
    /// A disabled `reconnection` collapses the budget to a single attempt.
    #[must_use]
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: self.reconnection_delay,
            max_delay: self.reconnection_delay_max,
            randomization_factor: self.randomization_factor.clamp(0.0, 1.0),
            max_attempts: if self.reconnection {
                self.reconnection_attempts
            } else {
                1
            },
        }
    }

    /// Connection URL builder for this configuration.
    #[must_use]
    pub fn connection_url(&self) -> ConnectionUrl {
        let mut url = ConnectionUrl::new(self.url.clone(), self.version);
        for (key, value) in &self.query {
            url = url.with_query(key.clone(), value.clone());
        }
        url
    }

    /// Namespace token as it appears on the wire.
    ///
    /// A v3 session appends the query string to the namespace token itself
    /// (`"/test?token=eio3"`); v4 keeps the token bare.
    #[must_use]
    pub fn wire_namespace(&self) -> String {
        if self.version == EngineIoVersion::V3 && self.namespace != "/" && !self.query.is_empty() {
            let query: Vec<String> = self
                .query
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            format!("{}?{}", self.namespace, query.join("&"))
        } else {
            self.namespace.clone()
        }
    }
}
