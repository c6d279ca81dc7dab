//! Connection URL assembly.
//!
//! The wire endpoint is
//! `{scheme}://{host}[:{port}]{path}/?EIO={3|4}&transport={polling|websocket}`
//! with optional extra query pairs and, once a handshake exists, the `sid`.
//! http/https map to ws/wss for the websocket transport.

use tether_protocol::EngineIoVersion;

use crate::traits::TransportKind;

/// Builder for the per-transport connection URL.
#[derive(Debug, Clone)]
pub struct ConnectionUrl {
    base: String,
    version: EngineIoVersion,
    query: Vec<(String, String)>,
}

impl ConnectionUrl {
    /// Create a builder from the server base URL, e.g.
    /// `http://localhost:4200` or `https://example.com/socket.io`.
    #[must_use]
    pub fn new(base: impl Into<String>, version: EngineIoVersion) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self {
            base,
            version,
            query: Vec::new(),
        }
    }

    /// Append an extra query pair sent on every request.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// The negotiated wire generation.
    #[must_use]
    pub fn version(&self) -> EngineIoVersion {
        self.version
    }

    /// Render the URL for one transport, with the server session id once
    /// known.
    #[must_use]
    pub fn build(&self, kind: TransportKind, sid: Option<&str>) -> String {
        let base = match kind {
            TransportKind::Websocket => map_scheme(&self.base),
            TransportKind::Polling => self.base.clone(),
        };

        let mut url = format!(
            "{base}/?EIO={}&transport={}",
            self.version.as_query(),
            kind.as_str()
        );
        for (key, value) in &self.query {
            url.push_str(&format!("&{key}={value}"));
        }
        if let Some(sid) = sid {
            url.push_str(&format!("&sid={sid}"));
        }
        url
    }
}

fn map_scheme(base: &str) -> String {
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    }
}
