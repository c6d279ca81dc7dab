//! Session state machine: handshake, keepalive, dispatch, teardown.
//!
//! A session owns exactly one transport at a time and drives it through
//! `Idle -> Handshaking -> Connected -> Disconnecting -> Closed`. All
//! keepalive timing comes from the negotiated handshake.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, timeout, Instant as TokioInstant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use tether_protocol::{
    encode_socket, Decoder, EngineIoVersion, EnginePacket, Handshake, Incoming, Packet,
    PacketKind, ProtocolError, RawUnit, Value,
};
use tether_transport::{
    ConnectionUrl, Transport, TransportError, TransportFactory, TransportFrame, TransportKind,
};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::handler::{lifecycle, Dispatcher, Event};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Handshaking,
    Connected,
    Disconnecting,
    Closed,
}

/// Why a session left `Connected`.
///
/// The string forms are stable API, mirrored to `disconnect` event
/// arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer sent a Disconnect packet.
    ServerDisconnect,
    /// Locally initiated disconnect.
    ClientDisconnect,
    /// No pong arrived within the negotiated deadline.
    PingTimeout,
    /// The transport closed cleanly underneath the session.
    TransportClose,
    /// The transport failed.
    TransportError,
}

impl DisconnectReason {
    /// Stable reason string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ServerDisconnect => "io server disconnect",
            DisconnectReason::ClientDisconnect => "io client disconnect",
            DisconnectReason::PingTimeout => "ping timeout",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError => "transport error",
        }
    }

    /// Explicit disconnects never trigger automatic reconnection.
    #[must_use]
    pub fn is_explicit(&self) -> bool {
        matches!(
            self,
            DisconnectReason::ServerDisconnect | DisconnectReason::ClientDisconnect
        )
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub(crate) type SharedState = Arc<Mutex<SessionState>>;

/// State shared between the session task and the facade.
pub(crate) struct SessionContext {
    pub acks: Arc<crate::ack::AckRegistry>,
    pub dispatcher: Dispatcher,
    pub state: SharedState,
    pub latency: Arc<Mutex<Option<Duration>>>,
}

/// An established connection: transport opened, handshake done, namespace
/// joined.
pub(crate) struct Session {
    transport: Box<dyn Transport>,
    decoder: Decoder,
    version: EngineIoVersion,
    nsp: String,
    handshake: Handshake,
    sid: String,
}

impl Session {
    /// Run one full connection attempt under the configured deadline.
    pub(crate) async fn establish(
        config: &ClientConfig,
        factory: &dyn TransportFactory,
    ) -> Result<Self, ClientError> {
        timeout(
            config.connection_timeout,
            Self::handshake_attempt(config, factory),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
    }

    /// The server-assigned socket id for the joined namespace.
    pub(crate) fn sid(&self) -> &str {
        &self.sid
    }

    async fn handshake_attempt(
        config: &ClientConfig,
        factory: &dyn TransportFactory,
    ) -> Result<Self, ClientError> {
        let url = config.connection_url();

        // Explicit kind wins; otherwise start on polling and upgrade, the
        // way the probing GET does, or go straight to the socket transport
        // when polling is not available.
        let kind = config.transport.unwrap_or_else(|| {
            if factory.supports(TransportKind::Polling) {
                TransportKind::Polling
            } else {
                TransportKind::Websocket
            }
        });

        let mut transport = factory.open(kind, &url, None).await?;
        transport.connect().await?;
        debug!(transport = %transport.kind(), "Transport connected");

        let mut decoder = Decoder::new();
        let handshake = recv_open(transport.as_mut(), &mut decoder, config.version).await?;
        debug!(
            sid = %handshake.sid,
            ping_interval = handshake.ping_interval,
            ping_timeout = handshake.ping_timeout,
            "Handshake received"
        );

        if transport.kind() == TransportKind::Polling
            && config.auto_upgrade
            && handshake.supports_upgrade(TransportKind::Websocket.as_str())
            && factory.supports(TransportKind::Websocket)
        {
            match probe_upgrade(factory, &url, &handshake.sid).await {
                Ok(upgraded) => {
                    // Release the old transport before its replacement
                    // becomes current.
                    let _ = transport.disconnect().await;
                    transport = upgraded;
                    decoder.reset();
                    info!("Upgraded transport to websocket");
                }
                Err(error) => {
                    warn!(%error, "Transport upgrade failed; staying on polling");
                }
            }
        }

        let mut session = Self {
            transport,
            decoder,
            version: config.version,
            nsp: config.wire_namespace(),
            handshake,
            sid: String::new(),
        };
        session.join_namespace(config).await?;
        Ok(session)
    }

    /// Send the Socket.IO Connect packet per the generation rule and await
    /// the matching reply.
    async fn join_namespace(&mut self, config: &ClientConfig) -> Result<(), ClientError> {
        // v3 sends Connect only for a non-root namespace; v4 always sends
        // it, auth payload included.
        let send_connect = self.version == EngineIoVersion::V4 || self.nsp != "/";
        if send_connect {
            let auth = if self.version == EngineIoVersion::V4 {
                config.auth.clone()
            } else {
                None
            };
            let packet = Packet::connect(self.nsp.as_str(), auth);
            self.send_packet(&packet).await?;
        }

        loop {
            let frame = self
                .transport
                .recv()
                .await?
                .ok_or(TransportError::ConnectionClosed)?;
            let unit = frame_to_unit(frame, self.transport.kind(), self.version)?;
            match self.decoder.decode_unit(unit)? {
                Some(Incoming::Socket(packet)) => match packet.kind {
                    PacketKind::Connect if nsp_matches(&packet.nsp, &self.nsp) => {
                        self.sid = packet
                            .data
                            .as_ref()
                            .and_then(|data| data.get("sid"))
                            .and_then(serde_json::Value::as_str)
                            .map_or_else(|| self.handshake.sid.clone(), str::to_string);
                        info!(sid = %self.sid, nsp = %self.nsp, "Namespace connected");
                        return Ok(());
                    }
                    PacketKind::ConnectError => {
                        let message = packet
                            .data
                            .map_or_else(|| "connection refused".to_string(), |d| d.to_string());
                        return Err(ClientError::Authentication(message));
                    }
                    other => debug!(kind = ?other, "Ignoring packet during handshake"),
                },
                Some(Incoming::Engine(EnginePacket::Close)) => {
                    return Err(TransportError::ConnectionClosed.into());
                }
                _ => {}
            }
        }
    }

    /// Connected loop: keepalive, outbound queue, inbound dispatch.
    ///
    /// Returns the disconnect reason after teardown has completed.
    pub(crate) async fn run(
        mut self,
        ctx: SessionContext,
        mut outbound: mpsc::Receiver<Packet>,
        cancel: CancellationToken,
    ) -> DisconnectReason {
        let ping_interval = Duration::from_millis(self.handshake.ping_interval);
        let ping_timeout = Duration::from_millis(self.handshake.ping_timeout);
        let mut ticker = interval_at(TokioInstant::now() + ping_interval, ping_interval);
        let mut ping_deadline: Option<TokioInstant> = None;
        let mut last_ping = Instant::now();
        // Placeholder deadline for the disarmed branch; never polled.
        let far_future = TokioInstant::now() + Duration::from_secs(86400 * 365);

        let reason = loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = self.send_packet(&Packet::disconnect(self.nsp.as_str())).await;
                    break DisconnectReason::ClientDisconnect;
                }

                _ = ticker.tick() => {
                    // Skip the tick while a pong is still outstanding so the
                    // deadline is not pushed forward indefinitely.
                    if ping_deadline.is_none() {
                        last_ping = Instant::now();
                        if let Err(error) = self.send_engine(&EnginePacket::Ping(None)).await {
                            warn!(%error, "Ping send failed");
                            break DisconnectReason::TransportError;
                        }
                        ping_deadline = Some(TokioInstant::now() + ping_timeout);
                    }
                }

                () = sleep_until(ping_deadline.unwrap_or(far_future)), if ping_deadline.is_some() => {
                    warn!("Pong deadline expired");
                    break DisconnectReason::PingTimeout;
                }

                maybe_packet = outbound.recv() => {
                    match maybe_packet {
                        Some(packet) => {
                            if let Err(error) = self.send_packet(&packet).await {
                                warn!(%error, "Outbound send failed");
                                break DisconnectReason::TransportError;
                            }
                        }
                        None => {
                            // Facade dropped; leave like a local disconnect.
                            let _ = self.send_packet(&Packet::disconnect(self.nsp.as_str())).await;
                            break DisconnectReason::ClientDisconnect;
                        }
                    }
                }

                result = self.transport.recv() => {
                    match result {
                        Ok(Some(frame)) => {
                            match self.process_frame(frame, &ctx, last_ping, &mut ping_deadline).await {
                                Ok(Some(reason)) => break reason,
                                Ok(None) => {}
                                Err(error) => {
                                    // Malformed frames are dropped; decoding
                                    // continues with the next one.
                                    warn!(%error, "Dropped malformed frame");
                                    ctx.dispatcher.dispatch(Event::new(
                                        lifecycle::ERROR,
                                        vec![Value::from(error.to_string())],
                                    ));
                                }
                            }
                        }
                        Ok(None) => break DisconnectReason::TransportClose,
                        Err(error) => {
                            warn!(%error, "Transport receive failed");
                            break DisconnectReason::TransportError;
                        }
                    }
                }
            }
        };

        self.teardown(&ctx, reason).await;
        reason
    }

    async fn process_frame(
        &mut self,
        frame: TransportFrame,
        ctx: &SessionContext,
        last_ping: Instant,
        ping_deadline: &mut Option<TokioInstant>,
    ) -> Result<Option<DisconnectReason>, ClientError> {
        let unit = frame_to_unit(frame, self.transport.kind(), self.version)?;
        let Some(incoming) = self.decoder.decode_unit(unit)? else {
            return Ok(None);
        };

        match incoming {
            Incoming::Engine(EnginePacket::Pong(_)) => {
                let rtt = last_ping.elapsed();
                trace!(rtt_ms = rtt.as_millis() as u64, "Pong received");
                *ctx.latency.lock().unwrap() = Some(rtt);
                *ping_deadline = None;
                Ok(None)
            }
            Incoming::Engine(EnginePacket::Ping(payload)) => {
                // v4 servers drive their own pings; answer them.
                self.send_engine(&EnginePacket::Pong(payload)).await?;
                Ok(None)
            }
            Incoming::Engine(EnginePacket::Close) => Ok(Some(DisconnectReason::TransportClose)),
            Incoming::Engine(_) => Ok(None),
            Incoming::Socket(packet) => self.handle_packet(packet, ctx),
        }
    }

    fn handle_packet(
        &self,
        packet: Packet,
        ctx: &SessionContext,
    ) -> Result<Option<DisconnectReason>, ClientError> {
        if !nsp_matches(&packet.nsp, &self.nsp) {
            debug!(nsp = %packet.nsp, "Dropping packet for foreign namespace");
            return Ok(None);
        }

        match packet.kind {
            PacketKind::Event | PacketKind::BinaryEvent => {
                let (name, args) = packet.event_args()?;
                trace!(event = %name, args = args.len(), "Event received");
                ctx.dispatcher.dispatch(Event::new(name, args));
                Ok(None)
            }
            PacketKind::Ack | PacketKind::BinaryAck => {
                let Some(id) = packet.id else {
                    return Err(ProtocolError::MalformedHeader(
                        "ack packet without correlation id".into(),
                    )
                    .into());
                };
                let args = packet.ack_args()?;
                ctx.acks.resolve(id, args);
                Ok(None)
            }
            PacketKind::Disconnect => Ok(Some(DisconnectReason::ServerDisconnect)),
            PacketKind::ConnectError => {
                warn!("ConnectError received while connected");
                ctx.dispatcher.dispatch(Event::new(
                    lifecycle::ERROR,
                    vec![Value::from("connect error")],
                ));
                Ok(None)
            }
            PacketKind::Connect => Ok(None),
        }
    }

    async fn send_engine(&mut self, packet: &EnginePacket) -> Result<(), ClientError> {
        let text = packet.encode()?;
        self.transport.send(TransportFrame::Text(text)).await?;
        Ok(())
    }

    async fn send_packet(&mut self, packet: &Packet) -> Result<(), ClientError> {
        let (text, attachments) = encode_socket(packet)?;
        self.transport.send(TransportFrame::Text(text)).await?;

        for data in attachments {
            let framed = if self.transport.kind() == TransportKind::Websocket {
                tether_protocol::payload::encode_ws_binary(data, self.version)
            } else {
                data
            };
            self.transport.send(TransportFrame::Binary(framed)).await?;
        }
        Ok(())
    }

    async fn teardown(&mut self, ctx: &SessionContext, reason: DisconnectReason) {
        *ctx.state.lock().unwrap() = SessionState::Disconnecting;
        info!(reason = %reason, "Session disconnecting");

        let _ = self.transport.disconnect().await;
        self.decoder.reset();
        ctx.acks.clear();
        *ctx.latency.lock().unwrap() = None;

        *ctx.state.lock().unwrap() = SessionState::Closed;
        ctx.dispatcher.dispatch(Event::new(
            lifecycle::DISCONNECT,
            vec![Value::from(reason.as_str())],
        ));
    }
}

/// Await the Engine.IO Open packet on a fresh transport.
async fn recv_open(
    transport: &mut dyn Transport,
    decoder: &mut Decoder,
    version: EngineIoVersion,
) -> Result<Handshake, ClientError> {
    loop {
        let frame = transport
            .recv()
            .await?
            .ok_or(TransportError::ConnectionClosed)?;
        let unit = frame_to_unit(frame, transport.kind(), version)?;
        match decoder.decode_unit(unit)? {
            Some(Incoming::Engine(EnginePacket::Open(handshake))) => return Ok(handshake),
            Some(other) => debug!(packet = ?other, "Ignoring packet before Open"),
            None => {}
        }
    }
}

/// Probe the websocket transport for an upgrade and commit it.
///
/// The probe exchange is text-only in both generations, so no binary
/// marking is involved.
async fn probe_upgrade(
    factory: &dyn TransportFactory,
    url: &ConnectionUrl,
    sid: &str,
) -> Result<Box<dyn Transport>, ClientError> {
    let mut upgraded = factory
        .open(TransportKind::Websocket, url, Some(sid))
        .await?;
    upgraded.connect().await?;

    upgraded
        .send(TransportFrame::Text(
            EnginePacket::Ping(Some("probe".to_string())).encode()?,
        ))
        .await?;

    loop {
        let frame = upgraded
            .recv()
            .await?
            .ok_or(TransportError::ConnectionClosed)?;
        if let TransportFrame::Text(text) = frame {
            match EnginePacket::parse(&text)? {
                EnginePacket::Pong(Some(payload)) if payload == "probe" => break,
                other => debug!(packet = ?other, "Ignoring packet during probe"),
            }
        }
    }

    upgraded
        .send(TransportFrame::Text(EnginePacket::Upgrade.encode()?))
        .await?;
    Ok(upgraded)
}

/// Convert a transport frame into a decoder unit, stripping the websocket
/// binary marking of the session's generation.
fn frame_to_unit(
    frame: TransportFrame,
    kind: TransportKind,
    version: EngineIoVersion,
) -> Result<RawUnit, ProtocolError> {
    Ok(match frame {
        TransportFrame::Text(text) => RawUnit::Text(text),
        TransportFrame::Binary(data) => RawUnit::Binary(match kind {
            TransportKind::Websocket => {
                tether_protocol::payload::decode_ws_binary(data, version)?
            }
            TransportKind::Polling => data,
        }),
    })
}

/// Compare namespace tokens by path, ignoring a v3 query suffix.
fn nsp_matches(a: &str, b: &str) -> bool {
    let path = |s: &str| s.split('?').next().unwrap_or(s).to_string();
    path(a) == path(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reason_strings() {
        assert_eq!(
            DisconnectReason::ServerDisconnect.as_str(),
            "io server disconnect"
        );
        assert_eq!(
            DisconnectReason::ClientDisconnect.as_str(),
            "io client disconnect"
        );
        assert_eq!(DisconnectReason::PingTimeout.as_str(), "ping timeout");
        assert_eq!(DisconnectReason::TransportClose.as_str(), "transport close");
        assert_eq!(DisconnectReason::TransportError.as_str(), "transport error");
    }

    #[test]
    fn test_explicit_reasons_skip_reconnection() {
        assert!(DisconnectReason::ServerDisconnect.is_explicit());
        assert!(DisconnectReason::ClientDisconnect.is_explicit());
        assert!(!DisconnectReason::PingTimeout.is_explicit());
        assert!(!DisconnectReason::TransportClose.is_explicit());
        assert!(!DisconnectReason::TransportError.is_explicit());
    }

    #[test]
    fn test_nsp_matching_ignores_v3_query() {
        assert!(nsp_matches("/test?token=eio3", "/test"));
        assert!(nsp_matches("/test", "/test?token=eio3"));
        assert!(!nsp_matches("/test", "/other"));
        assert!(nsp_matches("/", "/"));
    }
}
