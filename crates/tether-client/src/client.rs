//! Client facade and builder.
//!
//! [`Client`] is a cheap clonable handle over the shared connection state.
//! Connect and disconnect are serialized through a single async gate, so
//! concurrent callers cannot interleave a teardown with a handshake. The
//! session itself runs on a spawned task; the facade talks to it through a
//! bounded outbound queue and a cancellation token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_protocol::{EngineIoVersion, Packet, Value};
use tether_transport::{TransportFactory, TransportKind, WebSocketFactory};

use crate::ack::AckRegistry;
use crate::backoff::supervise;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::handler::{lifecycle, Dispatcher, Event, HandlerRegistry};
use crate::session::{Session, SessionContext, SessionState, SharedState};

/// Handle to the live session task.
struct ConnHandle {
    outbound: mpsc::Sender<Packet>,
    cancel: CancellationToken,
    sid: String,
    task: JoinHandle<()>,
}

struct Inner {
    config: ClientConfig,
    factory: Arc<dyn TransportFactory>,
    registry: Arc<HandlerRegistry>,
    dispatcher: Dispatcher,
    acks: Arc<AckRegistry>,
    state: SharedState,
    latency: Arc<Mutex<Option<Duration>>>,
    /// Serializes connect/disconnect/reconnect.
    gate: tokio::sync::Mutex<()>,
    conn: Mutex<Option<ConnHandle>>,
    /// Token of the supervisor currently retrying, connect and reconnect
    /// alike, so `disconnect` can abort the backoff wait.
    supervisor_cancel: Mutex<Option<CancellationToken>>,
    /// Set by `disconnect` so a reconnection scheduled but not yet started
    /// stands down instead of reviving the session.
    shutdown: AtomicBool,
}

/// A Socket.IO-style client handle.
///
/// Clones share one underlying connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.current_state()
    }

    /// Whether a session is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// The server-assigned socket id, when connected.
    #[must_use]
    pub fn sid(&self) -> Option<String> {
        self.inner
            .conn
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| h.sid.clone())
    }

    /// Last measured ping round-trip time, when available.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        *self.inner.latency.lock().unwrap()
    }

    /// Register a handler for a named event. Takes effect immediately, even
    /// while connected.
    pub fn on(&self, event: impl Into<String>, handler: impl Fn(Event) + Send + Sync + 'static) {
        self.inner.registry.on(event, Arc::new(handler));
    }

    /// Register a catch-all handler invoked for every dispatched event.
    pub fn on_any(&self, handler: impl Fn(Event) + Send + Sync + 'static) {
        self.inner.registry.on_any(Arc::new(handler));
    }

    /// Connect, retrying per the reconnection policy.
    ///
    /// Resolves once the namespace is joined. A no-op when already
    /// connected.
    ///
    /// # Errors
    ///
    /// [`ClientError::ConnectionFailed`] once the attempt budget is spent,
    /// or [`ClientError::Authentication`] when the server refuses the
    /// namespace.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        let _gate = inner.gate.lock().await;
        if inner.current_state() == SessionState::Connected {
            return Ok(());
        }

        inner.shutdown.store(false, Ordering::SeqCst);
        inner.set_state(SessionState::Handshaking);
        let cancel = CancellationToken::new();
        *inner.supervisor_cancel.lock().unwrap() = Some(cancel.clone());
        let result = supervise(
            inner.config.backoff_policy(),
            &cancel,
            || Session::establish(&inner.config, inner.factory.as_ref()),
            |attempt, error| {
                debug!(attempt, %error, "Connection attempt failed");
                inner.dispatcher.dispatch(Event::new(
                    lifecycle::RECONNECT_ATTEMPT,
                    vec![
                        Value::from(attempt as u64),
                        Value::from(error.to_string()),
                    ],
                ));
            },
        )
        .await;

        inner.supervisor_cancel.lock().unwrap().take();
        let session = result.map_err(|error| {
            inner.set_state(SessionState::Closed);
            error
        })?;

        inner.spawn_session(session, cancel);
        Ok(())
    }

    /// Disconnect the current session, sending the Disconnect packet and
    /// releasing the transport. Also aborts an in-flight connect or
    /// reconnect, including its backoff wait. A no-op when idle.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.shutdown.store(true, Ordering::SeqCst);
        // Abort a supervisor in progress first so the gate frees up.
        if let Some(token) = inner.supervisor_cancel.lock().unwrap().take() {
            token.cancel();
        }

        let _gate = inner.gate.lock().await;
        let handle = inner.conn.lock().unwrap().take();
        let Some(handle) = handle else {
            return;
        };

        handle.cancel.cancel();
        let _ = handle.task.await;
    }

    /// Emit an event without acknowledgement.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] when no session is live.
    pub async fn emit(
        &self,
        event: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<(), ClientError> {
        let outbound = self.inner.outbound()?;
        let packet = Packet::event(self.inner.config.wire_namespace(), event, args, None);
        outbound
            .send(packet)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Emit an event and await the server's acknowledgement arguments.
    ///
    /// # Errors
    ///
    /// [`ClientError::AckTimeout`] when no acknowledgement arrives within
    /// `timeout`; the pending entry is discarded so a late reply is a
    /// no-op. [`ClientError::NotConnected`] when the session ends first.
    pub async fn emit_with_ack(
        &self,
        event: impl Into<String>,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Vec<Value>, ClientError> {
        let outbound = self.inner.outbound()?;
        let (id, rx) = self.inner.acks.register();
        let packet = Packet::event(self.inner.config.wire_namespace(), event, args, Some(id));

        if outbound.send(packet).await.is_err() {
            self.inner.acks.discard(id);
            return Err(ClientError::NotConnected);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // The registry was cleared by session teardown.
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => {
                self.inner.acks.discard(id);
                Err(ClientError::AckTimeout)
            }
        }
    }
}

impl Inner {
    fn current_state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    fn outbound(&self) -> Result<mpsc::Sender<Packet>, ClientError> {
        self.conn
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| h.outbound.clone())
            .ok_or(ClientError::NotConnected)
    }

    /// Move an established session onto its own task and publish the handle.
    fn spawn_session(self: &Arc<Self>, session: Session, cancel: CancellationToken) {
        let (tx, rx) = mpsc::channel(64);
        let ctx = SessionContext {
            acks: Arc::clone(&self.acks),
            dispatcher: self.dispatcher.clone(),
            state: Arc::clone(&self.state),
            latency: Arc::clone(&self.latency),
        };

        let sid = session.sid().to_string();
        self.set_state(SessionState::Connected);

        let inner = Arc::clone(self);
        let session_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let reason = session.run(ctx, rx, session_cancel).await;
            inner.on_session_end(reason.is_explicit());
        });

        *self.conn.lock().unwrap() = Some(ConnHandle {
            outbound: tx,
            cancel,
            sid,
            task,
        });
        self.dispatcher
            .dispatch(Event::new(lifecycle::CONNECT, vec![]));
    }

    /// Runs on the session task after teardown completed.
    fn on_session_end(self: &Arc<Self>, explicit: bool) {
        self.conn.lock().unwrap().take();

        if !explicit && self.config.reconnection {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                inner.reconnect().await;
            });
        }
    }

    /// Background reconnection after an unexpected session end.
    async fn reconnect(self: Arc<Self>) {
        let _gate = self.gate.lock().await;
        if self.current_state() == SessionState::Connected || self.shutdown.load(Ordering::SeqCst)
        {
            return;
        }

        info!("Reconnecting");
        self.set_state(SessionState::Handshaking);
        let cancel = CancellationToken::new();
        *self.supervisor_cancel.lock().unwrap() = Some(cancel.clone());

        let result = supervise(
            self.config.backoff_policy(),
            &cancel,
            || Session::establish(&self.config, self.factory.as_ref()),
            |attempt, error| {
                debug!(attempt, %error, "Reconnection attempt failed");
                self.dispatcher.dispatch(Event::new(
                    lifecycle::RECONNECT_ATTEMPT,
                    vec![
                        Value::from(attempt as u64),
                        Value::from(error.to_string()),
                    ],
                ));
            },
        )
        .await;

        self.supervisor_cancel.lock().unwrap().take();
        match result {
            Ok(session) => self.spawn_session(session, cancel),
            Err(ClientError::Cancelled) => {
                debug!("Reconnection cancelled");
                self.set_state(SessionState::Closed);
            }
            Err(error) => {
                warn!(%error, "Reconnection abandoned");
                self.set_state(SessionState::Closed);
                self.dispatcher.dispatch(Event::new(
                    lifecycle::ERROR,
                    vec![Value::from(error.to_string())],
                ));
            }
        }
    }
}

/// Builder for [`Client`].
///
/// Must be built inside a tokio runtime; the event dispatch task is spawned
/// at build time.
pub struct ClientBuilder {
    config: ClientConfig,
    registry: Arc<HandlerRegistry>,
    factory: Option<Arc<dyn TransportFactory>>,
}

impl ClientBuilder {
    /// Start a builder for the given server URL, e.g.
    /// `http://localhost:4200`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            config: ClientConfig::new(url),
            registry: Arc::new(HandlerRegistry::new()),
            factory: None,
        }
    }

    /// Namespace to join, defaults to `/`.
    #[must_use]
    pub fn namespace(mut self, nsp: impl Into<String>) -> Self {
        self.config.namespace = nsp.into();
        self
    }

    /// Wire generation to speak, defaults to [`EngineIoVersion::V4`].
    #[must_use]
    pub fn version(mut self, version: EngineIoVersion) -> Self {
        self.config.version = version;
        self
    }

    /// Auth payload sent with the namespace Connect packet (v4 only).
    #[must_use]
    pub fn auth(mut self, auth: serde_json::Value) -> Self {
        self.config.auth = Some(auth);
        self
    }

    /// Deadline for one full connection attempt.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Enable or disable automatic reconnection.
    #[must_use]
    pub fn reconnection(mut self, enabled: bool) -> Self {
        self.config.reconnection = enabled;
        self
    }

    /// Attempt budget before a connect cycle fails permanently.
    #[must_use]
    pub fn reconnection_attempts(mut self, attempts: usize) -> Self {
        self.config.reconnection_attempts = attempts;
        self
    }

    /// Base delay between reconnection attempts.
    #[must_use]
    pub fn reconnection_delay(mut self, delay: Duration) -> Self {
        self.config.reconnection_delay = delay;
        self
    }

    /// Clamp for the growing reconnection delay.
    #[must_use]
    pub fn reconnection_delay_max(mut self, delay: Duration) -> Self {
        self.config.reconnection_delay_max = delay;
        self
    }

    /// Jitter bound in `[0, 1]` for the backoff schedule.
    #[must_use]
    pub fn randomization_factor(mut self, factor: f64) -> Self {
        self.config.randomization_factor = factor;
        self
    }

    /// Allow upgrading from polling to websocket mid-handshake.
    #[must_use]
    pub fn auto_upgrade(mut self, enabled: bool) -> Self {
        self.config.auto_upgrade = enabled;
        self
    }

    /// Add a query parameter carried on every transport URL.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.query.push((key.into(), value.into()));
        self
    }

    /// Pin the transport kind instead of auto-selecting.
    #[must_use]
    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.config.transport = Some(kind);
        self
    }

    /// Replace the transport factory, e.g. to add a polling transport or a
    /// test double.
    #[must_use]
    pub fn factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Register a handler for a named event.
    #[must_use]
    pub fn on(self, event: impl Into<String>, handler: impl Fn(Event) + Send + Sync + 'static) -> Self {
        self.registry.on(event, Arc::new(handler));
        self
    }

    /// Register a catch-all handler.
    #[must_use]
    pub fn on_any(self, handler: impl Fn(Event) + Send + Sync + 'static) -> Self {
        self.registry.on_any(Arc::new(handler));
        self
    }

    /// Build the client without connecting.
    #[must_use]
    pub fn build(self) -> Client {
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(WebSocketFactory));
        let dispatcher = Dispatcher::spawn(Arc::clone(&self.registry));

        Client {
            inner: Arc::new(Inner {
                config: self.config,
                factory,
                registry: self.registry,
                dispatcher,
                acks: Arc::new(AckRegistry::new()),
                state: Arc::new(Mutex::new(SessionState::Idle)),
                latency: Arc::new(Mutex::new(None)),
                gate: tokio::sync::Mutex::new(()),
                conn: Mutex::new(None),
                supervisor_cancel: Mutex::new(None),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Build and connect in one step.
    ///
    /// # Errors
    ///
    /// Propagates [`Client::connect`] errors.
    pub async fn connect(self) -> Result<Client, ClientError> {
        let client = self.build();
        client.connect().await?;
        Ok(client)
    }
}
