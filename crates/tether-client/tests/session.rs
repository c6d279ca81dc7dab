//! End-to-end client tests against a scripted in-memory transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use tether_client::{
    ClientBuilder, ClientError, SessionState, Transport, TransportError, TransportFactory,
    TransportFrame, TransportKind, Value,
};
use tether_transport::ConnectionUrl;

const HANDSHAKE: &str =
    "0{\"sid\":\"s1\",\"upgrades\":[],\"pingInterval\":25000,\"pingTimeout\":5000}";

/// `RUST_LOG=tether_client=trace cargo test` for session traces.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory transport backed by a pair of unbounded channels.
struct MockTransport {
    kind: TransportKind,
    rx: mpsc::UnboundedReceiver<TransportFrame>,
    tx: mpsc::UnboundedSender<TransportFrame>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&mut self, frame: TransportFrame) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&mut self) -> Result<Option<TransportFrame>, TransportError> {
        Ok(self.rx.recv().await)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.rx.close();
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }
}

/// The server half of one opened mock transport.
struct ServerEnd {
    kind: TransportKind,
    sid: Option<String>,
    tx: mpsc::UnboundedSender<TransportFrame>,
    rx: mpsc::UnboundedReceiver<TransportFrame>,
}

impl ServerEnd {
    fn send_text(&self, text: &str) {
        self.tx
            .send(TransportFrame::Text(text.to_string()))
            .unwrap();
    }

    async fn recv_text(&mut self) -> String {
        loop {
            match self.rx.recv().await.expect("client hung up") {
                TransportFrame::Text(text) => return text,
                TransportFrame::Binary(_) => continue,
            }
        }
    }

    async fn recv_frame(&mut self) -> TransportFrame {
        self.rx.recv().await.expect("client hung up")
    }

    /// Serve the Engine.IO handshake and the namespace join for `/`.
    async fn serve_handshake(&mut self) {
        self.send_text(HANDSHAKE);
        loop {
            let text = self.recv_text().await;
            if text.starts_with("40") {
                break;
            }
        }
        self.send_text("40{\"sid\":\"conn-1\"}");
    }
}

/// Factory that hands each opened transport's server half to the test.
struct MockFactory {
    kinds: Vec<TransportKind>,
    endpoints: mpsc::UnboundedSender<ServerEnd>,
}

impl MockFactory {
    fn new(kinds: Vec<TransportKind>) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                kinds,
                endpoints: tx,
            }),
            rx,
        )
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    fn supports(&self, kind: TransportKind) -> bool {
        self.kinds.contains(&kind)
    }

    async fn open(
        &self,
        kind: TransportKind,
        _url: &ConnectionUrl,
        sid: Option<&str>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();
        self.endpoints
            .send(ServerEnd {
                kind,
                sid: sid.map(str::to_string),
                tx: to_client_tx,
                rx: from_client_rx,
            })
            .map_err(|_| TransportError::Other("test harness gone".to_string()))?;
        Ok(Box::new(MockTransport {
            kind,
            rx: to_client_rx,
            tx: from_client_tx,
        }))
    }
}

/// Factory whose opens always fail.
struct FailingFactory;

#[async_trait]
impl TransportFactory for FailingFactory {
    fn supports(&self, kind: TransportKind) -> bool {
        kind == TransportKind::Websocket
    }

    async fn open(
        &self,
        _kind: TransportKind,
        _url: &ConnectionUrl,
        _sid: Option<&str>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        Err(TransportError::Other("connection refused".to_string()))
    }
}

async fn next_server_end(endpoints: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    tokio::time::timeout(Duration::from_secs(5), endpoints.recv())
        .await
        .expect("no transport opened")
        .expect("factory dropped")
}

/// Poll a predicate until it holds or the deadline passes.
async fn wait_for(mut predicate: impl FnMut() -> bool) {
    for _ in 0..500 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_connect_and_emit() {
    init_tracing();
    let (factory, mut endpoints) = MockFactory::new(vec![TransportKind::Websocket]);
    let client = ClientBuilder::new("http://localhost:4200")
        .reconnection(false)
        .factory(factory)
        .build();

    let server = tokio::spawn(async move {
        let mut end = next_server_end(&mut endpoints).await;
        assert_eq!(end.kind, TransportKind::Websocket);
        end.serve_handshake().await;
        let frame = end.recv_text().await;
        assert_eq!(frame, "42[\"message\",\"hello\"]");
        end
    });

    client.connect().await.unwrap();
    assert_eq!(client.state(), SessionState::Connected);
    assert_eq!(client.sid().as_deref(), Some("conn-1"));

    client
        .emit("message", vec![Value::from("hello")])
        .await
        .unwrap();

    server.await.unwrap();
    client.disconnect().await;
}

#[tokio::test]
async fn test_emit_with_ack_resolves() {
    init_tracing();
    let (factory, mut endpoints) = MockFactory::new(vec![TransportKind::Websocket]);
    let client = ClientBuilder::new("http://localhost:4200")
        .reconnection(false)
        .factory(factory)
        .build();

    tokio::spawn(async move {
        let mut end = next_server_end(&mut endpoints).await;
        end.serve_handshake().await;
        let frame = end.recv_text().await;
        assert_eq!(frame, "420[\"sum\",1,2]");
        end.send_text("430[3]");
        // Keep the channel open until the client is done.
        let _ = end.recv_frame().await;
    });

    client.connect().await.unwrap();
    let reply = client
        .emit_with_ack(
            "sum",
            vec![Value::from(1_i64), Value::from(2_i64)],
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(reply, vec![Value::from(3_i64)]);

    client.disconnect().await;
}

#[tokio::test]
async fn test_ack_timeout_discards_pending() {
    init_tracing();
    let (factory, mut endpoints) = MockFactory::new(vec![TransportKind::Websocket]);
    let client = ClientBuilder::new("http://localhost:4200")
        .reconnection(false)
        .factory(factory)
        .build();

    tokio::spawn(async move {
        let mut end = next_server_end(&mut endpoints).await;
        end.serve_handshake().await;
        // Swallow the event; never acknowledge.
        let _ = end.recv_frame().await;
        let _ = end.recv_frame().await;
    });

    client.connect().await.unwrap();
    let err = client
        .emit_with_ack("ping", vec![], Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::AckTimeout));

    client.disconnect().await;
}

#[tokio::test]
async fn test_server_disconnect_reason() {
    init_tracing();
    let (factory, mut endpoints) = MockFactory::new(vec![TransportKind::Websocket]);
    let reasons: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&reasons);

    let client = ClientBuilder::new("http://localhost:4200")
        .reconnection(false)
        .factory(factory)
        .on("disconnect", move |event| {
            if let Some(reason) = event.args.first().and_then(Value::as_str) {
                seen.lock().unwrap().push(reason.to_string());
            }
        })
        .build();

    tokio::spawn(async move {
        let mut end = next_server_end(&mut endpoints).await;
        end.serve_handshake().await;
        end.send_text("41");
    });

    client.connect().await.unwrap();
    wait_for(|| !reasons.lock().unwrap().is_empty()).await;
    assert_eq!(reasons.lock().unwrap()[0], "io server disconnect");
    assert_eq!(client.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_client_disconnect_reason_and_packet() {
    init_tracing();
    let (factory, mut endpoints) = MockFactory::new(vec![TransportKind::Websocket]);
    let reasons: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&reasons);

    let client = ClientBuilder::new("http://localhost:4200")
        .reconnection(false)
        .factory(factory)
        .on("disconnect", move |event| {
            if let Some(reason) = event.args.first().and_then(Value::as_str) {
                seen.lock().unwrap().push(reason.to_string());
            }
        })
        .build();

    let server = tokio::spawn(async move {
        let mut end = next_server_end(&mut endpoints).await;
        end.serve_handshake().await;
        let frame = end.recv_text().await;
        assert_eq!(frame, "41");
    });

    client.connect().await.unwrap();
    client.disconnect().await;
    assert_eq!(client.state(), SessionState::Closed);

    server.await.unwrap();
    wait_for(|| !reasons.lock().unwrap().is_empty()).await;
    assert_eq!(reasons.lock().unwrap()[0], "io client disconnect");

    // A second disconnect is a no-op.
    client.disconnect().await;
}

#[tokio::test]
async fn test_binary_event_reaches_handlers() {
    init_tracing();
    let (factory, mut endpoints) = MockFactory::new(vec![TransportKind::Websocket]);
    let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    let client = ClientBuilder::new("http://localhost:4200")
        .reconnection(false)
        .factory(factory)
        .on("blob", move |event| {
            sink.lock().unwrap().extend(event.args);
        })
        .build();

    tokio::spawn(async move {
        let mut end = next_server_end(&mut endpoints).await;
        end.serve_handshake().await;
        end.send_text("451-[\"blob\",{\"_placeholder\":true,\"num\":0}]");
        end.tx
            .send(TransportFrame::Binary(bytes::Bytes::from_static(&[
                1, 2, 3,
            ])))
            .unwrap();
        let _ = end.recv_frame().await;
    });

    client.connect().await.unwrap();
    wait_for(|| !received.lock().unwrap().is_empty()).await;
    assert_eq!(
        received.lock().unwrap()[0],
        Value::Binary(bytes::Bytes::from_static(&[1, 2, 3]))
    );

    client.disconnect().await;
}

#[tokio::test]
async fn test_connect_failure_counts_attempts() {
    init_tracing();
    let attempts: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&attempts);

    let client = ClientBuilder::new("http://localhost:4200")
        .reconnection_attempts(3)
        .reconnection_delay(Duration::from_millis(1))
        .reconnection_delay_max(Duration::from_millis(5))
        .factory(Arc::new(FailingFactory))
        .on("reconnect_attempt", move |_| {
            *counter.lock().unwrap() += 1;
        })
        .build();

    let err = client.connect().await.unwrap_err();
    match err {
        ClientError::ConnectionFailed { attempts: n, .. } => assert_eq!(n, 3),
        other => panic!("expected ConnectionFailed, got {other}"),
    }
    assert_eq!(client.state(), SessionState::Closed);

    wait_for(|| *attempts.lock().unwrap() == 3).await;
}

#[tokio::test(start_paused = true)]
async fn test_missed_pong_ends_session_with_ping_timeout() {
    init_tracing();
    let (factory, mut endpoints) = MockFactory::new(vec![TransportKind::Websocket]);
    let reasons: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&reasons);

    let client = ClientBuilder::new("http://localhost:4200")
        .reconnection(false)
        .factory(factory)
        .on("disconnect", move |event| {
            if let Some(reason) = event.args.first().and_then(Value::as_str) {
                seen.lock().unwrap().push(reason.to_string());
            }
        })
        .build();

    tokio::spawn(async move {
        let mut end = next_server_end(&mut endpoints).await;
        end.send_text("0{\"sid\":\"s1\",\"upgrades\":[],\"pingInterval\":50,\"pingTimeout\":100}");
        loop {
            let text = end.recv_text().await;
            if text.starts_with("40") {
                break;
            }
        }
        end.send_text("40{\"sid\":\"conn-1\"}");
        // Drain pings without ever answering.
        while end.rx.recv().await.is_some() {}
    });

    client.connect().await.unwrap();
    wait_for(|| !reasons.lock().unwrap().is_empty()).await;
    assert_eq!(reasons.lock().unwrap()[0], "ping timeout");
    assert_eq!(client.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_polling_upgrade_to_websocket() {
    init_tracing();
    let (factory, mut endpoints) =
        MockFactory::new(vec![TransportKind::Polling, TransportKind::Websocket]);
    let client = ClientBuilder::new("http://localhost:4200")
        .reconnection(false)
        .factory(factory)
        .build();

    let server = tokio::spawn(async move {
        // First open: polling, handshake advertising the upgrade.
        let polling = next_server_end(&mut endpoints).await;
        assert_eq!(polling.kind, TransportKind::Polling);
        assert_eq!(polling.sid, None);
        polling.send_text(
            "0{\"sid\":\"s1\",\"upgrades\":[\"websocket\"],\"pingInterval\":25000,\"pingTimeout\":5000}",
        );

        // Second open: the websocket probe, rejoining with the session id.
        let mut ws = next_server_end(&mut endpoints).await;
        assert_eq!(ws.kind, TransportKind::Websocket);
        assert_eq!(ws.sid.as_deref(), Some("s1"));
        assert_eq!(ws.recv_text().await, "2probe");
        ws.send_text("3probe");
        assert_eq!(ws.recv_text().await, "5");

        // Namespace join continues on the upgraded transport.
        loop {
            let text = ws.recv_text().await;
            if text.starts_with("40") {
                break;
            }
        }
        ws.send_text("40{\"sid\":\"conn-1\"}");

        assert_eq!(ws.recv_text().await, "42[\"after\",\"upgrade\"]");
    });

    client.connect().await.unwrap();
    assert_eq!(client.state(), SessionState::Connected);
    client
        .emit("after", vec![Value::from("upgrade")])
        .await
        .unwrap();

    server.await.unwrap();
    client.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_aborts_connect_in_progress() {
    init_tracing();
    let client = ClientBuilder::new("http://localhost:4200")
        .reconnection_delay(Duration::from_secs(60))
        .reconnection_delay_max(Duration::from_secs(60))
        .factory(Arc::new(FailingFactory))
        .build();

    let connecting = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    // Let the first attempt fail and the backoff wait begin.
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(2), client.disconnect())
        .await
        .expect("disconnect must not wait out the backoff");

    let err = connecting.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
    assert_eq!(client.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_v3_root_namespace_skips_connect_packet() {
    init_tracing();
    let (factory, mut endpoints) = MockFactory::new(vec![TransportKind::Websocket]);
    let client = ClientBuilder::new("http://localhost:4200")
        .version(tether_client::EngineIoVersion::V3)
        .reconnection(false)
        .factory(factory)
        .build();

    let server = tokio::spawn(async move {
        let mut end = next_server_end(&mut endpoints).await;
        end.send_text(HANDSHAKE);
        // A v2-era server connects the root namespace unprompted.
        end.send_text("40");
        // The first frame from the client must be the emit, not a Connect.
        let frame = end.recv_text().await;
        assert_eq!(frame, "42[\"hi\"]");
    });

    client.connect().await.unwrap();
    client.emit("hi", vec![]).await.unwrap();

    server.await.unwrap();
    client.disconnect().await;
}

#[tokio::test]
async fn test_transport_close_triggers_reconnection() {
    init_tracing();
    let (factory, mut endpoints) = MockFactory::new(vec![TransportKind::Websocket]);
    let connects: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&connects);

    let client = ClientBuilder::new("http://localhost:4200")
        .reconnection(true)
        .reconnection_delay(Duration::from_millis(1))
        .reconnection_delay_max(Duration::from_millis(5))
        .factory(factory)
        .on("connect", move |_| {
            *counter.lock().unwrap() += 1;
        })
        .build();

    tokio::spawn(async move {
        // First session: handshake, then drop the server half.
        let mut end = next_server_end(&mut endpoints).await;
        end.serve_handshake().await;
        drop(end);

        // The supervisor opens a fresh transport.
        let mut end = next_server_end(&mut endpoints).await;
        end.serve_handshake().await;
        // Hold the session open until the client hangs up.
        while end.rx.recv().await.is_some() {}
    });

    client.connect().await.unwrap();
    wait_for(|| *connects.lock().unwrap() >= 2).await;
    assert_eq!(client.state(), SessionState::Connected);

    client.disconnect().await;
}
