//! # tether-client
//!
//! Asynchronous Socket.IO-style client: session lifecycle, event handlers,
//! acknowledgements, and reconnection with additive backoff.
//!
//! ```no_run
//! use std::time::Duration;
//! use tether_client::{ClientBuilder, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new("http://localhost:4200")
//!         .namespace("/chat")
//!         .on("message", |event| {
//!             println!("message: {:?}", event.args);
//!         })
//!         .connect()
//!         .await?;
//!
//!     client.emit("message", vec![Value::from("hello")]).await?;
//!     let reply = client
//!         .emit_with_ack("sum", vec![Value::from(1_i64), Value::from(2_i64)], Duration::from_secs(5))
//!         .await?;
//!     println!("ack: {reply:?}");
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod ack;
pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod session;

pub use ack::AckRegistry;
pub use backoff::{Backoff, BackoffPolicy};
pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use error::ClientError;
pub use handler::{lifecycle, Event, HandlerRegistry};
pub use session::{DisconnectReason, SessionState};

pub use tether_protocol::{EngineIoVersion, Value};
pub use tether_transport::{
    Transport, TransportError, TransportFactory, TransportFrame, TransportKind,
};
