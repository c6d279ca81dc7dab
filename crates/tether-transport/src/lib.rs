//! # tether-transport
//!
//! Transport abstraction layer for the tether Socket.IO client.
//!
//! The session drives a single [`Transport`] and is otherwise
//! transport-agnostic. This crate ships the websocket implementation; a
//! polling HTTP transport is an external collaborator that implements the
//! same trait using the polling framing from `tether-protocol`.
//!
//! ```rust,ignore
//! use tether_transport::{Transport, TransportFrame};
//!
//! async fn pump(mut transport: Box<dyn Transport>) {
//!     while let Ok(Some(frame)) = transport.recv().await {
//!         // Feed the frame into the protocol decoder
//!     }
//! }
//! ```

pub mod traits;
pub mod url;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Transport, TransportError, TransportFactory, TransportFrame, TransportKind};
pub use url::ConnectionUrl;

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketFactory, WebSocketTransport};
