//! tws core - schema-described RPC over HTTP and duplex channels.
//!
//! Two communication modes are provided:
//!
//! - **Unary**: stateless `POST {operation, input}` requests, see [`UnaryClient`].
//! - **Duplex**: either peer calls a named operation over a persistent channel
//!   and the other side answers it, see [`ProtocolEngine`].
//!
//! The duplex engine is transport-agnostic. A transport binds a
//! [`ChannelSender`] for outbound envelopes and feeds inbound envelopes to
//! [`ProtocolEngine::process_inbound`]; [`Connection`] does both for any tokio
//! byte stream.
//!
//! # Example
//!
//! ```rust,ignore
//! use tws_core::{Connection, ProtocolEngine};
//!
//! let engine = ProtocolEngine::new();
//! engine.on("productCreated", |product: serde_json::Value| async move {
//!     anyhow::Ok(serde_json::json!({"message": "received"}))
//! });
//!
//! let _conn = Connection::connect(engine.clone(), "127.0.0.1:3001".parse()?).await?;
//! let reply: serde_json::Value = engine
//!     .send("authenticate", &serde_json::json!({"token": "12345"}))
//!     .await?;
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod listener;
pub mod logger;
pub mod unary;

pub use channel::{ChannelBinding, ChannelSender, FnSender};
pub use client::{TwsClient, TwsClientBuilder};
pub use config::{EngineOptions, NetworkConfig, ProtocolConfig, TransportConfig};
pub use connection::{Connection, ConnectionHandle};
pub use correlation::{CorrelationTable, PendingResponse};
pub use engine::{DropReason, InboundOutcome, ProtocolEngine};
pub use envelope::{Envelope, EnvelopeKind};
pub use error::{ParseError, Result, TwsError};
pub use listener::{typed, Listener, ListenerRegistry};
pub use logger::{Logger, PrefixedLogger, SharedLogger, TracingLogger};
pub use unary::{UnaryClient, UnaryRequest, UnaryResponse};
