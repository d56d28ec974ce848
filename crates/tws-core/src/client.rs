//! Client facade: unary operations plus a duplex protocol engine.

use crate::channel::ChannelSender;
use crate::config::{EngineOptions, NetworkConfig, ProtocolConfig};
use crate::engine::{InboundOutcome, ProtocolEngine};
use crate::error::Result;
use crate::listener::Listener;
use crate::logger::{default_logger, SharedLogger};
use crate::unary::UnaryClient;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Builder for configuring a [`TwsClient`].
///
/// # Example
///
/// ```rust,ignore
/// use tws_core::TwsClient;
///
/// let client = TwsClient::builder("http://localhost:3000/tws")
///     .header("authorization", "Bearer 12345")
///     .call_timeout(Duration::from_secs(5))
///     .build()?;
/// ```
pub struct TwsClientBuilder {
    url: String,
    headers: HashMap<String, String>,
    logger: Option<SharedLogger>,
    call_timeout: Duration,
    request_timeout: Duration,
}

impl TwsClientBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            logger: None,
            call_timeout: ProtocolConfig::DEFAULT_CALL_TIMEOUT,
            request_timeout: NetworkConfig::REQUEST_TIMEOUT,
        }
    }

    /// Add a header sent with every unary request.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Diagnostic sink shared by the unary client and the engine.
    ///
    /// Default: [`TracingLogger`](crate::TracingLogger)
    pub fn logger(mut self, logger: SharedLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Default wait for duplex call responses.
    ///
    /// Default: 10 seconds
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Timeout for unary HTTP requests.
    ///
    /// Default: 15 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<TwsClient> {
        let logger = self.logger.unwrap_or_else(default_logger);
        let unary = UnaryClient::new(self.url, self.headers, logger.clone(), self.request_timeout)?;
        let engine = ProtocolEngine::with_logger(logger)
            .with_options(EngineOptions::default().with_call_timeout(self.call_timeout));

        Ok(TwsClient { unary, engine })
    }
}

/// A tws client: unary operations over HTTP and events over a duplex channel.
pub struct TwsClient {
    unary: UnaryClient,
    engine: ProtocolEngine,
}

impl TwsClient {
    pub fn builder(url: impl Into<String>) -> TwsClientBuilder {
        TwsClientBuilder::new(url)
    }

    /// Create a client with default headers and logger.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::builder(url).build()
    }

    pub fn url(&self) -> &str {
        self.unary.url()
    }

    /// The duplex engine, for attaching transports.
    pub fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    /// Execute a unary operation.
    pub async fn execute<I, O>(&self, operation: &str, input: &I) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        self.unary.execute(operation, input).await
    }

    /// Call a client event on the server over the duplex channel.
    pub async fn send<I, O>(&self, event: &str, input: &I) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        self.engine.send(event, input).await
    }

    /// Listen for a server event.
    pub fn on(&self, event: impl Into<String>, listener: impl Listener) {
        self.engine.on(event, listener);
    }

    /// Bind the function that carries raw envelopes to the server.
    pub fn set_server_event_sender(&self, sender: impl ChannelSender) {
        self.engine.set_channel(sender);
    }

    /// Feed one raw message received from the server.
    pub async fn process_event_from_server(&self, raw: impl AsRef<[u8]>) -> InboundOutcome {
        self.engine.process_inbound(raw).await
    }
}
