//! Protocol engine: routes inbound envelopes and issues outbound calls.
//!
//! One engine serves one duplex connection. It owns its correlation table,
//! its listener registry and its channel binding; engines never share state.
//!
//! ```text
//! send()            -> register id -> serialize Call -> channel
//! process_inbound() -> parse -> Call     -> listeners -> Response -> channel
//!                            -> Response -> correlation table
//! ```
//!
//! Nothing that arrives from the wire can make `process_inbound` fail or
//! panic: every bad message is reported to the logger and dropped.

use crate::channel::{ChannelBinding, ChannelSender};
use crate::config::EngineOptions;
use crate::correlation::CorrelationTable;
use crate::envelope::{self, Envelope, EnvelopeKind};
use crate::error::{ParseError, Result, TwsError};
use crate::listener::{Listener, ListenerRegistry};
use crate::logger::{default_logger, SharedLogger};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Why an inbound message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    InvalidEnvelope,
    UnknownKind,
    InvalidPayload,
    DispatchFailed,
    TransmitFailed,
}

/// What `process_inbound` did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// A call was handled and its response transmitted.
    Responded { correlation_id: String },
    /// A response settled one of our pending calls.
    Resolved { correlation_id: String },
    /// A response arrived for an id that is no longer pending.
    Unmatched { correlation_id: String },
    /// The message was logged and discarded.
    Dropped(DropReason),
}

/// Duplex call/response engine for one connection.
#[derive(Clone)]
pub struct ProtocolEngine {
    table: CorrelationTable,
    listeners: ListenerRegistry,
    channel: ChannelBinding,
    logger: SharedLogger,
    options: EngineOptions,
}

impl Default for ProtocolEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolEngine {
    /// Create an engine with default options, logging through `tracing`.
    pub fn new() -> Self {
        Self::with_logger(default_logger())
    }

    pub fn with_logger(logger: SharedLogger) -> Self {
        Self {
            table: CorrelationTable::new(),
            listeners: ListenerRegistry::new(),
            channel: ChannelBinding::new(),
            logger,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    // ------------------------------------------------------------------
    // Channel binding
    // ------------------------------------------------------------------

    /// Bind the outbound transport.
    ///
    /// Binding again replaces the previous sender.
    pub fn set_channel(&self, sender: impl ChannelSender) {
        if self.channel.bind(Arc::new(sender)) {
            self.logger.info("Replaced the outbound channel");
        }
    }

    /// Unbind the transport and fail every outstanding call with
    /// `ChannelClosed`. Returns the number of calls failed.
    pub fn close_channel(&self) -> usize {
        self.channel.unbind();
        let failed = self.table.fail_all();
        if failed > 0 {
            self.logger
                .info(&format!("Channel closed with {} pending calls", failed));
        }
        failed
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_bound()
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register the listener for inbound calls of `operation`.
    pub fn on(&self, operation: impl Into<String>, listener: impl Listener) {
        self.listeners.on(operation, listener);
    }

    pub fn remove_listener(&self, operation: &str) -> bool {
        self.listeners.remove(operation)
    }

    pub fn has_listener(&self, operation: &str) -> bool {
        self.listeners.contains(operation)
    }

    /// Number of outbound calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.table.len()
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Call `operation` on the peer with the default timeout.
    pub async fn send<I, O>(&self, operation: &str, input: &I) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        self.send_with_timeout(operation, input, self.options.call_timeout)
            .await
    }

    /// Call `operation` on the peer and wait up to `timeout` for its response.
    ///
    /// Fails immediately with `Transport` if no channel is bound; no call is
    /// registered in that case.
    pub async fn send_with_timeout<I, O>(
        &self,
        operation: &str,
        input: &I,
        timeout: Duration,
    ) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let sender = match self.channel.current() {
            Some(sender) => sender,
            None => {
                self.logger.error(&format!(
                    "Cannot send call \"{}\" because no channel is bound. Call set_channel().",
                    operation
                ));
                return Err(TwsError::transport("no channel bound"));
            }
        };

        let payload = envelope::encode_payload(input)?;
        let pending = self.table.register(timeout);
        let correlation_id = pending.correlation_id().to_string();

        // close_channel unbinds before draining, so an entry registered after
        // the drain is only caught here.
        if !self.channel.is_bound() {
            self.table.cancel(&correlation_id);
            self.logger.error(&format!(
                "Channel closed before call \"{}\" ({}) was sent",
                operation, correlation_id
            ));
            return Err(TwsError::ChannelClosed { correlation_id });
        }

        let raw = envelope::serialize(&Envelope::call(operation, &correlation_id, payload))
            .and_then(|raw| {
                self.logger.info(&format!("Sending call: {}", raw));
                sender.send(raw)
            });
        if let Err(e) = raw {
            self.table.cancel(&correlation_id);
            self.logger.error(&format!(
                "Failed to send call \"{}\" ({}): {}",
                operation, correlation_id, e
            ));
            return Err(e);
        }

        let value = match pending.wait().await {
            Ok(value) => value,
            Err(e) => {
                if let TwsError::Timeout { .. } = e {
                    self.logger.error(&format!(
                        "Timeout while waiting for response to {} ({})",
                        correlation_id, operation
                    ));
                }
                return Err(e);
            }
        };

        serde_json::from_value(value).map_err(|e| TwsError::Parse(ParseError::Payload(e)))
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Handle one raw message from the peer.
    pub async fn process_inbound(&self, raw: impl AsRef<[u8]>) -> InboundOutcome {
        let raw = raw.as_ref();
        let envelope = match envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(ParseError::UnknownKind(kind)) => {
                let e = TwsError::UnknownEnvelopeKind(kind);
                self.logger.error(&format!("Peer sent an invalid message: {}", e));
                return InboundOutcome::Dropped(DropReason::UnknownKind);
            }
            Err(e) => {
                self.logger.error(&format!(
                    "Peer sent an invalid message ({}): {}",
                    e,
                    String::from_utf8_lossy(raw)
                ));
                return InboundOutcome::Dropped(DropReason::InvalidEnvelope);
            }
        };

        match envelope.kind {
            EnvelopeKind::Call => self.handle_call(envelope).await,
            EnvelopeKind::Response => self.handle_response(envelope),
        }
    }

    async fn handle_call(&self, call: Envelope) -> InboundOutcome {
        self.logger.info(&format!(
            "Received call \"{}\" ({})",
            call.operation, call.correlation_id
        ));

        let input = match envelope::decode_payload(&call.payload) {
            Ok(input) => input,
            Err(e) => {
                self.logger.error(&format!(
                    "Peer sent an invalid payload for call \"{}\" ({}): {}",
                    call.operation, e, call.payload
                ));
                return InboundOutcome::Dropped(DropReason::InvalidPayload);
            }
        };

        let output = match self.listeners.dispatch(&call.operation, input).await {
            Ok(output) => output,
            Err(e) => {
                self.logger.error(&e.to_string());
                return InboundOutcome::Dropped(DropReason::DispatchFailed);
            }
        };

        let sent = envelope::encode_payload(&output)
            .map(|payload| call.reply(payload))
            .and_then(|response| envelope::serialize(&response))
            .and_then(|raw| {
                self.logger.info(&format!("Sending response: {}", raw));
                self.channel.send(raw)
            });

        match sent {
            Ok(()) => InboundOutcome::Responded {
                correlation_id: call.correlation_id,
            },
            Err(e) => {
                self.logger.error(&format!(
                    "Cannot send response to \"{}\" ({}): {}",
                    call.operation, call.correlation_id, e
                ));
                InboundOutcome::Dropped(DropReason::TransmitFailed)
            }
        }
    }

    fn handle_response(&self, response: Envelope) -> InboundOutcome {
        let output = match envelope::decode_payload(&response.payload) {
            Ok(output) => output,
            Err(e) => {
                self.logger.error(&format!(
                    "Peer sent an invalid payload for response \"{}\" ({}): {}",
                    response.operation, e, response.payload
                ));
                return InboundOutcome::Dropped(DropReason::InvalidPayload);
            }
        };

        if self.table.resolve(&response.correlation_id, output) {
            self.logger.info(&format!(
                "Received response \"{}\" ({})",
                response.operation, response.correlation_id
            ));
            InboundOutcome::Resolved {
                correlation_id: response.correlation_id,
            }
        } else {
            self.logger.info(&format!(
                "No pending call for {}; ignoring response",
                response.correlation_id
            ));
            InboundOutcome::Unmatched {
                correlation_id: response.correlation_id,
            }
        }
    }
}
