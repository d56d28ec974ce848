//! Centralized configuration for tws.
//!
//! Protocol constants, unary client defaults and transport limits, plus the
//! runtime options a protocol engine is built with.

use std::time::Duration;

/// Duplex protocol configuration.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// How long an outbound call waits for its response by default.
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
    /// Prefix of every correlation id issued by a correlation table.
    pub const CORRELATION_ID_PREFIX: &'static str = "evt-";
    /// First counter value handed out by a fresh table.
    pub const FIRST_CORRELATION_ID: u64 = 1;
}

/// Unary HTTP client configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const USER_AGENT: &'static str = "tws-client/0.1";
}

/// Byte-stream transport configuration.
pub struct TransportConfig;

impl TransportConfig {
    /// Largest frame accepted from a peer (1 MiB).
    pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
    /// Size in bytes of the big-endian length prefix.
    pub const FRAME_HEADER_LEN: usize = 4;
    /// How long `Connection::connect` waits for the TCP handshake.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Runtime options for a [`ProtocolEngine`](crate::ProtocolEngine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Timeout applied by `send` when the caller does not pass one.
    pub call_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            call_timeout: ProtocolConfig::DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl EngineOptions {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_use_protocol_timeout() {
        let options = EngineOptions::default();
        assert_eq!(options.call_timeout, Duration::from_secs(10));

        let options = options.with_call_timeout(Duration::from_millis(250));
        assert_eq!(options.call_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_limits_are_reasonable() {
        assert!(TransportConfig::MAX_FRAME_SIZE > 64 * 1024);
        assert!(NetworkConfig::REQUEST_TIMEOUT > Duration::ZERO);
    }
}
