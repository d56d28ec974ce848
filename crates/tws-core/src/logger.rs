//! Logger capability handed to the protocol engine and unary client.
//!
//! `error` is mandatory. `info` is optional and defaults to a no-op, so a
//! sink that only cares about failures implements a single method.

use std::sync::Arc;

/// Diagnostic sink for the engine.
pub trait Logger: Send + Sync {
    fn error(&self, message: &str);

    fn info(&self, _message: &str) {}
}

/// Shared logger handle.
pub type SharedLogger = Arc<dyn Logger>;

/// Default logger, forwarding to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }
}

/// Logger with a fixed prefix in front of every entry, e.g. `[Client]`.
pub struct PrefixedLogger<L> {
    prefix: String,
    inner: L,
}

impl<L: Logger> PrefixedLogger<L> {
    pub fn new(prefix: impl Into<String>, inner: L) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }
}

impl<L: Logger> Logger for PrefixedLogger<L> {
    fn error(&self, message: &str) {
        self.inner.error(&format!("{} {}", self.prefix, message));
    }

    fn info(&self, message: &str) {
        self.inner.info(&format!("{} {}", self.prefix, message));
    }
}

/// The logger used when a caller does not supply one.
pub fn default_logger() -> SharedLogger {
    Arc::new(TracingLogger)
}
