//! Shared helpers for tws-core integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tws_core::{envelope, Logger, ProtocolEngine};

/// Logger that keeps every entry for later assertions.
#[derive(Default)]
pub struct RecordingLogger {
    errors: Mutex<Vec<String>>,
    infos: Mutex<Vec<String>>,
}

impl RecordingLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }
}

impl Logger for RecordingLogger {
    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn info(&self, message: &str) {
        self.infos.lock().unwrap().push(message.to_string());
    }
}

/// Engine bound to an in-memory channel; the receiver sees every envelope it sends.
pub fn engine_with_channel(
    logger: Arc<RecordingLogger>,
) -> (ProtocolEngine, mpsc::UnboundedReceiver<String>) {
    let engine = ProtocolEngine::with_logger(logger);
    let (tx, rx) = mpsc::unbounded_channel();
    engine.set_channel(tx);
    (engine, rx)
}

/// Forward everything `from` transmits into `to`, one task per message.
///
/// Correlation ids of forwarded calls are recorded in `seen_calls`.
pub fn pump(
    mut from: mpsc::UnboundedReceiver<String>,
    to: ProtocolEngine,
    seen_calls: Arc<Mutex<HashSet<String>>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(raw) = from.recv().await {
            if let Ok(parsed) = envelope::parse(raw.as_bytes()) {
                if parsed.kind == tws_core::EnvelopeKind::Call {
                    seen_calls.lock().unwrap().insert(parsed.correlation_id);
                }
            }
            let to = to.clone();
            tokio::spawn(async move {
                to.process_inbound(raw).await;
            });
        }
    })
}
