//! Late-bound outbound channel.
//!
//! The engine never knows how bytes move. A transport hands it a
//! [`ChannelSender`] once the connection exists, and may take it away again
//! when the connection closes.

use crate::error::{Result, TwsError};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Outbound half of a duplex transport.
pub trait ChannelSender: Send + Sync + 'static {
    /// Transmit one serialized envelope.
    fn send(&self, raw: String) -> Result<()>;
}

impl ChannelSender for mpsc::UnboundedSender<String> {
    fn send(&self, raw: String) -> Result<()> {
        mpsc::UnboundedSender::send(self, raw)
            .map_err(|_| TwsError::transport("outbound channel is closed"))
    }
}

/// Adapter turning a closure into a [`ChannelSender`].
pub struct FnSender<F>(pub F);

impl<F> ChannelSender for FnSender<F>
where
    F: Fn(String) -> Result<()> + Send + Sync + 'static,
{
    fn send(&self, raw: String) -> Result<()> {
        (self.0)(raw)
    }
}

/// Optional channel slot owned by one engine.
#[derive(Clone, Default)]
pub struct ChannelBinding {
    sender: Arc<RwLock<Option<Arc<dyn ChannelSender>>>>,
}

impl ChannelBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `sender`. Returns `true` if a previous sender was replaced.
    pub fn bind(&self, sender: Arc<dyn ChannelSender>) -> bool {
        let mut slot = self
            .sender
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.replace(sender).is_some()
    }

    /// Remove the current sender. Returns `true` if one was bound.
    pub fn unbind(&self) -> bool {
        let mut slot = self
            .sender
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.take().is_some()
    }

    /// Current sender, if any. The lock is released before the caller sends.
    pub fn current(&self) -> Option<Arc<dyn ChannelSender>> {
        self.sender
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_bound(&self) -> bool {
        self.current().is_some()
    }

    /// Transmit through the bound sender.
    pub fn send(&self, raw: String) -> Result<()> {
        match self.current() {
            Some(sender) => sender.send(raw),
            None => Err(TwsError::transport(
                "no channel bound; call set_channel() first",
            )),
        }
    }
}
