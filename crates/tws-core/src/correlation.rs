//! Correlation table: in-flight outbound calls keyed by correlation id.
//!
//! Each pending call reaches exactly one terminal event: resolved by a
//! response, expired by its timer, or failed because the channel closed.
//! Every path removes the entry under the same lock before acting on it, so
//! whichever path removes it first wins and the others see an absent entry.
//!
//! # Thread Safety
//!
//! The table is cheap to clone and shares its state through an `Arc`. The lock
//! is a `std::sync::Mutex` that is never held across an `.await`.

use crate::config::ProtocolConfig;
use crate::error::{Result, TwsError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

type Completion = oneshot::Sender<Result<Value>>;

/// One outbound call awaiting its response.
struct PendingCall {
    completion: Completion,
    timer: Option<JoinHandle<()>>,
    created_at: Instant,
}

impl PendingCall {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct TableInner {
    pending: Mutex<HashMap<String, PendingCall>>,
    next_id: AtomicU64,
}

/// Table of outstanding calls for one protocol engine.
#[derive(Clone)]
pub struct CorrelationTable {
    inner: Arc<TableInner>,
}

/// Receiving side of a registered call.
#[derive(Debug)]
pub struct PendingResponse {
    correlation_id: String,
    receiver: oneshot::Receiver<Result<Value>>,
}

impl PendingResponse {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Wait for the terminal event of this call.
    pub async fn wait(self) -> Result<Value> {
        match self.receiver.await {
            Ok(result) => result,
            // Entry was cancelled or the table dropped without completing it.
            Err(_) => Err(TwsError::ChannelClosed {
                correlation_id: self.correlation_id,
            }),
        }
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TableInner {
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(ProtocolConfig::FIRST_CORRELATION_ID),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingCall>> {
        // A panic while holding the lock cannot leave a half-applied entry,
        // so a poisoned map is still consistent.
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_correlation_id(&self) -> String {
        let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", ProtocolConfig::CORRELATION_ID_PREFIX, n)
    }

    /// Register a new pending call that expires after `timeout`.
    ///
    /// Must be called from within a tokio runtime; the timer is a spawned task.
    pub fn register(&self, timeout: Duration) -> PendingResponse {
        let correlation_id = self.next_correlation_id();
        let (completion, receiver) = oneshot::channel();

        let mut pending = self.lock();
        let timer = Self::spawn_timer(Arc::downgrade(&self.inner), correlation_id.clone(), timeout);
        pending.insert(
            correlation_id.clone(),
            PendingCall {
                completion,
                timer: Some(timer),
                created_at: Instant::now(),
            },
        );
        drop(pending);

        debug!("Registered pending call {} (timeout {:?})", correlation_id, timeout);

        PendingResponse {
            correlation_id,
            receiver,
        }
    }

    fn spawn_timer(table: Weak<TableInner>, correlation_id: String, timeout: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = table.upgrade() {
                CorrelationTable { inner }.expire(&correlation_id);
            }
        })
    }

    /// Fulfil a pending call with its response payload.
    ///
    /// Returns `false` when the id is unknown, already resolved or expired.
    pub fn resolve(&self, correlation_id: &str, payload: Value) -> bool {
        let entry = self.lock().remove(correlation_id);
        match entry {
            Some(mut call) => {
                call.cancel_timer();
                debug!(
                    "Resolved {} after {:?}",
                    correlation_id,
                    call.created_at.elapsed()
                );
                // The caller may have stopped waiting; nothing left to do then.
                let _ = call.completion.send(Ok(payload));
                true
            }
            None => false,
        }
    }

    /// Timer path: fail the call with `Timeout` if it is still pending.
    pub(crate) fn expire(&self, correlation_id: &str) -> bool {
        let entry = self.lock().remove(correlation_id);
        match entry {
            Some(call) => {
                debug!("Pending call {} expired", correlation_id);
                let _ = call.completion.send(Err(TwsError::Timeout {
                    correlation_id: correlation_id.to_string(),
                }));
                true
            }
            None => false,
        }
    }

    /// Drop a pending call without completing it.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        let entry = self.lock().remove(correlation_id);
        match entry {
            Some(mut call) => {
                call.cancel_timer();
                true
            }
            None => false,
        }
    }

    /// Fail every pending call with `ChannelClosed`. Returns how many failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<(String, PendingCall)> = self.lock().drain().collect();
        let count = drained.len();

        for (correlation_id, mut call) in drained {
            call.cancel_timer();
            let _ = call
                .completion
                .send(Err(TwsError::ChannelClosed { correlation_id }));
        }

        if count > 0 {
            debug!("Failed {} pending calls on channel close", count);
        }
        count
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.lock().contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
