//! Duplex event server: one protocol engine per connected peer.
//!
//! Peers connect over TCP and speak length-prefixed envelopes. Each
//! connection gets its own engine, so correlation ids and listeners never
//! leak between peers. Server events are published by calling every
//! connected engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tws_core::{typed, Connection, PrefixedLogger, ProtocolEngine, TracingLogger};

/// Connections beyond this are refused.
pub const MAX_PEERS: usize = 64;

#[derive(Debug, Deserialize)]
pub struct AuthenticateInput {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthenticateOutput {
    pub code: u16,
    pub message: String,
}

/// Connected peers keyed by connection id.
#[derive(Clone, Default)]
pub struct PeerSet {
    peers: Arc<RwLock<HashMap<String, ProtocolEngine>>>,
    next_id: Arc<AtomicU64>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn connection_ids(&self) -> Vec<String> {
        let peers = self.peers.read().unwrap_or_else(|p| p.into_inner());
        let mut ids: Vec<String> = peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn next_connection_id(&self) -> String {
        format!("connection-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn insert(&self, connection_id: String, engine: ProtocolEngine) {
        self.peers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(connection_id, engine);
    }

    fn remove(&self, connection_id: &str) {
        self.peers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(connection_id);
    }

    /// Call `event` on every connected peer.
    ///
    /// Results come back in connection id order. A peer that fails or times
    /// out does not affect the others.
    pub async fn publish(&self, event: &str, input: &Value) -> Vec<(String, tws_core::Result<Value>)> {
        let targets: Vec<(String, ProtocolEngine)> = {
            let peers = self.peers.read().unwrap_or_else(|p| p.into_inner());
            let mut targets: Vec<_> = peers
                .iter()
                .map(|(id, engine)| (id.clone(), engine.clone()))
                .collect();
            targets.sort_by(|a, b| a.0.cmp(&b.0));
            targets
        };

        let calls = targets.into_iter().map(|(id, engine)| async move {
            let result = engine.send::<_, Value>(event, input).await;
            (id, result)
        });

        futures::future::join_all(calls).await
    }
}

/// Build the engine serving one peer.
fn peer_engine(connection_id: &str) -> ProtocolEngine {
    let logger = PrefixedLogger::new(format!("[{}]", connection_id), TracingLogger);
    let engine = ProtocolEngine::with_logger(Arc::new(logger));

    engine.on(
        "authenticate",
        typed(|input: AuthenticateInput| async move {
            info!("Token received: {}", input.token);
            anyhow::Ok(AuthenticateOutput {
                code: 200,
                message: "Token is valid!".to_string(),
            })
        }),
    );

    engine
}

/// Handle to a running event server.
pub struct EventServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<JoinHandle<()>>,
}

impl EventServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting peers. Existing connections stay up.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for EventServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Bind the event server and start accepting peers.
pub async fn start_event_server(
    peers: PeerSet,
    host: &str,
    port: u16,
) -> anyhow::Result<EventServerHandle> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;

    info!("Event server listening on {}", addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task_handle = tokio::spawn(accept_loop(listener, peers, shutdown_rx));

    Ok(EventServerHandle {
        addr,
        shutdown_tx: Some(shutdown_tx),
        task_handle: Some(task_handle),
    })
}

async fn accept_loop(listener: TcpListener, peers: PeerSet, mut shutdown_rx: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("Event server shutting down");
                break;
            }
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        if peers.len() >= MAX_PEERS {
                            warn!(
                                "Rejecting peer {}: at max capacity ({})",
                                peer_addr, MAX_PEERS
                            );
                            continue;
                        }
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
                        }

                        let peers = peers.clone();
                        tokio::spawn(async move {
                            let connection_id = peers.next_connection_id();
                            let engine = peer_engine(&connection_id);

                            // Attach before publishing so the engine is never unbound while listed.
                            let mut conn = Connection::attach(engine.clone(), stream);
                            peers.insert(connection_id.clone(), engine);
                            info!("Peer {} connected as {}", peer_addr, connection_id);

                            conn.closed().await;

                            peers.remove(&connection_id);
                            info!("Peer {} disconnected", connection_id);
                        });
                    }
                    Err(e) => {
                        error!("Event server accept error: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    async fn wait_for_peers(peers: &PeerSet, count: usize) {
        for _ in 0..200 {
            if peers.len() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} peers, have {}", count, peers.len());
    }

    #[tokio::test]
    async fn test_publish_without_peers_is_empty() {
        let peers = PeerSet::new();
        assert!(peers.is_empty());
        assert!(peers.publish("productCreated", &json!({})).await.is_empty());
    }

    #[tokio::test]
    async fn test_peer_can_authenticate() {
        let peers = PeerSet::new();
        let server = start_event_server(peers.clone(), "127.0.0.1", 0).await.unwrap();

        let engine = ProtocolEngine::new();
        let _conn = Connection::connect(engine.clone(), server.addr()).await.unwrap();

        let reply: Value = engine
            .send("authenticate", &json!({"token": "12345"}))
            .await
            .unwrap();
        assert_eq!(reply, json!({"code": 200, "message": "Token is valid!"}));
    }

    #[tokio::test]
    async fn test_publish_reaches_every_peer_and_tracks_disconnects() {
        let peers = PeerSet::new();
        let server = start_event_server(peers.clone(), "127.0.0.1", 0).await.unwrap();

        let mut connections = Vec::new();
        for i in 0..3 {
            let engine = ProtocolEngine::new();
            engine.on("productCreated", move |product: Value| async move {
                anyhow::Ok(json!({"peer": i, "name": product["name"]}))
            });
            connections.push(Connection::connect(engine, server.addr()).await.unwrap());
        }
        wait_for_peers(&peers, 3).await;

        let results = peers
            .publish("productCreated", &json!({"name": "Product 1", "price": 10}))
            .await;
        assert_eq!(results.len(), 3);

        let mut seen: Vec<i64> = results
            .into_iter()
            .map(|(_, result)| {
                let reply = result.unwrap();
                assert_eq!(reply["name"], "Product 1");
                reply["peer"].as_i64().unwrap()
            })
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);

        connections.pop();
        wait_for_peers(&peers, 2).await;
        assert_eq!(peers.connection_ids().len(), 2);
    }
}
