//! Peer mode: connect to a running server, authenticate over the duplex
//! channel, then trigger a server event through a unary operation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tws_core::{typed, Connection, PrefixedLogger, TracingLogger, TwsClient};

#[derive(Debug, Deserialize)]
pub struct ProductCreated {
    pub name: String,
    #[serde(default)]
    pub price: f64,
}

#[derive(Debug, Serialize)]
pub struct ProductAck {
    pub message: String,
}

/// Options for one peer session.
#[derive(Debug, Clone)]
pub struct PeerOptions {
    pub url: String,
    pub events_addr: SocketAddr,
    pub token: String,
    pub product_name: String,
    pub product_price: f64,
}

/// Run one session against the server and return the unary operation output.
pub async fn run_peer(options: PeerOptions) -> anyhow::Result<Value> {
    let client = TwsClient::builder(&options.url)
        .logger(Arc::new(PrefixedLogger::new("[Client]", TracingLogger)))
        .build()?;

    client.on(
        "productCreated",
        typed(|product: ProductCreated| async move {
            info!(
                "Server created the product: name=\"{}\", price={}",
                product.name, product.price
            );
            anyhow::Ok(ProductAck {
                message: "Client received the product successfully!".to_string(),
            })
        }),
    );

    let mut conn = Connection::connect(client.engine().clone(), options.events_addr).await?;

    let auth: Value = client
        .send("authenticate", &json!({"token": options.token}))
        .await?;
    info!("Received from server through duplex channel: {}", auth);

    let output: Value = client
        .execute(
            "createProduct",
            &json!({"name": options.product_name, "price": options.product_price}),
        )
        .await?;
    info!("createProduct returned: {}", output);

    conn.shutdown();
    conn.closed().await;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peers::{start_event_server, PeerSet};
    use crate::server::start_server;

    #[tokio::test]
    async fn test_peer_session_against_local_server() {
        let peers = PeerSet::new();
        let events = start_event_server(peers.clone(), "127.0.0.1", 0).await.unwrap();
        let http = start_server(peers.clone(), "127.0.0.1", 0).await.unwrap();

        let output = run_peer(PeerOptions {
            url: format!("http://{}/tws", http),
            events_addr: events.addr(),
            token: "12345".to_string(),
            product_name: "Product 1".to_string(),
            product_price: 10.0,
        })
        .await
        .unwrap();

        assert_eq!(
            output,
            json!({"feedback": "Product Product 1 created with price 10"})
        );
    }
}
