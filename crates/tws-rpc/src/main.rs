//! tws-rpc - demo server and peer for tws.
//!
//! `serve` runs a unary HTTP endpoint and a duplex event server side by side.
//! `connect` runs one peer session against them.

mod handler;
mod peer;
mod peers;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tws-rpc")]
#[command(about = "Unary and duplex tws server, plus a demo peer")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve unary operations over HTTP and events over TCP
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// HTTP port (0 = auto-assign)
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Duplex event port (0 = auto-assign)
        #[arg(long, default_value = "3001")]
        events_port: u16,
    },
    /// Authenticate against a running server and create a product
    Connect {
        /// Unary endpoint URL
        #[arg(long, default_value = "http://127.0.0.1:3000/tws")]
        url: String,

        /// Duplex event server address
        #[arg(long, default_value = "127.0.0.1:3001")]
        events_addr: SocketAddr,

        #[arg(long, default_value = "12345")]
        token: String,

        #[arg(long, default_value = "Product 1")]
        name: String,

        #[arg(long, default_value = "10")]
        price: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match args.command {
        Command::Serve {
            host,
            port,
            events_port,
        } => {
            info!("Starting tws server");

            let peers = peers::PeerSet::new();
            let mut events = peers::start_event_server(peers.clone(), &host, events_port).await?;
            let addr = server::start_server(peers, &host, port).await?;

            // Machine-readable ports for wrappers that spawn this binary
            println!("HTTP_PORT={}", addr.port());
            println!("EVENTS_PORT={}", events.addr().port());

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
            events.shutdown().await;
        }
        Command::Connect {
            url,
            events_addr,
            token,
            name,
            price,
        } => {
            let output = peer::run_peer(peer::PeerOptions {
                url,
                events_addr,
                token,
                product_name: name,
                product_price: price,
            })
            .await?;
            println!("{}", output);
        }
    }

    Ok(())
}
