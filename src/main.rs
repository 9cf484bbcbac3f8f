//! CLI for busrouter
//!
//! Subcommands:
//! - `server` (default): run the router
//! - `client`: a minimal device emulator, handy for smoke tests

use busrouter::broker::Broker;
use busrouter::broker::message::{Request, Response};
use busrouter::config::{Settings, load_config};
use busrouter::mapper;
use busrouter::transport::codec::DeviceCodec;
use busrouter::transport::{Keepalive, serve_until};
use busrouter::utils::logging;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "busrouter", version, about = "Publish/subscribe router for embedded devices")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the router
    Server,
    /// Connect as a device, subscribe and/or publish, then print deliveries
    Client {
        /// Router address
        #[arg(long, default_value = "127.0.0.1:42069")]
        addr: String,
        /// Topic pattern to subscribe to (repeatable)
        #[arg(long = "subscribe")]
        subscribe: Vec<String>,
        /// Topic to publish to once subscribed
        #[arg(long)]
        publish: Option<String>,
        #[arg(long, default_value = "")]
        payload: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&config.logging.level);

    match cli.command.unwrap_or(Command::Server) {
        Command::Server => {
            if let Err(e) = run_server(config).await {
                error!("Server failed: {}", e);
            }
        }
        Command::Client {
            addr,
            subscribe,
            publish,
            payload,
        } => {
            if let Err(e) = run_client(&addr, subscribe, publish, payload).await {
                error!("Client failed: {}", e);
            }
        }
    }
}

async fn run_server(config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let (broker, handle) = Broker::new(config.broker.request_queue_capacity);
    tokio::spawn(broker.run());

    if config.mapper.enabled {
        let mapper_handle = handle.clone();
        let settings = config.mapper.clone();
        tokio::spawn(async move {
            if let Err(e) = mapper::run(mapper_handle, settings).await {
                error!("Route mapper stopped: {e}");
            }
        });
    }

    let keepalive = Keepalive::from(&config.keepalive);
    let addr = config.server.addr();
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    serve_until(&addr, handle, keepalive, shutdown).await?;
    info!("Exiting gracefully.");

    Ok(())
}

async fn run_client(
    addr: &str,
    subscribe: Vec<String>,
    publish: Option<String>,
    payload: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let stream = TcpStream::connect(addr).await?;
    let mut device = Framed::new(stream, DeviceCodec);

    // arms the router's keepalive pings
    device.send(Request::Pong).await?;
    let listening = !subscribe.is_empty();
    for topic in subscribe {
        device.send(Request::Subscribe { topic }).await?;
    }
    if let Some(topic) = publish {
        device
            .send(Request::Publish {
                topic,
                payload: Bytes::from(payload),
            })
            .await?;
    }

    while let Some(frame) = device.next().await {
        match frame? {
            Response::Ping => device.send(Request::Pong).await?,
            Response::Publish { topic, payload } => {
                println!("{topic}: {}", String::from_utf8_lossy(&payload));
            }
            Response::Ok => {
                println!("ok");
                if !listening {
                    break;
                }
            }
            Response::Nok(_) => {
                println!("nok");
                if !listening {
                    break;
                }
            }
        }
    }

    Ok(())
}
