//! framehub - chat demo over the framed TCP hub.
//!
//! `framehub serve` runs a hub that rebroadcasts every message it receives.
//! `framehub chat` connects to one, sends each stdin line and prints every
//! message the hub broadcasts.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use framehub::{
    codec::MsgPackCodec,
    config::{EndpointConfig, HubConfig, DEFAULT_PORT},
    endpoint::Endpoint,
    framer::DEFAULT_MAX_MESSAGE_SIZE,
    hub::TcpHub,
    types::LifecycleEvent,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "framehub", version, about = "Length-prefixed TCP message hub")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a hub that rebroadcasts every message to all clients.
    Serve {
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Largest accepted payload in bytes; 0 disables the limit.
        #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
        max_message_size: usize,

        /// Most simultaneous clients; 0 disables the limit.
        #[arg(long, default_value_t = 0)]
        max_connections: usize,
    },
    /// Connect to a hub and chat from stdin.
    Chat {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Name shown to other users; asked for when omitted.
        #[arg(short, long)]
        user: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    author: String,
    text: String,
}

type ChatCodec = MsgPackCodec<ChatMessage>;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    match Cli::parse().command {
        Command::Serve {
            port,
            max_message_size,
            max_connections,
        } => {
            let config = HubConfig::new()
                .port(port)
                .max_message_size(max_message_size)
                .max_connections(max_connections);
            serve(config).await
        }
        Command::Chat { host, port, user } => {
            let config = EndpointConfig::new().host(host).port(port);
            chat(config, user).await
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn serve(config: HubConfig) -> Result<()> {
    let hub = TcpHub::new(config, ChatCodec::new());

    let relay = hub.clone();
    hub.on_message(move |event| {
        let relay = relay.clone();
        async move {
            info!(author = %event.data.author, from = %event.conn_id, "relaying message");
            if let Err(err) = relay.broadcast(&event.data).await {
                error!(error = %err, "relay failed");
            }
        }
    });

    let addr = hub.start().await.context("failed to start hub")?;
    info!(%addr, "chat hub ready, Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    hub.shutdown();
    Ok(())
}

async fn chat(config: EndpointConfig, user: Option<String>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let author = match user {
        Some(user) => user,
        None => {
            println!("Enter username:");
            lines
                .next_line()
                .await
                .context("failed to read username")?
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .context("no username given")?
        }
    };

    let endpoint = Endpoint::new(config.clone(), ChatCodec::new());

    endpoint.on_message(|event| async move {
        println!("{} say: {}", event.data.author, event.data.text);
    });
    endpoint.on_lifecycle(|event| async move {
        if let LifecycleEvent::Disconnected { reason, .. } = &event {
            println!("Disconnected from hub ({reason})");
        }
    });
    endpoint.on_disconnect(|event| async move {
        println!("{event}");
    });

    endpoint
        .connect((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", config.host, config.port))?;

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let message = ChatMessage {
            author: author.clone(),
            text: text.to_string(),
        };
        if let Err(err) = endpoint.send(&message).await {
            error!(error = %err, "send failed");
            break;
        }
    }

    endpoint.disconnect();
    Ok(())
}
