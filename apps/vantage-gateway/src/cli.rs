use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use vantage_wire::{EntityKind, Envelope};

#[derive(Parser, Debug)]
#[command(name = "vantage-gateway")]
#[command(about = "Device gateway and WebSocket debug client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a running gateway as a WebSocket client
    Debug {
        /// Gateway WebSocket URL
        #[arg(short, long, default_value = "ws://127.0.0.1:8080/ws")]
        url: String,

        /// Debug command
        #[command(subcommand)]
        command: DebugCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum DebugCommands {
    /// Connect and print every push until interrupted
    Connect,

    /// Watch a desk and print its reminders
    WatchDesk {
        /// Desk id to watch
        desk_id: String,
    },

    /// Watch a project and print its reminders
    WatchProject {
        /// Project id to watch
        project_id: String,
    },
}

pub async fn run_debug_client(url: String, command: DebugCommands) -> Result<()> {
    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            return Err(anyhow::anyhow!("Connection to {} failed: {}", url, e));
        }
        Err(_) => {
            return Err(anyhow::anyhow!(
                "Connection timeout - is the gateway running at {}?",
                url
            ));
        }
    };
    let (mut write, mut read) = ws_stream.split();
    println!("connected to {url}");

    let watch = match command {
        DebugCommands::Connect => None,
        DebugCommands::WatchDesk { desk_id } => Some(Envelope::watch(EntityKind::Desk, &desk_id)),
        DebugCommands::WatchProject { project_id } => {
            Some(Envelope::watch(EntityKind::Project, &project_id))
        }
    };
    if let Some(envelope) = watch {
        let text = serde_json::to_string(&envelope)?;
        write.send(Message::Text(text.into())).await?;
        println!("-> {}", envelope.kind);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                write.send(Message::Close(None)).await.ok();
                println!("interrupted");
                return Ok(());
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => println!("<- {text}"),
                    Some(Ok(Message::Close(_))) | None => {
                        println!("gateway closed the connection");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(anyhow::anyhow!("WebSocket error: {}", e));
                    }
                }
            }
        }
    }
}
