use clap::{Parser, Subcommand};
use std::net::IpAddr;

use crate::config::{BroadcastScope, RelayConfig};

#[derive(Parser, Debug)]
#[command(name = "huddle-relay")]
#[command(about = "Signaling relay for huddle mesh calls, plus a tap client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Address to listen on (overrides HUDDLE_RELAY_BIND)
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Port to listen on (overrides HUDDLE_RELAY_PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Whether a relayed message is also echoed back to its sender
    #[arg(long, value_enum)]
    pub scope: Option<BroadcastScope>,

    /// Largest accepted inbound message in bytes
    #[arg(long)]
    pub max_message_bytes: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a running relay and print every message it floods
    Tap {
        /// Relay URL (e.g., ws://localhost:8080)
        #[arg(short, long, default_value = "ws://127.0.0.1:8080")]
        url: String,

        /// Only show messages from this participant
        #[arg(long)]
        from: Option<String>,

        /// Only show messages addressed to this participant (or "all")
        #[arg(long)]
        dest: Option<String>,

        /// Print the raw JSON envelope instead of a summary
        #[arg(long)]
        raw: bool,
    },
}

impl Cli {
    pub fn apply(&self, mut config: RelayConfig) -> RelayConfig {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(scope) = self.scope {
            config.scope = scope;
        }
        if let Some(bytes) = self.max_message_bytes.filter(|bytes| *bytes > 0) {
            config.max_message_bytes = bytes;
        }
        config
    }
}
