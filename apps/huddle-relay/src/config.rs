use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

/// Which open channels receive a relayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BroadcastScope {
    /// Every open channel except the one the message arrived on.
    #[default]
    ExcludeSender,
    /// Every open channel, the sender included.
    IncludeSender,
}

impl FromStr for BroadcastScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "exclude-sender" | "exclude" | "others" => Ok(BroadcastScope::ExcludeSender),
            "include-sender" | "include" | "everyone" => Ok(BroadcastScope::IncludeSender),
            other => Err(format!("unknown broadcast scope {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub scope: BroadcastScope,
    /// Largest inbound WebSocket message accepted from a channel.
    pub max_message_bytes: usize,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("HUDDLE_RELAY_BIND")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind),
            port: lookup("HUDDLE_RELAY_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            scope: lookup("HUDDLE_RELAY_SCOPE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.scope),
            max_message_bytes: lookup("HUDDLE_RELAY_MAX_MESSAGE")
                .and_then(|v| v.parse().ok())
                .filter(|bytes: &usize| *bytes > 0)
                .unwrap_or(defaults.max_message_bytes),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            scope: BroadcastScope::ExcludeSender,
            max_message_bytes: 64 * 1024,
        }
    }
}
