use url::Url;

use crate::capture::MediaConstraints;
use crate::error::MeshError;

pub const DEFAULT_RELAY: &str = "127.0.0.1:8080";
pub const DEFAULT_STUN: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// Relay address: `ws://`/`wss://` URL, `http(s)://` URL or bare `host:port`.
    pub relay: String,
    pub display_name: Option<String>,
    pub ice_servers: Vec<String>,
    pub constraints: MediaConstraints,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            relay: DEFAULT_RELAY.to_owned(),
            display_name: None,
            ice_servers: vec![DEFAULT_STUN.to_owned()],
            constraints: MediaConstraints::default(),
        }
    }
}

impl PeerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(relay) = lookup("HUDDLE_RELAY_URL").filter(|v| !v.trim().is_empty()) {
            config.relay = relay.trim().to_owned();
        }
        config.display_name = lookup("HUDDLE_NAME")
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty());
        if let Some(stun) = lookup("HUDDLE_STUN") {
            // An empty value disables STUN entirely (host candidates only).
            config.ice_servers = stun
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_owned)
                .collect();
        }
        config
    }

    pub fn relay_url(&self) -> Result<Url, MeshError> {
        resolve_relay_url(&self.relay)
    }
}

/// Turns whatever the user typed into a websocket URL. Bare addresses get
/// `ws://` for loopback and `wss://` otherwise; `localhost` is pinned to
/// IPv4 so the relay's default bind is reachable.
pub fn resolve_relay_url(raw: &str) -> Result<Url, MeshError> {
    let invalid = |reason: String| MeshError::InvalidRelayUrl {
        url: raw.to_owned(),
        reason,
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty relay address".into()));
    }

    let with_scheme = if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        trimmed.to_owned()
    } else if trimmed.starts_with("localhost") || trimmed.starts_with("127.0.0.1") {
        format!("ws://{trimmed}")
    } else {
        format!("wss://{trimmed}")
    };

    let mut url = Url::parse(&with_scheme).map_err(|err| invalid(err.to_string()))?;
    if url.host_str() == Some("localhost") {
        url.set_host(Some("127.0.0.1"))
            .map_err(|err| invalid(err.to_string()))?;
    }
    Ok(url)
}
