//! Passive debug client: joins the relay as an ordinary channel and prints
//! everything it is flooded with.

use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use huddle_protocol::{decode, Payload, SignalMessage};
use std::io::Write;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct TapFilter {
    pub from: Option<String>,
    pub dest: Option<String>,
}

impl TapFilter {
    pub fn matches(&self, message: &SignalMessage) -> bool {
        let from_ok = self
            .from
            .as_deref()
            .map_or(true, |from| message.from.as_str() == from);
        let dest_ok = self
            .dest
            .as_deref()
            .map_or(true, |dest| message.dest.to_string() == dest);
        from_ok && dest_ok
    }
}

/// One-line human summary of a relayed message.
pub fn summarize(message: &SignalMessage) -> String {
    let detail = match &message.payload {
        Payload::Announce { display_name } => format!("announce {display_name:?}"),
        Payload::Offer(sdp) => format!("offer ({} bytes sdp)", sdp.len()),
        Payload::Answer(sdp) => format!("answer ({} bytes sdp)", sdp.len()),
        Payload::Candidate(candidate) => format!("candidate {}", candidate.candidate),
    };
    format!("{} -> {}: {}", message.from, message.dest, detail)
}

pub async fn run_tap(url: &str, filter: TapFilter, raw: bool, mut out: impl Write) -> Result<()> {
    debug!("tapping relay at {}", url);

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => return Err(anyhow!("connection to {} failed: {}", url, e)),
        Err(_) => {
            return Err(anyhow!(
                "connection timeout - is the relay running at {}?",
                url
            ))
        }
    };
    let (_write, mut read) = ws_stream.split();

    while let Some(frame) = read.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Message::Close(_) => break,
            _ => continue,
        };
        match decode(&text) {
            Ok(message) if filter.matches(&message) => {
                if raw {
                    writeln!(out, "{}", text)?;
                } else {
                    writeln!(out, "{}", summarize(&message))?;
                }
                out.flush()?;
            }
            Ok(_) => {}
            Err(err) => warn!("relay delivered an undecodable message: {}", err),
        }
    }

    Ok(())
}
