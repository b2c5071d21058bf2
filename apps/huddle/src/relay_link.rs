use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{decode, encode, SignalMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::error::MeshError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection to the relay. Outbound messages are encoded by a writer
/// task; inbound frames are decoded and surfaced through [`RelayLink::recv`].
/// `recv` returning `None` means the relay is gone.
pub struct RelayLink {
    tx: mpsc::UnboundedSender<SignalMessage>,
    rx: mpsc::UnboundedReceiver<SignalMessage>,
    task_handle: Option<JoinHandle<()>>,
}

impl RelayLink {
    pub async fn connect(url: &Url) -> Result<Self, MeshError> {
        let connect_error = |reason: String| MeshError::RelayConnect {
            url: url.to_string(),
            reason,
        };
        let (ws_stream, _) = match timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => return Err(connect_error(err.to_string())),
            Err(_) => return Err(connect_error("connection timed out".into())),
        };
        debug!(relay = %url, "connected to relay");

        let (tx_out, rx_out) = mpsc::unbounded_channel();
        let (tx_in, rx_in) = mpsc::unbounded_channel();
        let task_handle = tokio::spawn(handle_websocket(ws_stream, rx_out, tx_in));

        Ok(Self {
            tx: tx_out,
            rx: rx_in,
            task_handle: Some(task_handle),
        })
    }

    /// A link over plain channels, for in-process relays.
    pub fn from_channels(
        tx: mpsc::UnboundedSender<SignalMessage>,
        rx: mpsc::UnboundedReceiver<SignalMessage>,
    ) -> Self {
        Self {
            tx,
            rx,
            task_handle: None,
        }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<SignalMessage> {
        self.tx.clone()
    }

    pub async fn recv(&mut self) -> Option<SignalMessage> {
        self.rx.recv().await
    }

    /// Stop the socket task; queued outbound messages are discarded.
    pub async fn close(self) {
        drop(self.tx);
        if let Some(handle) = self.task_handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

async fn handle_websocket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<SignalMessage>,
    tx_in: mpsc::UnboundedSender<SignalMessage>,
) {
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            outbound = rx_out.recv() => {
                let Some(message) = outbound else {
                    let _ = sink.close().await;
                    break;
                };
                let text = match encode(&message) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("refusing to send invalid signaling message: {}", err);
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(text)).await {
                    warn!("relay send failed: {}", err);
                    break;
                }
            }
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("dropping non-UTF8 binary frame from relay");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("relay closed the connection");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        warn!("relay websocket error: {}", err);
                        break;
                    }
                };
                match decode(&text) {
                    Ok(message) => {
                        if tx_in.send(message).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!("dropping malformed relay message: {}", err),
                }
            }
        }
    }
}
