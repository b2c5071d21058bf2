//! Store-and-forward signaling relay.
//!
//! Every WebSocket that connects becomes a channel. A message arriving on one
//! channel is checked for a well-formed envelope and then flooded to the other
//! open channels; participants filter out what is not addressed to them.

pub mod cli;
pub mod config;
pub mod registry;
pub mod relay;
pub mod tap;

use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub use config::{BroadcastScope, RelayConfig};
pub use relay::{RelayError, RelayState};

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(relay::websocket_handler))
        .route("/ws", get(relay::websocket_handler))
        .route("/health", get(relay::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the relay on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: RelayState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
