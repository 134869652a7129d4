//! HTTP and WebSocket surface
//!
//! - `GET /ws` upgrades to a WebSocket and runs one session on it
//! - `GET /health` liveness probe

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::BrokerConnector;
use crate::config::ServerConfig;
use crate::error::{FlowError, Result};
use crate::session::{run_session, ClientStream, EventSink, SessionContext};

#[derive(Clone)]
struct AppState {
    ctx: SessionContext,
    shutdown: CancellationToken,
}

/// Build the router. Every session's token is a child of `shutdown`.
pub fn router(ctx: SessionContext, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(AppState { ctx, shutdown })
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("WebSocket session opened");
    let (sender, receiver) = socket.split();
    let cancel = state.shutdown.child_token();
    if let Err(e) = run_session(
        &state.ctx,
        Box::new(WsSink { sender }),
        Box::new(WsStream { receiver }),
        cancel,
    )
    .await
    {
        debug!(error = %e, classifier = e.classifier(), "session ended with error");
    }
}

struct WsSink {
    sender: SplitSink<WebSocket, WsMessage>,
}

#[async_trait]
impl EventSink for WsSink {
    async fn send(&mut self, text: String) -> Result<()> {
        self.sender
            .send(WsMessage::Text(text))
            .await
            .map_err(FlowError::transport)
    }

    async fn close(&mut self) -> Result<()> {
        self.sender.close().await.map_err(FlowError::transport)
    }
}

struct WsStream {
    receiver: SplitStream<WebSocket>,
}

#[async_trait]
impl ClientStream for WsStream {
    async fn next_text(&mut self) -> Result<Option<String>> {
        while let Some(frame) = self.receiver.next().await {
            match frame.map_err(FlowError::transport)? {
                WsMessage::Text(text) => return Ok(Some(text)),
                WsMessage::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => debug!("ignoring non-UTF-8 binary frame"),
                },
                WsMessage::Close(_) => return Ok(None),
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            }
        }
        Ok(None)
    }
}

/// Serve on `listener` until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    ctx: SessionContext,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = router(ctx, shutdown.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// The Flowscope server
pub struct Server {
    config: Arc<ServerConfig>,
    ctx: SessionContext,
}

impl Server {
    /// Server backed by Kafka
    #[cfg(feature = "kafka")]
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(crate::cluster::KafkaConnector::new()))
    }

    /// Server backed by any broker connector
    pub fn with_connector(config: ServerConfig, connector: Arc<dyn BrokerConnector>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let ctx = SessionContext::new(config.clone(), connector)?;
        Ok(Self { config, ctx })
    }

    /// Run until Ctrl-C. Live sessions are cancelled on the way out.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.http_addr).await?;
        info!(addr = %self.config.http_addr, "Flowscope listening");

        let shutdown = CancellationToken::new();
        let on_signal = shutdown.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => warn!(error = %e, "failed to listen for shutdown signal"),
            }
            on_signal.cancel();
        });

        serve(listener, self.ctx, shutdown).await
    }
}
