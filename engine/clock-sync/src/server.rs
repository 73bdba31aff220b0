//! WebSocket front end of a [`TimeAuthority`]
//!
//! Every connection carries one request. `{"type":"sync"}` is answered with two
//! `sync_reply` frames (the first without a timestamp), `{"type":"delay"}` with one
//! `delay_reply` frame. The server then closes the connection.

use futures::{SinkExt, StreamExt};
use session_core::TimeSource;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::authority::TimeAuthority;
use crate::error::{ClockSyncError, SyncResult};
use crate::messages::{AuthorityRequest, AuthorityResponse};

pub struct AuthorityServer {
    authority: TimeAuthority,
}

impl AuthorityServer {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        Self { authority: TimeAuthority::new(source) }
    }

    /// Bind `addr` and serve until `shutdown` fires
    pub async fn start(
        self: Arc<Self>,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> SyncResult<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve an already bound listener until `shutdown` fires
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> SyncResult<()> {
        info!("Clock authority listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Clock authority shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                warn!("Authority connection from {} failed: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) -> SyncResult<()> {
        debug!("Authority connection from {}", peer_addr);
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        while let Some(message) = ws_receiver.next().await {
            let text = match message? {
                WsMessage::Text(text) => text,
                WsMessage::Ping(data) => {
                    ws_sender.send(WsMessage::Pong(data)).await?;
                    continue;
                }
                WsMessage::Close(_) => return Ok(()),
                _ => continue,
            };

            let request: AuthorityRequest = match serde_json::from_str(&text) {
                Ok(request) => request,
                Err(e) => {
                    let reply =
                        AuthorityResponse::Error { message: format!("invalid request: {e}") };
                    ws_sender.send(WsMessage::Text(serde_json::to_string(&reply)?)).await?;
                    break;
                }
            };

            match request {
                AuthorityRequest::Sync => {
                    let mark = AuthorityResponse::SyncReply { timestamp: None };
                    ws_sender.send(WsMessage::Text(serde_json::to_string(&mark)?)).await?;
                    let stamped =
                        AuthorityResponse::SyncReply { timestamp: Some(self.authority.now()) };
                    ws_sender.send(WsMessage::Text(serde_json::to_string(&stamped)?)).await?;
                }
                AuthorityRequest::Delay => {
                    let reply = AuthorityResponse::DelayReply { timestamp: self.authority.now() };
                    ws_sender.send(WsMessage::Text(serde_json::to_string(&reply)?)).await?;
                }
            }
            break;
        }

        ws_sender.close().await.map_err(ClockSyncError::from)
    }
}
