//! WebSocket client for a remote clock authority

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures::SinkExt;
use session_core::Timestamp;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::authority::{ClockAuthority, SyncReply, SyncStream};
use crate::error::{ClockSyncError, SyncResult};
use crate::messages::{AuthorityRequest, AuthorityResponse};

type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`ClockAuthority`] reached over `ws://` or `wss://`
#[derive(Debug, Clone)]
pub struct WsAuthority {
    url: String,
}

impl WsAuthority {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn open(&self, request: AuthorityRequest) -> SyncResult<WsConnection> {
        let (mut ws, _) = connect_async(self.url.as_str()).await?;
        ws.send(WsMessage::Text(serde_json::to_string(&request)?)).await?;
        Ok(ws)
    }
}

/// Next text frame, skipping control frames. None once the authority closes.
async fn next_response(ws: &mut WsConnection) -> Option<SyncResult<AuthorityResponse>> {
    loop {
        match ws.next().await? {
            Ok(WsMessage::Text(text)) => {
                return Some(serde_json::from_str(&text).map_err(ClockSyncError::from))
            }
            Ok(WsMessage::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => return Some(Err(e.into())),
        }
    }
}

#[async_trait]
impl ClockAuthority for WsAuthority {
    async fn sync(&self) -> SyncResult<SyncStream> {
        let ws = self.open(AuthorityRequest::Sync).await?;

        let replies = stream::unfold(Some(ws), |state| async move {
            let mut ws = state?;
            let item = match next_response(&mut ws).await? {
                Ok(AuthorityResponse::SyncReply { timestamp }) => Ok(SyncReply { timestamp }),
                Ok(AuthorityResponse::Error { message }) => {
                    Err(ClockSyncError::ProtocolViolation(message))
                }
                Ok(other) => Err(ClockSyncError::ProtocolViolation(format!(
                    "unexpected frame in sync stream: {other:?}"
                ))),
                Err(e) => Err(e),
            };
            let next = if item.is_ok() { Some(ws) } else { None };
            Some((item, next))
        });

        Ok(replies.boxed())
    }

    async fn delay(&self) -> SyncResult<Timestamp> {
        let mut ws = self.open(AuthorityRequest::Delay).await?;
        let response = next_response(&mut ws).await.ok_or_else(|| {
            ClockSyncError::ProtocolViolation("authority closed before answering delay".to_string())
        })??;
        // Best effort; the reply is already in hand.
        let _ = ws.close(None).await;

        match response {
            AuthorityResponse::DelayReply { timestamp } => Ok(timestamp),
            AuthorityResponse::Error { message } => Err(ClockSyncError::ProtocolViolation(message)),
            other => Err(ClockSyncError::ProtocolViolation(format!(
                "unexpected delay reply: {other:?}"
            ))),
        }
    }
}
