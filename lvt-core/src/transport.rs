//! axum WebSocket glue: upgrades a request into a socket, drives a
//! [`PageSession`]'s single processing loop, and tears it down on close.

use crate::session::{Outbound, PageSession};
use crate::store::Authenticator;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// An inbound client frame: an action name and its payload. `payload` is
/// decoded as plain JSON and converted to [`lvt_template::Value`]
/// afterward, since the template data model doesn't derive `serde` itself.
#[derive(Debug, Deserialize)]
pub struct InboundAction {
    pub action: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// An outbound frame: the patch and any response metadata.
#[derive(Debug, Serialize)]
struct WireOutbound {
    patch: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<crate::session::ResponseMetadata>,
}

/// Upgrades an HTTP request to a WebSocket and, if the upgrade succeeds,
/// runs `session` to completion on it. `session` and its outbound receiver
/// are expected to already be past `render_initial` — the caller sends the
/// initial HTML over the plain HTTP response before ever reaching here.
pub fn upgrade(
    ws: WebSocketUpgrade,
    session: Arc<PageSession>,
    outbound_rx: tokio::sync::mpsc::Receiver<Outbound>,
) -> Response {
    ws.on_upgrade(|socket| async move {
        run_session_on_socket(socket, session, outbound_rx).await;
    })
    .into_response()
}

/// Authenticates a connecting request and resolves the broadcast group it
/// should join, per the registered [`Authenticator`]. Returns `None` if
/// the authenticator rejects the connection.
pub async fn authenticate(
    authenticator: &dyn Authenticator,
    parts: &http::request::Parts,
) -> Option<(String, String)> {
    let user_id = authenticator.identify(parts).await?;
    let group_id = authenticator.group_of(parts).await.unwrap_or_else(|| user_id.clone());
    Some((user_id, group_id))
}

async fn run_session_on_socket(
    socket: WebSocket,
    session: Arc<PageSession>,
    mut outbound_rx: tokio::sync::mpsc::Receiver<Outbound>,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut ping_interval = interval(Duration::from_secs(30));

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(err) = handle_inbound_text(&text, &session).await {
                            if err.closes_session() {
                                tracing::warn!(%err, "closing session after fatal inbound error");
                                session.close().await;
                                break;
                            }
                            tracing::warn!(%err, "failed to apply inbound action");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!(%err, "websocket read error");
                        break;
                    }
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(outbound) => {
                        if send_outbound(&mut sender, &outbound).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    session.close().await;
}

async fn handle_inbound_text(text: &str, session: &PageSession) -> Result<(), crate::error::SessionError> {
    let inbound: InboundAction = serde_json::from_str(text)
        .map_err(|err| crate::error::SessionError::Transport(err.to_string()))?;
    session.apply_action(&inbound.action, inbound.payload.into()).await
}

async fn send_outbound(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    outbound: &Outbound,
) -> Result<(), axum::Error> {
    let wire = WireOutbound { patch: outbound.patch.clone(), meta: outbound.meta.clone() };
    let text = serde_json::to_string(&wire).unwrap_or_else(|_| "{}".to_string());
    sender.send(Message::Text(text)).await
}
