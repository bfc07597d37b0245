//! WebSocket transport for the realtime router.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::error::Result;
use crate::services::realtime::{ConnectionHandle, EventRouter, Frame};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ConnectQuery {
    pub token: String,
}

/// GET /ws?token=…: authenticate, then upgrade.
///
/// Authentication happens before the upgrade, so a rejected client gets a
/// plain HTTP error and never holds a subscription.
pub async fn connect(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse> {
    let handle = state.router.connect_token(&query.token).await?;
    let router = Arc::clone(&state.router);
    // Released with the upgrade callback, so an abandoned handshake unregisters too.
    let guard = router.guard(handle.id);

    Ok(ws
        .on_failed_upgrade(|e| tracing::debug!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| async move {
            let _guard = guard;
            serve_connection(socket, router, handle).await;
        }))
}

async fn send_frame(sink: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> bool {
    match sonic_rs::to_string(frame) {
        Ok(json) => sink.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to encode realtime frame: {}", e);
            true
        }
    }
}

async fn serve_connection(socket: WebSocket, router: Arc<EventRouter>, handle: ConnectionHandle) {
    let ConnectionHandle {
        id,
        mut frames,
        cancel,
        expires_at,
        ..
    } = handle;
    let (mut sink, mut stream) = socket.split();

    let until_expiry = (expires_at - Utc::now()).to_std().unwrap_or_default();
    let expiry = tokio::time::sleep(until_expiry);
    tokio::pin!(expiry);

    let close_reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Flush what was queued before eviction, e.g. the closing notice.
                while let Ok(frame) = frames.try_recv() {
                    if !send_frame(&mut sink, &frame).await {
                        break;
                    }
                }
                break Some("Session ended");
            }
            _ = &mut expiry => {
                tracing::info!(connection_id = id, "⌛ Realtime token expired");
                let _ = send_frame(&mut sink, &Frame::Closed {
                    reason: "token_expired".to_string(),
                    message: "Your access has expired".to_string(),
                }).await;
                break Some("Token expired");
            }
            outbound = frames.recv() => {
                match outbound {
                    Some(frame) => {
                        if !send_frame(&mut sink, &frame).await {
                            break None;
                        }
                    }
                    None => break Some("Session ended"),
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let reply = router.handle_client_frame(id, text.as_str()).await;
                        if !send_frame(&mut sink, &reply).await {
                            break None;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let reply = Frame::Error { message: "Binary frames are not supported".to_string() };
                        if !send_frame(&mut sink, &reply).await {
                            break None;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = id, "WebSocket error: {}", e);
                        break None;
                    }
                    // Ping/Pong are answered by the protocol layer.
                    _ => {}
                }
            }
        }
    };

    router.disconnect(id);

    if let Some(reason) = close_reason {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: reason.into(),
            })))
            .await;
    }

    tracing::info!(connection_id = id, "🔌 WebSocket closed");
}
