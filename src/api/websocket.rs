//! WebSocket handler for the monitor stream

use std::net::SocketAddr;

use axum::{
    extract::{
        ConnectInfo, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, header::USER_AGENT},
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::api::{state::ApiState, types::StreamQuery};
use crate::sessions::{ADMIN_ROLE, SessionInfo};

/// WebSocket upgrade handler
///
/// GET /api/v1/monitor/stream
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let info = SessionInfo {
        user_id: query.user_id.unwrap_or_else(|| ADMIN_ROLE.to_string()),
        role: query.role.unwrap_or_else(|| ADMIN_ROLE.to_string()),
        ip: Some(addr.ip().to_string()),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    ws.on_upgrade(|socket| handle_websocket(socket, state, info))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: ApiState, info: SessionInfo) {
    let (session, mut kill_rx) = match state.sessions.connect(info).await {
        Ok(registered) => registered,
        Err(e) => {
            error!("failed to register monitor session: {}", e);
            return;
        }
    };
    let connection_id = session.connection_id.clone();
    let audience = session.clone();

    let (mut sender, mut receiver) = socket.split();

    // Subscribe before greeting so nothing raised in between is missed
    let mut events = state.monitor_tx.subscribe();

    let greeting = serde_json::json!({
        "event": "session:connected",
        "data": session,
    });
    if sender
        .send(Message::Text(greeting.to_string()))
        .await
        .is_err()
    {
        state.sessions.disconnect(&connection_id).await;
        return;
    }

    // Spawn task to forward events to WebSocket
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut kill_rx => {
                    debug!("session terminated, closing socket");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }

                event = events.recv() => match event {
                    Ok(event) if !event.is_visible_to(&audience) => {}
                    Ok(event) => {
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("failed to serialize monitor event: {}", e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(text)).await.is_err() {
                            debug!("WebSocket send failed, client disconnected");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("monitor session lagged, {} events dropped", skipped);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                },
            }
        }
    });

    // Clients only listen; drain until they close
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    state.sessions.disconnect(&connection_id).await;
    info!("monitor session {} disconnected", connection_id);
}
