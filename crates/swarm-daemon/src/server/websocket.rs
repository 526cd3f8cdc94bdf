use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{extract::State, response::IntoResponse};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use swarm_bridge::{ClientAction, ClientMessage, EventFilter, Notification, NotificationKind};

use super::state::ApiState;

/// WebSocket GET /ws -- the persistent notification channel.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection loop: welcome replay, subscription filtering,
/// heartbeat pings, client message handling. A failed send means the
/// socket is gone and the client is evicted; slow clients never see a
/// backpressure error.
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let rx = state.bus.subscribe();
    let mut filter: Option<EventFilter> = None;

    // Welcome: a system-health event carrying the recent buffer.
    let replay = state.bus.history(state.config.notifications.welcome_replay);
    let welcome = Notification::new(
        NotificationKind::SystemHealth,
        json!({
            "message": "connected",
            "bufferedEvents": replay,
        }),
    );
    if send_event(&mut ws_tx, &welcome).await.is_err() {
        return;
    }

    let mut ping = tokio::time::interval(std::time::Duration::from_secs(
        state.config.notifications.ping_secs.max(1),
    ));
    ping.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            // Forward bus events the client's filter admits.
            result = rx.recv_async() => {
                match result {
                    Ok(event) => {
                        let admitted = filter.as_ref().map_or(true, |f| f.matches(&event));
                        if admitted && send_event(&mut ws_tx, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }

            // Heartbeat; a failed ping evicts the client.
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }

            // Client messages: subscribe / unsubscribe / history.
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                if handle_client_message(&state, &mut ws_tx, &mut filter, msg)
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Err(e) => debug!(error = %e, "ignoring malformed client message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // pong, binary, etc.
                }
            }
        }
    }
}

async fn handle_client_message(
    state: &Arc<ApiState>,
    ws_tx: &mut (impl SinkExt<Message> + Unpin),
    filter: &mut Option<EventFilter>,
    msg: ClientMessage,
) -> Result<(), ()> {
    match msg.action {
        ClientAction::Subscribe => {
            *filter = msg.filter;
            debug!("client subscription updated");
        }
        ClientAction::Unsubscribe => {
            *filter = None;
        }
        ClientAction::History => {
            let limit = state.config.notifications.welcome_replay;
            let events = state.bus.history(state.config.notifications.history_limit);
            let matching: Vec<&Notification> = events
                .iter()
                .filter(|e| {
                    msg.filter
                        .as_ref()
                        .or(filter.as_ref())
                        .map_or(true, |f| f.matches(e))
                })
                .collect();
            let skip = matching.len().saturating_sub(limit);
            for event in matching.into_iter().skip(skip) {
                send_event(ws_tx, event).await?;
            }
        }
    }
    Ok(())
}

async fn send_event(
    ws_tx: &mut (impl SinkExt<Message> + Unpin),
    event: &Notification,
) -> Result<(), ()> {
    let json = serde_json::to_string(event).unwrap_or_default();
    ws_tx.send(Message::Text(json.into())).await.map_err(|_| ())
}
