use crate::api::ApiState;
use crate::relay::InboundFrame;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::time::{interval, sleep_until, Instant};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
) -> Response {
    ws.max_message_size(state.max_frame_size)
        .max_frame_size(state.max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Bind one socket to the connection fabric: a writer task drains the
/// connection's outbound queue, the reader loop feeds inbound frames to the
/// hub in arrival order. Either side closing tears the connection down.
async fn handle_socket(socket: WebSocket, state: ApiState) {
    let (connection_id, mut outbound) = state.hub.fabric().register();
    tracing::debug!(connection_id, "websocket connected");

    let (mut sink, mut stream) = socket.split();

    let heartbeat_interval = state.heartbeat_interval;
    let writer = tokio::spawn(async move {
        let mut ping = interval(heartbeat_interval);
        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to encode outbound frame");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut deadline = Instant::now() + state.heartbeat_timeout;
    loop {
        let message = tokio::select! {
            message = stream.next() => message,
            _ = sleep_until(deadline) => {
                tracing::debug!(connection_id, "heartbeat timeout");
                break;
            }
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                deadline = Instant::now() + state.heartbeat_timeout;
                match serde_json::from_str::<InboundFrame>(&text) {
                    // Sequential dispatch preserves this publisher's FIFO order.
                    Ok(frame) => state.hub.handle_frame(&connection_id, frame).await,
                    Err(e) => {
                        tracing::debug!(connection_id, error = %e, "ignoring malformed frame");
                    }
                }
            }
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                deadline = Instant::now() + state.heartbeat_timeout;
            }
            Some(Ok(Message::Binary(_))) => {
                deadline = Instant::now() + state.heartbeat_timeout;
                tracing::debug!(connection_id, "ignoring binary frame");
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::debug!(connection_id, error = %e, "websocket read error");
                break;
            }
        }
    }

    state.hub.handle_disconnect(&connection_id).await;
    writer.abort();
    tracing::debug!(connection_id, "websocket closed");
}
