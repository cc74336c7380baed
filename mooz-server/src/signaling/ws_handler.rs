use crate::relay::MemoryRelay;
use crate::signaling::http_handler::error_response;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use mooz_core::Id;
use serde_json::Value;
use tracing::{error, info};

/// `GET /subscribe/{id}`: push delivery over a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(relay): State<MemoryRelay>,
) -> Response {
    let Ok(id) = Id::parse(&id) else {
        return error_response(StatusCode::BAD_REQUEST, "Malformed ID");
    };

    ws.on_upgrade(move |socket| handle_socket(socket, id, relay))
        .into_response()
}

async fn handle_socket(socket: WebSocket, id: Id, relay: MemoryRelay) {
    info!("New push subscriber: {}", id);

    let (mut sender, mut receiver) = socket.split();
    let mut subscription = relay.attach(&id);
    let mut undelivered: Option<Value> = None;

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },

            outgoing = subscription.recv() => {
                let Some(message) = outgoing else {
                    info!("Push subscriber for {} replaced by a newer one", id);
                    break;
                };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize message for {}: {}", id, e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    undelivered = Some(message);
                    break;
                }
            }
        }
    }

    // Whatever the socket never carried goes back to the mailbox.
    subscription.release(undelivered.into_iter().collect());

    info!("Push subscriber disconnected: {}", id);
}
