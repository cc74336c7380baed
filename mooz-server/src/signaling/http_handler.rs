use crate::relay::MemoryRelay;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use mooz_core::Id;
use serde_json::{Value, json};
use tracing::{debug, warn};

pub(crate) fn error_response(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "error": error }))).into_response()
}

/// `POST /messages/{id}`: queue one message for `id`.
pub async fn post_message(
    Path(id): Path<String>,
    State(relay): State<MemoryRelay>,
    body: Bytes,
) -> Response {
    let Ok(to) = Id::parse(&id) else {
        return error_response(StatusCode::BAD_REQUEST, "Malformed ID");
    };

    if body.iter().all(u8::is_ascii_whitespace) {
        return error_response(StatusCode::BAD_REQUEST, "Missing Body");
    }

    let message = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Null) => return error_response(StatusCode::BAD_REQUEST, "Missing Body"),
        Ok(message @ Value::Object(_)) => message,
        Ok(_) => return error_response(StatusCode::BAD_REQUEST, "Malformed Body"),
        Err(e) => {
            warn!("Rejected message for {}: {}", to, e);
            return error_response(StatusCode::BAD_REQUEST, "Malformed Body");
        }
    };

    debug!("Queued message for {}", to);
    relay.push(message, &to);

    (StatusCode::OK, Json(json!({ "message": "ok" }))).into_response()
}

/// `GET /messages/{id}`: drain everything queued for `id`.
pub async fn drain_messages(Path(id): Path<String>, State(relay): State<MemoryRelay>) -> Response {
    let Ok(to) = Id::parse(&id) else {
        return error_response(StatusCode::BAD_REQUEST, "Malformed ID");
    };

    let messages = relay.drain(&to);
    if !messages.is_empty() {
        debug!("Delivering {} messages to {}", messages.len(), to);
    }

    (StatusCode::OK, Json(json!({ "messages": messages }))).into_response()
}

pub async fn unacceptable_method() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "Unacceptable Method")
}
