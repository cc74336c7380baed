use crate::relay::MemoryRelay;
use crate::signaling::{drain_messages, post_message, unacceptable_method, ws_handler};
use axum::Router;
use axum::routing::get;

/// Relay routes over `relay`, without CORS or tracing layers.
pub fn router(relay: MemoryRelay) -> Router {
    Router::new()
        .route(
            "/messages/{id}",
            get(drain_messages)
                .post(post_message)
                .fallback(unacceptable_method),
        )
        .route("/subscribe/{id}", get(ws_handler))
        .with_state(relay)
}
