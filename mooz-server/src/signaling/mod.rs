mod http_handler;
mod router;
mod ws_handler;

pub use http_handler::{drain_messages, post_message, unacceptable_method};
pub use router::router;
pub use ws_handler::ws_handler;
