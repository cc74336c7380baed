mod config;
mod relay;
mod server;
mod signaling;

pub use config::*;
pub use relay::*;
pub use server::*;
pub use signaling::*;
