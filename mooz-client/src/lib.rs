mod config;
mod negotiation;
mod relay;
mod room;
mod signaling;
mod transport;

pub use config::*;
pub use negotiation::*;
pub use relay::*;
pub use room::*;
pub use signaling::*;
pub use transport::*;
