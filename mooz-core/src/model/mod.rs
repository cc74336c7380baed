mod id;
mod message;
mod signaling;

pub use id::{Id, IdError};
pub use message::{Envelope, Message};
pub use signaling::{IceCandidate, IceServerConfig, SignalData};
