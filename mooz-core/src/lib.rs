pub mod model;
pub mod relay;

pub use model::*;
pub use relay::{MessageRelay, RelayError, Subscription};
