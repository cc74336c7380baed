pub use mooz_core::Id;

pub mod model {
    pub use mooz_core::model::*;
    pub use mooz_core::{MessageRelay, RelayError, Subscription};
}

#[cfg(feature = "server")]
pub mod server {
    pub use mooz_server::*;
}

#[cfg(feature = "client")]
pub mod client {
    pub use mooz_client::*;
}
