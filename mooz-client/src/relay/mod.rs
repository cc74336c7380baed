mod http_relay;

pub use http_relay::*;
