mod memory_relay;

pub use memory_relay::*;
