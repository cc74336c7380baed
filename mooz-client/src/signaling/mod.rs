mod inbound;
mod pacer;
mod session;

pub use session::*;
