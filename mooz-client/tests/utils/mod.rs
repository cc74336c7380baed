pub mod relay_helpers;

pub use fake_transport::*;
pub use mock_behavior::*;
pub use relay_helpers::*;
