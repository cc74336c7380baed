mod calling;
mod negotiator;

pub use calling::*;
pub use negotiator::*;
