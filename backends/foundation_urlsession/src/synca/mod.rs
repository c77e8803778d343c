mod completion;
mod latch;
mod queue;

pub use completion::*;
pub use latch::*;
pub use queue::*;
