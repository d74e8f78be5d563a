pub mod clock;
pub mod frames;
pub mod source;

pub use clock::Clock;
pub use frames::{FrameIntervals, FrameStats};
pub use source::{ManualSource, MonotonicSource, TimeSource};
