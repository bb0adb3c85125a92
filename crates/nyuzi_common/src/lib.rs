//! Ambient infrastructure shared by every Nyuzi crate: structured logging and
//! the frame-scoped memory arena the renderer resets every frame.

pub mod arena;
pub mod logging;

pub use arena::{FrameArena, SliceArray};
pub use logging::{set_logger, CapturingLogger, ConsoleLogger, LogCategory, LogLevel, Logger};
