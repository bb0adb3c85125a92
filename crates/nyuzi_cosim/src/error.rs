use std::fmt;

/// A fatal cosimulation error (spec §4.11): either the event stream is
/// malformed, or the emulator's side effects disagree with the reference.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// A line from the reference stream could not be parsed as an event.
    BadEvent { line: usize, text: String },
    /// The emulator produced no architecturally visible side effect within
    /// 500 instructions of the expected event (spec §4.11's timeout).
    Timeout { thread: u32, expected: String },
    /// The emulator's side effect disagreed with the reference's.
    Mismatch { expected: String, actual: String },
    /// The reference reported `***HALTED***` but the emulator produced a
    /// further side effect afterward.
    UnexpectedAfterHalt { actual: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadEvent { line, text } => write!(f, "line {line}: malformed cosim event: {text:?}"),
            Error::Timeout { thread, expected } => {
                write!(f, "thread {thread}: no side effect produced within 500 instructions (expected {expected})")
            }
            Error::Mismatch { expected, actual } => write!(f, "cosim mismatch: expected {expected}, got {actual}"),
            Error::UnexpectedAfterHalt { actual } => write!(f, "reference halted but emulator produced {actual}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
