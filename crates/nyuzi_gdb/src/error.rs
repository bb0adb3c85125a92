use std::fmt;

/// Emulator-only failures in the debug stub's host I/O (spec §7: "protocol
/// framing errors close the current client socket and re-accept"). Protocol
/// mistakes from the client (unknown packets, bad register IDs, out-of-range
/// memory) are never errors here — they get an empty or best-effort reply,
/// per spec, rather than tearing down the connection.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "gdb stub I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
