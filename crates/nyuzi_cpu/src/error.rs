use std::fmt;

/// Emulator-only hard failures (spec §7): never raised for architectural
/// traps, which the trap handler always recovers from. These are
/// configuration/host-level mistakes the interpreter cannot run through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// `num_cores * threads_per_core` exceeds the 32-bit thread enable mask.
    TooManyThreads { num_cores: u32, threads_per_core: u32 },
    /// A requested thread, core, or control register index does not exist.
    OutOfRange { what: &'static str, index: u32 },
    /// The hex image is malformed or does not fit the configured memory.
    HexLoad(String),
    /// A translated physical address, or an MMIO access of the wrong size,
    /// landed outside the addressable range.
    BadPhysicalAddress(u32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TooManyThreads { num_cores, threads_per_core } => {
                write!(f, "{num_cores} cores * {threads_per_core} threads/core exceeds the 32-thread enable mask")
            }
            Error::OutOfRange { what, index } => write!(f, "{what} index {index} out of range"),
            Error::HexLoad(msg) => write!(f, "failed to load hex image: {msg}"),
            Error::BadPhysicalAddress(addr) => write!(f, "physical address {addr:#010x} out of range"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
