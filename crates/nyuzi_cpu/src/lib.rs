//! Cycle-approximate interpreter for the Nyuzi vector-SIMD ISA (spec
//! §4.9-§4.11): register file, decode/execute, the software-managed MMU,
//! trap/interrupt dispatch, and the memory/MMIO model one core's threads
//! share. The remote debug stub (`nyuzi_gdb`), the cosimulation validator
//! (`nyuzi_cosim`), and the device models (`nyuzi_device`) are all built on
//! top of [`Processor`] rather than folded into it, so this crate has no
//! dependency on any of them.

pub mod core;
pub mod error;
pub mod isa;
pub mod memory;
pub mod mmu;
pub mod trap;

pub use crate::core::{Breakpoint, Core, Flags, Processor, RegisterFile, SideEffect, Thread};
pub use error::{Error, Result};
pub use memory::{MmioDevice, NullDevice};
