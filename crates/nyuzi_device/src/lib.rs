//! Collaborator device models plumbed through the MMIO register window
//! (spec §4.13, §6.4): a read-only SPI-SDMMC block device, a PS/2 scancode
//! queue, and the register multiplexer ([`mmio::DeviceWindow`]) that
//! implements [`nyuzi_cpu::MmioDevice`] and is handed to
//! [`nyuzi_cpu::Processor::attach_device`].

pub mod block_device;
pub mod mmio;
pub mod scancode;

pub use block_device::BlockDevice;
pub use mmio::{DeviceWindow, SharedDeviceWindow};
pub use scancode::{Key, KeyboardController, ScancodeQueue};
