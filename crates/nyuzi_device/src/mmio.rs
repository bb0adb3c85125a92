//! The MMIO register window (spec §6.4): serial console, PS/2 keyboard,
//! SPI block device, thread resume/halt, timer countdown, and the VGA
//! framebuffer base/microcode-sequencer registers, all multiplexed behind
//! one [`nyuzi_cpu::MmioDevice`] implementation.
//!
//! Thread resume/halt and the timer countdown are requests the device
//! cannot act on itself — only [`nyuzi_cpu::Processor`] owns that state —
//! so they're queued here and drained by the run loop once per quantum
//! rather than applied synchronously on write.

use std::sync::{Arc, Mutex};

use nyuzi_common::{log_warning, LogCategory};
use nyuzi_cpu::MmioDevice;

use crate::block_device::BlockDevice;
use crate::scancode::KeyboardController;

fn category() -> LogCategory {
    LogCategory::new("device")
}

const SERIAL_OUTPUT: u32 = 0x00;
const SERIAL_STATUS: u32 = 0x04;
const KEYBOARD_STATUS: u32 = 0x08;
const KEYBOARD_DATA: u32 = 0x0c;
const SPI_DATA_IN: u32 = 0x10;
const SPI_DATA_OUT: u32 = 0x14;
const SPI_STATUS: u32 = 0x18;
const SPI_CONTROL: u32 = 0x1c;
const SPI_CLOCK_DIVIDE: u32 = 0x20;
const THREAD_RESUME: u32 = 0x24;
const THREAD_HALT: u32 = 0x28;
const TIMER_INTERRUPT_COUNT: u32 = 0x2c;
const VGA_BASE: u32 = 0x30;
const VGA_SEQUENCER: u32 = 0x34;
const THREAD_ENABLE_MASK_MIRROR: u32 = 0x38;

/// One core/processor's device window. Registers are offsets from
/// [`nyuzi_cpu::memory::DEVICE_BASE`]; [`MmioDevice::read`]/`write` mask the
/// incoming address down to the offset.
pub struct DeviceWindow {
    pub serial_out: Vec<u8>,
    keyboard: KeyboardController,
    block_device: Option<BlockDevice>,
    spi_chip_select: bool,
    spi_last_response: u8,
    pending_resume: u32,
    pending_halt: u32,
    pending_timer_countdown: Option<u32>,
    vga_base: u32,
    vga_program: Vec<u32>,
    thread_enable_mask_mirror: u32,
}

impl DeviceWindow {
    pub fn new(block_device: Option<BlockDevice>) -> Self {
        Self {
            serial_out: Vec::new(),
            keyboard: KeyboardController::new(),
            block_device,
            spi_chip_select: false,
            spi_last_response: 0xff,
            pending_resume: 0,
            pending_halt: 0,
            pending_timer_countdown: None,
            vga_base: 0,
            vga_program: Vec::new(),
            thread_enable_mask_mirror: 1,
        }
    }

    pub fn keyboard_mut(&mut self) -> &mut KeyboardController {
        &mut self.keyboard
    }

    /// Drains the resume/halt requests accumulated since the last call; the
    /// run loop ORs/AND-NOTs these into `Processor::thread_enable_mask`.
    pub fn take_pending_thread_control(&mut self) -> (u32, u32) {
        (std::mem::take(&mut self.pending_resume), std::mem::take(&mut self.pending_halt))
    }

    pub fn take_pending_timer_countdown(&mut self) -> Option<u32> {
        self.pending_timer_countdown.take()
    }

    /// Called by the run loop each quantum so `THREAD_ENABLE_MASK_MIRROR`
    /// reflects the processor's real state (spec SUPPLEMENT: a read-only
    /// mirror register for host tooling).
    pub fn set_thread_enable_mask_mirror(&mut self, mask: u32) {
        self.thread_enable_mask_mirror = mask;
    }

    pub fn vga_base(&self) -> u32 {
        self.vga_base
    }
}

impl MmioDevice for DeviceWindow {
    fn read(&mut self, address: u32) -> u32 {
        match address & 0xff {
            SERIAL_STATUS => 1,
            KEYBOARD_STATUS => !self.keyboard.queue.is_empty() as u32,
            KEYBOARD_DATA => self.keyboard.queue.pop().unwrap_or(0) as u32,
            SPI_DATA_OUT => self.spi_last_response as u32,
            SPI_STATUS => 1, // transfers complete synchronously in this model
            VGA_BASE => self.vga_base,
            THREAD_ENABLE_MASK_MIRROR => self.thread_enable_mask_mirror,
            other => {
                log_warning!(category(), "read from unmapped MMIO offset {other:#x}");
                0
            }
        }
    }

    fn write(&mut self, address: u32, value: u32) {
        match address & 0xff {
            SERIAL_OUTPUT => self.serial_out.push(value as u8),
            SPI_CONTROL => self.spi_chip_select = value & 1 != 0,
            SPI_CLOCK_DIVIDE => {} // timing not modeled
            SPI_DATA_IN => {
                if self.spi_chip_select {
                    if let Some(dev) = &mut self.block_device {
                        self.spi_last_response = dev.clock(value as u8);
                    }
                }
            }
            THREAD_RESUME => self.pending_resume |= value,
            THREAD_HALT => self.pending_halt |= value,
            TIMER_INTERRUPT_COUNT => self.pending_timer_countdown = Some(value),
            VGA_BASE => self.vga_base = value,
            VGA_SEQUENCER => self.vga_program.push(value),
            other => log_warning!(category(), "write to unmapped MMIO offset {other:#x} (value {value:#x})"),
        }
    }
}

/// `Processor::attach_device` takes ownership of its `Box<dyn MmioDevice>`
/// with no way to get it back, but the run loop needs to drain
/// `take_pending_thread_control`/`take_pending_timer_countdown` every
/// quantum (see module doc). This wraps a [`DeviceWindow`] behind a shared
/// handle the run loop keeps a clone of, so `attach_device` still gets a
/// plain `MmioDevice` impl and the loop still gets its drain access.
#[derive(Clone)]
pub struct SharedDeviceWindow(Arc<Mutex<DeviceWindow>>);

impl SharedDeviceWindow {
    pub fn new(window: DeviceWindow) -> Self {
        Self(Arc::new(Mutex::new(window)))
    }

    pub fn take_pending_thread_control(&self) -> (u32, u32) {
        self.0.lock().unwrap().take_pending_thread_control()
    }

    pub fn take_pending_timer_countdown(&self) -> Option<u32> {
        self.0.lock().unwrap().take_pending_timer_countdown()
    }

    pub fn set_thread_enable_mask_mirror(&self, mask: u32) {
        self.0.lock().unwrap().set_thread_enable_mask_mirror(mask);
    }

    pub fn keyboard_event(&self, key: crate::scancode::Key, pressed: bool) {
        self.0.lock().unwrap().keyboard_mut().key_event(key, pressed);
    }

    pub fn vga_base(&self) -> u32 {
        self.0.lock().unwrap().vga_base()
    }
}

impl MmioDevice for SharedDeviceWindow {
    fn read(&mut self, address: u32) -> u32 {
        self.0.lock().unwrap().read(address)
    }

    fn write(&mut self, address: u32, value: u32) {
        self.0.lock().unwrap().write(address, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scancode::Key;

    #[test]
    fn serial_status_always_reports_ready() {
        let mut dev = DeviceWindow::new(None);
        assert_eq!(dev.read(SERIAL_STATUS), 1);
    }

    #[test]
    fn serial_output_appends_bytes() {
        let mut dev = DeviceWindow::new(None);
        dev.write(SERIAL_OUTPUT, b'h' as u32);
        dev.write(SERIAL_OUTPUT, b'i' as u32);
        assert_eq!(dev.serial_out, b"hi");
    }

    #[test]
    fn keyboard_status_and_data_track_the_queue() {
        let mut dev = DeviceWindow::new(None);
        assert_eq!(dev.read(KEYBOARD_STATUS), 0);
        dev.keyboard_mut().key_event(Key::Letter(b'a'), true);
        assert_eq!(dev.read(KEYBOARD_STATUS), 1);
        assert_ne!(dev.read(KEYBOARD_DATA), 0);
        assert_eq!(dev.read(KEYBOARD_STATUS), 0);
    }

    #[test]
    fn thread_resume_and_halt_requests_accumulate_until_drained() {
        let mut dev = DeviceWindow::new(None);
        dev.write(THREAD_RESUME, 0b0110);
        dev.write(THREAD_RESUME, 0b1000);
        dev.write(THREAD_HALT, 0b0001);
        assert_eq!(dev.take_pending_thread_control(), (0b1110, 0b0001));
        assert_eq!(dev.take_pending_thread_control(), (0, 0));
    }

    #[test]
    fn spi_writes_are_ignored_while_chip_select_is_deasserted() {
        let mut dev = DeviceWindow::new(Some(BlockDevice::new(vec![0; 512])));
        dev.write(SPI_DATA_IN, 0x40);
        assert_eq!(dev.read(SPI_DATA_OUT), 0xff);
    }
}
