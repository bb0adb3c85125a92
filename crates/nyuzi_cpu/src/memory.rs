//! Physical memory plus the MMIO register window (spec §4.9 memory
//! sub-ops, §6.4). The interpreter core only ever addresses this through
//! [`Memory`]; the MMIO window is handed off to whatever implements
//! [`MmioDevice`] so `nyuzi_device` can own serial/keyboard/SD/VGA state
//! without `nyuzi_cpu` depending on it.

/// Addresses `>= DEVICE_BASE` are the MMIO register window (spec §6.4).
pub const DEVICE_BASE: u32 = 0xffff_0000;

/// Collaborator contract for memory-mapped I/O (spec §1's device glue):
/// every access through this window is a 32-bit long (the interpreter
/// treats any other access size here as an emulator-only error).
pub trait MmioDevice {
    fn read(&mut self, address: u32) -> u32;
    fn write(&mut self, address: u32, value: u32);
}

/// A device window with nothing attached: reads as zero, writes are
/// dropped. Used when the CLI does not attach a block device/host.
#[derive(Default)]
pub struct NullDevice;

impl MmioDevice for NullDevice {
    fn read(&mut self, _address: u32) -> u32 {
        0
    }
    fn write(&mut self, _address: u32, _value: u32) {}
}

/// Flat physical address space backing every core (spec §3.2 Processor:
/// "arena of memory"). `CACHE_LINE_LENGTH`-aligned block accesses are what
/// the synchronized-store scoreboard and block vector ops key off of.
pub const CACHE_LINE_LENGTH: u32 = 64;

pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    pub fn new(size: u32) -> Self {
        Self { bytes: vec![0u8; size as usize] }
    }

    pub fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn is_device_address(address: u32) -> bool {
        address & 0xffff_0000 == DEVICE_BASE
    }

    /// `None` if `address..address+len` falls outside physical memory (and
    /// isn't a device address) — the caller turns this into the
    /// "translated physical address out of range" hard failure (spec §7).
    pub fn in_range(&self, address: u32, len: u32) -> bool {
        Self::is_device_address(address) || (address as u64 + len as u64 <= self.bytes.len() as u64)
    }

    pub fn read_u8(&self, address: u32) -> u8 {
        self.bytes.get(address as usize).copied().unwrap_or(0xff)
    }

    pub fn write_u8(&mut self, address: u32, value: u8) {
        if let Some(slot) = self.bytes.get_mut(address as usize) {
            *slot = value;
        }
    }

    pub fn read_u16(&self, address: u32) -> u16 {
        u16::from_le_bytes([self.read_u8(address), self.read_u8(address + 1)])
    }

    pub fn write_u16(&mut self, address: u32, value: u16) {
        let b = value.to_le_bytes();
        self.write_u8(address, b[0]);
        self.write_u8(address + 1, b[1]);
    }

    pub fn read_u32(&self, address: u32) -> u32 {
        u32::from_le_bytes([self.read_u8(address), self.read_u8(address + 1), self.read_u8(address + 2), self.read_u8(address + 3)])
    }

    pub fn write_u32(&mut self, address: u32, value: u32) {
        let b = value.to_le_bytes();
        self.write_u8(address, b[0]);
        self.write_u8(address + 1, b[1]);
        self.write_u8(address + 2, b[2]);
        self.write_u8(address + 3, b[3]);
    }

    /// Copies `len` bytes starting at `address` out of physical memory, for
    /// the host-side uses that want a flat byte range rather than
    /// word-at-a-time access: the `-d` memory dump and scanning the VGA
    /// framebuffer out to a [`nyuzi_host::HostWindow`] (spec §6.2, §6.4).
    /// Bytes past the end of memory read as `0xff`, matching `read_u8`.
    pub fn read_bytes(&self, address: u32, len: u32) -> Vec<u8> {
        (0..len).map(|i| self.read_u8(address.wrapping_add(i))).collect()
    }

    /// Loads a big-endian-per-line hex image, byte-swapped so words land
    /// little-endian in memory (spec §6.3).
    pub fn load_hex_image(&mut self, text: &str) -> Result<(), crate::Error> {
        let mut address = 0u32;
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let word = u32::from_str_radix(line, 16).map_err(|_| crate::Error::HexLoad(format!("line {}: not a hex word", lineno + 1)))?;
            if !self.in_range(address, 4) {
                return Err(crate::Error::HexLoad("image does not fit the configured memory size".into()));
            }
            self.write_u32(address, word.swap_bytes());
            address += 4;
        }
        Ok(())
    }
}
