//! SPI-attached block storage (spec §4.13): a byte-at-a-time state machine
//! modeling the handful of SD-style commands the firmware issues, backing
//! onto an in-memory image read once at attach time.

use nyuzi_common::{log_warning, LogCategory};

fn category() -> LogCategory {
    LogCategory::new("device")
}

const CMD_GO_IDLE: u8 = 0;
const CMD_INIT: u8 = 1;
const CMD_SET_BLOCKLEN: u8 = 16;
const CMD_READ_SINGLE_BLOCK: u8 = 17;

/// Idle byte a device returns on MISO when it has nothing to say.
const IDLE_BYTE: u8 = 0xff;

#[derive(Clone, Debug)]
enum State {
    /// The real protocol requires 74+ idle clocks with CS high before the
    /// card will respond to anything; `remaining` counts them down.
    InitWaitForClocks { remaining: u32 },
    Idle,
    /// Accumulating the 6-byte command frame (`0x40|index`, 4 argument
    /// bytes, CRC byte).
    ReceiveCommand { bytes: [u8; 6], received: usize },
    /// CMD1 takes a few clocks to "complete" before it reports ready (spec:
    /// "non-deterministically succeeds after a countdown" — modeled here as
    /// a fixed countdown since the emulator has no other source of
    /// nondeterminism to drive a real RNG from).
    Wait { countdown: u32, then_ready: bool },
    /// Emitting a fixed response buffer one byte per clock.
    Send { bytes: Vec<u8>, index: usize },
    /// Emitting a data block: a start token, `block_length` data bytes, and
    /// two checksum bytes (always `0xff`, since this model never corrupts
    /// data).
    Read { data: Vec<u8>, index: usize },
}

pub struct BlockDevice {
    image: Vec<u8>,
    block_length: u32,
    initialized: bool,
    state: State,
}

impl BlockDevice {
    pub fn new(image: Vec<u8>) -> Self {
        Self { image, block_length: 512, initialized: false, state: State::InitWaitForClocks { remaining: 80 } }
    }

    /// One SPI clock: `mosi` is what the host drove this cycle, the return
    /// value is what the device drives back (`MISO`).
    pub fn clock(&mut self, mosi: u8) -> u8 {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::InitWaitForClocks { remaining } => {
                if remaining <= 1 {
                    self.state = State::Idle;
                } else {
                    self.state = State::InitWaitForClocks { remaining: remaining - 1 };
                }
                IDLE_BYTE
            }
            State::Idle => {
                if mosi & 0xc0 == 0x40 {
                    let mut bytes = [0u8; 6];
                    bytes[0] = mosi;
                    self.state = State::ReceiveCommand { bytes, received: 1 };
                } else {
                    self.state = State::Idle;
                }
                IDLE_BYTE
            }
            State::ReceiveCommand { mut bytes, received } => {
                bytes[received] = mosi;
                let received = received + 1;
                if received < bytes.len() {
                    self.state = State::ReceiveCommand { bytes, received };
                    IDLE_BYTE
                } else {
                    self.dispatch_command(bytes);
                    IDLE_BYTE
                }
            }
            State::Wait { countdown, then_ready } => {
                if countdown <= 1 {
                    if then_ready {
                        self.initialized = true;
                    }
                    self.state = State::Send { bytes: vec![r1_status(self.initialized)], index: 0 };
                } else {
                    self.state = State::Wait { countdown: countdown - 1, then_ready };
                }
                IDLE_BYTE
            }
            State::Send { bytes, index } => {
                let out = bytes[index];
                if index + 1 < bytes.len() {
                    self.state = State::Send { bytes, index: index + 1 };
                } else {
                    self.state = State::Idle;
                }
                out
            }
            State::Read { data, index } => {
                let out = data[index];
                if index + 1 < data.len() {
                    self.state = State::Read { data, index: index + 1 };
                } else {
                    self.state = State::Idle;
                }
                out
            }
        }
    }

    fn dispatch_command(&mut self, frame: [u8; 6]) {
        let cmd = frame[0] & 0x3f;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        match cmd {
            CMD_GO_IDLE => {
                self.initialized = false;
                self.state = State::Send { bytes: vec![r1_status(false)], index: 0 };
            }
            CMD_INIT => {
                self.state = State::Wait { countdown: 3, then_ready: true };
            }
            CMD_SET_BLOCKLEN => {
                self.block_length = arg;
                self.state = State::Send { bytes: vec![r1_status(self.initialized)], index: 0 };
            }
            CMD_READ_SINGLE_BLOCK => {
                self.state = State::Read { data: self.build_read_response(arg), index: 0 };
            }
            other => {
                log_warning!(category(), "unsupported SPI command {other}");
                self.state = State::Send { bytes: vec![0xff], index: 0 };
            }
        }
    }

    fn build_read_response(&self, addr: u32) -> Vec<u8> {
        let len = self.block_length as usize;
        let start = addr as usize;
        let mut out = Vec::with_capacity(1 + len + 2);
        out.push(0xfe); // start token
        for i in 0..len {
            out.push(self.image.get(start + i).copied().unwrap_or(0xff));
        }
        out.push(0xff); // checksum hi
        out.push(0xff); // checksum lo
        out
    }
}

fn r1_status(initialized: bool) -> u8 {
    if initialized {
        0x00
    } else {
        0x01 // "in idle state"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_init(dev: &mut BlockDevice) {
        for _ in 0..80 {
            dev.clock(0xff);
        }
    }

    fn send_command(dev: &mut BlockDevice, cmd: u8, arg: u32) -> u8 {
        let arg_bytes = arg.to_be_bytes();
        dev.clock(0x40 | cmd);
        dev.clock(arg_bytes[0]);
        dev.clock(arg_bytes[1]);
        dev.clock(arg_bytes[2]);
        dev.clock(arg_bytes[3]);
        dev.clock(0x01)
    }

    #[test]
    fn cmd1_reports_ready_after_the_countdown() {
        let mut dev = BlockDevice::new(vec![0; 4096]);
        run_init(&mut dev);
        send_command(&mut dev, CMD_INIT, 0);
        let mut status = 0xff;
        for _ in 0..4 {
            status = dev.clock(0xff);
        }
        assert_eq!(status, 0x00);
    }

    #[test]
    fn read_single_block_emits_start_token_then_data_then_checksum() {
        let mut image = vec![0u8; 1024];
        image[0] = 0xab;
        image[511] = 0xcd;
        let mut dev = BlockDevice::new(image);
        run_init(&mut dev);
        send_command(&mut dev, CMD_INIT, 0);
        for _ in 0..4 {
            dev.clock(0xff);
        }
        send_command(&mut dev, CMD_READ_SINGLE_BLOCK, 0);

        assert_eq!(dev.clock(0xff), 0xfe); // start token
        let mut block = vec![0u8; 512];
        for b in block.iter_mut() {
            *b = dev.clock(0xff);
        }
        assert_eq!(block[0], 0xab);
        assert_eq!(block[511], 0xcd);
        assert_eq!(dev.clock(0xff), 0xff);
        assert_eq!(dev.clock(0xff), 0xff);
    }
}
