//! `nyuzi-emulator`: the interpreter's CLI entry point (spec §6.2). Parses
//! arguments, loads the hex image (§6.3), wires the MMU-backed memory, the
//! MMIO device window, and (depending on `-m`) a normal run loop, the
//! cosimulation validator, or the GDB-remote stub.

mod cli;

use std::fs;
use std::process::ExitCode;

use nyuzi_common::{log_error, log_info, set_logger, ConsoleLogger, LogCategory, LogLevel};
use nyuzi_cpu::Processor;
use nyuzi_device::block_device::BlockDevice;
use nyuzi_device::mmio::{DeviceWindow, SharedDeviceWindow};
use nyuzi_host::{CapturingWindow, HostEvent, HostWindow, NullWindow};

use cli::{Args, Mode};

fn category() -> LogCategory {
    LogCategory::new("nyuzi")
}

/// Instructions run per quantum before the run loop drains device-requested
/// thread control and timer changes, and (when `-f` is set) presents a
/// frame. One is the simplest choice that keeps every quantum's side
/// effects visible to the device model immediately.
const QUANTUM: u32 = 1;

fn main() -> ExitCode {
    set_logger(Box::new(ConsoleLogger::new(LogLevel::Info)));

    let args = match cli::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("nyuzi-emulator: {msg}");
            return ExitCode::from(1);
        }
    };

    match run(&args) {
        Ok(crashed) => ExitCode::from(if crashed { 1 } else { 0 }),
        Err(msg) => {
            eprintln!("nyuzi-emulator: {msg}");
            ExitCode::from(1)
        }
    }
}

/// Returns `Ok(true)` if the run ended in a hard failure or cosim mismatch
/// (exit code 1), `Ok(false)` on a normal halt (exit code 0).
fn run(args: &Args) -> Result<bool, String> {
    let hex_text = fs::read_to_string(&args.hex_image).map_err(|e| format!("reading {}: {e}", args.hex_image.display()))?;

    let (num_cores, threads_per_core) = cli::core_topology(args.total_threads);
    let mut processor = Processor::new(args.memory_size, num_cores, threads_per_core).map_err(|e| e.to_string())?;
    processor.memory.load_hex_image(&hex_text).map_err(|e| e.to_string())?;
    processor.set_trace(args.trace);

    let block_device = match &args.block_device {
        Some(path) => Some(BlockDevice::new(fs::read(path).map_err(|e| format!("reading block device {}: {e}", path.display()))?)),
        None => None,
    };
    let shared_device = SharedDeviceWindow::new(DeviceWindow::new(block_device));
    processor.attach_device(Box::new(shared_device.clone()));

    let crashed = match args.mode {
        Mode::Normal => run_normal(&mut processor, args, &shared_device),
        Mode::Cosim => run_cosim(&mut processor),
        Mode::Gdb => {
            nyuzi_gdb::serve(&mut processor, nyuzi_gdb::DEFAULT_PORT).map_err(|e| e.to_string())?;
            false
        }
    };

    if let Some(dump) = &args.dump {
        let bytes = processor.memory.read_bytes(dump.start, dump.length);
        fs::write(&dump.path, bytes).map_err(|e| format!("writing dump to {}: {e}", dump.path.display()))?;
    }

    Ok(crashed)
}

fn run_normal(processor: &mut Processor, args: &Args, device: &SharedDeviceWindow) -> bool {
    let mut host: Box<dyn HostWindow> = match args.framebuffer {
        Some(_) => Box::new(CapturingWindow::new()),
        None => Box::new(NullWindow),
    };

    loop {
        let (resume, halt) = device.take_pending_thread_control();
        processor.resume_threads(resume);
        processor.halt_threads(halt);
        if let Some(countdown) = device.take_pending_timer_countdown() {
            processor.timer_countdown = countdown;
        }
        device.set_thread_enable_mask_mirror(processor.thread_enable_mask);

        if let Some((w, h)) = args.framebuffer {
            let pixels = processor.memory.read_bytes(device.vga_base(), w * h * 4);
            host.present(&pixels, w, h);
            for event in host.poll_events() {
                if let HostEvent::Key { key, pressed } = event {
                    device.keyboard_event(key, pressed);
                }
            }
        }

        if !processor.execute_instructions(QUANTUM) {
            log_error!(category(), "emulator crashed");
            return true;
        }
        if processor.halted() {
            log_info!(category(), "processor halted normally");
            return false;
        }
    }
}

fn run_cosim(processor: &mut Processor) -> bool {
    use std::io::{self, BufRead};

    let stdin = io::stdin();
    let lines: Vec<String> = stdin.lock().lines().map_while(Result::ok).collect();
    let mut driver = nyuzi_cosim::CosimDriver::new(processor);
    match driver.run(lines.iter().map(String::as_str)) {
        Ok(()) => false,
        Err(e) => {
            log_error!(category(), "cosim mismatch: {e}");
            true
        }
    }
}
