//! TCP accept/read/write loop around [`GdbStub`] (spec §4.12: "A minimal
//! GDB-remote server on TCP 8000"). This is the one place in the crate that
//! touches sockets; everything else is pure and unit-tested through
//! [`GdbStub::handle`] directly.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

use nyuzi_common::{log_error, log_info, log_warning, LogCategory};
use nyuzi_cpu::Processor;

use crate::error::Result;
use crate::packet::{self, ACK};
use crate::stub::GdbStub;

pub const DEFAULT_PORT: u16 = 8000;

fn category() -> LogCategory {
    LogCategory::new("gdb")
}

/// Accepts one client at a time on `port`, serving GDB-remote packets
/// against `processor` until the socket closes, then re-accepts (spec §7:
/// framing errors close the current client and re-accept). Returns only if
/// `accept` itself fails.
pub fn serve(processor: &mut Processor, port: u16) -> Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    log_info!(category(), "gdb stub listening on 127.0.0.1:{port}");
    loop {
        let (stream, addr) = listener.accept()?;
        log_info!(category(), "gdb client connected from {addr}");
        if let Err(e) = serve_one_client(processor, stream) {
            log_warning!(category(), "gdb client disconnected: {e}");
        }
    }
}

fn serve_one_client(processor: &mut Processor, mut stream: TcpStream) -> Result<()> {
    let mut stub = GdbStub::new();
    let mut buf = Vec::new();
    let mut scratch = [0u8; 4096];
    loop {
        let n = stream.read(&mut scratch)?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&scratch[..n]);
        while let Some(parsed) = packet::parse_frame(&buf) {
            buf.drain(..parsed.consumed);
            if !parsed.checksum_ok {
                log_error!(category(), "bad checksum in packet {:?}", parsed.payload);
                stream.write_all(&[packet::NACK])?;
                continue;
            }
            if !stub.no_ack_mode {
                stream.write_all(&[ACK])?;
            }
            let reply = stub.handle(processor, &parsed.payload);
            stream.write_all(packet::frame(&reply).as_bytes())?;
        }
    }
}
