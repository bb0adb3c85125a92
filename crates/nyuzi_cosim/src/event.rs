//! Parses one side-effect event per line of the reference stream (spec
//! §4.11). Each event kind mirrors one [`nyuzi_cpu::SideEffect`] variant
//! plus the two control events (`interrupt`, `***HALTED***`) that have no
//! emulator-side counterpart to compare against.

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum CosimEvent {
    Store { pc: u32, thread: u32, addr: u32, byte_mask: u64, line: [u32; 16] },
    VectorWriteback { pc: u32, thread: u32, reg: u32, lane_mask: u16, words: [u32; 16] },
    ScalarWriteback { pc: u32, thread: u32, reg: u32, value: u32 },
    /// Injected directly onto the named thread rather than compared against
    /// an emulator side effect (spec §4.11: "the cosim driver injects rather
    /// than observes").
    Interrupt { thread: u32, pc: u32 },
    Halted,
}

fn parse_hex(token: &str) -> Option<u64> {
    u64::from_str_radix(token.trim_start_matches("0x"), 16).ok()
}

fn parse_u32(token: &str) -> Option<u32> {
    parse_hex(token).and_then(|v| u32::try_from(v).ok())
}

fn parse_words(tokens: &[&str]) -> Option<[u32; 16]> {
    if tokens.len() != 16 {
        return None;
    }
    let mut words = [0u32; 16];
    for (i, tok) in tokens.iter().enumerate() {
        words[i] = parse_u32(tok)?;
    }
    Some(words)
}

/// Parses one line of the reference stream. `lineno` is only used to build
/// a readable [`Error::BadEvent`].
pub fn parse_line(lineno: usize, line: &str) -> Result<CosimEvent> {
    let line = line.trim();
    if line == "***HALTED***" {
        return Ok(CosimEvent::Halted);
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let bad = || Error::BadEvent { line: lineno, text: line.to_string() };

    match tokens.first().copied() {
        Some("store") => {
            if tokens.len() != 21 {
                return Err(bad());
            }
            let pc = parse_u32(tokens[1]).ok_or_else(bad)?;
            let thread = parse_u32(tokens[2]).ok_or_else(bad)?;
            let addr = parse_u32(tokens[3]).ok_or_else(bad)?;
            let byte_mask = parse_hex(tokens[4]).ok_or_else(bad)?;
            let line_words = parse_words(&tokens[5..21]).ok_or_else(bad)?;
            Ok(CosimEvent::Store { pc, thread, addr, byte_mask, line: line_words })
        }
        Some("vwriteback") => {
            if tokens.len() != 21 {
                return Err(bad());
            }
            let pc = parse_u32(tokens[1]).ok_or_else(bad)?;
            let thread = parse_u32(tokens[2]).ok_or_else(bad)?;
            let reg = parse_u32(tokens[3]).ok_or_else(bad)?;
            let lane_mask = parse_hex(tokens[4]).ok_or_else(bad)? as u16;
            let words = parse_words(&tokens[5..21]).ok_or_else(bad)?;
            Ok(CosimEvent::VectorWriteback { pc, thread, reg, lane_mask, words })
        }
        Some("swriteback") => {
            if tokens.len() != 5 {
                return Err(bad());
            }
            let pc = parse_u32(tokens[1]).ok_or_else(bad)?;
            let thread = parse_u32(tokens[2]).ok_or_else(bad)?;
            let reg = parse_u32(tokens[3]).ok_or_else(bad)?;
            let value = parse_u32(tokens[4]).ok_or_else(bad)?;
            Ok(CosimEvent::ScalarWriteback { pc, thread, reg, value })
        }
        Some("interrupt") => {
            if tokens.len() != 3 {
                return Err(bad());
            }
            let thread = parse_u32(tokens[1]).ok_or_else(bad)?;
            let pc = parse_u32(tokens[2]).ok_or_else(bad)?;
            Ok(CosimEvent::Interrupt { thread, pc })
        }
        _ => Err(bad()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_swriteback() {
        let ev = parse_line(1, "swriteback 0x1000 0 5 0xdeadbeef").unwrap();
        assert_eq!(ev, CosimEvent::ScalarWriteback { pc: 0x1000, thread: 0, reg: 5, value: 0xdeadbeef });
    }

    #[test]
    fn parses_halted_marker() {
        assert_eq!(parse_line(1, "***HALTED***").unwrap(), CosimEvent::Halted);
    }

    #[test]
    fn parses_interrupt() {
        assert_eq!(parse_line(1, "interrupt 2 0x4000").unwrap(), CosimEvent::Interrupt { thread: 2, pc: 0x4000 });
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(matches!(parse_line(3, "store too few fields").unwrap_err(), Error::BadEvent { line: 3, .. }));
    }
}
