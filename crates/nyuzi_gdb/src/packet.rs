//! GDB-remote wire framing (spec §4.12, §6.5): `$<payload>#<cc>`, where
//! `<cc>` is the two-hex-digit mod-256 sum of the payload bytes.

/// `sum(payload.bytes()) mod 256`, as the two-hex-digit trailer.
pub fn checksum(payload: &str) -> u8 {
    payload.bytes().fold(0u8, |acc, b| acc.wrapping_add(b))
}

/// Frames `payload` as `$<payload>#<cc>`, ready to write to the socket.
pub fn frame(payload: &str) -> String {
    format!("${payload}#{:02x}", checksum(payload))
}

/// The standard GDB-remote acknowledgement byte sent after a packet whose
/// checksum validated, absent `QStartNoAckMode`.
pub const ACK: u8 = b'+';
pub const NACK: u8 = b'-';

/// One complete frame extracted from a byte buffer: the payload (with the
/// `$`/`#cc` stripped, checksum validated) and how many bytes of `buf` it
/// consumed, including any leading ack/nack bytes skipped over.
pub struct ParsedFrame {
    pub payload: String,
    pub checksum_ok: bool,
    pub consumed: usize,
}

/// Scans for the first complete `$...#cc` frame in `buf`, skipping any
/// leading `+`/`-` ack bytes. Returns `None` if `buf` doesn't yet contain a
/// full frame (the caller should read more bytes and retry).
pub fn parse_frame(buf: &[u8]) -> Option<ParsedFrame> {
    let start = buf.iter().position(|&b| b == b'$')?;
    let hash = buf[start..].iter().position(|&b| b == b'#')? + start;
    if hash + 2 >= buf.len() {
        return None;
    }
    let payload = String::from_utf8_lossy(&buf[start + 1..hash]).into_owned();
    let checksum_hex = std::str::from_utf8(&buf[hash + 1..hash + 3]).ok()?;
    let given = u8::from_str_radix(checksum_hex, 16).ok()?;
    Some(ParsedFrame { checksum_ok: given == checksum(&payload), payload, consumed: hash + 3 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_parse() {
        let wire = frame("qC");
        let parsed = parse_frame(wire.as_bytes()).unwrap();
        assert_eq!(parsed.payload, "qC");
        assert!(parsed.checksum_ok);
        assert_eq!(parsed.consumed, wire.len());
    }

    #[test]
    fn parse_skips_leading_ack_byte() {
        let mut wire = vec![b'+'];
        wire.extend_from_slice(frame("g").as_bytes());
        let parsed = parse_frame(&wire).unwrap();
        assert_eq!(parsed.payload, "g");
        assert_eq!(parsed.consumed, wire.len());
    }

    #[test]
    fn incomplete_frame_returns_none() {
        assert!(parse_frame(b"$qC").is_none());
        assert!(parse_frame(b"$qC#0").is_none());
    }

    #[test]
    fn corrupted_checksum_is_flagged_not_rejected() {
        let parsed = parse_frame(b"$g#00").unwrap();
        assert!(!parsed.checksum_ok);
    }
}
