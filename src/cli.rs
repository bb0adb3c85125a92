//! Hand-rolled CLI option parsing (spec §6.2) — no argument-parsing crate,
//! matching the teacher's habit of hand-rolling exactly this class of
//! plumbing rather than pulling in `clap` (spec's `[AMBIENT] Configuration`
//! decision: this is the interpreter's whole configuration surface, there's
//! no on-disk config format to add).

use std::path::PathBuf;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    Normal,
    Cosim,
    Gdb,
}

#[derive(Debug)]
pub struct MemoryDump {
    pub path: PathBuf,
    pub start: u32,
    pub length: u32,
}

#[derive(Debug)]
pub struct Args {
    pub hex_image: PathBuf,
    pub trace: bool,
    pub mode: Mode,
    /// `-f WxH`.
    pub framebuffer: Option<(u32, u32)>,
    pub dump: Option<MemoryDump>,
    pub block_device: Option<PathBuf>,
    pub total_threads: u32,
    pub memory_size: u32,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            hex_image: PathBuf::new(),
            trace: false,
            mode: Mode::Normal,
            framebuffer: None,
            dump: None,
            block_device: None,
            total_threads: 32,
            memory_size: 0x0100_0000,
        }
    }
}

fn parse_dimensions(spec: &str) -> Result<(u32, u32), String> {
    let (w, h) = spec.split_once('x').ok_or_else(|| format!("-f expects WxH, got {spec:?}"))?;
    let w = w.parse::<u32>().map_err(|_| format!("-f: bad width {w:?}"))?;
    let h = h.parse::<u32>().map_err(|_| format!("-f: bad height {h:?}"))?;
    Ok((w, h))
}

fn parse_dump(spec: &str) -> Result<MemoryDump, String> {
    let mut parts = spec.splitn(3, ',');
    let (Some(path), Some(start), Some(length)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("-d expects <file>,<start-hex>,<length-hex>, got {spec:?}"));
    };
    let start = u32::from_str_radix(start.trim_start_matches("0x"), 16).map_err(|_| format!("-d: bad start address {start:?}"))?;
    let length = u32::from_str_radix(length.trim_start_matches("0x"), 16).map_err(|_| format!("-d: bad length {length:?}"))?;
    Ok(MemoryDump { path: PathBuf::from(path), start, length })
}

/// Parses `argv[1..]` (the binary name already stripped by the caller).
pub fn parse(argv: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut args = Args::default();
    let mut positional = Vec::new();
    let mut it = argv.peekable();

    fn next_value(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
        it.next().ok_or_else(|| format!("{flag} requires a value"))
    }

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-v" => args.trace = true,
            "-m" => {
                let mode = next_value(&mut it, "-m")?;
                args.mode = match mode.as_str() {
                    "normal" => Mode::Normal,
                    "cosim" => Mode::Cosim,
                    "gdb" => Mode::Gdb,
                    other => return Err(format!("-m: unknown mode {other:?} (expected normal|cosim|gdb)")),
                };
            }
            "-f" => args.framebuffer = Some(parse_dimensions(&next_value(&mut it, "-f")?)?),
            "-d" => args.dump = Some(parse_dump(&next_value(&mut it, "-d")?)?),
            "-b" => args.block_device = Some(PathBuf::from(next_value(&mut it, "-b")?)),
            "-t" => {
                let n = next_value(&mut it, "-t")?;
                let n: u32 = n.parse().map_err(|_| format!("-t: not a number: {n:?}"))?;
                if !(1..=32).contains(&n) {
                    return Err(format!("-t: thread count {n} out of range 1..=32"));
                }
                args.total_threads = n;
            }
            "-c" => {
                let size = next_value(&mut it, "-c")?;
                args.memory_size = u32::from_str_radix(size.trim_start_matches("0x"), 16).map_err(|_| format!("-c: bad size {size:?}"))?;
            }
            other if other.starts_with('-') => return Err(format!("unrecognized option {other:?}")),
            other => positional.push(other.to_string()),
        }
    }

    if positional.len() != 1 {
        return Err(format!("expected exactly one <hex-image> argument, got {}", positional.len()));
    }
    args.hex_image = PathBuf::from(&positional[0]);
    Ok(args)
}

/// `(num_cores, threads_per_core)` for `total_threads` (spec §3.2's 32-
/// thread/4-core model): four cores when the total divides evenly across
/// them, otherwise a single core holding every thread. The spec fixes the
/// nominal shape at 4x8 but never specifies how a non-multiple-of-4 `-t`
/// should be split, so this reimplementation picks the simplest rule that
/// preserves the common case exactly.
pub fn core_topology(total_threads: u32) -> (u32, u32) {
    if total_threads % 4 == 0 {
        (4, total_threads / 4)
    } else {
        (1, total_threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_args(args: &[&str]) -> Result<Args, String> {
        parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn defaults_to_normal_mode_with_thirty_two_threads() {
        let args = parse_args(&["image.hex"]).unwrap();
        assert_eq!(args.mode, Mode::Normal);
        assert_eq!(args.total_threads, 32);
        assert!(!args.trace);
    }

    #[test]
    fn parses_every_option() {
        let args = parse_args(&["-v", "-m", "cosim", "-f", "640x480", "-t", "8", "-c", "100000", "-b", "disk.img", "-d", "out.bin,0,1000", "image.hex"]).unwrap();
        assert!(args.trace);
        assert_eq!(args.mode, Mode::Cosim);
        assert_eq!(args.framebuffer, Some((640, 480)));
        assert_eq!(args.total_threads, 8);
        assert_eq!(args.memory_size, 0x100000);
        assert_eq!(args.block_device.unwrap().to_str().unwrap(), "disk.img");
        let dump = args.dump.unwrap();
        assert_eq!(dump.start, 0);
        assert_eq!(dump.length, 0x1000);
    }

    #[test]
    fn rejects_thread_count_out_of_range() {
        assert!(parse_args(&["-t", "33", "image.hex"]).is_err());
        assert!(parse_args(&["-t", "0", "image.hex"]).is_err());
    }

    #[test]
    fn rejects_missing_hex_image() {
        assert!(parse_args(&["-v"]).is_err());
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(parse_args(&["-m", "bogus", "image.hex"]).is_err());
    }

    #[test]
    fn core_topology_prefers_four_cores_when_evenly_divisible() {
        assert_eq!(core_topology(32), (4, 8));
        assert_eq!(core_topology(4), (4, 1));
        assert_eq!(core_topology(5), (1, 5));
        assert_eq!(core_topology(1), (1, 1));
    }
}
