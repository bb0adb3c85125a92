//! Drives a [`Processor`] against a reference event stream (spec §4.11).
//!
//! For every event except `interrupt`, the algorithm is: step the indicated
//! thread until it produces exactly one architecturally visible side
//! effect, then compare it to the expected event. `interrupt` events are
//! injected directly (the reference model observed this interrupt fire; we
//! force the same thing to happen rather than hope the emulator's own
//! timing agrees). `***HALTED***` switches into a drain phase where any
//! further side effect is itself the mismatch.

use nyuzi_common::{log_error, LogCategory};
use nyuzi_cpu::{Processor, SideEffect};

use crate::error::{Error, Result};
use crate::event::CosimEvent;

fn category() -> LogCategory {
    LogCategory::new("cosim")
}

/// Steps are retried up to this many times waiting for a side effect to
/// appear on the expected thread (spec §4.11).
const MAX_STEPS_PER_EVENT: u32 = 500;

pub struct CosimDriver<'p> {
    processor: &'p mut Processor,
}

impl<'p> CosimDriver<'p> {
    pub fn new(processor: &'p mut Processor) -> Self {
        Self { processor }
    }

    /// Consumes the whole reference stream, one line at a time. Returns the
    /// first mismatch or malformed-event error encountered; `Ok(())` means
    /// the emulator tracked the reference to the end.
    pub fn run<'a>(&mut self, lines: impl Iterator<Item = &'a str>) -> Result<()> {
        let mut halted = false;
        for (i, raw) in lines.enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let event = crate::event::parse_line(i + 1, line)?;
            if halted {
                return self.expect_no_further_effects(&event);
            }
            match event {
                CosimEvent::Halted => {
                    halted = true;
                    self.drain_to_halt()?;
                }
                CosimEvent::Interrupt { thread, pc } => {
                    self.processor.force_interrupt(thread, pc).map_err(|e| Error::Mismatch { expected: format!("interrupt {thread} {pc:#010x}"), actual: e.to_string() })?;
                }
                other => self.expect_one(other)?,
            }
        }
        Ok(())
    }

    /// Advances `thread` until it emits exactly one side effect (skipping
    /// steps that emit none, e.g. mid-flight scatter/gather subcycles that
    /// don't touch memory on this particular lane) and compares it to
    /// `expected`.
    fn expect_one(&mut self, expected: CosimEvent) -> Result<()> {
        let global_id = event_thread(&expected);
        let Some((core, local)) = self.processor.locate_thread(global_id) else {
            return Err(Error::Timeout { thread: global_id, expected: format!("{expected:?}") });
        };
        for _ in 0..MAX_STEPS_PER_EVENT {
            let effect = self.processor.step_thread(core, local);
            if self.processor.crashed {
                return Err(Error::Mismatch { expected: format!("{expected:?}"), actual: "emulator crashed before producing a side effect".into() });
            }
            let Some(effect) = effect else { continue };
            return compare(&expected, &effect);
        }
        Err(Error::Timeout { thread: global_id, expected: format!("{expected:?}") })
    }

    /// After `***HALTED***`, the emulator must also come to a stop without
    /// producing anything else observable.
    fn drain_to_halt(&mut self) -> Result<()> {
        for core in 0..self.processor.cores.len() {
            for local in 0..self.processor.cores[core].threads.len() {
                for _ in 0..MAX_STEPS_PER_EVENT {
                    if self.processor.halted() || self.processor.crashed {
                        break;
                    }
                    if let Some(effect) = self.processor.step_thread(core, local) {
                        return Err(Error::UnexpectedAfterHalt { actual: format!("{effect:?}") });
                    }
                }
            }
        }
        Ok(())
    }

    fn expect_no_further_effects(&mut self, event: &CosimEvent) -> Result<()> {
        Err(Error::UnexpectedAfterHalt { actual: format!("{event:?}") })
    }
}

fn event_thread(event: &CosimEvent) -> u32 {
    match *event {
        CosimEvent::Store { thread, .. } => thread,
        CosimEvent::VectorWriteback { thread, .. } => thread,
        CosimEvent::ScalarWriteback { thread, .. } => thread,
        CosimEvent::Interrupt { thread, .. } => thread,
        CosimEvent::Halted => u32::MAX,
    }
}

/// Compares kind, PC, thread, address/register, mask, and value(s) (spec
/// §4.11). Any disagreement is reported with both sides' full data.
fn compare(expected: &CosimEvent, actual: &SideEffect) -> Result<()> {
    let ok = match (expected, actual) {
        (
            CosimEvent::Store { pc: epc, thread: et, addr: eaddr, byte_mask: emask, line: eline },
            SideEffect::Store { pc: apc, thread: at, addr: aaddr, byte_mask: amask, line: aline },
        ) => epc == apc && et == at && eaddr == aaddr && emask == amask && eline == aline,
        (
            CosimEvent::VectorWriteback { pc: epc, thread: et, reg: ereg, lane_mask: emask, words: ewords },
            SideEffect::VectorWriteback { pc: apc, thread: at, reg: areg, lane_mask: amask, words: awords },
        ) => epc == apc && et == at && ereg == areg && emask == amask && ewords == awords,
        (
            CosimEvent::ScalarWriteback { pc: epc, thread: et, reg: ereg, value: eval },
            SideEffect::ScalarWriteback { pc: apc, thread: at, reg: areg, value: aval },
        ) => epc == apc && et == at && ereg == areg && eval == aval,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        let err = Error::Mismatch { expected: format!("{expected:?}"), actual: format!("{actual:?}") };
        log_error!(category(), "{err}");
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_processor() -> Processor {
        Processor::new(0x10000, 1, 1).unwrap()
    }

    /// `add_i r5, r0, #7` in immediate scalar-scalar form (fmt=0, op=AddI=5).
    fn encode_add_immediate(dest: u32, src1: u32, imm: u32) -> u32 {
        (5u32 << 23) | (dest << 18) | (src1 << 13) | imm
    }

    #[test]
    fn matching_scalar_writeback_is_accepted() {
        let mut p = new_processor();
        p.memory.write_u32(0, encode_add_immediate(5, 0, 7));
        let mut driver = CosimDriver::new(&mut p);
        let result = driver.expect_one(CosimEvent::ScalarWriteback { pc: 0, thread: 0, reg: 5, value: 7 });
        assert!(result.is_ok());
    }

    #[test]
    fn mismatched_value_is_rejected() {
        let mut p = new_processor();
        p.memory.write_u32(0, encode_add_immediate(5, 0, 7));
        let mut driver = CosimDriver::new(&mut p);
        let result = driver.expect_one(CosimEvent::ScalarWriteback { pc: 0, thread: 0, reg: 5, value: 9 });
        assert!(matches!(result, Err(Error::Mismatch { .. })));
    }

    #[test]
    fn run_stops_cleanly_after_halted_marker_once_processor_halts() {
        let mut p = new_processor();
        p.halt_threads(0xffff_ffff);
        let mut driver = CosimDriver::new(&mut p);
        assert!(driver.run(["***HALTED***"].into_iter()).is_ok());
    }

    #[test]
    fn malformed_event_line_is_rejected() {
        let mut p = new_processor();
        let mut driver = CosimDriver::new(&mut p);
        assert!(matches!(driver.run(["not an event"].into_iter()), Err(Error::BadEvent { .. })));
    }
}
