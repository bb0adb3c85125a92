//! Packet dispatch for the GDB-remote protocol (spec §4.12, §6.5). Pure
//! request/reply logic against a [`Processor`] — the TCP accept/read/write
//! loop lives in [`crate::server`] and is a thin shell around
//! [`GdbStub::handle`].

use nyuzi_cpu::isa::BREAKPOINT_INST;
use nyuzi_cpu::trap::TrapCause;
use nyuzi_cpu::{Breakpoint, Processor, SideEffect};

use crate::registers::{self, NUM_GDB_REGISTERS};

/// Why [`GdbStub::continue_execution`] or [`GdbStub::single_step`] stopped,
/// used to build the `T`/`S` stop-reply packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint { thread: u32 },
    Stepped { thread: u32 },
    Halted,
    Crashed,
}

/// GDB signal number reported in stop replies. We don't track a precise
/// architectural signal mapping, so every stop is reported as `SIGTRAP`
/// (5), which is what GDB expects after a breakpoint or single step.
const SIGTRAP: u8 = 5;

pub struct GdbStub {
    /// Thread addressed by `g`/`p`/`m` (set by `Hg`).
    g_thread: u32,
    /// Thread addressed by `c`/`s` (set by `Hc`); `None` means "any/all".
    c_thread: Option<u32>,
    pub no_ack_mode: bool,
}

impl Default for GdbStub {
    fn default() -> Self {
        Self::new()
    }
}

impl GdbStub {
    pub fn new() -> Self {
        Self { g_thread: 0, c_thread: Some(0), no_ack_mode: false }
    }

    fn total_threads(&self, processor: &Processor) -> u32 {
        processor.cores.iter().map(|c| c.threads.len() as u32).sum()
    }

    /// Dispatches one packet payload (no `$`/`#cc` framing) and returns the
    /// reply payload to frame and send back. Unknown packets and invalid
    /// register IDs get an empty reply, matching standard GDB-remote
    /// behavior (spec §7).
    pub fn handle(&mut self, processor: &mut Processor, packet: &str) -> String {
        if packet.is_empty() {
            return String::new();
        }
        let (cmd, rest) = packet.split_at(1);
        match cmd {
            "?" => self.stop_reply(StopReason::Stepped { thread: self.c_thread.unwrap_or(0) }),
            "g" => self.read_all_registers(processor),
            "p" => self.read_one_register(processor, rest),
            "m" => self.read_memory(processor, rest),
            "M" => self.write_memory(processor, rest),
            "H" => self.set_thread_focus(rest),
            "q" => self.query(processor, rest),
            "Q" => self.set(rest),
            "v" => self.v_packet(processor, rest),
            "z" => self.breakpoint(processor, rest, false),
            "Z" => self.breakpoint(processor, rest, true),
            "c" | "C" => self.stop_reply(self.continue_execution(processor)),
            "s" | "S" => self.stop_reply(self.single_step(processor)),
            _ => String::new(),
        }
    }

    fn read_all_registers(&self, processor: &Processor) -> String {
        let Some((core, local)) = processor.locate_thread(self.g_thread) else {
            return String::new();
        };
        let thread = processor.thread(core, local);
        (0..NUM_GDB_REGISTERS).map(|id| registers::pack_register(id, thread.gdb_read_register(id))).collect()
    }

    fn read_one_register(&self, processor: &Processor, rest: &str) -> String {
        let Some(id) = u32::from_str_radix(rest, 16).ok() else { return String::new() };
        if id >= NUM_GDB_REGISTERS {
            return String::new();
        }
        let Some((core, local)) = processor.locate_thread(self.g_thread) else {
            return String::new();
        };
        registers::pack_register(id, processor.thread(core, local).gdb_read_register(id))
    }

    fn read_memory(&self, processor: &Processor, rest: &str) -> String {
        let Some((addr_hex, len_hex)) = rest.split_once(',') else { return String::new() };
        let (Ok(addr), Ok(len)) = (u32::from_str_radix(addr_hex, 16), u32::from_str_radix(len_hex, 16)) else {
            return String::new();
        };
        (0..len).map(|i| format!("{:02x}", processor.memory.read_u8(addr.wrapping_add(i)))).collect()
    }

    fn write_memory(&self, processor: &mut Processor, rest: &str) -> String {
        let Some((header, data)) = rest.split_once(':') else { return String::new() };
        let Some((addr_hex, len_hex)) = header.split_once(',') else { return String::new() };
        let (Ok(addr), Ok(len)) = (u32::from_str_radix(addr_hex, 16), u32::from_str_radix(len_hex, 16)) else {
            return String::new();
        };
        if data.len() < (len as usize) * 2 {
            return String::new();
        }
        for i in 0..len {
            let Ok(byte) = u8::from_str_radix(&data[i as usize * 2..i as usize * 2 + 2], 16) else { return String::new() };
            processor.memory.write_u8(addr.wrapping_add(i), byte);
        }
        "OK".to_string()
    }

    fn set_thread_focus(&mut self, rest: &str) -> String {
        if rest.is_empty() {
            return String::new();
        }
        let (kind, id_str) = rest.split_at(1);
        let id = if id_str == "-1" { None } else { u32::from_str_radix(id_str, 16).ok() };
        match kind {
            "g" => {
                if let Some(id) = id {
                    self.g_thread = id;
                }
                "OK".to_string()
            }
            "c" => {
                self.c_thread = id;
                "OK".to_string()
            }
            _ => String::new(),
        }
    }

    fn query(&self, processor: &Processor, rest: &str) -> String {
        if rest == "C" {
            return format!("QC{:x}", self.c_thread.unwrap_or(0));
        }
        if rest == "HostInfo" {
            return "triple:nyuzi;endian:little;ptrsize:4;hostname:nyuzi-emulator;".to_string();
        }
        if rest == "ProcessInfo" {
            return "pid:1;parent-pid:1;".to_string();
        }
        if rest == "fThreadInfo" {
            let ids: Vec<String> = (0..self.total_threads(processor)).map(|id| format!("{id:x}")).collect();
            return format!("m{}", ids.join(","));
        }
        if rest == "sThreadInfo" {
            return "l".to_string();
        }
        if let Some(hex) = rest.strip_prefix("ThreadStopInfo") {
            if let Ok(id) = u32::from_str_radix(hex, 16) {
                return self.stop_reply(StopReason::Stepped { thread: id });
            }
            return String::new();
        }
        if let Some(hex) = rest.strip_prefix("RegisterInfo") {
            return self.register_info(hex);
        }
        String::new()
    }

    fn register_info(&self, hex: &str) -> String {
        let Ok(id) = u32::from_str_radix(hex, 16) else { return String::new() };
        if id >= NUM_GDB_REGISTERS {
            return "E45".to_string();
        }
        if registers::is_vector_register(id) {
            format!("name:v{};bitsize:512;encoding:vector;format:vector-uint32;set:Vector Registers;", id - 32)
        } else {
            let alias = match id {
                28 => ";alt-name:fp",
                29 => ";alt-name:sp",
                30 => ";alt-name:ra",
                31 => ";alt-name:pc;generic:pc",
                _ => "",
            };
            format!("name:r{id};bitsize:32;encoding:uint;format:hex;set:General Purpose Registers{alias};")
        }
    }

    fn set(&mut self, rest: &str) -> String {
        if rest == "StartNoAckMode" {
            self.no_ack_mode = true;
            return "OK".to_string();
        }
        String::new()
    }

    fn v_packet(&mut self, processor: &mut Processor, rest: &str) -> String {
        if rest == "Cont?" {
            return "vCont;c;C;s;S".to_string();
        }
        if let Some(action) = rest.strip_prefix("Cont;") {
            return match action.chars().next() {
                Some('c') | Some('C') => self.stop_reply(self.continue_execution(processor)),
                Some('s') | Some('S') => self.stop_reply(self.single_step(processor)),
                _ => String::new(),
            };
        }
        String::new()
    }

    fn breakpoint(&mut self, processor: &mut Processor, rest: &str, set: bool) -> String {
        let mut parts = rest.splitn(3, ',');
        let Some("0") = parts.next() else { return String::new() };
        let Some(Ok(addr)) = parts.next().map(|s| u32::from_str_radix(s, 16)) else {
            return String::new();
        };
        if set {
            self.set_breakpoint(processor, addr);
        } else {
            self.clear_breakpoint(processor, addr);
        }
        "OK".to_string()
    }

    fn set_breakpoint(&self, processor: &mut Processor, pc: u32) {
        if processor.breakpoints.iter().any(|b| b.pc == pc) {
            return;
        }
        let original_instruction = processor.memory.read_u32(pc);
        processor.memory.write_u32(pc, BREAKPOINT_INST);
        processor.breakpoints.push(Breakpoint { pc, original_instruction, restart: false });
    }

    fn clear_breakpoint(&self, processor: &mut Processor, pc: u32) {
        if let Some(index) = processor.breakpoints.iter().position(|b| b.pc == pc) {
            let bp = processor.breakpoints.remove(index);
            processor.memory.write_u32(bp.pc, bp.original_instruction);
        }
    }

    /// `z`/`Z` single-step-over-breakpoint mechanics (spec §9) are handled
    /// transparently inside `Processor::step_thread`'s `restart` flag; here
    /// we just run threads round-robin until one traps on our sentinel, the
    /// processor halts, or it crashes.
    fn continue_execution(&self, processor: &mut Processor) -> StopReason {
        loop {
            if processor.crashed {
                return StopReason::Crashed;
            }
            if processor.halted() {
                return StopReason::Halted;
            }
            if let Some(reason) = self.round_robin_step(processor) {
                return reason;
            }
        }
    }

    fn single_step(&self, processor: &mut Processor) -> StopReason {
        let thread = self.c_thread.unwrap_or(0);
        let Some((core, local)) = processor.locate_thread(thread) else {
            return StopReason::Crashed;
        };
        if let Some(bp) = processor.breakpoints.iter_mut().find(|b| b.pc == processor.thread(core, local).pc) {
            bp.restart = true;
        }
        let effect = processor.step_thread(core, local);
        if processor.crashed {
            return StopReason::Crashed;
        }
        if let Some(SideEffect::Trap { cause: TrapCause::Breakpoint, thread, .. }) = effect {
            return StopReason::Breakpoint { thread };
        }
        StopReason::Stepped { thread }
    }

    fn round_robin_step(&self, processor: &mut Processor) -> Option<StopReason> {
        let threads_per_core = processor.cores.first()?.threads.len() as u32;
        for core in 0..processor.cores.len() {
            for local in 0..processor.cores[core].threads.len() {
                let global_id = core as u32 * threads_per_core + local as u32;
                if processor.thread_enable_mask & (1 << global_id) == 0 {
                    continue;
                }
                let effect = processor.step_thread(core, local);
                if processor.crashed {
                    return Some(StopReason::Crashed);
                }
                if let Some(SideEffect::Trap { cause: TrapCause::Breakpoint, thread, .. }) = effect {
                    return Some(StopReason::Breakpoint { thread });
                }
            }
        }
        None
    }

    fn stop_reply(&self, reason: StopReason) -> String {
        match reason {
            StopReason::Breakpoint { thread } | StopReason::Stepped { thread } => format!("T{SIGTRAP:02x}thread:{thread:x};"),
            StopReason::Halted => "W00".to_string(),
            StopReason::Crashed => format!("T{SIGTRAP:02x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_processor() -> Processor {
        Processor::new(0x10000, 1, 2).unwrap()
    }

    #[test]
    fn unknown_packet_gets_empty_reply() {
        let mut stub = GdbStub::new();
        let mut p = new_processor();
        assert_eq!(stub.handle(&mut p, "xyz"), "");
    }

    #[test]
    fn read_register_round_trips_a_written_value() {
        let mut stub = GdbStub::new();
        let mut p = new_processor();
        p.thread_mut(0, 0).regs.scalar[5] = 0x01020304;
        assert_eq!(stub.handle(&mut p, "p05"), "04030201");
    }

    #[test]
    fn out_of_range_register_id_is_empty() {
        let mut stub = GdbStub::new();
        let mut p = new_processor();
        assert_eq!(stub.handle(&mut p, "p7f"), "");
    }

    #[test]
    fn memory_read_write_round_trips() {
        let mut stub = GdbStub::new();
        let mut p = new_processor();
        assert_eq!(stub.handle(&mut p, "M1000,2:aabb"), "OK");
        assert_eq!(stub.handle(&mut p, "m1000,2"), "aabb");
    }

    #[test]
    fn memory_read_past_configured_memory_returns_ff_bytes() {
        let mut stub = GdbStub::new();
        let mut p = new_processor();
        assert_eq!(stub.handle(&mut p, "m1000000,2"), "ffff");
    }

    #[test]
    fn set_breakpoint_then_continue_stops_with_thread_id() {
        let mut stub = GdbStub::new();
        let mut p = Processor::new(0x10000, 1, 1).unwrap();
        stub.handle(&mut p, "Z0,0,4");
        let reply = stub.handle(&mut p, "c");
        assert_eq!(reply, "T05thread:0;");
    }

    #[test]
    fn clearing_a_breakpoint_restores_the_original_instruction() {
        let mut stub = GdbStub::new();
        let mut p = new_processor();
        p.memory.write_u32(0x40, 0x1234_5678);
        stub.handle(&mut p, "Z0,40,4");
        assert_eq!(p.memory.read_u32(0x40), BREAKPOINT_INST);
        stub.handle(&mut p, "z0,40,4");
        assert_eq!(p.memory.read_u32(0x40), 0x1234_5678);
    }

    #[test]
    fn start_no_ack_mode_is_acknowledged() {
        let mut stub = GdbStub::new();
        let mut p = new_processor();
        assert_eq!(stub.handle(&mut p, "QStartNoAckMode"), "OK");
        assert!(stub.no_ack_mode);
    }

    #[test]
    fn thread_info_query_lists_every_thread() {
        let mut stub = GdbStub::new();
        let mut p = new_processor();
        assert_eq!(stub.handle(&mut p, "qfThreadInfo"), "m0,1");
        assert_eq!(stub.handle(&mut p, "qsThreadInfo"), "l");
    }
}
