//! Register file, decode/execute loop, and the `Processor`/`Core`/`Thread`
//! state hierarchy (spec §3.2, §4.9-§4.10). [`crate::isa`] supplies the
//! field enums and the scalar ALU; this module owns the architectural state
//! those operate against and the fetch/decode/execute/trap control flow.
//!
//! Bit layout is this reimplementation's own invention — the spec describes
//! instruction classes by their prefix bits and enumerates operations and
//! fields, but never pins down a concrete encoding, and nothing in spec §8
//! is sensitive to it. The prefix code itself (`0`, `10`, `110`, `1110`,
//! `1111`) is taken directly from spec §4.9.

use nyuzi_common::{log_debug, log_warning, LogCategory};

use crate::error::{Error, Result};
use crate::isa::{
    extract_signed, extract_unsigned, scalar_arithmetic_op, ArithmeticOp, BranchType, CacheControlOp, ControlRegister, ImmediateArithFormat, MemoryOp, RegisterArithFormat, BREAKPOINT_INST,
    LINK_REG, NUM_REGISTERS, NUM_VECTOR_LANES, PC_REG,
};
use crate::memory::{Memory, MmioDevice, CACHE_LINE_LENGTH};
use crate::mmu::{page_offset, round_to_page, Tlb, TLB_EXECUTABLE, TLB_PRESENT, TLB_SUPERVISOR, TLB_WRITE_ENABLE};
use crate::trap::{encode_trap_cause, pending_interrupts, SavedTrapState, TrapCause};

fn category() -> LogCategory {
    LogCategory::new("cpu")
}

/// `{interrupt, mmu, supervisor}` (spec §3.2 Thread flags, §4.9 `FLAGS` CR).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Flags {
    pub interrupt_enable: bool,
    pub mmu_enable: bool,
    pub supervisor: bool,
}

impl Flags {
    fn to_bits(self) -> u32 {
        (self.interrupt_enable as u32) | (self.mmu_enable as u32) << 1 | (self.supervisor as u32) << 2
    }

    fn from_bits(bits: u32) -> Self {
        Self { interrupt_enable: bits & 1 != 0, mmu_enable: bits & 2 != 0, supervisor: bits & 4 != 0 }
    }

    /// The flags a thread runs under immediately after a trap is dispatched:
    /// physically addressed, interrupts masked, supervisor (spec §4.10).
    fn trap_entry() -> Self {
        Self { interrupt_enable: false, mmu_enable: false, supervisor: true }
    }
}

/// 32 scalar registers plus 32 vector registers of 16 lanes each (spec §3.2).
/// `scalar[PC_REG]`/`scalar[LINK_REG]` are never written through the normal
/// GP path; they exist only so GDB register packing (spec §6.5: "28..31
/// generic aliases fp/sp/ra/pc") can address a uniform `0..=31` ID space.
#[derive(Clone)]
pub struct RegisterFile {
    pub scalar: [u32; NUM_REGISTERS],
    pub vector: [[u32; NUM_VECTOR_LANES]; NUM_REGISTERS],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self { scalar: [0; NUM_REGISTERS], vector: [[0; NUM_VECTOR_LANES]; NUM_REGISTERS] }
    }
}

/// One architectural breakpoint (spec §3.2): the word at `pc` has been
/// overwritten with [`BREAKPOINT_INST`]; `restart` is set by the GDB stub
/// (§4.12, §9) immediately before single-stepping over it so the next
/// encounter with the sentinel transparently executes `original_instruction`
/// once instead of trapping.
#[derive(Clone, Copy, Debug)]
pub struct Breakpoint {
    pub pc: u32,
    pub original_instruction: u32,
    pub restart: bool,
}

/// One hardware thread's architectural state (spec §3.2).
#[derive(Clone)]
pub struct Thread {
    pub id: u32,
    pub pc: u32,
    pub regs: RegisterFile,
    pub flags: Flags,
    pub asid: u32,
    pub page_dir: u32,
    pub interrupt_mask: u32,
    pub latched_interrupts: u32,
    /// Cache-line number of the last synchronized load, or `None` (spec's
    /// `INVALID`) when there isn't one to satisfy a matching sync store.
    pub last_sync_load_addr: Option<u32>,
    /// `0..16`; which lane of a resident scatter/gather executes next.
    pub subcycle: u32,
    pub scratchpad: [u32; 2],
    /// One level of trap nesting: `trap_state[0]` is the innermost saved
    /// state, `trap_state[1]` the next one out (spec §4.10).
    pub trap_state: [SavedTrapState; 2],
}

impl Thread {
    fn new(id: u32) -> Self {
        Self {
            id,
            pc: 0,
            regs: RegisterFile::default(),
            flags: Flags::default(),
            asid: 0,
            page_dir: 0,
            interrupt_mask: 0,
            latched_interrupts: 0,
            last_sync_load_addr: None,
            subcycle: 0,
            scratchpad: [0; 2],
            trap_state: [SavedTrapState::default(); 2],
        }
    }

    fn read_scalar(&self, reg: u32) -> u32 {
        self.regs.scalar[reg as usize & 0x1f]
    }

    fn write_scalar(&mut self, reg: u32, value: u32) {
        self.regs.scalar[reg as usize & 0x1f] = value;
    }

    /// Current value of GDB register `id` (spec §6.5): `0..31` scalar,
    /// `31` aliased to live `pc` rather than the (otherwise-unused) 32nd GP
    /// register slot, `32..63` vector.
    pub fn gdb_read_register(&self, id: u32) -> [u32; NUM_VECTOR_LANES] {
        if id == PC_REG as u32 {
            let mut out = [0; NUM_VECTOR_LANES];
            out[0] = self.pc;
            out
        } else if id < 32 {
            let mut out = [0; NUM_VECTOR_LANES];
            out[0] = self.regs.scalar[id as usize];
            out
        } else {
            self.regs.vector[(id - 32) as usize & 0x1f]
        }
    }

    pub fn gdb_write_register(&mut self, id: u32, lanes: [u32; NUM_VECTOR_LANES]) {
        if id == PC_REG as u32 {
            self.pc = lanes[0];
        } else if id < 32 {
            self.regs.scalar[id as usize] = lanes[0];
        } else {
            self.regs.vector[(id - 32) as usize & 0x1f] = lanes;
        }
    }
}

/// One core: its own ITLB/DTLB, trap entry points, edge/level trigger
/// configuration, and an array of threads (spec §3.2).
#[derive(Clone)]
pub struct Core {
    pub itlb: Tlb,
    pub dtlb: Tlb,
    pub trap_handler_pc: u32,
    pub tlb_miss_handler_pc: u32,
    /// Bit *i* set means interrupt source *i* is level-triggered on this
    /// core; clear means edge-triggered (spec §3.2, §4.10).
    pub level_triggered_mask: u32,
    pub threads: Vec<Thread>,
}

impl Core {
    fn new(threads_per_core: u32, base_id: u32) -> Self {
        Self {
            itlb: Tlb::new(),
            dtlb: Tlb::new(),
            trap_handler_pc: 0,
            tlb_miss_handler_pc: 0,
            level_triggered_mask: 0,
            threads: (0..threads_per_core).map(|t| Thread::new(base_id + t)).collect(),
        }
    }
}

/// One architecturally visible side effect produced by a single
/// [`Processor::step_thread`] call (spec §4.11's cosim event kinds). At most
/// one is produced per call; a resident multi-cycle scatter/gather produces
/// one only on the subcycle that actually touches memory.
#[derive(Clone, Debug, PartialEq)]
pub enum SideEffect {
    /// A write to a 64-byte-aligned cache line: `byte_mask` identifies which
    /// of the 64 bytes this particular access touched; `line` holds the
    /// line's full post-write content as 16 little-endian words.
    Store { pc: u32, thread: u32, addr: u32, byte_mask: u64, line: [u32; 16] },
    VectorWriteback { pc: u32, thread: u32, reg: u32, lane_mask: u16, words: [u32; 16] },
    ScalarWriteback { pc: u32, thread: u32, reg: u32, value: u32 },
    /// Dispatched an interrupt (spec §4.11 `interrupt <thread> <pc>` event,
    /// which the cosim driver injects rather than observes).
    Trap { pc: u32, thread: u32, cause: TrapCause },
}

/// Owns all architectural state: the flat physical address space, every
/// core, the thread-enable mask, breakpoints, and the free-running
/// timer/cycle counters (spec §3.2 Processor).
pub struct Processor {
    pub memory: Memory,
    pub cores: Vec<Core>,
    threads_per_core: u32,
    pub thread_enable_mask: u32,
    /// Current level of each level-triggered interrupt source, shared by
    /// every core (spec §3.2's "32-bit level-triggered interrupt status
    /// word").
    pub level_status: u32,
    pub breakpoints: Vec<Breakpoint>,
    pub cycle_count: u64,
    cycle_count_start_offset: u64,
    pub timer_countdown: u32,
    /// When set, architectural traps are treated as hard failures too (spec
    /// §7 "stop-on-fault"), so a program under the debugger surfaces the
    /// first fault instead of quietly running the trap handler.
    pub stop_on_fault: bool,
    pub crashed: bool,
    pub trace: bool,
    device: Box<dyn MmioDevice>,
}

/// Interrupt source raised once per instruction when the countdown reaches
/// zero (spec §4.10 Timer).
pub const INT_TIMER: u32 = 1 << 0;

impl Processor {
    /// `num_cores * threads_per_core` threads, each enabled, sharing
    /// `memory_size` bytes of physical memory and no attached device.
    pub fn new(memory_size: u32, num_cores: u32, threads_per_core: u32) -> Result<Self> {
        let total_threads = num_cores * threads_per_core;
        if total_threads == 0 || total_threads > 32 {
            return Err(Error::TooManyThreads { num_cores, threads_per_core });
        }
        let cores = (0..num_cores).map(|c| Core::new(threads_per_core, c * threads_per_core)).collect();
        Ok(Self {
            memory: Memory::new(memory_size),
            cores,
            threads_per_core,
            thread_enable_mask: 1, // spec §3.2: processor starts with thread 0 running, the rest parked.
            level_status: 0,
            breakpoints: Vec::new(),
            cycle_count: 0,
            cycle_count_start_offset: 0,
            timer_countdown: 0,
            stop_on_fault: false,
            crashed: false,
            trace: false,
            device: Box::new(crate::memory::NullDevice),
        })
    }

    pub fn attach_device(&mut self, device: Box<dyn MmioDevice>) {
        self.device = device;
    }

    pub fn set_trace(&mut self, on: bool) {
        self.trace = on;
    }

    /// `thread_enable_mask == 0` means the whole processor is halted (spec
    /// §3.2 invariant).
    pub fn halted(&self) -> bool {
        self.thread_enable_mask == 0
    }

    fn global_thread_index(&self, core: usize, local: usize) -> u32 {
        (core as u32) * self.threads_per_core + local as u32
    }

    fn thread_enabled(&self, global_id: u32) -> bool {
        self.thread_enable_mask & (1 << global_id) != 0
    }

    pub fn resume_threads(&mut self, mask: u32) {
        self.thread_enable_mask |= mask;
    }

    pub fn halt_threads(&mut self, mask: u32) {
        self.thread_enable_mask &= !mask;
    }

    pub fn thread(&self, core: usize, local: usize) -> &Thread {
        &self.cores[core].threads[local]
    }

    pub fn thread_mut(&mut self, core: usize, local: usize) -> &mut Thread {
        &mut self.cores[core].threads[local]
    }

    /// Find `(core, local)` for a global thread id, used by the GDB stub and
    /// the cosim driver, which both address threads by a flat id.
    pub fn locate_thread(&self, global_id: u32) -> Option<(usize, usize)> {
        if global_id as usize >= self.cores.len() * self.threads_per_core as usize {
            return None;
        }
        Some((global_id as usize / self.threads_per_core as usize, global_id as usize % self.threads_per_core as usize))
    }

    /// Runs every enabled thread's next instruction once, round-robin, and
    /// ticks the global timer once per executed instruction (spec §2's
    /// "outer loop dispatches a time slice ... to one or all enabled
    /// threads in round-robin"). Returns the side effects produced, in
    /// thread order.
    pub fn execute_instructions(&mut self, quanta: u32) -> bool {
        if self.crashed {
            return false;
        }
        for _ in 0..quanta {
            if self.halted() {
                return true;
            }
            for core in 0..self.cores.len() {
                for local in 0..self.cores[core].threads.len() {
                    let global_id = self.global_thread_index(core, local);
                    if !self.thread_enabled(global_id) {
                        continue;
                    }
                    self.step_thread(core, local);
                    if self.crashed {
                        return false;
                    }
                }
            }
            self.tick_timer();
        }
        true
    }

    fn tick_timer(&mut self) {
        if self.timer_countdown == 0 {
            return;
        }
        self.timer_countdown -= 1;
        self.cycle_count += 1;
        if self.timer_countdown == 0 {
            self.raise_interrupt_all_cores(INT_TIMER);
        }
    }

    pub fn cycle_count_register(&self) -> u64 {
        self.cycle_count + self.cycle_count_start_offset
    }

    pub fn set_cycle_count_start_offset(&mut self, offset: u64) {
        self.cycle_count_start_offset = offset;
    }

    /// Raise interrupt source `bit` on every thread of `core` (spec §4.10):
    /// level sources update the processor-wide level status word, edge
    /// sources latch on every thread so a later ack only clears that
    /// thread's own copy.
    pub fn raise_interrupt(&mut self, core: usize, bit: u32) {
        if self.cores[core].level_triggered_mask & bit != 0 {
            self.level_status |= bit;
        } else {
            for thread in &mut self.cores[core].threads {
                thread.latched_interrupts |= bit;
            }
        }
    }

    fn raise_interrupt_all_cores(&mut self, bit: u32) {
        for core in 0..self.cores.len() {
            self.raise_interrupt(core, bit);
        }
    }

    /// Unconditionally dispatches an interrupt trap on `global_id`,
    /// bypassing `FLAGS.interrupt`/`INTERRUPT_MASK` (spec §4.11: the cosim
    /// driver *injects* an `interrupt <thread> <pc>` event rather than
    /// waiting for the emulator to decide to take one on its own). Used only
    /// by `nyuzi_cosim`, which must keep the emulator's interrupt timing in
    /// lockstep with an external reference rather than the emulator's own
    /// `FLAGS`/mask state.
    pub fn force_interrupt(&mut self, global_id: u32, at_pc: u32) -> Result<()> {
        let (core, local) = self.locate_thread(global_id).ok_or(Error::OutOfRange { what: "cosim interrupt thread", index: global_id })?;
        self.cores[core].threads[local].pc = at_pc;
        self.dispatch_trap(core, local, TrapCause::Interrupt, false, false, 0, at_pc);
        Ok(())
    }

    /// Runs a single instruction step (or one lane of a resident
    /// scatter/gather) on `(core, local)`. Panics are never used for
    /// architectural conditions; emulator-only hard failures set
    /// `self.crashed` and are reported through [`Processor::crashed`].
    pub fn step_thread(&mut self, core: usize, local: usize) -> Option<SideEffect> {
        let global_id = self.global_thread_index(core, local);

        if self.check_and_dispatch_interrupt(core, local) {
            return Some(SideEffect::Trap { pc: self.cores[core].threads[local].pc, thread: global_id, cause: TrapCause::Interrupt });
        }

        let fetch_pc = self.cores[core].threads[local].pc;
        if fetch_pc % 4 != 0 {
            self.hard_fail(&format!("thread {global_id}: misaligned pc {fetch_pc:#010x}"));
            return None;
        }

        let mmu_enabled = self.cores[core].threads[local].flags.mmu_enable;
        let phys_pc = match self.translate(core, local, fetch_pc, Access::Fetch, mmu_enabled) {
            Ok(addr) => addr,
            Err(cause) => {
                self.dispatch_trap(core, local, cause, false, false, fetch_pc, fetch_pc);
                return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause });
            }
        };
        if !self.memory.in_range(phys_pc, 4) {
            self.hard_fail(&format!("thread {global_id}: fetch address {phys_pc:#010x} out of range"));
            return None;
        }
        let instr = self.memory.read_u32(phys_pc);

        if instr == BREAKPOINT_INST {
            if let Some(effect) = self.handle_breakpoint_sentinel(core, local, fetch_pc, global_id) {
                return effect;
            }
        }

        if self.trace {
            log_debug!(category(), "thread {global_id} pc={fetch_pc:#010x} instr={instr:#010x}");
        }

        self.execute(core, local, global_id, fetch_pc, instr)
    }

    /// Returns `Some(effect-or-none)` if the sentinel was handled here
    /// (either transparently restarted or trapped); `None` means the caller
    /// should fall through to normal decode (unreachable in practice, kept
    /// for clarity at the call site).
    fn handle_breakpoint_sentinel(&mut self, core: usize, local: usize, fetch_pc: u32, global_id: u32) -> Option<Option<SideEffect>> {
        if let Some(bp) = self.breakpoints.iter_mut().find(|b| b.pc == fetch_pc) {
            if bp.restart {
                bp.restart = false;
                let original = bp.original_instruction;
                return Some(self.execute(core, local, global_id, fetch_pc, original));
            }
        }
        self.dispatch_trap(core, local, TrapCause::Breakpoint, false, false, fetch_pc, fetch_pc);
        Some(Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause: TrapCause::Breakpoint }))
    }

    fn check_and_dispatch_interrupt(&mut self, core: usize, local: usize) -> bool {
        let thread = &self.cores[core].threads[local];
        if !thread.flags.interrupt_enable {
            return false;
        }
        let level_mask = self.cores[core].level_triggered_mask;
        let pending = pending_interrupts(level_mask, self.level_status, thread.latched_interrupts);
        if pending & thread.interrupt_mask == 0 {
            return false;
        }
        let saved_pc = thread.pc;
        self.dispatch_trap(core, local, TrapCause::Interrupt, false, false, 0, saved_pc);
        true
    }

    /// Dispatches `cause` on `(core, local)`: pushes the nested save slot,
    /// enters trap-entry flags, and redirects `pc` to the core's trap
    /// handler (or TLB-miss handler) entry point (spec §4.10).
    #[allow(clippy::too_many_arguments)]
    fn dispatch_trap(&mut self, core: usize, local: usize, cause: TrapCause, is_store: bool, is_data_cache: bool, access_address: u32, saved_pc: u32) {
        let handler_pc = if cause == TrapCause::TlbMiss { self.cores[core].tlb_miss_handler_pc } else { self.cores[core].trap_handler_pc };
        let thread = &mut self.cores[core].threads[local];
        let slot = SavedTrapState {
            trap_cause: encode_trap_cause(cause, is_store, is_data_cache),
            pc: saved_pc,
            access_address,
            scratchpad0: thread.scratchpad[0],
            scratchpad1: thread.scratchpad[1],
            subcycle: thread.subcycle,
            enable_interrupt: thread.flags.interrupt_enable,
            enable_mmu: thread.flags.mmu_enable,
            enable_supervisor: thread.flags.supervisor,
        };
        thread.trap_state[1] = thread.trap_state[0];
        thread.trap_state[0] = slot;
        thread.flags = Flags::trap_entry();
        thread.subcycle = 0;
        thread.pc = handler_pc;

        if !cause.always_recoverable() && self.stop_on_fault {
            self.hard_fail(&format!("thread {}: trap {:?} while stop-on-fault is set", thread.id, cause));
        }
    }

    fn eret(&mut self, core: usize, local: usize) -> Result<()> {
        let thread = &mut self.cores[core].threads[local];
        if !thread.flags.supervisor {
            return Err(Error::OutOfRange { what: "eret requires supervisor mode", index: thread.id });
        }
        let slot = thread.trap_state[0];
        thread.pc = slot.pc;
        thread.subcycle = slot.subcycle;
        thread.flags = Flags { interrupt_enable: slot.enable_interrupt, mmu_enable: slot.enable_mmu, supervisor: slot.enable_supervisor };
        thread.scratchpad[0] = slot.scratchpad0;
        thread.scratchpad[1] = slot.scratchpad1;
        thread.trap_state[0] = thread.trap_state[1];
        thread.trap_state[1] = SavedTrapState::default();
        Ok(())
    }

    fn hard_fail(&mut self, message: &str) {
        log_warning!(category(), "{message}");
        self.crashed = true;
    }

    fn translate(&mut self, core: usize, local: usize, virtual_addr: u32, access: Access, mmu_enabled: bool) -> std::result::Result<u32, TrapCause> {
        if !mmu_enabled {
            return Ok(virtual_addr);
        }
        let thread = &self.cores[core].threads[local];
        let asid = thread.asid;
        let supervisor = thread.flags.supervisor;
        let tlb = if access == Access::Fetch { &self.cores[core].itlb } else { &self.cores[core].dtlb };
        let Some(flags) = tlb.lookup(virtual_addr, asid) else {
            return Err(TrapCause::TlbMiss);
        };
        if flags & TLB_PRESENT == 0 {
            return Err(TrapCause::PageFault);
        }
        if flags & TLB_SUPERVISOR != 0 && !supervisor {
            return Err(TrapCause::SupervisorAccess);
        }
        match access {
            Access::Fetch if flags & TLB_EXECUTABLE == 0 => Err(TrapCause::NotExecutable),
            Access::Store if flags & TLB_WRITE_ENABLE == 0 => Err(TrapCause::IllegalStore),
            _ => Ok(round_to_page(flags) | page_offset(virtual_addr)),
        }
    }

    /// Invalidate the sync-load scoreboard on every thread whose last
    /// synchronized load targeted `cache_line` (spec §5: "any write to the
    /// same cache line by any thread clears that field across all
    /// threads").
    fn invalidate_sync_scoreboard(&mut self, cache_line: u32) {
        for core in &mut self.cores {
            for thread in &mut core.threads {
                if thread.last_sync_load_addr == Some(cache_line) {
                    thread.last_sync_load_addr = None;
                }
            }
        }
    }

    fn read_device_or_memory(&mut self, phys: u32, access_size: u32) -> Option<u32> {
        if Memory::is_device_address(phys) {
            if access_size != 4 {
                self.hard_fail(&format!("MMIO read at {phys:#010x} with access size {access_size} (only 32-bit long accesses are valid)"));
                return None;
            }
            Some(self.device.read(phys))
        } else {
            Some(self.memory.read_u32(phys))
        }
    }

    fn write_device_or_memory(&mut self, phys: u32, access_size: u32, value: u32) -> bool {
        if Memory::is_device_address(phys) {
            if access_size != 4 {
                self.hard_fail(&format!("MMIO write at {phys:#010x} with access size {access_size} (only 32-bit long accesses are valid)"));
                return false;
            }
            self.device.write(phys, value);
            true
        } else {
            match access_size {
                1 => self.memory.write_u8(phys, value as u8),
                2 => self.memory.write_u16(phys, value as u16),
                4 => self.memory.write_u32(phys, value),
                _ => unreachable!(),
            }
            true
        }
    }

    /// Decodes and executes `instr`, which was fetched from `fetch_pc`.
    fn execute(&mut self, core: usize, local: usize, global_id: u32, fetch_pc: u32, instr: u32) -> Option<SideEffect> {
        if instr >> 31 == 0 {
            self.execute_immediate_arith(core, local, global_id, fetch_pc, instr)
        } else if instr >> 30 == 0b10 {
            self.execute_memory(core, local, global_id, fetch_pc, instr)
        } else if instr >> 29 == 0b110 {
            self.execute_register_arith(core, local, global_id, fetch_pc, instr)
        } else if instr >> 28 == 0b1110 {
            self.execute_cache_control(core, local, fetch_pc, instr);
            self.retire(core, local, fetch_pc);
            None
        } else if instr >> 28 == 0b1111 {
            self.execute_branch(core, local, global_id, fetch_pc, instr)
        } else {
            self.dispatch_trap(core, local, TrapCause::IllegalInstruction, false, false, fetch_pc, fetch_pc);
            Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause: TrapCause::IllegalInstruction })
        }
    }

    /// Advances `pc` past a single-cycle instruction at `fetch_pc`, leaving
    /// `subcycle` at zero. Branches set `pc` themselves and never call this.
    fn retire(&mut self, core: usize, local: usize, fetch_pc: u32) {
        let thread = &mut self.cores[core].threads[local];
        thread.pc = fetch_pc + 4;
        thread.subcycle = 0;
    }

    fn execute_immediate_arith(&mut self, core: usize, local: usize, global_id: u32, fetch_pc: u32, instr: u32) -> Option<SideEffect> {
        let Some(fmt) = ImmediateArithFormat::decode(extract_unsigned(instr, 29, 2)) else {
            self.dispatch_trap(core, local, TrapCause::IllegalInstruction, false, false, fetch_pc, fetch_pc);
            return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause: TrapCause::IllegalInstruction });
        };

        if fmt == ImmediateArithFormat::MoveHigh {
            let dest = extract_unsigned(instr, 24, 5);
            let imm16 = extract_unsigned(instr, 8, 16);
            let value = imm16 << 16;
            self.cores[core].threads[local].write_scalar(dest, value);
            self.retire(core, local, fetch_pc);
            return Some(SideEffect::ScalarWriteback { pc: fetch_pc, thread: global_id, reg: dest, value });
        }

        let Some(op) = ArithmeticOp::decode(extract_unsigned(instr, 23, 6)) else {
            self.dispatch_trap(core, local, TrapCause::IllegalInstruction, false, false, fetch_pc, fetch_pc);
            return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause: TrapCause::IllegalInstruction });
        };
        let dest = extract_unsigned(instr, 18, 5);
        let src1 = extract_unsigned(instr, 13, 5);
        let imm = extract_signed(instr, 0, 13) as u32;

        if matches!(op, ArithmeticOp::Syscall | ArithmeticOp::Breakpoint) {
            let cause = if op == ArithmeticOp::Syscall { TrapCause::Syscall } else { TrapCause::Breakpoint };
            self.dispatch_trap(core, local, cause, false, false, fetch_pc, fetch_pc);
            return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause });
        }

        let thread = &mut self.cores[core].threads[local];
        let effect = match fmt {
            ImmediateArithFormat::ScalarScalar => {
                let value = scalar_arithmetic_op(op, thread.read_scalar(src1), imm);
                thread.write_scalar(dest, value);
                SideEffect::ScalarWriteback { pc: fetch_pc, thread: global_id, reg: dest, value }
            }
            ImmediateArithFormat::VectorVector => {
                let mut words = [0u32; 16];
                for lane in 0..16 {
                    words[lane] = scalar_arithmetic_op(op, thread.regs.vector[src1 as usize][lane], imm);
                }
                thread.regs.vector[dest as usize] = words;
                SideEffect::VectorWriteback { pc: fetch_pc, thread: global_id, reg: dest, lane_mask: 0xffff, words }
            }
            ImmediateArithFormat::VectorVectorMasked => {
                let mask_reg = extract_unsigned(instr, 8, 5);
                let mask = thread.read_scalar(mask_reg) as u16;
                let mut words = thread.regs.vector[dest as usize];
                for lane in 0..16 {
                    if mask & (1 << lane) != 0 {
                        words[lane] = scalar_arithmetic_op(op, thread.regs.vector[src1 as usize][lane], imm);
                    }
                }
                thread.regs.vector[dest as usize] = words;
                SideEffect::VectorWriteback { pc: fetch_pc, thread: global_id, reg: dest, lane_mask: mask, words }
            }
            ImmediateArithFormat::MoveHigh => unreachable!(),
        };
        self.retire(core, local, fetch_pc);
        Some(effect)
    }

    fn execute_register_arith(&mut self, core: usize, local: usize, global_id: u32, fetch_pc: u32, instr: u32) -> Option<SideEffect> {
        let Some(fmt) = RegisterArithFormat::decode(extract_unsigned(instr, 26, 3)) else {
            self.dispatch_trap(core, local, TrapCause::IllegalInstruction, false, false, fetch_pc, fetch_pc);
            return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause: TrapCause::IllegalInstruction });
        };
        let Some(op) = ArithmeticOp::decode(extract_unsigned(instr, 20, 6)) else {
            self.dispatch_trap(core, local, TrapCause::IllegalInstruction, false, false, fetch_pc, fetch_pc);
            return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause: TrapCause::IllegalInstruction });
        };
        let dest = extract_unsigned(instr, 15, 5);
        let src1 = extract_unsigned(instr, 10, 5);
        let src2 = extract_unsigned(instr, 5, 5);
        let mask_reg = extract_unsigned(instr, 0, 5);

        if matches!(op, ArithmeticOp::Syscall | ArithmeticOp::Breakpoint) {
            let cause = if op == ArithmeticOp::Syscall { TrapCause::Syscall } else { TrapCause::Breakpoint };
            self.dispatch_trap(core, local, cause, false, false, fetch_pc, fetch_pc);
            return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause });
        }

        let thread = &mut self.cores[core].threads[local];
        let effect = match fmt {
            RegisterArithFormat::ScalarScalar => {
                let value = if op.is_compare() {
                    scalar_arithmetic_op(op, thread.read_scalar(src1), thread.read_scalar(src2)) & 0xffff
                } else if op == ArithmeticOp::Shuffle {
                    let v = thread.regs.vector[src1 as usize];
                    let idx = thread.read_scalar(src2) as usize & 0xf;
                    v[idx]
                } else if op == ArithmeticOp::GetLane {
                    let v = thread.regs.vector[src1 as usize];
                    v[thread.read_scalar(src2) as usize & 0xf]
                } else {
                    scalar_arithmetic_op(op, thread.read_scalar(src1), thread.read_scalar(src2))
                };
                thread.write_scalar(dest, value);
                SideEffect::ScalarWriteback { pc: fetch_pc, thread: global_id, reg: dest, value }
            }
            RegisterArithFormat::VectorScalar | RegisterArithFormat::VectorScalarMasked => {
                let mask: u16 = if fmt == RegisterArithFormat::VectorScalarMasked { thread.read_scalar(mask_reg) as u16 } else { 0xffff };
                let scalar = thread.read_scalar(src2);
                let mut words = thread.regs.vector[dest as usize];
                for lane in 0..16 {
                    if mask & (1 << lane) != 0 {
                        words[lane] = vector_lane_op(op, thread.regs.vector[src1 as usize][lane], scalar);
                    }
                }
                thread.regs.vector[dest as usize] = words;
                SideEffect::VectorWriteback { pc: fetch_pc, thread: global_id, reg: dest, lane_mask: mask, words }
            }
            RegisterArithFormat::VectorVector | RegisterArithFormat::VectorVectorMasked => {
                let mask: u16 = if fmt == RegisterArithFormat::VectorVectorMasked { thread.read_scalar(mask_reg) as u16 } else { 0xffff };
                let mut words = thread.regs.vector[dest as usize];
                if op == ArithmeticOp::Shuffle {
                    let src = thread.regs.vector[src1 as usize];
                    let idx = thread.regs.vector[src2 as usize];
                    for lane in 0..16 {
                        if mask & (1 << lane) != 0 {
                            words[lane] = src[idx[lane] as usize & 0xf];
                        }
                    }
                } else if op.is_compare() {
                    let mut cmp_mask: u16 = 0;
                    for lane in 0..16 {
                        if mask & (1 << lane) != 0 && scalar_arithmetic_op(op, thread.regs.vector[src1 as usize][lane], thread.regs.vector[src2 as usize][lane]) != 0 {
                            cmp_mask |= 1 << lane;
                        }
                    }
                    thread.write_scalar(dest, cmp_mask as u32);
                    self.retire(core, local, fetch_pc);
                    return Some(SideEffect::ScalarWriteback { pc: fetch_pc, thread: global_id, reg: dest, value: cmp_mask as u32 });
                } else {
                    for lane in 0..16 {
                        if mask & (1 << lane) != 0 {
                            words[lane] = vector_lane_op(op, thread.regs.vector[src1 as usize][lane], thread.regs.vector[src2 as usize][lane]);
                        }
                    }
                }
                thread.regs.vector[dest as usize] = words;
                SideEffect::VectorWriteback { pc: fetch_pc, thread: global_id, reg: dest, lane_mask: mask, words }
            }
        };
        self.retire(core, local, fetch_pc);
        Some(effect)
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_memory(&mut self, core: usize, local: usize, global_id: u32, fetch_pc: u32, instr: u32) -> Option<SideEffect> {
        let Some(op) = MemoryOp::decode(extract_unsigned(instr, 25, 4)) else {
            self.dispatch_trap(core, local, TrapCause::IllegalInstruction, false, false, fetch_pc, fetch_pc);
            return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause: TrapCause::IllegalInstruction });
        };
        let is_load = extract_unsigned(instr, 24, 1) != 0;
        let reg = extract_unsigned(instr, 19, 5);

        match op {
            MemoryOp::ControlRegister => self.execute_control_register(core, local, global_id, fetch_pc, instr, is_load, reg),
            MemoryOp::ScatterGather | MemoryOp::ScatterGatherMasked => self.execute_scatter_gather(core, local, global_id, fetch_pc, instr, op, is_load, reg),
            MemoryOp::BlockVector | MemoryOp::BlockVectorMasked => self.execute_block_vector(core, local, global_id, fetch_pc, instr, op, is_load, reg),
            MemoryOp::Sync => self.execute_sync(core, local, global_id, fetch_pc, instr, is_load, reg),
            _ => self.execute_scalar_memory(core, local, global_id, fetch_pc, instr, op, is_load, reg),
        }
    }

    fn effective_address(&self, core: usize, local: usize, instr: u32) -> u32 {
        let base_reg = extract_unsigned(instr, 14, 5);
        let offset = extract_signed(instr, 0, 14);
        self.cores[core].threads[local].read_scalar(base_reg).wrapping_add(offset as u32)
    }

    fn execute_scalar_memory(&mut self, core: usize, local: usize, global_id: u32, fetch_pc: u32, instr: u32, op: MemoryOp, is_load: bool, reg: u32) -> Option<SideEffect> {
        let addr = self.effective_address(core, local, instr);
        let access_size = op.access_size();
        if addr % access_size != 0 {
            self.dispatch_trap(core, local, TrapCause::UnalignedAccess, !is_load, true, addr, fetch_pc);
            return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause: TrapCause::UnalignedAccess });
        }
        let mmu_enabled = self.cores[core].threads[local].flags.mmu_enable;
        let access = if is_load { Access::Load } else { Access::Store };
        let phys = match self.translate(core, local, addr, access, mmu_enabled) {
            Ok(p) => p,
            Err(cause) => {
                self.dispatch_trap(core, local, cause, !is_load, true, addr, fetch_pc);
                return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause });
            }
        };

        if is_load {
            let raw = self.read_device_or_memory(phys, access_size)?;
            let value = match op {
                MemoryOp::Byte => raw & 0xff,
                MemoryOp::ByteSext => (raw as i8) as i32 as u32,
                MemoryOp::Short => raw & 0xffff,
                MemoryOp::ShortSext => (raw as i16) as i32 as u32,
                MemoryOp::Long => raw,
                _ => unreachable!(),
            };
            self.cores[core].threads[local].write_scalar(reg, value);
            self.retire(core, local, fetch_pc);
            Some(SideEffect::ScalarWriteback { pc: fetch_pc, thread: global_id, reg, value })
        } else {
            let value = self.cores[core].threads[local].read_scalar(reg);
            if !self.write_device_or_memory(phys, access_size, value) {
                return None;
            }
            let line_addr = phys & !(CACHE_LINE_LENGTH - 1);
            let byte_mask = byte_mask_for(phys, access_size);
            if !Memory::is_device_address(phys) {
                self.invalidate_sync_scoreboard(line_addr / CACHE_LINE_LENGTH);
            }
            self.retire(core, local, fetch_pc);
            Some(SideEffect::Store { pc: fetch_pc, thread: global_id, addr: line_addr, byte_mask, line: self.read_line(line_addr) })
        }
    }

    fn execute_sync(&mut self, core: usize, local: usize, global_id: u32, fetch_pc: u32, instr: u32, is_load: bool, reg: u32) -> Option<SideEffect> {
        let addr = self.effective_address(core, local, instr);
        if addr % 4 != 0 {
            self.dispatch_trap(core, local, TrapCause::UnalignedAccess, !is_load, true, addr, fetch_pc);
            return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause: TrapCause::UnalignedAccess });
        }
        let mmu_enabled = self.cores[core].threads[local].flags.mmu_enable;
        let access = if is_load { Access::Load } else { Access::Store };
        let phys = match self.translate(core, local, addr, access, mmu_enabled) {
            Ok(p) => p,
            Err(cause) => {
                self.dispatch_trap(core, local, cause, !is_load, true, addr, fetch_pc);
                return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause });
            }
        };
        let line = phys / CACHE_LINE_LENGTH;

        if is_load {
            let value = self.memory.read_u32(phys);
            self.cores[core].threads[local].write_scalar(reg, value);
            self.cores[core].threads[local].last_sync_load_addr = Some(line);
            self.retire(core, local, fetch_pc);
            Some(SideEffect::ScalarWriteback { pc: fetch_pc, thread: global_id, reg, value })
        } else {
            let succeeds = self.cores[core].threads[local].last_sync_load_addr == Some(line);
            self.retire(core, local, fetch_pc);
            if succeeds {
                let value = self.cores[core].threads[local].read_scalar(reg);
                self.memory.write_u32(phys, value);
                self.invalidate_sync_scoreboard(line);
                self.cores[core].threads[local].write_scalar(reg, 1);
                let line_addr = phys & !(CACHE_LINE_LENGTH - 1);
                Some(SideEffect::Store { pc: fetch_pc, thread: global_id, addr: line_addr, byte_mask: byte_mask_for(phys, 4), line: self.read_line(line_addr) })
            } else {
                self.cores[core].threads[local].write_scalar(reg, 0);
                Some(SideEffect::ScalarWriteback { pc: fetch_pc, thread: global_id, reg, value: 0 })
            }
        }
    }

    fn execute_control_register(&mut self, core: usize, local: usize, global_id: u32, fetch_pc: u32, instr: u32, is_load: bool, reg: u32) -> Option<SideEffect> {
        let cr_index = extract_unsigned(instr, 0, 6);
        let Some(cr) = ControlRegister::decode(cr_index) else {
            self.dispatch_trap(core, local, TrapCause::IllegalInstruction, false, false, fetch_pc, fetch_pc);
            return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause: TrapCause::IllegalInstruction });
        };
        if !self.cores[core].threads[local].flags.supervisor {
            self.dispatch_trap(core, local, TrapCause::PrivilegedOp, false, false, fetch_pc, fetch_pc);
            return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause: TrapCause::PrivilegedOp });
        }

        if is_load {
            let value = self.read_control_register(core, local, cr);
            self.cores[core].threads[local].write_scalar(reg, value);
            self.retire(core, local, fetch_pc);
            Some(SideEffect::ScalarWriteback { pc: fetch_pc, thread: global_id, reg, value })
        } else {
            let value = self.cores[core].threads[local].read_scalar(reg);
            self.write_control_register(core, local, cr, value);
            self.retire(core, local, fetch_pc);
            None // control-register writes are not an architecturally observable cosim event (spec §4.11 enumerates only memory/register-writeback/interrupt events).
        }
    }

    fn read_control_register(&self, core: usize, local: usize, cr: ControlRegister) -> u32 {
        let thread = &self.cores[core].threads[local];
        match cr {
            ControlRegister::ThreadId => thread.id,
            ControlRegister::TrapHandler => self.cores[core].trap_handler_pc,
            ControlRegister::TlbMissHandler => self.cores[core].tlb_miss_handler_pc,
            ControlRegister::TrapPc => thread.trap_state[0].pc,
            ControlRegister::TrapReason => thread.trap_state[0].trap_cause,
            ControlRegister::TrapAccessAddr => thread.trap_state[0].access_address,
            ControlRegister::Flags => thread.flags.to_bits(),
            ControlRegister::SavedFlags => Flags { interrupt_enable: thread.trap_state[0].enable_interrupt, mmu_enable: thread.trap_state[0].enable_mmu, supervisor: thread.trap_state[0].enable_supervisor }.to_bits(),
            ControlRegister::CurrentAsid => thread.asid,
            ControlRegister::PageDir => thread.page_dir,
            ControlRegister::CycleCount => self.cycle_count_register() as u32,
            ControlRegister::Scratchpad0 => thread.scratchpad[0],
            ControlRegister::Scratchpad1 => thread.scratchpad[1],
            ControlRegister::Subcycle => thread.subcycle,
            ControlRegister::InterruptPending => pending_interrupts(self.cores[core].level_triggered_mask, self.level_status, thread.latched_interrupts),
            ControlRegister::InterruptMask | ControlRegister::InterruptAck | ControlRegister::InterruptTrigger => 0, // write-only
        }
    }

    fn write_control_register(&mut self, core: usize, local: usize, cr: ControlRegister, value: u32) {
        match cr {
            ControlRegister::TrapHandler => self.cores[core].trap_handler_pc = value,
            ControlRegister::TlbMissHandler => self.cores[core].tlb_miss_handler_pc = value,
            ControlRegister::Flags => self.cores[core].threads[local].flags = Flags::from_bits(value),
            ControlRegister::SavedFlags => {
                let flags = Flags::from_bits(value);
                let slot = &mut self.cores[core].threads[local].trap_state[0];
                slot.enable_interrupt = flags.interrupt_enable;
                slot.enable_mmu = flags.mmu_enable;
                slot.enable_supervisor = flags.supervisor;
            }
            ControlRegister::CurrentAsid => self.cores[core].threads[local].asid = value,
            ControlRegister::PageDir => self.cores[core].threads[local].page_dir = value,
            ControlRegister::Scratchpad0 => self.cores[core].threads[local].scratchpad[0] = value,
            ControlRegister::Scratchpad1 => self.cores[core].threads[local].scratchpad[1] = value,
            ControlRegister::Subcycle => self.cores[core].threads[local].subcycle = value & 0xf,
            ControlRegister::InterruptMask => self.cores[core].threads[local].interrupt_mask = value,
            ControlRegister::InterruptAck => self.cores[core].threads[local].latched_interrupts &= !value,
            ControlRegister::InterruptTrigger => self.write_interrupt_trigger(core, value),
            // RO registers: a write is a no-op rather than an error (spec §7 only
            // calls out hard failures for MMIO-size mistakes and address range,
            // not for this).
            ControlRegister::ThreadId
            | ControlRegister::TrapPc
            | ControlRegister::TrapReason
            | ControlRegister::TrapAccessAddr
            | ControlRegister::CycleCount
            | ControlRegister::InterruptPending => {}
        }
    }

    /// Resolves open question O1: a bit whose trigger type changes (either
    /// direction) has its latched copy cleared on every thread of the core,
    /// and its level-status bit cleared too, so a transition never leaves a
    /// stale interrupt pending under the new trigger semantics.
    fn write_interrupt_trigger(&mut self, core: usize, value: u32) {
        let changed = self.cores[core].level_triggered_mask ^ value;
        self.cores[core].level_triggered_mask = value;
        if changed != 0 {
            self.level_status &= !changed;
            for thread in &mut self.cores[core].threads {
                thread.latched_interrupts &= !changed;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_block_vector(&mut self, core: usize, local: usize, global_id: u32, fetch_pc: u32, instr: u32, op: MemoryOp, is_load: bool, reg: u32) -> Option<SideEffect> {
        let addr = self.effective_address(core, local, instr);
        if addr % CACHE_LINE_LENGTH != 0 {
            self.dispatch_trap(core, local, TrapCause::UnalignedAccess, !is_load, true, addr, fetch_pc);
            return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause: TrapCause::UnalignedAccess });
        }
        let mmu_enabled = self.cores[core].threads[local].flags.mmu_enable;
        let access = if is_load { Access::Load } else { Access::Store };
        let phys = match self.translate(core, local, addr, access, mmu_enabled) {
            Ok(p) => p,
            Err(cause) => {
                self.dispatch_trap(core, local, cause, !is_load, true, addr, fetch_pc);
                return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause });
            }
        };
        let mask: u16 = if op == MemoryOp::BlockVectorMasked {
            let mask_reg = extract_unsigned(instr, 5, 5);
            self.cores[core].threads[local].read_scalar(mask_reg) as u16
        } else {
            0xffff
        };

        if is_load {
            let mut words = self.cores[core].threads[local].regs.vector[reg as usize];
            for lane in 0..16 {
                if mask & (1 << lane) != 0 {
                    words[lane] = self.memory.read_u32(phys + lane as u32 * 4);
                }
            }
            self.cores[core].threads[local].regs.vector[reg as usize] = words;
            self.retire(core, local, fetch_pc);
            Some(SideEffect::VectorWriteback { pc: fetch_pc, thread: global_id, reg, lane_mask: mask, words })
        } else {
            let words = self.cores[core].threads[local].regs.vector[reg as usize];
            for lane in 0..16 {
                if mask & (1 << lane) != 0 {
                    self.memory.write_u32(phys + lane as u32 * 4, words[lane]);
                }
            }
            self.invalidate_sync_scoreboard(phys / CACHE_LINE_LENGTH);
            self.retire(core, local, fetch_pc);
            Some(SideEffect::Store { pc: fetch_pc, thread: global_id, addr: phys, byte_mask: byte_mask_for_lanes(mask), line: self.read_line(phys) })
        }
    }

    /// One lane per cycle (spec §4.9): the instruction stays resident at
    /// `fetch_pc` while `subcycle` advances `0..16`, and only the lane whose
    /// index equals the current subcycle is touched per call.
    #[allow(clippy::too_many_arguments)]
    fn execute_scatter_gather(&mut self, core: usize, local: usize, global_id: u32, fetch_pc: u32, instr: u32, op: MemoryOp, is_load: bool, reg: u32) -> Option<SideEffect> {
        let addr_reg = extract_unsigned(instr, 14, 5);
        let mask: u16 = if op == MemoryOp::ScatterGatherMasked {
            let mask_reg = extract_unsigned(instr, 5, 5);
            self.cores[core].threads[local].read_scalar(mask_reg) as u16
        } else {
            0xffff
        };
        let lane = self.cores[core].threads[local].subcycle as usize;
        let lane_addr = self.cores[core].threads[local].regs.vector[addr_reg as usize][lane];
        let active = mask & (1 << lane) != 0;

        let mut effect = None;
        if active {
            if lane_addr % 4 != 0 {
                self.dispatch_trap(core, local, TrapCause::UnalignedAccess, !is_load, true, lane_addr, fetch_pc);
                return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause: TrapCause::UnalignedAccess });
            }
            let mmu_enabled = self.cores[core].threads[local].flags.mmu_enable;
            let access = if is_load { Access::Load } else { Access::Store };
            match self.translate(core, local, lane_addr, access, mmu_enabled) {
                Ok(phys) => {
                    if is_load {
                        let value = self.memory.read_u32(phys);
                        self.cores[core].threads[local].regs.vector[reg as usize][lane] = value;
                    } else {
                        let value = self.cores[core].threads[local].regs.vector[reg as usize][lane];
                        self.memory.write_u32(phys, value);
                        self.invalidate_sync_scoreboard(phys / CACHE_LINE_LENGTH);
                        let line_addr = phys & !(CACHE_LINE_LENGTH - 1);
                        effect = Some(SideEffect::Store { pc: fetch_pc, thread: global_id, addr: line_addr, byte_mask: byte_mask_for(phys, 4), line: self.read_line(line_addr) });
                    }
                }
                Err(cause) => {
                    self.dispatch_trap(core, local, cause, !is_load, true, lane_addr, fetch_pc);
                    return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause });
                }
            }
        }

        let thread = &mut self.cores[core].threads[local];
        if thread.subcycle == 15 {
            thread.pc = fetch_pc + 4;
            thread.subcycle = 0;
            if is_load {
                let words = thread.regs.vector[reg as usize];
                return Some(SideEffect::VectorWriteback { pc: fetch_pc, thread: global_id, reg, lane_mask: mask, words });
            }
        } else {
            thread.subcycle += 1;
        }
        effect
    }

    fn read_line(&self, line_addr: u32) -> [u32; 16] {
        std::array::from_fn(|i| self.memory.read_u32(line_addr + i as u32 * 4))
    }

    fn execute_cache_control(&mut self, core: usize, local: usize, fetch_pc: u32, instr: u32) {
        if !self.cores[core].threads[local].flags.supervisor {
            self.dispatch_trap(core, local, TrapCause::PrivilegedOp, false, false, fetch_pc, fetch_pc);
            return;
        }
        let Some(op) = CacheControlOp::decode(extract_unsigned(instr, 25, 3)) else {
            self.dispatch_trap(core, local, TrapCause::IllegalInstruction, false, false, fetch_pc, fetch_pc);
            return;
        };
        let addr_reg = extract_unsigned(instr, 20, 5);
        let data_reg = extract_unsigned(instr, 15, 5);
        let thread = &self.cores[core].threads[local];
        let vaddr = thread.read_scalar(addr_reg);
        let asid = thread.asid;

        match op {
            CacheControlOp::DtlbInsert => {
                let flags = self.cores[core].threads[local].read_scalar(data_reg);
                self.cores[core].dtlb.insert(vaddr, asid, flags);
            }
            CacheControlOp::ItlbInsert => {
                let flags = self.cores[core].threads[local].read_scalar(data_reg);
                self.cores[core].itlb.insert(vaddr, asid, flags);
            }
            CacheControlOp::InvalidateTlb => {
                self.cores[core].dtlb.invalidate(vaddr);
                self.cores[core].itlb.invalidate(vaddr);
            }
            CacheControlOp::InvalidateTlbAll => {
                self.cores[core].dtlb.invalidate_all();
                self.cores[core].itlb.invalidate_all();
            }
            CacheControlOp::Dflush | CacheControlOp::Dinvalidate => {
                let mmu_enabled = self.cores[core].threads[local].flags.mmu_enable;
                if let Err(cause) = self.translate(core, local, vaddr, Access::Load, mmu_enabled) {
                    self.dispatch_trap(core, local, cause, false, true, vaddr, fetch_pc);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_branch(&mut self, core: usize, local: usize, global_id: u32, fetch_pc: u32, instr: u32) -> Option<SideEffect> {
        let Some(branch) = BranchType::decode(extract_unsigned(instr, 25, 3)) else {
            self.dispatch_trap(core, local, TrapCause::IllegalInstruction, false, false, fetch_pc, fetch_pc);
            return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause: TrapCause::IllegalInstruction });
        };
        let next_pc = fetch_pc + 4;

        match branch {
            BranchType::Eret => {
                if self.eret(core, local).is_err() {
                    self.dispatch_trap(core, local, TrapCause::PrivilegedOp, false, false, fetch_pc, fetch_pc);
                    return Some(SideEffect::Trap { pc: fetch_pc, thread: global_id, cause: TrapCause::PrivilegedOp });
                }
                // An eret may immediately dispatch a newly-unmasked pending
                // interrupt rather than waiting for the next step (spec
                // §4.9 "may dispatch a pending interrupt immediately").
                if self.check_and_dispatch_interrupt(core, local) {
                    return Some(SideEffect::Trap { pc: self.cores[core].threads[local].pc, thread: global_id, cause: TrapCause::Interrupt });
                }
                None
            }
            BranchType::Register => {
                let src = extract_unsigned(instr, 20, 5);
                self.cores[core].threads[local].pc = self.cores[core].threads[local].read_scalar(src);
                None
            }
            BranchType::CallRegister => {
                let src = extract_unsigned(instr, 20, 5);
                let target = self.cores[core].threads[local].read_scalar(src);
                self.cores[core].threads[local].write_scalar(LINK_REG as u32, next_pc);
                self.cores[core].threads[local].pc = target;
                Some(SideEffect::ScalarWriteback { pc: fetch_pc, thread: global_id, reg: LINK_REG as u32, value: next_pc })
            }
            BranchType::Zero | BranchType::NotZero => {
                let src = extract_unsigned(instr, 20, 5);
                let offset = extract_signed(instr, 0, 20) * 4;
                let value = self.cores[core].threads[local].read_scalar(src);
                let taken = (branch == BranchType::Zero) == (value == 0);
                self.cores[core].threads[local].pc = if taken { (next_pc as i32).wrapping_add(offset) as u32 } else { next_pc };
                None
            }
            BranchType::Always => {
                let offset = extract_signed(instr, 0, 25) * 4;
                self.cores[core].threads[local].pc = (next_pc as i32).wrapping_add(offset) as u32;
                None
            }
            BranchType::CallOffset => {
                let offset = extract_signed(instr, 0, 25) * 4;
                self.cores[core].threads[local].write_scalar(LINK_REG as u32, next_pc);
                self.cores[core].threads[local].pc = (next_pc as i32).wrapping_add(offset) as u32;
                Some(SideEffect::ScalarWriteback { pc: fetch_pc, thread: global_id, reg: LINK_REG as u32, value: next_pc })
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Fetch,
    Load,
    Store,
}

/// Applies `op` to one lane of a vector-scalar or vector-vector form.
/// Compare ops are handled by the caller (they pack into a scalar mask
/// rather than writing a vector register) so they never reach here.
fn vector_lane_op(op: ArithmeticOp, a: u32, b: u32) -> u32 {
    debug_assert!(!op.is_compare());
    scalar_arithmetic_op(op, a, b)
}

fn byte_mask_for(phys_addr: u32, size: u32) -> u64 {
    let offset_in_line = (phys_addr % CACHE_LINE_LENGTH) as u64;
    ((1u64 << size) - 1) << offset_in_line
}

/// Byte mask for a masked block-vector store: every byte of each active
/// lane's 4-byte word.
fn byte_mask_for_lanes(lane_mask: u16) -> u64 {
    let mut mask = 0u64;
    for lane in 0..16u64 {
        if lane_mask & (1 << lane) != 0 {
            mask |= 0xfu64 << (lane * 4);
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_imm_scalar(op: ArithmeticOp, dest: u32, src1: u32, imm: i32) -> u32 {
        (0u32 << 31) | (0u32 << 29) | ((op as u32) << 23) | (dest << 18) | (src1 << 13) | (imm as u32 & 0x1fff)
    }

    fn encode_ctrl_store(src_reg: u32, cr: ControlRegister) -> u32 {
        (0b10u32 << 30) | ((MemoryOp::ControlRegister as u32) << 25) | (0u32 << 24) | (src_reg << 19) | (cr as u32)
    }

    fn encode_branch_always(offset_words: i32) -> u32 {
        (0b1111u32 << 28) | ((BranchType::Always as u32) << 25) | (offset_words as u32 & 0x1ff_ffff)
    }

    fn encode_movehigh(dest: u32, imm16: u32) -> u32 {
        (0u32 << 31) | (0b11u32 << 29) | (dest << 24) | (imm16 << 8)
    }

    fn new_processor() -> Processor {
        Processor::new(64 * 1024, 1, 1).unwrap()
    }

    #[test]
    fn add_immediate_retires_and_writes_scalar() {
        let mut p = new_processor();
        p.memory.write_u32(0, encode_imm_scalar(ArithmeticOp::AddI, 1, 0, 5));
        let effect = p.step_thread(0, 0);
        assert_eq!(p.thread(0, 0).read_scalar(1), 5);
        assert_eq!(p.thread(0, 0).pc, 4);
        assert_eq!(effect, Some(SideEffect::ScalarWriteback { pc: 0, thread: 0, reg: 1, value: 5 }));
    }

    #[test]
    fn move_high_loads_upper_sixteen_bits() {
        let mut p = new_processor();
        p.memory.write_u32(0, encode_movehigh(2, 0xbeef));
        p.step_thread(0, 0);
        assert_eq!(p.thread(0, 0).read_scalar(2), 0xbeef0000);
    }

    #[test]
    fn branch_always_is_relative_to_the_incremented_pc() {
        let mut p = new_processor();
        p.memory.write_u32(0, encode_branch_always(4));
        p.step_thread(0, 0);
        // next_pc = 4; + 4*4 = 20
        assert_eq!(p.thread(0, 0).pc, 20);
    }

    #[test]
    fn illegal_instruction_traps_to_the_handler() {
        let mut p = new_processor();
        p.cores[0].trap_handler_pc = 0x1000;
        p.thread_mut(0, 0).flags.supervisor = true;
        p.memory.write_u32(0, (0b1110u32 << 28) | (3u32 << 25)); // cache-control class, undecoded op bits
        p.step_thread(0, 0);
        assert_eq!(p.thread(0, 0).pc, 0x1000);
        assert_eq!(p.thread(0, 0).trap_state[0].trap_cause & 0xf, TrapCause::IllegalInstruction as u8 as u32);
    }

    #[test]
    fn tlb_miss_replays_the_faulting_instruction_after_eret() {
        let mut p = new_processor();
        p.cores[0].tlb_miss_handler_pc = 0x2000;
        p.cores[0].trap_handler_pc = 0x3000;
        p.thread_mut(0, 0).flags.mmu_enable = true;
        p.thread_mut(0, 0).flags.supervisor = true;

        // A long load from an unmapped virtual page.
        let load_instr = (0b10u32 << 30) | ((MemoryOp::Long as u32) << 25) | (1u32 << 24) | (1u32 << 19) | (0u32 << 14) | 0;
        p.memory.write_u32(0, load_instr);
        p.step_thread(0, 0);
        assert_eq!(p.thread(0, 0).pc, 0x2000);
        assert!(!p.thread(0, 0).flags.mmu_enable, "tlb miss handler runs physically addressed");

        // Handler inserts a mapping then erets.
        p.cores[0].dtlb.insert(0, 0, 0x1000 | TLB_PRESENT | TLB_WRITE_ENABLE);
        p.memory.write_u32(0x2000, encode_branch_eret());
        p.step_thread(0, 0);
        assert_eq!(p.thread(0, 0).pc, 0, "eret replays the faulting instruction");
        assert!(p.thread(0, 0).flags.mmu_enable);

        p.memory.write_u32(0x1000, 0xaaaaaaaa);
        p.step_thread(0, 0);
        assert_eq!(p.thread(0, 0).read_scalar(1), 0xaaaaaaaa);
    }

    fn encode_branch_eret() -> u32 {
        (0b1111u32 << 28) | ((BranchType::Eret as u32) << 25)
    }

    #[test]
    fn nested_trap_preserves_the_outer_save_slot() {
        let mut p = new_processor();
        p.cores[0].trap_handler_pc = 0x1000;
        p.thread_mut(0, 0).flags.supervisor = true;

        p.memory.write_u32(0, encode_syscall());
        p.step_thread(0, 0); // outer trap: slot0.pc == 0
        assert_eq!(p.thread(0, 0).trap_state[0].pc, 0);

        p.memory.write_u32(0x1000, encode_syscall());
        p.step_thread(0, 0); // inner trap at 0x1000: slot1 <- slot0, slot0.pc == 0x1000
        assert_eq!(p.thread(0, 0).trap_state[1].pc, 0);
        assert_eq!(p.thread(0, 0).trap_state[0].pc, 0x1000);

        p.memory.write_u32(0x1000, encode_branch_eret());
        p.step_thread(0, 0); // inner eret: resumes at 0x1000, slot0 <- slot1 (pc == 0)
        assert_eq!(p.thread(0, 0).pc, 0x1000);
        assert_eq!(p.thread(0, 0).trap_state[0].pc, 0);
    }

    fn encode_syscall() -> u32 {
        (0b110u32 << 29) | (0u32 << 26) | ((ArithmeticOp::Syscall as u32) << 20)
    }

    #[test]
    fn sync_store_fails_when_another_thread_writes_between_load_and_store() {
        let mut p = Processor::new(64 * 1024, 1, 2).unwrap();
        p.thread_mut(0, 0).write_scalar(1, 100); // address reg for the sync load/store
        p.thread_mut(0, 0).write_scalar(2, 0xdead);
        p.thread_mut(0, 1).write_scalar(1, 100);
        p.thread_mut(0, 1).write_scalar(2, 0xbeef);

        let sync_load = encode_sync(true, 3, 1, 0);
        let sync_store = encode_sync(false, 2, 1, 0);
        let other_store = (0b10u32 << 30) | ((MemoryOp::Long as u32) << 25) | (0u32 << 24) | (2u32 << 19) | (1u32 << 14) | 0;

        p.memory.write_u32(0, sync_load);
        p.step_thread(0, 0); // thread 0 sync-loads address 100
        assert_eq!(p.thread(0, 0).last_sync_load_addr, Some(100 / 64));

        p.memory.write_u32(0, other_store);
        p.step_thread(0, 1); // thread 1 writes the same line
        assert_eq!(p.thread(0, 0).last_sync_load_addr, None, "any write to the line clears every thread's scoreboard entry");

        p.memory.write_u32(4, sync_store);
        p.step_thread(0, 0);
        assert_eq!(p.thread(0, 0).read_scalar(2), 0, "sync store fails without a live scoreboard match");
        assert_eq!(p.memory.read_u32(100), 0xbeef, "memory still holds the other thread's value");
    }

    fn encode_sync(is_load: bool, reg: u32, base_reg: u32, offset: i32) -> u32 {
        (0b10u32 << 30) | ((MemoryOp::Sync as u32) << 25) | ((is_load as u32) << 24) | (reg << 19) | (base_reg << 14) | (offset as u32 & 0x3fff)
    }

    #[test]
    fn sync_load_then_store_same_thread_uninterrupted_succeeds() {
        let mut p = new_processor();
        p.thread_mut(0, 0).write_scalar(1, 64);
        p.thread_mut(0, 0).write_scalar(2, 0x1234);
        p.memory.write_u32(0, encode_sync(true, 3, 1, 0));
        p.step_thread(0, 0);
        p.memory.write_u32(4, encode_sync(false, 2, 1, 0));
        p.step_thread(0, 0);
        assert_eq!(p.thread(0, 0).read_scalar(2), 1);
        assert_eq!(p.memory.read_u32(64), 0x1234);
    }

    #[test]
    fn masked_scatter_resumes_remaining_lanes_after_an_interrupt() {
        let mut p = new_processor();
        p.cores[0].trap_handler_pc = 0x1000;
        p.thread_mut(0, 0).flags.interrupt_enable = true;
        p.thread_mut(0, 0).interrupt_mask = 1;

        // vector register 4 holds 16 distinct addresses; mask register holds
        // 0x00ff (low 8 lanes active).
        for lane in 0..16 {
            p.thread_mut(0, 0).regs.vector[4][lane] = 1024 + lane as u32 * 4;
            p.thread_mut(0, 0).regs.vector[5][lane] = 0x1000_0000 + lane as u32;
        }
        p.thread_mut(0, 0).write_scalar(6, 0x00ff);

        let scatter = (0b10u32 << 30) | ((MemoryOp::ScatterGatherMasked as u32) << 25) | (0u32 << 24) | (5u32 << 19) | (4u32 << 14) | (6u32 << 5);
        p.memory.write_u32(0, scatter);

        for _ in 0..4 {
            p.step_thread(0, 0); // lanes 0..3
        }
        assert_eq!(p.thread(0, 0).subcycle, 4);
        assert_eq!(p.thread(0, 0).pc, 0, "instruction stays resident while subcycling");

        p.raise_interrupt(0, 1);
        let effect = p.step_thread(0, 0); // interrupt preempts lane 4
        assert!(matches!(effect, Some(SideEffect::Trap { cause: TrapCause::Interrupt, .. })));
        assert_eq!(p.thread(0, 0).pc, 0x1000);
        assert_eq!(p.thread(0, 0).trap_state[0].subcycle, 4, "subcycle is preserved across the trap");
        assert_eq!(p.thread(0, 0).trap_state[0].pc, 0, "interrupt saves the resident instruction's pc");

        // Handler acks the edge-triggered interrupt before returning -
        // otherwise it would still be latched and re-fire the instant
        // `eret` re-enables interrupts.
        p.thread_mut(0, 0).write_scalar(7, 1);
        p.memory.write_u32(0x1000, encode_ctrl_store(7, ControlRegister::InterruptAck));
        p.memory.write_u32(0x1004, encode_branch_eret());
        p.step_thread(0, 0); // ack clears the latch
        p.step_thread(0, 0); // eret back into the resident scatter at subcycle 4
        assert_eq!(p.thread(0, 0).pc, 0);
        assert_eq!(p.thread(0, 0).subcycle, 4);

        for _ in 0..12 {
            p.step_thread(0, 0); // lanes 4..15
        }
        assert_eq!(p.thread(0, 0).pc, 4, "instruction retires once subcycle reaches 16");

        for lane in 0..16 {
            let stored = p.memory.read_u32(1024 + lane as u32 * 4);
            if lane < 8 {
                assert_eq!(stored, 0x1000_0000 + lane as u32, "masked-in lane stored");
            } else {
                assert_eq!(stored, 0, "masked-out lane never stores");
            }
        }
    }

    #[test]
    fn timer_interrupt_fires_on_the_one_to_zero_transition() {
        let mut p = new_processor();
        p.thread_mut(0, 0).flags.interrupt_enable = true;
        p.thread_mut(0, 0).interrupt_mask = INT_TIMER;
        p.timer_countdown = 2;
        p.memory.write_u32(0, encode_imm_scalar(ArithmeticOp::AddI, 1, 0, 0));
        p.memory.write_u32(4, encode_imm_scalar(ArithmeticOp::AddI, 1, 0, 0));

        p.execute_instructions(1);
        assert_eq!(p.thread(0, 0).latched_interrupts & INT_TIMER, 0);
        p.execute_instructions(1);
        assert_eq!(p.thread(0, 0).latched_interrupts & INT_TIMER, INT_TIMER);
    }
}
