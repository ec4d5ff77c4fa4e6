//! Frame scheduler
//!
//! Drives the main CPU, the Z80 host adapter and the PPU in lockstep
//! through one frame, slice by slice. The scheduler owns the main bus,
//! the adapter, the PPU and the audio sink, and holds the external main
//! CPU behind the [`MainCpu`] trait. Cycles are the only notion of time;
//! a slice of 100 primary cycles is the interleave granularity.
//!
//! Cycle domains: the Z80 runs at 7/15 of the primary clock. The
//! conversion is the exact rational - a numerator carry accumulates
//! `cycles * 7` and whole Z80 cycles are drawn off by dividing by 15, so
//! no drift accumulates across slices.
//!
//! Ordering guarantees: the Z80 never observes a main-CPU write newer
//! than the last sync point; interrupts raised during a slice are
//! delivered no later than the next slice boundary; a break request
//! finishes the current instruction and returns with the remaining
//! budget intact.

use log::{debug, trace};

use crate::adapter::{AudioSink, Z80HostAdapter};
use crate::bus::BusView;
use crate::debug::Debugger;
use crate::ppu::PpuCore;

/// Interleave granularity in primary cycles
pub const SLICE_CYCLES: u32 = 100;

/// Main-CPU IRQ level used for VBlank on the Mega-Drive-like profile
pub const VBLANK_IRQ_LEVEL: u8 = 6;

/// Main-CPU IRQ level used for scanline interrupts
pub const LINE_IRQ_LEVEL: u8 = 4;

/// Z80 clock ratio: 7 Z80 cycles per 15 primary cycles
const Z80_RATIO_NUM: u64 = 7;
const Z80_RATIO_DEN: u64 = 15;

/// The external main-CPU collaborator.
pub trait MainCpu {
    fn reset(&mut self);
    /// Run up to `cycles` cycles; returns the count actually consumed.
    fn run_cycles(&mut self, cycles: u32) -> u32;
    fn raise_irq(&mut self, level: u8);
    fn clear_irq(&mut self, level: u8);
    fn get_pc(&self) -> u32;
    fn is_halted(&self) -> bool;
    /// The CPU needs current values from the other components before it
    /// can proceed (pending Z80 or PPU bus access).
    fn should_sync(&self) -> bool;
    /// The other components have caught up to `cycle_count`.
    fn sync_to(&mut self, cycle_count: u64);
    /// Opaque state blob round-trip
    fn save_state(&self) -> Vec<u8>;
    fn load_state(&mut self, data: &[u8]) -> Result<(), i32>;
}

/// Main CPU stand-in that consumes every cycle it is offered. Keeps the
/// scheduler honest in tests and in hosts that wire a real 68000 later.
pub struct NullMainCpu {
    cycles: u64,
    irq_levels: u8,
}

impl NullMainCpu {
    pub fn new() -> Self {
        Self {
            cycles: 0,
            irq_levels: 0,
        }
    }

    /// Bitmask of currently raised IRQ levels (bit n = level n+1)
    pub fn pending_irqs(&self) -> u8 {
        self.irq_levels
    }
}

impl Default for NullMainCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl MainCpu for NullMainCpu {
    fn reset(&mut self) {
        self.cycles = 0;
        self.irq_levels = 0;
    }

    fn run_cycles(&mut self, cycles: u32) -> u32 {
        self.cycles += cycles as u64;
        cycles
    }

    fn raise_irq(&mut self, level: u8) {
        if (1..=7).contains(&level) {
            self.irq_levels |= 1 << (level - 1);
        }
    }

    fn clear_irq(&mut self, level: u8) {
        if (1..=7).contains(&level) {
            self.irq_levels &= !(1 << (level - 1));
        }
    }

    fn get_pc(&self) -> u32 {
        0
    }

    fn is_halted(&self) -> bool {
        false
    }

    fn should_sync(&self) -> bool {
        false
    }

    fn sync_to(&mut self, _cycle_count: u64) {}

    fn save_state(&self) -> Vec<u8> {
        self.cycles.to_le_bytes().to_vec()
    }

    fn load_state(&mut self, data: &[u8]) -> Result<(), i32> {
        if data.len() < 8 {
            return Err(-105);
        }
        self.cycles = u64::from_le_bytes(data[..8].try_into().unwrap());
        Ok(())
    }
}

/// Video timing profile selecting the frame budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoTiming {
    Ntsc,
    Pal,
}

impl VideoTiming {
    /// Primary cycles per frame
    pub fn cycles_per_frame(&self) -> u64 {
        match self {
            VideoTiming::Ntsc => 127_000,
            VideoTiming::Pal => 128_000,
        }
    }

    fn id(&self) -> u8 {
        match self {
            VideoTiming::Ntsc => 0,
            VideoTiming::Pal => 1,
        }
    }

    fn from_id(id: u8) -> VideoTiming {
        if id == 1 {
            VideoTiming::Pal
        } else {
            VideoTiming::Ntsc
        }
    }
}

/// The machine root: owns every component and interleaves them.
pub struct Scheduler {
    pub bus: BusView,
    pub adapter: Z80HostAdapter,
    pub ppu: PpuCore,
    pub audio: Box<dyn AudioSink>,
    main_cpu: Box<dyn MainCpu>,
    /// Optional inspector; consulted before fetches and bus accesses
    pub debugger: Option<Debugger>,

    timing: VideoTiming,
    /// Raise a scanline IRQ on every line boundary when set
    line_irq_enabled: bool,

    /// Total primary cycles since reset
    total_cycles: u64,
    /// Z80 conversion carry (numerator units, 0..15)
    z80_carry: u64,
    /// Z80 cycles consumed past the last slice budget; instructions are
    /// atomic, so the overrun is paid back from the next slice
    z80_overrun: u64,
    /// Completed frames
    frames: u64,
    /// H/V counter mirrors, updated when a frame loop returns
    h_counter: u16,
    v_counter: u16,
}

impl Scheduler {
    pub fn new(
        bus: BusView,
        adapter: Z80HostAdapter,
        ppu: PpuCore,
        audio: Box<dyn AudioSink>,
        main_cpu: Box<dyn MainCpu>,
        timing: VideoTiming,
    ) -> Self {
        Self {
            bus,
            adapter,
            ppu,
            audio,
            main_cpu,
            debugger: None,
            timing,
            line_irq_enabled: false,
            total_cycles: 0,
            z80_carry: 0,
            z80_overrun: 0,
            frames: 0,
            h_counter: 0,
            v_counter: 0,
        }
    }

    /// Enable or disable per-scanline main-CPU interrupts
    pub fn set_line_irq_enabled(&mut self, enabled: bool) {
        self.line_irq_enabled = enabled;
    }

    /// Reset every owned component and the cycle bookkeeping. The
    /// adapter lines return to their power-on (asserted) state.
    pub fn reset(&mut self) {
        self.main_cpu.reset();
        self.adapter = Z80HostAdapter::new();
        self.bus.reset();
        self.ppu.reset();
        self.total_cycles = 0;
        self.z80_carry = 0;
        self.z80_overrun = 0;
        self.frames = 0;
        self.h_counter = 0;
        self.v_counter = 0;
        debug!("machine reset");
    }

    /// Run one frame worth of cycles. Returns the primary cycles
    /// actually consumed; a debugger break returns early with the
    /// remaining budget intact and every component at a clean boundary.
    pub fn run_frame(&mut self) -> u64 {
        let spent = self.run_cycles(self.timing.cycles_per_frame());
        self.h_counter = self.ppu.dot() as u16;
        self.v_counter = self.ppu.scanline() as u16;
        if spent >= self.timing.cycles_per_frame() {
            self.frames += 1;
        }
        spent
    }

    /// Run up to `budget` primary cycles in slices.
    pub fn run_cycles(&mut self, budget: u64) -> u64 {
        let mut spent = 0u64;

        while spent < budget {
            if self
                .debugger
                .as_ref()
                .map(|d| d.break_requested())
                .unwrap_or(false)
            {
                trace!("break honoured at slice boundary, {spent} cycles in");
                break;
            }

            let slice = (budget - spent).min(SLICE_CYCLES as u64) as u32;

            // 1. Main CPU first; it leads the slice.
            let mut ran = self.main_cpu.run_cycles(slice);
            if ran == 0 {
                if self.main_cpu.is_halted() {
                    // A halted main CPU still lets time pass
                    ran = slice;
                } else {
                    // Zero consumption from a running CPU is a stop
                    // request (its own debug break); return with the
                    // remaining budget intact rather than spin.
                    break;
                }
            }

            // 2. Z80, converted by the exact 7/15 rational.
            self.z80_carry += ran as u64 * Z80_RATIO_NUM;
            let z80_budget = self.z80_carry / Z80_RATIO_DEN;
            self.z80_carry %= Z80_RATIO_DEN;
            if self.z80_overrun >= z80_budget {
                self.z80_overrun -= z80_budget;
            } else if self.adapter.running() {
                let give = (z80_budget - self.z80_overrun) as u32;
                let z80_ran = self.adapter.run(
                    give,
                    &mut self.bus,
                    self.audio.as_mut(),
                    self.debugger.as_mut(),
                );
                self.z80_overrun = (z80_ran as u64).saturating_sub(give as u64);
            } else {
                self.z80_overrun = 0;
            }

            // 3. PPU, one dot per primary cycle.
            let events = self.ppu.execute(ran);
            if events.vblank_started {
                self.main_cpu.raise_irq(VBLANK_IRQ_LEVEL);
                // The Z80 sees the same vertical interrupt
                self.adapter.cpu.raise_int(0xFF);
                if let Some(dbg) = self.debugger.as_mut() {
                    dbg.note_interrupt(0x0038, 0xFF);
                }
            }
            if self.line_irq_enabled && events.scanlines_crossed > 0 {
                self.main_cpu.raise_irq(LINE_IRQ_LEVEL);
            }

            spent += ran as u64;
            self.total_cycles += ran as u64;

            // 4. Intra-slice sync on demand: the other components are at
            // this boundary, so publishing the cycle count is the sync.
            if self.main_cpu.should_sync() {
                self.main_cpu.sync_to(self.total_cycles);
            }
        }

        spent
    }

    // ========== Observers ==========

    pub fn timing(&self) -> VideoTiming {
        self.timing
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// H counter mirror (dot at the end of the last frame loop)
    pub fn h_counter(&self) -> u16 {
        self.h_counter
    }

    /// V counter mirror (scanline at the end of the last frame loop)
    pub fn v_counter(&self) -> u16 {
        self.v_counter
    }

    pub fn main_cpu(&self) -> &dyn MainCpu {
        self.main_cpu.as_ref()
    }

    pub fn main_cpu_mut(&mut self) -> &mut dyn MainCpu {
        self.main_cpu.as_mut()
    }

    /// Install a debugger as the machine inspector.
    pub fn attach_debugger(&mut self, debugger: Debugger) {
        self.debugger = Some(debugger);
    }

    /// Remove and return the debugger.
    pub fn detach_debugger(&mut self) -> Option<Debugger> {
        self.debugger.take()
    }
}

// ========== State Persistence ==========

impl Scheduler {
    /// Scheduler counters snapshot
    pub const SNAPSHOT_SIZE: usize = 1 + 1 + 8 + 8 + 8 + 8 + 2 + 2;

    /// Save scheduler counters to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SNAPSHOT_SIZE);
        buf.push(self.timing.id());
        buf.push(self.line_irq_enabled as u8);
        buf.extend_from_slice(&self.total_cycles.to_le_bytes());
        buf.extend_from_slice(&self.z80_carry.to_le_bytes());
        buf.extend_from_slice(&self.z80_overrun.to_le_bytes());
        buf.extend_from_slice(&self.frames.to_le_bytes());
        buf.extend_from_slice(&self.h_counter.to_le_bytes());
        buf.extend_from_slice(&self.v_counter.to_le_bytes());
        buf
    }

    /// Load scheduler counters from bytes
    pub fn from_bytes(&mut self, buf: &[u8]) -> Result<(), i32> {
        if buf.len() < Self::SNAPSHOT_SIZE {
            return Err(-105);
        }
        self.timing = VideoTiming::from_id(buf[0]);
        self.line_irq_enabled = buf[1] != 0;
        self.total_cycles = u64::from_le_bytes(buf[2..10].try_into().unwrap());
        self.z80_carry = u64::from_le_bytes(buf[10..18].try_into().unwrap());
        self.z80_overrun = u64::from_le_bytes(buf[18..26].try_into().unwrap());
        self.frames = u64::from_le_bytes(buf[26..34].try_into().unwrap());
        self.h_counter = u16::from_le_bytes(buf[34..36].try_into().unwrap());
        self.v_counter = u16::from_le_bytes(buf[36..38].try_into().unwrap());
        Ok(())
    }
}
