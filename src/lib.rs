//! Multi-system retro-console emulator core
//!
//! This crate provides a platform-agnostic emulator core with a stable C ABI.
//! No OS APIs are used - all I/O is done through byte buffers and caller
//! supplied sinks.
//!
//! # Architecture
//!
//! The core is organized into several modules:
//! - `bus`: main-bus address decoding with wait-state accounting
//! - `cpu`: Z80 CPU implementation (full prefix spaces, undocumented flags)
//! - `adapter`: the Z80's host glue (work RAM, bank window, RESET/BUSREQ)
//! - `ppu`: dot-driven video state machine with per-family variant state
//! - `sched`: the frame scheduler interleaving main CPU, Z80 and PPU
//! - `debug`: breakpoints, stepping, instruction trace
//! - `disasm`: Z80 disassembler backing the trace and listings
//! - `state`: tagged-region save states
//!
//! The scheduler is the machine root: it owns the bus, the adapter, the
//! PPU and the audio sink, and talks to the external main CPU through the
//! [`sched::MainCpu`] trait. There is no ambient state; everything is a
//! value owned by its parent.

pub mod adapter;
pub mod bus;
pub mod cpu;
pub mod debug;
pub mod disasm;
pub mod ppu;
pub mod sched;
pub mod state;


use std::ptr;
use std::slice;

pub use adapter::{AudioSink, NullAudio, Z80HostAdapter};
pub use bus::BusView;
pub use cpu::{Cpu, InterruptMode, Z80Bus};
pub use debug::{BreakCondition, BreakKind, Debugger, StepMode};
pub use ppu::{ConsoleFamily, PixelFormat, PpuCore, PpuGeometry, VideoBackend};
pub use sched::{MainCpu, NullMainCpu, Scheduler, VideoTiming};
pub use state::{load_state, save_state, StateError};

/// A fully-wired machine with the Mega-Drive-like default profile: VDP
/// variant PPU on the NTSC raster, RGB565 internal framebuffer, no audio
/// backend, main CPU stubbed until the host installs one.
fn default_machine() -> Option<Scheduler> {
    let ppu = PpuCore::with_internal_framebuffer(
        ConsoleFamily::SmsGenesis,
        PpuGeometry::default_ntsc(),
        PixelFormat::Rgb565,
        Box::new(ppu::NullBackend),
    )?;
    Some(Scheduler::new(
        BusView::new(),
        Z80HostAdapter::new(),
        ppu,
        Box::new(NullAudio),
        Box::new(NullMainCpu::new()),
        VideoTiming::Ntsc,
    ))
}

/// Create a new machine instance.
/// Returns null on configuration failure.
#[no_mangle]
pub extern "C" fn memu_create() -> *mut Scheduler {
    match default_machine() {
        Some(machine) => Box::into_raw(Box::new(machine)),
        None => ptr::null_mut(),
    }
}

/// Destroy a machine instance.
/// Safe to call with null pointer.
#[no_mangle]
pub extern "C" fn memu_destroy(machine: *mut Scheduler) {
    if !machine.is_null() {
        unsafe {
            drop(Box::from_raw(machine));
        }
    }
}

/// Load cartridge ROM data.
/// Returns 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn memu_load_rom(machine: *mut Scheduler, data: *const u8, len: usize) -> i32 {
    if machine.is_null() || data.is_null() {
        return -1;
    }
    let machine = unsafe { &mut *machine };
    let rom = unsafe { slice::from_raw_parts(data, len) };
    if rom.is_empty() {
        return -2;
    }
    if machine.bus.load_rom(rom) {
        0
    } else {
        -3 // ROM too large
    }
}

/// Reset the machine to power-on state.
#[no_mangle]
pub extern "C" fn memu_reset(machine: *mut Scheduler) {
    if machine.is_null() {
        return;
    }
    let machine = unsafe { &mut *machine };
    machine.reset();
}

/// Run one frame. Returns the primary cycles consumed (a debugger break
/// returns early), or 0 on a null machine.
#[no_mangle]
pub extern "C" fn memu_run_frame(machine: *mut Scheduler) -> u64 {
    if machine.is_null() {
        return 0;
    }
    let machine = unsafe { &mut *machine };
    machine.run_frame()
}

/// Run up to `cycles` primary cycles.
/// Returns the count actually consumed.
#[no_mangle]
pub extern "C" fn memu_run_cycles(machine: *mut Scheduler, cycles: u64) -> u64 {
    if machine.is_null() || cycles == 0 {
        return 0;
    }
    let machine = unsafe { &mut *machine };
    machine.run_cycles(cycles)
}

/// Get a pointer to the framebuffer.
/// Writes width, height and pitch to the provided pointers if non-null.
/// Returns null if machine pointer is null.
#[no_mangle]
pub extern "C" fn memu_framebuffer(
    machine: *const Scheduler,
    w: *mut i32,
    h: *mut i32,
    pitch: *mut i32,
) -> *const u8 {
    if machine.is_null() {
        return ptr::null();
    }
    let machine = unsafe { &*machine };
    let geometry = machine.ppu.geometry();
    let (fb, row_pitch) = machine.ppu.framebuffer();
    if !w.is_null() {
        unsafe { *w = geometry.visible_width as i32 };
    }
    if !h.is_null() {
        unsafe { *h = geometry.visible_height as i32 };
    }
    if !pitch.is_null() {
        unsafe { *pitch = row_pitch as i32 };
    }
    fb
}

// ========== Z80 wire lines ==========

/// Drive the Z80 RESET line (non-zero asserts).
#[no_mangle]
pub extern "C" fn memu_z80_set_reset(machine: *mut Scheduler, asserted: i32) {
    if machine.is_null() {
        return;
    }
    let machine = unsafe { &mut *machine };
    if asserted != 0 {
        machine.adapter.assert_reset();
    } else {
        machine.adapter.release_reset();
    }
}

/// Drive the Z80 BUSREQ line (non-zero asserts).
#[no_mangle]
pub extern "C" fn memu_z80_set_busreq(machine: *mut Scheduler, asserted: i32) {
    if machine.is_null() {
        return;
    }
    let machine = unsafe { &mut *machine };
    if asserted != 0 {
        machine.adapter.assert_busreq();
    } else {
        machine.adapter.release_busreq();
    }
}

// ========== Save states ==========

/// Get the size of a save-state blob for this machine.
#[no_mangle]
pub extern "C" fn memu_save_state_size(machine: *const Scheduler) -> usize {
    if machine.is_null() {
        return 0;
    }
    let machine = unsafe { &*machine };
    save_state(machine).len()
}

/// Save machine state to a buffer.
/// Returns bytes written on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn memu_save_state(machine: *const Scheduler, out: *mut u8, cap: usize) -> i32 {
    if machine.is_null() || out.is_null() {
        return -1;
    }
    let machine = unsafe { &*machine };
    let blob = save_state(machine);
    if blob.len() > cap {
        return -105; // Buffer too small
    }
    let buffer = unsafe { slice::from_raw_parts_mut(out, cap) };
    buffer[..blob.len()].copy_from_slice(&blob);
    blob.len() as i32
}

/// Load machine state from a buffer.
/// Returns 0 on success, negative error code on failure; a refused blob
/// leaves the machine unchanged.
#[no_mangle]
pub extern "C" fn memu_load_state(machine: *mut Scheduler, data: *const u8, len: usize) -> i32 {
    if machine.is_null() || data.is_null() {
        return -1;
    }
    let machine = unsafe { &mut *machine };
    let blob = unsafe { slice::from_raw_parts(data, len) };
    match load_state(machine, blob) {
        Ok(()) => 0,
        Err(err) => err.code(),
    }
}

// ========== Debugger ==========

fn break_kind_from(kind: i32) -> Option<BreakKind> {
    match kind {
        0 => Some(BreakKind::Exec),
        1 => Some(BreakKind::MemRead),
        2 => Some(BreakKind::MemWrite),
        3 => Some(BreakKind::IoRead),
        4 => Some(BreakKind::IoWrite),
        5 => Some(BreakKind::Interrupt),
        _ => None,
    }
}

fn break_condition_from(condition: i32) -> Option<BreakCondition> {
    match condition {
        0 => Some(BreakCondition::Always),
        1 => Some(BreakCondition::Eq),
        2 => Some(BreakCondition::Ne),
        3 => Some(BreakCondition::Gt),
        4 => Some(BreakCondition::Lt),
        5 => Some(BreakCondition::Mask),
        _ => None,
    }
}

/// Attach a debugger to the machine (idempotent).
#[no_mangle]
pub extern "C" fn memu_debug_attach(machine: *mut Scheduler) {
    if machine.is_null() {
        return;
    }
    let machine = unsafe { &mut *machine };
    if machine.debugger.is_none() {
        machine.attach_debugger(Debugger::new());
    }
}

/// Add a breakpoint. Returns its id, -1 when the table is full, or a
/// negative error code for bad arguments or a missing debugger.
#[no_mangle]
pub extern "C" fn memu_debug_add_breakpoint(
    machine: *mut Scheduler,
    kind: i32,
    lo: u16,
    hi: u16,
    condition: i32,
    value: u16,
    mask: u16,
    temporary: i32,
) -> i32 {
    if machine.is_null() {
        return -1;
    }
    let machine = unsafe { &mut *machine };
    let (Some(kind), Some(condition)) = (break_kind_from(kind), break_condition_from(condition))
    else {
        return -2;
    };
    let Some(dbg) = machine.debugger.as_mut() else {
        return -3;
    };
    dbg.add_breakpoint(kind, lo, hi, condition, value, mask, temporary != 0)
}

/// Remove a breakpoint by id. Returns 0 on success.
#[no_mangle]
pub extern "C" fn memu_debug_remove_breakpoint(machine: *mut Scheduler, id: i32) -> i32 {
    if machine.is_null() {
        return -1;
    }
    let machine = unsafe { &mut *machine };
    match machine.debugger.as_mut() {
        Some(dbg) => {
            if dbg.remove_breakpoint(id) {
                0
            } else {
                -2
            }
        }
        None => -3,
    }
}

/// Resume free-running execution.
#[no_mangle]
pub extern "C" fn memu_debug_continue(machine: *mut Scheduler) {
    if machine.is_null() {
        return;
    }
    let machine = unsafe { &mut *machine };
    if let Some(dbg) = machine.debugger.as_mut() {
        dbg.resume();
    }
}

/// Pause before the next Z80 instruction.
#[no_mangle]
pub extern "C" fn memu_debug_step_into(machine: *mut Scheduler) {
    if machine.is_null() {
        return;
    }
    let machine = unsafe { &mut *machine };
    if let Some(dbg) = machine.debugger.as_mut() {
        dbg.step_into();
    }
}

/// Step over the instruction at the Z80 PC.
#[no_mangle]
pub extern "C" fn memu_debug_step_over(machine: *mut Scheduler) {
    if machine.is_null() {
        return;
    }
    let machine = unsafe { &mut *machine };
    let adapter = &machine.adapter;
    let bus = &machine.bus;
    if let Some(dbg) = machine.debugger.as_mut() {
        dbg.step_over(&adapter.cpu, &|addr| adapter.peek(addr, bus));
    }
}

/// Run until the current Z80 subroutine returns.
#[no_mangle]
pub extern "C" fn memu_debug_step_out(machine: *mut Scheduler) {
    if machine.is_null() {
        return;
    }
    let machine = unsafe { &mut *machine };
    if let Some(dbg) = machine.debugger.as_mut() {
        let cpu = &machine.adapter.cpu;
        dbg.step_out(cpu);
    }
}

/// Enable or disable the instruction trace.
#[no_mangle]
pub extern "C" fn memu_debug_enable_trace(machine: *mut Scheduler, enabled: i32) {
    if machine.is_null() {
        return;
    }
    let machine = unsafe { &mut *machine };
    if let Some(dbg) = machine.debugger.as_mut() {
        dbg.enable_trace(enabled != 0);
    }
}

/// Number of retained trace entries, 0 without a debugger.
#[no_mangle]
pub extern "C" fn memu_debug_trace_len(machine: *const Scheduler) -> usize {
    if machine.is_null() {
        return 0;
    }
    let machine = unsafe { &*machine };
    machine.debugger.as_ref().map(|d| d.trace_len()).unwrap_or(0)
}
