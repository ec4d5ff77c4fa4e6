//! Z80 host adapter
//!
//! Embeds the Z80 core in a Mega-Drive-like host: 8 KiB of private work
//! RAM, the FM and PSG sound ports, the 9-bit bank latch, and a 32 KiB
//! window into the main address space selected by that latch. The main CPU
//! controls the co-processor through the RESET and BUSREQ lines, both of
//! which come up asserted at power-on.
//!
//! Memory map seen by the Z80:
//! ```text
//! 0x0000 - 0x1FFF : work RAM (owned)
//! 0x4000 - 0x4003 : FM register file (side-effect callback, no read path)
//! 0x6000 - 0x6001 : bank latch (low byte at 0x6000, ninth bit at 0x6001)
//! 0x7F11          : PSG port (write-only)
//! 0x8000 - 0xFFFF : window into main address space at bank << 15
//! ```
//!
//! Z80 I/O ports are not wired on this host: IN returns 0xFF and OUT is
//! dropped, though both remain visible to the debugger as I/O accesses.

use log::{debug, trace};

use crate::bus::BusView;
use crate::cpu::{Cpu, Z80Bus};
use crate::debug::Debugger;

/// Z80-side work RAM size
pub const Z80_RAM_SIZE: usize = 0x2000;

/// Sound chip write sink. The adapter only pushes bytes; synthesis is the
/// surrounding system's concern.
pub trait AudioSink {
    /// FM register file write, sub_port 0..3
    fn write_fm(&mut self, sub_port: u8, value: u8);
    /// PSG write
    fn write_psg(&mut self, value: u8);
}

/// Discards all sound writes.
pub struct NullAudio;

impl AudioSink for NullAudio {
    fn write_fm(&mut self, _sub_port: u8, _value: u8) {}
    fn write_psg(&mut self, _value: u8) {}
}

/// Memory-side state of the adapter, split from the CPU so the core can
/// borrow it as its bus while the adapter drives the step loop.
struct Z80Memory {
    ram: Vec<u8>,
    /// 9-bit ROM bank latch
    bank: u16,
    unmapped_reads: u64,
    unmapped_writes: u64,
}

impl Z80Memory {
    fn new() -> Self {
        Self {
            ram: vec![0; Z80_RAM_SIZE],
            bank: 0,
            unmapped_reads: 0,
            unmapped_writes: 0,
        }
    }

    /// Main-bus address selected by the bank latch for a window offset.
    #[inline]
    fn window_addr(&self, addr: u16) -> u32 {
        ((self.bank as u32) << 15) | ((addr as u32) & 0x7FFF)
    }

    fn read(&mut self, addr: u16, host: &mut BusView) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.ram[addr as usize],
            // FM has no read path
            0x4000..=0x4003 => 0xFF,
            // The bank latch is write-only
            0x6000..=0x6001 => 0xFF,
            0x7F11 => 0xFF,
            0x8000..=0xFFFF => host.read_byte(self.window_addr(addr)),
            _ => {
                trace!("z80 unmapped read at {addr:04X}");
                self.unmapped_reads += 1;
                0xFF
            }
        }
    }

    fn write(&mut self, addr: u16, value: u8, host: &mut BusView, audio: &mut dyn AudioSink) {
        match addr {
            0x0000..=0x1FFF => self.ram[addr as usize] = value,
            0x4000..=0x4003 => audio.write_fm((addr & 0x03) as u8, value),
            0x6000 => {
                self.bank = (self.bank & 0x100) | value as u16;
                debug!("z80 bank latch low -> {:03X}", self.bank);
            }
            0x6001 => {
                self.bank = (self.bank & 0x0FF) | (((value & 0x01) as u16) << 8);
                debug!("z80 bank latch high -> {:03X}", self.bank);
            }
            0x7F11 => audio.write_psg(value),
            0x8000..=0xFFFF => host.write_byte(self.window_addr(addr), value),
            _ => {
                trace!("z80 unmapped write of {value:02X} at {addr:04X}");
                self.unmapped_writes += 1;
            }
        }
    }

    /// Side-effect-free view for the debugger and disassembler.
    fn peek(&self, addr: u16, host: &BusView) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.ram[addr as usize],
            0x8000..=0xFFFF => host.peek_byte(self.window_addr(addr)),
            _ => 0xFF,
        }
    }
}

/// The bus the core sees for the duration of one run: adapter memory plus
/// the host resources the window and sound ports reach, with the debugger
/// riding along to observe every access.
struct AdapterBus<'a> {
    mem: &'a mut Z80Memory,
    host: &'a mut BusView,
    audio: &'a mut dyn AudioSink,
    debug: Option<&'a mut Debugger>,
}

impl Z80Bus for AdapterBus<'_> {
    fn read(&mut self, addr: u16) -> u8 {
        let value = self.mem.read(addr, self.host);
        if let Some(dbg) = self.debug.as_deref_mut() {
            dbg.note_mem_read(addr, value);
        }
        value
    }

    fn write(&mut self, addr: u16, value: u8) {
        if let Some(dbg) = self.debug.as_deref_mut() {
            dbg.note_mem_write(addr, value);
        }
        self.mem.write(addr, value, self.host, self.audio);
    }

    fn port_in(&mut self, port: u16) -> u8 {
        // No I/O devices on this host
        if let Some(dbg) = self.debug.as_deref_mut() {
            dbg.note_io_read(port, 0xFF);
        }
        0xFF
    }

    fn port_out(&mut self, port: u16, value: u8) {
        if let Some(dbg) = self.debug.as_deref_mut() {
            dbg.note_io_write(port, value);
        }
    }

    fn take_wait_states(&mut self) -> u32 {
        self.host.take_wait_states()
    }
}

/// The Z80 co-processor with its host-side glue.
pub struct Z80HostAdapter {
    /// The CPU core; owned here, stepped by [`Z80HostAdapter::run`].
    pub cpu: Cpu,
    mem: Z80Memory,
    /// RESET line from the main CPU; asserted at power-on
    reset_line: bool,
    /// BUSREQ line from the main CPU; asserted at power-on
    busreq_line: bool,
}

impl Z80HostAdapter {
    /// Create an adapter in power-on state: both lines asserted, bank 0,
    /// RAM cleared.
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            mem: Z80Memory::new(),
            reset_line: true,
            busreq_line: true,
        }
    }

    /// Run whole instructions until at least `budget` T-states are
    /// consumed; returns the count actually consumed. Returns 0 without
    /// bus activity while RESET or BUSREQ is asserted.
    pub fn run(
        &mut self,
        budget: u32,
        host: &mut BusView,
        audio: &mut dyn AudioSink,
        mut debug: Option<&mut Debugger>,
    ) -> u32 {
        if self.reset_line || self.busreq_line {
            return 0;
        }

        let mut spent = 0u32;
        while spent < budget {
            if let Some(dbg) = debug.as_deref_mut() {
                let mem = &self.mem;
                let host_ref = &*host;
                let stop = dbg.before_fetch(&self.cpu, &|addr| mem.peek(addr, host_ref));
                if stop {
                    break;
                }
            }
            let mut bus = AdapterBus {
                mem: &mut self.mem,
                host,
                audio,
                debug: debug.as_deref_mut(),
            };
            spent += self.cpu.step(&mut bus);
        }
        spent
    }

    /// Step exactly one instruction regardless of budget (debugger
    /// single-step path). Returns 0 while a line blocks execution.
    pub fn step_one(
        &mut self,
        host: &mut BusView,
        audio: &mut dyn AudioSink,
        debug: Option<&mut Debugger>,
    ) -> u32 {
        if self.reset_line || self.busreq_line {
            return 0;
        }
        let mut bus = AdapterBus {
            mem: &mut self.mem,
            host,
            audio,
            debug,
        };
        self.cpu.step(&mut bus)
    }

    // ========== Wire-level lines ==========

    /// Assert RESET: the core is pinned to power-on state.
    pub fn assert_reset(&mut self) {
        if !self.reset_line {
            debug!("z80 RESET asserted");
        }
        self.reset_line = true;
        self.cpu.reset();
    }

    /// Release RESET. The core restarts from power-on state only when
    /// BUSREQ is released at this moment; releasing RESET under BUSREQ
    /// leaves the core untouched.
    pub fn release_reset(&mut self) {
        if self.reset_line {
            debug!("z80 RESET released (busreq={})", self.busreq_line);
        }
        self.reset_line = false;
        if !self.busreq_line {
            self.cpu.reset();
        }
    }

    /// Assert BUSREQ: instruction dispatch halts, the bus belongs to the
    /// main CPU.
    pub fn assert_busreq(&mut self) {
        self.busreq_line = true;
    }

    /// Release BUSREQ.
    pub fn release_busreq(&mut self) {
        self.busreq_line = false;
    }

    /// RESET line state
    pub fn reset_asserted(&self) -> bool {
        self.reset_line
    }

    /// BUSREQ line state
    pub fn busreq_asserted(&self) -> bool {
        self.busreq_line
    }

    /// Whether the Z80 is currently free to execute
    pub fn running(&self) -> bool {
        !self.reset_line && !self.busreq_line
    }

    /// Explicit core reset, independent of the wire protocol.
    pub fn reset_cpu(&mut self) {
        self.cpu.reset();
    }

    // ========== Main-CPU side access ==========

    /// Read Z80 space from the main CPU (valid while BUSREQ is held).
    pub fn host_read(&mut self, addr: u16, host: &mut BusView) -> u8 {
        self.mem.read(addr, host)
    }

    /// Write Z80 space from the main CPU (valid while BUSREQ is held).
    pub fn host_write(&mut self, addr: u16, value: u8, host: &mut BusView, audio: &mut dyn AudioSink) {
        self.mem.write(addr, value, host, audio);
    }

    /// Side-effect-free byte view (debugger, disassembler, tests).
    pub fn peek(&self, addr: u16, host: &BusView) -> u8 {
        self.mem.peek(addr, host)
    }

    /// Store a byte into Z80 RAM without bus activity (tests, loaders).
    pub fn poke_ram(&mut self, addr: u16, value: u8) {
        if (addr as usize) < Z80_RAM_SIZE {
            self.mem.ram[addr as usize] = value;
        }
    }

    /// Current bank latch value (9 bits)
    pub fn bank(&self) -> u16 {
        self.mem.bank
    }

    /// Reads of unmapped Z80 addresses
    pub fn unmapped_reads(&self) -> u64 {
        self.mem.unmapped_reads
    }

    /// Dropped writes to unmapped Z80 addresses
    pub fn unmapped_writes(&self) -> u64 {
        self.mem.unmapped_writes
    }
}

impl Default for Z80HostAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// ========== State Persistence ==========

impl Z80HostAdapter {
    /// Adapter snapshot: RAM + bank + line states. The CPU body is a
    /// separate save-state region.
    pub const SNAPSHOT_SIZE: usize = Z80_RAM_SIZE + 3;

    /// Save adapter state to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SNAPSHOT_SIZE);
        buf.extend_from_slice(&self.mem.ram);
        buf.extend_from_slice(&self.mem.bank.to_le_bytes());
        let mut lines = 0u8;
        if self.reset_line {
            lines |= 1 << 0;
        }
        if self.busreq_line {
            lines |= 1 << 1;
        }
        buf.push(lines);
        buf
    }

    /// Load adapter state from bytes
    pub fn from_bytes(&mut self, buf: &[u8]) -> Result<(), i32> {
        if buf.len() < Self::SNAPSHOT_SIZE {
            return Err(-105);
        }
        self.mem.ram.copy_from_slice(&buf[..Z80_RAM_SIZE]);
        self.mem.bank = u16::from_le_bytes([buf[Z80_RAM_SIZE], buf[Z80_RAM_SIZE + 1]]);
        let lines = buf[Z80_RAM_SIZE + 2];
        self.reset_line = lines & (1 << 0) != 0;
        self.busreq_line = lines & (1 << 1) != 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_adapter() -> Z80HostAdapter {
        let mut adapter = Z80HostAdapter::new();
        adapter.release_busreq();
        adapter.release_reset();
        adapter
    }

    #[test]
    fn test_power_on_lines() {
        let adapter = Z80HostAdapter::new();
        assert!(adapter.reset_asserted());
        assert!(adapter.busreq_asserted());
        assert!(!adapter.running());
    }

    #[test]
    fn test_blocked_run_consumes_nothing() {
        let mut adapter = Z80HostAdapter::new();
        let mut host = BusView::new();
        let mut audio = NullAudio;
        assert_eq!(adapter.run(100, &mut host, &mut audio, None), 0);
        assert_eq!(adapter.cpu.cycles, 0);
    }

    #[test]
    fn test_release_reset_under_busreq_keeps_core() {
        let mut adapter = Z80HostAdapter::new();
        adapter.cpu.pc = 0x1234;
        adapter.release_reset(); // BUSREQ still held
        assert_eq!(adapter.cpu.pc, 0x1234);
        adapter.release_busreq();
        // Releasing BUSREQ afterwards does not reset either
        assert_eq!(adapter.cpu.pc, 0x1234);
    }

    #[test]
    fn test_release_reset_with_bus_resets_core() {
        let mut adapter = Z80HostAdapter::new();
        adapter.release_busreq();
        adapter.cpu.pc = 0x1234;
        adapter.release_reset();
        assert_eq!(adapter.cpu.pc, 0);
    }

    #[test]
    fn test_nop_halt_program() {
        let mut adapter = running_adapter();
        let mut host = BusView::new();
        let mut audio = NullAudio;
        for (i, byte) in [0x00, 0x00, 0x00, 0x76].iter().enumerate() {
            adapter.poke_ram(i as u16, *byte);
        }
        let spent = adapter.run(16, &mut host, &mut audio, None);
        assert_eq!(spent, 16);
        assert_eq!(adapter.cpu.pc, 4);
        assert!(adapter.cpu.halted);
    }

    #[test]
    fn test_reset_after_progress_pins_core() {
        let mut adapter = running_adapter();
        let mut host = BusView::new();
        let mut audio = NullAudio;
        adapter.poke_ram(0, 0x3C); // INC A
        adapter.step_one(&mut host, &mut audio, None);
        assert_eq!(adapter.cpu.pc, 1);

        adapter.assert_reset();
        // Power-on register values, and no further cycles consumed
        assert_eq!(adapter.cpu.pc, 0);
        assert_eq!(adapter.cpu.af(), 0xFFFF);
        assert_eq!(adapter.cpu.sp, 0xFFFF);
        assert_eq!(adapter.run(100, &mut host, &mut audio, None), 0);
    }

    #[test]
    fn test_bank_latch_and_window() {
        let mut adapter = running_adapter();
        let mut host = BusView::new();
        let mut rom = vec![0u8; 0x30000];
        rom[0x2_8000 + 0x10] = 0xAB; // bank 5 base = 5 << 15 = 0x28000
        host.load_rom(&rom);

        let mut audio = NullAudio;
        // Program the latch through the Z80-visible ports
        adapter.host_write(0x6000, 0x05, &mut host, &mut audio);
        adapter.host_write(0x6001, 0x00, &mut host, &mut audio);
        assert_eq!(adapter.bank(), 0x005);
        assert_eq!(adapter.host_read(0x8010, &mut host), 0xAB);
    }

    #[test]
    fn test_bank_latch_ninth_bit() {
        let mut adapter = running_adapter();
        let mut host = BusView::new();
        let mut audio = NullAudio;
        adapter.host_write(0x6000, 0xFF, &mut host, &mut audio);
        adapter.host_write(0x6001, 0x01, &mut host, &mut audio);
        assert_eq!(adapter.bank(), 0x1FF);
        // Window base = 0x1FF << 15 = 0xFF8000, inside work RAM
        host.write_byte(0xFF8042, 0x77);
        assert_eq!(adapter.host_read(0x8042, &mut host), 0x77);
    }

    #[test]
    fn test_fm_and_psg_sinks() {
        struct Capture {
            fm: Vec<(u8, u8)>,
            psg: Vec<u8>,
        }
        impl AudioSink for Capture {
            fn write_fm(&mut self, sub_port: u8, value: u8) {
                self.fm.push((sub_port, value));
            }
            fn write_psg(&mut self, value: u8) {
                self.psg.push(value);
            }
        }

        let mut adapter = running_adapter();
        let mut host = BusView::new();
        let mut audio = Capture {
            fm: Vec::new(),
            psg: Vec::new(),
        };
        adapter.host_write(0x4000, 0x30, &mut host, &mut audio);
        adapter.host_write(0x4001, 0x55, &mut host, &mut audio);
        adapter.host_write(0x7F11, 0x9F, &mut host, &mut audio);
        assert_eq!(audio.fm, vec![(0, 0x30), (1, 0x55)]);
        assert_eq!(audio.psg, vec![0x9F]);
        // FM has no read path
        assert_eq!(adapter.host_read(0x4000, &mut host), 0xFF);
    }

    #[test]
    fn test_unmapped_statistics() {
        let mut adapter = running_adapter();
        let mut host = BusView::new();
        let mut audio = NullAudio;
        assert_eq!(adapter.host_read(0x3000, &mut host), 0xFF);
        adapter.host_write(0x3000, 0x01, &mut host, &mut audio);
        assert_eq!(adapter.unmapped_reads(), 1);
        assert_eq!(adapter.unmapped_writes(), 1);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut adapter = running_adapter();
        let mut host = BusView::new();
        let mut audio = NullAudio;
        adapter.poke_ram(0x100, 0x42);
        adapter.host_write(0x6000, 0x12, &mut host, &mut audio);
        adapter.assert_busreq();

        let bytes = adapter.to_bytes();
        let mut other = Z80HostAdapter::new();
        other.from_bytes(&bytes).unwrap();
        assert_eq!(other.peek(0x100, &host), 0x42);
        assert_eq!(other.bank(), 0x012);
        assert!(other.busreq_asserted());
        assert!(!other.reset_asserted());
    }
}
