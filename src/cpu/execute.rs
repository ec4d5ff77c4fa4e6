//! Z80 CPU instruction execution
//!
//! This module contains all instruction execution functions for the Z80 CPU:
//! - execute_base: Prefix detection and top-level dispatch
//! - execute_x0: Base instruction decoding (x=0 category)
//! - execute_alu: ALU operations (ADD, ADC, SUB, SBC, AND, XOR, OR, CP)
//! - execute_x3: Control flow and I/O instructions (x=3 category)
//! - execute_cb: CB prefix instructions (rotate, shift, bit operations)
//! - execute_rot: Rotate/shift operation implementation
//! - execute_ed: ED prefix instructions (extended operations)
//! - execute_bli: Block instruction execution (LDI/LDIR, CPI/CPIR, INI/INIR, OUTI/OTIR, ...)
//! - execute_index: DD/FD prefix instructions (IX/IY indexed operations)
//! - execute_index_cb: DDCB/FDCB compound-prefix operations
//!
//! Instructions are decoded with the x-y-z-p-q decomposition of the opcode
//! byte. Undocumented opcodes are implemented as the observable variants:
//! SLL, the IXH/IXL/IYH/IYL register slots, the ED NEG/RETN/IM mirrors, and
//! the DDCB/FDCB dual-sink forms that write the shifted value both to
//! (IX+d) and to a register.

use super::flags;
use super::Cpu;
use super::InterruptMode;
use super::Z80Bus;

impl Cpu {
    /// Top-level dispatch for one already-fetched opcode byte.
    pub(super) fn execute_base(&mut self, bus: &mut impl Z80Bus, opcode: u8) -> u32 {
        match opcode {
            0xCB => self.execute_cb(bus),
            0xED => self.execute_ed(bus),
            0xDD => self.execute_prefix_index(bus, true),
            0xFD => self.execute_prefix_index(bus, false),
            _ => self.execute_unprefixed(bus, opcode),
        }
    }

    /// Decode and execute an unprefixed opcode.
    fn execute_unprefixed(&mut self, bus: &mut impl Z80Bus, opcode: u8) -> u32 {
        let x = (opcode >> 6) & 0x03;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;
        let p = (y >> 1) & 0x03;
        let q = y & 0x01;

        match x {
            0 => self.execute_x0(bus, y, z, p, q),
            1 => {
                if y == 6 && z == 6 {
                    // HALT - PC stays past the HALT byte; the halted loop
                    // synthesises NOPs until an interrupt or reset.
                    self.halted = true;
                    4
                } else {
                    // LD r,r'
                    let val = self.get_reg8(z, bus);
                    self.set_reg8(y, val, bus);
                    if z == 6 || y == 6 {
                        7
                    } else {
                        4
                    }
                }
            }
            2 => {
                // ALU A,r
                let val = self.get_reg8(z, bus);
                self.execute_alu(y, val);
                if z == 6 {
                    7
                } else {
                    4
                }
            }
            3 => self.execute_x3(bus, y, z, p, q),
            _ => 4,
        }
    }

    /// Execute x=0 opcodes
    fn execute_x0(&mut self, bus: &mut impl Z80Bus, y: u8, z: u8, p: u8, q: u8) -> u32 {
        match z {
            0 => {
                match y {
                    0 => 4, // NOP
                    1 => {
                        // EX AF,AF'
                        self.ex_af();
                        4
                    }
                    2 => {
                        // DJNZ d
                        let d = self.fetch_byte(bus) as i8;
                        self.set_b(self.b().wrapping_sub(1));
                        if self.b() != 0 {
                            self.pc = self.pc.wrapping_add(d as u16);
                            13
                        } else {
                            8
                        }
                    }
                    3 => {
                        // JR d (unconditional)
                        let d = self.fetch_byte(bus) as i8;
                        self.pc = self.pc.wrapping_add(d as u16);
                        12
                    }
                    4..=7 => {
                        // JR cc,d
                        let d = self.fetch_byte(bus) as i8;
                        if self.check_cc(y - 4) {
                            self.pc = self.pc.wrapping_add(d as u16);
                            12
                        } else {
                            7
                        }
                    }
                    _ => 4,
                }
            }
            1 => {
                if q == 0 {
                    // LD rp,nn
                    let nn = self.fetch_word(bus);
                    self.set_rp(p, nn);
                    10
                } else {
                    // ADD HL,rp
                    let rp = self.get_rp(p);
                    self.hl = self.alu_add16(self.hl, rp);
                    11
                }
            }
            2 => match (p, q) {
                (0, 0) => {
                    // LD (BC),A
                    bus.write(self.bc, self.a);
                    7
                }
                (1, 0) => {
                    // LD (DE),A
                    bus.write(self.de, self.a);
                    7
                }
                (2, 0) => {
                    // LD (nn),HL
                    let nn = self.fetch_word(bus);
                    let hl = self.hl;
                    self.write_word(bus, nn, hl);
                    16
                }
                (3, 0) => {
                    // LD (nn),A
                    let nn = self.fetch_word(bus);
                    bus.write(nn, self.a);
                    13
                }
                (0, 1) => {
                    // LD A,(BC)
                    self.a = bus.read(self.bc);
                    7
                }
                (1, 1) => {
                    // LD A,(DE)
                    self.a = bus.read(self.de);
                    7
                }
                (2, 1) => {
                    // LD HL,(nn)
                    let nn = self.fetch_word(bus);
                    self.hl = self.read_word(bus, nn);
                    16
                }
                (3, 1) => {
                    // LD A,(nn)
                    let nn = self.fetch_word(bus);
                    self.a = bus.read(nn);
                    13
                }
                _ => 4,
            },
            3 => {
                if q == 0 {
                    // INC rp
                    let rp = self.get_rp(p).wrapping_add(1);
                    self.set_rp(p, rp);
                } else {
                    // DEC rp
                    let rp = self.get_rp(p).wrapping_sub(1);
                    self.set_rp(p, rp);
                }
                6
            }
            4 => {
                // INC r
                let val = self.get_reg8(y, bus);
                let result = self.alu_inc(val);
                self.set_reg8(y, result, bus);
                if y == 6 {
                    11
                } else {
                    4
                }
            }
            5 => {
                // DEC r
                let val = self.get_reg8(y, bus);
                let result = self.alu_dec(val);
                self.set_reg8(y, result, bus);
                if y == 6 {
                    11
                } else {
                    4
                }
            }
            6 => {
                // LD r,n
                let n = self.fetch_byte(bus);
                self.set_reg8(y, n, bus);
                if y == 6 {
                    10
                } else {
                    7
                }
            }
            7 => {
                match y {
                    0 => {
                        // RLCA
                        let c = (self.a >> 7) & 1;
                        self.a = (self.a << 1) | c;
                        self.set_flag_c(c != 0);
                        self.set_flag_h(false);
                        self.set_flag_n(false);
                        self.set_xy_flags(self.a);
                        4
                    }
                    1 => {
                        // RRCA
                        let c = self.a & 1;
                        self.a = (self.a >> 1) | (c << 7);
                        self.set_flag_c(c != 0);
                        self.set_flag_h(false);
                        self.set_flag_n(false);
                        self.set_xy_flags(self.a);
                        4
                    }
                    2 => {
                        // RLA
                        let old_c = if self.flag_c() { 1 } else { 0 };
                        let new_c = (self.a >> 7) & 1;
                        self.a = (self.a << 1) | old_c;
                        self.set_flag_c(new_c != 0);
                        self.set_flag_h(false);
                        self.set_flag_n(false);
                        self.set_xy_flags(self.a);
                        4
                    }
                    3 => {
                        // RRA
                        let old_c = if self.flag_c() { 0x80 } else { 0 };
                        let new_c = self.a & 1;
                        self.a = (self.a >> 1) | old_c;
                        self.set_flag_c(new_c != 0);
                        self.set_flag_h(false);
                        self.set_flag_n(false);
                        self.set_xy_flags(self.a);
                        4
                    }
                    4 => {
                        // DAA - Decimal Adjust Accumulator
                        let old_a = self.a;
                        let mut correction: u8 = 0;
                        let mut carry = self.flag_c();

                        if self.flag_h() || (old_a & 0x0F) > 9 {
                            correction |= 0x06;
                        }
                        if carry || old_a > 0x99 {
                            correction |= 0x60;
                            carry = true;
                        }

                        let half = if self.flag_n() {
                            self.a = self.a.wrapping_sub(correction);
                            self.flag_h() && (old_a & 0x0F) < 6
                        } else {
                            self.a = self.a.wrapping_add(correction);
                            (old_a & 0x0F) + (correction & 0x0F) > 0x0F
                        };

                        self.set_sz_flags(self.a);
                        self.set_flag_h(half);
                        self.set_flag_pv(Self::parity(self.a));
                        self.set_flag_c(carry);
                        4
                    }
                    5 => {
                        // CPL
                        self.a = !self.a;
                        self.set_flag_h(true);
                        self.set_flag_n(true);
                        self.set_xy_flags(self.a);
                        4
                    }
                    6 => {
                        // SCF
                        self.set_flag_c(true);
                        self.set_flag_h(false);
                        self.set_flag_n(false);
                        self.set_xy_flags(self.a);
                        4
                    }
                    7 => {
                        // CCF - half-carry takes the old carry
                        let old_c = self.flag_c();
                        self.set_flag_h(old_c);
                        self.set_flag_c(!old_c);
                        self.set_flag_n(false);
                        self.set_xy_flags(self.a);
                        4
                    }
                    _ => 4,
                }
            }
            _ => 4,
        }
    }

    /// Execute ALU operation (x=2)
    fn execute_alu(&mut self, y: u8, val: u8) {
        match y {
            0 => self.a = self.alu_add(val, false), // ADD
            1 => self.a = self.alu_add(val, true),  // ADC
            2 => self.a = self.alu_sub(val, false), // SUB
            3 => self.a = self.alu_sub(val, true),  // SBC
            4 => self.alu_and(val),                 // AND
            5 => self.alu_xor(val),                 // XOR
            6 => self.alu_or(val),                  // OR
            7 => self.alu_cp(val),                  // CP
            _ => {}
        }
    }

    /// Execute x=3 opcodes
    fn execute_x3(&mut self, bus: &mut impl Z80Bus, y: u8, z: u8, p: u8, q: u8) -> u32 {
        match z {
            0 => {
                // RET cc
                if self.check_cc(y) {
                    self.pc = self.pop_word(bus);
                    11
                } else {
                    5
                }
            }
            1 => {
                if q == 0 {
                    // POP rp2
                    let val = self.pop_word(bus);
                    self.set_rp2(p, val);
                    10
                } else {
                    match p {
                        0 => {
                            // RET
                            self.pc = self.pop_word(bus);
                            10
                        }
                        1 => {
                            // EXX
                            self.exx();
                            4
                        }
                        2 => {
                            // JP (HL)
                            self.pc = self.hl;
                            4
                        }
                        3 => {
                            // LD SP,HL
                            self.sp = self.hl;
                            6
                        }
                        _ => 4,
                    }
                }
            }
            2 => {
                // JP cc,nn
                let nn = self.fetch_word(bus);
                if self.check_cc(y) {
                    self.pc = nn;
                }
                10
            }
            3 => {
                match y {
                    0 => {
                        // JP nn
                        self.pc = self.fetch_word(bus);
                        10
                    }
                    // y=1 is the CB prefix, handled before decomposition
                    2 => {
                        // OUT (n),A - port (A << 8) | n
                        let n = self.fetch_byte(bus);
                        let port = ((self.a as u16) << 8) | (n as u16);
                        bus.port_out(port, self.a);
                        11
                    }
                    3 => {
                        // IN A,(n) - port (A << 8) | n
                        let n = self.fetch_byte(bus);
                        let port = ((self.a as u16) << 8) | (n as u16);
                        self.a = bus.port_in(port);
                        11
                    }
                    4 => {
                        // EX (SP),HL
                        let sp = self.sp;
                        let mem = self.read_word(bus, sp);
                        let hl = self.hl;
                        self.write_word(bus, sp, hl);
                        self.hl = mem;
                        19
                    }
                    5 => {
                        // EX DE,HL
                        self.ex_de_hl();
                        4
                    }
                    6 => {
                        // DI
                        self.iff1 = false;
                        self.iff2 = false;
                        4
                    }
                    7 => {
                        // EI - interrupts stay blocked for the one
                        // instruction following EI
                        self.iff1 = true;
                        self.iff2 = true;
                        self.ei_shadow = true;
                        4
                    }
                    _ => 4,
                }
            }
            4 => {
                // CALL cc,nn
                let nn = self.fetch_word(bus);
                if self.check_cc(y) {
                    self.push_word(bus, self.pc);
                    self.pc = nn;
                    17
                } else {
                    10
                }
            }
            5 => {
                if q == 0 {
                    // PUSH rp2
                    let val = self.get_rp2(p);
                    self.push_word(bus, val);
                    11
                } else {
                    match p {
                        0 => {
                            // CALL nn
                            let nn = self.fetch_word(bus);
                            self.push_word(bus, self.pc);
                            self.pc = nn;
                            17
                        }
                        // p=1 (DD), p=2 (ED), p=3 (FD) are prefixes,
                        // handled before decomposition
                        _ => 4,
                    }
                }
            }
            6 => {
                // ALU A,n
                let n = self.fetch_byte(bus);
                self.execute_alu(y, n);
                7
            }
            7 => {
                // RST y*8
                self.push_word(bus, self.pc);
                self.pc = (y as u16) * 8;
                11
            }
            _ => 4,
        }
    }

    // ========== CB Prefix (Bit Operations) ==========

    /// Execute CB-prefixed instruction (bit operations)
    fn execute_cb(&mut self, bus: &mut impl Z80Bus) -> u32 {
        let opcode = self.fetch_opcode(bus);
        let x = (opcode >> 6) & 0x03;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;

        match x {
            0 => {
                // Rotate/shift operations
                let val = self.get_reg8(z, bus);
                let result = self.execute_rot(y, val);
                self.set_reg8(z, result, bus);
                if z == 6 {
                    15
                } else {
                    8
                }
            }
            1 => {
                // BIT y,r[z] - F5/F3 mirror the operand
                let val = self.get_reg8(z, bus);
                self.bit_flags(y, val, val);
                if z == 6 {
                    12
                } else {
                    8
                }
            }
            2 => {
                // RES y,r[z]
                let val = self.get_reg8(z, bus);
                self.set_reg8(z, val & !(1 << y), bus);
                if z == 6 {
                    15
                } else {
                    8
                }
            }
            3 => {
                // SET y,r[z]
                let val = self.get_reg8(z, bus);
                self.set_reg8(z, val | (1 << y), bus);
                if z == 6 {
                    15
                } else {
                    8
                }
            }
            _ => 8,
        }
    }

    /// BIT flag computation. `val` is the tested operand; `xy_src` is the
    /// byte F5/F3 are copied from (the operand, or the high byte of the
    /// effective address for indexed BIT).
    fn bit_flags(&mut self, y: u8, val: u8, xy_src: u8) {
        let result = val & (1 << y);
        self.f &= flags::C;
        self.set_flag_z(result == 0);
        self.set_flag_pv(result == 0);
        self.set_flag_h(true);
        if y == 7 && result != 0 {
            self.f |= flags::S;
        }
        self.set_xy_flags(xy_src);
    }

    /// Execute rotate/shift operation (CB prefix, x=0).
    /// F5/F3 mirror the result; P/V carries parity.
    fn execute_rot(&mut self, y: u8, val: u8) -> u8 {
        let result = match y {
            0 => {
                // RLC - rotate left circular
                let c = (val >> 7) & 1;
                self.set_flag_c(c != 0);
                (val << 1) | c
            }
            1 => {
                // RRC - rotate right circular
                let c = val & 1;
                self.set_flag_c(c != 0);
                (val >> 1) | (c << 7)
            }
            2 => {
                // RL - rotate left through carry
                let old_c = if self.flag_c() { 1 } else { 0 };
                self.set_flag_c((val >> 7) & 1 != 0);
                (val << 1) | old_c
            }
            3 => {
                // RR - rotate right through carry
                let old_c = if self.flag_c() { 0x80 } else { 0 };
                self.set_flag_c(val & 1 != 0);
                (val >> 1) | old_c
            }
            4 => {
                // SLA - shift left arithmetic
                self.set_flag_c((val >> 7) & 1 != 0);
                val << 1
            }
            5 => {
                // SRA - shift right arithmetic (preserve sign)
                self.set_flag_c(val & 1 != 0);
                (val >> 1) | (val & 0x80)
            }
            6 => {
                // SLL - shift left logical (undocumented, sets bit 0)
                self.set_flag_c((val >> 7) & 1 != 0);
                (val << 1) | 1
            }
            7 => {
                // SRL - shift right logical
                self.set_flag_c(val & 1 != 0);
                val >> 1
            }
            _ => val,
        };

        self.set_flag_h(false);
        self.set_flag_n(false);
        self.set_sz_flags(result);
        self.set_flag_pv(Self::parity(result));

        result
    }

    // ========== ED Prefix (Extended Instructions) ==========

    /// Execute ED-prefixed instruction
    fn execute_ed(&mut self, bus: &mut impl Z80Bus) -> u32 {
        let opcode = self.fetch_opcode(bus);
        let x = (opcode >> 6) & 0x03;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;
        let p = (y >> 1) & 0x03;
        let q = y & 0x01;

        match x {
            1 => self.execute_ed_x1(bus, y, z, p, q),
            2 => {
                // Block instructions occupy y>=4, z<=3
                if y >= 4 && z <= 3 {
                    self.execute_bli(bus, y, z)
                } else {
                    8 // NONI
                }
            }
            // x=0 and x=3 are NONI (no operation, no interrupt)
            _ => 8,
        }
    }

    /// Execute ED prefix x=1 opcodes
    fn execute_ed_x1(&mut self, bus: &mut impl Z80Bus, y: u8, z: u8, p: u8, q: u8) -> u32 {
        match z {
            0 => {
                // IN r,(C) - y=6 is the undocumented IN F,(C): flags only
                let val = bus.port_in(self.bc);
                if y != 6 {
                    self.set_reg8(y, val, bus);
                }
                self.set_sz_flags(val);
                self.set_flag_h(false);
                self.set_flag_n(false);
                self.set_flag_pv(Self::parity(val));
                12
            }
            1 => {
                // OUT (C),r - y=6 is the undocumented OUT (C),0
                let val = if y == 6 { 0 } else { self.get_reg8(y, bus) };
                bus.port_out(self.bc, val);
                12
            }
            2 => {
                if q == 0 {
                    // SBC HL,rp
                    let rp = self.get_rp(p);
                    self.hl = self.alu_sbc16(self.hl, rp);
                } else {
                    // ADC HL,rp
                    let rp = self.get_rp(p);
                    self.hl = self.alu_adc16(self.hl, rp);
                }
                15
            }
            3 => {
                // LD (nn),rp / LD rp,(nn)
                let nn = self.fetch_word(bus);
                if q == 0 {
                    let rp = self.get_rp(p);
                    self.write_word(bus, nn, rp);
                } else {
                    let val = self.read_word(bus, nn);
                    self.set_rp(p, val);
                }
                20
            }
            4 => {
                // NEG (mirrored at every y)
                let old_a = self.a;
                self.a = 0;
                self.a = self.alu_sub(old_a, false);
                8
            }
            5 => {
                // RETN (y=0 and mirrors), RETI (y=1). Both copy IFF2 back
                // into IFF1; RETI additionally signals the interrupting
                // device, which has no observable effect here.
                self.iff1 = self.iff2;
                self.pc = self.pop_word(bus);
                14
            }
            6 => {
                // IM - standard decode table {0,0,1,2,0,0,1,2}
                self.im = match y & 0x03 {
                    2 => InterruptMode::Mode1,
                    3 => InterruptMode::Mode2,
                    _ => InterruptMode::Mode0,
                };
                8
            }
            7 => match y {
                0 => {
                    // LD I,A
                    self.i = self.a;
                    9
                }
                1 => {
                    // LD R,A - the only way to touch bit 7 of R
                    self.r = self.a;
                    9
                }
                2 => {
                    // LD A,I - P/V carries IFF2
                    self.a = self.i;
                    self.set_sz_flags(self.a);
                    self.set_flag_h(false);
                    self.set_flag_n(false);
                    self.set_flag_pv(self.iff2);
                    9
                }
                3 => {
                    // LD A,R - P/V carries IFF2
                    self.a = self.r;
                    self.set_sz_flags(self.a);
                    self.set_flag_h(false);
                    self.set_flag_n(false);
                    self.set_flag_pv(self.iff2);
                    9
                }
                4 => {
                    // RRD
                    let addr = self.hl;
                    let mem = bus.read(addr);
                    let new_mem = (self.a << 4) | (mem >> 4);
                    self.a = (self.a & 0xF0) | (mem & 0x0F);
                    bus.write(addr, new_mem);

                    self.set_sz_flags(self.a);
                    self.set_flag_h(false);
                    self.set_flag_n(false);
                    self.set_flag_pv(Self::parity(self.a));
                    18
                }
                5 => {
                    // RLD
                    let addr = self.hl;
                    let mem = bus.read(addr);
                    let new_mem = (mem << 4) | (self.a & 0x0F);
                    self.a = (self.a & 0xF0) | (mem >> 4);
                    bus.write(addr, new_mem);

                    self.set_sz_flags(self.a);
                    self.set_flag_h(false);
                    self.set_flag_n(false);
                    self.set_flag_pv(Self::parity(self.a));
                    18
                }
                _ => 8, // y=6,7 are NONI
            },
            _ => 8,
        }
    }

    // ========== Block Instructions ==========

    /// Execute block instructions (ED prefix, x=2, y>=4, z<=3).
    ///
    /// Each call performs exactly one iteration. The repeating forms
    /// rewind PC by two while their repeat condition holds, so the same
    /// instruction refetches on the next step - this is what makes a long
    /// LDIR interruptible between iterations. A repeating iteration costs
    /// 21 T-states, the final one 16.
    fn execute_bli(&mut self, bus: &mut impl Z80Bus, y: u8, z: u8) -> u32 {
        // y: 4=inc, 5=dec, 6=inc+repeat, 7=dec+repeat
        let delta: u16 = if y & 1 == 0 { 1 } else { 0xFFFF };
        let repeat = y >= 6;

        match z {
            0 => {
                // LDI / LDD / LDIR / LDDR
                let val = bus.read(self.hl);
                bus.write(self.de, val);
                self.hl = self.hl.wrapping_add(delta);
                self.de = self.de.wrapping_add(delta);
                self.bc = self.bc.wrapping_sub(1);

                // F5/F3 come from (value + A): bit 1 and bit 3
                let n = val.wrapping_add(self.a);
                self.set_flag_h(false);
                self.set_flag_n(false);
                self.set_flag_pv(self.bc != 0);
                self.f = (self.f & !(flags::F5 | flags::F3)) | ((n & 0x02) << 4) | (n & 0x08);

                if repeat && self.bc != 0 {
                    self.pc = self.pc.wrapping_sub(2);
                    21
                } else {
                    16
                }
            }
            1 => {
                // CPI / CPD / CPIR / CPDR
                let val = bus.read(self.hl);
                let result = self.a.wrapping_sub(val);
                self.hl = self.hl.wrapping_add(delta);
                self.bc = self.bc.wrapping_sub(1);

                self.set_sz_flags(result);
                self.set_flag_h((self.a & 0x0F) < (val & 0x0F));
                self.set_flag_n(true);
                self.set_flag_pv(self.bc != 0);
                // F5/F3 from (result - H): bit 1 and bit 3
                let n = result.wrapping_sub(if self.flag_h() { 1 } else { 0 });
                self.f = (self.f & !(flags::F5 | flags::F3)) | ((n & 0x02) << 4) | (n & 0x08);

                if repeat && self.bc != 0 && result != 0 {
                    self.pc = self.pc.wrapping_sub(2);
                    21
                } else {
                    16
                }
            }
            2 => {
                // INI / IND / INIR / INDR
                let val = bus.port_in(self.bc);
                bus.write(self.hl, val);
                self.hl = self.hl.wrapping_add(delta);
                let b = self.b().wrapping_sub(1);
                self.set_b(b);

                let c_adj = self.c().wrapping_add(delta as u8);
                let k = val as u16 + c_adj as u16;
                self.set_sz_flags(b);
                self.set_flag_n(val & 0x80 != 0);
                self.set_flag_h(k > 0xFF);
                self.set_flag_c(k > 0xFF);
                self.set_flag_pv(Self::parity((k as u8 & 0x07) ^ b));

                if repeat && b != 0 {
                    self.pc = self.pc.wrapping_sub(2);
                    21
                } else {
                    16
                }
            }
            3 => {
                // OUTI / OUTD / OTIR / OTDR
                let val = bus.read(self.hl);
                let b = self.b().wrapping_sub(1);
                self.set_b(b);
                bus.port_out(self.bc, val);
                self.hl = self.hl.wrapping_add(delta);

                let k = val as u16 + self.l() as u16;
                self.set_sz_flags(b);
                self.set_flag_n(val & 0x80 != 0);
                self.set_flag_h(k > 0xFF);
                self.set_flag_c(k > 0xFF);
                self.set_flag_pv(Self::parity((k as u8 & 0x07) ^ b));

                if repeat && b != 0 {
                    self.pc = self.pc.wrapping_sub(2);
                    21
                } else {
                    16
                }
            }
            _ => 8,
        }
    }

    // ========== DD / FD Prefix (Indexed Instructions) ==========

    /// Handle a DD or FD prefix byte. A second index or ED prefix makes
    /// the current one a no-op (NONI): it consumed its fetch and the new
    /// prefix decodes on the next step.
    fn execute_prefix_index(&mut self, bus: &mut impl Z80Bus, ix: bool) -> u32 {
        let opcode = self.fetch_opcode(bus);
        if opcode == 0xDD || opcode == 0xFD || opcode == 0xED {
            // Rewind so the new prefix decodes as its own instruction;
            // the refetch will redo the M1 count.
            self.pc = self.pc.wrapping_sub(1);
            self.r = (self.r & 0x80) | (self.r.wrapping_sub(1) & 0x7F);
            return 4;
        }
        self.execute_index(bus, ix, opcode)
    }

    /// Active index register value
    #[inline]
    fn index_reg(&self, ix: bool) -> u16 {
        if ix {
            self.ix
        } else {
            self.iy
        }
    }

    /// Store to the active index register
    #[inline]
    fn set_index_reg(&mut self, ix: bool, val: u16) {
        if ix {
            self.ix = val;
        } else {
            self.iy = val;
        }
    }

    /// Fetch a displacement byte and form (IX+d) / (IY+d)
    #[inline]
    fn fetch_indexed_addr(&mut self, bus: &mut impl Z80Bus, ix: bool) -> u16 {
        let d = self.fetch_byte(bus) as i8;
        self.index_reg(ix).wrapping_add(d as u16)
    }

    /// Execute a DD/FD-prefixed instruction. Returned T-states include the
    /// prefix fetch. Opcodes that do not involve HL, (HL), H or L fall
    /// through to base behaviour plus the four prefix T-states.
    fn execute_index(&mut self, bus: &mut impl Z80Bus, ix: bool, opcode: u8) -> u32 {
        if opcode == 0xCB {
            return self.execute_index_cb(bus, ix);
        }

        let x = (opcode >> 6) & 0x03;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;
        let p = (y >> 1) & 0x03;
        let q = y & 0x01;

        match x {
            0 => match z {
                1 if q == 0 && p == 2 => {
                    // LD IX,nn
                    let nn = self.fetch_word(bus);
                    self.set_index_reg(ix, nn);
                    14
                }
                1 if q == 1 => {
                    // ADD IX,rp (rp index 2 selects IX itself)
                    let rp = if p == 2 { self.index_reg(ix) } else { self.get_rp(p) };
                    let result = self.alu_add16(self.index_reg(ix), rp);
                    self.set_index_reg(ix, result);
                    15
                }
                2 if p == 2 && q == 0 => {
                    // LD (nn),IX
                    let nn = self.fetch_word(bus);
                    let val = self.index_reg(ix);
                    self.write_word(bus, nn, val);
                    20
                }
                2 if p == 2 && q == 1 => {
                    // LD IX,(nn)
                    let nn = self.fetch_word(bus);
                    let val = self.read_word(bus, nn);
                    self.set_index_reg(ix, val);
                    20
                }
                3 if p == 2 => {
                    // INC IX / DEC IX
                    let val = if q == 0 {
                        self.index_reg(ix).wrapping_add(1)
                    } else {
                        self.index_reg(ix).wrapping_sub(1)
                    };
                    self.set_index_reg(ix, val);
                    10
                }
                4 => {
                    // INC r (IXH/IXL slots, or (IX+d) for y=6)
                    if y == 6 {
                        let addr = self.fetch_indexed_addr(bus, ix);
                        let val = bus.read(addr);
                        let result = self.alu_inc(val);
                        bus.write(addr, result);
                        23
                    } else {
                        let val = self.get_reg8_idx(y, ix);
                        let result = self.alu_inc(val);
                        self.set_reg8_idx(y, result, ix);
                        8
                    }
                }
                5 => {
                    // DEC r (IXH/IXL slots, or (IX+d) for y=6)
                    if y == 6 {
                        let addr = self.fetch_indexed_addr(bus, ix);
                        let val = bus.read(addr);
                        let result = self.alu_dec(val);
                        bus.write(addr, result);
                        23
                    } else {
                        let val = self.get_reg8_idx(y, ix);
                        let result = self.alu_dec(val);
                        self.set_reg8_idx(y, result, ix);
                        8
                    }
                }
                6 => {
                    // LD r,n (IXH/IXL slots, or LD (IX+d),n for y=6)
                    if y == 6 {
                        let addr = self.fetch_indexed_addr(bus, ix);
                        let n = self.fetch_byte(bus);
                        bus.write(addr, n);
                        19
                    } else {
                        let n = self.fetch_byte(bus);
                        self.set_reg8_idx(y, n, ix);
                        11
                    }
                }
                _ => 4 + self.execute_unprefixed(bus, opcode),
            },
            1 => {
                if y == 6 && z == 6 {
                    // DD/FD HALT behaves as HALT
                    4 + self.execute_unprefixed(bus, opcode)
                } else if y == 6 {
                    // LD (IX+d),r - source is the unsubstituted register
                    let addr = self.fetch_indexed_addr(bus, ix);
                    let val = self.get_reg8(z, bus);
                    bus.write(addr, val);
                    19
                } else if z == 6 {
                    // LD r,(IX+d) - destination is the unsubstituted register
                    let addr = self.fetch_indexed_addr(bus, ix);
                    let val = bus.read(addr);
                    self.set_reg8(y, val, bus);
                    19
                } else {
                    // LD r,r' with H/L replaced by the index halves
                    let val = self.get_reg8_idx(z, ix);
                    self.set_reg8_idx(y, val, ix);
                    8
                }
            }
            2 => {
                // ALU A,r with index substitution
                if z == 6 {
                    let addr = self.fetch_indexed_addr(bus, ix);
                    let val = bus.read(addr);
                    self.execute_alu(y, val);
                    19
                } else {
                    let val = self.get_reg8_idx(z, ix);
                    self.execute_alu(y, val);
                    8
                }
            }
            3 => match (z, q, p) {
                (1, 0, 2) => {
                    // POP IX
                    let val = self.pop_word(bus);
                    self.set_index_reg(ix, val);
                    14
                }
                (1, 1, 2) => {
                    // JP (IX)
                    self.pc = self.index_reg(ix);
                    8
                }
                (1, 1, 3) => {
                    // LD SP,IX
                    self.sp = self.index_reg(ix);
                    10
                }
                (3, _, _) if y == 4 => {
                    // EX (SP),IX
                    let sp = self.sp;
                    let mem = self.read_word(bus, sp);
                    let val = self.index_reg(ix);
                    self.write_word(bus, sp, val);
                    self.set_index_reg(ix, mem);
                    23
                }
                (5, 0, 2) => {
                    // PUSH IX
                    let val = self.index_reg(ix);
                    self.push_word(bus, val);
                    15
                }
                _ => 4 + self.execute_unprefixed(bus, opcode),
            },
            _ => 4 + self.execute_unprefixed(bus, opcode),
        }
    }

    /// Execute a DDCB/FDCB compound-prefixed instruction.
    ///
    /// Decode order: displacement byte, then the CB-space opcode. The
    /// operand is always (IX+d)/(IY+d). The undocumented slots (z != 6)
    /// additionally copy the result into the register selected by z - the
    /// dual-sink forms - for every rotate/shift/RES/SET. BIT only reads,
    /// taking F5/F3 from the high byte of the effective address.
    fn execute_index_cb(&mut self, bus: &mut impl Z80Bus, ix: bool) -> u32 {
        let addr = self.fetch_indexed_addr(bus, ix);
        // Third byte indexes the CB table; not an M1 cycle
        let opcode = self.fetch_byte(bus);
        let x = (opcode >> 6) & 0x03;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;

        match x {
            0 => {
                // Rotate/shift (IX+d), dual-sink to register z when z != 6
                let val = bus.read(addr);
                let result = self.execute_rot(y, val);
                bus.write(addr, result);
                if z != 6 {
                    self.set_reg8(z, result, bus);
                }
                23
            }
            1 => {
                // BIT y,(IX+d) - F5/F3 from the high byte of the address
                let val = bus.read(addr);
                self.bit_flags(y, val, (addr >> 8) as u8);
                20
            }
            2 => {
                // RES y,(IX+d), dual-sink
                let val = bus.read(addr) & !(1 << y);
                bus.write(addr, val);
                if z != 6 {
                    self.set_reg8(z, val, bus);
                }
                23
            }
            3 => {
                // SET y,(IX+d), dual-sink
                let val = bus.read(addr) | (1 << y);
                bus.write(addr, val);
                if z != 6 {
                    self.set_reg8(z, val, bus);
                }
                23
            }
            _ => 23,
        }
    }
}
