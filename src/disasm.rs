//! Z80 Disassembler
//!
//! Provides instruction disassembly for the trace buffer and the
//! debugger's listing operations. Handles all prefix combinations
//! (CB, ED, DD, FD, DDCB, FDCB) including the undocumented forms:
//! SLL, the IXH/IXL/IYH/IYL register slots, and the dual-sink
//! DDCB/FDCB opcodes rendered as e.g. `RLC (IX+2),C`.

/// Result of disassembling an instruction
#[derive(Debug, Clone)]
pub struct DisasmResult {
    /// Raw opcode bytes as hex string (e.g., "DD 7E 05")
    pub bytes: String,
    /// Mnemonic with operands (e.g., "LD A,(IX+5)")
    pub mnemonic: String,
    /// Length of the instruction in bytes
    pub length: usize,
}

const REG8: [&str; 8] = ["B", "C", "D", "E", "H", "L", "(HL)", "A"];
const RP: [&str; 4] = ["BC", "DE", "HL", "SP"];
const RP2: [&str; 4] = ["BC", "DE", "HL", "AF"];
const CC: [&str; 8] = ["NZ", "Z", "NC", "C", "PO", "PE", "P", "M"];
const ALU: [&str; 8] = [
    "ADD A,", "ADC A,", "SUB ", "SBC A,", "AND ", "XOR ", "OR ", "CP ",
];
const ROT: [&str; 8] = ["RLC", "RRC", "RL", "RR", "SLA", "SRA", "SLL", "SRL"];
const BLI: [[&str; 4]; 4] = [
    ["LDI", "CPI", "INI", "OUTI"],
    ["LDD", "CPD", "IND", "OUTD"],
    ["LDIR", "CPIR", "INIR", "OTIR"],
    ["LDDR", "CPDR", "INDR", "OTDR"],
];

/// Disassemble one instruction; returns the mnemonic and the byte length.
///
/// `bytes` should hold at least four bytes (the longest encoding); short
/// slices yield a partial rendering with the available length.
pub fn disassemble(bytes: &[u8]) -> (String, usize) {
    if bytes.is_empty() {
        return ("???".to_string(), 0);
    }
    match bytes[0] {
        0xCB => disasm_cb(bytes),
        0xED => disasm_ed(bytes),
        0xDD => disasm_index(bytes, "IX"),
        0xFD => disasm_index(bytes, "IY"),
        _ => disasm_unprefixed(bytes),
    }
}

/// Disassemble with the raw bytes rendered as hex alongside.
pub fn disassemble_detailed(bytes: &[u8]) -> DisasmResult {
    let (mnemonic, length) = disassemble(bytes);
    let hex = bytes[..length.min(bytes.len())]
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ");
    DisasmResult {
        bytes: hex,
        mnemonic,
        length,
    }
}

fn imm8(bytes: &[u8], offset: usize) -> String {
    match bytes.get(offset) {
        Some(b) => format!("0x{b:02X}"),
        None => "?".to_string(),
    }
}

fn imm16(bytes: &[u8], offset: usize) -> String {
    match (bytes.get(offset), bytes.get(offset + 1)) {
        (Some(lo), Some(hi)) => format!("0x{:04X}", (*hi as u16) << 8 | *lo as u16),
        _ => "?".to_string(),
    }
}

fn rel8(bytes: &[u8], offset: usize) -> String {
    match bytes.get(offset) {
        Some(b) => {
            let d = *b as i8;
            if d >= 0 {
                format!("+{d}")
            } else {
                format!("{d}")
            }
        }
        None => "?".to_string(),
    }
}

/// (IX+d) / (IY+d) operand
fn indexed(reg: &str, bytes: &[u8], offset: usize) -> String {
    match bytes.get(offset) {
        Some(b) => {
            let d = *b as i8;
            if d >= 0 {
                format!("({reg}+{d})")
            } else {
                format!("({reg}{d})")
            }
        }
        None => format!("({reg}+?)"),
    }
}

fn disasm_unprefixed(bytes: &[u8]) -> (String, usize) {
    let op = bytes[0];
    let x = (op >> 6) & 0x03;
    let y = (op >> 3) & 0x07;
    let z = op & 0x07;
    let p = (y >> 1) & 0x03;
    let q = y & 0x01;

    match x {
        0 => match z {
            0 => match y {
                0 => ("NOP".to_string(), 1),
                1 => ("EX AF,AF'".to_string(), 1),
                2 => (format!("DJNZ {}", rel8(bytes, 1)), 2),
                3 => (format!("JR {}", rel8(bytes, 1)), 2),
                _ => (format!("JR {},{}", CC[(y - 4) as usize], rel8(bytes, 1)), 2),
            },
            1 => {
                if q == 0 {
                    (format!("LD {},{}", RP[p as usize], imm16(bytes, 1)), 3)
                } else {
                    (format!("ADD HL,{}", RP[p as usize]), 1)
                }
            }
            2 => match (p, q) {
                (0, 0) => ("LD (BC),A".to_string(), 1),
                (1, 0) => ("LD (DE),A".to_string(), 1),
                (2, 0) => (format!("LD ({}),HL", imm16(bytes, 1)), 3),
                (3, 0) => (format!("LD ({}),A", imm16(bytes, 1)), 3),
                (0, 1) => ("LD A,(BC)".to_string(), 1),
                (1, 1) => ("LD A,(DE)".to_string(), 1),
                (2, 1) => (format!("LD HL,({})", imm16(bytes, 1)), 3),
                _ => (format!("LD A,({})", imm16(bytes, 1)), 3),
            },
            3 => {
                if q == 0 {
                    (format!("INC {}", RP[p as usize]), 1)
                } else {
                    (format!("DEC {}", RP[p as usize]), 1)
                }
            }
            4 => (format!("INC {}", REG8[y as usize]), 1),
            5 => (format!("DEC {}", REG8[y as usize]), 1),
            6 => (format!("LD {},{}", REG8[y as usize], imm8(bytes, 1)), 2),
            _ => (
                ["RLCA", "RRCA", "RLA", "RRA", "DAA", "CPL", "SCF", "CCF"][y as usize].to_string(),
                1,
            ),
        },
        1 => {
            if y == 6 && z == 6 {
                ("HALT".to_string(), 1)
            } else {
                (format!("LD {},{}", REG8[y as usize], REG8[z as usize]), 1)
            }
        }
        2 => (format!("{}{}", ALU[y as usize], REG8[z as usize]), 1),
        3 => match z {
            0 => (format!("RET {}", CC[y as usize]), 1),
            1 => {
                if q == 0 {
                    (format!("POP {}", RP2[p as usize]), 1)
                } else {
                    match p {
                        0 => ("RET".to_string(), 1),
                        1 => ("EXX".to_string(), 1),
                        2 => ("JP (HL)".to_string(), 1),
                        _ => ("LD SP,HL".to_string(), 1),
                    }
                }
            }
            2 => (format!("JP {},{}", CC[y as usize], imm16(bytes, 1)), 3),
            3 => match y {
                0 => (format!("JP {}", imm16(bytes, 1)), 3),
                2 => (format!("OUT ({}),A", imm8(bytes, 1)), 2),
                3 => (format!("IN A,({})", imm8(bytes, 1)), 2),
                4 => ("EX (SP),HL".to_string(), 1),
                5 => ("EX DE,HL".to_string(), 1),
                6 => ("DI".to_string(), 1),
                _ => ("EI".to_string(), 1),
            },
            4 => (format!("CALL {},{}", CC[y as usize], imm16(bytes, 1)), 3),
            5 => {
                if q == 0 {
                    (format!("PUSH {}", RP2[p as usize]), 1)
                } else {
                    (format!("CALL {}", imm16(bytes, 1)), 3)
                }
            }
            6 => (format!("{}{}", ALU[y as usize], imm8(bytes, 1)), 2),
            _ => (format!("RST {:02X}H", y * 8), 1),
        },
        _ => ("???".to_string(), 1),
    }
}

fn disasm_cb(bytes: &[u8]) -> (String, usize) {
    let Some(&op) = bytes.get(1) else {
        return ("DB CBh".to_string(), 1);
    };
    let x = (op >> 6) & 0x03;
    let y = (op >> 3) & 0x07;
    let z = op & 0x07;

    let mnemonic = match x {
        0 => format!("{} {}", ROT[y as usize], REG8[z as usize]),
        1 => format!("BIT {},{}", y, REG8[z as usize]),
        2 => format!("RES {},{}", y, REG8[z as usize]),
        _ => format!("SET {},{}", y, REG8[z as usize]),
    };
    (mnemonic, 2)
}

fn disasm_ed(bytes: &[u8]) -> (String, usize) {
    let Some(&op) = bytes.get(1) else {
        return ("DB EDh".to_string(), 1);
    };
    let x = (op >> 6) & 0x03;
    let y = (op >> 3) & 0x07;
    let z = op & 0x07;
    let p = (y >> 1) & 0x03;
    let q = y & 0x01;

    match x {
        1 => match z {
            0 => {
                if y == 6 {
                    ("IN F,(C)".to_string(), 2)
                } else {
                    (format!("IN {},(C)", REG8[y as usize]), 2)
                }
            }
            1 => {
                if y == 6 {
                    ("OUT (C),0".to_string(), 2)
                } else {
                    (format!("OUT (C),{}", REG8[y as usize]), 2)
                }
            }
            2 => {
                if q == 0 {
                    (format!("SBC HL,{}", RP[p as usize]), 2)
                } else {
                    (format!("ADC HL,{}", RP[p as usize]), 2)
                }
            }
            3 => {
                if q == 0 {
                    (format!("LD ({}),{}", imm16(bytes, 2), RP[p as usize]), 4)
                } else {
                    (format!("LD {},({})", RP[p as usize], imm16(bytes, 2)), 4)
                }
            }
            4 => ("NEG".to_string(), 2),
            5 => {
                if y == 1 {
                    ("RETI".to_string(), 2)
                } else {
                    ("RETN".to_string(), 2)
                }
            }
            6 => {
                let mode = ["0", "0", "1", "2", "0", "0", "1", "2"][y as usize];
                (format!("IM {mode}"), 2)
            }
            _ => match y {
                0 => ("LD I,A".to_string(), 2),
                1 => ("LD R,A".to_string(), 2),
                2 => ("LD A,I".to_string(), 2),
                3 => ("LD A,R".to_string(), 2),
                4 => ("RRD".to_string(), 2),
                5 => ("RLD".to_string(), 2),
                _ => ("NONI".to_string(), 2),
            },
        },
        2 if y >= 4 && z <= 3 => (BLI[(y - 4) as usize][z as usize].to_string(), 2),
        _ => ("NONI".to_string(), 2),
    }
}

fn disasm_index(bytes: &[u8], reg: &str) -> (String, usize) {
    let Some(&op) = bytes.get(1) else {
        return (format!("DB {}h", if reg == "IX" { "DD" } else { "FD" }), 1);
    };
    if op == 0xCB {
        return disasm_index_cb(bytes, reg);
    }
    if op == 0xDD || op == 0xFD || op == 0xED {
        // Dangling prefix acts as NONI; the new prefix starts over
        return ("NONI".to_string(), 1);
    }

    let x = (op >> 6) & 0x03;
    let y = (op >> 3) & 0x07;
    let z = op & 0x07;
    let p = (y >> 1) & 0x03;
    let q = y & 0x01;

    // H and L become the halves of the index register in substituted slots
    let idx_reg8 = |slot: u8| -> String {
        match slot {
            4 => format!("{reg}H"),
            5 => format!("{reg}L"),
            _ => REG8[slot as usize].to_string(),
        }
    };

    match x {
        0 => match z {
            1 if q == 0 && p == 2 => (format!("LD {reg},{}", imm16(bytes, 2)), 4),
            1 if q == 1 => {
                let rhs = if p == 2 {
                    reg.to_string()
                } else {
                    RP[p as usize].to_string()
                };
                (format!("ADD {reg},{rhs}"), 2)
            }
            2 if p == 2 && q == 0 => (format!("LD ({}),{reg}", imm16(bytes, 2)), 4),
            2 if p == 2 && q == 1 => (format!("LD {reg},({})", imm16(bytes, 2)), 4),
            3 if p == 2 => {
                if q == 0 {
                    (format!("INC {reg}"), 2)
                } else {
                    (format!("DEC {reg}"), 2)
                }
            }
            4 => {
                if y == 6 {
                    (format!("INC {}", indexed(reg, bytes, 2)), 3)
                } else {
                    (format!("INC {}", idx_reg8(y)), 2)
                }
            }
            5 => {
                if y == 6 {
                    (format!("DEC {}", indexed(reg, bytes, 2)), 3)
                } else {
                    (format!("DEC {}", idx_reg8(y)), 2)
                }
            }
            6 => {
                if y == 6 {
                    (
                        format!("LD {},{}", indexed(reg, bytes, 2), imm8(bytes, 3)),
                        4,
                    )
                } else {
                    (format!("LD {},{}", idx_reg8(y), imm8(bytes, 2)), 3)
                }
            }
            _ => {
                let (inner, len) = disasm_unprefixed(&bytes[1..]);
                (inner, len + 1)
            }
        },
        1 => {
            if y == 6 && z == 6 {
                ("HALT".to_string(), 2)
            } else if y == 6 {
                (
                    format!("LD {},{}", indexed(reg, bytes, 2), REG8[z as usize]),
                    3,
                )
            } else if z == 6 {
                (
                    format!("LD {},{}", REG8[y as usize], indexed(reg, bytes, 2)),
                    3,
                )
            } else {
                (format!("LD {},{}", idx_reg8(y), idx_reg8(z)), 2)
            }
        }
        2 => {
            if z == 6 {
                (format!("{}{}", ALU[y as usize], indexed(reg, bytes, 2)), 3)
            } else {
                (format!("{}{}", ALU[y as usize], idx_reg8(z)), 2)
            }
        }
        3 => match (z, q, p) {
            (1, 0, 2) => (format!("POP {reg}"), 2),
            (1, 1, 2) => (format!("JP ({reg})"), 2),
            (1, 1, 3) => (format!("LD SP,{reg}"), 2),
            (3, _, _) if y == 4 => (format!("EX (SP),{reg}"), 2),
            (5, 0, 2) => (format!("PUSH {reg}"), 2),
            _ => {
                let (inner, len) = disasm_unprefixed(&bytes[1..]);
                (inner, len + 1)
            }
        },
        _ => {
            let (inner, len) = disasm_unprefixed(&bytes[1..]);
            (inner, len + 1)
        }
    }
}

fn disasm_index_cb(bytes: &[u8], reg: &str) -> (String, usize) {
    let operand = indexed(reg, bytes, 2);
    let Some(&op) = bytes.get(3) else {
        return (format!("{} ?", operand), bytes.len().min(4));
    };
    let x = (op >> 6) & 0x03;
    let y = (op >> 3) & 0x07;
    let z = op & 0x07;

    let mnemonic = match x {
        0 => {
            if z == 6 {
                format!("{} {}", ROT[y as usize], operand)
            } else {
                // Dual-sink form: result also lands in a register
                format!("{} {},{}", ROT[y as usize], operand, REG8[z as usize])
            }
        }
        1 => format!("BIT {},{}", y, operand),
        2 => {
            if z == 6 {
                format!("RES {},{}", y, operand)
            } else {
                format!("RES {},{},{}", y, operand, REG8[z as usize])
            }
        }
        _ => {
            if z == 6 {
                format!("SET {},{}", y, operand)
            } else {
                format!("SET {},{},{}", y, operand, REG8[z as usize])
            }
        }
    };
    (mnemonic, 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dis(bytes: &[u8]) -> (String, usize) {
        disassemble(bytes)
    }

    #[test]
    fn test_basic_opcodes() {
        assert_eq!(dis(&[0x00]), ("NOP".to_string(), 1));
        assert_eq!(dis(&[0x76]), ("HALT".to_string(), 1));
        assert_eq!(dis(&[0x3E, 0x42]), ("LD A,0x42".to_string(), 2));
        assert_eq!(dis(&[0x21, 0x34, 0x12]), ("LD HL,0x1234".to_string(), 3));
        assert_eq!(dis(&[0xC9]), ("RET".to_string(), 1));
        assert_eq!(dis(&[0xCD, 0x00, 0x20]), ("CALL 0x2000".to_string(), 3));
        assert_eq!(dis(&[0xFF]), ("RST 38H".to_string(), 1));
        assert_eq!(dis(&[0x18, 0x05]), ("JR +5".to_string(), 2));
        assert_eq!(dis(&[0x20, 0xFE]), ("JR NZ,-2".to_string(), 2));
    }

    #[test]
    fn test_alu_and_ld() {
        assert_eq!(dis(&[0x80]), ("ADD A,B".to_string(), 1));
        assert_eq!(dis(&[0x9E]), ("SBC A,(HL)".to_string(), 1));
        assert_eq!(dis(&[0x7E]), ("LD A,(HL)".to_string(), 1));
        assert_eq!(dis(&[0x41]), ("LD B,C".to_string(), 1));
        assert_eq!(dis(&[0xFE, 0x10]), ("CP 0x10".to_string(), 2));
    }

    #[test]
    fn test_cb_prefix() {
        assert_eq!(dis(&[0xCB, 0x00]), ("RLC B".to_string(), 2));
        assert_eq!(dis(&[0xCB, 0x46]), ("BIT 0,(HL)".to_string(), 2));
        assert_eq!(dis(&[0xCB, 0xFF]), ("SET 7,A".to_string(), 2));
        // Undocumented SLL
        assert_eq!(dis(&[0xCB, 0x30]), ("SLL B".to_string(), 2));
    }

    #[test]
    fn test_ed_prefix() {
        assert_eq!(dis(&[0xED, 0x44]), ("NEG".to_string(), 2));
        assert_eq!(dis(&[0xED, 0x4D]), ("RETI".to_string(), 2));
        assert_eq!(dis(&[0xED, 0x45]), ("RETN".to_string(), 2));
        assert_eq!(dis(&[0xED, 0x56]), ("IM 1".to_string(), 2));
        assert_eq!(dis(&[0xED, 0xB0]), ("LDIR".to_string(), 2));
        assert_eq!(dis(&[0xED, 0xB9]), ("CPDR".to_string(), 2));
        assert_eq!(dis(&[0xED, 0x47]), ("LD I,A".to_string(), 2));
        assert_eq!(
            dis(&[0xED, 0x43, 0x00, 0xC0]),
            ("LD (0xC000),BC".to_string(), 4)
        );
    }

    #[test]
    fn test_index_prefix() {
        assert_eq!(
            dis(&[0xDD, 0x21, 0x00, 0x20]),
            ("LD IX,0x2000".to_string(), 4)
        );
        assert_eq!(dis(&[0xDD, 0x7E, 0x05]), ("LD A,(IX+5)".to_string(), 3));
        assert_eq!(dis(&[0xFD, 0x77, 0xFB]), ("LD (IY-5),A".to_string(), 3));
        assert_eq!(dis(&[0xDD, 0x23]), ("INC IX".to_string(), 2));
        assert_eq!(dis(&[0xDD, 0x24]), ("INC IXH".to_string(), 2));
        assert_eq!(dis(&[0xFD, 0x2E, 0x12]), ("LD IYL,0x12".to_string(), 3));
        assert_eq!(dis(&[0xDD, 0xE9]), ("JP (IX)".to_string(), 2));
        // Fall-through keeps the base mnemonic with the prefix length
        assert_eq!(dis(&[0xDD, 0x04]), ("INC B".to_string(), 2));
    }

    #[test]
    fn test_index_cb() {
        assert_eq!(
            dis(&[0xDD, 0xCB, 0x02, 0x06]),
            ("RLC (IX+2)".to_string(), 4)
        );
        // Dual-sink undocumented form
        assert_eq!(
            dis(&[0xDD, 0xCB, 0x02, 0x01]),
            ("RLC (IX+2),C".to_string(), 4)
        );
        assert_eq!(
            dis(&[0xFD, 0xCB, 0xFE, 0x46]),
            ("BIT 0,(IY-2)".to_string(), 4)
        );
        assert_eq!(
            dis(&[0xDD, 0xCB, 0x01, 0xC7]),
            ("SET 0,(IX+1),A".to_string(), 4)
        );
    }

    #[test]
    fn test_detailed() {
        let r = disassemble_detailed(&[0xDD, 0x7E, 0x05, 0x00]);
        assert_eq!(r.bytes, "DD 7E 05");
        assert_eq!(r.mnemonic, "LD A,(IX+5)");
        assert_eq!(r.length, 3);
    }
}
