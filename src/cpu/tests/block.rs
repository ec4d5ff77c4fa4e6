//! Block instruction tests
//!
//! The repeating forms rewind PC by two while their condition holds, so
//! one iteration runs per step at 21 T-states and the final one at 16.
//! That per-iteration boundary is what makes a long LDIR interruptible.

use super::*;

#[test]
fn test_ldi_moves_one_byte() {
    let (mut cpu, mut bus) = setup(&[0xED, 0xA0]); // LDI
    cpu.hl = 0x2000;
    cpu.de = 0x3000;
    cpu.bc = 2;
    bus.mem[0x2000] = 0x7E;

    assert_eq!(cpu.step(&mut bus), 16);
    assert_eq!(bus.mem[0x3000], 0x7E);
    assert_eq!(cpu.hl, 0x2001);
    assert_eq!(cpu.de, 0x3001);
    assert_eq!(cpu.bc, 1);
    assert!(cpu.flag_pv()); // BC nonzero
    assert!(!cpu.flag_h());
    assert!(!cpu.flag_n());
    assert_eq!(cpu.pc, 2);
}

#[test]
fn test_ldd_moves_backwards() {
    let (mut cpu, mut bus) = setup(&[0xED, 0xA8]); // LDD
    cpu.hl = 0x2001;
    cpu.de = 0x3001;
    cpu.bc = 1;
    bus.mem[0x2001] = 0x11;

    cpu.step(&mut bus);
    assert_eq!(bus.mem[0x3001], 0x11);
    assert_eq!(cpu.hl, 0x2000);
    assert_eq!(cpu.de, 0x3000);
    assert_eq!(cpu.bc, 0);
    assert!(!cpu.flag_pv()); // BC exhausted
}

#[test]
fn test_ldi_xy_flags_from_value_plus_a() {
    let (mut cpu, mut bus) = setup(&[0xED, 0xA0]);
    cpu.a = 0x02;
    cpu.hl = 0x2000;
    cpu.de = 0x3000;
    cpu.bc = 1;
    bus.mem[0x2000] = 0x08; // n = 0x0A: bit 3 set, bit 1 set
    cpu.f = 0;
    cpu.step(&mut bus);
    // F3 from bit 3 of n, F5 from bit 1 of n
    assert_flags(&cpu, flags::F5 | flags::F3, "LDI");
}

#[test]
fn test_ldir_iterates_with_pc_rewind() {
    // The full three-byte copy of the end-to-end contract
    let (mut cpu, mut bus) = setup(&[0xED, 0xB0]); // LDIR
    cpu.hl = 0x2000;
    cpu.de = 0x3000;
    cpu.bc = 3;
    bus.load(0x2000, &[0x11, 0x22, 0x33, 0x44]);

    // First two iterations rewind PC and cost 21 each
    assert_eq!(cpu.step(&mut bus), 21);
    assert_eq!(cpu.pc, 0);
    assert_eq!(cpu.bc, 2);
    assert_eq!(cpu.step(&mut bus), 21);
    assert_eq!(cpu.pc, 0);

    // Final iteration falls through at 16
    assert_eq!(cpu.step(&mut bus), 16);
    assert_eq!(cpu.pc, 2);
    assert_eq!(cpu.bc, 0);
    assert_eq!(cpu.hl, 0x2003);
    assert_eq!(cpu.de, 0x3003);
    assert_eq!(&bus.mem[0x3000..0x3003], &[0x11, 0x22, 0x33]);
    assert_eq!(cpu.cycles, 58);
}

#[test]
fn test_ldir_interruptible_between_iterations() {
    let (mut cpu, mut bus) = setup(&[0xED, 0xB0]);
    cpu.im = InterruptMode::Mode1;
    cpu.iff1 = true;
    cpu.sp = 0x8000;
    cpu.hl = 0x2000;
    cpu.de = 0x3000;
    cpu.bc = 3;
    bus.load(0x2000, &[0xAA, 0xBB, 0xCC]);

    cpu.step(&mut bus); // one iteration, PC rewound
    cpu.raise_int(0xFF);
    cpu.step(&mut bus); // interrupt accepted between iterations
    assert_eq!(cpu.pc, 0x0038);
    assert_eq!(cpu.bc, 2); // progress survives
    assert_eq!(bus.mem[0x7FFE], 0x00); // return address is the LDIR itself
    assert_eq!(bus.mem[0x7FFF], 0x00);

    // Returning resumes the copy where it left off
    bus.load(0x0038, &[0xC9]); // RET
    cpu.step(&mut bus);
    assert_eq!(cpu.pc, 0);
    cpu.step(&mut bus);
    cpu.step(&mut bus);
    assert_eq!(cpu.bc, 0);
    assert_eq!(&bus.mem[0x3000..0x3003], &[0xAA, 0xBB, 0xCC]);
}

#[test]
fn test_cpi_flags() {
    let (mut cpu, mut bus) = setup(&[0xED, 0xA1]); // CPI
    cpu.a = 0x10;
    cpu.hl = 0x2000;
    cpu.bc = 2;
    bus.mem[0x2000] = 0x10;

    assert_eq!(cpu.step(&mut bus), 16);
    assert!(cpu.flag_z()); // match
    assert!(cpu.flag_n());
    assert!(cpu.flag_pv()); // BC nonzero
    assert_eq!(cpu.hl, 0x2001);
    assert_eq!(cpu.bc, 1);
}

#[test]
fn test_cpir_stops_on_match() {
    let (mut cpu, mut bus) = setup(&[0xED, 0xB1]); // CPIR
    cpu.a = 0x33;
    cpu.hl = 0x2000;
    cpu.bc = 10;
    bus.load(0x2000, &[0x11, 0x22, 0x33, 0x44]);

    assert_eq!(cpu.step(&mut bus), 21);
    assert_eq!(cpu.step(&mut bus), 21);
    // Third byte matches: iteration completes without rewind
    assert_eq!(cpu.step(&mut bus), 16);
    assert_eq!(cpu.pc, 2);
    assert!(cpu.flag_z());
    assert_eq!(cpu.hl, 0x2003);
    assert_eq!(cpu.bc, 7);
}

#[test]
fn test_cpdr_exhausts_bc() {
    let (mut cpu, mut bus) = setup(&[0xED, 0xB9]); // CPDR
    cpu.a = 0xEE; // never matches
    cpu.hl = 0x2001;
    cpu.bc = 2;
    bus.load(0x2000, &[0x01, 0x02]);

    assert_eq!(cpu.step(&mut bus), 21);
    assert_eq!(cpu.step(&mut bus), 16);
    assert_eq!(cpu.bc, 0);
    assert_eq!(cpu.hl, 0x1FFF);
    assert!(!cpu.flag_pv());
}

#[test]
fn test_ini_writes_and_counts_b() {
    let (mut cpu, mut bus) = setup(&[0xED, 0xA2]); // INI
    cpu.bc = 0x0207; // B=2, C=7
    cpu.hl = 0x2000;
    bus.in_value = 0x5A;

    assert_eq!(cpu.step(&mut bus), 16);
    assert_eq!(bus.mem[0x2000], 0x5A);
    assert_eq!(cpu.b(), 1);
    assert_eq!(cpu.hl, 0x2001);
    assert_eq!(bus.in_log, vec![0x0207]); // port was full BC before dec
}

#[test]
fn test_otir_repeats_until_b_zero() {
    let (mut cpu, mut bus) = setup(&[0xED, 0xB3]); // OTIR
    cpu.bc = 0x0340; // B=3, C=0x40
    cpu.hl = 0x2000;
    bus.load(0x2000, &[0x10, 0x20, 0x30]);

    assert_eq!(cpu.step(&mut bus), 21);
    assert_eq!(cpu.pc, 0);
    assert_eq!(cpu.step(&mut bus), 21);
    assert_eq!(cpu.step(&mut bus), 16);
    assert_eq!(cpu.pc, 2);
    assert_eq!(cpu.b(), 0);
    assert!(cpu.flag_z());
    // B is decremented before the port write
    assert_eq!(
        bus.out_log,
        vec![(0x0240, 0x10), (0x0140, 0x20), (0x0040, 0x30)]
    );
}

#[test]
fn test_indr_counts_down() {
    let (mut cpu, mut bus) = setup(&[0xED, 0xBA]); // INDR
    cpu.bc = 0x0210;
    cpu.hl = 0x2001;
    bus.in_value = 0x77;

    assert_eq!(cpu.step(&mut bus), 21);
    assert_eq!(cpu.step(&mut bus), 16);
    assert_eq!(bus.mem[0x2001], 0x77);
    assert_eq!(bus.mem[0x2000], 0x77);
    assert_eq!(cpu.b(), 0);
}
