//! Instruction semantics driven through `Cpu::step` on hand-assembled code.

mod common;

use common::{CODE, machine, poke};
use dmg_emu_core::decoder::{Mnemonic, decode};
use dmg_emu_core::registers::{FLAG_C, FLAG_H, FLAG_N, FLAG_Z, R16};

fn flags(z: bool, n: bool, h: bool, c: bool) -> u8 {
    (if z { FLAG_Z } else { 0 })
        | (if n { FLAG_N } else { 0 })
        | (if h { FLAG_H } else { 0 })
        | (if c { FLAG_C } else { 0 })
}

/// Run one ALU opcode with register B as the operand for every (A, B) pair
/// and compare A and F against `reference`.
fn alu_grid(opcode: u8, carry_in: bool, reference: impl Fn(u8, u8, bool) -> (u8, u8)) {
    let (mut cpu, mut mmu) = machine(&[opcode]);
    for a in 0..=255u8 {
        for b in 0..=255u8 {
            cpu.regs.pc = CODE;
            cpu.regs.a = a;
            cpu.regs.b = b;
            cpu.regs.f = if carry_in { FLAG_C } else { 0 };
            assert_eq!(cpu.step(&mut mmu), Ok(4));
            let (res, f) = reference(a, b, carry_in);
            assert_eq!(
                (cpu.regs.a, cpu.regs.f),
                (res, f),
                "opcode {opcode:02X} a={a:02X} b={b:02X} carry={carry_in}"
            );
        }
    }
}

fn ref_add(a: u8, b: u8, c: bool) -> (u8, u8) {
    let c = c as u32;
    let wide = a as u32 + b as u32 + c;
    let res = (wide & 0xFF) as u8;
    let half = (a as u32 & 0xF) + (b as u32 & 0xF) + c >= 0x10;
    (res, flags(res == 0, false, half, wide >= 0x100))
}

fn ref_sub(a: u8, b: u8, c: bool) -> (u8, u8) {
    let c = c as i32;
    let wide = a as i32 - b as i32 - c;
    let res = wide.rem_euclid(256) as u8;
    let half = (a as i32 & 0xF) - (b as i32 & 0xF) - c < 0;
    (res, flags(res == 0, true, half, wide < 0))
}

#[test]
fn add_matches_reference_for_all_pairs() {
    alu_grid(0x80, false, ref_add);
}

#[test]
fn adc_matches_reference_for_all_pairs() {
    alu_grid(0x88, false, ref_add);
    alu_grid(0x88, true, ref_add);
}

#[test]
fn sub_matches_reference_for_all_pairs() {
    alu_grid(0x90, false, ref_sub);
}

#[test]
fn sbc_matches_reference_for_all_pairs() {
    alu_grid(0x98, false, ref_sub);
    alu_grid(0x98, true, ref_sub);
}

#[test]
fn cp_sets_sub_flags_and_keeps_a() {
    alu_grid(0xB8, false, |a, b, c| (a, ref_sub(a, b, c).1));
}

#[test]
fn logical_ops_fix_h_and_c() {
    alu_grid(0xA0, true, |a, b, _| (a & b, flags(a & b == 0, false, true, false)));
    alu_grid(0xA8, true, |a, b, _| (a ^ b, flags(a ^ b == 0, false, false, false)));
    alu_grid(0xB0, true, |a, b, _| (a | b, flags(a | b == 0, false, false, false)));
}

#[test]
fn add_a_b_scenario() {
    let (mut cpu, mut mmu) = machine(&[0x80]);
    cpu.regs.a = 0x3A;
    cpu.regs.b = 0xC6;
    let before = cpu.cycles;
    assert_eq!(cpu.step(&mut mmu), Ok(4));
    assert_eq!(cpu.regs.a, 0x00);
    assert!(cpu.regs.zero() && !cpu.regs.subtract() && cpu.regs.half_carry() && cpu.regs.carry());
    assert_eq!(cpu.regs.pc, CODE + 1);
    assert_eq!(cpu.cycles - before, 4);
}

#[test]
fn add_hl_bc_scenario() {
    let (mut cpu, mut mmu) = machine(&[0x09]);
    cpu.regs.h = 0x06;
    cpu.regs.l = 0x05;
    cpu.regs.b = 0x8A;
    cpu.regs.c = 0x23;
    assert_eq!(cpu.step(&mut mmu), Ok(8));
    assert_eq!((cpu.regs.h, cpu.regs.l), (0x90, 0x28));
    assert!(!cpu.regs.subtract() && cpu.regs.half_carry() && !cpu.regs.carry());
}

#[test]
fn ld_hl_plus_a_scenario() {
    let (mut cpu, mut mmu) = machine(&[0x22]);
    cpu.regs.h = 0x8A;
    cpu.regs.l = 0x23;
    cpu.regs.a = 0x5A;
    assert_eq!(cpu.step(&mut mmu), Ok(8));
    assert_eq!(mmu.read_byte(0x8A23), 0x5A);
    assert_eq!((cpu.regs.h, cpu.regs.l), (0x8A, 0x24));
}

#[test]
fn cb_5a_decodes_to_bit() {
    let desc = decode(0xCB, || 0x5A).expect("CB 5A is defined");
    assert_eq!(desc.mnemonic, Mnemonic::Bit);
    assert_eq!(desc.to_string(), "BIT 3,D");
    let desc = decode(0xCB, || 0xCB).expect("CB CB is defined");
    assert_eq!(desc.mnemonic, Mnemonic::Set);
    assert_eq!(decode(0x40, || 0).map(|d| d.mnemonic), Some(Mnemonic::Ld));
}

#[test]
fn add_hl_never_touches_zero() {
    // ADD HL,DE with Z set and clear.
    for z in [false, true] {
        let (mut cpu, mut mmu) = machine(&[0x19]);
        cpu.regs.set_hl(0xFFFF);
        cpu.regs.set_de(0x0001);
        cpu.regs.f = if z { FLAG_Z } else { 0 };
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.regs.hl(), 0x0000);
        assert_eq!(cpu.regs.zero(), z);
        assert!(cpu.regs.carry() && cpu.regs.half_carry());
    }
}

#[test]
fn inc_dec_8bit_preserve_carry() {
    for carry in [false, true] {
        // INC B, DEC C, INC (HL), DEC A
        let (mut cpu, mut mmu) = machine(&[0x04, 0x0D, 0x34, 0x3D]);
        cpu.regs.set_hl(0xC100);
        mmu.write_byte(0xC100, 0xFF);
        cpu.regs.b = 0x0F;
        cpu.regs.c = 0x01;
        cpu.regs.a = 0x10;
        cpu.regs.f = if carry { FLAG_C } else { 0 };

        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.regs.b, 0x10);
        assert_eq!(cpu.regs.f, flags(false, false, true, carry));

        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.regs.c, 0x00);
        assert_eq!(cpu.regs.f, flags(true, true, false, carry));

        assert_eq!(cpu.step(&mut mmu), Ok(12));
        assert_eq!(mmu.read_byte(0xC100), 0x00);
        assert_eq!(cpu.regs.f, flags(true, false, true, carry));

        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.regs.a, 0x0F);
        assert_eq!(cpu.regs.f, flags(false, true, true, carry));
    }
}

#[test]
fn inc_dec_16bit_touch_no_flags() {
    // INC BC, DEC DE, INC HL, DEC SP
    let code = [0x03, 0x1B, 0x23, 0x3B];
    for f in [0x00, 0xF0, 0xA0] {
        let (mut cpu, mut mmu) = machine(&code);
        cpu.regs.set_bc(0xFFFF);
        cpu.regs.set_de(0x0000);
        cpu.regs.set_hl(0x00FF);
        cpu.regs.sp = 0x0000;
        cpu.regs.f = f;
        for _ in 0..code.len() {
            assert_eq!(cpu.step(&mut mmu), Ok(8));
            assert_eq!(cpu.regs.f, f);
        }
        assert_eq!(cpu.regs.bc(), 0x0000);
        assert_eq!(cpu.regs.de(), 0xFFFF);
        assert_eq!(cpu.regs.hl(), 0x0100);
        assert_eq!(cpu.regs.sp, 0xFFFF);
    }
}

#[test]
fn push_pop_round_trips_pairs() {
    // PUSH BC / POP DE, PUSH HL / POP BC
    let (mut cpu, mut mmu) = machine(&[0xC5, 0xD1, 0xE5, 0xC1]);
    cpu.regs.sp = 0xD000;
    cpu.regs.set_bc(0x1234);
    cpu.regs.set_hl(0xBEEF);
    assert_eq!(cpu.step(&mut mmu), Ok(16));
    assert_eq!(cpu.regs.sp, 0xCFFE);
    assert_eq!(mmu.read_byte(0xCFFF), 0x12);
    assert_eq!(mmu.read_byte(0xCFFE), 0x34);
    assert_eq!(cpu.step(&mut mmu), Ok(12));
    assert_eq!(cpu.regs.de(), 0x1234);
    cpu.step(&mut mmu).unwrap();
    cpu.step(&mut mmu).unwrap();
    assert_eq!(cpu.regs.bc(), 0xBEEF);
    assert_eq!(cpu.regs.sp, 0xD000);
}

#[test]
fn pop_af_clears_low_nibble() {
    // PUSH BC / POP AF
    let (mut cpu, mut mmu) = machine(&[0xC5, 0xF1]);
    cpu.regs.sp = 0xD000;
    cpu.regs.set_bc(0x12FF);
    cpu.step(&mut mmu).unwrap();
    cpu.step(&mut mmu).unwrap();
    assert_eq!(cpu.regs.get16(R16::AF), 0x12F0);
    assert_eq!(cpu.regs.f & 0x0F, 0);
}

#[test]
fn call_ret_restores_pc_and_sp() {
    // CALL $C010 ; ... ; $C010: RET
    let (mut cpu, mut mmu) = machine(&[0xCD, 0x10, 0xC0]);
    poke(&mut mmu, 0xC010, &[0xC9]);
    cpu.regs.sp = 0xDFF0;
    assert_eq!(cpu.step(&mut mmu), Ok(24));
    assert_eq!(cpu.regs.pc, 0xC010);
    assert_eq!(cpu.regs.sp, 0xDFEE);
    assert_eq!(mmu.read_word(0xDFEE), CODE + 3);
    assert_eq!(cpu.step(&mut mmu), Ok(16));
    assert_eq!(cpu.regs.pc, CODE + 3);
    assert_eq!(cpu.regs.sp, 0xDFF0);
}

#[test]
fn conditional_costs_follow_outcome() {
    // (code, F when untaken, F when taken, untaken cost, taken cost)
    let cases: [(&[u8], u8, u8, u32, u32); 3] = [
        (&[0xCA, 0x00, 0xC1], 0, FLAG_Z, 12, 16), // JP Z,$C100
        (&[0xDC, 0x00, 0xC1], 0, FLAG_C, 12, 24), // CALL C,$C100
        (&[0xC0], FLAG_Z, 0, 8, 20),              // RET NZ
    ];
    for (code, untaken_f, taken_f, untaken, taken) in cases {
        let (mut cpu, mut mmu) = machine(code);
        cpu.regs.sp = 0xD000;
        mmu.write_word(0xD000, 0xC200);

        cpu.regs.f = untaken_f;
        assert_eq!(cpu.step(&mut mmu), Ok(untaken), "{code:02X?} untaken");
        assert_eq!(cpu.regs.pc, CODE + code.len() as u16);

        cpu.regs.pc = CODE;
        cpu.regs.f = taken_f;
        assert_eq!(cpu.step(&mut mmu), Ok(taken), "{code:02X?} taken");
        assert_ne!(cpu.regs.pc, CODE + code.len() as u16);
    }
}

#[test]
fn rst_pushes_next_address() {
    let (mut cpu, mut mmu) = machine(&[0xEF]);
    cpu.regs.sp = 0xD000;
    assert_eq!(cpu.step(&mut mmu), Ok(16));
    assert_eq!(cpu.regs.pc, 0x0028);
    assert_eq!(mmu.read_word(0xCFFE), CODE + 1);
}

#[test]
fn add_sp_e8_uses_unsigned_byte_for_flags() {
    // ADD SP,-1 from 0x00FF: low byte 0xFF + 0xFF carries out of bits 3 and 7.
    let (mut cpu, mut mmu) = machine(&[0xE8, 0xFF]);
    cpu.regs.sp = 0x00FF;
    cpu.regs.f = FLAG_Z | FLAG_N;
    assert_eq!(cpu.step(&mut mmu), Ok(16));
    assert_eq!(cpu.regs.sp, 0x00FE);
    assert_eq!(cpu.regs.f, FLAG_H | FLAG_C);
}

#[test]
fn rotate_through_carry() {
    // SCF ; RLA ; RR B
    let (mut cpu, mut mmu) = machine(&[0x37, 0x17, 0xCB, 0x18]);
    cpu.regs.a = 0x80;
    cpu.regs.b = 0x01;
    cpu.step(&mut mmu).unwrap();
    cpu.step(&mut mmu).unwrap();
    assert_eq!(cpu.regs.a, 0x01);
    assert_eq!(cpu.regs.f, FLAG_C);
    cpu.step(&mut mmu).unwrap();
    assert_eq!(cpu.regs.b, 0x80);
    assert_eq!(cpu.regs.f, FLAG_C);
}

#[test]
fn swap_and_shifts_on_hl() {
    // SWAP (HL) ; SRA (HL) ; SRL (HL)
    let (mut cpu, mut mmu) = machine(&[0xCB, 0x36, 0xCB, 0x2E, 0xCB, 0x3E]);
    cpu.regs.set_hl(0xC100);
    mmu.write_byte(0xC100, 0x1F);
    assert_eq!(cpu.step(&mut mmu), Ok(16));
    assert_eq!(mmu.read_byte(0xC100), 0xF1);
    assert_eq!(cpu.regs.f, 0);
    cpu.step(&mut mmu).unwrap();
    assert_eq!(mmu.read_byte(0xC100), 0xF8);
    assert_eq!(cpu.regs.f, FLAG_C);
    cpu.step(&mut mmu).unwrap();
    assert_eq!(mmu.read_byte(0xC100), 0x7C);
    assert_eq!(cpu.regs.f, 0);
}

#[test]
fn bit_on_hl_costs_twelve() {
    // BIT 7,(HL) ; RES 0,(HL) ; SET 7,A
    let (mut cpu, mut mmu) = machine(&[0xCB, 0x7E, 0xCB, 0x86, 0xCB, 0xFF]);
    cpu.regs.set_hl(0xC100);
    mmu.write_byte(0xC100, 0x01);
    assert_eq!(cpu.step(&mut mmu), Ok(12));
    assert!(cpu.regs.zero());
    assert_eq!(cpu.step(&mut mmu), Ok(16));
    assert_eq!(mmu.read_byte(0xC100), 0x00);
    let f = cpu.regs.f;
    assert_eq!(cpu.step(&mut mmu), Ok(8));
    assert_eq!(cpu.regs.a & 0x80, 0x80);
    assert_eq!(cpu.regs.f, f);
}

#[test]
fn daa_after_bcd_subtract() {
    // 0x42 - 0x15 = 0x2D -> DAA -> 0x27
    let (mut cpu, mut mmu) = machine(&[0xD6, 0x15, 0x27]);
    cpu.regs.a = 0x42;
    cpu.step(&mut mmu).unwrap();
    cpu.step(&mut mmu).unwrap();
    assert_eq!(cpu.regs.a, 0x27);
    assert!(cpu.regs.subtract());
    assert!(!cpu.regs.half_carry());
    assert!(!cpu.regs.carry());
}

#[test]
fn io_loads_address_high_page() {
    // LDH ($80),A ; LD A,(C) ; LD ($C123),A ; LD SP,HL ; LD ($C200),SP
    let (mut cpu, mut mmu) = machine(&[
        0xE0, 0x80, 0xF2, 0xEA, 0x23, 0xC1, 0xF9, 0x08, 0x00, 0xC2,
    ]);
    cpu.regs.a = 0x77;
    cpu.regs.c = 0x80;
    cpu.regs.set_hl(0xABCD);
    assert_eq!(cpu.step(&mut mmu), Ok(12));
    assert_eq!(mmu.read_byte(0xFF80), 0x77);
    cpu.regs.a = 0;
    assert_eq!(cpu.step(&mut mmu), Ok(8));
    assert_eq!(cpu.regs.a, 0x77);
    assert_eq!(cpu.step(&mut mmu), Ok(16));
    assert_eq!(mmu.read_byte(0xC123), 0x77);
    assert_eq!(cpu.step(&mut mmu), Ok(8));
    assert_eq!(cpu.regs.sp, 0xABCD);
    assert_eq!(cpu.step(&mut mmu), Ok(20));
    assert_eq!(mmu.read_word(0xC200), 0xABCD);
    assert_eq!(cpu.regs.pc, CODE + 10);
}

#[test]
fn stop_consumes_two_bytes() {
    let (mut cpu, mut mmu) = machine(&[0x10, 0x00, 0x00]);
    assert_eq!(cpu.step(&mut mmu), Ok(4));
    assert_eq!(cpu.regs.pc, CODE + 2);
}
