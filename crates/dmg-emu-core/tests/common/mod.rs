#![allow(dead_code)]

use dmg_emu_core::cpu::Cpu;
use dmg_emu_core::mmu::Mmu;

/// Where hand-assembled snippets are placed. WRAM, since ROM ignores writes.
pub const CODE: u16 = 0xC000;

/// A CPU in post-boot state with PC at `CODE` and `code` copied there.
pub fn machine(code: &[u8]) -> (Cpu, Mmu) {
    let mut mmu = Mmu::new();
    poke(&mut mmu, CODE, code);
    let mut cpu = Cpu::new();
    cpu.regs.pc = CODE;
    (cpu, mmu)
}

pub fn poke(mmu: &mut Mmu, addr: u16, bytes: &[u8]) {
    for (i, b) in bytes.iter().enumerate() {
        mmu.write_byte(addr.wrapping_add(i as u16), *b);
    }
}

/// A 32 KiB ROM image with `code` at the 0x0100 entry point.
pub fn rom_with_entry(code: &[u8]) -> Vec<u8> {
    let mut rom = vec![0u8; 0x8000];
    rom[0x0100..0x0100 + code.len()].copy_from_slice(code);
    rom
}
