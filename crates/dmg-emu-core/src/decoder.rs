use std::fmt;
use std::sync::OnceLock;

use crate::mmu::Mmu;
use crate::registers::{R8, R16};

pub const PREFIX_CB: u8 = 0xCB;

/// Operation kind of a decoded instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    Nop,
    Ld,
    Inc,
    Dec,
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,
    Jp,
    Jr,
    Call,
    Ret,
    Reti,
    Rst,
    Push,
    Pop,
    Rlca,
    Rrca,
    Rla,
    Rra,
    Daa,
    Cpl,
    Scf,
    Ccf,
    Halt,
    Stop,
    Di,
    Ei,
    /// The bare 0xCB byte. `decode` resolves past it to the extended table.
    Prefix,
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Swap,
    Srl,
    Bit,
    Res,
    Set,
}

impl Mnemonic {
    pub fn name(self) -> &'static str {
        match self {
            Mnemonic::Nop => "NOP",
            Mnemonic::Ld => "LD",
            Mnemonic::Inc => "INC",
            Mnemonic::Dec => "DEC",
            Mnemonic::Add => "ADD",
            Mnemonic::Adc => "ADC",
            Mnemonic::Sub => "SUB",
            Mnemonic::Sbc => "SBC",
            Mnemonic::And => "AND",
            Mnemonic::Xor => "XOR",
            Mnemonic::Or => "OR",
            Mnemonic::Cp => "CP",
            Mnemonic::Jp => "JP",
            Mnemonic::Jr => "JR",
            Mnemonic::Call => "CALL",
            Mnemonic::Ret => "RET",
            Mnemonic::Reti => "RETI",
            Mnemonic::Rst => "RST",
            Mnemonic::Push => "PUSH",
            Mnemonic::Pop => "POP",
            Mnemonic::Rlca => "RLCA",
            Mnemonic::Rrca => "RRCA",
            Mnemonic::Rla => "RLA",
            Mnemonic::Rra => "RRA",
            Mnemonic::Daa => "DAA",
            Mnemonic::Cpl => "CPL",
            Mnemonic::Scf => "SCF",
            Mnemonic::Ccf => "CCF",
            Mnemonic::Halt => "HALT",
            Mnemonic::Stop => "STOP",
            Mnemonic::Di => "DI",
            Mnemonic::Ei => "EI",
            Mnemonic::Prefix => "PREFIX",
            Mnemonic::Rlc => "RLC",
            Mnemonic::Rrc => "RRC",
            Mnemonic::Rl => "RL",
            Mnemonic::Rr => "RR",
            Mnemonic::Sla => "SLA",
            Mnemonic::Sra => "SRA",
            Mnemonic::Swap => "SWAP",
            Mnemonic::Srl => "SRL",
            Mnemonic::Bit => "BIT",
            Mnemonic::Res => "RES",
            Mnemonic::Set => "SET",
        }
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Branch condition for JP/JR/CALL/RET.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    NZ,
    Z,
    NC,
    C,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Condition::NZ => "NZ",
            Condition::Z => "Z",
            Condition::NC => "NC",
            Condition::C => "C",
        };
        f.write_str(name)
    }
}

/// Register-pair adjustment applied after an indirect access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostOp {
    None,
    Increment,
    Decrement,
}

/// Addressing mode of one instruction operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    Register(R8),
    RegisterPair(R16),
    /// n8 following the opcode.
    Immediate8,
    /// n16 following the opcode, little-endian.
    Immediate16,
    /// e8 displacement relative to the next instruction (JR).
    RelativeImmediate8,
    /// e8 displacement added to SP (ADD SP,e8).
    SignedImmediate8,
    /// SP+e8 as a value (LD HL,SP+e8).
    StackOffset,
    /// Memory at the address held in a register pair.
    IndirectRegisterPair(R16, PostOp),
    /// Memory at the n16 following the opcode.
    IndirectImmediate16,
    /// Memory at 0xFF00+n8.
    IoPort8,
    /// Memory at 0xFF00+C.
    IoPortC,
    Condition(Condition),
    /// Bit index for BIT/RES/SET.
    Bit(u8),
    /// Fixed RST target.
    Vector(u8),
}

impl Operand {
    /// True for operands that are values in their own right, false for
    /// operands that dereference memory.
    pub fn is_immediate(&self) -> bool {
        !matches!(
            self,
            Operand::IndirectRegisterPair(..)
                | Operand::IndirectImmediate16
                | Operand::IoPort8
                | Operand::IoPortC
        )
    }

    /// Number of bytes the operand occupies after the opcode.
    pub fn encoded_len(&self) -> u8 {
        match self {
            Operand::Immediate8
            | Operand::RelativeImmediate8
            | Operand::SignedImmediate8
            | Operand::StackOffset
            | Operand::IoPort8 => 1,
            Operand::Immediate16 | Operand::IndirectImmediate16 => 2,
            _ => 0,
        }
    }

    fn write_with(&self, f: &mut fmt::Formatter<'_>, imm: Option<(u16, u16)>) -> fmt::Result {
        // `imm` carries (instruction address, raw immediate) when rendering
        // concrete disassembly rather than the table form.
        match (self, imm) {
            (Operand::Register(r), _) => write!(f, "{r}"),
            (Operand::RegisterPair(rp), _) => write!(f, "{rp}"),
            (Operand::Immediate8, None) => f.write_str("n8"),
            (Operand::Immediate8, Some((_, v))) => write!(f, "${v:02X}"),
            (Operand::Immediate16, None) => f.write_str("n16"),
            (Operand::Immediate16, Some((_, v))) => write!(f, "${v:04X}"),
            (Operand::RelativeImmediate8, None) => f.write_str("e8"),
            (Operand::RelativeImmediate8, Some((addr, v))) => {
                let target = addr.wrapping_add(2).wrapping_add(v as u8 as i8 as u16);
                write!(f, "${target:04X}")
            }
            (Operand::SignedImmediate8, None) => f.write_str("e8"),
            (Operand::SignedImmediate8, Some((_, v))) => write!(f, "{}", v as u8 as i8),
            (Operand::StackOffset, None) => f.write_str("SP+e8"),
            (Operand::StackOffset, Some((_, v))) => write!(f, "SP{:+}", v as u8 as i8),
            (Operand::IndirectRegisterPair(rp, PostOp::None), _) => write!(f, "({rp})"),
            (Operand::IndirectRegisterPair(rp, PostOp::Increment), _) => write!(f, "({rp}+)"),
            (Operand::IndirectRegisterPair(rp, PostOp::Decrement), _) => write!(f, "({rp}-)"),
            (Operand::IndirectImmediate16, None) => f.write_str("(n16)"),
            (Operand::IndirectImmediate16, Some((_, v))) => write!(f, "(${v:04X})"),
            (Operand::IoPort8, None) => f.write_str("(FF00+n8)"),
            (Operand::IoPort8, Some((_, v))) => write!(f, "($FF00+${:02X})", v as u8),
            (Operand::IoPortC, _) => f.write_str("(FF00+C)"),
            (Operand::Condition(cc), _) => write!(f, "{cc}"),
            (Operand::Bit(b), _) => write!(f, "{b}"),
            (Operand::Vector(v), _) => write!(f, "${v:02X}"),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_with(f, None)
    }
}

/// Cycle cost in clock cycles (4 per M-cycle).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cycles {
    Fixed(u32),
    /// Conditional control flow: cost when the condition fails, and when
    /// the branch is taken.
    Branch { untaken: u32, taken: u32 },
}

impl Cycles {
    pub fn untaken(self) -> u32 {
        match self {
            Cycles::Fixed(c) => c,
            Cycles::Branch { untaken, .. } => untaken,
        }
    }

    pub fn taken(self) -> u32 {
        match self {
            Cycles::Fixed(c) => c,
            Cycles::Branch { taken, .. } => taken,
        }
    }
}

const MAX_OPERANDS: usize = 2;

/// Immutable description of one opcode slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstructionDescriptor {
    pub opcode: u8,
    pub prefixed: bool,
    pub mnemonic: Mnemonic,
    operands: [Operand; MAX_OPERANDS],
    operand_count: u8,
    /// Encoded length in bytes, including the prefix for CB opcodes.
    pub length: u8,
    pub cycles: Cycles,
}

impl InstructionDescriptor {
    fn new(
        opcode: u8,
        prefixed: bool,
        mnemonic: Mnemonic,
        ops: &[Operand],
        length: u8,
        cycles: Cycles,
    ) -> Self {
        debug_assert!(ops.len() <= MAX_OPERANDS);
        let mut operands = [Operand::Immediate8; MAX_OPERANDS];
        operands[..ops.len()].copy_from_slice(ops);
        Self {
            opcode,
            prefixed,
            mnemonic,
            operands,
            operand_count: ops.len() as u8,
            length,
            cycles,
        }
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands[..self.operand_count as usize]
    }

    fn write_with(&self, f: &mut fmt::Formatter<'_>, imm: Option<(u16, u16)>) -> fmt::Result {
        f.write_str(self.mnemonic.name())?;
        for (i, op) in self.operands().iter().enumerate() {
            f.write_str(if i == 0 { " " } else { "," })?;
            op.write_with(f, imm)?;
        }
        Ok(())
    }

    /// Render with concrete operand values read from `mmu` at `addr`.
    pub fn disassemble(&self, mmu: &Mmu, addr: u16) -> String {
        struct Concrete<'a> {
            desc: &'a InstructionDescriptor,
            addr: u16,
            imm: u16,
        }
        impl fmt::Display for Concrete<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.desc.write_with(f, Some((self.addr, self.imm)))
            }
        }

        let base = addr.wrapping_add(if self.prefixed { 2 } else { 1 });
        let imm = match self.operands().iter().map(Operand::encoded_len).max() {
            Some(2) => mmu.read_word(base),
            Some(1) => mmu.read_byte(base) as u16,
            _ => 0,
        };
        Concrete {
            desc: self,
            addr,
            imm,
        }
        .to_string()
    }
}

impl fmt::Display for InstructionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_with(f, None)
    }
}

static UNPREFIXED: OnceLock<[Option<InstructionDescriptor>; 256]> = OnceLock::new();
static PREFIXED: OnceLock<[InstructionDescriptor; 256]> = OnceLock::new();

/// The 256 unprefixed opcode slots. Undefined opcodes are `None`.
pub fn unprefixed_table() -> &'static [Option<InstructionDescriptor>; 256] {
    UNPREFIXED.get_or_init(|| std::array::from_fn(|op| describe_unprefixed(op as u8)))
}

/// The 256 CB-prefixed opcode slots, all defined.
pub fn prefixed_table() -> &'static [InstructionDescriptor; 256] {
    PREFIXED.get_or_init(|| std::array::from_fn(|op| describe_prefixed(op as u8)))
}

/// Resolve an opcode to its descriptor.
///
/// `peek_second` is only invoked for the 0xCB prefix and must return the
/// byte following it without advancing PC.
pub fn decode(
    first: u8,
    peek_second: impl FnOnce() -> u8,
) -> Option<&'static InstructionDescriptor> {
    if first == PREFIX_CB {
        Some(&prefixed_table()[peek_second() as usize])
    } else {
        unprefixed_table()[first as usize].as_ref()
    }
}

/// Disassemble the instruction at `addr`, returning its text and length.
pub fn disassemble(mmu: &Mmu, addr: u16) -> (String, u8) {
    let op = mmu.read_byte(addr);
    match decode(op, || mmu.read_byte(addr.wrapping_add(1))) {
        Some(desc) => (desc.disassemble(mmu, addr), desc.length),
        None => (format!("DB ${op:02X}"), 1),
    }
}

const HL_IND: Operand = Operand::IndirectRegisterPair(R16::HL, PostOp::None);
const A: Operand = Operand::Register(R8::A);

fn r(idx: u8) -> Operand {
    match idx {
        0 => Operand::Register(R8::B),
        1 => Operand::Register(R8::C),
        2 => Operand::Register(R8::D),
        3 => Operand::Register(R8::E),
        4 => Operand::Register(R8::H),
        5 => Operand::Register(R8::L),
        6 => HL_IND,
        _ => A,
    }
}

fn rp(idx: u8) -> Operand {
    Operand::RegisterPair(match idx {
        0 => R16::BC,
        1 => R16::DE,
        2 => R16::HL,
        _ => R16::SP,
    })
}

fn rp2(idx: u8) -> Operand {
    Operand::RegisterPair(match idx {
        0 => R16::BC,
        1 => R16::DE,
        2 => R16::HL,
        _ => R16::AF,
    })
}

fn cc(idx: u8) -> Operand {
    Operand::Condition(match idx & 0x03 {
        0 => Condition::NZ,
        1 => Condition::Z,
        2 => Condition::NC,
        _ => Condition::C,
    })
}

fn alu(idx: u8) -> Mnemonic {
    match idx {
        0 => Mnemonic::Add,
        1 => Mnemonic::Adc,
        2 => Mnemonic::Sub,
        3 => Mnemonic::Sbc,
        4 => Mnemonic::And,
        5 => Mnemonic::Xor,
        6 => Mnemonic::Or,
        _ => Mnemonic::Cp,
    }
}

fn rot(idx: u8) -> Mnemonic {
    match idx {
        0 => Mnemonic::Rlc,
        1 => Mnemonic::Rrc,
        2 => Mnemonic::Rl,
        3 => Mnemonic::Rr,
        4 => Mnemonic::Sla,
        5 => Mnemonic::Sra,
        6 => Mnemonic::Swap,
        _ => Mnemonic::Srl,
    }
}

fn describe_unprefixed(op: u8) -> Option<InstructionDescriptor> {
    use Cycles::{Branch, Fixed};
    use Mnemonic as M;
    use Operand as O;

    let x = op >> 6;
    let y = (op >> 3) & 0x07;
    let z = op & 0x07;
    let p = y >> 1;
    let q = y & 0x01;

    let d = |m: Mnemonic, ops: &[Operand], len: u8, cycles: Cycles| {
        Some(InstructionDescriptor::new(op, false, m, ops, len, cycles))
    };
    // (HL) operands cost one extra memory access.
    let mem_cost = |operand: Operand, reg: u32, mem: u32| {
        if operand == HL_IND { mem } else { reg }
    };

    match x {
        0 => match z {
            0 => match y {
                0 => d(M::Nop, &[], 1, Fixed(4)),
                1 => d(M::Ld, &[O::IndirectImmediate16, rp(3)], 3, Fixed(20)),
                2 => d(M::Stop, &[], 2, Fixed(4)),
                3 => d(M::Jr, &[O::RelativeImmediate8], 2, Fixed(12)),
                _ => d(
                    M::Jr,
                    &[cc(y - 4), O::RelativeImmediate8],
                    2,
                    Branch {
                        untaken: 8,
                        taken: 12,
                    },
                ),
            },
            1 if q == 0 => d(M::Ld, &[rp(p), O::Immediate16], 3, Fixed(12)),
            1 => d(M::Add, &[rp(2), rp(p)], 1, Fixed(8)),
            2 => {
                let mem = match p {
                    0 => O::IndirectRegisterPair(R16::BC, PostOp::None),
                    1 => O::IndirectRegisterPair(R16::DE, PostOp::None),
                    2 => O::IndirectRegisterPair(R16::HL, PostOp::Increment),
                    _ => O::IndirectRegisterPair(R16::HL, PostOp::Decrement),
                };
                if q == 0 {
                    d(M::Ld, &[mem, A], 1, Fixed(8))
                } else {
                    d(M::Ld, &[A, mem], 1, Fixed(8))
                }
            }
            3 if q == 0 => d(M::Inc, &[rp(p)], 1, Fixed(8)),
            3 => d(M::Dec, &[rp(p)], 1, Fixed(8)),
            4 => d(M::Inc, &[r(y)], 1, Fixed(mem_cost(r(y), 4, 12))),
            5 => d(M::Dec, &[r(y)], 1, Fixed(mem_cost(r(y), 4, 12))),
            6 => d(M::Ld, &[r(y), O::Immediate8], 2, Fixed(mem_cost(r(y), 8, 12))),
            _ => {
                let m = match y {
                    0 => M::Rlca,
                    1 => M::Rrca,
                    2 => M::Rla,
                    3 => M::Rra,
                    4 => M::Daa,
                    5 => M::Cpl,
                    6 => M::Scf,
                    _ => M::Ccf,
                };
                d(m, &[], 1, Fixed(4))
            }
        },
        1 if y == 6 && z == 6 => d(M::Halt, &[], 1, Fixed(4)),
        1 => {
            let cost = if r(y) == HL_IND || r(z) == HL_IND { 8 } else { 4 };
            d(M::Ld, &[r(y), r(z)], 1, Fixed(cost))
        }
        2 => d(alu(y), &[A, r(z)], 1, Fixed(mem_cost(r(z), 4, 8))),
        _ => match z {
            0 => match y {
                0..=3 => d(
                    M::Ret,
                    &[cc(y)],
                    1,
                    Branch {
                        untaken: 8,
                        taken: 20,
                    },
                ),
                4 => d(M::Ld, &[O::IoPort8, A], 2, Fixed(12)),
                5 => d(M::Add, &[rp(3), O::SignedImmediate8], 2, Fixed(16)),
                6 => d(M::Ld, &[A, O::IoPort8], 2, Fixed(12)),
                _ => d(M::Ld, &[rp(2), O::StackOffset], 2, Fixed(12)),
            },
            1 if q == 0 => d(M::Pop, &[rp2(p)], 1, Fixed(12)),
            1 => match p {
                0 => d(M::Ret, &[], 1, Fixed(16)),
                1 => d(M::Reti, &[], 1, Fixed(16)),
                2 => d(M::Jp, &[rp(2)], 1, Fixed(4)),
                _ => d(M::Ld, &[rp(3), rp(2)], 1, Fixed(8)),
            },
            2 => match y {
                0..=3 => d(
                    M::Jp,
                    &[cc(y), O::Immediate16],
                    3,
                    Branch {
                        untaken: 12,
                        taken: 16,
                    },
                ),
                4 => d(M::Ld, &[O::IoPortC, A], 1, Fixed(8)),
                5 => d(M::Ld, &[O::IndirectImmediate16, A], 3, Fixed(16)),
                6 => d(M::Ld, &[A, O::IoPortC], 1, Fixed(8)),
                _ => d(M::Ld, &[A, O::IndirectImmediate16], 3, Fixed(16)),
            },
            3 => match y {
                0 => d(M::Jp, &[O::Immediate16], 3, Fixed(16)),
                1 => d(M::Prefix, &[], 1, Fixed(4)),
                6 => d(M::Di, &[], 1, Fixed(4)),
                7 => d(M::Ei, &[], 1, Fixed(4)),
                _ => None,
            },
            4 => match y {
                0..=3 => d(
                    M::Call,
                    &[cc(y), O::Immediate16],
                    3,
                    Branch {
                        untaken: 12,
                        taken: 24,
                    },
                ),
                _ => None,
            },
            5 if q == 0 => d(M::Push, &[rp2(p)], 1, Fixed(16)),
            5 if p == 0 => d(M::Call, &[O::Immediate16], 3, Fixed(24)),
            5 => None,
            6 => d(alu(y), &[A, O::Immediate8], 2, Fixed(8)),
            _ => d(M::Rst, &[O::Vector(y * 8)], 1, Fixed(16)),
        },
    }
}

fn describe_prefixed(op: u8) -> InstructionDescriptor {
    let x = op >> 6;
    let y = (op >> 3) & 0x07;
    let target = r(op & 0x07);
    let on_hl = target == HL_IND;

    let (mnemonic, cycles) = match x {
        0 => (rot(y), if on_hl { 16 } else { 8 }),
        // BIT only reads its operand.
        1 => (Mnemonic::Bit, if on_hl { 12 } else { 8 }),
        2 => (Mnemonic::Res, if on_hl { 16 } else { 8 }),
        _ => (Mnemonic::Set, if on_hl { 16 } else { 8 }),
    };
    let ops: &[Operand] = if x == 0 {
        &[target]
    } else {
        &[Operand::Bit(y), target]
    };
    InstructionDescriptor::new(op, true, mnemonic, ops, 2, Cycles::Fixed(cycles))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_eleven_undefined_slots() {
        let undefined: Vec<u8> = unprefixed_table()
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_none())
            .map(|(op, _)| op as u8)
            .collect();
        assert_eq!(
            undefined,
            vec![0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD]
        );
    }

    #[test]
    fn lengths_match_operand_encoding() {
        for desc in unprefixed_table().iter().flatten() {
            if matches!(desc.mnemonic, Mnemonic::Stop) {
                assert_eq!(desc.length, 2);
                continue;
            }
            let operand_bytes: u8 = desc.operands().iter().map(Operand::encoded_len).sum();
            assert_eq!(
                desc.length,
                1 + operand_bytes,
                "length mismatch for {desc} ({:02X})",
                desc.opcode
            );
        }
        assert!(prefixed_table().iter().all(|d| d.length == 2));
    }

    #[test]
    fn only_conditional_control_flow_has_two_costs() {
        for desc in unprefixed_table().iter().flatten() {
            let conditional = desc
                .operands()
                .iter()
                .any(|o| matches!(o, Operand::Condition(_)));
            assert_eq!(
                matches!(desc.cycles, Cycles::Branch { .. }),
                conditional,
                "{desc}"
            );
        }
    }

    #[test]
    fn prefix_second_byte_is_peeked_only_for_cb() {
        let mut peeked = false;
        let desc = decode(0x80, || {
            peeked = true;
            0
        });
        assert_eq!(desc.map(|d| d.mnemonic), Some(Mnemonic::Add));
        assert!(!peeked);

        assert_eq!(decode(0xCB, || 0x5A).map(|d| d.mnemonic), Some(Mnemonic::Bit));
        assert_eq!(decode(0xCB, || 0xCB).map(|d| d.mnemonic), Some(Mnemonic::Set));
    }

    #[test]
    fn table_form_rendering() {
        let t = unprefixed_table();
        let show = |op: usize| t[op].map(|d| d.to_string()).unwrap_or_default();
        assert_eq!(show(0x22), "LD (HL+),A");
        assert_eq!(show(0x3A), "LD A,(HL-)");
        assert_eq!(show(0x20), "JR NZ,e8");
        assert_eq!(show(0xE0), "LD (FF00+n8),A");
        assert_eq!(show(0xF8), "LD HL,SP+e8");
        assert_eq!(show(0xFF), "RST $38");
        assert_eq!(prefixed_table()[0x5A].to_string(), "BIT 3,D");
        assert_eq!(prefixed_table()[0x36].to_string(), "SWAP (HL)");
    }

    #[test]
    fn immediate_flag_separates_memory_operands() {
        assert!(Operand::Register(R8::B).is_immediate());
        assert!(Operand::Immediate16.is_immediate());
        assert!(!HL_IND.is_immediate());
        assert!(!Operand::IoPortC.is_immediate());
        assert!(!Operand::IndirectImmediate16.is_immediate());
    }
}
