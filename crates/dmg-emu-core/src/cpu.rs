use crate::decoder::{self, Condition, InstructionDescriptor, Mnemonic, Operand, PostOp};
use crate::error::CpuError;
use crate::interrupts::{Ime, InterruptController};
use crate::mmu::Mmu;
use crate::registers::{FLAG_C, FLAG_H, FLAG_N, FLAG_Z, R8, R16, Registers};

#[cfg(feature = "cpu-trace")]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {
        log::trace!(target: "dmg_emu_core::cpu", $($arg)*);
    };
}
#[cfg(not(feature = "cpu-trace"))]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {};
}

// Interrupt entry takes 5 M-cycles (gbdev.io/pandocs/Interrupts.html)
const INTERRUPT_DISPATCH_CYCLES: u32 = 20;
const HALT_IDLE_CYCLES: u32 = 4;

/// How a handler left control flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    /// Fall through to the next instruction.
    Continue,
    /// The handler wrote PC itself.
    Jumped,
    /// A conditional branch whose condition failed.
    NotTaken,
}

/// Addresses fixed at decode time and handed to every handler.
#[derive(Clone, Copy, Debug)]
struct Ctx {
    /// First operand byte, i.e. the address following the opcode.
    base: u16,
    /// Address of the following instruction.
    next_pc: u16,
}

/// Resolved 8-bit operand location.
#[derive(Clone, Copy, Debug)]
enum Loc {
    Reg(R8),
    Mem(u16),
}

pub struct Cpu {
    pub regs: Registers,
    pub interrupts: InterruptController,
    /// Running clock in cycles since reset.
    pub cycles: u64,
    pub halted: bool,
    halt_bug: bool,
    fault: Option<CpuError>,
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            regs: Registers::post_boot(),
            interrupts: InterruptController::new(),
            cycles: 0,
            halted: false,
            halt_bug: false,
            fault: None,
        }
    }

    /// Restore post-boot registers and clear the clock, IME, HALT state and
    /// any latched error.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// The error that stopped the engine, if any.
    pub fn fault(&self) -> Option<CpuError> {
        self.fault
    }

    /// Formatted CPU state string for debugging.
    pub fn debug_state(&self) -> String {
        format!(
            "AF:{:04X} BC:{:04X} DE:{:04X} HL:{:04X} PC:{:04X} SP:{:04X} CY:{}",
            self.regs.af(),
            self.regs.bc(),
            self.regs.de(),
            self.regs.hl(),
            self.regs.pc,
            self.regs.sp,
            self.cycles
        )
    }

    /// Execute one instruction, or dispatch one interrupt, or idle one
    /// M-cycle while halted. Returns the cycles consumed.
    pub fn step(&mut self, mmu: &mut Mmu) -> Result<u32, CpuError> {
        if let Some(err) = self.fault {
            return Err(err);
        }

        if let Some(cycles) = self.service_interrupts(mmu) {
            self.cycles += u64::from(cycles);
            return Ok(cycles);
        }

        let pc = self.regs.pc;
        let opcode = mmu.read_byte(pc);
        // After the HALT bug the opcode byte doubles as the first operand byte.
        let base = if std::mem::take(&mut self.halt_bug) {
            pc
        } else {
            pc.wrapping_add(1)
        };
        let Some(desc) = decoder::decode(opcode, || mmu.read_byte(base)) else {
            return Err(self.fail(CpuError::Decode {
                addr: pc,
                opcode,
                prefixed: false,
            }));
        };

        cpu_trace!(
            "{:04X}: {:<20} {}",
            pc,
            desc.disassemble(mmu, pc),
            self.debug_state()
        );
        self.execute(desc, mmu, pc, base)
    }

    /// Run `desc` as if it had been fetched at the current PC.
    pub fn execute_descriptor(
        &mut self,
        desc: &InstructionDescriptor,
        mmu: &mut Mmu,
    ) -> Result<u32, CpuError> {
        if let Some(err) = self.fault {
            return Err(err);
        }
        let pc = self.regs.pc;
        self.execute(desc, mmu, pc, pc.wrapping_add(1))
    }

    fn execute(
        &mut self,
        desc: &InstructionDescriptor,
        mmu: &mut Mmu,
        addr: u16,
        base: u16,
    ) -> Result<u32, CpuError> {
        let was_pending = self.interrupts.enable_pending();
        let ctx = Ctx {
            base,
            next_pc: base.wrapping_add(u16::from(desc.length) - 1),
        };

        let Some(flow) = self.dispatch(desc, mmu, ctx) else {
            return Err(self.fail(CpuError::UnimplementedOperation {
                addr,
                opcode: desc.opcode,
                mnemonic: desc.mnemonic,
            }));
        };

        if flow != Flow::Jumped {
            self.regs.pc = ctx.next_pc;
        }
        let cycles = match flow {
            Flow::NotTaken => desc.cycles.untaken(),
            Flow::Continue | Flow::Jumped => desc.cycles.taken(),
        };
        self.cycles += u64::from(cycles);
        self.interrupts.end_step(was_pending);
        Ok(cycles)
    }

    fn fail(&mut self, err: CpuError) -> CpuError {
        log::warn!("CPU stopped: {err} ({})", self.debug_state());
        self.fault = Some(err);
        err
    }

    fn service_interrupts(&mut self, mmu: &mut Mmu) -> Option<u32> {
        if self.halted {
            if InterruptController::pending(mmu) == 0 {
                return Some(HALT_IDLE_CYCLES);
            }
            self.halted = false;
        }

        let irq = self.interrupts.next_dispatch(mmu)?;
        self.interrupts.acknowledge(mmu, irq);
        self.push_stack(mmu, self.regs.pc);
        cpu_trace!("dispatch {:?} from {:04X}", irq, self.regs.pc);
        self.regs.pc = irq.vector();
        Some(INTERRUPT_DISPATCH_CYCLES)
    }

    fn dispatch(&mut self, desc: &InstructionDescriptor, mmu: &mut Mmu, ctx: Ctx) -> Option<Flow> {
        use Mnemonic as M;

        let ops = desc.operands();
        let m = desc.mnemonic;
        match m {
            M::Nop | M::Stop => {}
            M::Ld => self.ld(mmu, ops, ctx)?,
            M::Inc | M::Dec => self.inc_dec(mmu, m, *ops.first()?, ctx)?,
            M::Add => self.add(mmu, ops, ctx)?,
            M::Adc | M::Sub | M::Sbc | M::And | M::Xor | M::Or | M::Cp => {
                let val = self.source8(mmu, *ops.get(1)?, ctx)?;
                self.alu8(m, val)?;
            }
            M::Jp | M::Jr | M::Call | M::Ret | M::Reti | M::Rst => {
                return self.control_flow(mmu, m, ops, ctx);
            }
            M::Push => {
                let Operand::RegisterPair(rp) = *ops.first()? else {
                    return None;
                };
                self.push_stack(mmu, self.regs.get16(rp));
            }
            M::Pop => {
                let Operand::RegisterPair(rp) = *ops.first()? else {
                    return None;
                };
                let val = self.pop_stack(mmu);
                self.regs.set16(rp, val);
            }
            M::Rlca | M::Rrca | M::Rla | M::Rra => {
                let (res, carry) = self.shift(m, self.regs.a)?;
                self.regs.a = res;
                self.regs.set_flags(false, false, false, carry);
            }
            M::Daa => self.daa(),
            M::Cpl => {
                self.regs.a = !self.regs.a;
                self.regs.f |= FLAG_N | FLAG_H;
            }
            M::Scf => {
                self.regs.f = (self.regs.f & FLAG_Z) | FLAG_C;
            }
            M::Ccf => {
                self.regs.f = (self.regs.f & (FLAG_Z | FLAG_C)) ^ FLAG_C;
            }
            M::Halt => self.halt(mmu),
            M::Di => self.interrupts.disable(),
            M::Ei => self.interrupts.schedule_enable(),
            // Only reachable by executing the bare prefix descriptor.
            M::Prefix => return None,
            M::Rlc | M::Rrc | M::Rl | M::Rr | M::Sla | M::Sra | M::Swap | M::Srl => {
                let loc = self.locate8(mmu, *ops.first()?, ctx)?;
                let (res, carry) = self.shift(m, self.load(mmu, loc))?;
                self.store(mmu, loc, res);
                self.regs.set_flags(res == 0, false, false, carry);
            }
            M::Bit => {
                let (Operand::Bit(bit), target) = (*ops.first()?, *ops.get(1)?) else {
                    return None;
                };
                let val = self.source8(mmu, target, ctx)?;
                self.regs.f = (self.regs.f & FLAG_C)
                    | FLAG_H
                    | if val & (1 << bit) == 0 { FLAG_Z } else { 0 };
            }
            M::Res | M::Set => {
                let (Operand::Bit(bit), target) = (*ops.first()?, *ops.get(1)?) else {
                    return None;
                };
                let loc = self.locate8(mmu, target, ctx)?;
                let val = self.load(mmu, loc);
                let res = if m == M::Set {
                    val | (1 << bit)
                } else {
                    val & !(1 << bit)
                };
                self.store(mmu, loc, res);
            }
        }
        Some(Flow::Continue)
    }

    fn push_stack(&mut self, mmu: &mut Mmu, val: u16) {
        let [lo, hi] = val.to_le_bytes();
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        mmu.write_byte(self.regs.sp, hi);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        mmu.write_byte(self.regs.sp, lo);
    }

    fn pop_stack(&mut self, mmu: &Mmu) -> u16 {
        let lo = mmu.read_byte(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = mmu.read_byte(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        u16::from_le_bytes([lo, hi])
    }

    /// Resolve an 8-bit register or memory operand, applying HL+/HL-.
    fn locate8(&mut self, mmu: &Mmu, op: Operand, ctx: Ctx) -> Option<Loc> {
        Some(match op {
            Operand::Register(r) => Loc::Reg(r),
            Operand::IndirectRegisterPair(rp, post) => {
                let addr = self.regs.get16(rp);
                match post {
                    PostOp::None => {}
                    PostOp::Increment => self.regs.set16(rp, addr.wrapping_add(1)),
                    PostOp::Decrement => self.regs.set16(rp, addr.wrapping_sub(1)),
                }
                Loc::Mem(addr)
            }
            Operand::IndirectImmediate16 => Loc::Mem(mmu.read_word(ctx.base)),
            Operand::IoPort8 => Loc::Mem(0xFF00 | u16::from(mmu.read_byte(ctx.base))),
            Operand::IoPortC => Loc::Mem(0xFF00 | u16::from(self.regs.c)),
            _ => return None,
        })
    }

    fn load(&self, mmu: &Mmu, loc: Loc) -> u8 {
        match loc {
            Loc::Reg(r) => self.regs.get8(r),
            Loc::Mem(addr) => mmu.read_byte(addr),
        }
    }

    fn store(&mut self, mmu: &mut Mmu, loc: Loc, val: u8) {
        match loc {
            Loc::Reg(r) => self.regs.set8(r, val),
            Loc::Mem(addr) => mmu.write_byte(addr, val),
        }
    }

    fn source8(&mut self, mmu: &Mmu, op: Operand, ctx: Ctx) -> Option<u8> {
        match op {
            Operand::Immediate8 => Some(mmu.read_byte(ctx.base)),
            _ => {
                let loc = self.locate8(mmu, op, ctx)?;
                Some(self.load(mmu, loc))
            }
        }
    }

    fn ld(&mut self, mmu: &mut Mmu, ops: &[Operand], ctx: Ctx) -> Option<()> {
        let &[dst, src] = ops else {
            return None;
        };
        match (dst, src) {
            (Operand::RegisterPair(rp), Operand::Immediate16) => {
                self.regs.set16(rp, mmu.read_word(ctx.base));
            }
            (Operand::RegisterPair(R16::SP), Operand::RegisterPair(R16::HL)) => {
                self.regs.sp = self.regs.hl();
            }
            (Operand::IndirectImmediate16, Operand::RegisterPair(R16::SP)) => {
                let addr = mmu.read_word(ctx.base);
                mmu.write_word(addr, self.regs.sp);
            }
            (Operand::RegisterPair(R16::HL), Operand::StackOffset) => {
                let val = self.sp_plus_offset(mmu.read_byte(ctx.base));
                self.regs.set_hl(val);
            }
            _ => {
                let val = self.source8(mmu, src, ctx)?;
                let loc = self.locate8(mmu, dst, ctx)?;
                self.store(mmu, loc, val);
            }
        }
        Some(())
    }

    fn inc_dec(&mut self, mmu: &mut Mmu, m: Mnemonic, op: Operand, ctx: Ctx) -> Option<()> {
        if let Operand::RegisterPair(rp) = op {
            // 16-bit forms leave the flags alone.
            let val = self.regs.get16(rp);
            let res = if m == Mnemonic::Inc {
                val.wrapping_add(1)
            } else {
                val.wrapping_sub(1)
            };
            self.regs.set16(rp, res);
            return Some(());
        }

        let loc = self.locate8(mmu, op, ctx)?;
        let val = self.load(mmu, loc);
        let (res, half, sub) = if m == Mnemonic::Inc {
            (val.wrapping_add(1), val & 0x0F == 0x0F, 0)
        } else {
            (val.wrapping_sub(1), val & 0x0F == 0, FLAG_N)
        };
        self.store(mmu, loc, res);
        self.regs.f = (self.regs.f & FLAG_C)
            | sub
            | if res == 0 { FLAG_Z } else { 0 }
            | if half { FLAG_H } else { 0 };
        Some(())
    }

    fn add(&mut self, mmu: &mut Mmu, ops: &[Operand], ctx: Ctx) -> Option<()> {
        match *ops.get(1)? {
            Operand::RegisterPair(rp) => {
                let hl = self.regs.hl();
                let val = self.regs.get16(rp);
                self.regs.f = (self.regs.f & FLAG_Z)
                    | if (hl & 0x0FFF) + (val & 0x0FFF) > 0x0FFF {
                        FLAG_H
                    } else {
                        0
                    }
                    | if u32::from(hl) + u32::from(val) > 0xFFFF {
                        FLAG_C
                    } else {
                        0
                    };
                self.regs.set_hl(hl.wrapping_add(val));
            }
            Operand::SignedImmediate8 => {
                self.regs.sp = self.sp_plus_offset(mmu.read_byte(ctx.base));
            }
            src => {
                let val = self.source8(mmu, src, ctx)?;
                self.alu8(Mnemonic::Add, val)?;
            }
        }
        Some(())
    }

    /// SP + signed `offset`. H and C come from the unsigned low-byte add.
    fn sp_plus_offset(&mut self, offset: u8) -> u16 {
        let sp = self.regs.sp;
        let half = (sp & 0x000F) + u16::from(offset & 0x0F) > 0x000F;
        let carry = (sp & 0x00FF) + u16::from(offset) > 0x00FF;
        self.regs.set_flags(false, false, half, carry);
        sp.wrapping_add(offset as i8 as u16)
    }

    fn alu8(&mut self, m: Mnemonic, val: u8) -> Option<()> {
        let a = self.regs.a;
        let carry_in = u8::from(self.regs.carry());
        match m {
            Mnemonic::Add | Mnemonic::Adc => {
                let c = if m == Mnemonic::Adc { carry_in } else { 0 };
                let sum = u16::from(a) + u16::from(val) + u16::from(c);
                let res = sum as u8;
                let half = (a & 0x0F) + (val & 0x0F) + c > 0x0F;
                self.regs.a = res;
                self.regs.set_flags(res == 0, false, half, sum > 0xFF);
            }
            Mnemonic::Sub | Mnemonic::Sbc | Mnemonic::Cp => {
                let c = if m == Mnemonic::Sbc { carry_in } else { 0 };
                let diff = i16::from(a) - i16::from(val) - i16::from(c);
                let res = diff as u8;
                let half = (a & 0x0F) < (val & 0x0F) + c;
                if m != Mnemonic::Cp {
                    self.regs.a = res;
                }
                self.regs.set_flags(res == 0, true, half, diff < 0);
            }
            Mnemonic::And => {
                self.regs.a = a & val;
                self.regs.set_flags(self.regs.a == 0, false, true, false);
            }
            Mnemonic::Xor => {
                self.regs.a = a ^ val;
                self.regs.set_flags(self.regs.a == 0, false, false, false);
            }
            Mnemonic::Or => {
                self.regs.a = a | val;
                self.regs.set_flags(self.regs.a == 0, false, false, false);
            }
            _ => return None,
        }
        Some(())
    }

    /// Rotate/shift `val`, returning the result and the bit shifted into C.
    fn shift(&self, m: Mnemonic, val: u8) -> Option<(u8, bool)> {
        let carry_in = u8::from(self.regs.carry());
        Some(match m {
            Mnemonic::Rlc | Mnemonic::Rlca => (val.rotate_left(1), val & 0x80 != 0),
            Mnemonic::Rrc | Mnemonic::Rrca => (val.rotate_right(1), val & 0x01 != 0),
            Mnemonic::Rl | Mnemonic::Rla => ((val << 1) | carry_in, val & 0x80 != 0),
            Mnemonic::Rr | Mnemonic::Rra => ((val >> 1) | (carry_in << 7), val & 0x01 != 0),
            Mnemonic::Sla => (val << 1, val & 0x80 != 0),
            Mnemonic::Sra => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
            Mnemonic::Srl => (val >> 1, val & 0x01 != 0),
            Mnemonic::Swap => (val.rotate_left(4), false),
            _ => return None,
        })
    }

    fn daa(&mut self) {
        let f = self.regs.f;
        let mut a = self.regs.a;
        let mut correction = 0u8;
        let mut carry = false;
        if f & FLAG_H != 0 || (f & FLAG_N == 0 && (a & 0x0F) > 9) {
            correction |= 0x06;
        }
        if f & FLAG_C != 0 || (f & FLAG_N == 0 && a > 0x99) {
            correction |= 0x60;
            carry = true;
        }
        if f & FLAG_N == 0 {
            a = a.wrapping_add(correction);
        } else {
            a = a.wrapping_sub(correction);
        }
        self.regs.a = a;
        self.regs.f = if a == 0 { FLAG_Z } else { 0 } | (f & FLAG_N) | if carry { FLAG_C } else { 0 };
    }

    fn halt(&mut self, mmu: &Mmu) {
        if self.interrupts.ime() == Ime::Disabled && InterruptController::pending(mmu) != 0 {
            // HALT bug: no halt, and the next opcode byte is read twice.
            self.halt_bug = true;
        } else {
            self.halted = true;
        }
    }

    fn condition(&self, cc: Condition) -> bool {
        match cc {
            Condition::NZ => !self.regs.zero(),
            Condition::Z => self.regs.zero(),
            Condition::NC => !self.regs.carry(),
            Condition::C => self.regs.carry(),
        }
    }

    fn control_flow(
        &mut self,
        mmu: &mut Mmu,
        m: Mnemonic,
        ops: &[Operand],
        ctx: Ctx,
    ) -> Option<Flow> {
        let rest = match ops.split_first() {
            Some((Operand::Condition(cc), rest)) => {
                if !self.condition(*cc) {
                    return Some(Flow::NotTaken);
                }
                rest
            }
            _ => ops,
        };

        let target = match (m, rest) {
            (Mnemonic::Jp | Mnemonic::Call, [Operand::Immediate16]) => mmu.read_word(ctx.base),
            (Mnemonic::Jp, [Operand::RegisterPair(R16::HL)]) => self.regs.hl(),
            (Mnemonic::Jr, [Operand::RelativeImmediate8]) => {
                let offset = mmu.read_byte(ctx.base) as i8;
                ctx.next_pc.wrapping_add(offset as u16)
            }
            (Mnemonic::Rst, [Operand::Vector(v)]) => u16::from(*v),
            (Mnemonic::Ret | Mnemonic::Reti, []) => {
                let addr = self.pop_stack(mmu);
                if m == Mnemonic::Reti {
                    self.interrupts.enable_now();
                }
                addr
            }
            _ => return None,
        };
        if matches!(m, Mnemonic::Call | Mnemonic::Rst) {
            self.push_stack(mmu, ctx.next_pc);
        }
        self.regs.pc = target;
        Some(Flow::Jumped)
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
