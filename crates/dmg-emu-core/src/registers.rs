use std::fmt;

// CPU flag bits as documented in gbdev.io/pandocs/The_CPU_Flags.html
pub const FLAG_Z: u8 = 0x80; // Zero
pub const FLAG_N: u8 = 0x40; // Subtract
pub const FLAG_H: u8 = 0x20; // Half Carry
pub const FLAG_C: u8 = 0x10; // Carry

// Post-boot CPU state from gbdev.io/pandocs/Power_Up_State.html
const BOOT_A: u8 = 0x01;
const BOOT_F: u8 = 0xB0;
const BOOT_B: u8 = 0x00;
const BOOT_C: u8 = 0x13;
const BOOT_D: u8 = 0x00;
const BOOT_E: u8 = 0xD8;
const BOOT_H: u8 = 0x01;
const BOOT_L: u8 = 0x4D;
const BOOT_SP: u16 = 0xFFFE;
const BOOT_PC: u16 = 0x0100;

/// 8-bit register selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum R8 {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
}

/// 16-bit register pair selector. `AF` is only used by PUSH/POP.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum R16 {
    AF,
    BC,
    DE,
    HL,
    SP,
}

impl fmt::Display for R8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            R8::A => "A",
            R8::B => "B",
            R8::C => "C",
            R8::D => "D",
            R8::E => "E",
            R8::H => "H",
            R8::L => "L",
        };
        f.write_str(name)
    }
}

impl fmt::Display for R16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            R16::AF => "AF",
            R16::BC => "BC",
            R16::DE => "DE",
            R16::HL => "HL",
            R16::SP => "SP",
        };
        f.write_str(name)
    }
}

/// SM83 register file.
///
/// BC/DE/HL are views over the 8-bit halves rather than separate storage.
/// The low nibble of `f` is kept at zero by every setter that can reach it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
}

impl Registers {
    /// Register contents left behind by the DMG boot ROM.
    pub fn post_boot() -> Self {
        Self {
            a: BOOT_A,
            f: BOOT_F,
            b: BOOT_B,
            c: BOOT_C,
            d: BOOT_D,
            e: BOOT_E,
            h: BOOT_H,
            l: BOOT_L,
            sp: BOOT_SP,
            pc: BOOT_PC,
        }
    }

    #[inline]
    pub fn af(&self) -> u16 {
        u16::from_be_bytes([self.a, self.f & 0xF0])
    }

    #[inline]
    pub fn set_af(&mut self, val: u16) {
        let [a, f] = val.to_be_bytes();
        self.a = a;
        self.f = f & 0xF0;
    }

    #[inline]
    pub fn bc(&self) -> u16 {
        u16::from_be_bytes([self.b, self.c])
    }

    #[inline]
    pub fn set_bc(&mut self, val: u16) {
        [self.b, self.c] = val.to_be_bytes();
    }

    #[inline]
    pub fn de(&self) -> u16 {
        u16::from_be_bytes([self.d, self.e])
    }

    #[inline]
    pub fn set_de(&mut self, val: u16) {
        [self.d, self.e] = val.to_be_bytes();
    }

    #[inline]
    pub fn hl(&self) -> u16 {
        u16::from_be_bytes([self.h, self.l])
    }

    #[inline]
    pub fn set_hl(&mut self, val: u16) {
        [self.h, self.l] = val.to_be_bytes();
    }

    pub fn get8(&self, reg: R8) -> u8 {
        match reg {
            R8::A => self.a,
            R8::B => self.b,
            R8::C => self.c,
            R8::D => self.d,
            R8::E => self.e,
            R8::H => self.h,
            R8::L => self.l,
        }
    }

    pub fn set8(&mut self, reg: R8, val: u8) {
        match reg {
            R8::A => self.a = val,
            R8::B => self.b = val,
            R8::C => self.c = val,
            R8::D => self.d = val,
            R8::E => self.e = val,
            R8::H => self.h = val,
            R8::L => self.l = val,
        }
    }

    pub fn get16(&self, reg: R16) -> u16 {
        match reg {
            R16::AF => self.af(),
            R16::BC => self.bc(),
            R16::DE => self.de(),
            R16::HL => self.hl(),
            R16::SP => self.sp,
        }
    }

    pub fn set16(&mut self, reg: R16, val: u16) {
        match reg {
            R16::AF => self.set_af(val),
            R16::BC => self.set_bc(val),
            R16::DE => self.set_de(val),
            R16::HL => self.set_hl(val),
            R16::SP => self.sp = val,
        }
    }

    #[inline]
    pub fn flag(&self, mask: u8) -> bool {
        self.f & mask != 0
    }

    #[inline]
    pub fn set_flag(&mut self, mask: u8, on: bool) {
        if on {
            self.f |= mask;
        } else {
            self.f &= !mask;
        }
        self.f &= 0xF0;
    }

    /// Replace all four flags at once.
    #[inline]
    pub fn set_flags(&mut self, z: bool, n: bool, h: bool, c: bool) {
        self.f = if z { FLAG_Z } else { 0 }
            | if n { FLAG_N } else { 0 }
            | if h { FLAG_H } else { 0 }
            | if c { FLAG_C } else { 0 };
    }

    #[inline]
    pub fn zero(&self) -> bool {
        self.flag(FLAG_Z)
    }

    #[inline]
    pub fn subtract(&self) -> bool {
        self.flag(FLAG_N)
    }

    #[inline]
    pub fn half_carry(&self) -> bool {
        self.flag(FLAG_H)
    }

    #[inline]
    pub fn carry(&self) -> bool {
        self.flag(FLAG_C)
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::post_boot()
    }
}
