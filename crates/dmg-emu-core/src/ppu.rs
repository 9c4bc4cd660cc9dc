use crate::interrupts::Interrupt;
use crate::mmu::{LCDC, LY, LYC, Mmu, STAT};

#[cfg(feature = "ppu-trace")]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {
        log::trace!(target: "dmg_emu_core::ppu", $($arg)*);
    };
}
#[cfg(not(feature = "ppu-trace"))]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {};
}

// Timing constants per LCD mode in T-cycles
const MODE0_CYCLES: u32 = 204; // HBlank
const MODE1_CYCLES: u32 = 456; // One line during VBlank
const MODE2_CYCLES: u32 = 80; // OAM scan
const MODE3_CYCLES: u32 = 172; // Pixel transfer

pub const LINE_CYCLES: u32 = MODE2_CYCLES + MODE3_CYCLES + MODE0_CYCLES;
pub const VISIBLE_LINES: u8 = 144;
// Number of lines spent in VBlank
const VBLANK_LINES: u8 = 10;
pub const FRAME_CYCLES: u32 = LINE_CYCLES * (VISIBLE_LINES as u32 + VBLANK_LINES as u32);

// STAT bits (gbdev.io/pandocs/STAT.html)
const STAT_MODE_MASK: u8 = 0x03;
const STAT_COINCIDENCE: u8 = 0x04;
const STAT_HBLANK_IRQ: u8 = 0x08;
const STAT_VBLANK_IRQ: u8 = 0x10;
const STAT_OAM_IRQ: u8 = 0x20;
const STAT_LYC_IRQ: u8 = 0x40;

const LCDC_ENABLE: u8 = 0x80;

/// LCD mode as reported in STAT bits 0-1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    HBlank = 0,
    VBlank = 1,
    OamSearch = 2,
    Transfer = 3,
}

impl Mode {
    fn duration(self) -> u32 {
        match self {
            Mode::HBlank => MODE0_CYCLES,
            Mode::VBlank => MODE1_CYCLES,
            Mode::OamSearch => MODE2_CYCLES,
            Mode::Transfer => MODE3_CYCLES,
        }
    }

    /// STAT bit that requests an interrupt on entering this mode.
    fn stat_source(self) -> u8 {
        match self {
            Mode::HBlank => STAT_HBLANK_IRQ,
            Mode::VBlank => STAT_VBLANK_IRQ,
            Mode::OamSearch => STAT_OAM_IRQ,
            Mode::Transfer => 0,
        }
    }
}

/// Side effects produced while advancing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PpuEvent {
    /// Pixel transfer for this line finished; it is ready to rasterize.
    ScanlineReady(u8),
    RequestInterrupt(Interrupt),
}

/// Scanline scheduler. Never touches the CPU; interrupt requests are
/// returned as events and LY/STAT are mirrored into the address space.
#[derive(Clone, Debug)]
pub struct PpuTiming {
    mode: Mode,
    ly: u8,
    mode_clock: u32,
    lyc_eq_ly: bool,
    lcd_on: bool,
}

impl PpuTiming {
    pub fn new() -> Self {
        Self {
            mode: Mode::OamSearch,
            ly: 0,
            mode_clock: 0,
            lyc_eq_ly: false,
            lcd_on: true,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn ly(&self) -> u8 {
        self.ly
    }

    /// Cycles spent in the current mode (or VBlank line).
    pub fn mode_clock(&self) -> u32 {
        self.mode_clock
    }

    /// Advance by `cycles`, appending any side effects to `events`.
    pub fn advance(&mut self, cycles: u32, mmu: &mut Mmu, events: &mut Vec<PpuEvent>) {
        if mmu.read_byte(LCDC) & LCDC_ENABLE == 0 {
            if self.lcd_on {
                ppu_trace!("LCD off at LY {}", self.ly);
            }
            self.lcd_on = false;
            self.mode = Mode::HBlank;
            self.ly = 0;
            self.mode_clock = 0;
            self.lyc_eq_ly = false;
            self.mirror(mmu);
            return;
        }
        if !self.lcd_on {
            ppu_trace!("LCD on");
            self.lcd_on = true;
            self.mode = Mode::OamSearch;
            self.ly = 0;
            self.mode_clock = 0;
        }

        // LYC may have been rewritten by the CPU since the last call.
        self.compare_lyc(mmu, events);

        let mut remaining = cycles;
        while remaining > 0 {
            let used = remaining.min(self.mode.duration() - self.mode_clock);
            self.mode_clock += used;
            remaining -= used;
            if self.mode_clock < self.mode.duration() {
                break;
            }
            self.mode_clock = 0;
            self.next_mode(mmu, events);
        }
        self.mirror(mmu);
    }

    fn next_mode(&mut self, mmu: &mut Mmu, events: &mut Vec<PpuEvent>) {
        match self.mode {
            Mode::OamSearch => self.enter(Mode::Transfer, mmu, events),
            Mode::Transfer => {
                events.push(PpuEvent::ScanlineReady(self.ly));
                self.enter(Mode::HBlank, mmu, events);
            }
            Mode::HBlank => {
                self.ly += 1;
                self.compare_lyc(mmu, events);
                if self.ly == VISIBLE_LINES {
                    events.push(PpuEvent::RequestInterrupt(Interrupt::VBlank));
                    self.enter(Mode::VBlank, mmu, events);
                } else {
                    self.enter(Mode::OamSearch, mmu, events);
                }
            }
            Mode::VBlank => {
                self.ly += 1;
                if self.ly > VISIBLE_LINES + VBLANK_LINES - 1 {
                    self.ly = 0;
                    self.compare_lyc(mmu, events);
                    self.enter(Mode::OamSearch, mmu, events);
                } else {
                    self.compare_lyc(mmu, events);
                }
            }
        }
    }

    fn enter(&mut self, mode: Mode, mmu: &Mmu, events: &mut Vec<PpuEvent>) {
        ppu_trace!("LY {:3} {:?} -> {:?}", self.ly, self.mode, mode);
        self.mode = mode;
        if mmu.read_byte(STAT) & mode.stat_source() != 0 {
            events.push(PpuEvent::RequestInterrupt(Interrupt::Stat));
        }
    }

    /// LY=LYC requests STAT on the rising edge only.
    fn compare_lyc(&mut self, mmu: &Mmu, events: &mut Vec<PpuEvent>) {
        let eq = self.ly == mmu.read_byte(LYC);
        if eq && !self.lyc_eq_ly && mmu.read_byte(STAT) & STAT_LYC_IRQ != 0 {
            events.push(PpuEvent::RequestInterrupt(Interrupt::Stat));
        }
        self.lyc_eq_ly = eq;
    }

    fn mirror(&self, mmu: &mut Mmu) {
        mmu.write_byte(LY, self.ly);
        let stat = mmu.read_byte(STAT) & !(STAT_MODE_MASK | STAT_COINCIDENCE);
        let coincidence = if self.lyc_eq_ly { STAT_COINCIDENCE } else { 0 };
        mmu.write_byte(STAT, stat | coincidence | self.mode as u8);
    }
}

impl Default for PpuTiming {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lcd_on() -> Mmu {
        let mut mmu = Mmu::new();
        mmu.write_byte(LCDC, 0x91);
        mmu
    }

    #[test]
    fn one_line_runs_all_three_modes() {
        let mut mmu = lcd_on();
        let mut ppu = PpuTiming::new();
        let mut events = Vec::new();
        ppu.advance(79, &mut mmu, &mut events);
        assert_eq!(ppu.mode(), Mode::OamSearch);
        ppu.advance(1, &mut mmu, &mut events);
        assert_eq!(ppu.mode(), Mode::Transfer);
        assert_eq!(mmu.read_byte(STAT) & 0x03, 3);
        ppu.advance(172, &mut mmu, &mut events);
        assert_eq!(ppu.mode(), Mode::HBlank);
        assert_eq!(events, vec![PpuEvent::ScanlineReady(0)]);
        ppu.advance(204, &mut mmu, &mut events);
        assert_eq!(ppu.mode(), Mode::OamSearch);
        assert_eq!(mmu.read_byte(LY), 1);
    }

    #[test]
    fn large_advance_crosses_several_modes() {
        let mut mmu = lcd_on();
        let mut ppu = PpuTiming::new();
        let mut events = Vec::new();
        ppu.advance(LINE_CYCLES * 3 + 100, &mut mmu, &mut events);
        assert_eq!(ppu.ly(), 3);
        assert_eq!(ppu.mode(), Mode::Transfer);
        assert_eq!(ppu.mode_clock(), 20);
        let lines: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PpuEvent::ScanlineReady(l) => Some(*l),
                _ => None,
            })
            .collect();
        assert_eq!(lines, vec![0, 1, 2]);
    }

    #[test]
    fn lyc_interrupt_is_edge_triggered() {
        let mut mmu = lcd_on();
        mmu.write_byte(LYC, 2);
        mmu.write_byte(STAT, STAT_LYC_IRQ);
        let mut ppu = PpuTiming::new();
        let mut events = Vec::new();
        for _ in 0..(LINE_CYCLES * 3 / 4) {
            ppu.advance(4, &mut mmu, &mut events);
        }
        let stat_irqs = events
            .iter()
            .filter(|e| **e == PpuEvent::RequestInterrupt(Interrupt::Stat))
            .count();
        assert_eq!(stat_irqs, 1);
        assert_eq!(mmu.read_byte(STAT) & STAT_COINCIDENCE, 0);
    }

    #[test]
    fn hblank_stat_source() {
        let mut mmu = lcd_on();
        mmu.write_byte(STAT, STAT_HBLANK_IRQ);
        let mut ppu = PpuTiming::new();
        let mut events = Vec::new();
        ppu.advance(MODE2_CYCLES + MODE3_CYCLES, &mut mmu, &mut events);
        assert_eq!(
            events,
            vec![
                PpuEvent::ScanlineReady(0),
                PpuEvent::RequestInterrupt(Interrupt::Stat)
            ]
        );
    }

    #[test]
    fn lcd_off_holds_line_zero() {
        let mut mmu = lcd_on();
        let mut ppu = PpuTiming::new();
        let mut events = Vec::new();
        ppu.advance(LINE_CYCLES * 5 + 10, &mut mmu, &mut events);
        mmu.write_byte(LCDC, 0x11);
        events.clear();
        ppu.advance(FRAME_CYCLES, &mut mmu, &mut events);
        assert!(events.is_empty());
        assert_eq!(mmu.read_byte(LY), 0);
        assert_eq!(ppu.mode(), Mode::HBlank);

        mmu.write_byte(LCDC, 0x91);
        ppu.advance(4, &mut mmu, &mut events);
        assert_eq!(ppu.mode(), Mode::OamSearch);
        assert_eq!(ppu.mode_clock(), 4);
    }
}
