use crate::mmu::{IE, IF, Mmu};

/// Interrupt sources in dispatch priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    VBlank,
    Stat,
    Timer,
    Serial,
    Joypad,
}

impl Interrupt {
    pub const ALL: [Interrupt; 5] = [
        Interrupt::VBlank,
        Interrupt::Stat,
        Interrupt::Timer,
        Interrupt::Serial,
        Interrupt::Joypad,
    ];

    /// Bit in IF/IE.
    pub const fn bit(self) -> u8 {
        match self {
            Interrupt::VBlank => 0x01,
            Interrupt::Stat => 0x02,
            Interrupt::Timer => 0x04,
            Interrupt::Serial => 0x08,
            Interrupt::Joypad => 0x10,
        }
    }

    // Interrupt vectors (gbdev.io/pandocs/Interrupts.html)
    pub const fn vector(self) -> u16 {
        match self {
            Interrupt::VBlank => 0x40,
            Interrupt::Stat => 0x48,
            Interrupt::Timer => 0x50,
            Interrupt::Serial => 0x58,
            Interrupt::Joypad => 0x60,
        }
    }

    /// Highest-priority source set in `mask`.
    pub fn highest(mask: u8) -> Option<Interrupt> {
        Interrupt::ALL.into_iter().find(|irq| mask & irq.bit() != 0)
    }
}

/// Master interrupt enable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Ime {
    #[default]
    Disabled,
    /// EI executed; becomes `Enabled` once the following instruction completes.
    PendingEnable,
    Enabled,
}

/// IME state machine. IE and IF themselves live in the address space at
/// 0xFFFF and 0xFF0F and are only accessed through `Mmu`.
#[derive(Clone, Copy, Debug, Default)]
pub struct InterruptController {
    ime: Ime,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ime(&self) -> Ime {
        self.ime
    }

    pub fn enabled(&self) -> bool {
        self.ime == Ime::Enabled
    }

    pub fn enable_pending(&self) -> bool {
        self.ime == Ime::PendingEnable
    }

    /// DI. Also cancels an EI that has not taken effect yet.
    pub fn disable(&mut self) {
        self.ime = Ime::Disabled;
    }

    /// EI.
    pub fn schedule_enable(&mut self) {
        if self.ime == Ime::Disabled {
            self.ime = Ime::PendingEnable;
        }
    }

    /// RETI.
    pub fn enable_now(&mut self) {
        self.ime = Ime::Enabled;
    }

    /// Called once an instruction has completed. `was_pending` is the
    /// pending state sampled before that instruction executed, so the EI
    /// itself never promotes.
    pub fn end_step(&mut self, was_pending: bool) {
        if was_pending && self.ime == Ime::PendingEnable {
            self.ime = Ime::Enabled;
        }
    }

    pub fn request(mmu: &mut Mmu, irq: Interrupt) {
        let flags = mmu.read_byte(IF);
        mmu.write_byte(IF, flags | irq.bit());
    }

    /// Sources that are both requested and enabled.
    pub fn pending(mmu: &Mmu) -> u8 {
        mmu.read_byte(IF) & mmu.read_byte(IE) & 0x1F
    }

    /// Pick the source to dispatch, if IME allows it.
    pub fn next_dispatch(&self, mmu: &Mmu) -> Option<Interrupt> {
        if !self.enabled() {
            return None;
        }
        Interrupt::highest(Self::pending(mmu))
    }

    /// Clear IME and the request bit for `irq`. The caller pushes PC.
    pub fn acknowledge(&mut self, mmu: &mut Mmu, irq: Interrupt) {
        self.ime = Ime::Disabled;
        let flags = mmu.read_byte(IF);
        mmu.write_byte(IF, flags & !irq.bit());
    }

    pub fn reset(&mut self) {
        self.ime = Ime::Disabled;
    }
}
