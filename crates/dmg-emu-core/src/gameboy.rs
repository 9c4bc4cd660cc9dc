use crate::{
    cpu::Cpu,
    error::CpuError,
    interrupts::InterruptController,
    mmu::{BgpConvention, Mmu},
    ppu::{FRAME_CYCLES, PpuEvent, PpuTiming},
    render::{Framebuffer, Rasterizer},
};

/// Summary of one `run_frame` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    /// 1-based frame counter since the last reset.
    pub number: u64,
    /// Cycles executed during this call.
    pub cycles: u32,
    /// Cycles past the frame budget, credited to the next frame.
    pub overshoot: u32,
}

pub struct GameBoy<R: Rasterizer = Framebuffer> {
    pub cpu: Cpu,
    pub mmu: Mmu,
    pub ppu: PpuTiming,
    pub rasterizer: R,
    events: Vec<PpuEvent>,
    frames: u64,
    overshoot: u32,
}

impl GameBoy {
    pub fn new() -> Self {
        Self::with_rasterizer(Framebuffer::new())
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rasterizer> GameBoy<R> {
    pub fn with_rasterizer(rasterizer: R) -> Self {
        Self {
            cpu: Cpu::new(),
            mmu: Mmu::new(),
            ppu: PpuTiming::new(),
            rasterizer,
            events: Vec::with_capacity(8),
            frames: 0,
            overshoot: 0,
        }
    }

    /// Map `rom` and install the post-load I/O defaults, then reset.
    pub fn load_rom(&mut self, rom: &[u8], bgp: BgpConvention) {
        self.mmu.load_rom(rom, bgp);
        self.reset();
    }

    /// Return the CPU and PPU to their post-boot state. Memory, including
    /// the loaded ROM, is left untouched.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.ppu.reset();
        self.events.clear();
        self.frames = 0;
        self.overshoot = 0;
        log::debug!("reset: {}", self.cpu.debug_state());
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// One CPU step followed by the PPU catching up by the same cycles.
    pub fn step(&mut self) -> Result<u32, CpuError> {
        let cycles = self.cpu.step(&mut self.mmu)?;
        self.ppu.advance(cycles, &mut self.mmu, &mut self.events);
        for event in self.events.drain(..) {
            match event {
                PpuEvent::ScanlineReady(line) => self.rasterizer.render_scanline(&self.mmu, line),
                PpuEvent::RequestInterrupt(irq) => InterruptController::request(&mut self.mmu, irq),
            }
        }
        Ok(cycles)
    }

    /// Step until the 70224-cycle frame budget is spent.
    pub fn run_frame(&mut self) -> Result<Frame, CpuError> {
        self.run_frame_inspect(|_, _| {})
    }

    /// Like `run_frame`, calling `inspect` before every step.
    pub fn run_frame_inspect<F>(&mut self, mut inspect: F) -> Result<Frame, CpuError>
    where
        F: FnMut(&Cpu, &Mmu),
    {
        let mut elapsed = self.overshoot;
        let mut cycles = 0;
        while elapsed < FRAME_CYCLES {
            inspect(&self.cpu, &self.mmu);
            let used = self.step()?;
            elapsed += used;
            cycles += used;
        }
        self.overshoot = elapsed - FRAME_CYCLES;
        self.frames += 1;
        log::debug!(
            "frame {} done: {} cycles, {} carried",
            self.frames,
            cycles,
            self.overshoot
        );
        Ok(Frame {
            number: self.frames,
            cycles,
            overshoot: self.overshoot,
        })
    }
}
