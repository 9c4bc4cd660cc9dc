//! Headless runner for `dmg-emu-core`: load a ROM, run a number of frames,
//! optionally dump the last frame to a PNG.

pub mod config;

use dmg_emu_core::decoder;
use dmg_emu_core::render::{Framebuffer, SCREEN_HEIGHT, SCREEN_WIDTH};
use dmg_emu_core::{CpuError, GameBoy};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use config::{Bgp, HeadlessConfig};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to read ROM {}: {source}", .path.display())]
    ReadRom {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("emulation stopped: {0}")]
    Cpu(#[from] CpuError),
    #[error("failed to write screenshot {}: {source}", .path.display())]
    Screenshot {
        path: PathBuf,
        #[source]
        source: png::EncodingError,
    },
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub rom: PathBuf,
    pub config: HeadlessConfig,
    /// Print every executed instruction to `trace_out`.
    pub trace: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub cycles: u64,
    pub header_ok: bool,
    pub cpu_state: String,
}

pub fn run(opts: &RunOptions, trace_out: &mut impl Write) -> Result<RunSummary, RunError> {
    let rom = std::fs::read(&opts.rom).map_err(|source| RunError::ReadRom {
        path: opts.rom.clone(),
        source,
    })?;
    log::info!("Loaded {} ({} bytes)", opts.rom.display(), rom.len());

    let cfg = &opts.config;
    let mut gb = GameBoy::with_rasterizer(Framebuffer::with_palette(cfg.palette));
    gb.load_rom(&rom, cfg.bgp.into());
    let header_ok = gb.mmu.verify_rom().is_valid();

    for _ in 0..cfg.frames {
        if opts.trace {
            trace_frame(&mut gb, trace_out)?;
        } else {
            gb.run_frame()?;
        }
    }

    if let Some(path) = &cfg.screenshot {
        write_png(path, gb.rasterizer.pixels()).map_err(|source| RunError::Screenshot {
            path: path.clone(),
            source,
        })?;
        log::info!("Wrote {}", path.display());
    }

    Ok(RunSummary {
        frames: cfg.frames,
        cycles: gb.cpu.cycles,
        header_ok,
        cpu_state: gb.cpu.debug_state(),
    })
}

fn trace_frame(gb: &mut GameBoy, out: &mut impl Write) -> Result<(), RunError> {
    gb.run_frame_inspect(|cpu, mmu| {
        if cpu.halted {
            return;
        }
        let pc = cpu.regs.pc;
        let (text, _) = decoder::disassemble(mmu, pc);
        // Trace output is best effort.
        let _ = writeln!(out, "{pc:04X}  {text:<20} {}", cpu.debug_state());
    })?;
    Ok(())
}

/// Write 0x00RRGGBB pixels as an 8-bit RGB PNG.
pub fn write_png(path: &Path, pixels: &[u32]) -> Result<(), png::EncodingError> {
    let mut rgb = Vec::with_capacity(SCREEN_WIDTH * SCREEN_HEIGHT * 3);
    for c in pixels {
        rgb.push(((c >> 16) & 0xFF) as u8);
        rgb.push(((c >> 8) & 0xFF) as u8);
        rgb.push((c & 0xFF) as u8);
    }
    let file = File::create(path)?;
    let mut encoder = png::Encoder::new(
        BufWriter::new(file),
        SCREEN_WIDTH as u32,
        SCREEN_HEIGHT as u32,
    );
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&rgb)?;
    writer.finish()
}
