//! DMG Game Boy emulation core.
//!
//! The SM83 instruction engine, a flat memory map, the interrupt controller
//! and PPU scanline timing, driven one frame at a time through the
//! [`gameboy`] facade. Frontends live in separate crates.

/// SM83 instruction engine.
pub mod cpu;

/// Opcode tables and instruction descriptors.
pub mod decoder;

/// Fatal execution errors.
pub mod error;

/// High-level facade that wires the CPU, MMU and PPU into a single machine.
pub mod gameboy;

/// IME state machine and interrupt sources.
pub mod interrupts;

/// Memory map and I/O register storage.
pub mod mmu;

/// PPU mode and scanline timing.
pub mod ppu;

/// The SM83 register file.
pub mod registers;

/// Scanline rasterizer interface and the reference DMG renderer.
pub mod render;

pub use error::CpuError;
pub use gameboy::{Frame, GameBoy};
