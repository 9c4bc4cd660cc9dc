use thiserror::Error;

use crate::decoder::Mnemonic;

/// Fatal execution errors. The CPU latches the first one until reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CpuError {
    /// The byte at `addr` is not an SM83 opcode.
    #[error("undefined opcode {opcode:#04X} at {addr:#06X}{}", prefix_tag(.prefixed))]
    Decode { addr: u16, opcode: u8, prefixed: bool },
    /// The opcode is defined by the hardware but has no handler here.
    #[error("no handler for {mnemonic} (opcode {opcode:#04X}) at {addr:#06X}")]
    UnimplementedOperation {
        addr: u16,
        opcode: u8,
        mnemonic: Mnemonic,
    },
}

impl CpuError {
    pub fn addr(&self) -> u16 {
        match *self {
            CpuError::Decode { addr, .. } | CpuError::UnimplementedOperation { addr, .. } => addr,
        }
    }
}

fn prefix_tag(prefixed: &bool) -> &'static str {
    if *prefixed { " (CB)" } else { "" }
}
