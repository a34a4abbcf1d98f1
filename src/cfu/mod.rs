//! Custom-instruction channel to the convolution accelerator.
//!
//! The accelerator is reached through one blocking call carrying a 7-bit
//! function code and two 32-bit operands, returning one 32-bit word. It has no
//! access to host memory, so tensors are streamed in through the same call.

pub mod emulator;
pub mod recording;
pub mod shared;

pub use emulator::{CfuEmulator, CfuStats};
pub use recording::RecordingChannel;
pub use shared::SharedChannel;

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// funct7 codes understood by the accelerator.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    FilterBegin = 0,
    FilterBulk = 1,
    FilterTail = 2,
    InputBegin = 3,
    InputBulk = 4,
    InputTail = 5,
    Reset = 6,
    /// Input offset first, then five dimension pairs, in that fixed order.
    SetParam = 7,
    ParamReset = 8,
    /// Used three times per output: (x origin, y origin), (batch, channel), (group, 0).
    SetCoord = 9,
    Accumulate = 10,
}

impl Opcode {
    pub const ALL: [Opcode; 11] = [
        Opcode::FilterBegin,
        Opcode::FilterBulk,
        Opcode::FilterTail,
        Opcode::InputBegin,
        Opcode::InputBulk,
        Opcode::InputTail,
        Opcode::Reset,
        Opcode::SetParam,
        Opcode::ParamReset,
        Opcode::SetCoord,
        Opcode::Accumulate,
    ];

    #[inline]
    pub fn funct7(self) -> u8 { self as u8 }
}

impl TryFrom<u8> for Opcode {
    type Error = ChannelError;

    fn try_from(funct7: u8) -> Result<Self, Self::Error> {
        Opcode::ALL.get(funct7 as usize).copied().ok_or(ChannelError::UnknownOpcode(funct7))
    }
}

/// One issued instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    pub in0: u32,
    pub in1: u32,
}

impl Instruction {
    pub fn new(op: Opcode, in0: u32, in1: u32) -> Self { Self { op, in0, in1 } }
}

/// Synchronous, in-order channel to one accelerator instance.
///
/// The return value only carries data for [`Opcode::Accumulate`]. Transport
/// problems are the implementation's to report; the convolution never retries.
pub trait InstructionChannel {
    fn execute(&mut self, op: Opcode, in0: u32, in1: u32) -> Result<u32, ChannelError>;
}

impl<C: InstructionChannel + ?Sized> InstructionChannel for &mut C {
    #[inline]
    fn execute(&mut self, op: Opcode, in0: u32, in1: u32) -> Result<u32, ChannelError> { (**self).execute(op, in0, in1) }
}

impl<C: InstructionChannel + ?Sized> InstructionChannel for Box<C> {
    #[inline]
    fn execute(&mut self, op: Opcode, in0: u32, in1: u32) -> Result<u32, ChannelError> { (**self).execute(op, in0, in1) }
}

/// Bytes carried by one bulk instruction.
pub const BULK_BYTES: usize = 8;

/// Pack four bytes into an operand, little-endian: `bytes[0]` lands in bits 0..8.
#[inline]
pub fn pack_word(bytes: &[i8]) -> u32 {
    u32::from_le_bytes([bytes[0] as u8, bytes[1] as u8, bytes[2] as u8, bytes[3] as u8])
}

#[inline]
pub fn unpack_word(word: u32) -> [i8; 4] {
    word.to_le_bytes().map(|b| b as i8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_round_trip_through_funct7() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::try_from(op.funct7()), Ok(op));
        }
        assert_eq!(Opcode::try_from(11), Err(ChannelError::UnknownOpcode(11)));
        assert_eq!(Opcode::try_from(127), Err(ChannelError::UnknownOpcode(127)));
    }

    #[test]
    fn pack_word_is_little_endian() {
        assert_eq!(pack_word(&[1, 2, 3, 4]), 0x0403_0201);
        assert_eq!(pack_word(&[-1, 0, 0, -128]), 0x8000_00FF);
        assert_eq!(unpack_word(0x8000_00FF), [-1, 0, 0, -128]);
    }
}
