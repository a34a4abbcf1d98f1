use thiserror::Error;

use crate::cfu::Opcode;

/// Failures reported by an instruction channel implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("unknown funct7 opcode {0}")]
    UnknownOpcode(u8),

    #[error("{op:?} issued while accelerator is {state}")]
    OutOfOrder { op: Opcode, state: &'static str },

    #[error("{stream} stream overrun: capacity {capacity} elements")]
    Overrun { stream: &'static str, capacity: usize },

    #[error("{op:?} coordinates out of range: batch {batch}, channel {channel}, group {group}")]
    OperandRange { op: Opcode, batch: usize, channel: usize, group: usize },

    #[error("shared accelerator channel poisoned by a panicking holder")]
    Poisoned,

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Contract violations detected before a convolution touches its output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvError {
    #[error("{tensor} shape must have 4 dimensions, got {got}")]
    DimensionCount { tensor: &'static str, got: usize },

    #[error("batch mismatch: input has {input}, output has {output}")]
    BatchMismatch { input: usize, output: usize },

    #[error("output depth mismatch: filter has {filter}, output has {output}")]
    OutputDepthMismatch { filter: usize, output: usize },

    #[error("input depth {input_depth} is not a multiple of filter input depth {filter_input_depth}")]
    GroupDivision { input_depth: usize, filter_input_depth: usize },

    #[error("output depth {output_depth} cannot be split into {groups} groups")]
    FiltersPerGroup { output_depth: usize, groups: usize },

    #[error("{what} has {got} entries, expected one per output channel ({expected})")]
    PerChannelLength { what: &'static str, got: usize, expected: usize },

    #[error("{tensor} buffer holds {got} elements but its shape needs {expected}")]
    BufferLength { tensor: &'static str, got: usize, expected: usize },

    #[error("{what} must be at least 1, got {height}x{width}")]
    NonPositive { what: &'static str, height: i32, width: i32 },

    #[error("padding must not be negative, got {height}x{width}")]
    NegativePadding { height: i32, width: i32 },

    #[error("activation range [{min}, {max}] is empty or does not fit {element}")]
    ActivationRange { min: i32, max: i32, element: &'static str },

    #[error("input offset {offset} outside [-{limit}, {limit}]")]
    InputOffsetRange { offset: i32, limit: i32 },

    #[error("output channel {channel}: shift {shift} outside [-31, 7]")]
    ShiftRange { channel: usize, shift: i32 },

    #[error("output channel {channel}: multiplier {multiplier} is negative")]
    NegativeMultiplier { channel: usize, multiplier: i32 },

    #[error("real multiplier {0} cannot be quantized")]
    InvalidScale(String),

    #[error("{what} = {value} does not fit a 32-bit channel operand")]
    OperandOverflow { what: &'static str, value: i64 },

    #[error("accelerator path does not support {0} activations")]
    AcceleratorUnsupported(&'static str),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}
