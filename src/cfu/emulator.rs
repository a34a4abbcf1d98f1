//! Software model of the convolution accelerator.
//!
//! Holds the staged filter and input tensors plus the parameter registers and
//! answers `Accumulate` with the same 32-bit MAC reduction the gateware
//! performs. Instructions that arrive out of protocol order are rejected
//! instead of being answered from stale state.

use log::{trace, warn};
use serde::Serialize;

use super::{unpack_word, InstructionChannel, Opcode, BULK_BYTES};
use crate::error::ChannelError;

const PARAM_WORDS: usize = 6;
const COORD_WORDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Cold,
    Params,
    Filter,
    Input,
    Dispatch,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Cold => "not reset",
            Phase::Params => "configuring",
            Phase::Filter => "loading filter",
            Phase::Input => "loading input",
            Phase::Dispatch => "dispatching",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Dims {
    batches: usize,
    input_height: usize,
    input_width: usize,
    input_depth: usize,
    output_depth: usize,
    filter_height: usize,
    filter_width: usize,
    filter_input_depth: usize,
    dilation_width: i32,
    dilation_height: i32,
}

impl Dims {
    fn filter_len(&self) -> usize { self.output_depth * self.filter_height * self.filter_width * self.filter_input_depth }
    fn input_len(&self) -> usize { self.batches * self.input_height * self.input_width * self.input_depth }
}

/// Instruction counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CfuStats {
    pub instructions: u64,
    pub resets: u64,
    pub staged_bytes: u64,
    pub accumulates: u64,
}

#[derive(Debug, Clone)]
pub struct CfuEmulator {
    phase: Phase,
    param_words: usize,
    input_offset: i32,
    dims: Dims,
    filter: Vec<i8>,
    input: Vec<i8>,
    coord_words: usize,
    coords: [u32; 2 * COORD_WORDS],
    stats: CfuStats,
}

impl Default for CfuEmulator {
    fn default() -> Self { Self::new() }
}

impl CfuEmulator {
    pub fn new() -> Self {
        Self {
            phase: Phase::Cold,
            param_words: 0,
            input_offset: 0,
            dims: Dims::default(),
            filter: Vec::new(),
            input: Vec::new(),
            coord_words: 0,
            coords: [0; 2 * COORD_WORDS],
            stats: CfuStats::default(),
        }
    }

    pub fn stats(&self) -> CfuStats { self.stats }

    /// Staged filter bytes, in the order they arrived.
    pub fn filter(&self) -> &[i8] { &self.filter }

    /// Staged input bytes, in the order they arrived.
    pub fn input(&self) -> &[i8] { &self.input }

    /// Decode a raw funct7 before executing it.
    pub fn execute_raw(&mut self, funct7: u8, in0: u32, in1: u32) -> Result<u32, ChannelError> {
        let op = Opcode::try_from(funct7)?;
        self.execute(op, in0, in1)
    }

    fn reset(&mut self) {
        self.phase = Phase::Params;
        self.param_words = 0;
        self.input_offset = 0;
        self.dims = Dims::default();
        self.filter.clear();
        self.input.clear();
        self.coord_words = 0;
        self.stats.resets += 1;
    }

    fn require(&self, op: Opcode, ok: bool) -> Result<(), ChannelError> {
        if ok { Ok(()) } else { Err(ChannelError::OutOfOrder { op, state: self.phase.name() }) }
    }

    fn set_param(&mut self, in0: u32, in1: u32) {
        let d = &mut self.dims;
        match self.param_words {
            0 => self.input_offset = in0 as i32,
            1 => { d.batches = in0 as usize; d.input_height = in1 as usize; }
            2 => { d.input_width = in0 as usize; d.input_depth = in1 as usize; }
            3 => { d.output_depth = in0 as usize; d.filter_height = in1 as usize; }
            4 => { d.filter_width = in0 as usize; d.filter_input_depth = in1 as usize; }
            _ => { d.dilation_width = in0 as i32; d.dilation_height = in1 as i32; }
        }
        self.param_words += 1;
    }

    fn push_bytes(dst: &mut Vec<i8>, capacity: usize, stream: &'static str, bytes: &[i8]) -> Result<(), ChannelError> {
        if dst.len() + bytes.len() > capacity {
            return Err(ChannelError::Overrun { stream, capacity });
        }
        dst.extend_from_slice(bytes);
        Ok(())
    }

    fn bulk(in0: u32, in1: u32) -> [i8; BULK_BYTES] {
        let mut out = [0i8; BULK_BYTES];
        out[..4].copy_from_slice(&unpack_word(in0));
        out[4..].copy_from_slice(&unpack_word(in1));
        out
    }

    fn accumulate(&self) -> Result<i32, ChannelError> {
        let d = &self.dims;
        let x0 = self.coords[0] as i32;
        let y0 = self.coords[1] as i32;
        let batch = self.coords[2] as usize;
        let out_channel = self.coords[3] as usize;
        let group = self.coords[4] as usize;
        let channel_base = group * d.filter_input_depth;
        if batch >= d.batches || out_channel >= d.output_depth || channel_base + d.filter_input_depth > d.input_depth {
            return Err(ChannelError::OperandRange { op: Opcode::Accumulate, batch, channel: out_channel, group });
        }

        let mut acc: i32 = 0;
        for fy in 0..d.filter_height {
            let in_y = y0 + d.dilation_height * fy as i32;
            if in_y < 0 || in_y >= d.input_height as i32 { continue; }
            for fx in 0..d.filter_width {
                let in_x = x0 + d.dilation_width * fx as i32;
                if in_x < 0 || in_x >= d.input_width as i32 { continue; }
                let input_row = ((batch * d.input_height + in_y as usize) * d.input_width + in_x as usize) * d.input_depth + channel_base;
                let filter_row = ((out_channel * d.filter_height + fy) * d.filter_width + fx) * d.filter_input_depth;
                for ic in 0..d.filter_input_depth {
                    let iv = self.input[input_row + ic] as i32 + self.input_offset;
                    let fv = self.filter[filter_row + ic] as i32;
                    // 32-bit MAC register wraps like the hardware adder
                    acc = acc.wrapping_add(fv.wrapping_mul(iv));
                }
            }
        }
        Ok(acc)
    }

    fn step(&mut self, op: Opcode, in0: u32, in1: u32) -> Result<u32, ChannelError> {
        match op {
            Opcode::Reset => self.reset(),
            Opcode::SetParam => {
                self.require(op, self.phase == Phase::Params && self.param_words < PARAM_WORDS)?;
                self.set_param(in0, in1);
            }
            Opcode::FilterBegin => {
                self.require(op, self.phase == Phase::Params && self.param_words == PARAM_WORDS)?;
                self.filter.reserve(self.dims.filter_len());
                self.phase = Phase::Filter;
            }
            Opcode::FilterBulk | Opcode::FilterTail => {
                self.require(op, self.phase == Phase::Filter)?;
                let cap = self.dims.filter_len();
                if op == Opcode::FilterBulk {
                    Self::push_bytes(&mut self.filter, cap, "filter", &Self::bulk(in0, in1))?;
                } else {
                    Self::push_bytes(&mut self.filter, cap, "filter", &[in0 as u8 as i8])?;
                }
            }
            Opcode::InputBegin => {
                self.require(op, self.phase == Phase::Filter && self.filter.len() == self.dims.filter_len())?;
                self.input.reserve(self.dims.input_len());
                self.phase = Phase::Input;
            }
            Opcode::InputBulk | Opcode::InputTail => {
                self.require(op, self.phase == Phase::Input)?;
                let cap = self.dims.input_len();
                if op == Opcode::InputBulk {
                    Self::push_bytes(&mut self.input, cap, "input", &Self::bulk(in0, in1))?;
                } else {
                    Self::push_bytes(&mut self.input, cap, "input", &[in0 as u8 as i8])?;
                }
            }
            Opcode::ParamReset => {
                let staged = self.phase == Phase::Dispatch
                    || (self.phase == Phase::Input && self.input.len() == self.dims.input_len());
                self.require(op, staged)?;
                self.phase = Phase::Dispatch;
                self.coord_words = 0;
            }
            Opcode::SetCoord => {
                self.require(op, self.phase == Phase::Dispatch && self.coord_words < COORD_WORDS)?;
                self.coords[2 * self.coord_words] = in0;
                self.coords[2 * self.coord_words + 1] = in1;
                self.coord_words += 1;
            }
            Opcode::Accumulate => {
                self.require(op, self.phase == Phase::Dispatch && self.coord_words == COORD_WORDS)?;
                self.stats.accumulates += 1;
                return self.accumulate().map(|acc| acc as u32);
            }
        }
        Ok(0)
    }
}

impl InstructionChannel for CfuEmulator {
    fn execute(&mut self, op: Opcode, in0: u32, in1: u32) -> Result<u32, ChannelError> {
        self.stats.instructions += 1;
        trace!("cfu {:?} {:#010x} {:#010x}", op, in0, in1);
        let out = self.step(op, in0, in1).map_err(|e| {
            warn!("cfu rejected {:?}: {}", op, e);
            e
        })?;
        match op {
            Opcode::FilterBulk | Opcode::InputBulk => self.stats.staged_bytes += BULK_BYTES as u64,
            Opcode::FilterTail | Opcode::InputTail => self.stats.staged_bytes += 1,
            _ => {}
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configure(emu: &mut CfuEmulator, dims: [(u32, u32); 5], offset: i32) {
        emu.execute(Opcode::Reset, 0, 0).unwrap();
        emu.execute(Opcode::SetParam, offset as u32, 0).unwrap();
        for (a, b) in dims {
            emu.execute(Opcode::SetParam, a, b).unwrap();
        }
    }

    #[test]
    fn anything_before_reset_is_rejected() {
        let mut emu = CfuEmulator::new();
        assert_eq!(
            emu.execute(Opcode::FilterBegin, 0, 0),
            Err(ChannelError::OutOfOrder { op: Opcode::FilterBegin, state: "not reset" })
        );
        assert_eq!(emu.execute_raw(42, 0, 0), Err(ChannelError::UnknownOpcode(42)));
    }

    #[test]
    fn accumulates_single_tap() {
        let mut emu = CfuEmulator::new();
        // 1x1x1x1 input, 1x1x1x1 filter, offset 3
        configure(&mut emu, [(1, 1), (1, 1), (1, 1), (1, 1), (1, 1)], 3);
        emu.execute(Opcode::FilterBegin, 0, 0).unwrap();
        emu.execute(Opcode::FilterTail, (-2i8) as u8 as u32, 0).unwrap();
        emu.execute(Opcode::InputBegin, 0, 0).unwrap();
        emu.execute(Opcode::InputTail, 5, 0).unwrap();
        emu.execute(Opcode::ParamReset, 0, 0).unwrap();
        emu.execute(Opcode::SetCoord, 0, 0).unwrap();
        emu.execute(Opcode::SetCoord, 0, 0).unwrap();
        emu.execute(Opcode::SetCoord, 0, 0).unwrap();
        assert_eq!(emu.execute(Opcode::Accumulate, 0, 0).unwrap() as i32, -16);
        // a fourth coordinate word is a protocol error
        assert!(matches!(emu.execute(Opcode::SetCoord, 0, 0), Err(ChannelError::OutOfOrder { .. })));
        let s = emu.stats();
        assert_eq!(s.accumulates, 1);
        assert_eq!(s.staged_bytes, 2);
        assert_eq!(s.resets, 1);
    }

    #[test]
    fn bulk_past_capacity_overruns() {
        let mut emu = CfuEmulator::new();
        // filter holds 4 elements
        configure(&mut emu, [(1, 1), (1, 1), (1, 1), (1, 4), (1, 1)], 0);
        emu.execute(Opcode::FilterBegin, 0, 0).unwrap();
        assert_eq!(
            emu.execute(Opcode::FilterBulk, 0, 0),
            Err(ChannelError::Overrun { stream: "filter", capacity: 4 })
        );
        assert_eq!(emu.stats().staged_bytes, 0);
        emu.execute(Opcode::FilterTail, 1, 0).unwrap();
        // input stream not begun yet
        assert!(emu.execute(Opcode::InputTail, 1, 0).is_err());
        assert_eq!(emu.stats().staged_bytes, 1);
    }

    #[test]
    fn input_begin_waits_for_full_filter() {
        let mut emu = CfuEmulator::new();
        configure(&mut emu, [(1, 1), (1, 1), (1, 1), (1, 2), (1, 1)], 0);
        emu.execute(Opcode::FilterBegin, 0, 0).unwrap();
        emu.execute(Opcode::FilterTail, 1, 0).unwrap();
        assert_eq!(
            emu.execute(Opcode::InputBegin, 0, 0),
            Err(ChannelError::OutOfOrder { op: Opcode::InputBegin, state: "loading filter" })
        );
    }
}
