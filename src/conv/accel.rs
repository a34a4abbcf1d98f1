use log::trace;

use super::{ConvGeometry, ConvProblem, MacEngine, OutputSite};
use crate::cfu::{pack_word, InstructionChannel, Opcode, BULK_BYTES};
use crate::error::ConvError;

/// Reduction offloaded to an accelerator. Borrows the channel for one invocation.
///
/// Ordering is enforced by the accelerator, not here: dispatching before
/// `stage` is a protocol error the channel reports.
pub struct CfuMac<'c, C: InstructionChannel + ?Sized> {
    channel: &'c mut C,
}

impl<'c, C: InstructionChannel + ?Sized> CfuMac<'c, C> {
    pub fn new(channel: &'c mut C) -> Self { Self { channel } }

    #[inline]
    fn issue(&mut self, op: Opcode, in0: u32, in1: u32) -> Result<u32, ConvError> {
        Ok(self.channel.execute(op, in0, in1)?)
    }
}

fn operand(what: &'static str, value: usize) -> Result<u32, ConvError> {
    u32::try_from(value).map_err(|_| ConvError::OperandOverflow { what, value: value as i64 })
}

/// Reset the accelerator and push the static parameter tuple.
pub fn stage_params<C: InstructionChannel + ?Sized>(
    channel: &mut C,
    problem: &ConvProblem<'_, i8>,
    g: &ConvGeometry,
) -> Result<(), ConvError> {
    let dilation = problem.params.dilation;
    let pairs = [
        (operand("batches", g.batches)?, operand("input height", g.input_height)?),
        (operand("input width", g.input_width)?, operand("input depth", g.input_depth)?),
        (operand("output depth", g.output_depth)?, operand("filter height", g.filter_height)?),
        (operand("filter width", g.filter_width)?, operand("filter input depth", g.filter_input_depth)?),
        (dilation.width as u32, dilation.height as u32),
    ];
    channel.execute(Opcode::Reset, 0, 0)?;
    channel.execute(Opcode::SetParam, problem.params.input_offset as u32, 0)?;
    for (in0, in1) in pairs {
        channel.execute(Opcode::SetParam, in0, in1)?;
    }
    Ok(())
}

/// Stream a flattened tensor: 8 bytes per bulk call, the remainder one byte per tail call.
pub fn stage_stream<C: InstructionChannel + ?Sized>(
    channel: &mut C,
    begin: Opcode,
    bulk: Opcode,
    tail: Opcode,
    data: &[i8],
) -> Result<(), ConvError> {
    channel.execute(begin, 0, 0)?;
    let mut chunks = data.chunks_exact(BULK_BYTES);
    for chunk in chunks.by_ref() {
        channel.execute(bulk, pack_word(&chunk[..4]), pack_word(&chunk[4..]))?;
    }
    for &b in chunks.remainder() {
        channel.execute(tail, b as u8 as u32, 0)?;
    }
    trace!("{:?}: {} bulk + {} tail", begin, data.len() / BULK_BYTES, data.len() % BULK_BYTES);
    Ok(())
}

impl<C: InstructionChannel + ?Sized> MacEngine<i8> for CfuMac<'_, C> {
    fn stage(&mut self, problem: &ConvProblem<'_, i8>, geometry: &ConvGeometry) -> Result<(), ConvError> {
        stage_params(&mut *self.channel, problem, geometry)?;
        stage_stream(&mut *self.channel, Opcode::FilterBegin, Opcode::FilterBulk, Opcode::FilterTail, problem.filter.data)?;
        stage_stream(&mut *self.channel, Opcode::InputBegin, Opcode::InputBulk, Opcode::InputTail, problem.input.data)?;
        Ok(())
    }

    fn accumulate(&mut self, _problem: &ConvProblem<'_, i8>, _geometry: &ConvGeometry, site: &OutputSite) -> Result<i32, ConvError> {
        self.issue(Opcode::ParamReset, 0, 0)?;
        self.issue(Opcode::SetCoord, site.in_x_origin as u32, site.in_y_origin as u32)?;
        self.issue(Opcode::SetCoord, operand("batch", site.batch)?, operand("output channel", site.out_channel)?)?;
        self.issue(Opcode::SetCoord, operand("group", site.group)?, 0)?;
        Ok(self.issue(Opcode::Accumulate, 0, 0)? as i32)
    }
}
