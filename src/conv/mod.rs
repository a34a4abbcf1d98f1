//! Per-channel quantized grouped convolution.
//!
//! One driver walks the output tensor and owns bias, requantization and
//! clamping. The innermost reduction is delegated to a [`MacEngine`]:
//! [`SoftwareMac`] computes it in memory, [`CfuMac`] offloads it through an
//! instruction channel. Everything outside the reduction is shared, so both
//! engines produce identical outputs for identical accumulators.

pub mod accel;
pub mod reference;

pub use accel::CfuMac;
pub use reference::SoftwareMac;

use log::debug;
use std::fmt::{self, Debug};

use crate::cfu::InstructionChannel;
use crate::error::ConvError;
use crate::params::{ConvParams, PerChannelQuant};
use crate::quant::{Accumulator, Requantizer};
use crate::shape::{offset, Shape4, TensorView};

/// Activation sample type. Filters are always `i8`.
pub trait QuantElement: Copy + Default + Debug + PartialEq + Send + Sync + 'static {
    type Acc: Accumulator;
    const NAME: &'static str;
    const MIN: i32;
    const MAX: i32;
    /// Asymmetric activations carry an input zero point; symmetric ones ignore it.
    const USES_INPUT_OFFSET: bool;

    fn to_i32(self) -> i32;
    /// Caller guarantees `v` lies in `[MIN, MAX]`.
    fn from_clamped(v: i32) -> Self;
}

impl QuantElement for i8 {
    type Acc = i32;
    const NAME: &'static str = "int8";
    const MIN: i32 = i8::MIN as i32;
    const MAX: i32 = i8::MAX as i32;
    const USES_INPUT_OFFSET: bool = true;

    #[inline]
    fn to_i32(self) -> i32 { self as i32 }
    #[inline]
    fn from_clamped(v: i32) -> Self { v as i8 }
}

impl QuantElement for i16 {
    type Acc = i64;
    const NAME: &'static str = "int16";
    const MIN: i32 = i16::MIN as i32;
    const MAX: i32 = i16::MAX as i32;
    const USES_INPUT_OFFSET: bool = false;

    #[inline]
    fn to_i32(self) -> i32 { self as i32 }
    #[inline]
    fn from_clamped(v: i32) -> Self { v as i16 }
}

/// Everything one invocation reads. Buffers stay owned by the caller.
#[derive(Debug, Clone, Copy)]
pub struct ConvProblem<'a, E: QuantElement> {
    pub params: &'a ConvParams,
    pub quant: PerChannelQuant<'a>,
    pub input: TensorView<'a, E>,
    pub filter: TensorView<'a, i8>,
    pub bias: Option<TensorView<'a, E::Acc>>,
    pub output_shape: Shape4,
}

impl<'a, E: QuantElement> ConvProblem<'a, E> {
    /// Input zero point as the reduction should apply it.
    #[inline]
    pub fn effective_input_offset(&self) -> i32 {
        if E::USES_INPUT_OFFSET { self.params.input_offset } else { 0 }
    }
}

/// Dimensions derived from the four shapes once they have been checked against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub batches: usize,
    pub input_height: usize,
    pub input_width: usize,
    pub input_depth: usize,
    pub filter_height: usize,
    pub filter_width: usize,
    pub filter_input_depth: usize,
    pub output_height: usize,
    pub output_width: usize,
    pub output_depth: usize,
    pub groups: usize,
    pub filters_per_group: usize,
}

impl ConvGeometry {
    /// Run every precondition check. Nothing is computed if this fails.
    pub fn resolve<E: QuantElement>(problem: &ConvProblem<'_, E>, output_len: usize) -> Result<Self, ConvError> {
        let params = problem.params;
        params.validate()?;
        let act = params.activation;
        if act.min > act.max || act.min < E::MIN || act.max > E::MAX {
            return Err(ConvError::ActivationRange { min: act.min, max: act.max, element: E::NAME });
        }
        if E::USES_INPUT_OFFSET && !(-MAX_INPUT_OFFSET..=MAX_INPUT_OFFSET).contains(&params.input_offset) {
            return Err(ConvError::InputOffsetRange { offset: params.input_offset, limit: MAX_INPUT_OFFSET });
        }

        let input = problem.input.shape;
        let filter = problem.filter.shape;
        let output = problem.output_shape;
        if input.batches() != output.batches() {
            return Err(ConvError::BatchMismatch { input: input.batches(), output: output.batches() });
        }
        let output_depth = output.depth();
        if filter.dim(0) != output_depth {
            return Err(ConvError::OutputDepthMismatch { filter: filter.dim(0), output: output_depth });
        }
        let filter_input_depth = filter.depth();
        if filter_input_depth == 0 || input.depth() == 0 || input.depth() % filter_input_depth != 0 {
            return Err(ConvError::GroupDivision { input_depth: input.depth(), filter_input_depth });
        }
        let groups = input.depth() / filter_input_depth;
        if output_depth % groups != 0 {
            return Err(ConvError::FiltersPerGroup { output_depth, groups });
        }

        problem.quant.validate(output_depth)?;
        problem.input.check_len("input")?;
        problem.filter.check_len("filter")?;
        if let Some(bias) = &problem.bias {
            bias.check_len("bias")?;
            if bias.data.len() != output_depth {
                return Err(ConvError::PerChannelLength { what: "bias", got: bias.data.len(), expected: output_depth });
            }
        }
        if output_len != output.flat_size() {
            return Err(ConvError::BufferLength { tensor: "output", got: output_len, expected: output.flat_size() });
        }

        Ok(Self {
            batches: input.batches(),
            input_height: input.height(),
            input_width: input.width(),
            input_depth: input.depth(),
            filter_height: filter.height(),
            filter_width: filter.width(),
            filter_input_depth,
            output_height: output.height(),
            output_width: output.width(),
            output_depth,
            groups,
            filters_per_group: output_depth / groups,
        })
    }
}

/// One output element being produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSite {
    pub batch: usize,
    pub out_y: usize,
    pub out_x: usize,
    pub out_channel: usize,
    pub group: usize,
    /// Top-left input coordinate of the receptive field; may be negative inside padding.
    pub in_y_origin: i32,
    pub in_x_origin: i32,
}

/// Backend for the filter-window reduction.
pub trait MacEngine<E: QuantElement> {
    /// Called once per invocation before the first `accumulate`.
    fn stage(&mut self, problem: &ConvProblem<'_, E>, geometry: &ConvGeometry) -> Result<(), ConvError>;

    /// Raw sum over the filter window and the group's input channels, without bias.
    fn accumulate(&mut self, problem: &ConvProblem<'_, E>, geometry: &ConvGeometry, site: &OutputSite) -> Result<E::Acc, ConvError>;
}

/// Run a convolution on `engine`, writing every element of `output`.
pub fn conv_per_channel<E, M>(engine: &mut M, problem: &ConvProblem<'_, E>, output: &mut [E]) -> Result<(), ConvError>
where
    E: QuantElement,
    M: MacEngine<E> + ?Sized,
{
    let geometry = ConvGeometry::resolve(problem, output.len())?;
    debug!(
        "conv {} input={:?} filter={:?} output={:?} groups={} {}",
        E::NAME, problem.input.shape.dims, problem.filter.shape.dims, problem.output_shape.dims, geometry.groups, problem.params
    );

    engine.stage(problem, &geometry)?;

    let params = problem.params;
    let requant = Requantizer::from_params(params);
    let bias = problem.bias.map(|b| b.data);
    for batch in 0..geometry.batches {
        for out_y in 0..geometry.output_height {
            let in_y_origin = out_y as i32 * params.stride.height - params.padding.height;
            for out_x in 0..geometry.output_width {
                let in_x_origin = out_x as i32 * params.stride.width - params.padding.width;
                for out_channel in 0..geometry.output_depth {
                    let site = OutputSite {
                        batch,
                        out_y,
                        out_x,
                        out_channel,
                        group: out_channel / geometry.filters_per_group,
                        in_y_origin,
                        in_x_origin,
                    };
                    let acc = engine.accumulate(problem, &geometry, &site)?;
                    let value = requant.apply(
                        acc,
                        bias.map(|b| b[out_channel]),
                        problem.quant.multipliers[out_channel],
                        problem.quant.shifts[out_channel],
                    );
                    output[offset(&problem.output_shape, batch, out_y, out_x, out_channel)] = E::from_clamped(value);
                }
            }
        }
    }
    Ok(())
}

/// Software reference path, available for every element width.
pub fn conv_reference<E: QuantElement>(problem: &ConvProblem<'_, E>, output: &mut [E]) -> Result<(), ConvError> {
    conv_per_channel(&mut SoftwareMac, problem, output)
}

/// Accelerated 8-bit path: stage into the accelerator behind `channel`, then dispatch per output.
pub fn conv_accelerated<C: InstructionChannel + ?Sized>(
    channel: &mut C,
    problem: &ConvProblem<'_, i8>,
    output: &mut [i8],
) -> Result<(), ConvError> {
    conv_per_channel(&mut CfuMac::new(channel), problem, output)
}

/// Largest input zero-point magnitude: two int8 zero points apart.
pub const MAX_INPUT_OFFSET: i32 = 255;

/// Backend chosen at the call site.
pub enum Backend<'c> {
    Reference,
    Accelerator(&'c mut dyn InstructionChannel),
}

impl fmt::Debug for Backend<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Reference => f.write_str("Reference"),
            Backend::Accelerator(_) => f.write_str("Accelerator(..)"),
        }
    }
}

impl Backend<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Reference => "reference",
            Backend::Accelerator(_) => "accelerator",
        }
    }

    pub fn run_i8(&mut self, problem: &ConvProblem<'_, i8>, output: &mut [i8]) -> Result<(), ConvError> {
        match self {
            Backend::Reference => conv_reference(problem, output),
            Backend::Accelerator(channel) => conv_accelerated(&mut **channel, problem, output),
        }
    }

    /// The accelerator only reduces 8-bit activations.
    pub fn run_i16(&mut self, problem: &ConvProblem<'_, i16>, output: &mut [i16]) -> Result<(), ConvError> {
        match self {
            Backend::Reference => conv_reference(problem, output),
            Backend::Accelerator(_) => Err(ConvError::AcceleratorUnsupported(i16::NAME)),
        }
    }
}
