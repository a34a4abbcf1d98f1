//! Convolution test cases: a JSON description plus seeded tensor generation.

use anyhow::{bail, Context, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::conv::{ConvProblem, QuantElement};
use crate::params::{ActivationRange, ConvParams, Dilation, Padding, PerChannelQuant, Stride};
use crate::quant::{quantize_multiplier, Accumulator};
use crate::shape::{output_extent, Shape4, TensorView};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementWidth {
    #[default]
    Int8,
    Int16,
}

fn default_scales() -> Vec<f64> { vec![0.01] }
fn default_true() -> bool { true }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvCase {
    pub name: String,
    /// [batches, height, width, depth]
    pub input: [usize; 4],
    /// [output depth, height, width, input depth per group]
    pub filter: [usize; 4],
    #[serde(default)]
    pub params: ConvParams,
    /// Real output scale per channel; a single entry applies to all channels.
    #[serde(default = "default_scales")]
    pub scales: Vec<f64>,
    #[serde(default = "default_true")]
    pub bias: bool,
    #[serde(default)]
    pub width: ElementWidth,
    #[serde(default)]
    pub seed: u64,
}

impl ConvCase {
    pub fn load_all<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let f = File::open(&path).with_context(|| format!("open case file: {}", path.as_ref().display()))?;
        let cases: Vec<Self> = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse case file: {}", path.as_ref().display()))?;
        if cases.is_empty() { bail!("case file {} holds no cases", path.as_ref().display()); }
        Ok(cases)
    }

    pub fn input_shape(&self) -> Shape4 { Shape4::from(self.input) }

    pub fn filter_shape(&self) -> Shape4 { Shape4::from(self.filter) }

    /// Output shape implied by explicit padding.
    pub fn output_shape(&self) -> Shape4 {
        let p = &self.params;
        let extent = |input: usize, filter: usize, stride: i32, dilation: i32, pad: i32| {
            output_extent(input, filter, stride.max(1) as usize, dilation.max(1) as usize, pad.max(0) as usize)
        };
        Shape4::new(
            self.input[0],
            extent(self.input[1], self.filter[1], p.stride.height, p.dilation.height, p.padding.height),
            extent(self.input[2], self.filter[2], p.stride.width, p.dilation.width, p.padding.width),
            self.filter[0],
        )
    }

    /// Draw a small random grouped convolution with int8 activations.
    pub fn random(rng: &mut SmallRng, name: String) -> Self {
        loop {
            let groups = rng.gen_range(1..=3usize);
            let filter_input_depth = rng.gen_range(1..=4usize);
            let output_depth = groups * rng.gen_range(1..=3usize);
            let input = [rng.gen_range(1..=2), rng.gen_range(1..=9), rng.gen_range(1..=9), groups * filter_input_depth];
            let filter = [output_depth, rng.gen_range(1..=3), rng.gen_range(1..=3), filter_input_depth];
            let output_offset = rng.gen_range(-128..=127);
            let lo = rng.gen_range(-128..=0);
            let params = ConvParams {
                stride: Stride { height: rng.gen_range(1..=2), width: rng.gen_range(1..=2) },
                dilation: Dilation { height: rng.gen_range(1..=2), width: rng.gen_range(1..=2) },
                padding: Padding { height: rng.gen_range(0..=2), width: rng.gen_range(0..=2) },
                input_offset: rng.gen_range(-127..=128),
                output_offset,
                activation: ActivationRange::new(lo, rng.gen_range(lo..=127)),
            };
            let scales = (0..output_depth).map(|_| rng.gen_range(1e-4..0.05)).collect();
            let case = Self { name: name.clone(), input, filter, params, scales, bias: rng.gen_bool(0.7), width: ElementWidth::Int8, seed: rng.gen() };
            let out = case.output_shape();
            if out.height() > 0 && out.width() > 0 {
                return case;
            }
        }
    }

    /// Generate buffers and quantization tables. Same seed, same tensors.
    pub fn materialize<E: QuantElement>(&self) -> Result<CaseData<E>> {
        let output_shape = self.output_shape();
        if output_shape.flat_size() == 0 {
            bail!("case {}: empty output {:?}", self.name, output_shape.dims);
        }
        let depth = self.filter[0];
        let scales: Vec<f64> = match self.scales.len() {
            1 => vec![self.scales[0]; depth],
            n if n == depth => self.scales.clone(),
            n => bail!("case {}: {} scales for {} output channels", self.name, n, depth),
        };
        let mut multipliers = Vec::with_capacity(depth);
        let mut shifts = Vec::with_capacity(depth);
        for s in scales {
            let q = quantize_multiplier(s).with_context(|| format!("case {}: scale {}", self.name, s))?;
            multipliers.push(q.multiplier);
            shifts.push(q.shift);
        }

        let mut rng = SmallRng::seed_from_u64(self.seed);
        let input_shape = self.input_shape();
        let filter_shape = self.filter_shape();
        let input = (0..input_shape.flat_size()).map(|_| E::from_clamped(rng.gen_range(E::MIN..=E::MAX))).collect();
        let filter = (0..filter_shape.flat_size()).map(|_| rng.gen_range(-127i8..=127)).collect();
        let bias = self.bias.then(|| (0..depth).map(|_| E::Acc::from_i32(rng.gen_range(-4096..=4096))).collect());

        Ok(CaseData { params: self.params, multipliers, shifts, input_shape, input, filter_shape, filter, bias, output_shape })
    }
}

/// Owned buffers for one case.
#[derive(Debug, Clone)]
pub struct CaseData<E: QuantElement> {
    pub params: ConvParams,
    pub multipliers: Vec<i32>,
    pub shifts: Vec<i32>,
    pub input_shape: Shape4,
    pub input: Vec<E>,
    pub filter_shape: Shape4,
    pub filter: Vec<i8>,
    pub bias: Option<Vec<E::Acc>>,
    pub output_shape: Shape4,
}

impl<E: QuantElement> CaseData<E> {
    pub fn problem(&self) -> ConvProblem<'_, E> {
        ConvProblem {
            params: &self.params,
            quant: PerChannelQuant::new(&self.multipliers, &self.shifts),
            input: TensorView::new(self.input_shape, &self.input),
            filter: TensorView::new(self.filter_shape, &self.filter),
            bias: self.bias.as_deref().map(TensorView::vector),
            output_shape: self.output_shape,
        }
    }

    pub fn output_buffer(&self) -> Vec<E> { vec![E::default(); self.output_shape.flat_size()] }
}
