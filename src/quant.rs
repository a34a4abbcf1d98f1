//! Fixed-point requantization shared by every convolution backend.
//!
//! Multipliers carry their fixed point at bit 31 and are paired with a
//! power-of-two shift (positive = left). Both come from [`quantize_multiplier`].

use std::fmt::Debug;
use std::ops::{Add, AddAssign};

use crate::error::ConvError;
use crate::params::ConvParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizedMultiplier {
    pub multiplier: i32,
    pub shift: i32,
}

/// Decompose a non-negative real scale into a Q31 multiplier and a shift.
pub fn quantize_multiplier(real: f64) -> Result<QuantizedMultiplier, ConvError> {
    if !real.is_finite() || real < 0.0 {
        return Err(ConvError::InvalidScale(format!("{real}")));
    }
    if real == 0.0 {
        return Ok(QuantizedMultiplier { multiplier: 0, shift: 0 });
    }
    let (mantissa, mut shift) = frexp(real);
    let mut q = (mantissa * (1i64 << 31) as f64).round() as i64;
    debug_assert!(q <= 1i64 << 31);
    if q == 1i64 << 31 {
        q /= 2;
        shift += 1;
    }
    if shift < -31 {
        return Ok(QuantizedMultiplier { multiplier: 0, shift: 0 });
    }
    if shift > 30 {
        return Err(ConvError::InvalidScale(format!("{real}")));
    }
    Ok(QuantizedMultiplier { multiplier: q as i32, shift })
}

// Positive finite input only: returns m in [0.5, 1) with x = m * 2^e.
fn frexp(x: f64) -> (f64, i32) {
    const EXP_MASK: u64 = 0x7ff << 52;
    let mut bits = x.to_bits();
    let mut bias = 0;
    if bits & EXP_MASK == 0 {
        // subnormal: renormalize first
        bits = (x * (1u64 << 54) as f64).to_bits();
        bias = -54;
    }
    let exp = ((bits & EXP_MASK) >> 52) as i32 - 1022;
    let mantissa = f64::from_bits((bits & !EXP_MASK) | (1022u64 << 52));
    (mantissa, exp + bias)
}

/// High 32 bits of `2 * a * b`, rounded, saturating the single overflow case.
#[inline]
pub fn saturating_rounding_doubling_high_mul(a: i32, b: i32) -> i32 {
    if a == b && a == i32::MIN {
        return i32::MAX;
    }
    let ab = a as i64 * b as i64;
    let nudge: i64 = if ab >= 0 { 1 << 30 } else { 1 - (1 << 30) };
    ((ab + nudge) / (1i64 << 31)) as i32
}

/// `x / 2^exponent`, rounding half away from zero.
#[inline]
pub fn rounding_divide_by_pot(x: i32, exponent: u32) -> i32 {
    debug_assert!(exponent <= 31);
    let mask = ((1i64 << exponent) - 1) as i32;
    let remainder = x & mask;
    let threshold = (mask >> 1) + i32::from(x < 0);
    (x >> exponent) + i32::from(remainder > threshold)
}

#[inline]
pub fn multiply_by_quantized_multiplier(x: i32, multiplier: i32, shift: i32) -> i32 {
    let left = shift.max(0) as u32;
    let right = (-shift).max(0) as u32;
    rounding_divide_by_pot(saturating_rounding_doubling_high_mul(x.saturating_mul(1 << left), multiplier), right)
}

/// 64-bit accumulator variant: the multiplier is reduced to 16 bits so the
/// product of a 48-bit accumulator still fits in an i64.
#[inline]
pub fn multiply_by_quantized_multiplier_i64(x: i64, multiplier: i32, shift: i32) -> i32 {
    debug_assert!(multiplier >= 0 && (-31..8).contains(&shift));
    let reduced = if multiplier < 0x7FFF_0000 { (multiplier + (1 << 15)) >> 16 } else { 0x7FFF };
    let total_shift = 15 - shift;
    let round = 1i64 << (total_shift - 1);
    let result = (x.saturating_mul(reduced as i64).saturating_add(round)) >> total_shift;
    result.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Wide integer type a reduction runs in.
pub trait Accumulator: Copy + Default + Debug + PartialEq + Add<Output = Self> + AddAssign + Send + Sync + 'static {
    fn from_i32(v: i32) -> Self;
    /// Scale by a quantized multiplier/shift pair.
    fn scale(self, multiplier: i32, shift: i32) -> i32;
}

impl Accumulator for i32 {
    #[inline]
    fn from_i32(v: i32) -> Self { v }
    #[inline]
    fn scale(self, multiplier: i32, shift: i32) -> i32 { multiply_by_quantized_multiplier(self, multiplier, shift) }
}

impl Accumulator for i64 {
    #[inline]
    fn from_i32(v: i32) -> Self { v as i64 }
    #[inline]
    fn scale(self, multiplier: i32, shift: i32) -> i32 { multiply_by_quantized_multiplier_i64(self, multiplier, shift) }
}

/// Bias, scale, offset and clamp. The only place an accumulator turns into an output sample.
#[derive(Debug, Clone, Copy)]
pub struct Requantizer {
    pub output_offset: i32,
    pub min: i32,
    pub max: i32,
}

impl Requantizer {
    pub fn new(output_offset: i32, min: i32, max: i32) -> Self { Self { output_offset, min, max } }

    pub fn from_params(params: &ConvParams) -> Self {
        Self::new(params.output_offset, params.activation.min, params.activation.max)
    }

    #[inline]
    pub fn apply<A: Accumulator>(&self, acc: A, bias: Option<A>, multiplier: i32, shift: i32) -> i32 {
        let acc = match bias {
            Some(b) => acc + b,
            None => acc,
        };
        let scaled = acc.scale(multiplier, shift).saturating_add(self.output_offset);
        scaled.clamp(self.min, self.max)
    }
}
