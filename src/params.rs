use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConvError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stride {
    pub height: i32,
    pub width: i32,
}

impl Default for Stride {
    fn default() -> Self { Self { height: 1, width: 1 } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dilation {
    pub height: i32,
    pub width: i32,
}

impl Default for Dilation {
    fn default() -> Self { Self { height: 1, width: 1 } }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Padding {
    pub height: i32,
    pub width: i32,
}

/// Inclusive clamp applied after requantization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRange {
    pub min: i32,
    pub max: i32,
}

impl Default for ActivationRange {
    fn default() -> Self { Self { min: i8::MIN as i32, max: i8::MAX as i32 } }
}

impl ActivationRange {
    pub fn new(min: i32, max: i32) -> Self { Self { min, max } }

    pub fn full<E: crate::conv::QuantElement>() -> Self { Self { min: E::MIN, max: E::MAX } }
}

/// Convolution parameter block, fixed for one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvParams {
    pub stride: Stride,
    pub dilation: Dilation,
    pub padding: Padding,
    /// Added to every input sample before the multiply (8-bit path only).
    pub input_offset: i32,
    pub output_offset: i32,
    pub activation: ActivationRange,
}

impl ConvParams {
    pub(crate) fn validate(&self) -> Result<(), ConvError> {
        if self.stride.height < 1 || self.stride.width < 1 {
            return Err(ConvError::NonPositive { what: "stride", height: self.stride.height, width: self.stride.width });
        }
        if self.dilation.height < 1 || self.dilation.width < 1 {
            return Err(ConvError::NonPositive { what: "dilation", height: self.dilation.height, width: self.dilation.width });
        }
        if self.padding.height < 0 || self.padding.width < 0 {
            return Err(ConvError::NegativePadding { height: self.padding.height, width: self.padding.width });
        }
        Ok(())
    }
}

impl fmt::Display for ConvParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stride={}x{} dilation={}x{} pad={}x{} input_offset={} output_offset={} act=[{}, {}]",
            self.stride.height, self.stride.width,
            self.dilation.height, self.dilation.width,
            self.padding.height, self.padding.width,
            self.input_offset, self.output_offset,
            self.activation.min, self.activation.max,
        )
    }
}

/// Parallel per-output-channel multiplier/shift tables.
#[derive(Debug, Clone, Copy)]
pub struct PerChannelQuant<'a> {
    pub multipliers: &'a [i32],
    pub shifts: &'a [i32],
}

impl<'a> PerChannelQuant<'a> {
    pub fn new(multipliers: &'a [i32], shifts: &'a [i32]) -> Self { Self { multipliers, shifts } }

    pub(crate) fn validate(&self, output_depth: usize) -> Result<(), ConvError> {
        if self.multipliers.len() != output_depth {
            return Err(ConvError::PerChannelLength { what: "output multiplier", got: self.multipliers.len(), expected: output_depth });
        }
        if self.shifts.len() != output_depth {
            return Err(ConvError::PerChannelLength { what: "output shift", got: self.shifts.len(), expected: output_depth });
        }
        for (channel, (&multiplier, &shift)) in self.multipliers.iter().zip(self.shifts).enumerate() {
            if multiplier < 0 { return Err(ConvError::NegativeMultiplier { channel, multiplier }); }
            if !(-31..=7).contains(&shift) { return Err(ConvError::ShiftRange { channel, shift }); }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_deserialize_with_defaults() {
        let p: ConvParams = serde_json::from_str(r#"{"padding": {"height": 1, "width": 2}, "input_offset": 128}"#).unwrap();
        assert_eq!(p.stride, Stride { height: 1, width: 1 });
        assert_eq!(p.dilation, Dilation { height: 1, width: 1 });
        assert_eq!(p.padding, Padding { height: 1, width: 2 });
        assert_eq!(p.input_offset, 128);
        assert_eq!(p.activation, ActivationRange::new(-128, 127));
    }

    #[test]
    fn zero_stride_is_rejected() {
        let mut p = ConvParams::default();
        p.stride.width = 0;
        assert!(matches!(p.validate(), Err(ConvError::NonPositive { what: "stride", .. })));
    }

    #[test]
    fn per_channel_tables_checked() {
        let q = PerChannelQuant::new(&[1 << 30, 1 << 30], &[0]);
        assert_eq!(q.validate(2), Err(ConvError::PerChannelLength { what: "output shift", got: 1, expected: 2 }));
        let q = PerChannelQuant::new(&[1 << 30], &[9]);
        assert_eq!(q.validate(1), Err(ConvError::ShiftRange { channel: 0, shift: 9 }));
    }
}
