// Quantized grouped convolution: software reference + custom-instruction accelerator path
pub mod case;
pub mod cfu;
pub mod check;
pub mod conv;
pub mod error;
pub mod params;
pub mod quant;
pub mod shape;

pub use conv::{conv_accelerated, conv_per_channel, conv_reference, Backend, ConvProblem, QuantElement};
pub use error::{ChannelError, ConvError};
pub use params::{ActivationRange, ConvParams, Dilation, Padding, PerChannelQuant, Stride};
pub use shape::{Shape4, TensorView};
