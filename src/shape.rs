use serde::{Deserialize, Serialize};

use crate::error::ConvError;

/// Rank-4 NHWC shape. For filters the axes read (out_channel, height, width, in_channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape4 {
    pub dims: [usize; 4],
}

impl Shape4 {
    pub const fn new(d0: usize, d1: usize, d2: usize, d3: usize) -> Self { Self { dims: [d0, d1, d2, d3] } }

    #[inline]
    pub fn dim(&self, axis: usize) -> usize { self.dims[axis] }

    #[inline]
    pub fn batches(&self) -> usize { self.dims[0] }
    #[inline]
    pub fn height(&self) -> usize { self.dims[1] }
    #[inline]
    pub fn width(&self) -> usize { self.dims[2] }
    #[inline]
    pub fn depth(&self) -> usize { self.dims[3] }

    pub fn flat_size(&self) -> usize { self.dims.iter().product() }

    /// Build from a runtime dimension list, rejecting anything but rank 4.
    pub fn from_dims(tensor: &'static str, dims: &[usize]) -> Result<Self, ConvError> {
        match *dims {
            [a, b, c, d] => Ok(Self::new(a, b, c, d)),
            _ => Err(ConvError::DimensionCount { tensor, got: dims.len() }),
        }
    }
}

impl From<[usize; 4]> for Shape4 {
    fn from(dims: [usize; 4]) -> Self { Self { dims } }
}

/// Flat row-major offset of `(i0, i1, i2, i3)` inside `shape`.
#[inline]
pub fn offset(shape: &Shape4, i0: usize, i1: usize, i2: usize, i3: usize) -> usize {
    let [_, d1, d2, d3] = shape.dims;
    debug_assert!(i0 < shape.dims[0] && i1 < d1 && i2 < d2 && i3 < d3, "index out of {:?}", shape.dims);
    ((i0 * d1 + i1) * d2 + i2) * d3 + i3
}

/// Spatial output size for one axis. Returns 0 when the dilated filter does not fit.
pub fn output_extent(input: usize, filter: usize, stride: usize, dilation: usize, pad: usize) -> usize {
    if filter == 0 || stride == 0 { return 0; }
    let effective = dilation * (filter - 1) + 1;
    let padded = input + 2 * pad;
    if padded < effective { return 0; }
    (padded - effective) / stride + 1
}

/// Borrowed tensor: a shape plus the caller-owned flat buffer behind it.
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a, T> {
    pub shape: Shape4,
    pub data: &'a [T],
}

impl<'a, T: Copy> TensorView<'a, T> {
    pub fn new(shape: Shape4, data: &'a [T]) -> Self { Self { shape, data } }

    /// Per-channel vector laid out as `[1, 1, 1, len]`.
    pub fn vector(data: &'a [T]) -> Self { Self { shape: Shape4::new(1, 1, 1, data.len()), data } }

    #[inline]
    pub fn at(&self, i0: usize, i1: usize, i2: usize, i3: usize) -> T { self.data[offset(&self.shape, i0, i1, i2, i3)] }

    pub(crate) fn check_len(&self, tensor: &'static str) -> Result<(), ConvError> {
        let expected = self.shape.flat_size();
        if self.data.len() != expected {
            return Err(ConvError::BufferLength { tensor, got: self.data.len(), expected });
        }
        Ok(())
    }
}
