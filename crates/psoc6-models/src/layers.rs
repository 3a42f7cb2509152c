//! Shape-typed q7 layer parameters.
//!
//! Every layer carries its geometry as const generics, so the element counts
//! of weights, inputs and outputs are associated constants. Chaining layers
//! with mismatched shapes fails at compile time (see [`crate::cifar10`]);
//! tensors loaded at runtime are checked against the same constants.

use crate::error::{ModelError, Result};
use crate::weights::Xorshift32;
use bytes::Bytes;

/// Fixed-point shifts chosen at export time for one layer.
///
/// The accumulator of a layer starts at `(bias << bias_lshift) + round`,
/// where `round = 1 << (out_rshift - 1)`, and the sum is shifted right by
/// `out_rshift` before saturating to q7. These must match the values used
/// when the weights were quantized; nothing checks that at runtime. Both
/// shifts must be below 32, which [`QuantShifts::validate`] enforces for
/// every layer built at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuantShifts {
    /// Left shift applied to the bias before accumulation.
    pub bias_lshift: u32,
    /// Right shift applied to the accumulator.
    pub out_rshift: u32,
}

impl QuantShifts {
    /// Largest shift an `i32` accumulator can take.
    pub const MAX: u32 = 31;

    /// Create a shift pair.
    pub const fn new(bias_lshift: u32, out_rshift: u32) -> Self {
        Self {
            bias_lshift,
            out_rshift,
        }
    }

    /// Check both shifts against [`QuantShifts::MAX`].
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ParseError`] naming `layer` if either shift is
    /// out of range.
    pub fn validate(self, layer: &str) -> Result<Self> {
        for (what, shift) in [("bias shift", self.bias_lshift), ("output shift", self.out_rshift)] {
            if shift > Self::MAX {
                return Err(ModelError::parse_error(format!(
                    "{layer}: {what} {shift} out of range 0..={}",
                    Self::MAX
                )));
            }
        }
        Ok(self)
    }

    /// Half-up rounding term added before the right shift.
    pub const fn round_bias(self) -> i32 {
        if self.out_rshift == 0 {
            0
        } else {
            1 << (self.out_rshift - 1)
        }
    }

    /// Accumulator seed for one output: shifted bias plus rounding term.
    pub const fn seed(self, bias: i8) -> i32 {
        ((bias as i32) << self.bias_lshift).wrapping_add(self.round_bias())
    }
}

fn checked(layer: &str, tensor: &str, data: Bytes, expected: usize) -> Result<Bytes> {
    if data.len() == expected {
        Ok(data)
    } else {
        Err(ModelError::shape_mismatch(
            format!("{layer}.{tensor}"),
            expected,
            data.len(),
        ))
    }
}

/// HWC q7 convolution with square kernels.
///
/// Weights are laid out `[out_ch][ky][kx][in_ch]`, one `i8` bias per output
/// channel.
#[derive(Debug, Clone)]
pub struct Conv2d<
    const IN_DIM: usize,
    const IN_CH: usize,
    const OUT_CH: usize,
    const KERNEL: usize,
    const PAD: usize,
    const STRIDE: usize,
    const OUT_DIM: usize,
> {
    weights: Bytes,
    bias: Bytes,
    shifts: QuantShifts,
}

impl<
        const IN_DIM: usize,
        const IN_CH: usize,
        const OUT_CH: usize,
        const KERNEL: usize,
        const PAD: usize,
        const STRIDE: usize,
        const OUT_DIM: usize,
    > Conv2d<IN_DIM, IN_CH, OUT_CH, KERNEL, PAD, STRIDE, OUT_DIM>
{
    /// Elements in the input activation map.
    pub const INPUT_LEN: usize = IN_DIM * IN_DIM * IN_CH;
    /// Elements in the output activation map.
    pub const OUTPUT_LEN: usize = OUT_DIM * OUT_DIM * OUT_CH;
    /// Elements in the weight tensor.
    pub const WEIGHT_LEN: usize = OUT_CH * KERNEL * KERNEL * IN_CH;
    /// Elements in one im2col column.
    pub const COLUMN_LEN: usize = KERNEL * KERNEL * IN_CH;

    const GEOMETRY: () = assert!(
        STRIDE > 0
            && IN_DIM + 2 * PAD >= KERNEL
            && OUT_DIM == (IN_DIM + 2 * PAD - KERNEL) / STRIDE + 1,
        "convolution output size does not follow from its geometry"
    );

    /// Build a layer from raw `i8` weight and bias bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ShapeMismatch`] if either tensor has the wrong
    /// length, or [`ModelError::ParseError`] if a shift is out of range.
    pub fn new(
        name: &str,
        weights: impl Into<Bytes>,
        bias: impl Into<Bytes>,
        shifts: QuantShifts,
    ) -> Result<Self> {
        let () = Self::GEOMETRY;
        Ok(Self {
            weights: checked(name, "weights", weights.into(), Self::WEIGHT_LEN)?,
            bias: checked(name, "bias", bias.into(), OUT_CH)?,
            shifts: shifts.validate(name)?,
        })
    }

    pub(crate) fn generated(rng: &mut Xorshift32, shifts: QuantShifts) -> Self {
        let () = Self::GEOMETRY;
        Self {
            weights: rng.q7_bytes(Self::WEIGHT_LEN),
            bias: rng.q7_bytes(OUT_CH),
            shifts,
        }
    }

    /// Weight tensor as q7.
    pub fn weights(&self) -> &[i8] {
        bytemuck::cast_slice(&self.weights[..])
    }

    /// Bias vector as q7.
    pub fn bias(&self) -> &[i8] {
        bytemuck::cast_slice(&self.bias[..])
    }

    /// Weights of one output channel.
    pub fn filter(&self, out_ch: usize) -> &[i8] {
        let len = Self::COLUMN_LEN;
        &self.weights()[out_ch * len..(out_ch + 1) * len]
    }

    /// Quantization shifts.
    pub const fn shifts(&self) -> QuantShifts {
        self.shifts
    }

    pub(crate) fn raw_parts(&self) -> (&Bytes, &Bytes) {
        (&self.weights, &self.bias)
    }
}

/// HWC max pooling over square windows.
///
/// Output size uses ceil mode; windows that run past the input edge are
/// clamped to it. Pooling has no parameters, only shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxPool2d<
    const IN_DIM: usize,
    const CH: usize,
    const KERNEL: usize,
    const PAD: usize,
    const STRIDE: usize,
    const OUT_DIM: usize,
>;

impl<
        const IN_DIM: usize,
        const CH: usize,
        const KERNEL: usize,
        const PAD: usize,
        const STRIDE: usize,
        const OUT_DIM: usize,
    > MaxPool2d<IN_DIM, CH, KERNEL, PAD, STRIDE, OUT_DIM>
{
    /// Elements in the input activation map.
    pub const INPUT_LEN: usize = IN_DIM * IN_DIM * CH;
    /// Elements in the output activation map.
    pub const OUTPUT_LEN: usize = OUT_DIM * OUT_DIM * CH;

    const GEOMETRY: () = assert!(
        STRIDE > 0
            && IN_DIM + 2 * PAD >= KERNEL
            && OUT_DIM == (IN_DIM + 2 * PAD - KERNEL).div_ceil(STRIDE) + 1,
        "pooling output size does not follow from its geometry"
    );

    /// Create the (parameterless) pooling stage.
    pub const fn new() -> Self {
        let () = Self::GEOMETRY;
        Self
    }
}

/// Fully-connected q7 layer, weights `[out][in]` row-major.
#[derive(Debug, Clone)]
pub struct Dense<const IN: usize, const OUT: usize> {
    weights: Bytes,
    bias: Bytes,
    shifts: QuantShifts,
}

impl<const IN: usize, const OUT: usize> Dense<IN, OUT> {
    /// Input features.
    pub const INPUT_LEN: usize = IN;
    /// Output features.
    pub const OUTPUT_LEN: usize = OUT;
    /// Elements in the weight matrix.
    pub const WEIGHT_LEN: usize = IN * OUT;

    /// Build a layer from raw `i8` weight and bias bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ShapeMismatch`] if either tensor has the wrong
    /// length, or [`ModelError::ParseError`] if a shift is out of range.
    pub fn new(
        name: &str,
        weights: impl Into<Bytes>,
        bias: impl Into<Bytes>,
        shifts: QuantShifts,
    ) -> Result<Self> {
        Ok(Self {
            weights: checked(name, "weights", weights.into(), Self::WEIGHT_LEN)?,
            bias: checked(name, "bias", bias.into(), OUT)?,
            shifts: shifts.validate(name)?,
        })
    }

    pub(crate) fn generated(rng: &mut Xorshift32, shifts: QuantShifts) -> Self {
        Self {
            weights: rng.q7_bytes(Self::WEIGHT_LEN),
            bias: rng.q7_bytes(OUT),
            shifts,
        }
    }

    /// Weight matrix as q7.
    pub fn weights(&self) -> &[i8] {
        bytemuck::cast_slice(&self.weights[..])
    }

    /// Bias vector as q7.
    pub fn bias(&self) -> &[i8] {
        bytemuck::cast_slice(&self.bias[..])
    }

    /// Weight row of one output.
    pub fn row(&self, out: usize) -> &[i8] {
        &self.weights()[out * IN..(out + 1) * IN]
    }

    /// Quantization shifts.
    pub const fn shifts(&self) -> QuantShifts {
        self.shifts
    }

    pub(crate) fn raw_parts(&self) -> (&Bytes, &Bytes) {
        (&self.weights, &self.bias)
    }
}
