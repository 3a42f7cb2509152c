//! CIFAR-10 network geometry and quantization metadata.
//!
//! Values are the CMSIS-NN CIFAR-10 example network the M4 runs. They are
//! fixed at model-export time; the weights they describe are supplied from
//! outside (see `psoc6-models`).
//!
//! ```text
//! input   32×32×3  u8 (HWC, RGB interleaved)
//! conv1   5×5, pad 2, stride 1   →  32×32×32
//! pool1   3×3, pad 0, stride 2   →  16×16×32
//! conv2   5×5, pad 2, stride 1   →  16×16×16
//! pool2   3×3, pad 0, stride 2   →   8× 8×16
//! conv3   5×5, pad 2, stride 1   →   8× 8×32
//! pool3   3×3, pad 0, stride 2   →   4× 4×32
//! ip1     512 → 10
//! ```

// Per-layer constants keep the exporter's naming and are self-describing.
#![allow(missing_docs)]

/// Image side length.
pub const IMAGE_DIM: usize = 32;
/// Image channels (RGB).
pub const IMAGE_CH: usize = 3;
/// Bytes in one HWC image.
pub const IMAGE_BYTES: usize = IMAGE_DIM * IMAGE_DIM * IMAGE_CH;

/// Number of classes scored by the network.
pub const CLASS_COUNT: usize = 10;

/// Per-channel mean subtracted during preprocessing.
pub const INPUT_MEAN: [u8; IMAGE_CH] = [125, 123, 114];
/// Per-channel right shift applied during preprocessing.
pub const INPUT_RIGHT_SHIFT: [u8; IMAGE_CH] = [8, 8, 8];
/// Left shift applied to the mean-centred pixel before rounding.
pub const INPUT_LEFT_SHIFT: u32 = 7;

pub const CONV1_IM_DIM: usize = 32;
pub const CONV1_IM_CH: usize = 3;
pub const CONV1_KER_DIM: usize = 5;
pub const CONV1_PADDING: usize = 2;
pub const CONV1_STRIDE: usize = 1;
pub const CONV1_OUT_CH: usize = 32;
pub const CONV1_OUT_DIM: usize = 32;
pub const CONV1_BIAS_LSHIFT: u32 = 6;
pub const CONV1_OUT_RSHIFT: u32 = 9;

pub const POOL1_KER_DIM: usize = 3;
pub const POOL1_STRIDE: usize = 2;
pub const POOL1_PADDING: usize = 0;
pub const POOL1_OUT_DIM: usize = 16;

pub const CONV2_IM_DIM: usize = 16;
pub const CONV2_IM_CH: usize = 32;
pub const CONV2_KER_DIM: usize = 5;
pub const CONV2_PADDING: usize = 2;
pub const CONV2_STRIDE: usize = 1;
pub const CONV2_OUT_CH: usize = 16;
pub const CONV2_OUT_DIM: usize = 16;
pub const CONV2_BIAS_LSHIFT: u32 = 3;
pub const CONV2_OUT_RSHIFT: u32 = 9;

pub const POOL2_KER_DIM: usize = 3;
pub const POOL2_STRIDE: usize = 2;
pub const POOL2_PADDING: usize = 0;
pub const POOL2_OUT_DIM: usize = 8;

pub const CONV3_IM_DIM: usize = 8;
pub const CONV3_IM_CH: usize = 16;
pub const CONV3_KER_DIM: usize = 5;
pub const CONV3_PADDING: usize = 2;
pub const CONV3_STRIDE: usize = 1;
pub const CONV3_OUT_CH: usize = 32;
pub const CONV3_OUT_DIM: usize = 8;
pub const CONV3_BIAS_LSHIFT: u32 = 0;
pub const CONV3_OUT_RSHIFT: u32 = 9;

pub const POOL3_KER_DIM: usize = 3;
pub const POOL3_STRIDE: usize = 2;
pub const POOL3_PADDING: usize = 0;
pub const POOL3_OUT_DIM: usize = 4;

pub const IP1_IM_DIM: usize = 4;
pub const IP1_IM_CH: usize = 32;
pub const IP1_DIM: usize = IP1_IM_DIM * IP1_IM_DIM * IP1_IM_CH;
pub const IP1_OUT: usize = CLASS_COUNT;
pub const IP1_BIAS_LSHIFT: u32 = 5;
pub const IP1_OUT_RSHIFT: u32 = 7;

/// Capacity of each ping-pong scratch buffer: the largest activation map
/// (conv1 output, 32×32×32).
pub const SCRATCH_BYTES: usize = CONV1_OUT_DIM * CONV1_OUT_DIM * CONV1_OUT_CH;

/// Capacity of the q15 column buffer: the largest im2col column (conv2,
/// 5×5×32) or the dense layer's expanded input, whichever is larger.
pub const COL_BUFFER_LEN: usize = max(
    max(
        CONV1_KER_DIM * CONV1_KER_DIM * CONV1_IM_CH,
        CONV2_KER_DIM * CONV2_KER_DIM * CONV2_IM_CH,
    ),
    max(CONV3_KER_DIM * CONV3_KER_DIM * CONV3_IM_CH, IP1_DIM),
);

const fn max(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}
