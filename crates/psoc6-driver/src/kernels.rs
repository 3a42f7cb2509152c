//! q7 tensor operators.
//!
//! Bit-exact with the CMSIS-NN reference kernels the M4 firmware links:
//! accumulate in `i32`, seed the accumulator with the shifted bias plus a
//! half-up rounding term, shift right, saturate to `i8`. Saturation is the
//! only overflow handling and is silent; the accumulator itself wraps in
//! two's complement like the Cortex-M4 adder.
//!
//! Every operator reads one slice and writes another; none works in place.

use psoc6_chip::cifar10::{IMAGE_CH, INPUT_LEFT_SHIFT};
use psoc6_models::{Conv2d, Dense, ImageBytes, InputNormalization, MaxPool2d};

/// Saturate to the q7 range (`__SSAT(x, 8)`).
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub fn ssat8(x: i32) -> i8 {
    x.clamp(i32::from(i8::MIN), i32::from(i8::MAX)) as i8
}

/// Unsigned saturation to `bits` bits (`__USAT`).
#[inline]
#[allow(clippy::cast_sign_loss)]
fn usat(x: i32, bits: u32) -> u32 {
    x.clamp(0, (1 << bits) - 1) as u32
}

#[inline]
fn round_half_up(shift: u32) -> i32 {
    if shift == 0 {
        0
    } else {
        1 << (shift - 1)
    }
}

/// Centre and requantize raw pixels into q7.
///
/// Per channel: `ssat8((((px - mean) << 7) + round) >> shift)`.
pub fn preprocess(image: &ImageBytes, norm: &InputNormalization, out: &mut [i8]) {
    for (px, dst) in image
        .chunks_exact(IMAGE_CH)
        .zip(out.chunks_exact_mut(IMAGE_CH))
    {
        for ch in 0..IMAGE_CH {
            let shift = u32::from(norm.right_shift[ch]);
            let centred = (i32::from(px[ch]) - i32::from(norm.mean[ch])) << INPUT_LEFT_SHIFT;
            dst[ch] = ssat8((centred + round_half_up(shift)) >> shift);
        }
    }
}

/// HWC q7 convolution (`arm_convolve_HWC_q7_*`).
///
/// Each output pixel's receptive field is expanded into `col` as q15
/// (zero where the window hangs over the padding), then dotted with every
/// filter.
pub fn convolve_hwc_q7<
    const IN_DIM: usize,
    const IN_CH: usize,
    const OUT_CH: usize,
    const KERNEL: usize,
    const PAD: usize,
    const STRIDE: usize,
    const OUT_DIM: usize,
>(
    input: &[i8],
    layer: &Conv2d<IN_DIM, IN_CH, OUT_CH, KERNEL, PAD, STRIDE, OUT_DIM>,
    col: &mut [i16],
    out: &mut [i8],
) {
    let column = &mut col[..KERNEL * KERNEL * IN_CH];
    let input = &input[..IN_DIM * IN_DIM * IN_CH];
    let bias = layer.bias();
    let shifts = layer.shifts();

    for oy in 0..OUT_DIM {
        for ox in 0..OUT_DIM {
            im2col::<IN_DIM, IN_CH, KERNEL>(input, oy * STRIDE, ox * STRIDE, PAD, column);

            let base = (oy * OUT_DIM + ox) * OUT_CH;
            for (oc, dst) in out[base..base + OUT_CH].iter_mut().enumerate() {
                let acc = layer
                    .filter(oc)
                    .iter()
                    .zip(column.iter())
                    .fold(shifts.seed(bias[oc]), |acc, (&w, &x)| {
                        acc.wrapping_add(i32::from(w) * i32::from(x))
                    });
                *dst = ssat8(acc >> shifts.out_rshift);
            }
        }
    }
}

fn im2col<const IN_DIM: usize, const IN_CH: usize, const KERNEL: usize>(
    input: &[i8],
    y0: usize,
    x0: usize,
    pad: usize,
    column: &mut [i16],
) {
    let mut k = 0;
    for ky in 0..KERNEL {
        for kx in 0..KERNEL {
            let dst = &mut column[k..k + IN_CH];
            k += IN_CH;
            // padded coordinates, shifted back into the input
            let (y, x) = (y0 + ky, x0 + kx);
            if y < pad || x < pad || y - pad >= IN_DIM || x - pad >= IN_DIM {
                dst.fill(0);
            } else {
                let src = ((y - pad) * IN_DIM + (x - pad)) * IN_CH;
                for (d, &s) in dst.iter_mut().zip(&input[src..src + IN_CH]) {
                    *d = i16::from(s);
                }
            }
        }
    }
}

/// Clamp negatives to zero (`arm_relu_q7`), copying `input` to `out`.
pub fn relu_q7(input: &[i8], out: &mut [i8]) {
    for (dst, &x) in out.iter_mut().zip(input) {
        *dst = x.max(0);
    }
}

/// HWC max pooling (`arm_maxpool_q7_HWC`).
///
/// Windows are clamped to the input, so the ceil-mode edge windows see
/// fewer elements rather than padding values.
pub fn maxpool_hwc_q7<
    const IN_DIM: usize,
    const CH: usize,
    const KERNEL: usize,
    const PAD: usize,
    const STRIDE: usize,
    const OUT_DIM: usize,
>(
    input: &[i8],
    _layer: &MaxPool2d<IN_DIM, CH, KERNEL, PAD, STRIDE, OUT_DIM>,
    out: &mut [i8],
) {
    let window = |o: usize| {
        let start = (o * STRIDE).saturating_sub(PAD);
        let end = (o * STRIDE + KERNEL).saturating_sub(PAD).min(IN_DIM);
        start..end
    };

    for oy in 0..OUT_DIM {
        for ox in 0..OUT_DIM {
            let dst = &mut out[(oy * OUT_DIM + ox) * CH..][..CH];
            dst.fill(i8::MIN);
            for y in window(oy) {
                for x in window(ox) {
                    let src = &input[(y * IN_DIM + x) * CH..][..CH];
                    for (d, &s) in dst.iter_mut().zip(src) {
                        *d = (*d).max(s);
                    }
                }
            }
        }
    }
}

/// Fully-connected q7 layer (`arm_fully_connected_q7`).
///
/// The input vector is widened into `col` once and reused for every row.
pub fn fully_connected_q7<const IN: usize, const OUT: usize>(
    input: &[i8],
    layer: &Dense<IN, OUT>,
    col: &mut [i16],
    out: &mut [i8],
) {
    let vector = &mut col[..IN];
    for (v, &x) in vector.iter_mut().zip(&input[..IN]) {
        *v = i16::from(x);
    }

    let bias = layer.bias();
    let shifts = layer.shifts();
    for (o, dst) in out[..OUT].iter_mut().enumerate() {
        let acc = layer
            .row(o)
            .iter()
            .zip(vector.iter())
            .fold(shifts.seed(bias[o]), |acc, (&w, &x)| {
                acc.wrapping_add(i32::from(w) * i32::from(x))
            });
        *dst = ssat8(acc >> shifts.out_rshift);
    }
}

/// Base-2 q7 softmax (`arm_softmax_q7`).
///
/// Only inputs within 8 of the maximum contribute; each gets
/// `2^20 / sum >> (13 + base - x)`, the maximum saturating at 127. Output
/// order follows input order.
pub fn softmax_q7(input: &[i8], out: &mut [i8]) {
    let max = input.iter().copied().max().map_or(i32::from(i8::MIN), i32::from);
    let base = max - 8;

    let sum: i32 = input
        .iter()
        .map(|&x| i32::from(x))
        .filter(|&x| x > base)
        .map(|x| 1i32 << usat(x - base, 5))
        .sum();

    // sum >= 2^8 because the maximum always contributes
    let output_base = 0x10_0000 / sum.max(1);

    for (dst, &x) in out.iter_mut().zip(input) {
        let x = i32::from(x);
        *dst = if x > base {
            ssat8(output_base >> usat(13 + base - x, 5))
        } else {
            0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psoc6_models::QuantShifts;

    #[test]
    fn ssat8_clamps() {
        assert_eq!(ssat8(1000), 127);
        assert_eq!(ssat8(-1000), -128);
        assert_eq!(ssat8(-5), -5);
    }

    #[test]
    fn preprocess_rounds_half_up_and_saturates() {
        let mut image = [0u8; 3072];
        image[..3].copy_from_slice(&[125, 126, 255]);
        image[3..6].copy_from_slice(&[0, 123, 115]);
        let mut out = [0i8; 3072];
        preprocess(&image, &InputNormalization::default(), &mut out);

        // (0 << 7 + 128) >> 8 = 0
        assert_eq!(out[0], 0);
        // ((3 << 7) + 128) >> 8 = 2
        assert_eq!(out[1], 2);
        // ((141 << 7) + 128) >> 8 = 71
        assert_eq!(out[2], 71);
        // ((-125 << 7) + 128) >> 8 = -62
        assert_eq!(out[3], -62);
        assert_eq!(out[4], 0);
        // ((1 << 7) + 128) >> 8 = 1
        assert_eq!(out[5], 1);
    }

    #[test]
    fn preprocess_with_small_shift_saturates() {
        let mut image = [0u8; 3072];
        image[0] = 255;
        let norm = InputNormalization {
            mean: [0, 0, 0],
            right_shift: [0, 0, 0],
        };
        let mut out = [0i8; 3072];
        preprocess(&image, &norm, &mut out);
        assert_eq!(out[0], 127);
    }

    #[test]
    fn convolution_identity_kernel() {
        // 3×3 single-channel input, one 3×3 filter picking the centre tap.
        let mut weights = vec![0u8; 9];
        weights[4] = 1;
        let conv = Conv2d::<3, 1, 1, 3, 1, 1, 3>::new("id", weights, vec![0u8], QuantShifts::new(0, 0))
            .unwrap();
        let input: Vec<i8> = (1..=9).collect();
        let mut col = [0i16; 9];
        let mut out = [0i8; 9];
        convolve_hwc_q7(&input, &conv, &mut col, &mut out);
        assert_eq!(out.to_vec(), input);
    }

    #[test]
    fn convolution_pads_with_zeros_and_applies_shifts() {
        // all-ones 3×3 filter: corner sees 4 inputs, centre sees 9
        let conv = Conv2d::<3, 1, 1, 3, 1, 1, 3>::new(
            "box",
            vec![1u8; 9],
            vec![1u8],
            QuantShifts::new(2, 1),
        )
        .unwrap();
        let input = [10i8; 9];
        let mut col = [0i16; 9];
        let mut out = [0i8; 9];
        convolve_hwc_q7(&input, &conv, &mut col, &mut out);
        // corner: ((1 << 2) + 1 + 40) >> 1 = 22
        assert_eq!(out[0], 22);
        // centre: ((1 << 2) + 1 + 90) >> 1 = 47
        assert_eq!(out[4], 47);
    }

    /// Direct convolution over `[out_ch][ky][kx][in_ch]` weights.
    fn reference_conv<const DIM: usize, const IN_CH: usize, const OUT_CH: usize, const K: usize>(
        input: &[i8],
        weights: &[i8],
        bias: &[i8],
        pad: usize,
        shifts: QuantShifts,
    ) -> Vec<i8> {
        let mut out = vec![0i8; DIM * DIM * OUT_CH];
        for oy in 0..DIM {
            for ox in 0..DIM {
                for oc in 0..OUT_CH {
                    let mut acc = shifts.seed(bias[oc]);
                    for ky in 0..K {
                        for kx in 0..K {
                            for ic in 0..IN_CH {
                                let (y, x) = (oy + ky, ox + kx);
                                if y < pad || x < pad || y - pad >= DIM || x - pad >= DIM {
                                    continue;
                                }
                                let px = input[((y - pad) * DIM + (x - pad)) * IN_CH + ic];
                                let w = weights[((oc * K + ky) * K + kx) * IN_CH + ic];
                                acc += i32::from(px) * i32::from(w);
                            }
                        }
                    }
                    out[(oy * DIM + ox) * OUT_CH + oc] = ssat8(acc >> shifts.out_rshift);
                }
            }
        }
        out
    }

    #[test]
    fn multichannel_convolution_matches_direct_loop() {
        // distinct weight per (oc, ky, kx, ic) so a transposed layout shows up
        let weights: Vec<i8> = (0..3 * 3 * 3 * 2).map(|i| ((i * 7) % 23) as i8 - 11).collect();
        let bias = [3i8, -2, 0];
        let input: Vec<i8> = (0..4 * 4 * 2).map(|i| ((i * 5) % 17) as i8 - 8).collect();
        let shifts = QuantShifts::new(1, 2);

        let conv = Conv2d::<4, 2, 3, 3, 1, 1, 4>::new(
            "mc",
            weights.iter().map(|&w| w as u8).collect::<Vec<_>>(),
            bias.iter().map(|&b| b as u8).collect::<Vec<_>>(),
            shifts,
        )
        .unwrap();
        let mut col = [0i16; 18];
        let mut out = [0i8; 48];
        convolve_hwc_q7(&input, &conv, &mut col, &mut out);

        let expected = reference_conv::<4, 2, 3, 3>(&input, &weights, &bias, 1, shifts);
        assert_eq!(out.to_vec(), expected);

        // top-left corner sees only the bottom-right 2×2 of each filter
        let corner: i32 = (1..3)
            .flat_map(|ky| (1..3).map(move |kx| (ky, kx)))
            .flat_map(|(ky, kx)| (0..2).map(move |ic| (ky, kx, ic)))
            .map(|(ky, kx, ic)| {
                let px = input[((ky - 1) * 4 + (kx - 1)) * 2 + ic];
                let w = weights[(ky * 3 + kx) * 2 + ic];
                i32::from(px) * i32::from(w)
            })
            .sum();
        assert_eq!(out[0], ssat8((shifts.seed(bias[0]) + corner) >> 2));
    }

    #[test]
    fn accumulator_wraps_like_the_hardware_adder() {
        // seed 127 << 24 plus 1100 × 127 × 127 passes i32::MAX
        let dense = Dense::<1100, 1>::new(
            "wide",
            vec![127u8; 1100],
            vec![127u8],
            QuantShifts::new(24, 0),
        )
        .unwrap();
        let mut col = vec![0i16; 1100];
        let mut out = [0i8; 1];
        fully_connected_q7(&[127i8; 1100], &dense, &mut col, &mut out);

        let wrapped = (127i32 << 24).wrapping_add(1100 * 127 * 127);
        assert!(wrapped < 0);
        assert_eq!(out[0], ssat8(wrapped));
        assert_eq!(out[0], -128);
    }

    #[test]
    fn relu_clamps_negatives_only() {
        let mut out = [0i8; 4];
        relu_q7(&[-128, -1, 0, 127], &mut out);
        assert_eq!(out, [0, 0, 0, 127]);
    }

    #[test]
    fn maxpool_clamps_edge_windows() {
        // 6×6 → 3×3 with k3 s2: the last window covers rows/cols 4..6 only
        let pool = MaxPool2d::<6, 1, 3, 0, 2, 3>::new();
        let input: Vec<i8> = (0..36).collect();
        let mut out = [0i8; 9];
        maxpool_hwc_q7(&input, &pool, &mut out);
        assert_eq!(out, [14, 16, 17, 26, 28, 29, 32, 34, 35]);
    }

    #[test]
    fn fully_connected_rows() {
        let dense = Dense::<2, 2>::new(
            "fc",
            vec![1u8, 2, 0xFF, 0xFF],
            vec![0u8, 0],
            QuantShifts::new(0, 0),
        )
        .unwrap();
        let mut col = [0i16; 2];
        let mut out = [0i8; 2];
        fully_connected_q7(&[3, 4], &dense, &mut col, &mut out);
        assert_eq!(out, [11, -7]);
    }

    #[test]
    fn softmax_ranks_dominant_class_first() {
        let logits = [10i8, -5, 3, 0, 0, 0, 0, 0, 0, 0];
        let mut out = [0i8; 10];
        softmax_q7(&logits, &mut out);
        assert_eq!(out[0], 127);
        assert!(out.iter().skip(1).all(|&p| p < out[0]));
    }

    #[test]
    fn softmax_is_monotonic() {
        let logits = [5i8, 4, 3, 2, 1, 0, -1, -2, -3, -4];
        let mut out = [0i8; 10];
        softmax_q7(&logits, &mut out);
        assert!(out.windows(2).all(|w| w[0] >= w[1]));
        assert!(out.iter().all(|&p| p >= 0));
    }

    #[test]
    fn softmax_uniform_splits_evenly() {
        let mut out = [0i8; 10];
        softmax_q7(&[0i8; 10], &mut out);
        // sum = 10 * 2^8, base = 2^20 / 2560 = 409, 409 >> 5 = 12
        assert_eq!(out, [12i8; 10]);
    }
}
