//! Packed `.q7w` weight files.
//!
//! The file stands in for the weight headers compiled into the firmware.
//! Everything is little endian:
//!
//! ```text
//! magic        4   "Q7NN"
//! version      2   1
//! layer_count  2   4
//! mean         3   per-channel input mean
//! right_shift  3   per-channel input right shift
//! layer × layer_count:
//!   kind         1   1 = conv, 2 = dense
//!   bias_lshift  1
//!   out_rshift   1
//!   reserved     1
//!   weight_len   4
//!   bias_len     4
//!   weights      weight_len
//!   bias         bias_len
//! ```
//!
//! Parsing checks structure and shift ranges. Tensor lengths are validated against the
//! layer shapes when the file is turned into a
//! [`Cifar10Model`](crate::cifar10::Cifar10Model).

use crate::error::{ModelError, Result};
use crate::layers::QuantShifts;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use psoc6_chip::cifar10::{IMAGE_CH, INPUT_MEAN, INPUT_RIGHT_SHIFT};
use std::fs;
use std::path::Path;

/// File magic.
pub const MAGIC: [u8; 4] = *b"Q7NN";

/// Format revision written and accepted by this crate.
pub const FORMAT_VERSION: u16 = 1;

const FILE_HEADER_LEN: usize = 4 + 2 + 2 + 2 * IMAGE_CH;
const LAYER_HEADER_LEN: usize = 4 + 4 + 4;

/// Kind tag of a parameterized layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LayerKind {
    /// Convolution, weights `[out_ch][ky][kx][in_ch]`.
    Conv = 1,
    /// Fully-connected, weights `[out][in]`.
    Dense = 2,
}

impl LayerKind {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Conv),
            2 => Some(Self::Dense),
            _ => None,
        }
    }
}

/// Per-channel input normalization applied by the preprocessing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputNormalization {
    /// Mean subtracted from each channel.
    pub mean: [u8; IMAGE_CH],
    /// Right shift applied to each channel after centring.
    pub right_shift: [u8; IMAGE_CH],
}

impl InputNormalization {
    /// Check every channel's right shift is in `1..=31`.
    ///
    /// Zero is rejected along with oversized shifts because the rounding
    /// term is `1 << (shift - 1)`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ParseError`] naming the first bad channel.
    pub fn validate(self) -> Result<Self> {
        for (ch, &shift) in self.right_shift.iter().enumerate() {
            if !(1..=QuantShifts::MAX).contains(&u32::from(shift)) {
                return Err(ModelError::parse_error(format!(
                    "input channel {ch}: right shift {shift} out of range 1..={}",
                    QuantShifts::MAX
                )));
            }
        }
        Ok(self)
    }
}

impl Default for InputNormalization {
    fn default() -> Self {
        Self {
            mean: INPUT_MEAN,
            right_shift: INPUT_RIGHT_SHIFT,
        }
    }
}

/// One parameterized layer as stored in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRecord {
    /// Layer kind.
    pub kind: LayerKind,
    /// Quantization shifts.
    pub shifts: QuantShifts,
    /// Raw `i8` weights.
    pub weights: Bytes,
    /// Raw `i8` biases.
    pub bias: Bytes,
}

/// Contents of a `.q7w` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightFile {
    /// Input normalization.
    pub input: InputNormalization,
    /// Parameterized layers in execution order.
    pub layers: Vec<LayerRecord>,
}

impl WeightFile {
    /// Parse a weight file from memory.
    ///
    /// Tensor data is sliced out of `data` without copying.
    ///
    /// # Errors
    ///
    /// Returns error on a bad magic, unknown version, unknown layer kind,
    /// out-of-range shift, truncated data or trailing bytes.
    pub fn parse(data: impl Into<Bytes>) -> Result<Self> {
        let mut buf: Bytes = data.into();
        tracing::debug!("Parsing weight file ({} bytes)", buf.len());

        if buf.remaining() < FILE_HEADER_LEN {
            return Err(ModelError::parse_error("File too small"));
        }
        if buf.split_to(MAGIC.len())[..] != MAGIC {
            return Err(ModelError::InvalidHeader);
        }
        let version = buf.get_u16_le();
        if version != FORMAT_VERSION {
            return Err(ModelError::UnsupportedVersion { version });
        }
        let layer_count = buf.get_u16_le();

        let mut input = InputNormalization::default();
        buf.copy_to_slice(&mut input.mean);
        buf.copy_to_slice(&mut input.right_shift);
        let input = input.validate()?;

        let mut layers = Vec::with_capacity(usize::from(layer_count));
        for index in 0..layer_count {
            layers.push(parse_layer(&mut buf, index)?);
        }

        if buf.has_remaining() {
            return Err(ModelError::parse_error(format!(
                "{} trailing bytes after last layer",
                buf.remaining()
            )));
        }

        tracing::debug!("Parsed {} layer record(s)", layers.len());
        Ok(Self { input, layers })
    }

    /// Read and parse a weight file.
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing, unreadable or malformed.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading weights from: {}", path.display());
        if !path.exists() {
            return Err(ModelError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        Self::parse(fs::read(path)?)
    }

    /// Serialize to the packed format.
    ///
    /// # Errors
    ///
    /// Returns error if a field does not fit its on-disk width.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let tensors: usize = self
            .layers
            .iter()
            .map(|l| LAYER_HEADER_LEN + l.weights.len() + l.bias.len())
            .sum();
        let mut out = BytesMut::with_capacity(FILE_HEADER_LEN + tensors);

        out.put_slice(&MAGIC);
        out.put_u16_le(FORMAT_VERSION);
        out.put_u16_le(narrow(self.layers.len(), "layer count")?);
        out.put_slice(&self.input.mean);
        out.put_slice(&self.input.right_shift);

        for layer in &self.layers {
            out.put_u8(layer.kind as u8);
            out.put_u8(narrow(layer.shifts.bias_lshift, "bias shift")?);
            out.put_u8(narrow(layer.shifts.out_rshift, "output shift")?);
            out.put_u8(0);
            out.put_u32_le(narrow(layer.weights.len(), "weight length")?);
            out.put_u32_le(narrow(layer.bias.len(), "bias length")?);
            out.put_slice(&layer.weights);
            out.put_slice(&layer.bias);
        }

        Ok(out.freeze())
    }

    /// Serialize and write to `path`.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        fs::write(path, &bytes)?;
        tracing::info!("Wrote {} bytes of weights to {}", bytes.len(), path.display());
        Ok(())
    }
}

fn narrow<T, U>(value: T, what: &str) -> Result<U>
where
    T: Copy + std::fmt::Display,
    U: TryFrom<T>,
{
    U::try_from(value).map_err(|_| ModelError::parse_error(format!("{what} {value} out of range")))
}

fn parse_layer(buf: &mut Bytes, index: u16) -> Result<LayerRecord> {
    if buf.remaining() < LAYER_HEADER_LEN {
        return Err(ModelError::parse_error(format!(
            "Layer {index}: truncated header"
        )));
    }

    let tag = buf.get_u8();
    let kind = LayerKind::from_tag(tag)
        .ok_or_else(|| ModelError::parse_error(format!("Layer {index}: unknown kind {tag}")))?;
    let bias_lshift = u32::from(buf.get_u8());
    let out_rshift = u32::from(buf.get_u8());
    let _reserved = buf.get_u8();
    let weight_len = buf.get_u32_le() as usize;
    let bias_len = buf.get_u32_le() as usize;

    let tensor_len = weight_len.saturating_add(bias_len);
    if buf.remaining() < tensor_len {
        return Err(ModelError::parse_error(format!(
            "Layer {index}: expected {tensor_len} tensor bytes, {} left",
            buf.remaining()
        )));
    }

    Ok(LayerRecord {
        kind,
        shifts: QuantShifts::new(bias_lshift, out_rshift).validate(&format!("Layer {index}"))?,
        weights: buf.split_to(weight_len),
        bias: buf.split_to(bias_len),
    })
}

/// Xorshift32 generator for deterministic synthetic parameters.
///
/// Not a trained model: the values only exercise the arithmetic so the
/// runtime can run without exported weights.
#[derive(Debug, Clone)]
pub struct Xorshift32 {
    state: u32,
}

impl Xorshift32 {
    /// Seed the generator. A zero seed is replaced by a fixed non-zero one.
    #[must_use]
    pub const fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9 } else { seed },
        }
    }

    /// Next raw value.
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Next small q7 value in `[-16, 15]`.
    pub fn next_q7(&mut self) -> i8 {
        // top five bits, recentred
        (self.next_u32() >> 27) as i8 - 16
    }

    /// `len` small q7 values as raw bytes.
    pub fn q7_bytes(&mut self, len: usize) -> Bytes {
        let values: Vec<i8> = (0..len).map(|_| self.next_q7()).collect();
        Bytes::from(bytemuck::cast_slice::<i8, u8>(&values).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> WeightFile {
        WeightFile {
            input: InputNormalization::default(),
            layers: vec![
                LayerRecord {
                    kind: LayerKind::Conv,
                    shifts: QuantShifts::new(6, 9),
                    weights: Bytes::from_static(&[1, 2, 3, 4]),
                    bias: Bytes::from_static(&[0xFF]),
                },
                LayerRecord {
                    kind: LayerKind::Dense,
                    shifts: QuantShifts::new(5, 7),
                    weights: Bytes::from_static(&[9, 8]),
                    bias: Bytes::from_static(&[7, 6]),
                },
            ],
        }
    }

    #[test]
    fn header_layout() {
        let bytes = sample_file().to_bytes().unwrap();
        assert_eq!(&bytes[..4], b"Q7NN");
        assert_eq!(&bytes[4..6], &[1, 0]);
        assert_eq!(&bytes[6..8], &[2, 0]);
        assert_eq!(&bytes[8..11], &[125, 123, 114]);
        assert_eq!(&bytes[11..14], &[8, 8, 8]);
        // first layer header
        assert_eq!(&bytes[14..18], &[1, 6, 9, 0]);
        assert_eq!(&bytes[18..22], &[4, 0, 0, 0]);
    }

    #[test]
    fn parse_reads_back_written_file() {
        let file = sample_file();
        let parsed = WeightFile::parse(file.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, file);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = sample_file().to_bytes().unwrap().to_vec();
        bytes[0] = b'X';
        assert!(matches!(
            WeightFile::parse(bytes),
            Err(ModelError::InvalidHeader)
        ));
    }

    #[test]
    fn future_version_rejected() {
        let mut bytes = sample_file().to_bytes().unwrap().to_vec();
        bytes[4] = 2;
        assert!(matches!(
            WeightFile::parse(bytes),
            Err(ModelError::UnsupportedVersion { version: 2 })
        ));
    }

    #[test]
    fn truncated_tensor_rejected() {
        let bytes = sample_file().to_bytes().unwrap();
        let short = bytes.slice(..bytes.len() - 1);
        assert!(matches!(
            WeightFile::parse(short),
            Err(ModelError::ParseError { .. })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = sample_file().to_bytes().unwrap().to_vec();
        bytes.push(0);
        assert!(matches!(
            WeightFile::parse(bytes),
            Err(ModelError::ParseError { .. })
        ));
    }

    #[test]
    fn unknown_layer_kind_rejected() {
        let mut bytes = sample_file().to_bytes().unwrap().to_vec();
        bytes[14] = 7;
        assert!(WeightFile::parse(bytes).is_err());
    }

    #[test]
    fn xorshift_is_deterministic_and_small() {
        let mut a = Xorshift32::new(42);
        let mut b = Xorshift32::new(42);
        for _ in 0..1000 {
            let v = a.next_q7();
            assert_eq!(v, b.next_q7());
            assert!((-16..=15).contains(&v));
        }
    }

    #[test]
    fn zero_seed_does_not_stick() {
        let mut rng = Xorshift32::new(0);
        assert_ne!(rng.next_u32(), 0);
    }

    #[test]
    fn oversized_layer_shift_rejected() {
        let mut bytes = sample_file().to_bytes().unwrap().to_vec();
        // first layer: out_rshift
        bytes[16] = 40;
        let err = WeightFile::parse(bytes).unwrap_err();
        assert!(err.to_string().contains("Layer 0: output shift 40"));
    }

    #[test]
    fn input_shift_must_be_in_range() {
        for bad in [0u8, 32, 40] {
            let mut bytes = sample_file().to_bytes().unwrap().to_vec();
            bytes[11] = bad;
            let err = WeightFile::parse(bytes).unwrap_err();
            assert!(
                err.to_string().contains("input channel 0"),
                "shift {bad}: {err}"
            );
        }
    }
}
