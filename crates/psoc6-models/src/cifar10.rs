//! The CIFAR-10 network as shape-typed layers.
//!
//! The aliases below pin every layer to the geometry in
//! [`psoc6_chip::cifar10`]. The assertion block underneath chains them: if
//! one layer's output length is not the next one's input length, or an
//! activation map outgrows a scratch buffer, the crate does not compile.

use crate::error::{ModelError, Result};
use crate::layers::{Conv2d, Dense, MaxPool2d, QuantShifts};
use crate::weights::{InputNormalization, LayerKind, LayerRecord, WeightFile, Xorshift32};
use bytes::Bytes;
use psoc6_chip::cifar10 as geo;
use std::path::Path;

/// First convolution: 32×32×3 → 32×32×32.
pub type Conv1 = Conv2d<
    { geo::CONV1_IM_DIM },
    { geo::CONV1_IM_CH },
    { geo::CONV1_OUT_CH },
    { geo::CONV1_KER_DIM },
    { geo::CONV1_PADDING },
    { geo::CONV1_STRIDE },
    { geo::CONV1_OUT_DIM },
>;

/// First pooling: 32×32×32 → 16×16×32.
pub type Pool1 = MaxPool2d<
    { geo::CONV1_OUT_DIM },
    { geo::CONV1_OUT_CH },
    { geo::POOL1_KER_DIM },
    { geo::POOL1_PADDING },
    { geo::POOL1_STRIDE },
    { geo::POOL1_OUT_DIM },
>;

/// Second convolution: 16×16×32 → 16×16×16.
pub type Conv2 = Conv2d<
    { geo::CONV2_IM_DIM },
    { geo::CONV2_IM_CH },
    { geo::CONV2_OUT_CH },
    { geo::CONV2_KER_DIM },
    { geo::CONV2_PADDING },
    { geo::CONV2_STRIDE },
    { geo::CONV2_OUT_DIM },
>;

/// Second pooling: 16×16×16 → 8×8×16.
pub type Pool2 = MaxPool2d<
    { geo::CONV2_OUT_DIM },
    { geo::CONV2_OUT_CH },
    { geo::POOL2_KER_DIM },
    { geo::POOL2_PADDING },
    { geo::POOL2_STRIDE },
    { geo::POOL2_OUT_DIM },
>;

/// Third convolution: 8×8×16 → 8×8×32.
pub type Conv3 = Conv2d<
    { geo::CONV3_IM_DIM },
    { geo::CONV3_IM_CH },
    { geo::CONV3_OUT_CH },
    { geo::CONV3_KER_DIM },
    { geo::CONV3_PADDING },
    { geo::CONV3_STRIDE },
    { geo::CONV3_OUT_DIM },
>;

/// Third pooling: 8×8×32 → 4×4×32.
pub type Pool3 = MaxPool2d<
    { geo::CONV3_OUT_DIM },
    { geo::CONV3_OUT_CH },
    { geo::POOL3_KER_DIM },
    { geo::POOL3_PADDING },
    { geo::POOL3_STRIDE },
    { geo::POOL3_OUT_DIM },
>;

/// Classifier: 512 → 10.
pub type Ip1 = Dense<{ geo::IP1_DIM }, { geo::IP1_OUT }>;

const _: () = {
    assert!(Conv1::INPUT_LEN == geo::IMAGE_BYTES);
    assert!(Conv1::OUTPUT_LEN == Pool1::INPUT_LEN);
    assert!(Pool1::OUTPUT_LEN == Conv2::INPUT_LEN);
    assert!(Conv2::OUTPUT_LEN == Pool2::INPUT_LEN);
    assert!(Pool2::OUTPUT_LEN == Conv3::INPUT_LEN);
    assert!(Conv3::OUTPUT_LEN == Pool3::INPUT_LEN);
    assert!(Pool3::OUTPUT_LEN == Ip1::INPUT_LEN);
    assert!(Ip1::OUTPUT_LEN == geo::CLASS_COUNT);

    assert!(Conv1::OUTPUT_LEN <= geo::SCRATCH_BYTES);
    assert!(Conv2::OUTPUT_LEN <= geo::SCRATCH_BYTES);
    assert!(Conv3::OUTPUT_LEN <= geo::SCRATCH_BYTES);

    assert!(Conv1::COLUMN_LEN <= geo::COL_BUFFER_LEN);
    assert!(Conv2::COLUMN_LEN <= geo::COL_BUFFER_LEN);
    assert!(Conv3::COLUMN_LEN <= geo::COL_BUFFER_LEN);
    assert!(Ip1::INPUT_LEN <= geo::COL_BUFFER_LEN);
};

/// Shifts of the first convolution.
pub const CONV1_SHIFTS: QuantShifts = QuantShifts::new(geo::CONV1_BIAS_LSHIFT, geo::CONV1_OUT_RSHIFT);
/// Shifts of the second convolution.
pub const CONV2_SHIFTS: QuantShifts = QuantShifts::new(geo::CONV2_BIAS_LSHIFT, geo::CONV2_OUT_RSHIFT);
/// Shifts of the third convolution.
pub const CONV3_SHIFTS: QuantShifts = QuantShifts::new(geo::CONV3_BIAS_LSHIFT, geo::CONV3_OUT_RSHIFT);
/// Shifts of the classifier.
pub const IP1_SHIFTS: QuantShifts = QuantShifts::new(geo::IP1_BIAS_LSHIFT, geo::IP1_OUT_RSHIFT);

const LAYER_NAMES: [&str; 4] = ["conv1", "conv2", "conv3", "ip1"];

/// Immutable parameters of the whole network.
#[derive(Debug, Clone)]
pub struct Cifar10Model {
    /// Preprocessing normalization.
    pub input: InputNormalization,
    /// First convolution.
    pub conv1: Conv1,
    /// First pooling.
    pub pool1: Pool1,
    /// Second convolution.
    pub conv2: Conv2,
    /// Second pooling.
    pub pool2: Pool2,
    /// Third convolution.
    pub conv3: Conv3,
    /// Third pooling.
    pub pool3: Pool3,
    /// Classifier.
    pub ip1: Ip1,
}

impl Cifar10Model {
    /// Deterministic stand-in parameters generated from `seed`.
    ///
    /// Uses the exporter's shifts and input normalization, so only the
    /// tensor values differ from a trained model.
    #[must_use]
    pub fn synthetic(seed: u32) -> Self {
        tracing::debug!("Generating synthetic weights (seed {seed})");
        let mut rng = Xorshift32::new(seed);
        Self {
            input: InputNormalization::default(),
            conv1: Conv1::generated(&mut rng, CONV1_SHIFTS),
            pool1: Pool1::new(),
            conv2: Conv2::generated(&mut rng, CONV2_SHIFTS),
            pool2: Pool2::new(),
            conv3: Conv3::generated(&mut rng, CONV3_SHIFTS),
            pool3: Pool3::new(),
            ip1: Ip1::generated(&mut rng, IP1_SHIFTS),
        }
    }

    /// Build from a parsed weight file.
    ///
    /// # Errors
    ///
    /// Returns error if the file does not hold exactly conv, conv, conv,
    /// dense, a tensor has the wrong length or a shift is out of range.
    pub fn from_weight_file(file: &WeightFile) -> Result<Self> {
        let [c1, c2, c3, fc] = file.layers.as_slice() else {
            return Err(ModelError::parse_error(format!(
                "expected {} layers, found {}",
                LAYER_NAMES.len(),
                file.layers.len()
            )));
        };

        let expected = [LayerKind::Conv, LayerKind::Conv, LayerKind::Conv, LayerKind::Dense];
        for ((record, kind), name) in [c1, c2, c3, fc].iter().zip(expected).zip(LAYER_NAMES) {
            if record.kind != kind {
                return Err(ModelError::parse_error(format!(
                    "{name}: expected {kind:?} layer, found {:?}",
                    record.kind
                )));
            }
        }

        Ok(Self {
            input: file.input.validate()?,
            conv1: Conv1::new("conv1", c1.weights.clone(), c1.bias.clone(), c1.shifts)?,
            pool1: Pool1::new(),
            conv2: Conv2::new("conv2", c2.weights.clone(), c2.bias.clone(), c2.shifts)?,
            pool2: Pool2::new(),
            conv3: Conv3::new("conv3", c3.weights.clone(), c3.bias.clone(), c3.shifts)?,
            pool3: Pool3::new(),
            ip1: Ip1::new("ip1", fc.weights.clone(), fc.bias.clone(), fc.shifts)?,
        })
    }

    /// Parse a `.q7w` image from memory.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid CIFAR-10 weight file.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        Self::from_weight_file(&WeightFile::parse(data)?)
    }

    /// Load a `.q7w` file.
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing or not a valid CIFAR-10 weight file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let model = Self::from_weight_file(&WeightFile::read(path)?)?;
        tracing::info!("Loaded {} parameters", model.parameter_count());
        Ok(model)
    }

    /// Export the parameters in the packed file layout.
    #[must_use]
    pub fn to_weight_file(&self) -> WeightFile {
        let conv = |parts: (&Bytes, &Bytes), shifts| LayerRecord {
            kind: LayerKind::Conv,
            shifts,
            weights: parts.0.clone(),
            bias: parts.1.clone(),
        };
        let (ip_w, ip_b) = self.ip1.raw_parts();
        WeightFile {
            input: self.input,
            layers: vec![
                conv(self.conv1.raw_parts(), self.conv1.shifts()),
                conv(self.conv2.raw_parts(), self.conv2.shifts()),
                conv(self.conv3.raw_parts(), self.conv3.shifts()),
                LayerRecord {
                    kind: LayerKind::Dense,
                    shifts: self.ip1.shifts(),
                    weights: ip_w.clone(),
                    bias: ip_b.clone(),
                },
            ],
        }
    }

    /// Total number of weights and biases.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        Conv1::WEIGHT_LEN
            + geo::CONV1_OUT_CH
            + Conv2::WEIGHT_LEN
            + geo::CONV2_OUT_CH
            + Conv3::WEIGHT_LEN
            + geo::CONV3_OUT_CH
            + Ip1::WEIGHT_LEN
            + geo::IP1_OUT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_shapes_match_geometry() {
        assert_eq!(Conv1::WEIGHT_LEN, 32 * 5 * 5 * 3);
        assert_eq!(Conv2::WEIGHT_LEN, 16 * 5 * 5 * 32);
        assert_eq!(Conv3::WEIGHT_LEN, 32 * 5 * 5 * 16);
        assert_eq!(Ip1::WEIGHT_LEN, 512 * 10);
        assert_eq!(Pool1::OUTPUT_LEN, 16 * 16 * 32);
        assert_eq!(Pool3::OUTPUT_LEN, 512);
    }

    #[test]
    fn synthetic_is_deterministic() {
        let a = Cifar10Model::synthetic(7);
        let b = Cifar10Model::synthetic(7);
        assert_eq!(a.conv2.weights(), b.conv2.weights());
        assert_eq!(a.ip1.bias(), b.ip1.bias());
        let c = Cifar10Model::synthetic(8);
        assert_ne!(a.conv1.weights(), c.conv1.weights());
    }

    #[test]
    fn synthetic_uses_exported_shifts() {
        let model = Cifar10Model::synthetic(1);
        assert_eq!(model.conv1.shifts(), QuantShifts::new(6, 9));
        assert_eq!(model.conv2.shifts(), QuantShifts::new(3, 9));
        assert_eq!(model.conv3.shifts(), QuantShifts::new(0, 9));
        assert_eq!(model.ip1.shifts(), QuantShifts::new(5, 7));
        assert_eq!(model.input, InputNormalization::default());
    }

    #[test]
    fn weight_file_reproduces_model() {
        let model = Cifar10Model::synthetic(3);
        let bytes = model.to_weight_file().to_bytes().unwrap();
        let loaded = Cifar10Model::from_bytes(bytes).unwrap();
        assert_eq!(loaded.conv3.weights(), model.conv3.weights());
        assert_eq!(loaded.ip1.weights(), model.ip1.weights());
        assert_eq!(loaded.ip1.shifts(), model.ip1.shifts());
    }

    #[test]
    fn wrong_layer_order_rejected() {
        let mut file = Cifar10Model::synthetic(3).to_weight_file();
        file.layers.swap(0, 3);
        let err = Cifar10Model::from_weight_file(&file).unwrap_err();
        assert!(err.to_string().contains("conv1"));
    }

    #[test]
    fn short_tensor_reports_layer() {
        let mut file = Cifar10Model::synthetic(3).to_weight_file();
        file.layers[1].bias = file.layers[1].bias.slice(..4);
        match Cifar10Model::from_weight_file(&file).unwrap_err() {
            ModelError::ShapeMismatch {
                layer,
                expected,
                actual,
            } => {
                assert_eq!(layer, "conv2.bias");
                assert_eq!(expected, 16);
                assert_eq!(actual, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parameter_count() {
        let model = Cifar10Model::synthetic(0);
        assert_eq!(
            model.parameter_count(),
            2400 + 32 + 12800 + 16 + 12800 + 32 + 5120 + 10
        );
    }

    #[test]
    fn oversized_shifts_rejected_at_load() {
        let model = Cifar10Model::synthetic(3);

        let mut file = model.to_weight_file();
        file.layers[0].shifts = QuantShifts::new(6, 40);
        let err = Cifar10Model::from_weight_file(&file).unwrap_err();
        assert!(err.to_string().contains("conv1: output shift 40"));
        assert!(Cifar10Model::from_bytes(file.to_bytes().unwrap()).is_err());

        let mut file = model.to_weight_file();
        file.input.right_shift = [40, 8, 8];
        assert!(Cifar10Model::from_weight_file(&file).is_err());
        assert!(Cifar10Model::from_bytes(file.to_bytes().unwrap()).is_err());

        let mut file = model.to_weight_file();
        file.input.right_shift = [8, 8, 0];
        let err = Cifar10Model::from_bytes(file.to_bytes().unwrap()).unwrap_err();
        assert!(err.to_string().contains("input channel 2"));
    }
}
