#![deny(unsafe_code)]

//! Shape-typed q7 model for the dual-core CIFAR-10 classifier
//!
//! This crate owns everything the inference pipeline treats as immutable
//! input: layer parameters, the `.q7w` weight file that carries them, and
//! the 32×32×3 images the pipeline classifies.
//!
//! Layer geometry lives in const generics ([`Conv2d`], [`MaxPool2d`],
//! [`Dense`]). The CIFAR-10 aliases in [`cifar10`] are chained by
//! compile-time assertions, so a shape mismatch between layers, weights and
//! scratch buffers is a build error rather than a silent overrun.
//!
//! # Example
//!
//! ```no_run
//! use psoc6_models::{Cifar10Model, Image};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Trained weights from disk, or deterministic stand-ins
//! let model = Cifar10Model::from_file("cifar10.q7w")
//!     .unwrap_or_else(|_| Cifar10Model::synthetic(1));
//!
//! let image = Image::from_file("frame.rgb")?;
//! println!("{} parameters, sentinel {}", model.parameter_count(), image.sentinel());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cifar10;
mod error;
mod image;
pub mod layers;
pub mod weights;

pub use cifar10::Cifar10Model;
pub use error::{ModelError, Result};
pub use image::{Image, ImageBytes, SAMPLE_IMAGE};
pub use layers::{Conv2d, Dense, MaxPool2d, QuantShifts};
pub use weights::{InputNormalization, LayerKind, LayerRecord, WeightFile, Xorshift32};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{Cifar10Model, Image, InputNormalization, QuantShifts, Result, WeightFile};
}
