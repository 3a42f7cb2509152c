//! 32×32 RGB input images.
//!
//! Images are raw `u8` HWC grids with channels interleaved
//! (`[R, G, B, R, G, B, ...]`). The compiled-in [`SAMPLE_IMAGE`] stands in
//! for a camera frame.

use crate::error::{ModelError, Result};
use psoc6_chip::cifar10::{IMAGE_BYTES, IMAGE_CH, IMAGE_DIM};
use std::fmt;
use std::fs;
use std::path::Path;

/// Raw pixel storage for one image.
pub type ImageBytes = [u8; IMAGE_BYTES];

/// Compiled-in sample frame used when no camera or image file is given.
pub static SAMPLE_IMAGE: ImageBytes = sample_pattern();

/// Diagonal colour ramp; pixel (0, 0) is non-zero so the frame passes the
/// receiver's "image present" check.
const fn sample_pattern() -> ImageBytes {
    let mut out = [0u8; IMAGE_BYTES];
    let mut y = 0;
    while y < IMAGE_DIM {
        let mut x = 0;
        while x < IMAGE_DIM {
            let base = (y * IMAGE_DIM + x) * IMAGE_CH;
            out[base] = (96 + x * 4) as u8;
            out[base + 1] = (64 + y * 5) as u8;
            out[base + 2] = (200 - (x + y) * 3) as u8;
            x += 1;
        }
        y += 1;
    }
    out
}

/// One owned 32×32×3 image.
#[derive(Clone, PartialEq, Eq)]
pub struct Image(Box<ImageBytes>);

impl Image {
    /// All-black image (its sentinel byte is zero).
    pub fn zeroed() -> Self {
        Self(Box::new([0; IMAGE_BYTES]))
    }

    /// The compiled-in sample frame.
    pub fn sample() -> Self {
        Self(Box::new(SAMPLE_IMAGE))
    }

    /// Take ownership of a pixel array.
    pub fn from_array(pixels: ImageBytes) -> Self {
        Self(Box::new(pixels))
    }

    /// Copy pixels out of a byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidImage`] unless `bytes` is exactly 3072 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let pixels: ImageBytes = bytes.try_into().map_err(|_| ModelError::InvalidImage {
            expected: IMAGE_BYTES,
            actual: bytes.len(),
        })?;
        Ok(Self::from_array(pixels))
    }

    /// Read a raw HWC image file.
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing, unreadable or not 3072 bytes.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        tracing::debug!("Reading image from {}", path.display());
        Self::from_slice(&fs::read(path)?)
    }

    /// Fill every pixel with one colour.
    pub fn solid(rgb: [u8; IMAGE_CH]) -> Self {
        let mut pixels = [0u8; IMAGE_BYTES];
        for px in pixels.chunks_exact_mut(IMAGE_CH) {
            px.copy_from_slice(&rgb);
        }
        Self::from_array(pixels)
    }

    /// Pixel bytes.
    pub fn as_bytes(&self) -> &ImageBytes {
        &self.0
    }

    /// Mutable pixel bytes.
    pub fn as_bytes_mut(&mut self) -> &mut ImageBytes {
        &mut self.0
    }

    /// First byte of the buffer, used by the receiver as an "image present" flag.
    pub fn sentinel(&self) -> u8 {
        self.0[0]
    }

    /// One channel value at `(y, x)`.
    pub fn pixel(&self, y: usize, x: usize, ch: usize) -> u8 {
        self.0[(y * IMAGE_DIM + x) * IMAGE_CH + ch]
    }
}

impl Default for Image {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("dim", &format_args!("{IMAGE_DIM}x{IMAGE_DIM}x{IMAGE_CH}"))
            .field("sentinel", &self.sentinel())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_image_passes_sentinel_check() {
        assert_ne!(Image::sample().sentinel(), 0);
    }

    #[test]
    fn zeroed_image_fails_sentinel_check() {
        assert_eq!(Image::zeroed().sentinel(), 0);
    }

    #[test]
    fn pixels_are_channel_interleaved() {
        let img = Image::sample();
        assert_eq!(img.pixel(0, 1, 0), SAMPLE_IMAGE[3]);
        assert_eq!(img.pixel(1, 0, 2), SAMPLE_IMAGE[IMAGE_DIM * IMAGE_CH + 2]);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = Image::from_slice(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidImage {
                expected: 3072,
                actual: 3
            }
        ));
    }

    #[test]
    fn solid_fills_every_pixel() {
        let img = Image::solid([10, 20, 30]);
        assert_eq!(img.pixel(31, 31, 0), 10);
        assert_eq!(img.pixel(17, 4, 2), 30);
    }
}
