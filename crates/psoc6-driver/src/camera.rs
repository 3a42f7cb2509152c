//! Image sources for the M0+.
//!
//! The board has no camera; the M0+ sends a fixed 32×32 RGB frame each
//! time ENTER is pressed. [`ImageSource`] is the seam where a real capture
//! path would plug in.

use crate::error::Result;
use psoc6_models::Image;
use std::path::Path;
use tracing::debug;

/// Produces the frame sent on each trigger.
pub trait ImageSource: Send {
    /// Capture one frame.
    ///
    /// # Errors
    ///
    /// Returns error if no frame can be produced.
    fn capture(&mut self) -> Result<Image>;
}

/// Always returns the same frame.
#[derive(Debug, Clone)]
pub struct StaticCamera {
    frame: Image,
}

impl StaticCamera {
    /// Camera returning `frame`.
    pub fn new(frame: Image) -> Self {
        Self { frame }
    }

    /// Camera returning the built-in sample frame.
    pub fn sample() -> Self {
        Self::new(Image::sample())
    }

    /// Camera returning a raw 3072-byte HWC frame read from `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing or has the wrong size.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Image::from_file(path)?))
    }
}

impl ImageSource for StaticCamera {
    fn capture(&mut self) -> Result<Image> {
        Ok(self.frame.clone())
    }
}

/// Cycles through a fixed list of frames.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    frames: Vec<Image>,
    next: usize,
}

impl FrameSequence {
    /// Sequence over `frames`; an empty list yields zeroed frames.
    pub fn new(frames: Vec<Image>) -> Self {
        Self { frames, next: 0 }
    }
}

impl ImageSource for FrameSequence {
    fn capture(&mut self) -> Result<Image> {
        if self.frames.is_empty() {
            return Ok(Image::zeroed());
        }
        let index = self.next % self.frames.len();
        self.next = self.next.wrapping_add(1);
        debug!("Camera: frame {index}");
        Ok(self.frames[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_camera_repeats_frame() {
        let mut camera = StaticCamera::sample();
        assert_eq!(camera.capture().unwrap(), Image::sample());
        assert_eq!(camera.capture().unwrap(), Image::sample());
    }

    #[test]
    fn sequence_cycles() {
        let mut seq = FrameSequence::new(vec![Image::solid([1; 3]), Image::solid([2; 3])]);
        let sentinels: Vec<u8> = (0..5).map(|_| seq.capture().unwrap().sentinel()).collect();
        assert_eq!(sentinels, [1, 2, 1, 2, 1]);
    }

    #[test]
    fn camera_from_raw_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.rgb");
        std::fs::write(&path, Image::solid([10, 20, 30]).as_bytes()).unwrap();

        let mut camera = StaticCamera::from_file(&path).unwrap();
        assert_eq!(camera.capture().unwrap().pixel(31, 31, 2), 30);

        std::fs::write(&path, [1u8; 100]).unwrap();
        assert!(matches!(
            StaticCamera::from_file(&path),
            Err(crate::DriverError::Model(_))
        ));
    }

    #[test]
    fn empty_sequence_yields_zero_frame() {
        let mut seq = FrameSequence::new(Vec::new());
        assert_eq!(seq.capture().unwrap().sentinel(), 0);
    }
}
