#[cfg(feature = "opencv")]
mod cascade;

use std::sync::Arc;

use facecap_common::config::DetectorConfig;
use image::GrayImage;

#[cfg(feature = "opencv")]
pub use cascade::OpencvCascade;

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("face detection unavailable: {0}")]
    Unavailable(String),
    #[error("failed to load cascade {path}: {reason}")]
    Load { path: String, reason: String },
}

/// Axis-aligned face rectangle in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Clip to a `width` x `height` frame. Returns `None` if nothing is left.
    pub fn clipped(self, width: u32, height: u32) -> Option<FaceBox> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(FaceBox::new(self.x, self.y, w, h))
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Pluggable face detection backend.
///
/// `scale_factor` is the multiplicative step between scanned scales and
/// `min_neighbors` the number of overlapping raw hits a region needs before
/// it is reported.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, gray: &GrayImage, scale_factor: f64, min_neighbors: u32) -> Vec<FaceBox>;
}

/// Build the detector backend selected at compile time.
#[cfg(feature = "opencv")]
pub fn from_config(config: &DetectorConfig) -> Result<Arc<dyn FaceDetector>, DetectorError> {
    let cascade = OpencvCascade::load(&config.cascade_path)?.with_min_size(config.min_size);
    Ok(Arc::new(cascade))
}

#[cfg(not(feature = "opencv"))]
pub fn from_config(config: &DetectorConfig) -> Result<Arc<dyn FaceDetector>, DetectorError> {
    tracing::debug!(path = %config.cascade_path.display(), "detector requested without OpenCV support");
    Err(DetectorError::Unavailable(
        "this build has no OpenCV support (rebuild with --features opencv)".into(),
    ))
}
