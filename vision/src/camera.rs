use facecap_common::config::{CameraConfig, CameraKind};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    #[error("cannot access the camera: {0}")]
    DeviceUnavailable(String),
    #[error("failed to capture a frame: {0}")]
    CaptureFailed(String),
}

/// Something that can produce a single colour frame on demand.
///
/// Implementations must not hold the device between calls: every `grab`
/// acquires, reads exactly one frame and releases.
pub trait CameraSource: Send + Sync {
    fn grab(&self) -> Result<RgbImage, CaptureError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Build the camera source selected in the config.
pub fn from_config(config: &CameraConfig) -> Arc<dyn CameraSource> {
    match config.source {
        CameraKind::Device => Arc::new(DeviceCamera::new(config.index)),
        CameraKind::File => {
            let path = config.path.clone().unwrap_or_default();
            Arc::new(StillCamera::new(path))
        }
    }
}

/// The system video-capture device at `index`.
pub struct DeviceCamera {
    index: u32,
    name: String,
}

impl DeviceCamera {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            name: format!("video device #{index}"),
        }
    }
}

#[cfg(feature = "webcam")]
impl CameraSource for DeviceCamera {
    fn grab(&self) -> Result<RgbImage, CaptureError> {
        use nokhwa::pixel_format::RgbFormat;
        use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
        use nokhwa::Camera;

        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::None);
        let mut camera = Camera::new(CameraIndex::Index(self.index), requested)
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        let buffer = camera.frame();
        // Release the device before decoding; it is never held across requests.
        if let Err(e) = camera.stop_stream() {
            debug!(error = %e, "failed to stop camera stream cleanly");
        }
        drop(camera);

        let buffer = buffer.map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;
        let (width, height) = (decoded.width(), decoded.height());
        if width == 0 || height == 0 {
            return Err(CaptureError::CaptureFailed("camera returned an empty frame".into()));
        }
        tracing::info!(index = self.index, width, height, "grabbed frame from camera");
        RgbImage::from_raw(width, height, decoded.into_raw())
            .ok_or_else(|| CaptureError::CaptureFailed("frame buffer size mismatch".into()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(not(feature = "webcam"))]
impl CameraSource for DeviceCamera {
    fn grab(&self) -> Result<RgbImage, CaptureError> {
        debug!(index = self.index, "device capture requested without webcam support");
        Err(CaptureError::DeviceUnavailable(
            "this build has no webcam support (rebuild with --features webcam)".into(),
        ))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Serves a still image from disk on every grab. Handy on hosts without a
/// camera and for demos.
pub struct StillCamera {
    path: PathBuf,
    name: String,
}

impl StillCamera {
    pub fn new(path: PathBuf) -> Self {
        let name = format!("still image {}", path.display());
        Self { path, name }
    }
}

impl CameraSource for StillCamera {
    fn grab(&self) -> Result<RgbImage, CaptureError> {
        let bytes = std::fs::read(&self.path).map_err(|e| {
            CaptureError::DeviceUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        let frame = image::load_from_memory(&bytes)
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?
            .to_rgb8();
        if frame.width() == 0 || frame.height() == 0 {
            return Err(CaptureError::CaptureFailed("image is empty".into()));
        }
        debug!(path = %self.path.display(), width = frame.width(), height = frame.height(), "read still frame");
        Ok(frame)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
