pub mod annotate;
pub mod camera;
pub mod capture;
pub mod detect;

pub use camera::{CameraSource, CaptureError};
pub use capture::{capture_and_detect, CapturedFrame};
pub use detect::{DetectorError, FaceBox, FaceDetector};
