//! Haar cascade detection through OpenCV's `CascadeClassifier`.

use std::path::Path;
use std::sync::Mutex;

use image::GrayImage;
use opencv::core::{Mat, Rect, Scalar, Size, Vector, CV_8UC1};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use tracing::{debug, info, warn};

use super::{DetectorError, FaceBox, FaceDetector};

pub struct OpencvCascade {
    // detect_multi_scale needs &mut; one scan at a time per cascade.
    classifier: Mutex<CascadeClassifier>,
    min_size: u32,
}

impl OpencvCascade {
    pub fn load(path: &Path) -> Result<Self, DetectorError> {
        let load_err = |reason: String| DetectorError::Load {
            path: path.display().to_string(),
            reason,
        };
        let path_str = path
            .to_str()
            .ok_or_else(|| load_err("path is not valid UTF-8".into()))?;
        let classifier = CascadeClassifier::new(path_str).map_err(|e| load_err(e.to_string()))?;
        if classifier.empty().map_err(|e| load_err(e.to_string()))? {
            return Err(load_err("no cascade could be read from the file".into()));
        }
        info!(path = %path.display(), "loaded Haar cascade");
        Ok(Self {
            classifier: Mutex::new(classifier),
            min_size: 0,
        })
    }

    /// Smallest face side, in pixels, worth scanning for. 0 means the
    /// cascade's own window size.
    pub fn with_min_size(mut self, min_size: u32) -> Self {
        self.min_size = min_size;
        self
    }

    fn scan(&self, gray: &GrayImage, scale_factor: f64, min_neighbors: u32) -> opencv::Result<Vec<Rect>> {
        let mut mat = Mat::new_rows_cols_with_default(
            gray.height() as i32,
            gray.width() as i32,
            CV_8UC1,
            Scalar::all(0.0),
        )?;
        mat.data_bytes_mut()?.copy_from_slice(gray.as_raw());
        let side = self.min_size as i32;
        let mut found = Vector::<Rect>::new();
        let mut classifier = self.classifier.lock().unwrap_or_else(|p| p.into_inner());
        classifier.detect_multi_scale(
            &mat,
            &mut found,
            scale_factor,
            min_neighbors as i32,
            0,
            Size::new(side, side),
            Size::default(),
        )?;
        Ok(found.to_vec())
    }
}

fn to_face_box(rect: Rect) -> FaceBox {
    let x = rect.x.max(0);
    let y = rect.y.max(0);
    let right = (rect.x + rect.width).max(x);
    let bottom = (rect.y + rect.height).max(y);
    FaceBox::new(x as u32, y as u32, (right - x) as u32, (bottom - y) as u32)
}

impl FaceDetector for OpencvCascade {
    fn detect(&self, gray: &GrayImage, scale_factor: f64, min_neighbors: u32) -> Vec<FaceBox> {
        if gray.width() == 0 || gray.height() == 0 {
            return Vec::new();
        }
        let rects = match self.scan(gray, scale_factor, min_neighbors) {
            Ok(rects) => rects,
            Err(e) => {
                warn!(error = %e, scale_factor, min_neighbors, "cascade scan failed");
                return Vec::new();
            }
        };
        let faces: Vec<FaceBox> = rects
            .into_iter()
            .map(to_face_box)
            .filter_map(|f| f.clipped(gray.width(), gray.height()))
            .collect();
        debug!(faces = faces.len(), scale_factor, min_neighbors, "cascade scan finished");
        faces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::capture_and_detect;
    use crate::camera::{CameraSource, CaptureError};
    use facecap_common::params::{BoxColor, DetectionParams};
    use image::{Luma, Rgb, RgbImage};
    use std::path::PathBuf;

    /// A stock frontal-face cascade, from `FACECAP_CASCADE` or the usual
    /// OpenCV install locations.
    fn stock_cascade() -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = std::env::var_os("FACECAP_CASCADE")
            .map(PathBuf::from)
            .into_iter()
            .collect();
        for prefix in ["/usr/share/opencv4", "/usr/local/share/opencv4", "/usr/share/opencv"] {
            candidates.push(PathBuf::from(prefix).join("haarcascades/haarcascade_frontalface_default.xml"));
        }
        candidates.into_iter().find(|p| p.is_file())
    }

    struct Pattern(RgbImage);

    impl CameraSource for Pattern {
        fn grab(&self) -> Result<RgbImage, CaptureError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn negative_rects_are_clamped() {
        assert_eq!(to_face_box(Rect::new(-5, -2, 10, 10)), FaceBox::new(0, 0, 5, 8));
        assert_eq!(to_face_box(Rect::new(3, 4, 6, 7)), FaceBox::new(3, 4, 6, 7));
    }

    #[test]
    fn garbage_file_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cascade.xml");
        std::fs::write(&path, b"<opencv_storage></opencv_storage>").unwrap();
        assert!(matches!(OpencvCascade::load(&path), Err(DetectorError::Load { .. })));
    }

    #[test]
    fn every_slider_setting_stays_in_frame() {
        let Some(path) = stock_cascade() else {
            eprintln!("no stock cascade found; set FACECAP_CASCADE to run this test");
            return;
        };
        let cascade = OpencvCascade::load(&path).unwrap();
        for (w, h) in [(1, 1), (25, 24), (160, 120)] {
            let frame = RgbImage::from_fn(w, h, |x, y| {
                let v = ((x * 7 + y * 13) % 256) as u8;
                Rgb([v, v, v])
            });
            let camera = Pattern(frame);
            for step in 0..=9 {
                let scale = 1.05 + step as f64 * 0.05;
                for neighbors in 3..=10 {
                    let params = DetectionParams::new(scale, neighbors, BoxColor::GREEN);
                    let captured = capture_and_detect(&camera, &cascade, &params, 2).unwrap();
                    for f in &captured.faces {
                        assert!(f.right() <= w && f.bottom() <= h, "{f:?} outside {w}x{h}");
                    }
                }
            }
        }
    }

    #[test]
    fn flat_frame_has_no_faces() {
        let Some(path) = stock_cascade() else {
            return;
        };
        let cascade = OpencvCascade::load(&path).unwrap();
        let gray = GrayImage::from_pixel(200, 150, Luma([128]));
        assert!(cascade.detect(&gray, 1.1, 5).is_empty());
    }
}
