use chrono::{DateTime, Local};
use facecap_common::params::DetectionParams;
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use tracing::info;

use crate::annotate::draw_boxes;
use crate::camera::{CameraSource, CaptureError};
use crate::detect::{FaceBox, FaceDetector};

/// One annotated camera frame, alive until it is saved, discarded or
/// replaced by the next capture.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub image: RgbImage,
    pub faces: Vec<FaceBox>,
    pub params: DetectionParams,
    pub captured_at: DateTime<Local>,
}

impl CapturedFrame {
    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Cursor::new(Vec::new());
        self.image.write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }
}

/// Grab one frame, find faces on its grayscale copy and outline them on the
/// colour frame.
pub fn capture_and_detect(
    camera: &dyn CameraSource,
    detector: &dyn FaceDetector,
    params: &DetectionParams,
    thickness: u32,
) -> Result<CapturedFrame, CaptureError> {
    let mut image = camera.grab()?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(CaptureError::CaptureFailed("camera returned an empty frame".into()));
    }

    let gray = image::imageops::grayscale(&image);
    let faces: Vec<FaceBox> = detector
        .detect(&gray, params.scale_factor, params.min_neighbors)
        .into_iter()
        .filter_map(|f| f.clipped(width, height))
        .collect();

    draw_boxes(&mut image, &faces, params.color, thickness);

    info!(
        camera = camera.name(),
        width,
        height,
        faces = faces.len(),
        scale_factor = params.scale_factor,
        min_neighbors = params.min_neighbors,
        "captured frame"
    );

    Ok(CapturedFrame {
        image,
        faces,
        params: *params,
        captured_at: Local::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facecap_common::params::BoxColor;
    use image::{GrayImage, Rgb};
    use std::sync::Mutex;

    struct FixedCamera(RgbImage);

    impl CameraSource for FixedCamera {
        fn grab(&self) -> Result<RgbImage, CaptureError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenCamera;

    impl CameraSource for BrokenCamera {
        fn grab(&self) -> Result<RgbImage, CaptureError> {
            Err(CaptureError::DeviceUnavailable("unplugged".into()))
        }
    }

    /// Returns canned boxes and remembers what it was asked.
    struct StubDetector {
        boxes: Vec<FaceBox>,
        seen: Mutex<Option<(u32, u32, f64, u32)>>,
    }

    impl FaceDetector for StubDetector {
        fn detect(&self, gray: &GrayImage, scale_factor: f64, min_neighbors: u32) -> Vec<FaceBox> {
            *self.seen.lock().unwrap() = Some((gray.width(), gray.height(), scale_factor, min_neighbors));
            self.boxes.clone()
        }
    }

    fn stub(boxes: Vec<FaceBox>) -> StubDetector {
        StubDetector {
            boxes,
            seen: Mutex::new(None),
        }
    }

    #[test]
    fn annotates_detected_faces() {
        let camera = FixedCamera(RgbImage::from_pixel(32, 24, Rgb([50, 50, 50])));
        let detector = stub(vec![FaceBox::new(4, 4, 10, 10)]);
        let params = DetectionParams::new(1.25, 7, BoxColor { r: 0, g: 0, b: 255 });

        let frame = capture_and_detect(&camera, &detector, &params, 2).unwrap();

        assert_eq!(frame.faces, vec![FaceBox::new(4, 4, 10, 10)]);
        assert_eq!(frame.image.get_pixel(4, 4), &Rgb([0, 0, 255]));
        assert_eq!(frame.image.get_pixel(9, 9), &Rgb([50, 50, 50]));
        assert_eq!(*detector.seen.lock().unwrap(), Some((32, 24, 1.25, 7)));
    }

    #[test]
    fn boxes_are_kept_inside_the_frame() {
        let camera = FixedCamera(RgbImage::new(20, 20));
        let detector = stub(vec![FaceBox::new(15, 15, 10, 10), FaceBox::new(40, 0, 5, 5)]);
        let frame = capture_and_detect(&camera, &detector, &DetectionParams::default(), 2).unwrap();
        assert_eq!(frame.faces, vec![FaceBox::new(15, 15, 5, 5)]);
        for f in &frame.faces {
            assert!(f.right() <= 20 && f.bottom() <= 20);
        }
    }

    #[test]
    fn no_faces_leaves_frame_untouched() {
        let original = RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]));
        let camera = FixedCamera(original.clone());
        let frame = capture_and_detect(&camera, &stub(vec![]), &DetectionParams::default(), 2).unwrap();
        assert!(frame.faces.is_empty());
        assert_eq!(frame.image, original);
    }

    /// Reports boxes hanging off every edge of whatever it is given.
    struct Spill;

    impl FaceDetector for Spill {
        fn detect(&self, gray: &GrayImage, _scale: f64, _neighbors: u32) -> Vec<FaceBox> {
            let (w, h) = gray.dimensions();
            vec![
                FaceBox::new(0, 0, w + 5, h + 5),
                FaceBox::new(w.saturating_sub(1), h.saturating_sub(1), 10, 10),
                FaceBox::new(w + 3, 0, 2, 2),
            ]
        }
    }

    #[test]
    fn every_slider_setting_stays_in_frame() {
        for (w, h) in [(1, 1), (25, 24), (33, 7)] {
            let camera = FixedCamera(RgbImage::from_pixel(w, h, Rgb([90, 90, 90])));
            for step in 0..=9 {
                let scale = 1.05 + step as f64 * 0.05;
                for neighbors in 3..=10 {
                    let params = DetectionParams::new(scale, neighbors, BoxColor::GREEN);
                    let frame = capture_and_detect(&camera, &Spill, &params, 2).unwrap();
                    assert_eq!(frame.faces.len(), 2, "{w}x{h} at {scale}/{neighbors}");
                    for f in &frame.faces {
                        assert!(f.right() <= w && f.bottom() <= h, "{f:?} outside {w}x{h}");
                    }
                    assert_eq!(frame.image.dimensions(), (w, h));
                }
            }
        }
    }

    #[test]
    fn camera_errors_propagate() {
        let err = capture_and_detect(&BrokenCamera, &stub(vec![]), &DetectionParams::default(), 2)
            .unwrap_err();
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
    }

    #[test]
    fn empty_frame_is_capture_failed() {
        let camera = FixedCamera(RgbImage::new(0, 0));
        let err = capture_and_detect(&camera, &stub(vec![]), &DetectionParams::default(), 2)
            .unwrap_err();
        assert!(matches!(err, CaptureError::CaptureFailed(_)));
    }

    #[test]
    fn png_encoding_roundtrips_dimensions() {
        let camera = FixedCamera(RgbImage::new(12, 7));
        let frame = capture_and_detect(&camera, &stub(vec![]), &DetectionParams::default(), 2).unwrap();
        let png = frame.encode_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (12, 7));
    }
}
