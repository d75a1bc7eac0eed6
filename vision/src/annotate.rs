use facecap_common::params::BoxColor;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detect::FaceBox;

/// Draw an outline of `thickness` pixels around each face. Lines grow inward
/// from the box edge so the outline never leaves the box.
pub fn draw_boxes(frame: &mut RgbImage, faces: &[FaceBox], color: BoxColor, thickness: u32) {
    let color = Rgb(color.rgb());
    let (w, h) = frame.dimensions();
    for face in faces {
        let Some(face) = face.clipped(w, h) else {
            continue;
        };
        for t in 0..thickness.max(1) {
            if 2 * t >= face.width || 2 * t >= face.height {
                break;
            }
            let rect = Rect::at((face.x + t) as i32, (face.y + t) as i32)
                .of_size(face.width - 2 * t, face.height - 2 * t);
            draw_hollow_rect_mut(frame, rect, color);
        }
    }
}
