use std::path::{Path, PathBuf};

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use itertools::Itertools;
use log::debug;

use crate::contours::PolygonAnnotation;
use crate::error::Result;
use crate::model::SegmentationMask;

pub const OVERLAY_SUFFIX: &str = "_overlay";
pub const DEFAULT_ALPHA: f32 = 0.4;

const PALETTE: [[u8; 3]; 6] = [
    [40, 120, 255],
    [255, 50, 50],
    [60, 200, 80],
    [250, 200, 30],
    [200, 60, 220],
    [30, 210, 220],
];

/// Color of a mask value. Background (0) has none.
pub fn class_color(value: u8) -> Option<Rgb<u8>> {
    match value {
        0 => None,
        v => Some(Rgb(PALETTE[(v as usize - 1) % PALETTE.len()])),
    }
}

/// `<dir>/<stem>_overlay.png`
pub fn overlay_path_for(image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    image_path.with_file_name(format!("{stem}{OVERLAY_SUFFIX}.png"))
}

/// Blend the class colors of `mask` over `image` and outline the polygons.
pub fn render(image: &DynamicImage, mask: &SegmentationMask, polygons: &[PolygonAnnotation], alpha: f32) -> Result<RgbImage> {
    let mut canvas = image.to_rgb8();
    mask.check_dimensions(canvas.width() as usize, canvas.height() as usize)?;
    let alpha = alpha.clamp(0.0, 1.0);

    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        if let Some(color) = class_color(mask.get(x as usize, y as usize)) {
            for c in 0..3 {
                let blended = pixel[c] as f32 * (1.0 - alpha) + color[c] as f32 * alpha;
                pixel[c] = blended.round() as u8;
            }
        }
    }

    for polygon in polygons {
        let Some(color) = class_color(polygon.class_id) else {
            continue;
        };
        for (a, b) in polygon.points.iter().circular_tuple_windows() {
            draw_line_segment_mut(&mut canvas, (a.x as f32, a.y as f32), (b.x as f32, b.y as f32), color);
        }
    }
    Ok(canvas)
}

pub fn save_overlay(
    image_path: &Path,
    image: &DynamicImage,
    mask: &SegmentationMask,
    polygons: &[PolygonAnnotation],
) -> Result<PathBuf> {
    let path = overlay_path_for(image_path);
    render(image, mask, polygons, DEFAULT_ALPHA)?.save(&path)?;
    debug!("Saved overlay to {:?}", path);
    Ok(path)
}
