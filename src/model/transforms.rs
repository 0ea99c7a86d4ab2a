use image::{imageops, DynamicImage, RgbImage};
use ndarray::{Array2, Array3, Array4, ArrayViewD, Axis, Ix3};

use crate::config::InputLayout;
use crate::error::{Error, Result};
use crate::model::mask::SegmentationMask;

// Converts image to ndarray with format HxWxC
pub fn image_to_ndarray(img: &RgbImage) -> Array3<u8> {
    let (width, height) = img.dimensions();
    let mut img_arr = Array3::<u8>::zeros((height as usize, width as usize, 3));
    for (x, y, pixel) in img.enumerate_pixels() {
        img_arr[[y as usize, x as usize, 0]] = pixel.0[0];
        img_arr[[y as usize, x as usize, 1]] = pixel.0[1];
        img_arr[[y as usize, x as usize, 2]] = pixel.0[2];
    }

    img_arr
}

/// Resize to the model input size and scale to `[0, 1]`, batch of one.
pub fn prepare_input(img: &DynamicImage, width: u32, height: u32, layout: InputLayout) -> Array4<f32> {
    let rgb = img.to_rgb8();
    let resized = if rgb.dimensions() == (width, height) {
        rgb
    } else {
        imageops::resize(&rgb, width, height, imageops::FilterType::Triangle)
    };
    let hwc = image_to_ndarray(&resized).mapv(|v| v as f32 / 255.0);
    let batched = match layout {
        InputLayout::Nhwc => hwc,
        InputLayout::Nchw => hwc.permuted_axes((2, 0, 1)),
    };

    batched.insert_axis(Axis(0)).as_standard_layout().into_owned()
}

/// Arg-max over the class axis of a segmentation output.
///
/// Accepts `[1, H, W, C]`, `[1, C, H, W]` or the same without the batch axis.
/// The class axis is the smaller of the first and last remaining axes, so the
/// class count must not exceed the image height. Ties resolve to the lowest
/// class index.
pub fn logits_to_class_map(logits: ArrayViewD<f32>) -> Result<Array2<u8>> {
    let logits = match logits.ndim() {
        4 => {
            if logits.shape()[0] != 1 {
                return Err(Error::InferenceError(format!("expected batch of 1, got shape {:?}", logits.shape())));
            }
            logits.index_axis_move(Axis(0), 0)
        }
        3 => logits,
        _ => return Err(Error::InferenceError(format!("unsupported output shape {:?}", logits.shape()))),
    };
    let logits = logits
        .into_dimensionality::<Ix3>()
        .map_err(|e| Error::InferenceError(e.to_string()))?;

    let (d0, _, d2) = logits.dim();
    let hwc = if d2 <= d0 { logits } else { logits.permuted_axes((1, 2, 0)) };
    let (height, width, classes) = hwc.dim();
    if classes == 0 || classes > u8::MAX as usize + 1 {
        return Err(Error::InferenceError(format!("unsupported class count {classes}")));
    }

    let mut class_map = Array2::<u8>::zeros((height, width));
    for ((y, x), class) in class_map.indexed_iter_mut() {
        let mut best = 0;
        let mut best_score = hwc[[y, x, 0]];
        for c in 1..classes {
            let score = hwc[[y, x, c]];
            if score > best_score {
                best = c;
                best_score = score;
            }
        }
        *class = best as u8;
    }

    Ok(class_map)
}

/// Nearest-neighbour resize of a label grid so labels are never blended.
pub fn resize_mask(mask: &SegmentationMask, width: u32, height: u32) -> SegmentationMask {
    if mask.width() == width as usize && mask.height() == height as usize {
        return mask.clone();
    }
    let resized = imageops::resize(&mask.to_gray(), width, height, imageops::FilterType::Nearest);
    SegmentationMask::from_gray(&resized)
}
