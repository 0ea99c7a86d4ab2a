use image::{GrayImage, Luma};
use ndarray::Array2;

use crate::config::ClassSpec;
use crate::error::{Error, Result};

/// Per-pixel class labels laid out as `H x W`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    labels: Array2<u8>,
}

impl SegmentationMask {
    pub fn new(labels: Array2<u8>) -> Self {
        Self { labels }
    }

    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        let labels = Array2::from_shape_vec((height, width), data)
            .map_err(|e| Error::ArgumentError(format!("mask data does not match {width}x{height}: {e}")))?;
        Ok(Self { labels })
    }

    pub fn zeros(width: usize, height: usize) -> Self {
        Self { labels: Array2::zeros((height, width)) }
    }

    pub fn from_gray(img: &GrayImage) -> Self {
        let (width, height) = img.dimensions();
        let labels = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            img.get_pixel(x as u32, y as u32).0[0]
        });
        Self { labels }
    }

    pub fn to_gray(&self) -> GrayImage {
        let (height, width) = self.labels.dim();
        GrayImage::from_fn(width as u32, height as u32, |x, y| Luma([self.labels[[y as usize, x as usize]]]))
    }

    pub fn width(&self) -> usize {
        self.labels.dim().1
    }

    pub fn height(&self) -> usize {
        self.labels.dim().0
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.labels[[y, x]]
    }

    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        self.labels[[y, x]] = value;
    }

    pub fn labels(&self) -> &Array2<u8> {
        &self.labels
    }

    pub fn has_foreground(&self) -> bool {
        self.labels.iter().any(|&v| v != 0)
    }

    /// Fails when the mask was produced for an image of different size.
    pub fn check_dimensions(&self, image_width: usize, image_height: usize) -> Result<()> {
        if self.width() != image_width || self.height() != image_height {
            return Err(Error::DimensionMismatch {
                mask_width: self.width(),
                mask_height: self.height(),
                image_width,
                image_height,
            });
        }
        Ok(())
    }

    /// Binary image with 255 where the pixel belongs to `class`.
    pub fn binary_for(&self, class: &ClassSpec) -> GrayImage {
        let (height, width) = self.labels.dim();
        let mut binary = GrayImage::new(width as u32, height as u32);
        for ((y, x), value) in self.labels.indexed_iter() {
            if class.contains(*value) {
                binary.put_pixel(x as u32, y as u32, Luma([255]));
            }
        }
        binary
    }

    pub fn class_pixel_count(&self, class: &ClassSpec) -> usize {
        self.labels.iter().filter(|v| class.contains(**v)).count()
    }
}
