//! Annotation documents in the labelme JSON format.
//!
//! Layout written by labelme 5:
//! `{"version", "flags", "shapes": [{"label", "points", "group_id",
//! "description", "shape_type", "flags"}], "imagePath", "imageData",
//! "imageHeight", "imageWidth"}` where `imageData` is the base64 of the image
//! file bytes.

pub mod reader;
pub mod writer;

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use imageproc::point::Point;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::config::HolePolicy;
use crate::contours::{BoundingBox, PolygonAnnotation};
use crate::error::Result;

pub use reader::{read_document, read_rectangles};
pub use writer::write_atomic;

pub const LABELME_VERSION: &str = "5.2.1";
pub const SHAPE_POLYGON: &str = "polygon";
pub const SHAPE_RECTANGLE: &str = "rectangle";
pub const HOLE_FLAG: &str = "hole";
pub const HOLES_AS_INNER_CONTOURS_FLAG: &str = "holes_as_inner_contours";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub label: String,
    pub points: Vec<[f64; 2]>,
    pub group_id: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
    pub shape_type: String,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

impl Shape {
    pub fn polygon(polygon: &PolygonAnnotation) -> Self {
        let mut flags = BTreeMap::new();
        if polygon.is_hole() {
            flags.insert(HOLE_FLAG.to_string(), true);
        }
        Self {
            label: polygon.label.clone(),
            points: polygon.points.iter().map(|p| [p.x as f64, p.y as f64]).collect(),
            group_id: polygon.group_id,
            description: Some(String::new()),
            shape_type: SHAPE_POLYGON.to_string(),
            flags,
        }
    }

    pub fn is_polygon(&self) -> bool {
        self.shape_type == SHAPE_POLYGON
    }

    pub fn is_hole(&self) -> bool {
        self.flags.get(HOLE_FLAG).copied().unwrap_or(false)
    }

    /// Rectangles are stored as two opposite corners.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        if self.shape_type != SHAPE_RECTANGLE || self.points.len() != 2 {
            return None;
        }
        Some(BoundingBox::from_corners(self.points[0], self.points[1]))
    }

    /// Polygon points rounded to the pixel grid.
    pub fn pixel_points(&self) -> Vec<Point<i32>> {
        self.points
            .iter()
            .map(|[x, y]| Point::new(x.round() as i32, y.round() as i32))
            .collect()
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationDocument {
    pub version: String,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    pub shapes: Vec<Shape>,
    pub image_path: String,
    #[serde_as(as = "Option<Base64>")]
    pub image_data: Option<Vec<u8>>,
    pub image_height: u32,
    pub image_width: u32,
}

impl AnnotationDocument {
    /// `image_path` is stored relative to the annotation file, which lives next
    /// to the image, so only the file name is kept.
    pub fn new(
        image_path: &Path,
        image_width: u32,
        image_height: u32,
        image_data: Vec<u8>,
        polygons: &[PolygonAnnotation],
        hole_policy: HolePolicy,
    ) -> Self {
        let mut flags = BTreeMap::new();
        flags.insert(HOLES_AS_INNER_CONTOURS_FLAG.to_string(), hole_policy == HolePolicy::Inner);

        Self {
            version: LABELME_VERSION.to_string(),
            flags,
            shapes: polygons.iter().map(Shape::polygon).collect(),
            image_path: image_file_name(image_path),
            image_data: Some(image_data),
            image_height,
            image_width,
        }
    }

    pub fn polygons(&self) -> impl Iterator<Item = &Shape> {
        self.shapes.iter().filter(|s| s.is_polygon())
    }

    pub fn bounding_boxes(&self) -> Vec<BoundingBox> {
        self.shapes.iter().filter_map(Shape::bounding_box).collect()
    }
}

fn image_file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// The annotation file sits next to the image with a `.json` extension.
pub fn annotation_path_for(image_path: &Path) -> PathBuf {
    image_path.with_extension("json")
}

/// Bytes embedded as `imageData`: JPEG and PNG files verbatim, anything else
/// re-encoded as PNG.
pub fn embedded_image_bytes(image_path: &Path, file_bytes: Vec<u8>, image: &DynamicImage) -> Result<Vec<u8>> {
    let extension = image_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" | "png" => Ok(file_bytes),
        _ => {
            let mut png = Vec::new();
            image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
            Ok(png)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contours::ContourRole;
    use image::RgbImage;

    fn triangle() -> PolygonAnnotation {
        PolygonAnnotation {
            label: "nucleus".to_string(),
            class_id: 1,
            points: vec![Point::new(1, 1), Point::new(5, 1), Point::new(3, 4)],
            area: 9,
            role: ContourRole::Outer,
            group_id: None,
        }
    }

    #[test]
    fn test_serialized_field_names() {
        let doc = AnnotationDocument::new(Path::new("/data/slide 1.jpg"), 8, 6, vec![1, 2, 3], &[triangle()], HolePolicy::Ignore);
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["imagePath"], "slide 1.jpg");
        assert_eq!(value["imageWidth"], 8);
        assert_eq!(value["imageHeight"], 6);
        assert_eq!(value["imageData"], "AQID");
        assert_eq!(value["flags"][HOLES_AS_INNER_CONTOURS_FLAG], false);
        assert_eq!(value["shapes"][0]["shape_type"], "polygon");
        assert_eq!(value["shapes"][0]["group_id"], serde_json::Value::Null);
        assert_eq!(value["shapes"][0]["points"][2][1], 4.0);
    }

    #[test]
    fn test_parses_labelme_file_without_optional_fields() {
        let json = r#"{
            "version": "4.5.6",
            "shapes": [
                {"label": "nucleus", "points": [[0, 0], [10, 10]], "group_id": null, "shape_type": "rectangle"}
            ],
            "imagePath": "a.png",
            "imageData": null,
            "imageHeight": 20,
            "imageWidth": 30
        }"#;
        let doc: AnnotationDocument = serde_json::from_str(json).unwrap();
        assert!(doc.image_data.is_none());
        assert_eq!(doc.bounding_boxes(), vec![BoundingBox::from_corners([0.0, 0.0], [10.0, 10.0])]);
        assert_eq!(doc.polygons().count(), 0);
    }

    #[test]
    fn test_hole_shape_flag() {
        let mut hole = triangle();
        hole.role = ContourRole::Hole;
        hole.group_id = Some(3);
        let shape = Shape::polygon(&hole);
        assert!(shape.is_hole());
        assert_eq!(shape.group_id, Some(3));
        assert!(!Shape::polygon(&triangle()).is_hole());
    }

    #[test]
    fn test_embedded_bytes_reencode_non_jpeg_png() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(2, 2));
        let raw = vec![9, 9, 9];
        assert_eq!(embedded_image_bytes(Path::new("x.JPG"), raw.clone(), &image).unwrap(), raw);
        let png = embedded_image_bytes(Path::new("x.tif"), raw, &image).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn test_annotation_path_next_to_image() {
        assert_eq!(annotation_path_for(Path::new("/a/b/slide.tif")), PathBuf::from("/a/b/slide.json"));
    }
}
