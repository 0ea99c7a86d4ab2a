use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::debug;

use crate::error::Result;
use crate::labelme::{AnnotationDocument, Shape, SHAPE_RECTANGLE};

pub fn read_document(path: &Path) -> Result<AnnotationDocument> {
    let reader = BufReader::new(File::open(path)?);
    let doc: AnnotationDocument = serde_json::from_reader(reader)?;
    debug!("Read {} shape(s) from {:?}", doc.shapes.len(), path);
    Ok(doc)
}

/// Rectangle shapes of an existing annotation file, empty when there is no file.
pub fn read_rectangles(path: &Path) -> Result<Vec<Shape>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let doc = read_document(path)?;
    Ok(doc.shapes.into_iter().filter(|s| s.shape_type == SHAPE_RECTANGLE).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_has_no_rectangles() {
        let rectangles = read_rectangles(Path::new("/nonexistent/annotation.json")).unwrap();
        assert!(rectangles.is_empty());
    }

    #[test]
    fn test_only_rectangles_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slide.json");
        let json = r#"{
            "version": "5.2.1",
            "flags": {},
            "shapes": [
                {"label": "nucleus", "points": [[0, 0], [4, 0], [2, 3]], "group_id": null, "shape_type": "polygon", "flags": {}},
                {"label": "roi", "points": [[1, 2], [30, 40]], "group_id": null, "shape_type": "rectangle", "flags": {}}
            ],
            "imagePath": "slide.jpg",
            "imageData": null,
            "imageHeight": 50,
            "imageWidth": 50
        }"#;
        std::fs::write(&path, json).unwrap();
        let rectangles = read_rectangles(&path).unwrap();
        assert_eq!(rectangles.len(), 1);
        assert_eq!(rectangles[0].label, "roi");
        assert!(rectangles[0].bounding_box().is_some());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(read_document(&path).is_err());
    }
}
