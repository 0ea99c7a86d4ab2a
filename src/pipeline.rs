//! Per-image annotation job and the batch loop around it.
//!
//! Images are processed one at a time. A failure while reading, segmenting or
//! converting an image skips that image only. A failed annotation write keeps
//! the document in the report so the write can be retried.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use image::DynamicImage;
use log::{debug, info, warn};

use crate::config::{Settings, IMAGE_EXTENSIONS};
use crate::contours::{analyze, group_nuclei, BoundingBox, ConverterOptions, MaskConverter, PolygonAnnotation};
use crate::error::Result;
use crate::labelme::{annotation_path_for, embedded_image_bytes, read_rectangles, write_atomic, AnnotationDocument, Shape};
use crate::measurements::{Measurements, RecordInfo};
use crate::model::{SegmentationMask, Segmenter};
use crate::overlay::{save_overlay, OVERLAY_SUFFIX};

/// Optional outputs and restrictions of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub use_bounding_boxes: bool,
    pub write_overlay: bool,
    pub measurements_dir: Option<PathBuf>,
    pub record: RecordInfo,
}

#[derive(Debug, Clone)]
pub struct SkippedImage {
    pub image_path: PathBuf,
    pub reason: String,
}

/// An annotation that could not be written. The document is kept for a retry.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub image_path: PathBuf,
    pub annotation_path: PathBuf,
    pub document: AnnotationDocument,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<SkippedImage>,
    pub pending: Vec<PendingWrite>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.skipped.is_empty() && self.pending.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} annotation(s) written, {} image(s) skipped, {} write(s) failed",
            self.written.len(),
            self.skipped.len(),
            self.pending.len()
        );
        for skipped in &self.skipped {
            summary.push_str(&format!("\nskipped {}: {}", skipped.image_path.display(), skipped.reason));
        }
        for pending in &self.pending {
            summary.push_str(&format!("\nnot written {}: {}", pending.annotation_path.display(), pending.reason));
        }
        summary
    }
}

/// Everything produced for one image before anything is written.
pub struct PreparedAnnotation {
    pub image: DynamicImage,
    pub mask: SegmentationMask,
    pub polygons: Vec<PolygonAnnotation>,
    pub document: AnnotationDocument,
    pub annotation_path: PathBuf,
    pub measurements: Option<Measurements>,
}

pub struct Annotator<S: Segmenter> {
    segmenter: S,
    converter: MaskConverter,
    settings: Settings,
    options: RunOptions,
    started_at: String,
}

impl<S: Segmenter> Annotator<S> {
    pub fn new(segmenter: S, settings: Settings, options: RunOptions) -> Self {
        Self {
            segmenter,
            converter: MaskConverter::new(ConverterOptions::from_settings(&settings)),
            settings,
            options,
            started_at: Local::now().format("%Y%m%d%H%M").to_string(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Load, segment and convert one image into an annotation document.
    pub fn prepare(&mut self, image_path: &Path) -> Result<PreparedAnnotation> {
        let bytes = fs::read(image_path)?;
        let image = image::load_from_memory(&bytes)?;
        let (width, height) = (image.width(), image.height());
        debug!("Decoded {:?} ({}x{})", image_path, width, height);

        let mask = self.segmenter.segment(&image)?;
        if !mask.has_foreground() {
            info!("Nothing segmented in {:?}", image_path);
        }
        let polygons = self.converter.convert_for_image(&mask, &self.settings.classes, width, height)?;
        debug!("{} polygon(s) traced for {:?}", polygons.len(), image_path);

        let annotation_path = annotation_path_for(image_path);
        let rectangles: Vec<Shape> = if self.options.use_bounding_boxes {
            read_rectangles(&annotation_path)?
        } else {
            Vec::new()
        };

        let boxes: Vec<BoundingBox> = rectangles.iter().filter_map(Shape::bounding_box).collect();
        if self.options.use_bounding_boxes && boxes.is_empty() {
            info!("No bounding boxes in {:?}, keeping nuclei anywhere", annotation_path);
        }
        let boxes = (!boxes.is_empty()).then_some(boxes.as_slice());
        // Without analysis the nuclei are still grouped, so boxes and measurements apply.
        let outcome = if self.settings.analysis.enabled {
            analyze(polygons, &self.settings.analysis, boxes)
        } else {
            group_nuclei(polygons, &self.settings.analysis, boxes)
        };
        let measurements = self.options.measurements_dir.as_ref().map(|_| {
            Measurements::from_outcome(&outcome, &self.options.record, &file_name(image_path), &self.started_at)
        });
        let polygons = outcome.into_polygons(self.settings.analysis.keep_discarded);

        let image_data = embedded_image_bytes(image_path, bytes, &image)?;
        let mut document = AnnotationDocument::new(image_path, width, height, image_data, &polygons, self.settings.hole_policy);
        document.shapes.extend(rectangles);

        Ok(PreparedAnnotation {
            image,
            mask,
            polygons,
            document,
            annotation_path,
            measurements,
        })
    }

    /// Try the write once plus `write_retries` more times.
    fn write_with_retries(&self, document: &AnnotationDocument, path: &Path) -> Result<()> {
        let mut attempt = 0;
        loop {
            match write_atomic(document, path) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.settings.write_retries => {
                    attempt += 1;
                    warn!("Write to {:?} failed ({}), retry {}/{}", path, e, attempt, self.settings.write_retries);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn write_side_outputs(&self, image_path: &Path, prepared: &PreparedAnnotation) {
        if let (Some(dir), Some(measurements)) = (&self.options.measurements_dir, &prepared.measurements) {
            if let Err(e) = measurements.append_to(dir) {
                warn!("Could not write measurements for {:?}: {}", image_path, e);
            }
        }
        if self.options.write_overlay {
            if let Err(e) = save_overlay(image_path, &prepared.image, &prepared.mask, &prepared.polygons) {
                warn!("Could not write overlay for {:?}: {}", image_path, e);
            }
        }
    }

    /// Annotate one image and record the outcome in `report`.
    pub fn process(&mut self, image_path: &Path, report: &mut BatchReport) {
        let prepared = match self.prepare(image_path) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Skipping {:?}: {}", image_path, e);
                report.skipped.push(SkippedImage {
                    image_path: image_path.to_path_buf(),
                    reason: e.to_string(),
                });
                return;
            }
        };

        self.write_side_outputs(image_path, &prepared);

        match self.write_with_retries(&prepared.document, &prepared.annotation_path) {
            Ok(()) => {
                info!("Wrote {:?} ({} shape(s))", prepared.annotation_path, prepared.document.shapes.len());
                report.written.push(prepared.annotation_path);
            }
            Err(e) => {
                warn!("Keeping annotation for {:?} in memory: {}", image_path, e);
                report.pending.push(PendingWrite {
                    image_path: image_path.to_path_buf(),
                    annotation_path: prepared.annotation_path,
                    document: prepared.document,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Annotate every image, then retry the writes that failed.
    pub fn run(&mut self, images: &[PathBuf]) -> BatchReport {
        let mut report = BatchReport::default();
        for (index, image_path) in images.iter().enumerate() {
            info!("[{}/{}] {:?}", index + 1, images.len(), image_path);
            self.process(image_path, &mut report);
        }
        retry_pending(&mut report);
        report
    }
}

/// One more write attempt for every pending document.
pub fn retry_pending(report: &mut BatchReport) {
    if report.pending.is_empty() {
        return;
    }
    info!("Retrying {} failed write(s)", report.pending.len());

    let mut still_pending = Vec::new();
    for mut pending in report.pending.drain(..) {
        match write_atomic(&pending.document, &pending.annotation_path) {
            Ok(()) => {
                info!("Wrote {:?} on retry", pending.annotation_path);
                report.written.push(pending.annotation_path);
            }
            Err(e) => {
                pending.reason = e.to_string();
                still_pending.push(pending);
            }
        }
    }
    report.pending = still_pending;
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn is_supported_image(path: &Path) -> bool {
    let supported = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
    let is_overlay = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.ends_with(OVERLAY_SUFFIX));
    supported && !is_overlay
}

/// Groups of images that would write the same annotation file, such as
/// `slide.png` and `slide.jpg`.
pub fn annotation_collisions(images: &[PathBuf]) -> Vec<(PathBuf, Vec<PathBuf>)> {
    let mut by_annotation: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for image in images {
        by_annotation.entry(annotation_path_for(image)).or_default().push(image.clone());
    }
    by_annotation.into_iter().filter(|(_, images)| images.len() > 1).collect()
}

/// Expand directories (non-recursively) into their supported images. Files
/// named explicitly are kept as given. Images sharing an annotation file are
/// kept but reported, the last one processed wins.
pub fn collect_inputs(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut images = Vec::new();
    for path in paths {
        if path.is_dir() {
            let entries = match fs::read_dir(path) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Cannot read directory {:?}: {}", path, e);
                    continue;
                }
            };
            let mut found: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_supported_image(p))
                .collect();
            found.sort();
            debug!("{} image(s) found in {:?}", found.len(), path);
            images.extend(found);
        } else {
            images.push(path.clone());
        }
    }
    for (annotation, sharing) in annotation_collisions(&images) {
        warn!("{} images write {:?}: {:?}", sharing.len(), annotation, sharing);
    }
    images
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_images() {
        assert!(is_supported_image(Path::new("a/slide.JPG")));
        assert!(is_supported_image(Path::new("slide.tiff")));
        assert!(!is_supported_image(Path::new("slide.json")));
        assert!(!is_supported_image(Path::new("slide_overlay.png")));
        assert!(!is_supported_image(Path::new("README")));
    }

    #[test]
    fn test_collect_inputs_expands_directories() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.jpg", "a.json", "a_overlay.png"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let explicit = PathBuf::from("explicit.bmp");
        let images = collect_inputs(&[dir.path().to_path_buf(), explicit.clone()]);
        assert_eq!(images, vec![dir.path().join("a.jpg"), dir.path().join("b.png"), explicit]);
    }

    #[test]
    fn test_colliding_stems_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["slide.png", "slide.jpg", "other.png"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let images = collect_inputs(&[dir.path().to_path_buf()]);
        assert_eq!(images.len(), 3);

        let collisions = annotation_collisions(&images);
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].0, dir.path().join("slide.json"));
        assert_eq!(collisions[0].1, vec![dir.path().join("slide.jpg"), dir.path().join("slide.png")]);
    }

    #[test]
    fn test_summary_lists_failures() {
        let mut report = BatchReport::default();
        report.written.push(PathBuf::from("a.json"));
        report.skipped.push(SkippedImage {
            image_path: PathBuf::from("b.png"),
            reason: "corrupt".to_string(),
        });
        assert!(!report.is_success());
        let summary = report.summary();
        assert!(summary.starts_with("1 annotation(s) written, 1 image(s) skipped, 0 write(s) failed"));
        assert!(summary.contains("skipped b.png: corrupt"));
    }
}
