//! Mask-to-polygon conversion and the nucleus/AgNOR filters built on top of it.

pub mod analysis;
pub mod extract;
pub mod geometry;
pub mod smoothing;

use imageproc::point::Point;

pub use analysis::{analyze, group_nuclei, AnalysisOutcome, BoundingBox, DiscardReason, NucleusGroup};
pub use extract::{ConverterOptions, MaskConverter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContourRole {
    Outer,
    Hole,
}

/// A closed polygon delimiting one labeled region (or one hole of it).
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonAnnotation {
    pub label: String,
    pub class_id: u8,
    pub points: Vec<Point<i32>>,
    /// Pixel count of the connected region the polygon was traced from,
    /// without its holes.
    pub area: u32,
    pub role: ContourRole,
    /// Shared by an outer boundary and its holes when holes are emitted.
    pub group_id: Option<u32>,
}

impl PolygonAnnotation {
    pub fn is_hole(&self) -> bool {
        self.role == ContourRole::Hole
    }

    /// Pixels inside the polygon as drawn, holes included. Size limits and
    /// measurements use this count.
    pub fn filled_pixel_count(&self) -> u32 {
        geometry::filled_pixel_count(&self.points)
    }
}
