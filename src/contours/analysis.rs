//! Nucleus and AgNOR filtering.
//!
//! Nuclei and AgNORs (labelled `cluster`) come out of the converter as
//! independent polygons. This module keeps only the nuclei that look like
//! single, well-formed cells carrying at least one AgNOR, and only the AgNORs
//! that sit inside one of those nuclei.

use std::collections::HashSet;

use imageproc::point::Point;
use log::debug;

use crate::config::{AnalysisSettings, DISCARDED_PREFIX};
use crate::contours::geometry::{convexity_defect_percent, point_in_polygon};
use crate::contours::smoothing::smooth_closed;
use crate::contours::PolygonAnnotation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    Size,
    OutsideBoundingBox,
    NoAgnor,
    Deformed,
    OutsideNucleus,
}

/// Axis-aligned box in pixel coordinates, inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn from_corners(a: [f64; 2], b: [f64; 2]) -> Self {
        Self {
            min_x: a[0].min(b[0]),
            min_y: a[1].min(b[1]),
            max_x: a[0].max(b[0]),
            max_y: a[1].max(b[1]),
        }
    }

    pub fn contains(&self, p: &Point<i32>) -> bool {
        let (x, y) = (p.x as f64, p.y as f64);
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// A kept nucleus with the AgNORs found inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct NucleusGroup {
    pub nucleus: PolygonAnnotation,
    pub nors: Vec<PolygonAnnotation>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisOutcome {
    pub nuclei: Vec<NucleusGroup>,
    /// Polygons of other classes and holes of kept regions.
    pub passthrough: Vec<PolygonAnnotation>,
    pub discarded: Vec<(PolygonAnnotation, DiscardReason)>,
}

impl AnalysisOutcome {
    pub fn nor_count(&self) -> usize {
        self.nuclei.iter().map(|g| g.nors.len()).sum()
    }

    /// Flatten into the polygon list written to the annotation file. Discarded
    /// polygons are relabelled with the `discarded_` prefix when requested.
    pub fn into_polygons(self, keep_discarded: bool) -> Vec<PolygonAnnotation> {
        let mut polygons = Vec::new();
        for group in self.nuclei {
            polygons.push(group.nucleus);
            polygons.extend(group.nors);
        }
        polygons.extend(self.passthrough);
        if keep_discarded {
            polygons.extend(self.discarded.into_iter().map(|(mut polygon, _)| {
                polygon.label = format!("{DISCARDED_PREFIX}{}", polygon.label);
                polygon
            }));
        }
        polygons
    }
}

fn min_pixel_count(max_pixels: u32, min_percent: f64) -> u32 {
    ((min_percent * max_pixels as f64) / 100.0) as u32
}

fn within_size(polygon: &PolygonAnnotation, max_pixels: u32, min_percent: f64) -> bool {
    let min = min_pixel_count(max_pixels, min_percent);
    let pixels = polygon.filled_pixel_count();
    min <= pixels && pixels <= max_pixels
}

fn any_point_inside(child: &PolygonAnnotation, parent: &PolygonAnnotation) -> bool {
    child.points.iter().any(|p| point_in_polygon(p, &parent.points))
}

/// Filter nucleus and AgNOR polygons.
///
/// Order of the checks: size limits on the filled polygons, optional bounding
/// boxes, optional smoothing of the nuclei, nuclei without AgNORs, overlapping
/// or deformed nuclei (filled convex hull too far above the filled polygon),
/// and finally AgNORs outside every kept nucleus. Holes follow the fate of
/// their outer boundary.
pub fn analyze(
    polygons: Vec<PolygonAnnotation>,
    settings: &AnalysisSettings,
    boxes: Option<&[BoundingBox]>,
) -> AnalysisOutcome {
    run(polygons, settings, boxes, true)
}

/// Group AgNORs under the nuclei containing them without the size and shape
/// filters. Nuclei are still restricted to `boxes`; AgNORs outside every
/// nucleus are only discarded when boxes are given and pass through otherwise.
pub fn group_nuclei(
    polygons: Vec<PolygonAnnotation>,
    settings: &AnalysisSettings,
    boxes: Option<&[BoundingBox]>,
) -> AnalysisOutcome {
    run(polygons, settings, boxes, false)
}

fn run(
    polygons: Vec<PolygonAnnotation>,
    settings: &AnalysisSettings,
    boxes: Option<&[BoundingBox]>,
    filter: bool,
) -> AnalysisOutcome {
    let mut outcome = AnalysisOutcome::default();
    let mut nuclei = Vec::new();
    let mut nors = Vec::new();
    let mut holes = Vec::new();

    for polygon in polygons {
        if polygon.is_hole() {
            holes.push(polygon);
        } else if polygon.label == settings.nucleus_label {
            nuclei.push(polygon);
        } else if polygon.label == settings.nor_label {
            nors.push(polygon);
        } else {
            outcome.passthrough.push(polygon);
        }
    }

    if filter {
        let (kept, too_big_or_small): (Vec<_>, Vec<_>) = nuclei
            .into_iter()
            .partition(|n| within_size(n, settings.max_nucleus_pixels, settings.min_nucleus_percent));
        outcome.discarded.extend(too_big_or_small.into_iter().map(|n| (n, DiscardReason::Size)));
        nuclei = kept;

        let (kept, too_big_or_small): (Vec<_>, Vec<_>) = nors
            .into_iter()
            .partition(|n| within_size(n, settings.max_nor_pixels, settings.min_nor_percent));
        outcome.discarded.extend(too_big_or_small.into_iter().map(|n| (n, DiscardReason::Size)));
        nors = kept;
    }

    if let Some(boxes) = boxes {
        let (inside, outside): (Vec<_>, Vec<_>) = nuclei
            .into_iter()
            .partition(|n| n.points.iter().any(|p| boxes.iter().any(|b| b.contains(p))));
        outcome.discarded.extend(outside.into_iter().map(|n| (n, DiscardReason::OutsideBoundingBox)));
        nuclei = inside;
    }

    if filter {
        if let Some(count) = settings.smooth_nucleus_points {
            for nucleus in nuclei.iter_mut() {
                nucleus.points = smooth_closed(&nucleus.points, count);
            }
        }

        let (kept, without_nors): (Vec<_>, Vec<_>) = nuclei
            .into_iter()
            .partition(|n| nors.iter().any(|nor| any_point_inside(nor, n)));
        outcome.discarded.extend(without_nors.into_iter().map(|n| (n, DiscardReason::NoAgnor)));

        let (kept, deformed): (Vec<_>, Vec<_>) = kept
            .into_iter()
            .partition(|n| convexity_defect_percent(&n.points) <= settings.max_convex_diff_percent);
        outcome.discarded.extend(deformed.into_iter().map(|n| (n, DiscardReason::Deformed)));
        nuclei = kept;
    }

    outcome.nuclei = nuclei
        .into_iter()
        .map(|nucleus| NucleusGroup { nucleus, nors: Vec::new() })
        .collect();
    for nor in nors {
        match outcome.nuclei.iter_mut().find(|g| any_point_inside(&nor, &g.nucleus)) {
            Some(group) => group.nors.push(nor),
            None if filter || boxes.is_some() => outcome.discarded.push((nor, DiscardReason::OutsideNucleus)),
            None => outcome.passthrough.push(nor),
        }
    }

    let kept_groups: HashSet<u32> = outcome
        .nuclei
        .iter()
        .flat_map(|g| std::iter::once(&g.nucleus).chain(g.nors.iter()))
        .chain(outcome.passthrough.iter())
        .filter_map(|p| p.group_id)
        .collect();
    outcome
        .passthrough
        .extend(holes.into_iter().filter(|h| h.group_id.is_some_and(|id| kept_groups.contains(&id))));

    debug!(
        "Analysis kept {} nuclei, {} AgNORs, discarded {}",
        outcome.nuclei.len(),
        outcome.nor_count(),
        outcome.discarded.len()
    );
    outcome
}
