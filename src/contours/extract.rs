use std::collections::BTreeMap;

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::point::Point;
use imageproc::region_labelling::{connected_components, Connectivity};
use log::{debug, trace};

use crate::config::{ClassSpec, HolePolicy, Settings, DEFAULT_MIN_AREA, DEFAULT_SIMPLIFY_EPSILON};
use crate::contours::geometry::{clamp_to_bounds, dedup_closed, polygon_area, simplify_closed};
use crate::contours::{ContourRole, PolygonAnnotation};
use crate::error::Result;
use crate::model::SegmentationMask;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConverterOptions {
    /// Douglas-Peucker tolerance in pixels, `0` keeps every traced point.
    pub simplify_epsilon: f64,
    pub hole_policy: HolePolicy,
    /// Used for classes without their own `min_area`.
    pub default_min_area: u32,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            simplify_epsilon: DEFAULT_SIMPLIFY_EPSILON,
            hole_policy: HolePolicy::Ignore,
            default_min_area: DEFAULT_MIN_AREA,
        }
    }
}

impl ConverterOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            simplify_epsilon: settings.simplify_epsilon,
            hole_policy: settings.hole_policy,
            default_min_area: settings.default_min_area,
        }
    }

    pub fn min_area_for(&self, class: &ClassSpec) -> u32 {
        class.min_area.unwrap_or(self.default_min_area)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ComponentStats {
    area: u32,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl ComponentStats {
    fn include(&mut self, x: u32, y: u32) {
        if self.area == 0 {
            (self.min_x, self.min_y, self.max_x, self.max_y) = (x, y, x, y);
        } else {
            self.min_x = self.min_x.min(x);
            self.min_y = self.min_y.min(y);
            self.max_x = self.max_x.max(x);
            self.max_y = self.max_y.max(y);
        }
        self.area += 1;
    }
}

struct TracedRegion {
    area: u32,
    outer: Vec<Point<i32>>,
    holes: Vec<Vec<Point<i32>>>,
}

/// Converts a class mask into one polygon per connected region and class.
#[derive(Debug, Clone, Default)]
pub struct MaskConverter {
    options: ConverterOptions,
}

impl MaskConverter {
    pub fn new(options: ConverterOptions) -> Self {
        Self { options }
    }

    /// Convert after checking the mask matches the image it was predicted for.
    pub fn convert_for_image(
        &self,
        mask: &SegmentationMask,
        classes: &[ClassSpec],
        image_width: u32,
        image_height: u32,
    ) -> Result<Vec<PolygonAnnotation>> {
        mask.check_dimensions(image_width as usize, image_height as usize)?;
        Ok(self.convert(mask, classes))
    }

    /// Polygons for every class, in class order then raster order of the
    /// regions' first pixel. A mask without foreground yields nothing.
    pub fn convert(&self, mask: &SegmentationMask, classes: &[ClassSpec]) -> Vec<PolygonAnnotation> {
        let mut polygons = Vec::new();
        let mut next_group = 0u32;

        for class in classes {
            let min_area = self.options.min_area_for(class);
            let regions = self.trace_class(mask, class, min_area);
            debug!("Class '{}': {} region(s) kept", class.label, regions.len());

            for region in regions {
                let group_id = match self.options.hole_policy {
                    HolePolicy::Inner if !region.holes.is_empty() => {
                        next_group += 1;
                        Some(next_group)
                    }
                    _ => None,
                };

                polygons.push(PolygonAnnotation {
                    label: class.label.clone(),
                    class_id: class.class_id(),
                    points: region.outer,
                    area: region.area,
                    role: ContourRole::Outer,
                    group_id,
                });

                if self.options.hole_policy == HolePolicy::Inner {
                    for hole in region.holes {
                        polygons.push(PolygonAnnotation {
                            label: class.label.clone(),
                            class_id: class.class_id(),
                            points: hole,
                            area: region.area,
                            role: ContourRole::Hole,
                            group_id,
                        });
                    }
                }
            }
        }

        polygons
    }

    fn trace_class(&self, mask: &SegmentationMask, class: &ClassSpec, min_area: u32) -> Vec<TracedRegion> {
        let binary = mask.binary_for(class);
        let (width, height) = binary.dimensions();
        let components = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

        let mut stats: BTreeMap<u32, ComponentStats> = BTreeMap::new();
        for (x, y, label) in components.enumerate_pixels() {
            if label.0[0] != 0 {
                stats.entry(label.0[0]).or_default().include(x, y);
            }
        }

        let mut regions = Vec::new();
        for (label, stat) in stats {
            if stat.area < min_area {
                trace!("Dropping region {} of '{}' with {} px", label, class.label, stat.area);
                continue;
            }

            // One pixel of padding so regions on the image border trace like interior ones.
            let crop_w = stat.max_x - stat.min_x + 3;
            let crop_h = stat.max_y - stat.min_y + 3;
            let mut crop = GrayImage::new(crop_w, crop_h);
            for y in stat.min_y..=stat.max_y {
                for x in stat.min_x..=stat.max_x {
                    if components.get_pixel(x, y).0[0] == label {
                        crop.put_pixel(x - stat.min_x + 1, y - stat.min_y + 1, Luma([255]));
                    }
                }
            }

            let offset = Point::new(stat.min_x as i32 - 1, stat.min_y as i32 - 1);
            let contours = find_contours::<i32>(&crop);
            let outer_idx = contours
                .iter()
                .position(|c| c.border_type == BorderType::Outer && c.parent.is_none());

            let mut outer = outer_idx
                .map(|i| self.finish_ring(&contours[i].points, offset, width, height))
                .unwrap_or_default();
            // A one pixel wide line traces as a ring that doubles back on itself.
            if outer.len() < 3 || polygon_area(&outer) == 0.0 {
                outer = pixel_rect(&stat, width, height);
            }

            let holes = contours
                .iter()
                .filter(|c| c.border_type == BorderType::Hole && c.parent.is_some() && c.parent == outer_idx)
                .map(|c| self.finish_ring(&c.points, offset, width, height))
                .filter(|ring| ring.len() >= 3 && polygon_area(ring) > 0.0)
                .collect();

            regions.push(TracedRegion { area: stat.area, outer, holes });
        }

        regions
    }

    fn finish_ring(&self, points: &[Point<i32>], offset: Point<i32>, width: u32, height: u32) -> Vec<Point<i32>> {
        let mut ring: Vec<Point<i32>> = points.iter().map(|p| Point::new(p.x + offset.x, p.y + offset.y)).collect();
        clamp_to_bounds(&mut ring, width, height);
        let ring = dedup_closed(&ring);
        simplify_closed(&ring, self.options.simplify_epsilon)
    }
}

/// Rectangle around a region too thin to trace a polygon with area. Widened
/// by one pixel where the image allows it.
fn pixel_rect(stat: &ComponentStats, width: u32, height: u32) -> Vec<Point<i32>> {
    let (mut x0, mut y0, mut x1, mut y1) = (stat.min_x, stat.min_y, stat.max_x, stat.max_y);
    if x0 == x1 {
        if x1 + 1 < width {
            x1 += 1;
        } else if x0 > 0 {
            x0 -= 1;
        }
    }
    if y0 == y1 {
        if y1 + 1 < height {
            y1 += 1;
        } else if y0 > 0 {
            y0 -= 1;
        }
    }
    let (x0, y0, x1, y1) = (x0 as i32, y0 as i32, x1 as i32, y1 as i32);
    vec![Point::new(x0, y0), Point::new(x1, y0), Point::new(x1, y1), Point::new(x0, y1)]
}
