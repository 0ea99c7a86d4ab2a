//! Optional resampling of nucleus contours.
//!
//! A traced contour follows the pixel staircase of the mask. Smoothing walks
//! the closed contour as a piecewise linear curve and takes a fixed number of
//! samples evenly spaced along its length, which removes the staircase and
//! gives every nucleus the same number of vertices.

use imageproc::point::Point;
use itertools::Itertools;
use nalgebra::Point2;

use crate::contours::geometry::dedup_closed;

/// Vertices of a smoothed nucleus contour.
pub const SMOOTHED_NUCLEUS_POINTS: usize = 40;

fn to_na(p: &Point<i32>) -> Point2<f64> {
    Point2::new(p.x as f64, p.y as f64)
}

/// Resample a closed contour to `count` points evenly spaced along its
/// perimeter. Contours with fewer than three points, or resamplings that
/// collapse below three distinct points, are returned unchanged.
pub fn smooth_closed(points: &[Point<i32>], count: usize) -> Vec<Point<i32>> {
    let ring = dedup_closed(points);
    if ring.len() < 3 || count < 3 {
        return points.to_vec();
    }

    let edges: Vec<(Point2<f64>, Point2<f64>, f64)> = ring
        .iter()
        .circular_tuple_windows()
        .map(|(a, b)| {
            let (a, b) = (to_na(a), to_na(b));
            (a, b, (b - a).norm())
        })
        .collect();
    let perimeter: f64 = edges.iter().map(|e| e.2).sum();
    if perimeter <= 0.0 {
        return points.to_vec();
    }

    let mut samples = Vec::with_capacity(count);
    let mut edge = 0;
    let mut walked = 0.0;
    for i in 0..count {
        let target = perimeter * i as f64 / count as f64;
        while edge + 1 < edges.len() && walked + edges[edge].2 < target {
            walked += edges[edge].2;
            edge += 1;
        }
        let (a, b, length) = edges[edge];
        let t = if length > 0.0 { ((target - walked) / length).clamp(0.0, 1.0) } else { 0.0 };
        let p = a + (b - a) * t;
        samples.push(Point::new(p.x.round() as i32, p.y.round() as i32));
    }

    let smoothed = dedup_closed(&samples);
    if smoothed.len() < 3 {
        return points.to_vec();
    }
    smoothed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contours::geometry::{point_in_polygon, polygon_area};

    fn staircase_square(size: i32) -> Vec<Point<i32>> {
        let mut ring = Vec::new();
        for x in 0..size {
            ring.push(Point::new(x, 0));
        }
        for y in 1..size {
            ring.push(Point::new(size - 1, y));
        }
        for x in (0..size - 1).rev() {
            ring.push(Point::new(x, size - 1));
        }
        for y in (1..size - 1).rev() {
            ring.push(Point::new(0, y));
        }
        ring
    }

    #[test]
    fn test_resamples_to_requested_count() {
        let square = staircase_square(30);
        assert!(square.len() > SMOOTHED_NUCLEUS_POINTS);

        let smoothed = smooth_closed(&square, SMOOTHED_NUCLEUS_POINTS);
        assert!(smoothed.len() >= SMOOTHED_NUCLEUS_POINTS - 1);
        assert!(smoothed.len() <= SMOOTHED_NUCLEUS_POINTS);
        assert_eq!(smoothed[0], Point::new(0, 0));
        for p in &smoothed {
            assert!(point_in_polygon(p, &square));
        }
        let ratio = polygon_area(&smoothed) / polygon_area(&square);
        assert!(ratio > 0.9 && ratio <= 1.0);
    }

    #[test]
    fn test_degenerate_contours_are_kept() {
        let pair = vec![Point::new(0, 0), Point::new(4, 0)];
        assert_eq!(smooth_closed(&pair, SMOOTHED_NUCLEUS_POINTS), pair);

        let tri = vec![Point::new(0, 0), Point::new(4, 0), Point::new(0, 4)];
        assert_eq!(smooth_closed(&tri, 2), tri);
    }
}
