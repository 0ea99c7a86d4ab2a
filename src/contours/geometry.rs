use image::{GrayImage, Luma};
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut};
use imageproc::point::Point;
use itertools::Itertools;
use nalgebra::{Point2, Vector2};

fn to_na(p: &Point<i32>) -> Point2<f64> {
    Point2::new(p.x as f64, p.y as f64)
}

/// Shoelace area of a closed polygon (the last point connects to the first).
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: f64 = points
        .iter()
        .circular_tuple_windows()
        .map(|(a, b)| to_na(a).coords.perp(&to_na(b).coords))
        .sum();
    twice.abs() / 2.0
}

fn cross(o: &Point<i32>, a: &Point<i32>, b: &Point<i32>) -> f64 {
    let oa: Vector2<f64> = to_na(a) - to_na(o);
    let ob: Vector2<f64> = to_na(b) - to_na(o);
    oa.perp(&ob)
}

/// Monotone chain convex hull, counter-clockwise in image coordinates
/// (y grows downwards), without repeated points.
pub fn convex_hull(points: &[Point<i32>]) -> Vec<Point<i32>> {
    let mut sorted: Vec<Point<i32>> = points.iter().copied().sorted_by_key(|p| (p.x, p.y)).dedup().collect();
    if sorted.len() < 3 {
        return sorted;
    }

    let mut lower: Vec<Point<i32>> = Vec::with_capacity(sorted.len());
    for p in &sorted {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(*p);
    }

    sorted.reverse();
    let mut upper: Vec<Point<i32>> = Vec::with_capacity(sorted.len());
    for p in &sorted {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(*p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

fn on_segment(p: &Point<i32>, a: &Point<i32>, b: &Point<i32>) -> bool {
    cross(a, b, p) == 0.0
        && p.x >= a.x.min(b.x)
        && p.x <= a.x.max(b.x)
        && p.y >= a.y.min(b.y)
        && p.y <= a.y.max(b.y)
}

/// Inside-or-on-boundary test against a closed polygon.
pub fn point_in_polygon(p: &Point<i32>, polygon: &[Point<i32>]) -> bool {
    match polygon.len() {
        0 => return false,
        1 => return polygon[0] == *p,
        _ => {}
    }
    if polygon.iter().circular_tuple_windows().any(|(a, b)| on_segment(p, a, b)) {
        return true;
    }

    let (px, py) = (p.x as f64, p.y as f64);
    let mut inside = false;
    for (a, b) in polygon.iter().circular_tuple_windows() {
        let (ax, ay, bx, by) = (a.x as f64, a.y as f64, b.x as f64, b.y as f64);
        if (ay > py) != (by > py) {
            let x_cross = ax + (py - ay) * (bx - ax) / (by - ay);
            if px < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

/// Number of pixels covered by the filled polygon, boundary included. Holes
/// inside the polygon are covered too.
pub fn filled_pixel_count(points: &[Point<i32>]) -> u32 {
    let ring = dedup_closed(points);
    let Some((min_x, max_x)) = ring.iter().map(|p| p.x).minmax().into_option() else {
        return 0;
    };
    let Some((min_y, max_y)) = ring.iter().map(|p| p.y).minmax().into_option() else {
        return 0;
    };
    if ring.len() == 1 {
        return 1;
    }

    let mut canvas = GrayImage::new((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32);
    let local: Vec<Point<i32>> = ring.iter().map(|p| Point::new(p.x - min_x, p.y - min_y)).collect();
    if polygon_area(&local) > 0.0 {
        draw_polygon_mut(&mut canvas, &local, Luma([255u8]));
    }
    for (a, b) in local.iter().circular_tuple_windows() {
        draw_line_segment_mut(&mut canvas, (a.x as f32, a.y as f32), (b.x as f32, b.y as f32), Luma([255u8]));
    }
    canvas.pixels().filter(|p| p.0[0] != 0).count() as u32
}

/// Percent difference between the filled pixel counts of the convex hull and
/// of the polygon, relative to their mean.
pub fn convexity_defect_percent(points: &[Point<i32>]) -> f64 {
    let area = filled_pixel_count(points) as f64;
    let hull_area = filled_pixel_count(&convex_hull(points)) as f64;
    let mean = (hull_area + area) / 2.0;
    if mean <= 0.0 {
        return 0.0;
    }
    (hull_area - area) / mean * 100.0
}

pub fn clamp_to_bounds(points: &mut [Point<i32>], width: u32, height: u32) {
    let max_x = width.saturating_sub(1) as i32;
    let max_y = height.saturating_sub(1) as i32;
    for p in points.iter_mut() {
        p.x = p.x.clamp(0, max_x);
        p.y = p.y.clamp(0, max_y);
    }
}

/// Drops consecutive duplicates, including a closing point equal to the first.
pub fn dedup_closed(points: &[Point<i32>]) -> Vec<Point<i32>> {
    let mut out: Vec<Point<i32>> = points.iter().copied().dedup().collect();
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}

fn perpendicular_distance(p: &Point<i32>, start: &Point<i32>, end: &Point<i32>) -> f64 {
    let line: Vector2<f64> = to_na(end) - to_na(start);
    let offset: Vector2<f64> = to_na(p) - to_na(start);
    let norm = line.norm();
    if norm < 1e-9 {
        return offset.norm();
    }
    line.perp(&offset).abs() / norm
}

fn douglas_peucker(points: &[Point<i32>], epsilon: f64, out: &mut Vec<Point<i32>>) {
    if points.len() <= 2 {
        out.extend_from_slice(points);
        return;
    }

    let start = &points[0];
    let end = &points[points.len() - 1];
    let (max_idx, max_dist) = points[1..points.len() - 1]
        .iter()
        .enumerate()
        .map(|(i, p)| (i + 1, perpendicular_distance(p, start, end)))
        .fold((0, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });

    if max_dist > epsilon {
        douglas_peucker(&points[..=max_idx], epsilon, out);
        out.pop();
        douglas_peucker(&points[max_idx..], epsilon, out);
    } else {
        out.push(*start);
        out.push(*end);
    }
}

/// Douglas-Peucker simplification of a closed contour. The contour is split at
/// the vertex farthest from its first point and both halves are simplified as
/// open chains. Never returns fewer than three points when given three or more.
pub fn simplify_closed(points: &[Point<i32>], epsilon: f64) -> Vec<Point<i32>> {
    if epsilon <= 0.0 || points.len() <= 3 {
        return points.to_vec();
    }

    let first = to_na(&points[0]);
    let split = points
        .iter()
        .enumerate()
        .map(|(i, p)| (i, (to_na(p) - first).norm_squared()))
        .fold((0, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best })
        .0;
    if split == 0 {
        return points.to_vec();
    }

    let mut simplified = Vec::with_capacity(points.len());
    douglas_peucker(&points[..=split], epsilon, &mut simplified);
    simplified.pop();
    let mut tail: Vec<Point<i32>> = points[split..].to_vec();
    tail.push(points[0]);
    douglas_peucker(&tail, epsilon, &mut simplified);
    simplified.pop();

    if simplified.len() < 3 {
        return points.to_vec();
    }
    simplified
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(coords: &[(i32, i32)]) -> Vec<Point<i32>> {
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn test_polygon_area_square() {
        let square = pts(&[(0, 0), (4, 0), (4, 4), (0, 4)]);
        assert!((polygon_area(&square) - 16.0).abs() < 1e-9);
        assert_eq!(polygon_area(&square[..2]), 0.0);
    }

    #[test]
    fn test_convex_hull_drops_interior_and_concave_points() {
        let shape = pts(&[(0, 0), (4, 0), (2, 1), (4, 4), (0, 4), (2, 2)]);
        let hull = convex_hull(&shape);
        assert_eq!(hull.len(), 4);
        assert!((polygon_area(&hull) - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_point_in_polygon_includes_boundary() {
        let square = pts(&[(0, 0), (4, 0), (4, 4), (0, 4)]);
        assert!(point_in_polygon(&Point::new(2, 2), &square));
        assert!(point_in_polygon(&Point::new(0, 2), &square));
        assert!(point_in_polygon(&Point::new(4, 4), &square));
        assert!(!point_in_polygon(&Point::new(5, 2), &square));
        assert!(!point_in_polygon(&Point::new(-1, -1), &square));
    }

    #[test]
    fn test_filled_pixel_count_includes_boundary() {
        let square = pts(&[(0, 0), (3, 0), (3, 3), (0, 3)]);
        assert_eq!(filled_pixel_count(&square), 16);
        assert_eq!(filled_pixel_count(&pts(&[(5, 5)])), 1);
        assert_eq!(filled_pixel_count(&pts(&[(1, 1), (3, 1), (2, 1)])), 3);
        assert_eq!(filled_pixel_count(&[]), 0);
    }

    #[test]
    fn test_convexity_defect_of_notched_square() {
        let square = pts(&[(0, 0), (10, 0), (10, 10), (0, 10)]);
        assert!(convexity_defect_percent(&square).abs() < 1e-9);

        let notched = pts(&[(0, 0), (10, 0), (10, 10), (5, 2), (0, 10)]);
        assert!(convexity_defect_percent(&notched) > 5.0);
    }

    #[test]
    fn test_simplify_closed_removes_collinear_points() {
        let square = pts(&[(0, 0), (1, 0), (2, 0), (3, 0), (3, 1), (3, 2), (3, 3), (2, 3), (1, 3), (0, 3), (0, 2), (0, 1)]);
        let simplified = simplify_closed(&square, 0.5);
        assert_eq!(simplified.len(), 4);
        for corner in pts(&[(0, 0), (3, 0), (3, 3), (0, 3)]) {
            assert!(simplified.contains(&corner));
        }
    }

    #[test]
    fn test_simplify_disabled_with_zero_epsilon() {
        let tri = pts(&[(0, 0), (1, 0), (2, 0), (1, 1)]);
        assert_eq!(simplify_closed(&tri, 0.0), tri);
    }

    #[test]
    fn test_dedup_closed() {
        let ring = pts(&[(0, 0), (0, 0), (1, 0), (1, 1), (0, 0)]);
        assert_eq!(dedup_closed(&ring), pts(&[(0, 0), (1, 0), (1, 1)]));
    }

    #[test]
    fn test_clamp_to_bounds() {
        let mut ring = pts(&[(-1, 3), (9, -2), (12, 12)]);
        clamp_to_bounds(&mut ring, 10, 10);
        assert_eq!(ring, pts(&[(0, 3), (9, 0), (9, 9)]));
    }
}
