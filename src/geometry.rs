use imageproc::geometry::convex_hull;
use imageproc::point::Point;
use nalgebra::{Matrix3, Vector3};

/// A rotated rectangle in image coordinates (y pointing down)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    /// Center point (x, y)
    pub center: (f64, f64),
    /// Extent along the direction given by `angle`
    pub width: f64,
    /// Extent perpendicular to `angle`
    pub height: f64,
    /// Direction of the first edge relative to +x, degrees in (-90, 90]
    pub angle: f64,
}

impl RotatedRect {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Fold an undirected line angle into (-90, 90]
fn fold_half_turn(degrees: f64) -> f64 {
    let folded = degrees.rem_euclid(180.0);
    if folded > 90.0 {
        folded - 180.0
    } else {
        folded
    }
}

/// Minimum-area rectangle enclosing `points`, found with rotating calipers
/// over the convex hull. Returns `None` for an empty point set.
pub fn min_area_rect(points: &[Point<i32>]) -> Option<RotatedRect> {
    let hull = convex_hull(points);

    match hull.len() {
        0 => return None,
        1 => {
            let p = hull[0];
            return Some(RotatedRect {
                center: (p.x as f64, p.y as f64),
                width: 0.0,
                height: 0.0,
                angle: 0.0,
            });
        }
        _ => {}
    }

    let hull: Vec<(f64, f64)> = hull.iter().map(|p| (p.x as f64, p.y as f64)).collect();
    let n = hull.len();
    let mut best: Option<RotatedRect> = None;

    for i in 0..n {
        let origin = hull[i];
        let next = hull[(i + 1) % n];
        let (edge_x, edge_y) = (next.0 - origin.0, next.1 - origin.1);
        let length = edge_x.hypot(edge_y);
        if length < f64::EPSILON {
            continue;
        }

        // Unit vectors along and across the edge
        let (ux, uy) = (edge_x / length, edge_y / length);
        let (vx, vy) = (-uy, ux);

        let mut min_u = f64::INFINITY;
        let mut max_u = f64::NEG_INFINITY;
        let mut min_v = f64::INFINITY;
        let mut max_v = f64::NEG_INFINITY;
        for &(x, y) in &hull {
            let (dx, dy) = (x - origin.0, y - origin.1);
            let u = dx * ux + dy * uy;
            let v = dx * vx + dy * vy;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }

        let width = max_u - min_u;
        let height = max_v - min_v;
        if best.is_some_and(|b| b.area() <= width * height) {
            continue;
        }

        let mid_u = (min_u + max_u) / 2.0;
        let mid_v = (min_v + max_v) / 2.0;
        best = Some(RotatedRect {
            center: (
                origin.0 + mid_u * ux + mid_v * vx,
                origin.1 + mid_u * uy + mid_v * vy,
            ),
            width,
            height,
            angle: fold_half_turn(uy.atan2(ux).to_degrees()),
        });
    }

    best
}

/// Map a rectangle angle onto the closest-axis rotation in (-45, 45].
///
/// The raw angle is folded into (-90, 90] first, then values below -45 are
/// shifted up by 90 and values above 45 shifted down by 90. A rectangle at
/// exactly -45 is the same rectangle as one at 45, which is the value kept.
pub fn normalize_angle(raw_degrees: f64) -> f64 {
    let angle = fold_half_turn(raw_degrees);
    let angle = if angle < -45.0 {
        90.0 + angle
    } else if angle > 45.0 {
        angle - 90.0
    } else {
        angle
    };

    if angle == -45.0 {
        45.0
    } else {
        angle
    }
}

/// Rotation-only similarity transform about `center`.
///
/// Positive angles rotate the content counter-clockwise as displayed, so an
/// edge leaning at `angle_degrees` (measured with y pointing down) comes out
/// horizontal.
pub fn rotation_matrix(angle_degrees: f64, center: (f64, f64)) -> Matrix3<f64> {
    let (sin, cos) = angle_degrees.to_radians().sin_cos();
    let (cx, cy) = center;

    #[rustfmt::skip]
    let translate_to_origin = Matrix3::new(
        1.0, 0.0, -cx,
        0.0, 1.0, -cy,
        0.0, 0.0, 1.0,
    );

    #[rustfmt::skip]
    let rotate = Matrix3::new(
        cos,  sin, 0.0,
        -sin, cos, 0.0,
        0.0,  0.0, 1.0,
    );

    #[rustfmt::skip]
    let translate_back = Matrix3::new(
        1.0, 0.0, cx,
        0.0, 1.0, cy,
        0.0, 0.0, 1.0,
    );

    translate_back * rotate * translate_to_origin
}

/// Transform a point using the affine matrix
pub fn transform_point(matrix: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    let result = matrix * Vector3::new(x, y, 1.0);
    (result.x / result.z, result.y / result.z)
}
