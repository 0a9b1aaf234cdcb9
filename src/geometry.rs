//! Planar transforms mapping piece coordinates into reference coordinates,
//! and the minimal-sample and least-squares fitters used by RANSAC.

use glam::Vec2;
use nalgebra as na;

/// Smallest squared baseline accepted for a minimal sample, in pixels².
const MIN_BASELINE_SQ: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlanarTransform {
    /// `p' = z * p + t` with `z = a + ib` read as a complex number: rotation,
    /// uniform scale and translation.
    Similarity { a: f64, b: f64, tx: f64, ty: f64 },
    /// Projective transform, normalized so that `h[(2, 2)] == 1`.
    Homography(na::Matrix3<f64>),
}

impl PlanarTransform {
    /// Maps a point, `None` when it lands on the homography's line at
    /// infinity or the result is not finite.
    pub fn apply(&self, p: Vec2) -> Option<Vec2> {
        let (x, y) = (p.x as f64, p.y as f64);
        let (u, v) = match self {
            PlanarTransform::Similarity { a, b, tx, ty } => {
                (a * x - b * y + tx, b * x + a * y + ty)
            }
            PlanarTransform::Homography(h) => {
                let r = h * na::Vector3::new(x, y, 1.0);
                if r.z.abs() < 1e-12 {
                    return None;
                }
                (r.x / r.z, r.y / r.z)
            }
        };
        if u.is_finite() && v.is_finite() {
            Some(Vec2::new(u as f32, v as f32))
        } else {
            None
        }
    }

    /// Linear scale factor. For a homography this is the square root of the
    /// affine part's determinant, which is exact at the origin.
    pub fn scale(&self) -> f64 {
        match self {
            PlanarTransform::Similarity { a, b, .. } => a.hypot(*b),
            PlanarTransform::Homography(h) => {
                let det = h[(0, 0)] * h[(1, 1)] - h[(0, 1)] * h[(1, 0)];
                det.abs().sqrt()
            }
        }
    }

    /// False for mirrored mappings, which a physical piece cannot produce.
    pub fn preserves_orientation(&self) -> bool {
        match self {
            PlanarTransform::Similarity { .. } => true,
            PlanarTransform::Homography(h) => {
                h[(0, 0)] * h[(1, 1)] - h[(0, 1)] * h[(1, 0)] > 0.0
            }
        }
    }

    pub fn rotation(&self) -> Option<f64> {
        match self {
            PlanarTransform::Similarity { a, b, .. } => Some(b.atan2(*a)),
            PlanarTransform::Homography(_) => None,
        }
    }
}

/// Exact similarity through two correspondences.
pub fn similarity_from_2pt(src: [Vec2; 2], dst: [Vec2; 2]) -> Option<PlanarTransform> {
    let (sx, sy) = ((src[1].x - src[0].x) as f64, (src[1].y - src[0].y) as f64);
    let (dx, dy) = ((dst[1].x - dst[0].x) as f64, (dst[1].y - dst[0].y) as f64);
    let norm = sx * sx + sy * sy;
    if norm < MIN_BASELINE_SQ {
        return None;
    }
    // z = d / s
    let a = (dx * sx + dy * sy) / norm;
    let b = (dy * sx - dx * sy) / norm;
    let (x0, y0) = (src[0].x as f64, src[0].y as f64);
    let tx = dst[0].x as f64 - (a * x0 - b * y0);
    let ty = dst[0].y as f64 - (b * x0 + a * y0);
    Some(PlanarTransform::Similarity { a, b, tx, ty })
}

/// Least-squares similarity over any number of correspondences.
pub fn similarity_least_squares(src: &[Vec2], dst: &[Vec2]) -> Option<PlanarTransform> {
    if src.len() != dst.len() || src.len() < 2 {
        return None;
    }
    let n = src.len() as f64;
    let centroid = |pts: &[Vec2]| {
        pts.iter()
            .fold((0.0f64, 0.0f64), |(x, y), p| (x + p.x as f64, y + p.y as f64))
    };
    let (scx, scy) = centroid(src);
    let (dcx, dcy) = centroid(dst);
    let (scx, scy, dcx, dcy) = (scx / n, scy / n, dcx / n, dcy / n);

    let (mut re, mut im, mut norm) = (0.0, 0.0, 0.0);
    for (s, d) in src.iter().zip(dst) {
        let (sx, sy) = (s.x as f64 - scx, s.y as f64 - scy);
        let (dx, dy) = (d.x as f64 - dcx, d.y as f64 - dcy);
        re += dx * sx + dy * sy;
        im += dy * sx - dx * sy;
        norm += sx * sx + sy * sy;
    }
    if norm < MIN_BASELINE_SQ {
        return None;
    }
    let (a, b) = (re / norm, im / norm);
    Some(PlanarTransform::Similarity {
        a,
        b,
        tx: dcx - (a * scx - b * scy),
        ty: dcy - (b * scx + a * scy),
    })
}

fn hartley_normalization(pts: &[Vec2]) -> (Vec<na::Point2<f64>>, na::Matrix3<f64>) {
    let n = pts.len() as f64;
    let (mut cx, mut cy) = (0.0, 0.0);
    for p in pts {
        cx += p.x as f64;
        cy += p.y as f64;
    }
    cx /= n;
    cy /= n;
    let mean_dist = pts
        .iter()
        .map(|p| (p.x as f64 - cx).hypot(p.y as f64 - cy))
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-12 {
        2f64.sqrt() / mean_dist
    } else {
        1.0
    };
    let t = na::Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let out = pts
        .iter()
        .map(|p| na::Point2::new(s * (p.x as f64 - cx), s * (p.y as f64 - cy)))
        .collect();
    (out, t)
}

/// Normalized DLT over four or more correspondences, `dst ~ H * src`.
pub fn homography_dlt(src: &[Vec2], dst: &[Vec2]) -> Option<PlanarTransform> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }
    let (s, ts) = hartley_normalization(src);
    let (d, td) = hartley_normalization(dst);

    // At least 9 rows so the SVD exposes the full null space for 4 points.
    let rows = (2 * src.len()).max(9);
    let mut a = na::DMatrix::<f64>::zeros(rows, 9);
    for k in 0..src.len() {
        let (x, y) = (s[k].x, s[k].y);
        let (u, v) = (d[k].x, d[k].y);
        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let smallest = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|l, r| l.1.total_cmp(r.1))
        .map(|(i, _)| i)?;
    let h = v_t.row(smallest);
    let hn = na::Matrix3::from_row_slice(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]]);

    let h = td.try_inverse()? * hn * ts;
    let w = h[(2, 2)];
    if w.abs() < 1e-12 || h.iter().any(|c| !c.is_finite()) {
        return None;
    }
    Some(PlanarTransform::Homography(h / w))
}

/// True when some three of the points are (nearly) collinear.
pub fn has_collinear_triplet(pts: &[Vec2]) -> bool {
    for i in 0..pts.len() {
        for j in i + 1..pts.len() {
            for k in j + 1..pts.len() {
                let e1 = pts[j] - pts[i];
                let e2 = pts[k] - pts[i];
                if e1.perp_dot(e2).abs() < 1.0 {
                    return true;
                }
            }
        }
    }
    false
}
