use glam::Vec2;
use nalgebra as na;
use rayon::prelude::*;

use super::Keypoint;
use super::scale_space::ScaleSpace;
use crate::config::ExtractorParams;
use crate::raster::Plane;

const MAX_REFINE_STEPS: usize = 5;

/// A refined scale-space extremum, in octave-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extremum {
    pub octave: usize,
    /// Gaussian layer the extremum was found on.
    pub layer: usize,
    pub x: f32,
    pub y: f32,
    /// Sigma relative to the octave's sampling grid.
    pub octave_sigma: f32,
    pub response: f32,
}

impl Extremum {
    #[inline]
    pub fn octave_factor(&self) -> f32 {
        (1u32 << self.octave) as f32
    }

    pub fn image_point(&self) -> Vec2 {
        Vec2::new(self.x, self.y) * self.octave_factor()
    }

    pub fn image_scale(&self) -> f32 {
        self.octave_sigma * self.octave_factor()
    }

    pub fn to_keypoint(&self, angle: f32) -> Keypoint {
        Keypoint {
            pt: self.image_point(),
            scale: self.image_scale(),
            angle,
            response: self.response,
            octave: self.octave,
            layer: self.layer,
        }
    }
}

/// Scans every interior DoG layer for 26-neighborhood extrema and keeps
/// the ones that survive sub-pixel refinement, contrast and edge tests.
pub fn find_extrema(space: &ScaleSpace, params: &ExtractorParams) -> Vec<Extremum> {
    let s = space.intervals;
    let prefilter = 0.5 * params.contrast_threshold / s as f32;
    let border = params.image_border.max(1);
    let mut out = Vec::new();

    for (o, octave) in space.octaves.iter().enumerate() {
        let w = octave.dogs[0].width();
        let h = octave.dogs[0].height();
        if w <= 2 * border + 2 || h <= 2 * border + 2 {
            continue;
        }
        for layer in 1..=s {
            let rows: Vec<Vec<Extremum>> = (border..h - border)
                .into_par_iter()
                .map(|y| {
                    let mut found = Vec::new();
                    for x in border..w - border {
                        let v = octave.dogs[layer].get(x, y);
                        if v.abs() <= prefilter || !is_local_extremum(&octave.dogs, layer, x, y) {
                            continue;
                        }
                        if let Some(e) = refine(space, params, o, layer, x, y) {
                            found.push(e);
                        }
                    }
                    found
                })
                .collect();
            out.extend(rows.into_iter().flatten());
        }
    }
    out
}

fn is_local_extremum(dogs: &[Plane], layer: usize, x: usize, y: usize) -> bool {
    let v = dogs[layer].get(x, y);
    let mut is_max = true;
    let mut is_min = true;
    for plane in &dogs[layer - 1..=layer + 1] {
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                let n = plane.get(nx, ny);
                is_max &= v >= n;
                is_min &= v <= n;
            }
        }
        if !is_max && !is_min {
            return false;
        }
    }
    is_max || is_min
}

/// Fits a 3D quadratic around the sample and moves to the interpolated
/// extremum, rejecting unstable or low-contrast points.
fn refine(
    space: &ScaleSpace,
    params: &ExtractorParams,
    octave: usize,
    layer: usize,
    x: usize,
    y: usize,
) -> Option<Extremum> {
    let dogs = &space.octaves[octave].dogs;
    let s = space.intervals;
    let border = params.image_border.max(1) as isize;
    let w = dogs[0].width() as isize;
    let h = dogs[0].height() as isize;

    let (mut xi, mut yi, mut li) = (x as isize, y as isize, layer as isize);
    let mut offset = na::Vector3::zeros();
    let mut gradient = na::Vector3::zeros();
    let mut converged = false;

    for _ in 0..MAX_REFINE_STEPS {
        let (xu, yu, lu) = (xi as usize, yi as usize, li as usize);
        let d = |dl: isize, dy: isize, dx: isize| {
            dogs[(li + dl) as usize].get((xi + dx) as usize, (yi + dy) as usize)
        };
        let v = dogs[lu].get(xu, yu);

        gradient = na::Vector3::new(
            (d(0, 0, 1) - d(0, 0, -1)) * 0.5,
            (d(0, 1, 0) - d(0, -1, 0)) * 0.5,
            (d(1, 0, 0) - d(-1, 0, 0)) * 0.5,
        );
        let dxx = d(0, 0, 1) + d(0, 0, -1) - 2.0 * v;
        let dyy = d(0, 1, 0) + d(0, -1, 0) - 2.0 * v;
        let dss = d(1, 0, 0) + d(-1, 0, 0) - 2.0 * v;
        let dxy = (d(0, 1, 1) - d(0, 1, -1) - d(0, -1, 1) + d(0, -1, -1)) * 0.25;
        let dxs = (d(1, 0, 1) - d(1, 0, -1) - d(-1, 0, 1) + d(-1, 0, -1)) * 0.25;
        let dys = (d(1, 1, 0) - d(1, -1, 0) - d(-1, 1, 0) + d(-1, -1, 0)) * 0.25;
        let hessian = na::Matrix3::new(dxx, dxy, dxs, dxy, dyy, dys, dxs, dys, dss);

        offset = -(hessian.try_inverse()? * gradient);
        if offset.iter().all(|c| c.abs() < 0.5) {
            converged = true;
            break;
        }
        if offset.iter().any(|c| !c.is_finite() || c.abs() > 1e4) {
            return None;
        }

        xi += offset.x.round() as isize;
        yi += offset.y.round() as isize;
        li += offset.z.round() as isize;
        let outside_layers = li < 1 || li > s as isize;
        let outside_image = xi < border || xi >= w - border || yi < border || yi >= h - border;
        if outside_layers || outside_image {
            return None;
        }
    }
    if !converged {
        return None;
    }

    let (xu, yu, lu) = (xi as usize, yi as usize, li as usize);
    let contrast = dogs[lu].get(xu, yu) + 0.5 * gradient.dot(&offset);
    if contrast.abs() * (s as f32) < params.contrast_threshold {
        return None;
    }

    let d = |l: usize, px: usize, py: usize| dogs[l].get(px, py);
    let v = d(lu, xu, yu);
    let dxx = d(lu, xu + 1, yu) + d(lu, xu - 1, yu) - 2.0 * v;
    let dyy = d(lu, xu, yu + 1) + d(lu, xu, yu - 1) - 2.0 * v;
    let dxy = (d(lu, xu + 1, yu + 1) - d(lu, xu - 1, yu + 1) - d(lu, xu + 1, yu - 1)
        + d(lu, xu - 1, yu - 1))
        * 0.25;
    let trace = dxx + dyy;
    let det = dxx * dyy - dxy * dxy;
    let r = params.edge_threshold;
    if det <= 0.0 || trace * trace * r >= (r + 1.0) * (r + 1.0) * det {
        return None;
    }

    Some(Extremum {
        octave,
        layer: lu,
        x: xi as f32 + offset.x,
        y: yi as f32 + offset.y,
        octave_sigma: space.sigma * 2f32.powf((lu as f32 + offset.z) / s as f32),
        response: contrast.abs(),
    })
}
