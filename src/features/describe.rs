use std::f32::consts::{PI, SQRT_2};

use super::detect::Extremum;
use super::scale_space::ScaleSpace;
use super::{DESCRIPTOR_LEN, Descriptor};
use crate::raster::Plane;

const ORI_BINS: usize = 36;
const ORI_SIGMA_FACTOR: f32 = 1.5;
const ORI_RADIUS_FACTOR: f32 = 3.0 * ORI_SIGMA_FACTOR;
const ORI_PEAK_RATIO: f32 = 0.8;

const DESC_WIDTH: usize = 4;
const DESC_BINS: usize = 8;
const DESC_SCALE_FACTOR: f32 = 3.0;
const DESC_MAG_THRESHOLD: f32 = 0.2;
const DESC_INT_FACTOR: f32 = 512.0;

const TWO_PI: f32 = 2.0 * PI;

/// Central-difference gradient, `None` on the outermost pixel ring.
#[inline]
fn gradient(img: &Plane, x: isize, y: isize) -> Option<(f32, f32)> {
    if x < 1 || y < 1 || x >= img.width() as isize - 1 || y >= img.height() as isize - 1 {
        return None;
    }
    let (x, y) = (x as usize, y as usize);
    let gx = img.get(x + 1, y) - img.get(x - 1, y);
    let gy = img.get(x, y + 1) - img.get(x, y - 1);
    Some((gx, gy))
}

/// Orientations of every histogram peak within 80% of the strongest one.
pub fn dominant_orientations(space: &ScaleSpace, extremum: &Extremum) -> Vec<f32> {
    let img = &space.octaves[extremum.octave].gaussians[extremum.layer];
    let sigma = ORI_SIGMA_FACTOR * extremum.octave_sigma;
    let radius = (ORI_RADIUS_FACTOR * extremum.octave_sigma).round() as isize;
    let cx = extremum.x.round() as isize;
    let cy = extremum.y.round() as isize;
    let denom = -1.0 / (2.0 * sigma * sigma);

    let mut raw = [0f32; ORI_BINS];
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let Some((gx, gy)) = gradient(img, cx + dx, cy + dy) else {
                continue;
            };
            let weight = (((dx * dx + dy * dy) as f32) * denom).exp();
            let magnitude = (gx * gx + gy * gy).sqrt();
            let bin = (gy.atan2(gx) * ORI_BINS as f32 / TWO_PI).round() as isize;
            raw[bin.rem_euclid(ORI_BINS as isize) as usize] += weight * magnitude;
        }
    }

    let at = |i: isize| raw[i.rem_euclid(ORI_BINS as isize) as usize];
    let hist: Vec<f32> = (0..ORI_BINS as isize)
        .map(|i| {
            (at(i - 2) + at(i + 2)) * (1.0 / 16.0)
                + (at(i - 1) + at(i + 1)) * (4.0 / 16.0)
                + at(i) * (6.0 / 16.0)
        })
        .collect();

    let max = hist.iter().cloned().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return Vec::new();
    }

    let mut angles = Vec::new();
    for i in 0..ORI_BINS {
        let left = hist[(i + ORI_BINS - 1) % ORI_BINS];
        let right = hist[(i + 1) % ORI_BINS];
        let v = hist[i];
        if v > left && v > right && v >= ORI_PEAK_RATIO * max {
            let shift = 0.5 * (left - right) / (left - 2.0 * v + right);
            let bin = (i as f32 + shift).rem_euclid(ORI_BINS as f32);
            let angle = bin * TWO_PI / ORI_BINS as f32;
            angles.push(if angle >= TWO_PI { 0.0 } else { angle });
        }
    }
    angles
}

/// 4x4 spatial cells of 8-bin gradient histograms, sampled in the frame
/// rotated by `angle` so that in-plane rotation cancels out.
pub fn descriptor(space: &ScaleSpace, extremum: &Extremum, angle: f32) -> Descriptor {
    let img = &space.octaves[extremum.octave].gaussians[extremum.layer];
    let d = DESC_WIDTH;
    let n = DESC_BINS;
    let hist_width = DESC_SCALE_FACTOR * extremum.octave_sigma;
    let max_radius = ((img.width().pow(2) + img.height().pow(2)) as f32).sqrt();
    let radius =
        (hist_width * SQRT_2 * (d + 1) as f32 * 0.5).round().min(max_radius) as isize;
    let cx = extremum.x.round() as isize;
    let cy = extremum.y.round() as isize;
    let (sin_t, cos_t) = angle.sin_cos();
    let bins_per_rad = n as f32 / TWO_PI;
    let exp_scale = -1.0 / (0.5 * (d * d) as f32);
    let half = d as f32 / 2.0 - 0.5;

    let stride_o = n + 2;
    let stride_c = stride_o;
    let stride_r = (d + 2) * stride_o;
    let mut hist = vec![0f32; (d + 2) * (d + 2) * (n + 2)];

    for i in -radius..=radius {
        for j in -radius..=radius {
            // offset expressed in the keypoint frame, in cell units
            let u_x = (cos_t * j as f32 + sin_t * i as f32) / hist_width;
            let u_y = (-sin_t * j as f32 + cos_t * i as f32) / hist_width;
            let rbin = u_y + half;
            let cbin = u_x + half;
            if rbin <= -1.0 || rbin >= d as f32 || cbin <= -1.0 || cbin >= d as f32 {
                continue;
            }
            let Some((gx, gy)) = gradient(img, cx + j, cy + i) else {
                continue;
            };

            let weight = ((u_x * u_x + u_y * u_y) * exp_scale).exp();
            let magnitude = (gx * gx + gy * gy).sqrt() * weight;
            let obin = (gy.atan2(gx) - angle).rem_euclid(TWO_PI) * bins_per_rad;

            let r0 = rbin.floor();
            let c0 = cbin.floor();
            let o0 = obin.floor();
            let (dr, dc, dob) = (rbin - r0, cbin - c0, obin - o0);
            let mut o0 = o0 as isize;
            if o0 < 0 {
                o0 += n as isize;
            }
            if o0 >= n as isize {
                o0 -= n as isize;
            }

            let idx = (r0 as isize + 1) as usize * stride_r
                + (c0 as isize + 1) as usize * stride_c
                + o0 as usize;

            let v_r1 = magnitude * dr;
            let v_r0 = magnitude - v_r1;
            let v_rc11 = v_r1 * dc;
            let v_rc10 = v_r1 - v_rc11;
            let v_rc01 = v_r0 * dc;
            let v_rc00 = v_r0 - v_rc01;

            let v_rco111 = v_rc11 * dob;
            let v_rco110 = v_rc11 - v_rco111;
            let v_rco101 = v_rc10 * dob;
            let v_rco100 = v_rc10 - v_rco101;
            let v_rco011 = v_rc01 * dob;
            let v_rco010 = v_rc01 - v_rco011;
            let v_rco001 = v_rc00 * dob;
            let v_rco000 = v_rc00 - v_rco001;

            hist[idx] += v_rco000;
            hist[idx + 1] += v_rco001;
            hist[idx + stride_c] += v_rco010;
            hist[idx + stride_c + 1] += v_rco011;
            hist[idx + stride_r] += v_rco100;
            hist[idx + stride_r + 1] += v_rco101;
            hist[idx + stride_r + stride_c] += v_rco110;
            hist[idx + stride_r + stride_c + 1] += v_rco111;
        }
    }

    let mut out = [0f32; DESCRIPTOR_LEN];
    for r in 0..d {
        for c in 0..d {
            let idx = (r + 1) * stride_r + (c + 1) * stride_c;
            // fold the circular orientation overflow back
            hist[idx] += hist[idx + n];
            hist[idx + 1] += hist[idx + n + 1];
            for k in 0..n {
                out[(r * d + c) * n + k] = hist[idx + k];
            }
        }
    }

    normalize(&mut out);
    Descriptor(out)
}

fn normalize(values: &mut [f32; DESCRIPTOR_LEN]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    let threshold = norm * DESC_MAG_THRESHOLD;
    let mut clipped_sq = 0.0f32;
    for v in values.iter_mut() {
        *v = v.min(threshold);
        clipped_sq += *v * *v;
    }
    let scale = DESC_INT_FACTOR / clipped_sq.sqrt().max(f32::EPSILON);
    for v in values.iter_mut() {
        *v = (*v * scale).min(255.0);
    }
}
