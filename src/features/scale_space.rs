//! Gaussian and difference-of-Gaussian pyramids.
//!
//! Each octave holds `intervals + 3` progressively blurred layers so that
//! `intervals` DoG layers have a neighbor above and below. The next
//! octave starts from layer `intervals` (twice the base sigma) downsampled.

use log::trace;

use crate::config::ExtractorParams;
use crate::raster::{Plane, downsample_2x, gaussian_blur};

pub struct Octave {
    pub gaussians: Vec<Plane>,
    pub dogs: Vec<Plane>,
}

pub struct ScaleSpace {
    pub octaves: Vec<Octave>,
    pub intervals: usize,
    pub sigma: f32,
}

/// Number of octaves that keep the coarsest level at least ~8 pixels wide.
pub fn octave_count(width: usize, height: usize, max_octaves: usize) -> usize {
    let min_dim = width.min(height).max(1) as f32;
    (min_dim.log2().floor() - 3.0).clamp(1.0, max_octaves.max(1) as f32) as usize
}

impl ScaleSpace {
    pub fn build(image: &Plane, params: &ExtractorParams) -> Self {
        let intervals = params.intervals.max(1);
        let sigma = params.sigma;
        let n_octaves = octave_count(image.width(), image.height(), params.max_octaves);

        // Blur needed to go from layer i-1 to layer i.
        let k = 2f32.powf(1.0 / intervals as f32);
        let increments: Vec<f32> = (0..intervals + 3)
            .map(|i| {
                if i == 0 {
                    return 0.0;
                }
                let prev = sigma * k.powi(i as i32 - 1);
                let total = prev * k;
                (total * total - prev * prev).sqrt()
            })
            .collect();

        let initial = (sigma * sigma - params.assumed_blur * params.assumed_blur)
            .max(0.01)
            .sqrt();
        let mut base = gaussian_blur(image, initial);

        let mut octaves = Vec::with_capacity(n_octaves);
        for o in 0..n_octaves {
            let mut gaussians: Vec<Plane> = Vec::with_capacity(intervals + 3);
            gaussians.push(base);
            for inc in increments.iter().skip(1) {
                let next = gaussian_blur(&gaussians[gaussians.len() - 1], *inc);
                gaussians.push(next);
            }
            let dogs: Vec<Plane> = gaussians
                .windows(2)
                .map(|pair| pair[1].difference(&pair[0]))
                .collect();
            base = downsample_2x(&gaussians[intervals]);
            trace!(
                "octave {} {}x{}",
                o,
                gaussians[0].width(),
                gaussians[0].height()
            );
            octaves.push(Octave { gaussians, dogs });
        }

        ScaleSpace {
            octaves,
            intervals,
            sigma,
        }
    }
}
