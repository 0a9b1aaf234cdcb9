//! Scale and rotation invariant keypoints with 128-dimension gradient
//! histogram descriptors.

pub mod describe;
pub mod detect;
pub mod scale_space;

use glam::Vec2;
use image::GrayImage;
use log::debug;
use rayon::prelude::*;

use crate::config::ExtractorParams;
use crate::raster::Plane;
use detect::Extremum;
use scale_space::ScaleSpace;

pub const DESCRIPTOR_LEN: usize = 128;

/// A detected keypoint in full-resolution image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub pt: Vec2,
    /// Gaussian sigma of the detection, in image pixels.
    pub scale: f32,
    /// Dominant gradient orientation in radians, within [0, 2pi).
    pub angle: f32,
    pub response: f32,
    pub octave: usize,
    pub layer: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor(pub [f32; DESCRIPTOR_LEN]);

impl Descriptor {
    #[inline]
    pub fn distance_squared(&self, other: &Descriptor) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

/// Keypoints and their descriptors, index aligned.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    params: ExtractorParams,
}

impl FeatureExtractor {
    pub fn new(params: ExtractorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ExtractorParams {
        &self.params
    }

    /// Detects and describes keypoints. With a mask, only keypoints whose
    /// whole support disc lies on non-zero mask pixels are kept.
    ///
    /// Images without detectable structure give an empty set.
    pub fn extract(&self, image: &GrayImage, mask: Option<&GrayImage>) -> FeatureSet {
        let min_side = 2 * self.params.image_border as u32 + 8;
        if image.width() < min_side || image.height() < min_side {
            debug!(
                "image {}x{} too small for feature extraction",
                image.width(),
                image.height()
            );
            return FeatureSet::default();
        }

        let space = ScaleSpace::build(&Plane::from_gray(image), &self.params);
        let mut extrema = detect::find_extrema(&space, &self.params);
        let detected = extrema.len();
        if let Some(mask) = mask {
            extrema.retain(|e| support_inside_mask(e, mask, self.params.mask_support));
        }
        if let Some(max_features) = self.params.max_features {
            keep_strongest(&mut extrema, max_features);
        }

        let per_extremum: Vec<Vec<(Keypoint, Descriptor)>> = extrema
            .par_iter()
            .map(|e| {
                describe::dominant_orientations(&space, e)
                    .into_iter()
                    .map(|angle| {
                        let descriptor = describe::descriptor(&space, e, angle);
                        (e.to_keypoint(angle), descriptor)
                    })
                    .collect()
            })
            .collect();

        let (keypoints, descriptors): (Vec<_>, Vec<_>) =
            per_extremum.into_iter().flatten().unzip();
        debug!(
            "{} octaves, {} extrema, {} after mask/cap, {} oriented keypoints",
            space.octaves.len(),
            detected,
            extrema.len(),
            keypoints.len()
        );
        FeatureSet {
            keypoints,
            descriptors,
        }
    }
}

fn support_inside_mask(extremum: &Extremum, mask: &GrayImage, mask_support: f32) -> bool {
    let center = extremum.image_point();
    let radius = mask_support * extremum.image_scale();
    let inside = |p: Vec2| {
        p.x >= 0.0
            && p.y >= 0.0
            && (p.x as u32) < mask.width()
            && (p.y as u32) < mask.height()
            && mask.get_pixel(p.x as u32, p.y as u32)[0] > 0
    };
    inside(center)
        && (0..8).all(|k| {
            let theta = k as f32 * std::f32::consts::FRAC_PI_4;
            inside(center + radius * Vec2::new(theta.cos(), theta.sin()))
        })
}

fn keep_strongest(extrema: &mut Vec<Extremum>, max_features: usize) {
    if extrema.len() <= max_features {
        return;
    }
    extrema.sort_by(|a, b| {
        b.response
            .abs()
            .total_cmp(&a.response.abs())
            .then(a.octave.cmp(&b.octave))
            .then(a.y.total_cmp(&b.y))
            .then(a.x.total_cmp(&b.x))
    });
    extrema.truncate(max_features);
}
