use image::GrayImage;
use log::info;

use crate::config::ExtractorParams;
use crate::error::{LocateError, Result};
use crate::features::{Descriptor, FeatureExtractor, FeatureSet, Keypoint};

/// Immutable feature index of one reference image.
///
/// Built once and shared between sessions behind an `Arc`; nothing in it
/// changes after construction.
#[derive(Debug, Clone)]
pub struct ReferenceIndex {
    width: u32,
    height: u32,
    features: FeatureSet,
}

impl ReferenceIndex {
    /// Extracts features over the whole image, without segmentation.
    pub fn build(image: &GrayImage, params: &ExtractorParams) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(LocateError::InvalidImage("empty reference image".to_string()));
        }
        let features = FeatureExtractor::new(params.clone()).extract(image, None);
        if features.is_empty() {
            return Err(LocateError::InvalidImage(
                "reference image has no usable keypoints".to_string(),
            ));
        }
        info!(
            "indexed {}x{} reference with {} features",
            image.width(),
            image.height(),
            features.len()
        );
        Ok(Self {
            width: image.width(),
            height: image.height(),
            features,
        })
    }

    /// Decodes encoded image bytes (any format `image` understands) first.
    pub fn from_bytes(bytes: &[u8], params: &ExtractorParams) -> Result<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| LocateError::InvalidImage(e.to_string()))?
            .to_luma8();
        Self::build(&image, params)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.features.keypoints
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.features.descriptors
    }
}
