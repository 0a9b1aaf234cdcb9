use serde::{Deserialize, Serialize};

/// Background segmentation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationParams {
    /// When false the whole frame is treated as foreground.
    pub enabled: bool,
    /// Blurred luminance above this is background.
    pub white_threshold: u8,
    pub min_area_ratio: f32,
    pub max_area_ratio: f32,
    /// Margin added around the tight bounding rectangle, in pixels.
    pub padding: u32,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            enabled: true,
            white_threshold: 200,
            min_area_ratio: 0.01,
            max_area_ratio: 0.8,
            padding: 10,
        }
    }
}

/// Scale-space keypoint detection and description parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorParams {
    pub sigma: f32,
    pub assumed_blur: f32,
    /// DoG layers searched per octave.
    pub intervals: usize,
    pub max_octaves: usize,
    pub contrast_threshold: f32,
    pub edge_threshold: f32,
    pub image_border: usize,
    /// Radius of the mask support disc, in keypoint scales.
    pub mask_support: f32,
    /// Keep only the strongest responses when set.
    pub max_features: Option<usize>,
}

impl Default for ExtractorParams {
    fn default() -> Self {
        Self {
            sigma: 1.6,
            assumed_blur: 0.5,
            intervals: 3,
            max_octaves: 6,
            contrast_threshold: 0.04,
            edge_threshold: 10.0,
            image_border: 5,
            mask_support: 3.0,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    /// Lowe's ratio: best / second-best distance must be below this.
    pub ratio_threshold: f32,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            ratio_threshold: 0.75,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Rotation, uniform scale and translation.
    Similarity,
    /// Full planar projective transform.
    Homography,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    pub transform: TransformKind,
    pub ransac_iterations: usize,
    /// Reprojection distance in reference pixels.
    pub inlier_tolerance: f32,
    pub min_inliers: usize,
    /// Inlier count that maps to confidence 1.0.
    pub expected_inliers: usize,
    pub max_candidates: usize,
    pub min_confidence: f32,
    /// Accepted range of piece-to-reference scale.
    pub min_scale: f32,
    pub max_scale: f32,
    pub seed: u64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            transform: TransformKind::Similarity,
            ransac_iterations: 500,
            inlier_tolerance: 10.0,
            min_inliers: 6,
            expected_inliers: 20,
            max_candidates: 10,
            min_confidence: 0.0,
            min_scale: 0.05,
            max_scale: 20.0,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Verified candidate regions.
    Clustered,
    /// Ratio-test survivors as point pairs, for visualization.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputParams {
    pub mode: OutputMode,
    /// Attach debug statistics to clustered results too.
    pub include_debug: bool,
    pub max_match_points: usize,
}

impl Default for OutputParams {
    fn default() -> Self {
        Self {
            mode: OutputMode::Clustered,
            include_debug: false,
            max_match_points: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryParams {
    /// Longest side of a registered reference, larger uploads are downsized.
    pub max_reference_size: u32,
}

impl Default for RegistryParams {
    fn default() -> Self {
        Self {
            max_reference_size: 2000,
        }
    }
}

/// All tuning knobs of the locator. Every section falls back to its
/// defaults when missing from a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub segmentation: SegmentationParams,
    pub extractor: ExtractorParams,
    pub matching: MatchParams,
    pub cluster: ClusterParams,
    pub output: OutputParams,
    pub registry: RegistryParams,
}

impl LocatorConfig {
    /// Full-frame raw correspondences, the debug visualization setup.
    pub fn raw_full_frame() -> Self {
        let mut config = Self::default();
        config.segmentation.enabled = false;
        config.output.mode = OutputMode::Raw;
        config
    }
}
