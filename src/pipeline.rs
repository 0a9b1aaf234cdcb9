use std::time::Instant;

use glam::Vec2;
use image::GrayImage;
use log::{debug, warn};

use crate::cluster::CandidateClusterer;
use crate::config::{LocatorConfig, OutputMode};
use crate::features::FeatureExtractor;
use crate::matching::{Correspondence, DescriptorMatcher};
use crate::reference::ReferenceIndex;
use crate::result::{
    ClusteredResult, DebugInfo, MatchCandidate, MatchPoint, MatchResult, RawResult, match_points,
};
use crate::segmentation::{PieceBounds, SegmentationResult, Segmenter};

pub const INVALID_FRAME: &str = "Invalid frame";

/// Segment, extract, match, then either cluster or list raw point pairs,
/// depending on [`OutputMode`].
#[derive(Debug, Clone, Default)]
pub struct FramePipeline {
    config: LocatorConfig,
    segmenter: Segmenter,
    extractor: FeatureExtractor,
    matcher: DescriptorMatcher,
    clusterer: CandidateClusterer,
}

/// What the upstream stages produced before the output branch.
enum Found {
    Nothing,
    Matches {
        correspondences: Vec<Correspondence>,
        bounds: PieceBounds,
        offset: Vec2,
    },
}

impl FramePipeline {
    pub fn new(config: LocatorConfig) -> Self {
        Self {
            segmenter: Segmenter::new(config.segmentation.clone()),
            extractor: FeatureExtractor::new(config.extractor.clone()),
            matcher: DescriptorMatcher::new(config.matching.clone()),
            clusterer: CandidateClusterer::new(config.cluster.clone()),
            config,
        }
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Runs one encoded frame to completion.
    pub fn process(&self, reference: &ReferenceIndex, frame_bytes: &[u8]) -> MatchResult {
        let start = Instant::now();
        // `run_since` only yields `None` once cancelled, and this run never is.
        self.run_since(reference, frame_bytes, &|| false, start)
            .unwrap_or_else(|| {
                self.assemble(Vec::new(), Vec::new(), false, None, DebugInfo::default(), start)
            })
    }

    /// Runs one encoded frame, giving up with `None` as soon as
    /// `is_cancelled` reports true between stages.
    pub fn run(
        &self,
        reference: &ReferenceIndex,
        frame_bytes: &[u8],
        is_cancelled: &dyn Fn() -> bool,
    ) -> Option<MatchResult> {
        self.run_since(reference, frame_bytes, is_cancelled, Instant::now())
    }

    fn run_since(
        &self,
        reference: &ReferenceIndex,
        frame_bytes: &[u8],
        is_cancelled: &dyn Fn() -> bool,
        start: Instant,
    ) -> Option<MatchResult> {
        let mut debug = DebugInfo {
            ref_keypoints: reference.feature_count(),
            ..Default::default()
        };
        debug.stage(format!("Reference loaded: {} keypoints", reference.feature_count()));

        let frame = match decode_frame(frame_bytes) {
            Some(frame) => frame,
            None => {
                warn!("could not decode {} frame bytes", frame_bytes.len());
                debug.stage(format!("ERROR: {}", INVALID_FRAME));
                return Some(self.assemble(
                    Vec::new(),
                    Vec::new(),
                    false,
                    Some(INVALID_FRAME.to_string()),
                    debug,
                    start,
                ));
            }
        };
        self.run_image(reference, &frame, is_cancelled, debug, start)
    }

    /// Same as [`Self::run`] for an already decoded frame.
    pub fn run_image(
        &self,
        reference: &ReferenceIndex,
        frame: &GrayImage,
        is_cancelled: &dyn Fn() -> bool,
        mut debug: DebugInfo,
        start: Instant,
    ) -> Option<MatchResult> {
        debug.frame_size = Some([frame.width(), frame.height()]);
        debug.stage(format!(
            "Frame converted to grayscale: {}x{}",
            frame.width(),
            frame.height()
        ));
        if is_cancelled() {
            return None;
        }

        let segment = match self.segmenter.segment(frame) {
            SegmentationResult::NotFound => {
                debug.stage("No piece detected");
                return self.finish(reference, Found::Nothing, false, debug, start, is_cancelled);
            }
            SegmentationResult::Found(segment) => segment,
        };
        if self.config.segmentation.enabled {
            debug.stage(format!("Piece segmented: bbox {:?}", segment.bbox));
        }
        if is_cancelled() {
            return None;
        }

        let features = self
            .extractor
            .extract(&segment.piece, segment.mask.as_ref());
        debug.frame_keypoints = features.len();
        debug.stage(format!("Frame features: {} keypoints extracted", features.len()));
        if features.len() < 2 {
            debug.stage("ERROR: Not enough keypoints in frame");
            return self.finish(reference, Found::Nothing, true, debug, start, is_cancelled);
        }
        if is_cancelled() {
            return None;
        }

        let outcome = self.matcher.match_descriptors(&features, reference);
        debug.raw_matches = outcome.raw_matches;
        debug.good_matches = outcome.good_matches;
        debug.stage(format!("KNN matching: {} raw matches", outcome.raw_matches));
        debug.stage(format!(
            "Lowe's ratio test: {} good matches (threshold={})",
            outcome.good_matches, self.config.matching.ratio_threshold
        ));
        if outcome.correspondences.is_empty() {
            debug.stage("No matches passed ratio test");
        }
        if is_cancelled() {
            return None;
        }

        let found = Found::Matches {
            correspondences: outcome.correspondences,
            bounds: segment.bounds,
            offset: Vec2::new(segment.bbox[0] as f32, segment.bbox[1] as f32),
        };
        self.finish(reference, found, true, debug, start, is_cancelled)
    }

    /// The late output branch.
    fn finish(
        &self,
        reference: &ReferenceIndex,
        found: Found,
        piece_detected: bool,
        mut debug: DebugInfo,
        start: Instant,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Option<MatchResult> {
        let (candidates, points) = match (self.config.output.mode, found) {
            (_, Found::Nothing) => (Vec::new(), Vec::new()),
            (
                OutputMode::Raw,
                Found::Matches {
                    correspondences,
                    offset,
                    ..
                },
            ) => {
                let points =
                    match_points(&correspondences, offset, self.config.output.max_match_points);
                debug.stage(format!("Returning {} match points", points.len()));
                (Vec::new(), points)
            }
            (
                OutputMode::Clustered,
                Found::Matches {
                    correspondences,
                    bounds,
                    ..
                },
            ) => {
                let candidates = self.clusterer.cluster_until(
                    &correspondences,
                    &bounds,
                    (reference.width(), reference.height()),
                    is_cancelled,
                )?;
                debug.stage(format!("Clustering: {} candidates", candidates.len()));
                (candidates, Vec::new())
            }
        };
        Some(self.assemble(candidates, points, piece_detected, None, debug, start))
    }

    fn assemble(
        &self,
        candidates: Vec<MatchCandidate>,
        points: Vec<MatchPoint>,
        piece_detected: bool,
        error: Option<String>,
        debug: DebugInfo,
        start: Instant,
    ) -> MatchResult {
        let processing_time = start.elapsed().as_millis() as u64;
        debug!(
            "frame done in {} ms: {} candidates, {} points",
            processing_time,
            candidates.len(),
            points.len()
        );
        match self.config.output.mode {
            OutputMode::Clustered => MatchResult::Clustered(ClusteredResult {
                matches: candidates,
                processing_time,
                piece_detected,
                debug: self.config.output.include_debug.then_some(debug),
                error,
            }),
            OutputMode::Raw => MatchResult::Raw(RawResult {
                match_points: points,
                processing_time,
                debug,
                error,
            }),
        }
    }
}

fn decode_frame(bytes: &[u8]) -> Option<GrayImage> {
    let frame = image::load_from_memory(bytes).ok()?.to_luma8();
    (frame.width() > 0 && frame.height() > 0).then_some(frame)
}
