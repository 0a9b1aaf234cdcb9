//! Per-frame results in their JSON wire shapes.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::matching::Correspondence;

/// One located region of the reference image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    /// 1-based rank after sorting.
    pub id: u32,
    /// `[x, y, w, h]` in reference pixels.
    pub bbox: [u32; 4],
    pub center: [u32; 2],
    pub confidence: f32,
    pub num_matches: usize,
}

/// A verified region before scoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateRegion {
    pub bbox: [u32; 4],
    pub inliers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPoint {
    pub frame_pt: [f32; 2],
    pub ref_pt: [f32; 2],
    pub distance: f32,
}

impl MatchPoint {
    /// `frame_offset` moves the query point from crop to frame coordinates.
    pub fn from_correspondence(c: &Correspondence, frame_offset: Vec2) -> Self {
        let frame_pt = c.query_pt + frame_offset;
        Self {
            frame_pt: [round_to(frame_pt.x, 1), round_to(frame_pt.y, 1)],
            ref_pt: [round_to(c.train_pt.x, 1), round_to(c.train_pt.y, 1)],
            distance: round_to(c.distance, 2),
        }
    }
}

/// Per-frame statistics. Keys stay snake_case on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugInfo {
    /// `[width, height]` of the decoded frame.
    pub frame_size: Option<[u32; 2]>,
    pub frame_keypoints: usize,
    pub ref_keypoints: usize,
    pub raw_matches: usize,
    pub good_matches: usize,
    /// What happened, in order. Informational only.
    pub stages: Vec<String>,
}

impl DebugInfo {
    pub fn stage(&mut self, label: impl Into<String>) {
        self.stages.push(label.into());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteredResult {
    pub matches: Vec<MatchCandidate>,
    /// Milliseconds.
    pub processing_time: u64,
    pub piece_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResult {
    pub match_points: Vec<MatchPoint>,
    pub processing_time: u64,
    pub debug: DebugInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchResult {
    Clustered(ClusteredResult),
    Raw(RawResult),
}

impl MatchResult {
    pub fn processing_time(&self) -> u64 {
        match self {
            MatchResult::Clustered(r) => r.processing_time,
            MatchResult::Raw(r) => r.processing_time,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            MatchResult::Clustered(r) => r.error.as_deref(),
            MatchResult::Raw(r) => r.error.as_deref(),
        }
    }

    pub fn debug(&self) -> Option<&DebugInfo> {
        match self {
            MatchResult::Clustered(r) => r.debug.as_ref(),
            MatchResult::Raw(r) => Some(&r.debug),
        }
    }

    /// Candidates of a clustered result, empty for raw results.
    pub fn matches(&self) -> &[MatchCandidate] {
        match self {
            MatchResult::Clustered(r) => &r.matches,
            MatchResult::Raw(_) => &[],
        }
    }

    /// `None` for raw results, which carry no detection flag.
    pub fn piece_detected(&self) -> Option<bool> {
        match self {
            MatchResult::Clustered(r) => Some(r.piece_detected),
            MatchResult::Raw(_) => None,
        }
    }
}

pub fn round_to(v: f32, decimals: i32) -> f32 {
    let p = 10f64.powi(decimals);
    ((v as f64 * p).round() / p) as f32
}

/// `min(1, inliers / expected)`, rounded to 3 decimals.
pub fn confidence(inliers: usize, expected_inliers: usize) -> f32 {
    let c = (inliers as f32 / expected_inliers.max(1) as f32).min(1.0);
    round_to(c, 3)
}

/// Scores regions, drops those below `min_confidence`, sorts by confidence
/// then match count (stable, so ties keep discovery order) and numbers them
/// from 1.
pub fn rank_candidates(
    regions: &[CandidateRegion],
    expected_inliers: usize,
    min_confidence: f32,
) -> Vec<MatchCandidate> {
    let mut out: Vec<MatchCandidate> = regions
        .iter()
        .map(|r| MatchCandidate {
            id: 0,
            bbox: r.bbox,
            center: [r.bbox[0] + r.bbox[2] / 2, r.bbox[1] + r.bbox[3] / 2],
            confidence: confidence(r.inliers, expected_inliers),
            num_matches: r.inliers,
        })
        .filter(|c| c.confidence >= min_confidence)
        .collect();
    out.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(b.num_matches.cmp(&a.num_matches))
    });
    for (i, c) in out.iter_mut().enumerate() {
        c.id = i as u32 + 1;
    }
    out
}

/// Keeps the `max_points` closest correspondences as wire points.
pub fn match_points(
    correspondences: &[Correspondence],
    frame_offset: Vec2,
    max_points: usize,
) -> Vec<MatchPoint> {
    let mut sorted: Vec<&Correspondence> = correspondences.iter().collect();
    sorted.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    sorted
        .into_iter()
        .take(max_points)
        .map(|c| MatchPoint::from_correspondence(c, frame_offset))
        .collect()
}
