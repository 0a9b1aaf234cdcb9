use glam::Vec2;
use log::debug;
use rayon::prelude::*;

use crate::config::MatchParams;
use crate::features::{Descriptor, FeatureSet};
use crate::reference::ReferenceIndex;

/// A frame keypoint paired with its nearest reference keypoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub query_idx: usize,
    pub train_idx: usize,
    /// Position in the image the query features came from.
    pub query_pt: Vec2,
    /// Position in the reference image.
    pub train_pt: Vec2,
    pub distance: f32,
}

/// Best and second best neighbor of one query descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborPair {
    pub query_idx: usize,
    pub best_idx: usize,
    pub best: f32,
    pub second: f32,
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub correspondences: Vec<Correspondence>,
    /// Query descriptors that had two neighbors.
    pub raw_matches: usize,
    /// Survivors of the ratio test.
    pub good_matches: usize,
}

/// Exhaustive two nearest neighbors of every query, in query order.
pub fn knn2(queries: &[Descriptor], train: &[Descriptor]) -> Vec<NeighborPair> {
    if train.len() < 2 {
        return Vec::new();
    }
    queries
        .par_iter()
        .enumerate()
        .map(|(query_idx, q)| {
            let mut best = (usize::MAX, f32::INFINITY);
            let mut second = f32::INFINITY;
            for (i, t) in train.iter().enumerate() {
                let d = q.distance_squared(t);
                if d < best.1 {
                    second = best.1;
                    best = (i, d);
                } else if d < second {
                    second = d;
                }
            }
            NeighborPair {
                query_idx,
                best_idx: best.0,
                best: best.1.sqrt(),
                second: second.sqrt(),
            }
        })
        .collect()
}

/// Lowe's ratio test: keeps pairs whose best distance is clearly below the
/// second best.
pub fn ratio_test(pairs: &[NeighborPair], ratio: f32) -> Vec<NeighborPair> {
    pairs
        .iter()
        .filter(|p| p.best < ratio * p.second)
        .copied()
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct DescriptorMatcher {
    params: MatchParams,
}

impl DescriptorMatcher {
    pub fn new(params: MatchParams) -> Self {
        Self { params }
    }

    pub fn match_descriptors(
        &self,
        frame: &FeatureSet,
        reference: &ReferenceIndex,
    ) -> MatchOutcome {
        let pairs = knn2(&frame.descriptors, reference.descriptors());
        let good = ratio_test(&pairs, self.params.ratio_threshold);
        debug!(
            "{} raw matches, {} pass ratio {}",
            pairs.len(),
            good.len(),
            self.params.ratio_threshold
        );
        let ref_keypoints = reference.keypoints();
        let correspondences = good
            .iter()
            .map(|p| Correspondence {
                query_idx: p.query_idx,
                train_idx: p.best_idx,
                query_pt: frame.keypoints[p.query_idx].pt,
                train_pt: ref_keypoints[p.best_idx].pt,
                distance: p.best,
            })
            .collect();
        MatchOutcome {
            correspondences,
            raw_matches: pairs.len(),
            good_matches: good.len(),
        }
    }
}
