//! Multi-candidate geometric verification.
//!
//! One RANSAC fit explains one placement of the piece. To report every
//! plausible placement the best fit is taken, its inliers removed from the
//! pool, and the search repeated until too few inliers agree or the round
//! cap is reached.

use glam::Vec2;
use log::{debug, trace};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use crate::config::{ClusterParams, TransformKind};
use crate::geometry::{
    PlanarTransform, has_collinear_triplet, homography_dlt, similarity_from_2pt,
    similarity_least_squares,
};
use crate::matching::Correspondence;
use crate::result::{CandidateRegion, MatchCandidate, rank_candidates};
use crate::segmentation::PieceBounds;

#[derive(Debug, Clone, Default)]
pub struct CandidateClusterer {
    params: ClusterParams,
}

impl CandidateClusterer {
    pub fn new(params: ClusterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ClusterParams {
        &self.params
    }

    pub fn cluster(
        &self,
        matches: &[Correspondence],
        bounds: &PieceBounds,
        ref_size: (u32, u32),
    ) -> Vec<MatchCandidate> {
        self.cluster_until(matches, bounds, ref_size, &|| false)
            .unwrap_or_default()
    }

    /// Same as [`Self::cluster`], checking `is_cancelled` before each round.
    /// Returns `None` once cancelled.
    pub fn cluster_until(
        &self,
        matches: &[Correspondence],
        bounds: &PieceBounds,
        ref_size: (u32, u32),
        is_cancelled: &dyn Fn() -> bool,
    ) -> Option<Vec<MatchCandidate>> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        let mut pool = matches.to_vec();
        let mut regions = Vec::new();
        let min_pool = self.params.min_inliers.max(self.sample_size());

        for round in 0..self.params.max_candidates {
            if is_cancelled() {
                debug!("clustering cancelled in round {}", round);
                return None;
            }
            if pool.len() < min_pool {
                break;
            }
            let Some((model, inliers)) = self.best_model(&pool, &mut rng) else {
                break;
            };
            if inliers.len() < self.params.min_inliers {
                trace!("round {}: best model has {} inliers", round, inliers.len());
                break;
            }

            let bbox = project_bounds(&model, bounds, ref_size, &self.params)
                .unwrap_or_else(|| {
                    let pts: Vec<Vec2> = inliers.iter().map(|&i| pool[i].train_pt).collect();
                    points_aabb(&pts, ref_size)
                });
            debug!(
                "round {}: {} inliers of {}, bbox {:?}",
                round,
                inliers.len(),
                pool.len(),
                bbox
            );
            regions.push(CandidateRegion {
                bbox,
                inliers: inliers.len(),
            });

            let mut keep = vec![true; pool.len()];
            for &i in &inliers {
                keep[i] = false;
            }
            let mut flags = keep.into_iter();
            pool.retain(|_| flags.next().unwrap_or(false));
        }

        Some(rank_candidates(
            &regions,
            self.params.expected_inliers,
            self.params.min_confidence,
        ))
    }

    fn sample_size(&self) -> usize {
        match self.params.transform {
            TransformKind::Similarity => 2,
            TransformKind::Homography => 4,
        }
    }

    fn fit(&self, src: &[Vec2], dst: &[Vec2]) -> Option<PlanarTransform> {
        let model = match self.params.transform {
            TransformKind::Similarity if src.len() == 2 => {
                similarity_from_2pt([src[0], src[1]], [dst[0], dst[1]])
            }
            TransformKind::Similarity => similarity_least_squares(src, dst),
            TransformKind::Homography => {
                if src.len() == 4 && (has_collinear_triplet(src) || has_collinear_triplet(dst)) {
                    return None;
                }
                homography_dlt(src, dst)
            }
        }?;
        self.is_plausible(&model).then_some(model)
    }

    fn is_plausible(&self, model: &PlanarTransform) -> bool {
        let scale = model.scale();
        scale.is_finite()
            && scale >= self.params.min_scale as f64
            && scale <= self.params.max_scale as f64
            && model.preserves_orientation()
    }

    fn inliers(&self, pool: &[Correspondence], model: &PlanarTransform) -> Vec<usize> {
        let tol_sq = self.params.inlier_tolerance * self.params.inlier_tolerance;
        pool.iter()
            .enumerate()
            .filter(|(_, c)| {
                model
                    .apply(c.query_pt)
                    .is_some_and(|p| p.distance_squared(c.train_pt) <= tol_sq)
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// RANSAC over `pool` followed by one least-squares refit on the
    /// inliers. The refit is kept only if it does not lose inliers.
    fn best_model(
        &self,
        pool: &[Correspondence],
        rng: &mut ChaCha8Rng,
    ) -> Option<(PlanarTransform, Vec<usize>)> {
        let n = self.sample_size();
        let mut idx: Vec<usize> = (0..pool.len()).collect();
        let mut best: Option<(PlanarTransform, usize)> = None;

        for _ in 0..self.params.ransac_iterations {
            let (picked, _) = idx.partial_shuffle(rng, n);
            let src: Vec<Vec2> = picked.iter().map(|&i| pool[i].query_pt).collect();
            let dst: Vec<Vec2> = picked.iter().map(|&i| pool[i].train_pt).collect();
            let Some(model) = self.fit(&src, &dst) else {
                continue;
            };
            let count = self.inliers(pool, &model).len();
            if best.as_ref().is_none_or(|(_, c)| count > *c) {
                best = Some((model, count));
            }
        }

        let (model, _) = best?;
        let inliers = self.inliers(pool, &model);
        let src: Vec<Vec2> = inliers.iter().map(|&i| pool[i].query_pt).collect();
        let dst: Vec<Vec2> = inliers.iter().map(|&i| pool[i].train_pt).collect();
        if let Some(refined) = self.fit(&src, &dst) {
            let refined_inliers = self.inliers(pool, &refined);
            if refined_inliers.len() >= inliers.len() {
                return Some((refined, refined_inliers));
            }
        }
        Some((model, inliers))
    }
}

/// Axis-aligned bounds of the projected outline, clipped to the reference.
/// `None` when the projection is unusable.
fn project_bounds(
    model: &PlanarTransform,
    bounds: &PieceBounds,
    ref_size: (u32, u32),
    params: &ClusterParams,
) -> Option<[u32; 4]> {
    if bounds.outline.len() < 3 {
        return None;
    }
    let scale = model.scale();
    if !scale.is_finite() || scale < params.min_scale as f64 || scale > params.max_scale as f64 {
        return None;
    }
    let projected = bounds
        .outline
        .iter()
        .map(|&p| model.apply(p))
        .collect::<Option<Vec<Vec2>>>()?;
    let (min, max) = extent(&projected);
    if max.x - min.x < 1.0 || max.y - min.y < 1.0 {
        return None;
    }
    clip_rect(min, max, ref_size)
}

fn points_aabb(pts: &[Vec2], ref_size: (u32, u32)) -> [u32; 4] {
    let (min, max) = extent(pts);
    clip_rect(min, max, ref_size).unwrap_or_else(|| {
        let x = (min.x.max(0.0) as u32).min(ref_size.0.saturating_sub(1));
        let y = (min.y.max(0.0) as u32).min(ref_size.1.saturating_sub(1));
        [x, y, 1, 1]
    })
}

fn extent(pts: &[Vec2]) -> (Vec2, Vec2) {
    pts.iter().fold(
        (Vec2::splat(f32::INFINITY), Vec2::splat(f32::NEG_INFINITY)),
        |(lo, hi), p| (lo.min(*p), hi.max(*p)),
    )
}

fn clip_rect(min: Vec2, max: Vec2, ref_size: (u32, u32)) -> Option<[u32; 4]> {
    let (w, h) = (ref_size.0 as f32, ref_size.1 as f32);
    let x0 = min.x.floor().max(0.0);
    let y0 = min.y.floor().max(0.0);
    let x1 = max.x.ceil().min(w);
    let y1 = max.y.ceil().min(h);
    if !(x1 > x0 && y1 > y0) {
        return None;
    }
    Some([x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32])
}
