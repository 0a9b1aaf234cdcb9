//! Isolates a piece held against a near-white background.
//!
//! Blur, threshold away the bright background, clean the binary mask with
//! a closing and an opening, then keep the largest 8-connected region whose
//! area is plausible for a piece. The region is hole-filled, padded,
//! cropped out of the frame, and its background zeroed.

use std::collections::VecDeque;

use glam::Vec2;
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::convex_hull;
use imageproc::morphology::{close, open};
use imageproc::point::Point;
use imageproc::region_labelling::{Connectivity, connected_components};
use log::{debug, trace};

use crate::config::SegmentationParams;

const BLUR_SIGMA: f32 = 1.1;

/// Two passes of a 5x5 elliptical element grow by about 4 px in L2.
const CLOSE_RADIUS: u8 = 4;
const OPEN_RADIUS: u8 = 2;

const BACKGROUND: u8 = 0;
const FOREGROUND: u8 = 255;

type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Piece outline polygon, in the coordinates of the image features are
/// extracted from.
#[derive(Debug, Clone, PartialEq)]
pub struct PieceBounds {
    pub outline: Vec<Vec2>,
}

impl PieceBounds {
    pub fn from_rect(width: u32, height: u32) -> Self {
        let (w, h) = (width.saturating_sub(1) as f32, height.saturating_sub(1) as f32);
        Self {
            outline: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(w, 0.0),
                Vec2::new(w, h),
                Vec2::new(0.0, h),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Segment {
    /// Padded `[x, y, w, h]` of the piece in frame coordinates.
    pub bbox: [u32; 4],
    /// Frame crop with background pixels zeroed.
    pub piece: GrayImage,
    /// 255 on the piece, 0 elsewhere. `None` when segmentation is disabled.
    pub mask: Option<GrayImage>,
    pub bounds: PieceBounds,
}

#[derive(Debug, Clone)]
pub enum SegmentationResult {
    /// Nothing piece-like in view.
    NotFound,
    Found(Segment),
}

impl SegmentationResult {
    pub fn is_found(&self) -> bool {
        matches!(self, SegmentationResult::Found(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    params: SegmentationParams,
}

impl Segmenter {
    pub fn new(params: SegmentationParams) -> Self {
        Self { params }
    }

    pub fn segment(&self, frame: &GrayImage) -> SegmentationResult {
        let (w, h) = (frame.width() as usize, frame.height() as usize);
        if w == 0 || h == 0 {
            return SegmentationResult::NotFound;
        }
        if !self.params.enabled {
            return SegmentationResult::Found(Segment {
                bbox: [0, 0, frame.width(), frame.height()],
                piece: frame.clone(),
                mask: None,
                bounds: PieceBounds::from_rect(frame.width(), frame.height()),
            });
        }

        let threshold = self.params.white_threshold;
        let mut fg = gaussian_blur_f32(frame, BLUR_SIGMA);
        for p in fg.pixels_mut() {
            p[0] = if p[0] <= threshold { FOREGROUND } else { BACKGROUND };
        }
        let fg = open(&close(&fg, Norm::L2, CLOSE_RADIUS), Norm::L2, OPEN_RADIUS);

        let area = (w * h) as f32;
        let min_area = self.params.min_area_ratio * area;
        let max_area = self.params.max_area_ratio * area;
        let labels = connected_components(&fg, Connectivity::Eight, Luma([BACKGROUND]));
        let regions = region_stats(&labels);
        trace!("{} foreground regions", regions.len());
        let Some(best) = regions
            .iter()
            .filter(|r| (r.area as f32) > min_area && (r.area as f32) < max_area)
            .max_by(|a, b| a.area.cmp(&b.area).then(b.label.cmp(&a.label)))
        else {
            debug!("no foreground region within the area limits");
            return SegmentationResult::NotFound;
        };

        let filled = fill_region(labels.as_raw(), w, best);

        let pad = self.params.padding as usize;
        let x0 = best.min_x.saturating_sub(pad);
        let y0 = best.min_y.saturating_sub(pad);
        let x1 = (best.max_x + 1 + pad).min(w);
        let y1 = (best.max_y + 1 + pad).min(h);
        let (cw, ch) = ((x1 - x0) as u32, (y1 - y0) as u32);

        let mut piece = GrayImage::new(cw, ch);
        let mut mask = GrayImage::new(cw, ch);
        let mut boundary = Vec::new();
        for y in y0..y1 {
            for x in x0..x1 {
                if !filled[y * w + x] {
                    continue;
                }
                let (cx, cy) = ((x - x0) as u32, (y - y0) as u32);
                mask.put_pixel(cx, cy, Luma([FOREGROUND]));
                piece.put_pixel(cx, cy, *frame.get_pixel(x as u32, y as u32));
                let on_edge = x == 0
                    || y == 0
                    || x + 1 == w
                    || y + 1 == h
                    || !filled[y * w + x - 1]
                    || !filled[y * w + x + 1]
                    || !filled[(y - 1) * w + x]
                    || !filled[(y + 1) * w + x];
                if on_edge {
                    boundary.push(Point::new((x - x0) as i32, (y - y0) as i32));
                }
            }
        }

        debug!(
            "piece region area {} at [{}, {}, {}, {}]",
            best.area, x0, y0, cw, ch
        );
        SegmentationResult::Found(Segment {
            bbox: [x0 as u32, y0 as u32, cw, ch],
            piece,
            mask: Some(mask),
            bounds: PieceBounds {
                outline: convex_hull(boundary.as_slice())
                    .into_iter()
                    .map(|p| Vec2::new(p.x as f32, p.y as f32))
                    .collect(),
            },
        })
    }
}

#[derive(Debug, Clone)]
struct Region {
    label: u32,
    area: usize,
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
}

/// Area and bounding box of every labelled region.
fn region_stats(labels: &LabelImage) -> Vec<Region> {
    let mut regions: Vec<Region> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        let slot = label as usize - 1;
        while regions.len() <= slot {
            regions.push(Region {
                label: regions.len() as u32 + 1,
                area: 0,
                min_x: usize::MAX,
                min_y: usize::MAX,
                max_x: 0,
                max_y: 0,
            });
        }
        let (x, y) = (x as usize, y as usize);
        let region = &mut regions[slot];
        region.area += 1;
        region.min_x = region.min_x.min(x);
        region.min_y = region.min_y.min(y);
        region.max_x = region.max_x.max(x);
        region.max_y = region.max_y.max(y);
    }
    regions.retain(|r| r.area > 0);
    regions
}

/// Region pixels plus every enclosed hole, as a full-frame boolean mask.
fn fill_region(labels: &[u32], w: usize, region: &Region) -> Vec<bool> {
    let (x0, y0, x1, y1) = (region.min_x, region.min_y, region.max_x, region.max_y);
    let bw = x1 - x0 + 1;
    let bh = y1 - y0 + 1;
    let inside_region = |x: usize, y: usize| labels[y * w + x] == region.label;

    // Flood the non-region pixels reachable from the box border; what is
    // left unreached is either region or hole.
    let mut outside = vec![false; bw * bh];
    let mut queue = VecDeque::new();
    for y in y0..=y1 {
        for x in x0..=x1 {
            let on_border = x == x0 || x == x1 || y == y0 || y == y1;
            if on_border && !inside_region(x, y) {
                let i = (y - y0) * bw + (x - x0);
                if !outside[i] {
                    outside[i] = true;
                    queue.push_back((x, y));
                }
            }
        }
    }
    while let Some((x, y)) = queue.pop_front() {
        let neighbors = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];
        for (nx, ny) in neighbors {
            if nx < x0 || nx > x1 || ny < y0 || ny > y1 || inside_region(nx, ny) {
                continue;
            }
            let i = (ny - y0) * bw + (nx - x0);
            if !outside[i] {
                outside[i] = true;
                queue.push_back((nx, ny));
            }
        }
    }

    let mut filled = vec![false; labels.len()];
    for y in y0..=y1 {
        for x in x0..=x1 {
            if !outside[(y - y0) * bw + (x - x0)] {
                filled[y * w + x] = true;
            }
        }
    }
    filled
}
