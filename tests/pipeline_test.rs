mod common;

use image::{GrayImage, Luma};
use puzzle_locator::config::ExtractorParams;
use puzzle_locator::result::MatchResult;
use puzzle_locator::{FramePipeline, LocatorConfig, ReferenceIndex};

use common::{crop, encode_png, iou, piece_frame, textured_image};

const PIECE: [u32; 4] = [300, 200, 160, 160];

fn reference() -> (GrayImage, ReferenceIndex) {
    let img = textured_image(800, 600, 1200, 2024);
    let index = ReferenceIndex::build(&img, &ExtractorParams::default()).unwrap();
    (img, index)
}

fn without_time(result: &MatchResult) -> serde_json::Value {
    let mut value = serde_json::to_value(result).unwrap();
    value.as_object_mut().unwrap().remove("processingTime");
    value
}

#[test]
fn test_near_white_frame_detects_nothing() {
    let (_, index) = reference();
    let frame = encode_png(&GrayImage::from_pixel(640, 480, Luma([238])));
    let result = FramePipeline::default().process(&index, &frame);
    assert_eq!(result.piece_detected(), Some(false));
    assert!(result.matches().is_empty());
    assert_eq!(result.error(), None);
}

#[test]
fn test_rotation_invariance() {
    let (img, index) = reference();
    let pipeline = FramePipeline::default();
    for degrees in [37.0, 113.0, 260.0] {
        let result = pipeline.process(&index, &piece_frame(&img, PIECE, degrees));
        assert_eq!(result.piece_detected(), Some(true));
        let best = result
            .matches()
            .iter()
            .map(|c| iou(c.bbox, PIECE))
            .fold(0.0f32, f32::max);
        assert!(
            best >= 0.5,
            "rotation {}: best IoU {} in {:?}",
            degrees,
            best,
            result.matches()
        );
    }
}

#[test]
fn test_same_frame_twice_gives_identical_results() {
    let (img, index) = reference();
    let mut config = LocatorConfig::default();
    config.output.include_debug = true;
    let pipeline = FramePipeline::new(config);
    let frame = piece_frame(&img, PIECE, 113.0);

    let first = pipeline.process(&index, &frame);
    let second = pipeline.process(&index, &frame);
    assert_eq!(without_time(&first), without_time(&second));
    assert_eq!(
        serde_json::to_string(&without_time(&first)).unwrap(),
        serde_json::to_string(&without_time(&second)).unwrap()
    );
}

#[test]
fn test_debug_info_is_opt_in_for_clustered_results() {
    let (img, index) = reference();
    let frame = piece_frame(&img, PIECE, 37.0);

    let plain = FramePipeline::default().process(&index, &frame);
    assert!(plain.debug().is_none());

    let mut config = LocatorConfig::default();
    config.output.include_debug = true;
    let detailed = FramePipeline::new(config).process(&index, &frame);
    let debug = detailed.debug().unwrap();
    assert_eq!(debug.ref_keypoints, index.feature_count());
    assert_eq!(debug.frame_size, Some([320, 320]));
    assert!(debug.frame_keypoints > 0);
    assert!(debug.good_matches <= debug.raw_matches);
    assert!(debug.stages[0].starts_with("Reference loaded"));
    assert!(debug.stages.iter().any(|s| s.starts_with("Clustering")));
}

#[test]
fn test_raw_full_frame_mode() {
    let (img, index) = reference();
    let frame = encode_png(&crop(&img, [100, 120, 300, 240]));
    let result = FramePipeline::new(LocatorConfig::raw_full_frame()).process(&index, &frame);
    let MatchResult::Raw(raw) = &result else {
        panic!("expected a raw result");
    };
    assert!(!raw.match_points.is_empty());
    assert!(raw.match_points.len() <= 100);
    for w in raw.match_points.windows(2) {
        assert!(w[0].distance <= w[1].distance);
    }
    let consistent = raw
        .match_points
        .iter()
        .filter(|p| {
            (p.frame_pt[0] + 100.0 - p.ref_pt[0]).abs() < 3.0
                && (p.frame_pt[1] + 120.0 - p.ref_pt[1]).abs() < 3.0
        })
        .count();
    assert!(consistent * 2 > raw.match_points.len());
    assert_eq!(raw.debug.frame_size, Some([300, 240]));
    assert!(raw.debug.stages.iter().any(|s| s.starts_with("Returning")));

    let value = serde_json::to_value(&result).unwrap();
    assert!(value.get("matchPoints").is_some());
    assert!(value.get("debug").is_some());
}

#[test]
fn test_process_matches_an_uncancelled_run() {
    let (img, index) = reference();
    let pipeline = FramePipeline::default();
    let frame = piece_frame(&img, PIECE, 37.0);

    let processed = pipeline.process(&index, &frame);
    let ran = pipeline.run(&index, &frame, &|| false).unwrap();
    assert_eq!(without_time(&processed), without_time(&ran));
    assert!(pipeline.run(&index, &frame, &|| true).is_none());
}

#[test]
fn test_undecodable_frame() {
    let (_, index) = reference();
    let result = FramePipeline::default().process(&index, &[0u8, 1, 2, 3]);
    assert_eq!(result.error(), Some("Invalid frame"));
    assert!(result.matches().is_empty());

    let raw = FramePipeline::new(LocatorConfig::raw_full_frame()).process(&index, &[]);
    assert_eq!(raw.error(), Some("Invalid frame"));
    assert!(raw.debug().unwrap().frame_size.is_none());
}

#[test]
fn test_end_to_end_large_reference() {
    let img = textured_image(2000, 1500, 6000, 7);
    let index = ReferenceIndex::build(&img, &ExtractorParams::default()).unwrap();
    assert!(
        index.feature_count() >= 3000,
        "{} reference keypoints",
        index.feature_count()
    );

    let region = [400, 300, 150, 150];
    let frame = piece_frame(&img, region, 37.0);
    let result = FramePipeline::default().process(&index, &frame);

    assert_eq!(result.piece_detected(), Some(true));
    let confident: Vec<_> = result
        .matches()
        .iter()
        .filter(|c| c.confidence >= 0.5)
        .collect();
    assert_eq!(confident.len(), 1, "{:?}", result.matches());
    assert!(iou(confident[0].bbox, region) >= 0.5, "{:?}", confident[0]);
    for w in result.matches().windows(2) {
        assert!(w[0].confidence >= w[1].confidence);
    }
}
