use approx::assert_relative_eq;
use glam::Vec2;
use nalgebra as na;
use puzzle_locator::geometry::{
    PlanarTransform, has_collinear_triplet, homography_dlt, similarity_from_2pt,
    similarity_least_squares,
};

fn similarity(scale: f64, degrees: f64, tx: f64, ty: f64) -> PlanarTransform {
    let (s, c) = degrees.to_radians().sin_cos();
    PlanarTransform::Similarity {
        a: scale * c,
        b: scale * s,
        tx,
        ty,
    }
}

#[test]
fn test_similarity_from_two_points() {
    let truth = similarity(1.5, 37.0, 120.0, -40.0);
    let src = [Vec2::new(10.0, 20.0), Vec2::new(80.0, -5.0)];
    let dst = [truth.apply(src[0]).unwrap(), truth.apply(src[1]).unwrap()];

    let fitted = similarity_from_2pt(src, dst).unwrap();
    assert_relative_eq!(fitted.scale(), 1.5, epsilon = 1e-4);
    assert_relative_eq!(fitted.rotation().unwrap(), 37f64.to_radians(), epsilon = 1e-4);

    let sample = Vec2::new(-33.0, 57.0);
    let expected = truth.apply(sample).unwrap();
    let got = fitted.apply(sample).unwrap();
    assert!(expected.distance(got) < 1e-2);
}

#[test]
fn test_similarity_rejects_coincident_points() {
    let p = Vec2::new(5.0, 5.0);
    assert!(similarity_from_2pt([p, p], [Vec2::ZERO, Vec2::ONE]).is_none());
    assert!(similarity_least_squares(&[p], &[p]).is_none());
}

#[test]
fn test_similarity_least_squares_averages_noise() {
    let truth = similarity(0.8, -113.0, 400.0, 300.0);
    let src: Vec<Vec2> = (0..40)
        .map(|i| Vec2::new((i % 8) as f32 * 17.0, (i / 8) as f32 * 23.0))
        .collect();
    let dst: Vec<Vec2> = src
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let noise = if i % 2 == 0 { 0.3 } else { -0.3 };
            truth.apply(*p).unwrap() + Vec2::splat(noise)
        })
        .collect();

    let fitted = similarity_least_squares(&src, &dst).unwrap();
    assert_relative_eq!(fitted.scale(), 0.8, epsilon = 1e-2);
    assert_relative_eq!(
        fitted.rotation().unwrap(),
        (-113f64).to_radians(),
        epsilon = 1e-2
    );
}

#[test]
fn test_homography_dlt_recovers_projective_map() {
    let h = na::Matrix3::new(1.1, 0.2, 30.0, -0.1, 0.9, 50.0, 1e-4, 2e-4, 1.0);
    let truth = PlanarTransform::Homography(h);
    let src = vec![
        Vec2::new(0.0, 0.0),
        Vec2::new(100.0, 0.0),
        Vec2::new(100.0, 80.0),
        Vec2::new(0.0, 80.0),
        Vec2::new(50.0, 40.0),
        Vec2::new(20.0, 70.0),
    ];
    let dst: Vec<Vec2> = src.iter().map(|p| truth.apply(*p).unwrap()).collect();

    for n in [4, 6] {
        let fitted = homography_dlt(&src[..n], &dst[..n]).unwrap();
        let PlanarTransform::Homography(m) = fitted else {
            panic!("expected a homography");
        };
        assert_relative_eq!(m[(2, 2)], 1.0, epsilon = 1e-9);
        let sample = Vec2::new(70.0, 15.0);
        assert!(fitted.apply(sample).unwrap().distance(truth.apply(sample).unwrap()) < 1e-2);
        assert!(fitted.preserves_orientation());
    }
}

#[test]
fn test_homography_point_at_infinity() {
    let h = na::Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0);
    let t = PlanarTransform::Homography(h);
    assert!(t.apply(Vec2::new(-1.0, 3.0)).is_none());
    assert!(t.apply(Vec2::new(1.0, 3.0)).is_some());
}

#[test]
fn test_mirrored_homography_is_flagged() {
    let h = na::Matrix3::new(-1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
    assert!(!PlanarTransform::Homography(h).preserves_orientation());
}

#[test]
fn test_collinear_triplet() {
    let line = [
        Vec2::new(0.0, 0.0),
        Vec2::new(10.0, 10.0),
        Vec2::new(20.0, 20.0),
        Vec2::new(0.0, 30.0),
    ];
    assert!(has_collinear_triplet(&line));
    let square = [
        Vec2::new(0.0, 0.0),
        Vec2::new(10.0, 0.0),
        Vec2::new(10.0, 10.0),
        Vec2::new(0.0, 10.0),
    ];
    assert!(!has_collinear_triplet(&square));
}
