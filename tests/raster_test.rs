use approx::assert_abs_diff_eq;
use image::{GrayImage, Luma};
use puzzle_locator::raster::{Plane, downsample_2x, gaussian_blur, gaussian_kernel_1d};

#[test]
fn test_kernel_is_normalized_and_symmetric() {
    for sigma in [0.5, 1.1, 1.6, 3.2] {
        let k = gaussian_kernel_1d(sigma);
        assert_eq!(k.len() % 2, 1);
        assert_abs_diff_eq!(k.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        for i in 0..k.len() / 2 {
            assert_abs_diff_eq!(k[i], k[k.len() - 1 - i], epsilon = 1e-7);
        }
    }
}

#[test]
fn test_blur_keeps_flat_images_flat() {
    let flat = Plane::from_gray(&GrayImage::from_pixel(17, 9, Luma([51])));
    let blurred = gaussian_blur(&flat, 2.0);
    for v in blurred.data() {
        assert_abs_diff_eq!(*v, 0.2, epsilon = 1e-5);
    }
}

#[test]
fn test_blur_spreads_an_impulse() {
    let mut plane = Plane::new(21, 21);
    plane.set(10, 10, 1.0);
    let blurred = gaussian_blur(&plane, 1.5);
    assert_abs_diff_eq!(blurred.data().iter().sum::<f32>(), 1.0, epsilon = 1e-4);
    assert!(blurred.get(10, 10) > blurred.get(11, 10));
    assert_abs_diff_eq!(blurred.get(9, 10), blurred.get(11, 10), epsilon = 1e-7);
}

#[test]
fn test_downsample_and_difference() {
    let plane = Plane::from_gray(&GrayImage::from_fn(9, 6, |x, y| Luma([(x + 10 * y) as u8])));
    let half = downsample_2x(&plane);
    assert_eq!((half.width(), half.height()), (4, 3));
    assert_eq!(half.get(1, 1), plane.get(2, 2));

    let zero = plane.difference(&plane);
    assert!(zero.data().iter().all(|v| *v == 0.0));
}
