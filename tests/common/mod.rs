#![allow(dead_code)]

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use puzzle_locator::raster::{Plane, gaussian_blur};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Busy synthetic artwork: overlapping ellipses and rectangles with gray
/// levels well below the white-background threshold, lightly blurred.
pub fn textured_image(width: u32, height: u32, shapes: usize, seed: u64) -> GrayImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut img = GrayImage::from_pixel(width, height, Luma([90]));
    for _ in 0..shapes {
        let cx = rng.random_range(0..width) as i64;
        let cy = rng.random_range(0..height) as i64;
        let rx = rng.random_range(4..22) as i64;
        let ry = rng.random_range(4..22) as i64;
        let value: u8 = rng.random_range(0..=180);
        let ellipse = rng.random_bool(0.5);
        for y in (cy - ry).max(0)..(cy + ry).min(height as i64) {
            for x in (cx - rx).max(0)..(cx + rx).min(width as i64) {
                let dx = (x - cx) as f32 / rx as f32;
                let dy = (y - cy) as f32 / ry as f32;
                if !ellipse || dx * dx + dy * dy <= 1.0 {
                    img.put_pixel(x as u32, y as u32, Luma([value]));
                }
            }
        }
    }
    let blurred = gaussian_blur(&Plane::from_gray(&img), 0.8);
    to_gray(&blurred)
}

pub fn to_gray(plane: &Plane) -> GrayImage {
    GrayImage::from_fn(plane.width() as u32, plane.height() as u32, |x, y| {
        Luma([(plane.get(x as usize, y as usize) * 255.0).round().clamp(0.0, 255.0) as u8])
    })
}

pub fn crop(img: &GrayImage, rect: [u32; 4]) -> GrayImage {
    image::imageops::crop_imm(img, rect[0], rect[1], rect[2], rect[3]).to_image()
}

fn bilinear(img: &GrayImage, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(img.width() - 1);
    let y1 = (y0 + 1).min(img.height() - 1);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);
    let p = |px: u32, py: u32| img.get_pixel(px, py)[0] as f32;
    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Rotates `img` by `degrees` about its center and places it in the middle
/// of a `canvas`-sized square filled with `fill`.
pub fn rotate_onto_canvas(img: &GrayImage, degrees: f32, canvas: u32, fill: u8) -> GrayImage {
    let (sin_t, cos_t) = (-degrees.to_radians()).sin_cos();
    let src_c = ((img.width() - 1) as f32 / 2.0, (img.height() - 1) as f32 / 2.0);
    let dst_c = ((canvas - 1) as f32 / 2.0, (canvas - 1) as f32 / 2.0);
    let max_x = (img.width() - 1) as f32;
    let max_y = (img.height() - 1) as f32;
    GrayImage::from_fn(canvas, canvas, |u, v| {
        let (du, dv) = (u as f32 - dst_c.0, v as f32 - dst_c.1);
        // inverse rotation back into the source
        let sx = cos_t * du + sin_t * dv + src_c.0;
        let sy = -sin_t * du + cos_t * dv + src_c.1;
        if sx < 0.0 || sy < 0.0 || sx > max_x || sy > max_y {
            Luma([fill])
        } else {
            Luma([bilinear(img, sx, sy).round() as u8])
        }
    })
}

/// A piece cut out of `reference`, rotated and surrounded by a near-white
/// border, PNG encoded like a camera frame.
pub fn piece_frame(reference: &GrayImage, rect: [u32; 4], degrees: f32) -> Vec<u8> {
    let piece = crop(reference, rect);
    let canvas = (rect[2].max(rect[3]) as f32 * 2.0) as u32;
    encode_png(&rotate_onto_canvas(&piece, degrees, canvas, 245))
}

pub fn encode_png(img: &GrayImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(img.clone())
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn iou(a: [u32; 4], b: [u32; 4]) -> f32 {
    let x0 = a[0].max(b[0]);
    let y0 = a[1].max(b[1]);
    let x1 = (a[0] + a[2]).min(b[0] + b[2]);
    let y1 = (a[1] + a[3]).min(b[1] + b[3]);
    if x1 <= x0 || y1 <= y0 {
        return 0.0;
    }
    let inter = ((x1 - x0) * (y1 - y0)) as f32;
    let union = (a[2] * a[3] + b[2] * b[3]) as f32 - inter;
    inter / union
}

/// A dark square of side `side` at (`x`, `y`) on a near-white frame.
pub fn square_on_white(width: u32, height: u32, x: u32, y: u32, side: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |px, py| {
        if px >= x && px < x + side && py >= y && py < y + side {
            Luma([60])
        } else {
            Luma([240])
        }
    })
}
