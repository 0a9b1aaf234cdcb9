//! Floating point image planes and the separable Gaussian filtering the
//! scale space is built from.
//!
//! Borders are handled by clamping (replicating the edge pixel).

use image::GrayImage;

/// Row-major single channel `f32` image.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    /// Converts 8-bit luminance to the [0, 1] range.
    pub fn from_gray(img: &GrayImage) -> Self {
        let data = img.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            data,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        self.data[y * self.width + x] = v;
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[f32] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Pixel-wise `self - other`. Both planes must have the same size.
    pub fn difference(&self, other: &Plane) -> Plane {
        debug_assert_eq!(self.width, other.width);
        debug_assert_eq!(self.height, other.height);
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| a - b)
            .collect();
        Plane {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

/// Normalized 1D Gaussian with an explicit half width.
fn gaussian_kernel_with_radius(sigma: f32, half: usize) -> Vec<f32> {
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..=2 * half)
        .map(|i| {
            let d = i as f32 - half as f32;
            (-d * d / two_sigma_sq).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// Normalized 1D Gaussian covering +-3 sigma.
pub fn gaussian_kernel_1d(sigma: f32) -> Vec<f32> {
    let half = (3.0 * sigma).ceil().max(1.0) as usize;
    gaussian_kernel_with_radius(sigma, half)
}

pub fn gaussian_blur(src: &Plane, sigma: f32) -> Plane {
    if sigma <= 1e-3 {
        return src.clone();
    }
    let kernel = gaussian_kernel_1d(sigma);
    convolve_separable(src, &kernel)
}

/// Applies the same symmetric kernel along rows and then columns.
fn convolve_separable(src: &Plane, kernel: &[f32]) -> Plane {
    convolve_cols(&convolve_rows(src, kernel), kernel)
}

fn convolve_rows(src: &Plane, kernel: &[f32]) -> Plane {
    let w = src.width;
    let half = kernel.len() / 2;
    let mut dst = Plane::new(w, src.height);
    if w == 0 {
        return dst;
    }

    for y in 0..src.height {
        let row = src.row(y);
        let out = &mut dst.data[y * w..(y + 1) * w];
        for (x, o) in out.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            if x >= half && x + half < w {
                let window = &row[x - half..=x + half];
                for (kv, pv) in kernel.iter().zip(window) {
                    acc += kv * pv;
                }
            } else {
                for (ki, kv) in kernel.iter().enumerate() {
                    let sx = (x + ki).saturating_sub(half).min(w - 1);
                    acc += kv * row[sx];
                }
            }
            *o = acc;
        }
    }
    dst
}

fn convolve_cols(src: &Plane, kernel: &[f32]) -> Plane {
    let w = src.width;
    let h = src.height;
    let half = kernel.len() / 2;
    let mut dst = Plane::new(w, h);
    if h == 0 {
        return dst;
    }

    for y in 0..h {
        let out = &mut dst.data[y * w..(y + 1) * w];
        for (ki, kv) in kernel.iter().enumerate() {
            let sy = (y + ki).saturating_sub(half).min(h - 1);
            let row = &src.data[sy * w..(sy + 1) * w];
            for (o, pv) in out.iter_mut().zip(row) {
                *o += kv * pv;
            }
        }
    }
    dst
}

/// Keeps every other pixel in both directions.
pub fn downsample_2x(src: &Plane) -> Plane {
    let w = (src.width / 2).max(1);
    let h = (src.height / 2).max(1);
    let mut dst = Plane::new(w, h);
    for y in 0..h {
        let sy = (2 * y).min(src.height.saturating_sub(1));
        for x in 0..w {
            let sx = (2 * x).min(src.width.saturating_sub(1));
            dst.set(x, y, src.get(sx, sy));
        }
    }
    dst
}
