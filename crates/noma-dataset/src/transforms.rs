//! Training and evaluation image pipelines.
//!
//! Both pipelines end in CHW `f32` data in `[0, 1]`. ImageNet normalization
//! is applied afterwards in tensor space by the batcher.
//!
//! # Pipelines
//!
//! - **Training**: resize the shorter side to `1.15 × size`, random resized
//!   crop, horizontal flip, color jitter in random order
//! - **Evaluation**: resize the shorter side to `size`, center crop

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Parameters of the training augmentation.
#[derive(Clone, Debug, PartialEq)]
pub struct AugmentationConfig {
    /// Pre-crop resize factor applied to the target edge
    pub resize_factor: f64,
    /// Crop area as a fraction of the source area
    pub crop_scale: (f64, f64),
    /// Crop aspect ratio range (width / height)
    pub crop_ratio: (f64, f64),
    pub horizontal_flip_prob: f64,
    /// Brightness factor drawn from `1 ± brightness`
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    /// Hue shift drawn from `± hue` (fraction of a full turn)
    pub hue: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            resize_factor: 1.15,
            crop_scale: (0.8, 1.0),
            crop_ratio: (3.0 / 4.0, 4.0 / 3.0),
            horizontal_flip_prob: 0.5,
            brightness: 0.2,
            contrast: 0.2,
            saturation: 0.2,
            hue: 0.05,
        }
    }
}

/// Randomized pipeline used for training samples.
#[derive(Clone, Debug)]
pub struct TrainTransform {
    config: AugmentationConfig,
    image_size: u32,
}

impl TrainTransform {
    pub fn new(image_size: usize) -> Self {
        Self::with_config(AugmentationConfig::default(), image_size)
    }

    pub fn with_config(config: AugmentationConfig, image_size: usize) -> Self {
        Self {
            config,
            image_size: image_size as u32,
        }
    }

    pub fn image_size(&self) -> usize {
        self.image_size as usize
    }

    pub fn apply(&self, img: &DynamicImage, rng: &mut ChaCha8Rng) -> Vec<f32> {
        let pre_size = (self.image_size as f64 * self.config.resize_factor) as u32;
        let rgb = resize_shorter_side(&img.to_rgb8(), pre_size);

        let (x, y, w, h) = self.crop_params(rgb.width(), rgb.height(), rng);
        let cropped = imageops::crop_imm(&rgb, x, y, w, h).to_image();
        let mut out = imageops::resize(
            &cropped,
            self.image_size,
            self.image_size,
            FilterType::Triangle,
        );

        if rng.gen::<f64>() < self.config.horizontal_flip_prob {
            imageops::flip_horizontal_in_place(&mut out);
        }

        let mut data = to_chw(&out);
        self.color_jitter(&mut data, rng);
        data
    }

    /// Random crop window `(x, y, width, height)`; falls back to a center crop
    /// clamped to the allowed aspect range after ten rejected attempts.
    fn crop_params(&self, width: u32, height: u32, rng: &mut ChaCha8Rng) -> (u32, u32, u32, u32) {
        let area = width as f64 * height as f64;
        let (min_ratio, max_ratio) = self.config.crop_ratio;
        let log_ratio = (min_ratio.ln(), max_ratio.ln());

        for _ in 0..10 {
            let target_area = area * rng.gen_range(self.config.crop_scale.0..=self.config.crop_scale.1);
            let aspect = rng.gen_range(log_ratio.0..=log_ratio.1).exp();
            let w = (target_area * aspect).sqrt().round() as u32;
            let h = (target_area / aspect).sqrt().round() as u32;

            if w > 0 && h > 0 && w <= width && h <= height {
                let x = rng.gen_range(0..=width - w);
                let y = rng.gen_range(0..=height - h);
                return (x, y, w, h);
            }
        }

        let in_ratio = width as f64 / height as f64;
        let (w, h) = if in_ratio < min_ratio {
            (width, ((width as f64 / min_ratio).round() as u32).min(height))
        } else if in_ratio > max_ratio {
            (((height as f64 * max_ratio).round() as u32).min(width), height)
        } else {
            (width, height)
        };
        ((width - w) / 2, (height - h) / 2, w, h)
    }

    fn color_jitter(&self, data: &mut [f32], rng: &mut ChaCha8Rng) {
        let mut order = [0usize, 1, 2, 3];
        order.shuffle(rng);

        let brightness = jitter_factor(self.config.brightness, rng);
        let contrast = jitter_factor(self.config.contrast, rng);
        let saturation = jitter_factor(self.config.saturation, rng);
        let hue = if self.config.hue > 0.0 {
            rng.gen_range(-self.config.hue..=self.config.hue)
        } else {
            0.0
        };

        for op in order {
            match op {
                0 => adjust_brightness(data, brightness),
                1 => adjust_contrast(data, contrast),
                2 => adjust_saturation(data, saturation),
                _ => adjust_hue(data, hue),
            }
        }
    }
}

/// Deterministic pipeline used for validation and export-time preprocessing.
#[derive(Clone, Debug)]
pub struct EvalTransform {
    image_size: u32,
}

impl EvalTransform {
    pub fn new(image_size: usize) -> Self {
        Self {
            image_size: image_size as u32,
        }
    }

    pub fn image_size(&self) -> usize {
        self.image_size as usize
    }

    pub fn apply(&self, img: &DynamicImage) -> Vec<f32> {
        let size = self.image_size;
        let rgb = resize_shorter_side(&img.to_rgb8(), size);
        let x = ((rgb.width() - size) as f64 / 2.0).round() as u32;
        let y = ((rgb.height() - size) as f64 / 2.0).round() as u32;
        let cropped = imageops::crop_imm(&rgb, x, y, size, size).to_image();
        to_chw(&cropped)
    }
}

/// Resize so the shorter side equals `target`, preserving aspect ratio.
pub fn resize_shorter_side(img: &RgbImage, target: u32) -> RgbImage {
    let (width, height) = img.dimensions();
    let (new_w, new_h) = if width <= height {
        (target, ((target as u64 * height as u64) / width as u64).max(target as u64) as u32)
    } else {
        (((target as u64 * width as u64) / height as u64).max(target as u64) as u32, target)
    };
    if (new_w, new_h) == (width, height) {
        return img.clone();
    }
    imageops::resize(img, new_w, new_h, FilterType::Triangle)
}

/// Convert to CHW float data in `[0, 1]`.
pub fn to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let mut data = Vec::with_capacity(3 * height as usize * width as usize);

    for c in 0..3 {
        for y in 0..height {
            for x in 0..width {
                data.push(img.get_pixel(x, y)[c] as f32 / 255.0);
            }
        }
    }

    data
}

fn jitter_factor(amount: f32, rng: &mut ChaCha8Rng) -> f32 {
    if amount > 0.0 {
        rng.gen_range((1.0 - amount).max(0.0)..=1.0 + amount)
    } else {
        1.0
    }
}

fn planes(data: &mut [f32]) -> (&mut [f32], &mut [f32], &mut [f32]) {
    let plane = data.len() / 3;
    let (r, rest) = data.split_at_mut(plane);
    let (g, b) = rest.split_at_mut(plane);
    (r, g, b)
}

fn luma(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

fn adjust_brightness(data: &mut [f32], factor: f32) {
    for v in data.iter_mut() {
        *v = (*v * factor).clamp(0.0, 1.0);
    }
}

fn adjust_contrast(data: &mut [f32], factor: f32) {
    let (r, g, b) = planes(data);
    let count = r.len().max(1) as f32;
    let mean = r
        .iter()
        .zip(g.iter())
        .zip(b.iter())
        .map(|((&r, &g), &b)| luma(r, g, b))
        .sum::<f32>()
        / count;

    for plane in [r, g, b] {
        for v in plane.iter_mut() {
            *v = (mean + factor * (*v - mean)).clamp(0.0, 1.0);
        }
    }
}

fn adjust_saturation(data: &mut [f32], factor: f32) {
    let (r, g, b) = planes(data);
    for i in 0..r.len() {
        let gray = luma(r[i], g[i], b[i]);
        r[i] = (gray + factor * (r[i] - gray)).clamp(0.0, 1.0);
        g[i] = (gray + factor * (g[i] - gray)).clamp(0.0, 1.0);
        b[i] = (gray + factor * (b[i] - gray)).clamp(0.0, 1.0);
    }
}

fn adjust_hue(data: &mut [f32], shift: f32) {
    if shift == 0.0 {
        return;
    }
    let (r, g, b) = planes(data);
    for i in 0..r.len() {
        let (h, s, v) = rgb_to_hsv(r[i], g[i], b[i]);
        let (nr, ng, nb) = hsv_to_rgb((h + shift).rem_euclid(1.0), s, v);
        r[i] = nr;
        g[i] = ng;
        b[i] = nb;
    }
}

fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let sector = h * 6.0;
    let i = sector.floor();
    let f = sector - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    match (i as i32).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}
