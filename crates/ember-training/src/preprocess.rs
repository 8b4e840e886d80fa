//! Image decoding, resizing and pixel normalization.

use crate::error::{TrainingError, TrainingResult};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

/// ImageNet channel means in BGR order, as used by ResNet50 preprocessing.
const CAFFE_BGR_MEAN: [f32; 3] = [103.939, 116.779, 123.68];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// RGB scaled to `[0, 1]`.
    #[default]
    UnitRange,
    /// RGB swapped to BGR with the ImageNet means subtracted; no scaling.
    CaffeBgr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub normalization: Normalization,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self { width: 224, height: 224, normalization: Normalization::UnitRange }
    }
}

impl ImageSpec {
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// A decoded image in height-width-channel layout, three channels.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl ImageTensor {
    /// Mean of each channel over all pixels.
    #[must_use]
    pub fn channel_means(&self) -> [f32; 3] {
        let mut sums = [0f64; 3];
        for px in self.data.chunks_exact(3) {
            for (sum, v) in sums.iter_mut().zip(px) {
                *sum += f64::from(*v);
            }
        }
        let n = (self.data.len() / 3).max(1) as f64;
        #[allow(clippy::cast_possible_truncation)]
        sums.map(|s| (s / n) as f32)
    }
}

/// Random geometric jitter applied to training images after resizing.
///
/// Every draw keeps the image size. Pixels sampled from outside the source are
/// reflected back in at the border.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Augmentation {
    /// Largest rotation either way, as a fraction of a full turn.
    pub rotation: f32,
    /// Largest zoom in or out, as a fraction of the image size.
    pub zoom: f32,
    /// Mirror left-right with probability one half.
    pub horizontal_flip: bool,
}

impl Default for Augmentation {
    fn default() -> Self {
        Self { rotation: 0.1, zoom: 0.2, horizontal_flip: true }
    }
}

impl Augmentation {
    pub fn validate(&self) -> TrainingResult<()> {
        if !(self.rotation.is_finite() && (0.0..=0.5).contains(&self.rotation)) {
            return Err(TrainingError::InvalidSpec(format!(
                "augmentation.rotation must be in [0, 0.5], got {}",
                self.rotation
            )));
        }
        if !(self.zoom.is_finite() && (0.0..1.0).contains(&self.zoom)) {
            return Err(TrainingError::InvalidSpec(format!("augmentation.zoom must be in [0, 1), got {}", self.zoom)));
        }
        Ok(())
    }

    /// Draws one rotation, zoom and flip from `rng` and resamples `img`.
    pub fn apply<R: Rng + ?Sized>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        let angle = if self.rotation > 0.0 { rng.gen_range(-self.rotation..=self.rotation) * TAU } else { 0.0 };
        let zoom = if self.zoom > 0.0 { rng.gen_range(-self.zoom..=self.zoom) } else { 0.0 };
        let flip = self.horizontal_flip && rng.gen_bool(0.5);

        let flipped;
        let source = if flip {
            flipped = imageops::flip_horizontal(img);
            &flipped
        } else {
            img
        };
        if self.rotation <= 0.0 && self.zoom <= 0.0 {
            return source.clone();
        }

        // Inverse map: output pixel centre -> source position, rotated and scaled about the middle.
        let (width, height) = img.dimensions();
        let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
        let (sin, cos) = angle.sin_cos();
        let scale = 1.0 + zoom;
        RgbImage::from_fn(width, height, |x, y| {
            let dx = x as f32 + 0.5 - cx;
            let dy = y as f32 + 0.5 - cy;
            let sx = (cos * dx + sin * dy) * scale + cx - 0.5;
            let sy = (cos * dy - sin * dx) * scale + cy - 0.5;
            bilinear(source, sx, sy)
        })
    }
}

fn reflect(index: i64, size: u32) -> u32 {
    let size = i64::from(size);
    let period = 2 * size;
    let m = index.rem_euclid(period);
    (if m < size { m } else { period - 1 - m }) as u32
}

fn bilinear(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);
    let px = |xi: i64, yi: i64| img.get_pixel(reflect(xi, width), reflect(yi, height)).0.map(f32::from);

    let (a, b, c, d) = (px(x0, y0), px(x0 + 1, y0), px(x0, y0 + 1), px(x0 + 1, y0 + 1));
    let mut out = [0u8; 3];
    for (ch, value) in out.iter_mut().enumerate() {
        let top = a[ch] + (b[ch] - a[ch]) * fx;
        let bottom = c[ch] + (d[ch] - c[ch]) * fx;
        *value = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn load_rgb(bytes: &[u8], spec: &ImageSpec, item: &str) -> TrainingResult<RgbImage> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| TrainingError::Decode { item: item.to_string(), reason: e.to_string() })?;
    Ok(img.resize_exact(spec.width, spec.height, FilterType::Triangle).to_rgb8())
}

fn normalize(rgb: &RgbImage, spec: &ImageSpec) -> ImageTensor {
    let mut data = Vec::with_capacity(spec.pixel_count() * 3);
    for px in rgb.pixels() {
        let [r, g, b] = px.0.map(f32::from);
        match spec.normalization {
            Normalization::UnitRange => data.extend([r / 255.0, g / 255.0, b / 255.0]),
            Normalization::CaffeBgr => data.extend([
                b - CAFFE_BGR_MEAN[0],
                g - CAFFE_BGR_MEAN[1],
                r - CAFFE_BGR_MEAN[2],
            ]),
        }
    }
    ImageTensor { width: spec.width, height: spec.height, data }
}

/// Decodes `bytes`, resizes to the `ImageSpec` input size and normalizes.
///
/// `item` names the source in errors.
pub fn decode_image(bytes: &[u8], spec: &ImageSpec, item: &str) -> TrainingResult<ImageTensor> {
    Ok(normalize(&load_rgb(bytes, spec, item)?, spec))
}

/// Like [`decode_image`], with `augmentation` applied between resizing and normalization.
pub fn decode_augmented<R: Rng + ?Sized>(
    bytes: &[u8],
    spec: &ImageSpec,
    item: &str,
    augmentation: &Augmentation,
    rng: &mut R,
) -> TrainingResult<ImageTensor> {
    let rgb = load_rgb(bytes, spec, item)?;
    Ok(normalize(&augmentation.apply(&rgb, rng), spec))
}

#[cfg(test)]
pub(crate) fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}
