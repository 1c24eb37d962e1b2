//! Frame to single-color reduction
//!
//! - Downsample to a small grid (bilinear)
//! - Weighted average in OKLab, discounting dark and grey pixels
//! - Saturation boost and brightness clamp in HSV

use crate::color::{Hsv, Oklab, Rgb};
use crate::decode::Frame;
use crate::error::AppError;
use image::imageops::{self, FilterType};

/// Working resolution for the average
const SAMPLE_WIDTH: u32 = 80;
const SAMPLE_HEIGHT: u32 = 45;

/// OKLab lightness below which a pixel loses weight (letterbox bars, shadows)
const DARK_LIGHTNESS: f32 = 0.2;

/// OKLab chroma at which a pixel counts as fully vivid
const VIVID_CHROMA: f32 = 0.12;

/// Weight of a perfectly grey pixel relative to a vivid one
const GREY_WEIGHT: f32 = 0.2;

/// Perceptual shaping applied after averaging
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapingConfig {
    /// Multiplier on HSV saturation
    pub saturation_boost: f32,
    /// Multiplier on HSV value
    pub brightness_boost: f32,
    /// Floor for HSV value; 0 lets black frames turn the bulb black
    pub min_brightness: u8,
    /// Ceiling for HSV value; 255 lets white frames through as pure white
    pub max_brightness: u8,
}

impl Default for ShapingConfig {
    fn default() -> Self {
        Self {
            saturation_boost: 1.4,
            brightness_boost: 1.1,
            min_brightness: 10,
            max_brightness: 240,
        }
    }
}

impl ShapingConfig {
    /// Boost saturation and brightness, then clamp brightness into the displayable band
    pub fn apply(&self, color: Rgb) -> Rgb {
        let mut hsv = Hsv::from_rgb(color);
        let min_v = self.min_brightness as f32 / 255.0;
        let max_v = self.max_brightness as f32 / 255.0;

        hsv.s = (hsv.s * self.saturation_boost).clamp(0.0, 1.0);
        hsv.v = (hsv.v * self.brightness_boost).clamp(min_v, max_v);

        hsv.to_rgb()
    }
}

/// Reduces a frame to the one color the bulb should show
#[derive(Debug, Clone, Default)]
pub struct ColorReducer {
    shaping: ShapingConfig,
}

impl ColorReducer {
    pub fn new(shaping: ShapingConfig) -> Self {
        Self { shaping }
    }

    pub fn reduce(&self, frame: &Frame) -> Result<Rgb, AppError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(AppError::Decode("cannot reduce an empty frame".into()));
        }

        let small = imageops::resize(
            frame,
            width.min(SAMPLE_WIDTH),
            height.min(SAMPLE_HEIGHT),
            FilterType::Triangle,
        );

        let average = weighted_average(&small);
        Ok(self.shaping.apply(average.to_rgb()))
    }
}

/// How much a pixel contributes to the dominant tone
#[inline]
fn pixel_weight(color: &Oklab) -> f32 {
    let lightness = (color.l / DARK_LIGHTNESS).clamp(0.0, 1.0);
    let vividness = (color.chroma() / VIVID_CHROMA).min(1.0);
    lightness * (GREY_WEIGHT + (1.0 - GREY_WEIGHT) * vividness)
}

/// Weighted OKLab mean; falls back to the plain mean when every pixel weighs nothing
fn weighted_average(img: &Frame) -> Oklab {
    let mut weighted = Oklab::default();
    let mut plain = Oklab::default();
    let mut total_weight = 0.0_f32;
    let mut count = 0.0_f32;

    for pixel in img.pixels() {
        let lab = Rgb::new(pixel[0], pixel[1], pixel[2]).to_oklab();
        let w = pixel_weight(&lab);

        weighted.l += lab.l * w;
        weighted.a += lab.a * w;
        weighted.b += lab.b * w;
        total_weight += w;

        plain.l += lab.l;
        plain.a += lab.a;
        plain.b += lab.b;
        count += 1.0;
    }

    if total_weight > f32::EPSILON {
        Oklab::new(
            weighted.l / total_weight,
            weighted.a / total_weight,
            weighted.b / total_weight,
        )
    } else {
        Oklab::new(plain.l / count, plain.a / count, plain.b / count)
    }
}
