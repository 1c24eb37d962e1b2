//! Turning captured bytes into a pixel grid

use crate::error::AppError;
use image::RgbImage;

/// One captured screen, alpha already dropped
pub type Frame = RgbImage;

/// Decodes raw screenshot bytes into a [`Frame`]
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Frame, AppError>;
}

/// Decoder backed by the `image` crate (PNG and JPEG)
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFrameDecoder;

impl FrameDecoder for ImageFrameDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Frame, AppError> {
        if bytes.is_empty() {
            return Err(AppError::Decode("no image data".into()));
        }

        let img = image::load_from_memory(bytes)
            .map_err(|e| AppError::Decode(format!("Failed to decode image: {}", e)))?;

        if img.width() == 0 || img.height() == 0 {
            return Err(AppError::Decode("image has no pixels".into()));
        }

        Ok(img.to_rgb8())
    }
}
