//! C1 — Image Preprocessor.
//!
//! Resizes to the canonical 640 px width and applies CLAHE. All downstream
//! radii/thresholds (segmenter, quality scorer, encoder) are calibrated at
//! this width, so every other component assumes its input has already gone
//! through here.

use crate::cv;
use crate::image_buf::GrayImage;

/// Canonical preprocessed width in pixels.
pub const CANONICAL_WIDTH: u32 = 640;

/// CLAHE clip limit used by the preprocessor and by the encoder's strip
/// preparation step.
pub const CLAHE_CLIP_LIMIT: f64 = 2.0;

/// CLAHE tile grid used by the preprocessor and by the encoder's strip
/// preparation step.
pub const CLAHE_TILE_GRID: (u32, u32) = (8, 8);

/// Result of preprocessing: the canonical-width, CLAHE-equalized image, and
/// the scale factor that was applied to reach it.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// The resized, equalized grayscale image.
    pub image: GrayImage,
    /// `canonical_width / original_width`, so callers can map detections
    /// back to the original image if needed.
    pub scale: f64,
}

/// Preprocesses an arbitrary-size grayscale or BGR-derived image (BGR is
/// assumed already converted to grayscale by the [`crate::image_buf::ImageDecoder`]
/// boundary in C1's caller) into the canonical form every downstream stage
/// expects.
#[must_use]
pub fn preprocess(image: &GrayImage) -> Preprocessed {
    preprocess_to_width(image, CANONICAL_WIDTH)
}

/// As [`preprocess`], but to an arbitrary target width — used by the
/// quick-detect preview pass, which operates at 320 px.
#[must_use]
pub fn preprocess_to_width(image: &GrayImage, target_width: u32) -> Preprocessed {
    let (width, height) = image.dimensions();
    let scale = f64::from(target_width) / f64::from(width.max(1));
    let target_height = ((f64::from(height) * scale).round() as u32).max(1);

    let resized = if width == target_width {
        image.clone()
    } else {
        image::imageops::resize(
            image,
            target_width,
            target_height,
            image::imageops::FilterType::Triangle,
        )
    };
    let equalized = cv::clahe(&resized, CLAHE_CLIP_LIMIT, CLAHE_TILE_GRID);
    Preprocessed { image: equalized, scale }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn resizes_to_canonical_width() {
        let source = GrayImage::from_fn(1280, 960, |x, y| Luma([((x + y) % 256) as u8]));
        let out = preprocess(&source);
        assert_eq!(out.image.width(), CANONICAL_WIDTH);
        assert_eq!(out.image.height(), 480);
        assert!((out.scale - 0.5).abs() < 1e-9);
    }

    #[test]
    fn idempotent_up_to_bounded_drift_on_already_canonical_input() {
        let source = GrayImage::from_fn(CANONICAL_WIDTH, 480, |x, y| Luma([((x * 3 + y * 7) % 256) as u8]));
        let once = preprocess(&source);
        let twice = preprocess(&once.image);
        assert_eq!(once.image.dimensions(), twice.image.dimensions());
        let mut max_drift = 0i32;
        for (a, b) in once.image.pixels().zip(twice.image.pixels()) {
            max_drift = max_drift.max((i32::from(a.0[0]) - i32::from(b.0[0])).abs());
        }
        assert!(max_drift <= 40, "drift too large: {max_drift}");
    }
}
