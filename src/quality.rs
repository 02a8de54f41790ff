//! C4 — Quality Scorer.
//!
//! Five sub-scores in `[0, 100]` plus a weighted composite, following the
//! table in §4.4.

use crate::cv;
use crate::encode;
use crate::geometry::Point;
use crate::image_buf::GrayImage;
use crate::normalize::NormalizedStrip;
use crate::preprocess::{CLAHE_CLIP_LIMIT, CLAHE_TILE_GRID};
use crate::segment::Segmentation;

const SHARPNESS_WEIGHT: f64 = 0.40;
const OCCLUSION_WEIGHT: f64 = 0.25;
const SPECULAR_WEIGHT: f64 = 0.15;
const CENTERING_WEIGHT: f64 = 0.10;
const RESOLUTION_WEIGHT: f64 = 0.10;

const SHARPNESS_FLOOR: f64 = 30.0;
const SHARPNESS_CEIL: f64 = 200.0;
const SPECULAR_THRESHOLD_PIXEL: u8 = 230;
const SPECULAR_FRACTION_CEIL: f64 = 0.15;
const SPECULAR_NORMALIZER: f64 = 0.14;
const CENTERING_WIDTH_FRACTION: f64 = 0.3;
const RESOLUTION_RADIUS_FLOOR: f64 = 40.0;
const RESOLUTION_RADIUS_CEIL: f64 = 100.0;

/// The five sub-scores and composite described in §4.4, each in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quality {
    /// Laplacian-variance sharpness of the iris bounding box, mapped to
    /// `[0, 100]`.
    pub sharpness: f64,
    /// Percentage of noise-mask-valid cells in the cropped strip.
    pub occlusion: f64,
    /// Specular-reflection score (fewer saturated pixels is better).
    pub specular: f64,
    /// How close the iris center is to the image center.
    pub centering: f64,
    /// Iris radius mapped to `[0, 100]`.
    pub resolution: f64,
    /// `0.40*sharpness + 0.25*occlusion + 0.15*specular + 0.10*centering + 0.10*resolution`.
    pub composite: f64,
}

fn clamp_0_100(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

fn linear_map(value: f64, lo: f64, hi: f64) -> f64 {
    clamp_0_100((value - lo) / (hi - lo) * 100.0)
}

/// Scores a preprocessed frame that has already been segmented and
/// normalized.
#[must_use]
pub fn score(image: &GrayImage, segmentation: &Segmentation, strip: &NormalizedStrip) -> Quality {
    let sharpness = sharpness_score(image, segmentation);
    let occlusion = occlusion_score(strip);
    let specular = specular_score(image, segmentation);
    let centering = centering_score(image, segmentation);
    let resolution = linear_map(segmentation.iris.radius, RESOLUTION_RADIUS_FLOOR, RESOLUTION_RADIUS_CEIL);

    let composite = SHARPNESS_WEIGHT * sharpness
        + OCCLUSION_WEIGHT * occlusion
        + SPECULAR_WEIGHT * specular
        + CENTERING_WEIGHT * centering
        + RESOLUTION_WEIGHT * resolution;

    Quality { sharpness, occlusion, specular, centering, resolution, composite }
}

fn iris_bounding_box(image: &GrayImage, segmentation: &Segmentation) -> (u32, u32, u32, u32) {
    let (width, height) = image.dimensions();
    let r = segmentation.iris.radius;
    let x0 = (segmentation.iris.center.x - r).max(0.0) as u32;
    let y0 = (segmentation.iris.center.y - r).max(0.0) as u32;
    let x1 = ((segmentation.iris.center.x + r).min(f64::from(width))) as u32;
    let y1 = ((segmentation.iris.center.y + r).min(f64::from(height))) as u32;
    (x0, y0, x1.max(x0 + 1), y1.max(y0 + 1))
}

fn crop(image: &GrayImage, bbox: (u32, u32, u32, u32)) -> GrayImage {
    let (x0, y0, x1, y1) = bbox;
    let width = (x1 - x0).max(1);
    let height = (y1 - y0).max(1);
    image::imageops::crop_imm(image, x0, y0, width, height).to_image()
}

fn sharpness_score(image: &GrayImage, segmentation: &Segmentation) -> f64 {
    let roi = crop(image, iris_bounding_box(image, segmentation));
    linear_map(cv::laplacian_variance(&roi), SHARPNESS_FLOOR, SHARPNESS_CEIL)
}

fn occlusion_score(strip: &NormalizedStrip) -> f64 {
    // Matches encode::encode's preprocessing order exactly, so the valid-cell
    // fraction reported here agrees with the mask the encoder later computes.
    let equalized = cv::clahe(strip, CLAHE_CLIP_LIMIT, CLAHE_TILE_GRID);
    let cropped = encode::crop_eyelid_zone(&equalized);
    let grid = encode::noise_mask_grid(&cropped);
    let total = grid.len() * grid.first().map_or(0, Vec::len);
    if total == 0 {
        return 0.0;
    }
    let valid = grid.iter().flatten().filter(|&&v| v).count();
    clamp_0_100(100.0 * valid as f64 / total as f64)
}

fn specular_score(image: &GrayImage, segmentation: &Segmentation) -> f64 {
    let roi = crop(image, iris_bounding_box(image, segmentation));
    let total = roi.pixels().len();
    if total == 0 {
        return 0.0;
    }
    let saturated = roi.pixels().filter(|p| p.0[0] > SPECULAR_THRESHOLD_PIXEL).count();
    let fraction = saturated as f64 / total as f64;
    clamp_0_100((SPECULAR_FRACTION_CEIL - fraction) / SPECULAR_NORMALIZER * 100.0)
}

fn centering_score(image: &GrayImage, segmentation: &Segmentation) -> f64 {
    let (width, _height) = image.dimensions();
    let image_center = Point::new(f64::from(width) / 2.0, f64::from(image.dimensions().1) / 2.0);
    let distance = segmentation.iris.center.distance(image_center);
    clamp_0_100((1.0 - distance / (CENTERING_WIDTH_FRACTION * f64::from(width))) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Circle, Point as GeomPoint};
    use crate::normalize::normalize;
    use image::Luma;

    fn scene(pupil_c: (f64, f64), iris_c: (f64, f64)) -> (GrayImage, Segmentation) {
        let image = GrayImage::from_fn(640, 480, |x, y| {
            let v = (((x * 5 + y * 11) % 180) + 40) as u8;
            Luma([v])
        });
        let segmentation = Segmentation {
            pupil: Circle::new(GeomPoint::new(pupil_c.0, pupil_c.1), 30.0),
            iris: Circle::new(GeomPoint::new(iris_c.0, iris_c.1), 80.0),
        };
        (image, segmentation)
    }

    #[test]
    fn centered_iris_scores_higher_than_offset_iris() {
        let (image, centered) = scene((320.0, 240.0), (320.0, 240.0));
        let (_, offset) = scene((320.0, 240.0), (550.0, 240.0));
        let strip_centered = normalize(&image, &centered);
        let strip_offset = normalize(&image, &offset);
        let q_centered = score(&image, &centered, &strip_centered);
        let q_offset = score(&image, &offset, &strip_offset);
        assert!(q_centered.centering > q_offset.centering);
    }

    #[test]
    fn composite_is_bounded() {
        let (image, segmentation) = scene((320.0, 240.0), (320.0, 240.0));
        let strip = normalize(&image, &segmentation);
        let quality = score(&image, &segmentation, &strip);
        assert!((0.0..=100.0).contains(&quality.composite));
    }

    #[test]
    fn composite_matches_the_weighted_sum_of_subscores() {
        use approx::assert_relative_eq;
        let (image, segmentation) = scene((320.0, 240.0), (320.0, 240.0));
        let strip = normalize(&image, &segmentation);
        let quality = score(&image, &segmentation, &strip);
        let expected = SHARPNESS_WEIGHT * quality.sharpness
            + OCCLUSION_WEIGHT * quality.occlusion
            + SPECULAR_WEIGHT * quality.specular
            + CENTERING_WEIGHT * quality.centering
            + RESOLUTION_WEIGHT * quality.resolution;
        assert_relative_eq!(quality.composite, expected, epsilon = 1e-9);
    }

    #[test]
    fn fully_saturated_roi_has_zero_specular_score() {
        let image = GrayImage::from_pixel(640, 480, Luma([255]));
        let segmentation = Segmentation {
            pupil: Circle::new(GeomPoint::new(320.0, 240.0), 30.0),
            iris: Circle::new(GeomPoint::new(320.0, 240.0), 80.0),
        };
        assert!((specular_score(&image, &segmentation)).abs() < 1e-9);
    }
}
