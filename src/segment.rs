//! C2 — Segmenter.
//!
//! Locates the pupil and iris as two circles via circular Hough transform
//! over a median-blurred image, picks the candidate closest to the image
//! center in each pass (the user is instructed to center the eye), and
//! validates the resulting geometry against the invariants in §3.

use crate::cv::{self, HoughParams};
use crate::error::{PipelineError, Result};
use crate::geometry::{Circle, Point};
use crate::image_buf::GrayImage;
use crate::preprocess;
use std::ops::RangeInclusive;

/// Minimum valid ratio of pupil radius to iris radius.
pub const PUPIL_IRIS_RATIO_MIN: f64 = 0.20;
/// Maximum valid ratio of pupil radius to iris radius.
pub const PUPIL_IRIS_RATIO_MAX: f64 = 0.70;
/// Minimum iris radius accepted by the full pipeline.
pub const MIN_IRIS_RADIUS_FULL: f64 = 40.0;
/// Minimum iris radius accepted by the quick-detect preview.
pub const MIN_IRIS_RADIUS_QUICK: f64 = 30.0;

const PUPIL_PASS_FULL: HoughParams = HoughParams {
    accumulator_ratio: 1.5,
    min_dist: 50.0,
    canny_upper: 100.0,
    accumulator_threshold: 40,
    radius_range: 10..=80,
};

const IRIS_PASS_FULL: HoughParams = HoughParams {
    accumulator_ratio: 1.5,
    min_dist: 100.0,
    canny_upper: 80.0,
    accumulator_threshold: 35,
    radius_range: 60..=200,
};

const PUPIL_PASS_QUICK: HoughParams = HoughParams {
    accumulator_ratio: 1.5,
    min_dist: 25.0,
    canny_upper: 100.0,
    accumulator_threshold: 40,
    radius_range: 5..=40,
};

const IRIS_PASS_QUICK: HoughParams = HoughParams {
    accumulator_ratio: 1.5,
    min_dist: 50.0,
    canny_upper: 80.0,
    accumulator_threshold: 35,
    radius_range: 30..=100,
};

/// Median blur kernel size applied ahead of both Hough passes.
const MEDIAN_BLUR_KERNEL: u32 = 7;

/// Quick-detect preview width.
pub const QUICK_DETECT_WIDTH: u32 = 320;

/// Pupil and iris circles located in a preprocessed image, in that image's
/// pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segmentation {
    /// Pupil boundary circle.
    pub pupil: Circle,
    /// Iris boundary circle.
    pub iris: Circle,
}

impl Segmentation {
    /// Validates the geometric invariants from §3. `min_iris_radius` is
    /// [`MIN_IRIS_RADIUS_FULL`] for the full pipeline and
    /// [`MIN_IRIS_RADIUS_QUICK`] for quick-detect.
    fn validate(self, min_iris_radius: f64) -> Result<Self> {
        let Segmentation { pupil, iris } = self;
        if iris.radius < min_iris_radius {
            return Err(PipelineError::SegmentationFailed(format!(
                "iris radius {:.1} below minimum {min_iris_radius:.1}",
                iris.radius
            )));
        }
        if iris.radius <= pupil.radius {
            return Err(PipelineError::SegmentationFailed(format!(
                "iris radius {:.1} must exceed pupil radius {:.1}",
                iris.radius, pupil.radius
            )));
        }
        let dx = (pupil.center.x - iris.center.x).abs();
        let dy = (pupil.center.y - iris.center.y).abs();
        if dx + pupil.radius > iris.radius || dy + pupil.radius > iris.radius {
            return Err(PipelineError::SegmentationFailed(
                "pupil disk is not fully contained in the iris disk".to_string(),
            ));
        }
        let ratio = pupil.radius / iris.radius;
        if !(PUPIL_IRIS_RATIO_MIN..=PUPIL_IRIS_RATIO_MAX).contains(&ratio) {
            return Err(PipelineError::SegmentationFailed(format!(
                "pupil/iris ratio {ratio:.3} outside [{PUPIL_IRIS_RATIO_MIN}, {PUPIL_IRIS_RATIO_MAX}]"
            )));
        }
        Ok(self)
    }
}

/// Status reported by [`quick_detect`] to drive the live-detection UI and
/// readiness timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrisDetectionStatus {
    /// Neither pupil nor iris could be detected.
    NotFound,
    /// Detected iris radius below the "too far" threshold.
    TooFar,
    /// Detected iris radius above the "too close" threshold.
    TooClose,
    /// Detected iris center too far from the preview's center.
    NotCentered,
    /// Image too blurry to trust the detection.
    TooBlurry,
    /// Geometry is valid and stable; safe to transition to burst capture.
    Ready,
}

const QUICK_TOO_FAR_RADIUS: f64 = 40.0;
const QUICK_TOO_CLOSE_RADIUS: f64 = 90.0;
const QUICK_CENTER_OFFSET_FRACTION: f64 = 0.30;
const QUICK_SHARPNESS_MIN: f64 = 30.0;

/// Runs the full-pipeline segmenter (§4.2) on an already-[`preprocess`]ed
/// 640 px image.
pub fn segment(image: &GrayImage) -> Result<Segmentation> {
    segment_with(image, &PUPIL_PASS_FULL, &IRIS_PASS_FULL, MIN_IRIS_RADIUS_FULL)
}

fn segment_with(
    image: &GrayImage,
    pupil_params: &HoughParams,
    iris_params: &HoughParams,
    min_iris_radius: f64,
) -> Result<Segmentation> {
    let blurred = cv::median_blur(image, MEDIAN_BLUR_KERNEL);
    let image_center = Point::new(f64::from(image.width()) / 2.0, f64::from(image.height()) / 2.0);

    let pupil = closest_to_center(cv::hough_circles(&blurred, pupil_params), image_center)
        .ok_or_else(|| PipelineError::SegmentationFailed("no pupil candidates".to_string()))?;
    let iris = closest_to_center(cv::hough_circles(&blurred, iris_params), image_center)
        .ok_or_else(|| PipelineError::SegmentationFailed("no iris candidates".to_string()))?;

    Segmentation { pupil, iris }.validate(min_iris_radius)
}

fn closest_to_center(candidates: Vec<cv::HoughCircle>, image_center: Point) -> Option<Circle> {
    candidates
        .into_iter()
        .map(|c| c.circle)
        .min_by(|a, b| {
            a.center
                .distance_squared(image_center)
                .partial_cmp(&b.center.distance_squared(image_center))
                .expect("distances are finite")
        })
}

/// Runs the quick-detect preview pass (§4.2) directly on an arbitrary-size
/// source image: downsizes to [`QUICK_DETECT_WIDTH`], runs the reduced
/// Hough passes, and derives an [`IrisDetectionStatus`].
#[must_use]
pub fn quick_detect(source: &GrayImage) -> IrisDetectionStatus {
    let preview = preprocess::preprocess_to_width(source, QUICK_DETECT_WIDTH).image;
    let sharpness = cv::laplacian_variance(&preview);
    if sharpness < QUICK_SHARPNESS_MIN {
        return IrisDetectionStatus::TooBlurry;
    }

    let segmentation = match segment_with(
        &preview,
        &PUPIL_PASS_QUICK,
        &IRIS_PASS_QUICK,
        MIN_IRIS_RADIUS_QUICK,
    ) {
        Ok(segmentation) => segmentation,
        Err(_) => return IrisDetectionStatus::NotFound,
    };

    if segmentation.iris.radius < QUICK_TOO_FAR_RADIUS {
        return IrisDetectionStatus::TooFar;
    }
    if segmentation.iris.radius > QUICK_TOO_CLOSE_RADIUS {
        return IrisDetectionStatus::TooClose;
    }

    let preview_center =
        Point::new(f64::from(preview.width()) / 2.0, f64::from(preview.height()) / 2.0);
    let max_offset = QUICK_CENTER_OFFSET_FRACTION * f64::from(preview.width());
    let dx = (segmentation.iris.center.x - preview_center.x).abs();
    let dy = (segmentation.iris.center.y - preview_center.y).abs();
    if dx > max_offset || dy > max_offset {
        return IrisDetectionStatus::NotCentered;
    }

    IrisDetectionStatus::Ready
}

/// Radius range accepted by a given pass, exposed for diagnostics/tests.
#[must_use]
pub fn full_pipeline_radius_ranges() -> (RangeInclusive<u32>, RangeInclusive<u32>) {
    (PUPIL_PASS_FULL.radius_range.clone(), IRIS_PASS_FULL.radius_range.clone())
}
