//! C3 — Normalizer.
//!
//! Daugman rubber-sheet unwrap of the annulus between the pupil and iris
//! circles into a fixed 256 (angular) × 64 (radial) polar strip. The pupil
//! and iris centers may differ; interpolating center and radius
//! independently per radial step tolerates non-concentric circles.

use crate::image_buf::GrayImage;
use crate::segment::Segmentation;
use std::f64::consts::PI;

/// Angular sample count (columns).
pub const ANGULAR_SAMPLES: u32 = 256;
/// Radial sample count (rows).
pub const RADIAL_SAMPLES: u32 = 64;

/// A fixed 256×64 normalized iris strip. Row 0 is the pupil boundary, row 63
/// the iris boundary; column 0 is angle 0, increasing anticlockwise.
pub type NormalizedStrip = GrayImage;

/// Unwraps the annulus between `segmentation.pupil` and `segmentation.iris`
/// in `image` into a [`NormalizedStrip`]. Out-of-image samples contribute 0.
#[must_use]
pub fn normalize(image: &GrayImage, segmentation: &Segmentation) -> NormalizedStrip {
    let (width, height) = image.dimensions();
    let mut strip = NormalizedStrip::new(ANGULAR_SAMPLES, RADIAL_SAMPLES);

    for r in 0..RADIAL_SAMPLES {
        let ratio = f64::from(r) / f64::from(RADIAL_SAMPLES);
        for theta in 0..ANGULAR_SAMPLES {
            let theta_prime = 2.0 * PI * f64::from(theta) / f64::from(ANGULAR_SAMPLES);
            let (cos_t, sin_t) = (theta_prime.cos(), theta_prime.sin());

            let pupil_x = segmentation.pupil.center.x + segmentation.pupil.radius * cos_t;
            let pupil_y = segmentation.pupil.center.y + segmentation.pupil.radius * sin_t;
            let iris_x = segmentation.iris.center.x + segmentation.iris.radius * cos_t;
            let iris_y = segmentation.iris.center.y + segmentation.iris.radius * sin_t;

            let sample_x = (1.0 - ratio) * pupil_x + ratio * iris_x;
            let sample_y = (1.0 - ratio) * pupil_y + ratio * iris_y;

            let px = sample_x.round();
            let py = sample_y.round();
            let value = if px >= 0.0 && py >= 0.0 && (px as u32) < width && (py as u32) < height {
                image.get_pixel(px as u32, py as u32).0[0]
            } else {
                0
            };
            strip.put_pixel(theta, r, image::Luma([value]));
        }
    }
    strip
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Circle, Point};

    #[test]
    fn strip_has_fixed_dimensions() {
        let image = GrayImage::from_pixel(640, 480, image::Luma([100]));
        let segmentation = Segmentation {
            pupil: Circle::new(Point::new(320.0, 240.0), 30.0),
            iris: Circle::new(Point::new(320.0, 240.0), 80.0),
        };
        let strip = normalize(&image, &segmentation);
        assert_eq!(strip.dimensions(), (ANGULAR_SAMPLES, RADIAL_SAMPLES));
    }

    #[test]
    fn out_of_image_samples_are_zero() {
        // Iris circle partly outside a tiny image: outer rows must sample 0.
        let image = GrayImage::from_pixel(20, 20, image::Luma([255]));
        let segmentation = Segmentation {
            pupil: Circle::new(Point::new(10.0, 10.0), 2.0),
            iris: Circle::new(Point::new(10.0, 10.0), 50.0),
        };
        let strip = normalize(&image, &segmentation);
        let outer_row_has_zero =
            (0..ANGULAR_SAMPLES).any(|theta| strip.get_pixel(theta, RADIAL_SAMPLES - 1).0[0] == 0);
        assert!(outer_row_has_zero);
    }

    #[test]
    fn tolerates_non_concentric_circles() {
        let image = GrayImage::from_pixel(640, 480, image::Luma([77]));
        let segmentation = Segmentation {
            pupil: Circle::new(Point::new(310.0, 230.0), 30.0),
            iris: Circle::new(Point::new(330.0, 250.0), 80.0),
        };
        let strip = normalize(&image, &segmentation);
        assert_eq!(strip.dimensions(), (ANGULAR_SAMPLES, RADIAL_SAMPLES));
    }
}
