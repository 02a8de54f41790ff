//! Low-level, reusable classical-vision primitives shared by the
//! preprocessor (C1), segmenter (C2), and quality scorer (C4): CLAHE,
//! median blur, Laplacian-variance sharpness, and a circular Hough
//! transform.

use crate::geometry::{Circle, Point};
use image::{GrayImage, Luma};
use std::ops::RangeInclusive;

/// Contrast-limited adaptive histogram equalization.
///
/// Divides the image into `tile_size` tiles, equalizes each tile's
/// histogram with bins clipped at `clip_limit` times the tile's average bin
/// height (the clipped mass is redistributed uniformly across all bins,
/// the standard CLAHE recipe), then bilinearly interpolates between the
/// four nearest tile mappings for every pixel to avoid tile-boundary
/// artifacts.
#[must_use]
pub fn clahe(image: &GrayImage, clip_limit: f64, tile_size: (u32, u32)) -> GrayImage {
    let (tile_w, tile_h) = tile_size;
    let (width, height) = image.dimensions();
    let tiles_x = tile_w.max(1);
    let tiles_y = tile_h.max(1);
    let tile_width = width.div_ceil(tiles_x).max(1);
    let tile_height = height.div_ceil(tiles_y).max(1);

    // Per-tile cumulative-distribution-function lookup tables.
    let mut tile_cdfs = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_width;
            let y0 = ty * tile_height;
            let x1 = (x0 + tile_width).min(width);
            let y1 = (y0 + tile_height).min(height);
            tile_cdfs[(ty * tiles_x + tx) as usize] =
                clipped_equalization_table(image, x0, y0, x1, y1, clip_limit);
        }
    }

    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let value = image.get_pixel(x, y).0[0];
            let fx = (x as f64 + 0.5) / tile_width as f64 - 0.5;
            let fy = (y as f64 + 0.5) / tile_height as f64 - 0.5;
            let tx0 = fx.floor().clamp(0.0, (tiles_x - 1) as f64) as u32;
            let ty0 = fy.floor().clamp(0.0, (tiles_y - 1) as f64) as u32;
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let ty1 = (ty0 + 1).min(tiles_y - 1);
            let wx = (fx - tx0 as f64).clamp(0.0, 1.0);
            let wy = (fy - ty0 as f64).clamp(0.0, 1.0);

            let v00 = f64::from(tile_cdfs[(ty0 * tiles_x + tx0) as usize][value as usize]);
            let v10 = f64::from(tile_cdfs[(ty0 * tiles_x + tx1) as usize][value as usize]);
            let v01 = f64::from(tile_cdfs[(ty1 * tiles_x + tx0) as usize][value as usize]);
            let v11 = f64::from(tile_cdfs[(ty1 * tiles_x + tx1) as usize][value as usize]);
            let top = v00 * (1.0 - wx) + v10 * wx;
            let bottom = v01 * (1.0 - wx) + v11 * wx;
            let interpolated = (top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0);
            out.put_pixel(x, y, Luma([interpolated as u8]));
        }
    }
    out
}

fn clipped_equalization_table(
    image: &GrayImage,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    clip_limit: f64,
) -> [u8; 256] {
    let mut histogram = [0u32; 256];
    let mut count = 0u32;
    for y in y0..y1 {
        for x in x0..x1 {
            histogram[image.get_pixel(x, y).0[0] as usize] += 1;
            count += 1;
        }
    }
    if count == 0 {
        return std::array::from_fn(|i| i as u8);
    }

    let average = count as f64 / 256.0;
    let clip = (clip_limit * average).max(1.0) as u32;
    let mut excess = 0u32;
    for bin in &mut histogram {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let redistribute = excess / 256;
    let remainder = excess % 256;
    for (i, bin) in histogram.iter_mut().enumerate() {
        *bin += redistribute + u32::from((i as u32) < remainder);
    }

    let mut cdf = [0u32; 256];
    let mut running = 0u32;
    for (i, &bin) in histogram.iter().enumerate() {
        running += bin;
        cdf[i] = running;
    }
    let total = running.max(1);
    std::array::from_fn(|i| ((cdf[i] as f64 * 255.0) / total as f64).round() as u8)
}

/// Median blur with a square kernel of side `kernel_size` (must be odd).
#[must_use]
pub fn median_blur(image: &GrayImage, kernel_size: u32) -> GrayImage {
    let radius = kernel_size / 2;
    imageproc::filter::median_filter(image, radius, radius)
}

/// Laplacian-variance sharpness measure over the full image.
#[must_use]
pub fn laplacian_variance(image: &GrayImage) -> f64 {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }
    let mut values = Vec::with_capacity(((width - 2) * (height - 2)) as usize);
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = f64::from(image.get_pixel(x, y).0[0]);
            let up = f64::from(image.get_pixel(x, y - 1).0[0]);
            let down = f64::from(image.get_pixel(x, y + 1).0[0]);
            let left = f64::from(image.get_pixel(x - 1, y).0[0]);
            let right = f64::from(image.get_pixel(x + 1, y).0[0]);
            values.push(up + down + left + right - 4.0 * center);
        }
    }
    variance(&values)
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// A detected circle together with the vote count that supported it, for
/// diagnostics and deterministic tie-breaking.
#[derive(Debug, Clone, Copy)]
pub struct HoughCircle {
    /// The detected circle.
    pub circle: Circle,
    /// Accumulator votes behind this detection.
    pub votes: u32,
}

/// Parameters for one circular-Hough pass, matching OpenCV's
/// `HOUGH_GRADIENT` naming so the §4.2 table maps onto this struct field for
/// field.
#[derive(Debug, Clone)]
pub struct HoughParams {
    /// Ratio of accumulator resolution to input image resolution.
    pub accumulator_ratio: f64,
    /// Minimum distance between detected circle centers.
    pub min_dist: f64,
    /// Upper threshold for the internal Canny edge pass (lower is half).
    pub canny_upper: f32,
    /// Minimum accumulator votes for a center to be considered a detection.
    pub accumulator_threshold: u32,
    /// Inclusive radius search range.
    pub radius_range: RangeInclusive<u32>,
}

/// Detects circles via a two-stage Hough-gradient-style transform: edge
/// pixels vote for candidate centers across the whole radius range (summed
/// into one 2-D accumulator), centers are peak-picked with minimum-distance
/// suppression, then each center's best radius is recovered from a local
/// radius histogram.
///
/// Detections are returned sorted by descending vote count; the caller
/// (§4.2) further selects by proximity to the image center.
#[must_use]
pub fn hough_circles(image: &GrayImage, params: &HoughParams) -> Vec<HoughCircle> {
    let edges = imageproc::edges::canny(image, params.canny_upper / 2.0, params.canny_upper);
    let (width, height) = edges.dimensions();
    let ratio = params.accumulator_ratio.max(1.0);
    let acc_width = ((width as f64) / ratio).ceil().max(1.0) as usize;
    let acc_height = ((height as f64) / ratio).ceil().max(1.0) as usize;
    let mut accumulator = vec![0u32; acc_width * acc_height];

    let edge_points: Vec<(f64, f64)> = edges
        .enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] > 0)
        .map(|(x, y, _)| (f64::from(x), f64::from(y)))
        .collect();

    const ANGLE_STEPS: u32 = 36;
    let radius_step = (((*params.radius_range.end() - *params.radius_range.start()) / 20) + 1)
        .max(1);
    let radii: Vec<u32> =
        params.radius_range.clone().step_by(radius_step as usize).collect();

    for &(ex, ey) in &edge_points {
        for &r in &radii {
            let r = f64::from(r);
            for step in 0..ANGLE_STEPS {
                let theta = 2.0 * std::f64::consts::PI * f64::from(step) / f64::from(ANGLE_STEPS);
                let cx = ex - r * theta.cos();
                let cy = ey - r * theta.sin();
                let ax = (cx / ratio).round();
                let ay = (cy / ratio).round();
                if ax >= 0.0 && ay >= 0.0 && (ax as usize) < acc_width && (ay as usize) < acc_height
                {
                    accumulator[ay as usize * acc_width + ax as usize] += 1;
                }
            }
        }
    }

    let mut candidates: Vec<(usize, usize, u32)> = Vec::new();
    for ay in 0..acc_height {
        for ax in 0..acc_width {
            let votes = accumulator[ay * acc_width + ax];
            if votes >= params.accumulator_threshold {
                candidates.push((ax, ay, votes));
            }
        }
    }
    candidates.sort_by(|a, b| b.2.cmp(&a.2));

    let mut accepted: Vec<HoughCircle> = Vec::new();
    'candidates: for (ax, ay, votes) in candidates {
        let center = Point::new(f64::from(ax as u32) * ratio, f64::from(ay as u32) * ratio);
        for existing in &accepted {
            if existing.circle.center.distance(center) < params.min_dist {
                continue 'candidates;
            }
        }
        let radius = estimate_radius(&edge_points, center, &params.radius_range);
        accepted.push(HoughCircle { circle: Circle::new(center, radius), votes });
    }
    accepted
}

/// Recovers the best-supported radius for a fixed center by histogramming
/// edge-pixel distances from that center.
fn estimate_radius(
    edge_points: &[(f64, f64)],
    center: Point,
    radius_range: &RangeInclusive<u32>,
) -> f64 {
    let lo = *radius_range.start();
    let hi = *radius_range.end();
    let span = (hi - lo + 1) as usize;
    let mut histogram = vec![0u32; span];
    for &(ex, ey) in edge_points {
        let d = center.distance(Point::new(ex, ey));
        if d >= f64::from(lo) - 1.5 && d <= f64::from(hi) + 1.5 {
            let bucket = (d.round() as i64 - i64::from(lo)).clamp(0, span as i64 - 1) as usize;
            histogram[bucket] += 1;
        }
    }
    let best = histogram
        .iter()
        .enumerate()
        .max_by_key(|&(_, &count)| count)
        .map_or(0, |(index, _)| index);
    f64::from(lo) + best as f64
}
