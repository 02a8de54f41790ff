//! C5 — Encoder.
//!
//! Applies a bank of 8 asymmetric Gabor kernels (4 orientations × 2
//! wavelengths, each producing a real and an imaginary response) to the
//! normalized strip, samples on a coarse 8×32 grid, quantizes phase to 2
//! bits per sample, and derives a noise mask from local pixel statistics
//! plus per-filter dead-zone suppression.

use crate::cv;
use crate::error::{PipelineError, Result};
use crate::normalize::NormalizedStrip;
use crate::preprocess::{CLAHE_CLIP_LIMIT, CLAHE_TILE_GRID};
use crate::template::Template;
use ndarray::Array2;
use rayon::prelude::*;
use std::f64::consts::PI;

/// Rows cropped from the top and bottom of the 256×64 strip (eyelid zone).
const EYELID_CROP_ROWS: u32 = 8;
/// Cropped strip height: `64 - 2*8`.
pub const CROPPED_HEIGHT: u32 = 48;
/// Cropped strip width, same as the normalized strip's angular dimension.
pub const CROPPED_WIDTH: u32 = 256;

/// Gabor kernel height (radial extent).
const KERNEL_ROWS: usize = 5;
/// Gabor kernel width (angular extent).
const KERNEL_COLS: usize = 15;
const KERNEL_ROW_HALF: i32 = (KERNEL_ROWS / 2) as i32;
const KERNEL_COL_HALF: i32 = (KERNEL_COLS / 2) as i32;

const ORIENTATIONS: [f64; 4] = [0.0, PI / 4.0, PI / 2.0, 3.0 * PI / 4.0];
const WAVELENGTHS: [f64; 2] = [6.0, 12.0];
const GAMMA: f64 = 0.5;

/// Number of Gabor filters in the bank (4 orientations × 2 wavelengths).
pub const FILTER_COUNT: usize = ORIENTATIONS.len() * WAVELENGTHS.len();

/// Sampling grid: angular step between sampled columns.
const ANGULAR_STEP: u32 = 8;
/// Sampling grid: radial step between sampled rows.
const RADIAL_STEP: u32 = 6;
/// Sampled columns per filter.
pub const GRID_COLS: usize = (CROPPED_WIDTH / ANGULAR_STEP) as usize;
/// Sampled rows per filter.
pub const GRID_ROWS: usize = (CROPPED_HEIGHT / RADIAL_STEP) as usize;

/// Dead-zone fraction of a filter's maximum response magnitude below which
/// phase is considered unreliable.
const DEAD_ZONE_FRACTION: f64 = 0.12;

/// Noise-mask cell standard-deviation floor.
const NOISE_STD_MIN: f64 = 12.0;
/// Noise-mask cell mean floor.
const NOISE_MEAN_MIN: f64 = 25.0;
/// Noise-mask cell mean ceiling.
const NOISE_MEAN_MAX: f64 = 240.0;

/// Minimum fraction of mask-valid bits required to accept an encoding.
pub const MIN_VALID_FRACTION: f64 = 0.55;

#[derive(Clone, Copy)]
struct GaborKernel {
    real: [[f64; KERNEL_COLS]; KERNEL_ROWS],
    imag: [[f64; KERNEL_COLS]; KERNEL_ROWS],
}

fn gabor_kernel(orientation: f64, wavelength: f64) -> GaborKernel {
    let sigma = wavelength / 2.0;
    let mut real = [[0.0; KERNEL_COLS]; KERNEL_ROWS];
    let mut imag = [[0.0; KERNEL_COLS]; KERNEL_ROWS];
    for (row_idx, row_offset) in (-KERNEL_ROW_HALF..=KERNEL_ROW_HALF).enumerate() {
        for (col_idx, col_offset) in (-KERNEL_COL_HALF..=KERNEL_COL_HALF).enumerate() {
            let x = f64::from(col_offset);
            let y = f64::from(row_offset);
            let x_rot = x * orientation.cos() + y * orientation.sin();
            let y_rot = -x * orientation.sin() + y * orientation.cos();
            let envelope =
                (-(x_rot * x_rot + GAMMA * GAMMA * y_rot * y_rot) / (2.0 * sigma * sigma)).exp();
            let carrier_phase = 2.0 * PI * x_rot / wavelength;
            real[row_idx][col_idx] = envelope * carrier_phase.cos();
            imag[row_idx][col_idx] = envelope * (carrier_phase + PI / 2.0).cos();
        }
    }
    GaborKernel { real, imag }
}

fn filter_bank() -> Vec<GaborKernel> {
    ORIENTATIONS
        .iter()
        .flat_map(|&orientation| WAVELENGTHS.iter().map(move |&wavelength| (orientation, wavelength)))
        .map(|(orientation, wavelength)| gabor_kernel(orientation, wavelength))
        .collect()
}

/// Crops the eyelid zone from a normalized strip, yielding the
/// `256×48` working strip used by both the quality scorer's occlusion
/// sub-score and the encoder.
#[must_use]
pub fn crop_eyelid_zone(strip: &NormalizedStrip) -> Array2<f64> {
    let mut cropped = Array2::zeros((CROPPED_HEIGHT as usize, CROPPED_WIDTH as usize));
    for row in 0..CROPPED_HEIGHT {
        for col in 0..CROPPED_WIDTH {
            let value = strip.get_pixel(col, row + EYELID_CROP_ROWS).0[0];
            cropped[[row as usize, col as usize]] = f64::from(value);
        }
    }
    cropped
}

fn pad(cropped: &Array2<f64>) -> Array2<f64> {
    let rows = cropped.nrows();
    let cols = cropped.ncols();
    let pad_rows = KERNEL_ROW_HALF as usize;
    let pad_cols = KERNEL_COL_HALF as usize;
    let padded_rows = rows + 2 * pad_rows;
    let padded_cols = cols + 2 * pad_cols;
    let mut padded = Array2::zeros((padded_rows, padded_cols));
    for r in 0..padded_rows {
        // replicate-pad radially
        let src_r = (r as i64 - pad_rows as i64).clamp(0, rows as i64 - 1) as usize;
        for c in 0..padded_cols {
            // circularly pad (wrap) angularly
            let src_c = ((c as i64 - pad_cols as i64).rem_euclid(cols as i64)) as usize;
            padded[[r, c]] = cropped[[src_r, src_c]];
        }
    }
    padded
}

/// Per-cell validity grid derived from local pixel statistics: a cell is
/// invalid if its standard deviation is too low (flat/saturated) or its
/// mean is out of the trusted illumination band. Shape is
/// `[GRID_ROWS][GRID_COLS]`, matching the sampling grid one-to-one.
#[must_use]
pub fn noise_mask_grid(cropped: &Array2<f64>) -> Vec<Vec<bool>> {
    let mut grid = vec![vec![true; GRID_COLS]; GRID_ROWS];
    for (row_idx, row) in grid.iter_mut().enumerate() {
        let r0 = row_idx * RADIAL_STEP as usize;
        let r1 = (r0 + RADIAL_STEP as usize).min(cropped.nrows());
        for (col_idx, valid) in row.iter_mut().enumerate() {
            let c0 = col_idx * ANGULAR_STEP as usize;
            let c1 = (c0 + ANGULAR_STEP as usize).min(cropped.ncols());
            let mut values = Vec::with_capacity((r1 - r0) * (c1 - c0));
            for r in r0..r1 {
                for c in c0..c1 {
                    values.push(cropped[[r, c]]);
                }
            }
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let variance =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
            let std_dev = variance.sqrt();
            *valid = std_dev >= NOISE_STD_MIN && mean >= NOISE_MEAN_MIN && mean <= NOISE_MEAN_MAX;
        }
    }
    grid
}

struct SampledFilter {
    real: Vec<Vec<f64>>,
    imag: Vec<Vec<f64>>,
}

fn sample_filter(padded: &Array2<f64>, kernel: &GaborKernel) -> SampledFilter {
    let mut real = vec![vec![0.0; GRID_COLS]; GRID_ROWS];
    let mut imag = vec![vec![0.0; GRID_COLS]; GRID_ROWS];
    for (grid_row, real_row) in real.iter_mut().enumerate() {
        let center_r = grid_row * RADIAL_STEP as usize + KERNEL_ROW_HALF as usize;
        for (grid_col, real_val) in real_row.iter_mut().enumerate() {
            let center_c = grid_col * ANGULAR_STEP as usize + KERNEL_COL_HALF as usize;
            let mut acc_real = 0.0;
            let mut acc_imag = 0.0;
            for (kr, row_offset) in (-KERNEL_ROW_HALF..=KERNEL_ROW_HALF).enumerate() {
                let r = (center_r as i64 + i64::from(row_offset)) as usize;
                for (kc, col_offset) in (-KERNEL_COL_HALF..=KERNEL_COL_HALF).enumerate() {
                    let c = (center_c as i64 + i64::from(col_offset)) as usize;
                    let pixel = padded[[r, c]];
                    acc_real += pixel * kernel.real[kr][kc];
                    acc_imag += pixel * kernel.imag[kr][kc];
                }
            }
            *real_val = acc_real;
            imag[grid_row][grid_col] = acc_imag;
        }
    }
    SampledFilter { real, imag }
}

/// Encodes a normalized strip into a [`Template`], applying CLAHE, eyelid
/// cropping, the Gabor filter bank, phase quantization, the noise mask, and
/// per-filter dead-zone masking. Fails with
/// [`PipelineError::EncodingTooNoisy`] if the overall mask-valid fraction
/// falls below [`MIN_VALID_FRACTION`].
pub fn encode(strip: &NormalizedStrip) -> Result<Template> {
    let equalized = cv::clahe(strip, CLAHE_CLIP_LIMIT, CLAHE_TILE_GRID);
    let cropped = crop_eyelid_zone(&equalized);
    let noise_mask = noise_mask_grid(&cropped);
    let padded = pad(&cropped);

    let filters = filter_bank();
    let sampled: Vec<SampledFilter> =
        filters.par_iter().map(|kernel| sample_filter(&padded, kernel)).collect();

    let mut code = vec![0.0f32; Template::LEN / 2];
    let mut mask = vec![0.0f32; Template::LEN / 2];

    for (filter_idx, filter) in sampled.iter().enumerate() {
        let mut magnitudes = vec![0.0f64; GRID_ROWS * GRID_COLS];
        for row in 0..GRID_ROWS {
            for col in 0..GRID_COLS {
                let real = filter.real[row][col];
                let imag = filter.imag[row][col];
                magnitudes[row * GRID_COLS + col] = (real * real + imag * imag).sqrt();
            }
        }
        let max_magnitude = magnitudes.iter().cloned().fold(0.0, f64::max);
        let dead_zone_threshold = DEAD_ZONE_FRACTION * max_magnitude;

        for row in 0..GRID_ROWS {
            for col in 0..GRID_COLS {
                let base = filter_idx * GRID_ROWS * GRID_COLS * 2 + row * GRID_COLS * 2 + col * 2;
                let real = filter.real[row][col];
                let imag = filter.imag[row][col];
                code[base] = bit(real >= 0.0);
                code[base + 1] = bit(imag >= 0.0);

                let magnitude = magnitudes[row * GRID_COLS + col];
                let cell_valid = noise_mask[row][col];
                let dead_zone_valid = magnitude >= dead_zone_threshold;
                let valid = cell_valid && dead_zone_valid;
                mask[base] = bit(valid);
                mask[base + 1] = bit(valid);
            }
        }
    }

    let valid_fraction = mask.iter().filter(|&&m| m > 0.5).count() as f64 / mask.len() as f64;
    if valid_fraction < MIN_VALID_FRACTION {
        return Err(PipelineError::EncodingTooNoisy(valid_fraction));
    }

    Ok(Template::from_parts(code, mask))
}

/// Quantizes a boolean predicate to the 0.0/1.0 float encoding the
/// template's code and mask halves use throughout.
fn bit(value: bool) -> f32 {
    if value {
        1.0
    } else {
        0.0
    }
}
