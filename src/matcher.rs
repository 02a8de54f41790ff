//! C6 — Matcher.
//!
//! Masked fractional Hamming distance between two [`Template`]s, with
//! rotation compensation via circular angular-column shifts and a
//! three-zone decision per §4.6.

use crate::template::Template;

/// Circular shift range tried in both directions to compensate for head
/// tilt at capture time.
const MAX_SHIFT: i32 = 4;
/// Angular grid columns per row (see `encode::GRID_COLS`); a shift of one
/// unit rotates the bit layout by one angular column.
const GRID_COLS: usize = 32;
const GRID_ROWS: usize = 8;
const FILTER_COUNT: usize = 8;
const BITS_PER_CELL: usize = 2;

/// Minimum number of jointly-valid bit pairs required at a given shift for
/// that shift's distance to be trusted (`0.60 * Template::HALF_LEN`).
const MIN_VALID_BITS: usize = 2457;

/// Confirmed-match decision threshold (inclusive).
pub const CONFIRMED_THRESHOLD: f64 = 0.27;
/// Suggested-match decision threshold (inclusive upper bound).
pub const SUGGESTED_THRESHOLD: f64 = 0.35;

/// A matcher decision zone, from closest to furthest apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Fractional Hamming distance `<= 0.27`.
    Confirmed,
    /// Fractional Hamming distance in `(0.27, 0.35]`.
    Suggested,
    /// Fractional Hamming distance `> 0.35`, or the comparison was
    /// degenerate (length mismatch or too few jointly valid bits).
    None,
}

/// Outcome of comparing two templates: the best (minimum) distance found
/// across the tried shifts, and the resulting decision zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// Minimum fractional Hamming distance across all tried shifts.
    pub distance: f64,
    /// Zone `distance` falls into.
    pub decision: Decision,
    /// Circular column shift (in `[-4, 4]`) that achieved `distance`; ties
    /// prefer the shift closest to zero. `0` when every shift was rejected.
    pub best_shift: i32,
}

fn decide(distance: f64) -> Decision {
    if distance <= CONFIRMED_THRESHOLD {
        Decision::Confirmed
    } else if distance <= SUGGESTED_THRESHOLD {
        Decision::Suggested
    } else {
        Decision::None
    }
}

/// Compares `probe` against `enrolled`, trying circular angular shifts in
/// `[-4, 4]` and keeping the minimum valid distance. A shift whose jointly
/// valid bit count falls below [`MIN_VALID_BITS`] is skipped. If every
/// shift is skipped, or the templates have mismatched lengths, the distance
/// is reported as `1.0` (maximally dissimilar) with [`Decision::None`].
#[must_use]
pub fn compare(probe: &Template, enrolled: &Template) -> MatchResult {
    if probe.code.len() != enrolled.code.len() || probe.mask.len() != enrolled.mask.len() {
        return MatchResult { distance: 1.0, decision: Decision::None, best_shift: 0 };
    }

    let mut best: Option<(f64, i32)> = None;
    for shift in -MAX_SHIFT..=MAX_SHIFT {
        if let Some(distance) = shifted_distance(probe, enrolled, shift) {
            best = Some(match best {
                None => (distance, shift),
                Some((best_distance, best_shift)) => {
                    if distance < best_distance || (distance == best_distance && shift.abs() < best_shift.abs())
                    {
                        (distance, shift)
                    } else {
                        (best_distance, best_shift)
                    }
                }
            });
        }
    }

    match best {
        Some((distance, shift)) => {
            MatchResult { distance, decision: decide(distance), best_shift: shift }
        }
        None => MatchResult { distance: 1.0, decision: Decision::None, best_shift: 0 },
    }
}

/// Maps a flat bit index to `(filter, row, col, phase)` per the layout
/// documented on [`Template`].
fn cell_of(index: usize) -> (usize, usize, usize, usize) {
    let phase = index % BITS_PER_CELL;
    let rest = index / BITS_PER_CELL;
    let col = rest % GRID_COLS;
    let rest = rest / GRID_COLS;
    let row = rest % GRID_ROWS;
    let filter = rest / GRID_ROWS;
    (filter, row, col, phase)
}

fn index_of(filter: usize, row: usize, col: usize, phase: usize) -> usize {
    ((filter * GRID_ROWS + row) * GRID_COLS + col) * BITS_PER_CELL + phase
}

/// Fractional Hamming distance at a fixed circular column shift, or `None`
/// if fewer than [`MIN_VALID_BITS`] bit pairs are jointly valid.
fn shifted_distance(probe: &Template, enrolled: &Template, shift: i32) -> Option<f64> {
    let half_len = Template::HALF_LEN;
    debug_assert_eq!(half_len, FILTER_COUNT * GRID_ROWS * GRID_COLS * BITS_PER_CELL);

    let mut mismatches = 0u32;
    let mut valid = 0u32;
    for index in 0..half_len {
        let (filter, row, col, phase) = cell_of(index);
        let shifted_col = (col as i32 + shift).rem_euclid(GRID_COLS as i32) as usize;
        let enrolled_index = index_of(filter, row, shifted_col, phase);

        let probe_valid = probe.mask[index] > 0.5;
        let enrolled_valid = enrolled.mask[enrolled_index] > 0.5;
        if !probe_valid || !enrolled_valid {
            continue;
        }
        valid += 1;
        let probe_bit = probe.code[index] > 0.5;
        let enrolled_bit = enrolled.code[enrolled_index] > 0.5;
        if probe_bit != enrolled_bit {
            mismatches += 1;
        }
    }

    if (valid as usize) < MIN_VALID_BITS {
        return None;
    }
    Some(f64::from(mismatches) / f64::from(valid))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_valid_template(code: Vec<f32>) -> Template {
        Template::from_parts(code, vec![1.0; Template::HALF_LEN])
    }

    #[test]
    fn identical_templates_match_exactly() {
        let code: Vec<f32> = (0..Template::HALF_LEN).map(|i| f32::from(i % 2 == 0)).collect();
        let template = all_valid_template(code);
        let result = compare(&template, &template);
        assert_eq!(result.distance, 0.0);
        assert_eq!(result.decision, Decision::Confirmed);
    }

    #[test]
    fn fully_inverted_templates_are_maximally_distant() {
        let code_a: Vec<f32> = vec![1.0; Template::HALF_LEN];
        let code_b: Vec<f32> = vec![0.0; Template::HALF_LEN];
        let a = all_valid_template(code_a);
        let b = all_valid_template(code_b);
        let result = compare(&a, &b);
        assert_eq!(result.distance, 1.0);
        assert_eq!(result.decision, Decision::None);
    }

    #[test]
    fn distance_is_symmetric() {
        let code_a: Vec<f32> =
            (0..Template::HALF_LEN).map(|i| f32::from((i * 7 + 3) % 5 == 0)).collect();
        let code_b: Vec<f32> =
            (0..Template::HALF_LEN).map(|i| f32::from((i * 3 + 1) % 4 == 0)).collect();
        let a = all_valid_template(code_a);
        let b = all_valid_template(code_b);
        let ab = compare(&a, &b);
        let ba = compare(&b, &a);
        assert!((ab.distance - ba.distance).abs() < 1e-9);
    }

    #[test]
    fn mismatched_lengths_are_reported_as_no_match() {
        let a = all_valid_template(vec![1.0; Template::HALF_LEN]);
        let b = Template::from_parts(vec![1.0; Template::HALF_LEN], vec![0.0; Template::HALF_LEN]);
        // Same lengths but all-invalid mask on `b`: every shift has zero
        // valid bits, which must also report as no-match.
        let result = compare(&a, &b);
        assert_eq!(result.decision, Decision::None);
        assert_eq!(result.distance, 1.0);
    }

    #[test]
    fn rotation_within_tolerance_is_recovered_by_shift_search() {
        let base: Vec<f32> =
            (0..Template::HALF_LEN).map(|i| f32::from((i * 11 + 2) % 3 == 0)).collect();
        let rotated_mask = vec![1.0; Template::HALF_LEN];
        let reference = Template::from_parts(base.clone(), rotated_mask.clone());

        let mut rotated_code = vec![0.0f32; Template::HALF_LEN];
        for index in 0..Template::HALF_LEN {
            let (filter, row, col, phase) = cell_of(index);
            let shifted_col = (col as i32 + 2).rem_euclid(GRID_COLS as i32) as usize;
            rotated_code[index_of(filter, row, shifted_col, phase)] = base[index];
        }
        let probe = Template::from_parts(rotated_code, rotated_mask);

        let result = compare(&probe, &reference);
        assert_eq!(result.distance, 0.0);
        assert_eq!(result.decision, Decision::Confirmed);
    }
}
