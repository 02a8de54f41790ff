//! The [`Template`] data type: a fixed-length binary IrisCode plus its
//! validity mask.
//!
//! Spec'd as a single 8192-entry float vector (first half code, second half
//! mask); kept here as two 4096-entry halves for ergonomic access, with
//! [`Template::as_flat_vec`]/[`Template::from_flat_vec`] for the canonical
//! combined representation (used at serialization boundaries, e.g. the
//! repository adapter's persisted schema).

use crate::error::{PipelineError, Result};

/// A fixed-length binary iris template: 4096 code bits plus 4096 mask bits
/// (1.0 = valid, 0.0 = occluded/ambiguous), both stored as 0.0/1.0 floats.
///
/// Bit order within each half: 8 filters × 8 radial-grid rows × 32
/// angular-grid columns × 2 phase bits (real, imag), phase pair contiguous,
/// columns fastest, filters outermost.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// The code half (4096 entries).
    pub code: Vec<f32>,
    /// The mask half (4096 entries); 1.0 = valid bit.
    pub mask: Vec<f32>,
}

impl Template {
    /// Total combined template length (code + mask).
    pub const LEN: usize = 8192;
    /// Length of each half.
    pub const HALF_LEN: usize = Self::LEN / 2;

    /// Builds a template from its two halves.
    ///
    /// # Panics
    ///
    /// If either half's length is not [`Template::HALF_LEN`].
    #[must_use]
    pub fn from_parts(code: Vec<f32>, mask: Vec<f32>) -> Self {
        assert_eq!(code.len(), Self::HALF_LEN, "code half must have {} entries", Self::HALF_LEN);
        assert_eq!(mask.len(), Self::HALF_LEN, "mask half must have {} entries", Self::HALF_LEN);
        Self { code, mask }
    }

    /// Builds a template from the canonical flat 8192-entry representation
    /// (first half code, second half mask), as used by the persisted schema
    /// and the legacy v1 column migration.
    pub fn from_flat_vec(flat: Vec<f32>) -> Result<Self> {
        if flat.len() != Self::LEN {
            return Err(PipelineError::TemplateLengthMismatch(flat.len(), Self::LEN));
        }
        let mask = flat[Self::HALF_LEN..].to_vec();
        let code = flat[..Self::HALF_LEN].to_vec();
        Ok(Self { code, mask })
    }

    /// Returns the canonical flat 8192-entry representation.
    #[must_use]
    pub fn as_flat_vec(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(Self::LEN);
        flat.extend_from_slice(&self.code);
        flat.extend_from_slice(&self.mask);
        flat
    }

    /// Fraction of mask bits marked valid.
    #[must_use]
    pub fn valid_fraction(&self) -> f64 {
        self.mask.iter().filter(|&&m| m > 0.5).count() as f64 / self.mask.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_round_trip_preserves_halves() {
        let code = vec![1.0; Template::HALF_LEN];
        let mask = vec![0.0; Template::HALF_LEN];
        let template = Template::from_parts(code.clone(), mask.clone());
        let flat = template.as_flat_vec();
        assert_eq!(flat.len(), Template::LEN);
        let rebuilt = Template::from_flat_vec(flat).unwrap();
        assert_eq!(rebuilt.code, code);
        assert_eq!(rebuilt.mask, mask);
    }

    #[test]
    fn from_flat_vec_rejects_wrong_length() {
        let result = Template::from_flat_vec(vec![0.0; 10]);
        assert!(matches!(result, Err(PipelineError::TemplateLengthMismatch(10, Template::LEN))));
    }
}
