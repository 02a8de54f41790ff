//! Layered configuration.
//!
//! [`Config`] exposes exactly the capture-protocol surface §6 calls out as
//! tunable ("Controller inputs recognised"). Everything else in the
//! pipeline — Hough parameters, CLAHE clip limit, quality weights, encoder
//! kernel geometry, matcher thresholds — is a normative contract value fixed
//! by the spec and lives as a `const` next to the code that uses it, not
//! here.

use serde::{Deserialize, Serialize};

/// Capture session mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    /// Enrolling a new subject: requires [`Config::enrollment_bursts`]
    /// complete bursts and produces a diverse 3-template record.
    Enrollment,
    /// Verifying a previously enrolled subject from a single burst.
    Verification,
}

/// Controller configuration, deserializable from the embedder's settings
/// store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Enrollment vs. verification.
    pub mode: Mode,
    /// Number of complete bursts required to finish enrollment.
    pub enrollment_bursts: usize,
    /// Target number of scored frames collected per burst.
    pub burst_target_frames: usize,
    /// Hard burst duration cap, in milliseconds.
    pub burst_max_ms: u64,
    /// Continuous "ready" hold time before transitioning to burst, in
    /// milliseconds.
    pub ready_hold_ms: u64,
    /// Minimum interval between analysed live-detection frames, in
    /// milliseconds.
    pub frame_interval_ms: u64,
    /// Minimum composite quality score for verification frame selection.
    pub min_score_verification: f64,
    /// Minimum composite quality score for enrollment frame selection.
    pub min_score_enrollment: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Verification,
            enrollment_bursts: 3,
            burst_target_frames: 20,
            burst_max_ms: 2000,
            ready_hold_ms: 500,
            frame_interval_ms: 400,
            min_score_verification: 50.0,
            min_score_enrollment: 60.0,
        }
    }
}

impl Config {
    /// Minimum composite score to keep a frame for the current mode.
    #[must_use]
    pub fn min_score(&self) -> f64 {
        match self.mode {
            Mode::Enrollment => self.min_score_enrollment,
            Mode::Verification => self.min_score_verification,
        }
    }

    /// Parses a `Config` from the embedder's settings store JSON blob.
    pub fn from_json(blob: &str) -> crate::error::Result<Self> {
        serde_json::from_str(blob).map_err(|error| crate::error::PipelineError::Config(error.to_string()))
    }

    /// Serializes this `Config` back to the settings-store JSON shape.
    pub fn to_json(&self) -> crate::error::Result<String> {
        serde_json::to_string(self).map_err(|error| crate::error::PipelineError::Config(error.to_string()))
    }
}
