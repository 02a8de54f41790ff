//! Crate-wide error taxonomy.
//!
//! Per-frame errors ([`PipelineError::SegmentationFailed`],
//! [`PipelineError::SharpnessTooLow`], [`PipelineError::EncodingTooNoisy`])
//! are meant to be logged at `debug` and absorbed by the live-detection loop;
//! burst/session errors ([`PipelineError::QualityTooLow`],
//! [`PipelineError::Inconsistent`], [`PipelineError::RepositoryUnavailable`],
//! [`PipelineError::CameraUnavailable`]) surface to the embedder. No
//! transform panics or unwinds across its boundary: every `pub fn` in the
//! pipeline returns `Result<_, PipelineError>`.

use std::path::PathBuf;
use thiserror::Error;

/// Every error a pipeline transform or the controller can signal for a
/// single frame or session.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No valid pupil/iris circle pair was found, geometry failed
    /// validation, or iris radius fell below the full-pipeline minimum.
    #[error("segmentation failed: {0}")]
    SegmentationFailed(String),

    /// Iris ROI Laplacian variance fell below the sharpness floor.
    #[error("sharpness too low: {0:.2} < {1:.2}")]
    SharpnessTooLow(f64, f64),

    /// Encoded template's mask-valid fraction fell below 0.55.
    #[error("encoding too noisy: valid fraction {0:.3} < 0.55")]
    EncodingTooNoisy(f64),

    /// An entire burst produced no template reaching the minimum composite
    /// quality score.
    #[error("quality too low: no frame in burst reached the minimum score")]
    QualityTooLow,

    /// Templates within a burst disagreed (Hamming distance above the
    /// consistency threshold).
    #[error("inconsistent templates within burst: distance {0:.3} > 0.30")]
    Inconsistent(f64),

    /// The repository adapter could not be reached.
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// The camera device could not be opened or disconnected mid-session.
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    /// Two templates could not be compared (length mismatch).
    #[error("template length mismatch: {0} vs {1}")]
    TemplateLengthMismatch(usize, usize),

    /// Underlying image codec failure at the decode/encode boundary.
    #[error("image codec error for {path:?}: {source}")]
    Codec {
        /// Path of the offending file, if known.
        path: Option<PathBuf>,
        /// Underlying decoder error.
        #[source]
        source: image::ImageError,
    },

    /// Filesystem I/O failure at the external-collaborator boundary.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be (de)serialized to/from the embedder's
    /// settings-store JSON shape.
    #[error("config (de)serialization error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
