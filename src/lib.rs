//! Iris recognition core: a deterministic, CPU-bound pipeline turning a
//! grayscale eye image into an iris template, plus the live-capture state
//! machine that drives burst acquisition and decisioning.
//!
//! The camera driver, GUI, persistent storage, and image file codecs are
//! external collaborators, expressed here as traits
//! ([`image_buf::StillCapture`], [`image_buf::ImageDecoder`],
//! [`repository::RepositoryAdapter`]) this crate depends on but does not
//! own.
//!
//! Pipeline stages run in this order: [`preprocess`] (C1) → [`segment`]
//! (C2) → [`normalize`] (C3) → [`quality`] (C4) → [`encode`] (C5) →
//! [`matcher`] (C6). [`controller`] (C7) drives the stages from live camera
//! frames; [`repository`] (C8) is the persistence contract.

pub mod config;
pub mod controller;
pub mod cv;
pub mod encode;
pub mod error;
pub mod geometry;
pub mod image_buf;
pub mod logging;
pub mod matcher;
pub mod normalize;
pub mod preprocess;
pub mod quality;
pub mod repository;
pub mod segment;
pub mod template;

pub use config::{Config, Mode};
pub use controller::{CaptureController, ControllerEvent, SessionOutcome, VerificationOutcome};
pub use error::{PipelineError, Result};
pub use template::Template;
