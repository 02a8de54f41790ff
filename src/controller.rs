//! C7 — Capture Controller.
//!
//! The four-state session state machine from §4.7: `Idle -> LiveDetect ->
//! Burst -> Process`, looping back to `LiveDetect` on low quality and ending
//! in `Idle` on completion or cancellation. Modeled as an async state
//! machine driven by the embedder's event loop, the same shape the teacher
//! codebase's `Plan`/broker pair uses, narrowed to a single `tokio` task
//! instead of a multi-agent broker since this crate owns no hardware
//! agents directly.

use crate::config::{Config, Mode};
use crate::encode;
use crate::error::{PipelineError, Result};
use crate::image_buf::{self, Frame, GrayImage};
use crate::logging::Metrics;
use crate::matcher;
use crate::normalize::{self, NormalizedStrip};
use crate::preprocess;
use crate::quality::{self, Quality};
use crate::repository::{RecordId, RepositoryAdapter, SubjectRecord};
use crate::segment::{self, IrisDetectionStatus, Segmentation};
use crate::template::Template;
use ordered_float::OrderedFloat;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio::time::sleep;

/// Hamming-distance consistency threshold: a burst template more than this
/// far from the burst's first template is discarded.
const CONSISTENCY_THRESHOLD: f64 = 0.30;
/// "Reposition slightly" hint duration between enrollment bursts.
const REPOSITION_HINT_DELAY: Duration = Duration::from_secs(2);

/// State labels for logging and embedder status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No active session.
    Idle,
    /// Sampling quick-detect status, waiting for a stable "ready" read.
    LiveDetect,
    /// Collecting scored frames for the current burst.
    Burst,
    /// Encoding, filtering and deciding on the collected burst.
    Process,
}

/// A frame that survived the full pipeline (minus encoding) during a burst.
#[derive(Debug, Clone)]
struct ScoredFrame {
    image: GrayImage,
    strip: NormalizedStrip,
    quality: Quality,
}

/// One subject matched against the verification probe.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMatch {
    /// Matched subject id.
    pub subject_id: RecordId,
    /// Minimum Hamming distance across that subject's enrolled templates.
    pub distance: f64,
}

/// Outcome of a verification session (§4.7 "Verification flow").
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    /// The closest candidate fell in the confirmed zone.
    Confirmed(CandidateMatch),
    /// No candidate was confirmed, but at least one fell in the suggested
    /// zone; the embedder should present these for human disambiguation.
    Suggested(Vec<CandidateMatch>),
    /// No candidate fell within the suggested zone.
    NoMatch,
}

/// Terminal outcome of a capture session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Enrollment completed; the new subject's id.
    Enrolled(RecordId),
    /// Verification completed.
    Verified(VerificationOutcome),
    /// The session was cancelled before completion.
    Cancelled,
}

/// Status events the controller emits for an embedder UI to observe, at the
/// points named in §4.8.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// A state transition occurred.
    StateChanged(ControllerState),
    /// A quick-detect read during live detection.
    LiveStatus(IrisDetectionStatus),
    /// Progress collecting the current burst.
    BurstProgress { collected: usize, target: usize },
    /// One of the enrollment's required bursts completed.
    EnrollmentBurstComplete { burst_index: usize, total: usize },
    /// An entire burst produced no usable template.
    QualityTooLow,
}

/// Outcome of one Idle→LiveDetect→Burst→Process cycle.
enum CycleOutcome {
    Templates { templates: Vec<Template>, representative: GrayImage },
    QualityTooLow,
}

/// The capture session driver. Owns the camera frame stream for the
/// session (§5 "shared resources"); construct one per session.
pub struct CaptureController<R: RepositoryAdapter + 'static> {
    config: Config,
    repository: Arc<R>,
    metrics: Arc<dyn Metrics>,
    app_docs: PathBuf,
    frame_tx: mpsc::Sender<Frame>,
    frame_rx: mpsc::Receiver<Frame>,
    event_tx: Option<mpsc::UnboundedSender<ControllerEvent>>,
    cancel: Arc<Notify>,
}

impl<R: RepositoryAdapter + 'static> CaptureController<R> {
    /// Builds a new controller. `app_docs` is the embedder's documents
    /// directory, used to derive the enrollment image path (§6 "Directory
    /// layout").
    #[must_use]
    pub fn new(
        config: Config,
        repository: Arc<R>,
        metrics: Arc<dyn Metrics>,
        app_docs: PathBuf,
    ) -> Self {
        let (frame_tx, frame_rx) = mpsc::channel(4);
        Self {
            config,
            repository,
            metrics,
            app_docs,
            frame_tx,
            frame_rx,
            event_tx: None,
            cancel: Arc::new(Notify::new()),
        }
    }

    /// The sender the embedder's camera driver pushes frames into (§6
    /// "Frame supplier").
    #[must_use]
    pub fn frame_sink(&self) -> mpsc::Sender<Frame> {
        self.frame_tx.clone()
    }

    /// A handle the embedder can use to cancel the session (view dismissal
    /// or external cancel, per §5).
    #[must_use]
    pub fn cancel_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.cancel)
    }

    /// Registers a sink for [`ControllerEvent`]s; the embedder's UI
    /// subscribes here instead of polling.
    pub fn set_event_sink(&mut self, sink: mpsc::UnboundedSender<ControllerEvent>) {
        self.event_tx = Some(sink);
    }

    fn emit(&self, event: ControllerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn transition(&self, state: ControllerState) {
        tracing::info!(?state, "capture controller state transition");
        self.emit(ControllerEvent::StateChanged(state));
    }

    /// Runs one full session to completion: enrollment requires
    /// [`Config::enrollment_bursts`] successful cycles, verification
    /// requires exactly one.
    pub async fn run(&mut self) -> Result<SessionOutcome> {
        match self.config.mode {
            Mode::Verification => self.run_verification().await,
            Mode::Enrollment => self.run_enrollment().await,
        }
    }

    async fn run_verification(&mut self) -> Result<SessionOutcome> {
        loop {
            match self.run_cycle().await? {
                Some(CycleOutcome::Templates { templates, .. }) => {
                    let probe = templates.into_iter().next().expect("verification cycle keeps one template");
                    let outcome = self.verify(&probe).await?;
                    self.metrics.incr("match_decision", &[]);
                    return Ok(SessionOutcome::Verified(outcome));
                }
                Some(CycleOutcome::QualityTooLow) => {
                    self.emit(ControllerEvent::QualityTooLow);
                    continue;
                }
                None => return Ok(SessionOutcome::Cancelled),
            }
        }
    }

    async fn run_enrollment(&mut self) -> Result<SessionOutcome> {
        let mut pool: Vec<Template> = Vec::new();
        let mut best: Option<GrayImage> = None;
        let mut bursts_done = 0usize;

        while bursts_done < self.config.enrollment_bursts {
            match self.run_cycle().await? {
                Some(CycleOutcome::Templates { templates, representative }) => {
                    best = Some(representative);
                    pool.extend(templates);
                    bursts_done += 1;
                    self.metrics.incr("burst_completed", &[]);
                    self.emit(ControllerEvent::EnrollmentBurstComplete {
                        burst_index: bursts_done,
                        total: self.config.enrollment_bursts,
                    });
                    if bursts_done < self.config.enrollment_bursts {
                        sleep(REPOSITION_HINT_DELAY).await;
                    }
                }
                Some(CycleOutcome::QualityTooLow) => {
                    self.emit(ControllerEvent::QualityTooLow);
                    continue;
                }
                None => return Ok(SessionOutcome::Cancelled),
            }
        }

        let selected = select_diverse(&pool, 3);
        let record_id = RecordId::new(uuid::Uuid::new_v4().to_string());
        // Timestamping is the embedder's concern once persisted (the
        // repository adapter is the durability boundary); this crate has no
        // wall-clock dependency, so it stamps a placeholder the adapter is
        // expected to overwrite on write.
        let timestamp = "1970-01-01T00:00:00Z".to_string();

        let mut image_path = None;
        if let Some(image) = best {
            let id = uuid::Uuid::parse_str(&record_id.0).unwrap_or_else(|_| uuid::Uuid::new_v4());
            let path = image_buf::image_path(&self.app_docs, id);
            image_buf::encode_png(&image, &path)?;
            image_path = Some(path);
        }

        let record = SubjectRecord {
            id: record_id.clone(),
            first_name: String::new(),
            last_name: String::new(),
            age: None,
            email: None,
            phone: None,
            notes: None,
            iris_image_path: image_path,
            templates: selected,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        };
        self.repository_insert(record).await?;
        self.metrics.incr("enrollment_completed", &[]);
        Ok(SessionOutcome::Enrolled(record_id))
    }

    /// Runs Idle→LiveDetect→Burst→Process once. Returns `None` if the
    /// session was cancelled mid-cycle.
    async fn run_cycle(&mut self) -> Result<Option<CycleOutcome>> {
        self.transition(ControllerState::LiveDetect);
        if !self.wait_until_ready().await {
            return Ok(None);
        }

        self.transition(ControllerState::Burst);
        tracing::debug!("locking autofocus/autoexposure (best-effort)");
        let scored = match self.collect_burst().await {
            Some(scored) => scored,
            None => return Ok(None),
        };
        tracing::debug!("restoring autofocus/autoexposure to auto");

        self.transition(ControllerState::Process);
        let outcome = self.process_burst(scored).await?;
        self.transition(ControllerState::Idle);
        Ok(Some(outcome))
    }

    /// Samples incoming frames through quick-detect, throttled to one
    /// analysed frame per [`Config::frame_interval_ms`], until `status =
    /// Ready` persists continuously for [`Config::ready_hold_ms`].
    async fn wait_until_ready(&mut self) -> bool {
        let mut ready_since: Option<Instant> = None;
        let mut last_analysis: Option<Instant> = None;
        let interval = Duration::from_millis(self.config.frame_interval_ms);
        let hold = Duration::from_millis(self.config.ready_hold_ms);

        loop {
            let frame = tokio::select! {
                biased;
                () = self.cancel.notified() => return false,
                frame = self.frame_rx.recv() => frame,
            };
            let Some(frame) = frame else { return false };

            if let Some(last) = last_analysis {
                if last.elapsed() < interval {
                    continue;
                }
            }
            last_analysis = Some(Instant::now());

            let gray = frame.into_gray_image();
            let status = match tokio::task::spawn_blocking(move || segment::quick_detect(&gray)).await
            {
                Ok(status) => status,
                Err(_) => IrisDetectionStatus::NotFound,
            };
            self.emit(ControllerEvent::LiveStatus(status));

            if status == IrisDetectionStatus::Ready {
                let since = ready_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= hold {
                    return true;
                }
            } else {
                ready_since = None;
            }
        }
    }

    /// Collects up to [`Config::burst_target_frames`] scored frames, or
    /// until [`Config::burst_max_ms`] elapses, whichever comes first.
    async fn collect_burst(&mut self) -> Option<Vec<ScoredFrame>> {
        let deadline = Instant::now() + Duration::from_millis(self.config.burst_max_ms);
        let mut collected = Vec::new();

        while collected.len() < self.config.burst_target_frames {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let frame = tokio::select! {
                biased;
                () = self.cancel.notified() => return None,
                () = sleep(remaining) => None,
                frame = self.frame_rx.recv() => frame,
            };
            let Some(frame) = frame else { break };

            let gray = frame.into_gray_image();
            let scored = tokio::task::spawn_blocking(move || score_frame(&gray)).await;
            match scored {
                Ok(Ok(scored_frame)) => {
                    collected.push(scored_frame);
                    self.emit(ControllerEvent::BurstProgress {
                        collected: collected.len(),
                        target: self.config.burst_target_frames,
                    });
                }
                Ok(Err(error)) => tracing::debug!(%error, "frame rejected during burst"),
                Err(error) => tracing::warn!(%error, "scoring task panicked"),
            }
        }
        Some(collected)
    }

    /// Applies §4.7 "Frame selection" and "Template encoding" to a
    /// collected burst.
    async fn process_burst(&self, scored: Vec<ScoredFrame>) -> Result<CycleOutcome> {
        let min_score = self.config.min_score();
        let mut selected: Vec<ScoredFrame> =
            scored.into_iter().filter(|frame| frame.quality.composite >= min_score).collect();
        selected.sort_by_key(|frame| std::cmp::Reverse(OrderedFloat(frame.quality.composite)));
        selected.truncate(5);

        if selected.is_empty() {
            return Ok(CycleOutcome::QualityTooLow);
        }
        let representative = selected[0].image.clone();

        let mut encoded: Vec<Template> = Vec::new();
        for frame in &selected {
            match encode::encode(&frame.strip) {
                Ok(template) => encoded.push(template),
                Err(error) => tracing::debug!(%error, "frame dropped during encoding"),
            }
        }
        if encoded.is_empty() {
            return Ok(CycleOutcome::QualityTooLow);
        }

        let first = encoded[0].clone();
        let mut survivors = vec![first.clone()];
        for template in encoded.into_iter().skip(1) {
            let distance = matcher::compare(&template, &first).distance;
            if distance <= CONSISTENCY_THRESHOLD {
                survivors.push(template);
            } else {
                tracing::debug!(distance, "template discarded by consistency filter");
            }
        }
        if survivors.is_empty() {
            return Ok(CycleOutcome::QualityTooLow);
        }

        let target = if self.config.mode == Mode::Enrollment { 3 } else { 1 };
        let templates = select_diverse(&survivors, target);
        Ok(CycleOutcome::Templates { templates, representative })
    }

    async fn verify(&self, probe: &Template) -> Result<VerificationOutcome> {
        let subjects = self.list_with_templates().await?;

        let mut candidates: Vec<CandidateMatch> = subjects
            .into_iter()
            .filter(|subject| !subject.templates.is_empty())
            .map(|subject| {
                let distance = subject
                    .templates
                    .iter()
                    .map(|template| matcher::compare(probe, template).distance)
                    .fold(f64::INFINITY, f64::min);
                CandidateMatch { subject_id: subject.id, distance }
            })
            .collect();
        candidates.sort_by_key(|candidate| OrderedFloat(candidate.distance));

        let Some(top) = candidates.first().cloned() else {
            return Ok(VerificationOutcome::NoMatch);
        };
        if top.distance <= matcher::CONFIRMED_THRESHOLD {
            return Ok(VerificationOutcome::Confirmed(top));
        }
        let suggested: Vec<CandidateMatch> = candidates
            .into_iter()
            .filter(|candidate| candidate.distance <= matcher::SUGGESTED_THRESHOLD)
            .collect();
        if suggested.is_empty() {
            Ok(VerificationOutcome::NoMatch)
        } else {
            Ok(VerificationOutcome::Suggested(suggested))
        }
    }

    async fn list_with_templates(&self) -> Result<Vec<SubjectRecord>> {
        let repository = Arc::clone(&self.repository);
        tokio::task::spawn_blocking(move || repository.list_with_templates())
            .await
            .map_err(|error| PipelineError::RepositoryUnavailable(error.to_string()))?
    }

    async fn repository_insert(&self, record: SubjectRecord) -> Result<RecordId> {
        let repository = Arc::clone(&self.repository);
        tokio::task::spawn_blocking(move || repository.insert(record))
            .await
            .map_err(|error| PipelineError::RepositoryUnavailable(error.to_string()))?
    }
}

/// Full pipeline (C1–C4, minus encoding) applied to one raw camera frame.
fn score_frame(image: &GrayImage) -> Result<ScoredFrame> {
    let preprocessed = preprocess::preprocess(image).image;
    let segmentation: Segmentation = segment::segment(&preprocessed)?;
    let strip = normalize::normalize(&preprocessed, &segmentation);
    let quality = quality::score(&preprocessed, &segmentation, &strip);
    Ok(ScoredFrame { image: preprocessed, strip, quality })
}

/// Greedily selects up to `target` mutually diverse templates from `pool`:
/// seed with the first template, then repeatedly add whichever remaining
/// candidate maximizes its minimum Hamming distance to the selected set.
/// Returns the entire pool unchanged if `pool.len() <= target`.
fn select_diverse(pool: &[Template], target: usize) -> Vec<Template> {
    if pool.len() <= target {
        return pool.to_vec();
    }
    let mut selected_indices = vec![0usize];
    while selected_indices.len() < target {
        let next = (0..pool.len())
            .filter(|index| !selected_indices.contains(index))
            .max_by_key(|&index| OrderedFloat(min_distance_to_selected(&pool[index], &selected_indices, pool)))
            .expect("candidates remain while selected_indices.len() < pool.len()");
        selected_indices.push(next);
    }
    selected_indices.into_iter().map(|index| pool[index].clone()).collect()
}

fn min_distance_to_selected(candidate: &Template, selected_indices: &[usize], pool: &[Template]) -> f64 {
    selected_indices
        .iter()
        .map(|&index| matcher::compare(candidate, &pool[index]).distance)
        .fold(f64::INFINITY, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;

    fn template_with_code(fill: bool) -> Template {
        let bit = f32::from(fill);
        Template::from_parts(vec![bit; Template::HALF_LEN], vec![1.0; Template::HALF_LEN])
    }

    #[test]
    fn select_diverse_returns_pool_when_small() {
        let pool = vec![template_with_code(true), template_with_code(false)];
        let selected = select_diverse(&pool, 3);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn select_diverse_picks_target_count_from_larger_pool() {
        let pool: Vec<Template> = (0..6)
            .map(|i| {
                let code: Vec<f32> = (0..Template::HALF_LEN).map(|b| f32::from((b + i) % 3 == 0)).collect();
                Template::from_parts(code, vec![1.0; Template::HALF_LEN])
            })
            .collect();
        let selected = select_diverse(&pool, 3);
        assert_eq!(selected.len(), 3);
    }

    #[tokio::test]
    async fn verification_against_empty_registry_is_no_match() {
        let repository = Arc::new(InMemoryRepository::new());
        let controller = CaptureController::new(
            Config { mode: Mode::Verification, ..Config::default() },
            repository,
            Arc::new(crate::logging::NoopMetrics),
            PathBuf::from("/tmp/iris-core-test"),
        );
        let probe = template_with_code(true);
        let outcome = controller.verify(&probe).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::NoMatch);
    }
}
