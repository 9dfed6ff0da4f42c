//! Scan orchestration
//!
//! Wires the session state machine to the external collaborators. Frames
//! arrive on the producer path (`submit_frame`), which runs the frame gate
//! under the session lock and queues admitted frames for a single worker
//! task. The worker calls the recognition engine, re-checks the session
//! epoch, offers normalized candidates, and finalizes the session when the
//! gate or the early-stop policy ends capture. Outcomes and progress reach
//! observers through a crossbeam event channel; nothing in here blocks on
//! the UI side.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::adapter::{
    CapturedFrame, GatewayResponse, RecognitionAdapter, RecognitionRequest, SerialSubmission,
    SubmissionGateway,
};
use crate::config::ScanConfig;
use crate::session::candidate::FrameCandidate;
use crate::session::{
    Admission, OfferResult, RefusalReason, ScanSession, SessionError, SessionPhase,
};
use crate::validate::normalize::{normalize, passes_prefilter};
use crate::validate::{ValidationLevel, ValidationOutcome, Validator};

/// Progress and outcome notifications for external observers
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A session entered Scanning
    SessionStarted { epoch: u64 },
    /// A candidate was stored; carries the best confidence seen so far
    FrameObserved { sequence: u64, best_confidence: f32 },
    /// The early-stop policy ended capture
    EarlyStop { sequence: u64 },
    /// A borderline serial is waiting for confirm/deny
    ConfirmationRequired { serial: String, confidence: f32 },
    /// The session reached its terminal outcome
    SessionCompleted { outcome: ValidationOutcome },
    /// The gateway accepted a serial
    SerialSubmitted { serial: String, message: String },
    /// The gateway refused a serial or the call failed
    SubmissionFailed { serial: String, message: String },
    /// The session was cancelled
    SessionCancelled { epoch: u64 },
}

/// Work queued for the recognition worker
enum Job {
    /// Recognize an admitted frame
    Recognize {
        frame: CapturedFrame,
        epoch: u64,
        sequence: u64,
    },
    /// Capture ended naturally; evaluate and resolve
    Finalize { epoch: u64 },
    /// The session window may have elapsed without frames arriving
    Deadline { epoch: u64 },
}

struct ScannerInner {
    session: Mutex<ScanSession>,
    config: ScanConfig,
    validator: Validator,
    adapter: Arc<dyn RecognitionAdapter>,
    gateway: Arc<dyn SubmissionGateway>,
    jobs: mpsc::UnboundedSender<Job>,
    events: Sender<ScanEvent>,
}

/// Handle driving scan sessions
///
/// Cheap to clone; all clones share one session. Must be created inside a
/// tokio runtime because it spawns the recognition worker task.
#[derive(Clone)]
pub struct Scanner {
    inner: Arc<ScannerInner>,
}

impl Scanner {
    /// Create a scanner and the event channel its observers read from
    pub fn new(
        config: ScanConfig,
        adapter: Arc<dyn RecognitionAdapter>,
        gateway: Arc<dyn SubmissionGateway>,
    ) -> Result<(Self, Receiver<ScanEvent>)> {
        let validator = config.build_validator()?;
        let format = config.serial_format()?;
        let session = ScanSession::new(
            config.limits(),
            config.validation.high_confidence_threshold,
            format,
        );

        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();

        let inner = Arc::new(ScannerInner {
            session: Mutex::new(session),
            config,
            validator,
            adapter,
            gateway,
            jobs: job_tx,
            events: event_tx,
        });

        tokio::spawn(run_worker(inner.clone(), job_rx));

        Ok((Self { inner }, event_rx))
    }

    /// Start a new session. Arms a deadline timer so the session ends even
    /// if the frame producer goes quiet.
    pub fn start(&self) -> Result<u64, SessionError> {
        let epoch = self.inner.session.lock().start(Instant::now())?;
        info!(epoch, "scan session started");

        let window = self.inner.config.limits().window;
        let jobs = self.inner.jobs.clone();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = jobs.send(Job::Deadline { epoch });
        });

        let _ = self.inner.events.send(ScanEvent::SessionStarted { epoch });
        Ok(epoch)
    }

    /// Offer a frame to the gate. Admitted frames are queued for the
    /// recognition worker; a window/budget refusal queues finalization.
    pub fn submit_frame(&self, frame: CapturedFrame) -> Admission {
        let admission = self.inner.session.lock().admit(Instant::now());
        match admission {
            Admission::Admitted { epoch, sequence } => {
                let _ = self.inner.jobs.send(Job::Recognize {
                    frame,
                    epoch,
                    sequence,
                });
            }
            Admission::Refused(RefusalReason::WindowExpired)
            | Admission::Refused(RefusalReason::BudgetExhausted) => {
                let epoch = self.inner.session.lock().epoch();
                let _ = self.inner.jobs.send(Job::Finalize { epoch });
            }
            Admission::Refused(RefusalReason::NotScanning) => {}
        }
        admission
    }

    /// Cancel the current session. In-flight recognition results become
    /// stale and can no longer produce an outcome.
    pub fn cancel(&self) {
        let epoch = {
            let mut session = self.inner.session.lock();
            session.cancel();
            session.epoch()
        };
        info!(epoch, "scan session cancelled");
        let _ = self.inner.events.send(ScanEvent::SessionCancelled { epoch });
    }

    /// Confirm a borderline serial and dispatch it to the gateway
    pub async fn confirm(&self) -> Result<GatewayResponse> {
        let outcome = self.inner.session.lock().confirm()?;
        let serial = outcome
            .serial
            .clone()
            .context("borderline outcome carries no serial")?;
        self.inner
            .dispatch(serial, outcome.adjusted_confidence)
            .await
    }

    /// Deny a borderline serial; nothing is dispatched
    pub fn deny(&self) -> Result<(), SessionError> {
        self.inner.session.lock().deny()?;
        info!("borderline serial denied");
        Ok(())
    }

    /// Reset a completed session back to Idle
    pub fn scan_again(&self) -> Result<(), SessionError> {
        self.inner.session.lock().scan_again()
    }

    /// Current session phase
    pub fn phase(&self) -> SessionPhase {
        self.inner.session.lock().phase()
    }

    /// Best confidence seen this session (UI feedback only)
    pub fn best_confidence(&self) -> f32 {
        self.inner.session.lock().best_confidence()
    }

    /// Terminal outcome of the current session, if reached
    pub fn outcome(&self) -> Option<ValidationOutcome> {
        self.inner.session.lock().outcome().cloned()
    }

    /// Last corrected serial from any session, for manual resubmission
    pub fn last_serial(&self) -> Option<String> {
        self.inner
            .session
            .lock()
            .last_serial()
            .map(str::to_string)
    }
}

/// Sequential recognition worker: one job at a time, in admission order
async fn run_worker(inner: Arc<ScannerInner>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Recognize {
                frame,
                epoch,
                sequence,
            } => inner.process_frame(frame, epoch, sequence).await,
            Job::Finalize { epoch } => inner.finalize(epoch).await,
            Job::Deadline { epoch } => {
                let expired = inner.session.lock().expire(epoch, Instant::now());
                if expired {
                    inner.finalize(epoch).await;
                }
            }
        }
    }
}

impl ScannerInner {
    async fn process_frame(&self, frame: CapturedFrame, epoch: u64, sequence: u64) {
        // Skip the engine call outright if the session already moved on.
        if self.session.lock().epoch() != epoch {
            debug!(sequence, "dropping frame from a previous session");
            return;
        }

        let request = RecognitionRequest {
            frame: &frame,
            roi: self.config.roi(),
            min_text_height: self.config.recognition.min_text_height,
            charset_hint: &self.config.recognition.charset,
        };

        let observations = match self.adapter.recognize(request).await {
            Ok(observations) => observations,
            Err(e) => {
                // Non-fatal: the frame already counted against the budget.
                warn!(sequence, error = %e, "recognition failed, skipping frame");
                return;
            }
        };

        let mut early_stop = false;
        {
            let mut session = self.session.lock();
            if session.epoch() != epoch {
                debug!(sequence, "discarding stale recognition result");
                return;
            }

            for observation in observations {
                let normalized = normalize(&observation.text);
                if !passes_prefilter(
                    &normalized,
                    self.config.validation.min_len,
                    self.config.validation.max_len,
                ) {
                    debug!(sequence, text = %normalized, "candidate failed pre-filter");
                    continue;
                }

                let candidate = FrameCandidate {
                    raw_text: observation.text,
                    normalized_text: normalized,
                    confidence: observation.confidence,
                    sequence_index: sequence,
                    captured_at: frame.captured_at,
                };

                match session.offer(epoch, candidate) {
                    OfferResult::Collected => {
                        let _ = self.events.send(ScanEvent::FrameObserved {
                            sequence,
                            best_confidence: session.best_confidence(),
                        });
                    }
                    OfferResult::EarlyStop => {
                        let _ = self.events.send(ScanEvent::EarlyStop { sequence });
                        early_stop = true;
                        break;
                    }
                    OfferResult::Stale | OfferResult::NotScanning => break,
                }
            }
        }

        if early_stop {
            self.finalize(epoch).await;
        }
    }

    /// Evaluate the terminal candidate and resolve the session. No-op when
    /// the epoch is stale or the session is not Evaluating, so duplicate
    /// finalize jobs are harmless.
    async fn finalize(&self, epoch: u64) {
        let outcome = {
            let mut session = self.session.lock();
            if session.epoch() != epoch || session.phase() != SessionPhase::Evaluating {
                return;
            }
            let outcome = match session.select_terminal() {
                Some(candidate) => self
                    .validator
                    .evaluate(&candidate.normalized_text, candidate.confidence),
                None => ValidationOutcome::no_candidates(),
            };
            if session.resolve(outcome.clone()).is_err() {
                return;
            }
            outcome
        };

        info!(
            level = ?outcome.level,
            reason = ?outcome.reason,
            confidence = outcome.adjusted_confidence,
            "session finished"
        );

        match outcome.level {
            ValidationLevel::Accept => {
                if let Some(serial) = outcome.serial.clone() {
                    let _ = self.dispatch(serial, outcome.adjusted_confidence).await;
                }
                let _ = self.events.send(ScanEvent::SessionCompleted { outcome });
            }
            ValidationLevel::Borderline => {
                if let Some(serial) = outcome.serial.clone() {
                    let _ = self.events.send(ScanEvent::ConfirmationRequired {
                        serial,
                        confidence: outcome.adjusted_confidence,
                    });
                }
            }
            ValidationLevel::Reject => {
                let _ = self.events.send(ScanEvent::SessionCompleted { outcome });
            }
        }
    }

    /// Hand an accepted serial to the gateway. Called at most once per
    /// terminal Accept or confirmed Borderline.
    async fn dispatch(&self, serial: String, confidence: f32) -> Result<GatewayResponse> {
        let submission = SerialSubmission {
            serial: serial.clone(),
            confidence,
            device_type: self.config.recognition.device_type.clone(),
            source: self.config.submission.source_tag.clone(),
            submitted_at: SystemTime::now(),
        };

        match self.gateway.submit(submission).await {
            Ok(response) if response.accepted => {
                info!(serial = %serial, "serial submitted");
                let _ = self.events.send(ScanEvent::SerialSubmitted {
                    serial,
                    message: response.message.clone(),
                });
                Ok(response)
            }
            Ok(response) => {
                warn!(serial = %serial, message = %response.message, "gateway refused serial");
                let _ = self.events.send(ScanEvent::SubmissionFailed {
                    serial,
                    message: response.message.clone(),
                });
                Ok(response)
            }
            Err(e) => {
                warn!(serial = %serial, error = %e, "gateway call failed");
                let _ = self.events.send(ScanEvent::SubmissionFailed {
                    serial,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Observation;
    use crate::validate::OutcomeReason;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Adapter that replays a scripted response per recognize call
    struct ScriptedAdapter {
        responses: Mutex<VecDeque<Result<Vec<Observation>>>>,
    }

    impl ScriptedAdapter {
        fn new(responses: Vec<Result<Vec<Observation>>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl RecognitionAdapter for ScriptedAdapter {
        async fn recognize(&self, _request: RecognitionRequest<'_>) -> Result<Vec<Observation>> {
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]))
        }
    }

    /// Adapter that parks until released, to simulate an in-flight engine
    /// call racing a cancel
    struct GatedAdapter {
        gate: tokio::sync::Notify,
        called: AtomicBool,
        response: Mutex<Option<Vec<Observation>>>,
    }

    impl GatedAdapter {
        fn new(response: Vec<Observation>) -> Arc<Self> {
            Arc::new(Self {
                gate: tokio::sync::Notify::new(),
                called: AtomicBool::new(false),
                response: Mutex::new(Some(response)),
            })
        }
    }

    #[async_trait]
    impl RecognitionAdapter for GatedAdapter {
        async fn recognize(&self, _request: RecognitionRequest<'_>) -> Result<Vec<Observation>> {
            self.called.store(true, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(self.response.lock().take().unwrap_or_default())
        }
    }

    /// Gateway that records every submission
    struct RecordingGateway {
        submissions: Mutex<Vec<SerialSubmission>>,
        accept: bool,
    }

    impl RecordingGateway {
        fn new(accept: bool) -> Arc<Self> {
            Arc::new(Self {
                submissions: Mutex::new(Vec::new()),
                accept,
            })
        }

        fn count(&self) -> usize {
            self.submissions.lock().len()
        }
    }

    #[async_trait]
    impl SubmissionGateway for RecordingGateway {
        async fn submit(&self, submission: SerialSubmission) -> Result<GatewayResponse> {
            self.submissions.lock().push(submission);
            Ok(GatewayResponse {
                accepted: self.accept,
                message: if self.accept { "stored" } else { "duplicate" }.to_string(),
            })
        }
    }

    fn observation(text: &str, confidence: f32) -> Observation {
        Observation {
            text: text.to_string(),
            confidence,
        }
    }

    fn frame() -> CapturedFrame {
        CapturedFrame::new(vec![0u8; 16], 2, 2)
    }

    fn test_config(window_ms: u64, frame_budget: u32) -> ScanConfig {
        let mut config = ScanConfig::default();
        config.session.window_ms = window_ms;
        config.session.frame_budget = frame_budget;
        config
    }

    async fn wait_for_phase(scanner: &Scanner, phase: SessionPhase) {
        for _ in 0..400 {
            if scanner.phase() == phase {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "timed out waiting for {:?}, still {:?}",
            phase,
            scanner.phase()
        );
    }

    #[tokio::test]
    async fn test_early_stop_accepts_and_submits() {
        let adapter = ScriptedAdapter::new(vec![
            // Pre-filter failure: far too short after normalization.
            Ok(vec![observation("C0", 0.30)]),
            // Wrong strict length, stored but not an early stop.
            Ok(vec![observation("C02ABCDEFGH", 0.50)]),
            // High-confidence exact format: ends the session at frame 3.
            Ok(vec![observation("C02ABCDEFGHJ", 0.92)]),
        ]);
        let gateway = RecordingGateway::new(true);
        let (scanner, events) =
            Scanner::new(test_config(4000, 10), adapter, gateway.clone()).unwrap();

        scanner.start().unwrap();
        for _ in 0..3 {
            assert!(matches!(
                scanner.submit_frame(frame()),
                Admission::Admitted { .. }
            ));
        }

        wait_for_phase(&scanner, SessionPhase::Completed).await;

        let outcome = scanner.outcome().unwrap();
        assert_eq!(outcome.level, ValidationLevel::Accept);
        assert_eq!(outcome.serial.as_deref(), Some("C02ABCDEFGHJ"));
        assert_eq!(gateway.count(), 1);
        assert_eq!(gateway.submissions.lock()[0].serial, "C02ABCDEFGHJ");

        let collected: Vec<ScanEvent> = events.try_iter().collect();
        assert!(collected
            .iter()
            .any(|e| matches!(e, ScanEvent::EarlyStop { sequence: 2 })));
        assert!(collected
            .iter()
            .any(|e| matches!(e, ScanEvent::SerialSubmitted { .. })));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_rejects_invalid_format() {
        // Every frame reads a 10-character string; correction cannot change
        // length, so the session ends with an invalid-format reject.
        let adapter = ScriptedAdapter::new(vec![
            Ok(vec![observation("C02ABCDEFG", 0.45)]),
            Ok(vec![observation("C02ABCDEFG", 0.40)]),
            Ok(vec![observation("C02ABCDEFG", 0.42)]),
        ]);
        let gateway = RecordingGateway::new(true);
        let (scanner, _events) =
            Scanner::new(test_config(60_000, 3), adapter, gateway.clone()).unwrap();

        scanner.start().unwrap();
        for _ in 0..3 {
            assert!(matches!(
                scanner.submit_frame(frame()),
                Admission::Admitted { .. }
            ));
        }
        assert_eq!(
            scanner.submit_frame(frame()),
            Admission::Refused(RefusalReason::BudgetExhausted)
        );

        wait_for_phase(&scanner, SessionPhase::Completed).await;

        let outcome = scanner.outcome().unwrap();
        assert_eq!(outcome.level, ValidationLevel::Reject);
        assert_eq!(outcome.reason, OutcomeReason::InvalidFormat);
        assert_eq!(gateway.count(), 0);
    }

    #[tokio::test]
    async fn test_adapter_error_skips_frame_but_session_continues() {
        let adapter = ScriptedAdapter::new(vec![
            Err(anyhow!("engine crashed")),
            Ok(vec![observation("C02ABCDEFGHJ", 0.95)]),
        ]);
        let gateway = RecordingGateway::new(true);
        let (scanner, _events) =
            Scanner::new(test_config(4000, 10), adapter, gateway.clone()).unwrap();

        scanner.start().unwrap();
        scanner.submit_frame(frame());
        scanner.submit_frame(frame());

        wait_for_phase(&scanner, SessionPhase::Completed).await;
        assert_eq!(scanner.outcome().unwrap().level, ValidationLevel::Accept);
        assert_eq!(gateway.count(), 1);
    }

    #[tokio::test]
    async fn test_all_frames_erroring_ends_as_empty_session() {
        let adapter = ScriptedAdapter::new(vec![
            Err(anyhow!("engine crashed")),
            Err(anyhow!("engine crashed")),
        ]);
        let gateway = RecordingGateway::new(true);
        let (scanner, _events) =
            Scanner::new(test_config(60_000, 2), adapter, gateway.clone()).unwrap();

        scanner.start().unwrap();
        scanner.submit_frame(frame());
        scanner.submit_frame(frame());
        scanner.submit_frame(frame()); // refused, queues finalization

        wait_for_phase(&scanner, SessionPhase::Completed).await;

        let outcome = scanner.outcome().unwrap();
        assert_eq!(outcome.reason, OutcomeReason::NoCandidates);
        assert_eq!(gateway.count(), 0);
    }

    #[tokio::test]
    async fn test_deadline_ends_session_without_frames() {
        let adapter = ScriptedAdapter::new(vec![]);
        let gateway = RecordingGateway::new(true);
        let (scanner, _events) =
            Scanner::new(test_config(50, 10), adapter, gateway.clone()).unwrap();

        scanner.start().unwrap();
        wait_for_phase(&scanner, SessionPhase::Completed).await;

        let outcome = scanner.outcome().unwrap();
        assert_eq!(outcome.reason, OutcomeReason::NoCandidates);
    }

    #[tokio::test]
    async fn test_borderline_confirm_dispatches_once() {
        // Exact format at 0.70: below accept (0.75), above borderline (0.60).
        let adapter = ScriptedAdapter::new(vec![Ok(vec![observation("C02ABCDEFGHJ", 0.70)])]);
        let gateway = RecordingGateway::new(true);
        let (scanner, events) =
            Scanner::new(test_config(60_000, 1), adapter, gateway.clone()).unwrap();

        scanner.start().unwrap();
        scanner.submit_frame(frame());
        scanner.submit_frame(frame()); // budget refusal -> finalize

        wait_for_phase(&scanner, SessionPhase::AwaitingConfirmation).await;
        assert!(events
            .try_iter()
            .any(|e| matches!(e, ScanEvent::ConfirmationRequired { .. })));
        assert_eq!(gateway.count(), 0);

        let response = scanner.confirm().await.unwrap();
        assert!(response.accepted);
        assert_eq!(scanner.phase(), SessionPhase::Completed);
        assert_eq!(gateway.count(), 1);
    }

    #[tokio::test]
    async fn test_borderline_deny_dispatches_nothing() {
        let adapter = ScriptedAdapter::new(vec![Ok(vec![observation("C02ABCDEFGHJ", 0.70)])]);
        let gateway = RecordingGateway::new(true);
        let (scanner, _events) =
            Scanner::new(test_config(60_000, 1), adapter, gateway.clone()).unwrap();

        scanner.start().unwrap();
        scanner.submit_frame(frame());
        scanner.submit_frame(frame());

        wait_for_phase(&scanner, SessionPhase::AwaitingConfirmation).await;
        scanner.deny().unwrap();
        assert_eq!(scanner.phase(), SessionPhase::Completed);
        assert_eq!(gateway.count(), 0);
        // The corrected serial stays available for manual resubmission.
        assert_eq!(scanner.last_serial().as_deref(), Some("C02ABCDEFGHJ"));
    }

    #[tokio::test]
    async fn test_cancel_discards_in_flight_result() {
        let adapter = GatedAdapter::new(vec![observation("C02ABCDEFGHJ", 0.95)]);
        let gateway = RecordingGateway::new(true);
        let (scanner, events) =
            Scanner::new(test_config(60_000, 10), adapter.clone(), gateway.clone()).unwrap();

        scanner.start().unwrap();
        scanner.submit_frame(frame());

        // Wait until the engine call is in flight, then cancel.
        for _ in 0..400 {
            if adapter.called.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(adapter.called.load(Ordering::SeqCst));
        scanner.cancel();
        assert_eq!(scanner.phase(), SessionPhase::Idle);

        // Release the engine; the result is tagged with the old epoch.
        adapter.gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(scanner.phase(), SessionPhase::Idle);
        assert_eq!(gateway.count(), 0);
        let collected: Vec<ScanEvent> = events.try_iter().collect();
        assert!(!collected
            .iter()
            .any(|e| matches!(e, ScanEvent::SessionCompleted { .. })));
    }

    #[tokio::test]
    async fn test_scan_again_allows_fresh_session() {
        let adapter = ScriptedAdapter::new(vec![
            Ok(vec![observation("C02ABCDEFGHJ", 0.95)]),
            Ok(vec![observation("D11XY45WQRTZ", 0.95)]),
        ]);
        let gateway = RecordingGateway::new(true);
        let (scanner, _events) =
            Scanner::new(test_config(60_000, 10), adapter, gateway.clone()).unwrap();

        scanner.start().unwrap();
        scanner.submit_frame(frame());
        wait_for_phase(&scanner, SessionPhase::Completed).await;

        scanner.scan_again().unwrap();
        scanner.start().unwrap();
        scanner.submit_frame(frame());
        wait_for_phase(&scanner, SessionPhase::Completed).await;

        assert_eq!(gateway.count(), 2);
        assert_eq!(scanner.last_serial().as_deref(), Some("D11XY45WQRTZ"));
    }
}
