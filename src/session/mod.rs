//! Scan session state machine
//!
//! A session owns the lifecycle of one capture attempt: it gates incoming
//! frames against the time window and frame budget, collects normalized
//! candidates, applies the early-stop policy, and walks the
//! Idle -> Scanning -> Evaluating -> (AwaitingConfirmation) -> Completed
//! state graph. Every transition back to Idle bumps the epoch counter so
//! recognition results still in flight for the old session are recognized
//! as stale and discarded.
//!
//! The session is a plain synchronous object; time is passed in so every
//! transition is unit-testable. Concurrency lives in the scanner, which
//! wraps the session in a single exclusive lock.

pub mod candidate;

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::validate::{SerialFormat, ValidationLevel, ValidationOutcome};
use candidate::{CandidateCollector, FrameCandidate};

/// Discriminant of the session state, for observers and guards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Scanning,
    Evaluating,
    AwaitingConfirmation,
    Completed,
}

/// Tagged session state
#[derive(Debug)]
enum SessionState {
    Idle,
    Scanning {
        started_at: Instant,
        frames_processed: u32,
    },
    Evaluating {
        /// Candidate chosen by the early-stop policy, if any
        preselected: Option<FrameCandidate>,
    },
    AwaitingConfirmation {
        outcome: ValidationOutcome,
    },
    Completed {
        outcome: ValidationOutcome,
    },
}

/// Why a frame was refused admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    /// Session is not in Scanning
    NotScanning,
    /// Capture window elapsed; session moved to Evaluating
    WindowExpired,
    /// Frame budget spent; session moved to Evaluating
    BudgetExhausted,
}

/// Frame gate decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Frame admitted; carries the session epoch and the frame's sequence
    /// index
    Admitted { epoch: u64, sequence: u64 },
    /// Frame refused
    Refused(RefusalReason),
}

/// Result of offering a candidate to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferResult {
    /// Stored; scanning continues
    Collected,
    /// Stored and preselected; session moved to Evaluating
    EarlyStop,
    /// Epoch mismatch; candidate discarded
    Stale,
    /// Session left Scanning since the frame was admitted
    NotScanning,
}

/// Misuse of the session API; always recoverable
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not idle (phase: {0:?})")]
    NotIdle(SessionPhase),
    #[error("no confirmation is pending (phase: {0:?})")]
    NothingPending(SessionPhase),
    #[error("session is not completed (phase: {0:?})")]
    NotCompleted(SessionPhase),
    #[error("session is not evaluating (phase: {0:?})")]
    NotEvaluating(SessionPhase),
}

/// Per-session capture limits
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Maximum time spent in Scanning
    pub window: Duration,
    /// Maximum number of admitted frames
    pub frame_budget: u32,
}

/// Capture-session state machine
#[derive(Debug)]
pub struct ScanSession {
    epoch: u64,
    state: SessionState,
    collector: CandidateCollector,
    next_sequence: u64,
    limits: SessionLimits,
    high_confidence_threshold: f32,
    format: SerialFormat,
    /// Last corrected serial from any outcome that produced one; survives
    /// session resets so the operator can resubmit manually after a reject
    last_serial: Option<String>,
}

impl ScanSession {
    /// Create a session in Idle
    pub fn new(limits: SessionLimits, high_confidence_threshold: f32, format: SerialFormat) -> Self {
        Self {
            epoch: 0,
            state: SessionState::Idle,
            collector: CandidateCollector::new(),
            next_sequence: 0,
            limits,
            high_confidence_threshold,
            format,
            last_serial: None,
        }
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        match self.state {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Scanning { .. } => SessionPhase::Scanning,
            SessionState::Evaluating { .. } => SessionPhase::Evaluating,
            SessionState::AwaitingConfirmation { .. } => SessionPhase::AwaitingConfirmation,
            SessionState::Completed { .. } => SessionPhase::Completed,
        }
    }

    /// Current epoch; results tagged with an older value are stale
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Read-only snapshot of the best confidence seen this session
    pub fn best_confidence(&self) -> f32 {
        self.collector.best_confidence()
    }

    /// Number of stored candidates
    pub fn candidate_count(&self) -> usize {
        self.collector.len()
    }

    /// Frames admitted so far (0 outside Scanning)
    pub fn frames_processed(&self) -> u32 {
        match self.state {
            SessionState::Scanning {
                frames_processed, ..
            } => frames_processed,
            _ => 0,
        }
    }

    /// Last corrected serial produced by any completed session
    pub fn last_serial(&self) -> Option<&str> {
        self.last_serial.as_deref()
    }

    /// Terminal outcome, once the session reached it
    pub fn outcome(&self) -> Option<&ValidationOutcome> {
        match &self.state {
            SessionState::AwaitingConfirmation { outcome } => Some(outcome),
            SessionState::Completed { outcome } => Some(outcome),
            _ => None,
        }
    }

    /// Idle -> Scanning. Resets counters and candidates, bumps the epoch,
    /// records the start instant. Returns the new epoch.
    pub fn start(&mut self, now: Instant) -> Result<u64, SessionError> {
        match self.state {
            SessionState::Idle => {
                self.epoch += 1;
                self.next_sequence = 0;
                self.collector.clear();
                self.state = SessionState::Scanning {
                    started_at: now,
                    frames_processed: 0,
                };
                debug!(epoch = self.epoch, "session started");
                Ok(self.epoch)
            }
            _ => Err(SessionError::NotIdle(self.phase())),
        }
    }

    /// Frame gate: admit or refuse a frame arriving at `now`.
    ///
    /// Window or budget exhaustion refuses the frame and moves the session
    /// to Evaluating; that is the natural end of capture, not an error.
    pub fn admit(&mut self, now: Instant) -> Admission {
        let (started_at, frames_processed) = match &mut self.state {
            SessionState::Scanning {
                started_at,
                frames_processed,
            } => (*started_at, frames_processed),
            _ => return Admission::Refused(RefusalReason::NotScanning),
        };

        if now.duration_since(started_at) >= self.limits.window {
            debug!(epoch = self.epoch, "capture window elapsed");
            self.state = SessionState::Evaluating { preselected: None };
            return Admission::Refused(RefusalReason::WindowExpired);
        }
        if *frames_processed >= self.limits.frame_budget {
            debug!(epoch = self.epoch, "frame budget exhausted");
            self.state = SessionState::Evaluating { preselected: None };
            return Admission::Refused(RefusalReason::BudgetExhausted);
        }

        *frames_processed += 1;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Admission::Admitted {
            epoch: self.epoch,
            sequence,
        }
    }

    /// Store a candidate and apply the early-stop policy.
    ///
    /// A candidate whose confidence reaches the high-confidence threshold
    /// and whose text already matches the strict format ends capture
    /// immediately with itself preselected.
    ///
    /// Frames admitted before a natural end may deliver their results after
    /// the session moved to Evaluating; those candidates were inside the
    /// budget, so they are still collected. The early-stop policy only
    /// applies while Scanning.
    pub fn offer(&mut self, epoch: u64, candidate: FrameCandidate) -> OfferResult {
        if epoch != self.epoch {
            return OfferResult::Stale;
        }
        let scanning = matches!(self.state, SessionState::Scanning { .. });
        let evaluating_open = matches!(
            self.state,
            SessionState::Evaluating { preselected: None }
        );
        if !scanning && !evaluating_open {
            return OfferResult::NotScanning;
        }

        let early_stop = scanning
            && candidate.confidence >= self.high_confidence_threshold
            && self.format.matches(&candidate.normalized_text);
        let preselected = early_stop.then(|| candidate.clone());
        self.collector.offer(candidate);

        if early_stop {
            debug!(epoch = self.epoch, "early stop on high-confidence exact match");
            self.state = SessionState::Evaluating { preselected };
            OfferResult::EarlyStop
        } else {
            OfferResult::Collected
        }
    }

    /// Move Scanning -> Evaluating if the window has elapsed by `now`.
    /// Returns true when the transition happened. Used by the scanner's
    /// deadline timer so a session with a silent frame producer still ends.
    pub fn expire(&mut self, epoch: u64, now: Instant) -> bool {
        if epoch != self.epoch {
            return false;
        }
        match self.state {
            SessionState::Scanning { started_at, .. }
                if now.duration_since(started_at) >= self.limits.window =>
            {
                debug!(epoch = self.epoch, "capture window elapsed (deadline)");
                self.state = SessionState::Evaluating { preselected: None };
                true
            }
            _ => false,
        }
    }

    /// Pick the terminal candidate while Evaluating: the early-stop
    /// preselection if there was one, otherwise the collector's best.
    /// Returns None for an empty session (or outside Evaluating).
    pub fn select_terminal(&mut self) -> Option<FrameCandidate> {
        match &mut self.state {
            SessionState::Evaluating { preselected } => preselected
                .take()
                .or_else(|| self.collector.best_candidate().cloned()),
            _ => None,
        }
    }

    /// Record the terminal outcome: Evaluating -> AwaitingConfirmation for
    /// Borderline, Evaluating -> Completed otherwise. Candidates are
    /// discarded here; only the outcome survives.
    pub fn resolve(&mut self, outcome: ValidationOutcome) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Evaluating { .. }) {
            return Err(SessionError::NotEvaluating(self.phase()));
        }
        if let Some(serial) = &outcome.serial {
            self.last_serial = Some(serial.clone());
        }
        self.collector.clear();
        debug!(
            epoch = self.epoch,
            level = ?outcome.level,
            reason = ?outcome.reason,
            "session resolved"
        );
        self.state = match outcome.level {
            ValidationLevel::Borderline => SessionState::AwaitingConfirmation { outcome },
            _ => SessionState::Completed { outcome },
        };
        Ok(())
    }

    /// External confirmation of a borderline outcome. Returns the outcome
    /// for dispatch.
    pub fn confirm(&mut self) -> Result<ValidationOutcome, SessionError> {
        match &self.state {
            SessionState::AwaitingConfirmation { outcome } => {
                let outcome = outcome.clone();
                self.state = SessionState::Completed {
                    outcome: outcome.clone(),
                };
                debug!(epoch = self.epoch, "borderline outcome confirmed");
                Ok(outcome)
            }
            _ => Err(SessionError::NothingPending(self.phase())),
        }
    }

    /// External denial of a borderline outcome; nothing is dispatched.
    pub fn deny(&mut self) -> Result<(), SessionError> {
        match &self.state {
            SessionState::AwaitingConfirmation { outcome } => {
                let outcome = outcome.clone();
                self.state = SessionState::Completed { outcome };
                debug!(epoch = self.epoch, "borderline outcome denied");
                Ok(())
            }
            _ => Err(SessionError::NothingPending(self.phase())),
        }
    }

    /// Explicit cancel from any state: back to Idle, candidates discarded,
    /// epoch bumped so in-flight recognition results become stale.
    pub fn cancel(&mut self) {
        self.epoch += 1;
        self.collector.clear();
        self.state = SessionState::Idle;
        debug!(epoch = self.epoch, "session cancelled");
    }

    /// Completed -> Idle, ready for the next start trigger
    pub fn scan_again(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Completed { .. } => {
                self.collector.clear();
                self.state = SessionState::Idle;
                Ok(())
            }
            _ => Err(SessionError::NotCompleted(self.phase())),
        }
    }
}
