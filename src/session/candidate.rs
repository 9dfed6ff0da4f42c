//! Frame candidates and the per-session collector

use std::time::Instant;

/// One normalized reading taken from an admitted frame
#[derive(Debug, Clone)]
pub struct FrameCandidate {
    /// Text as reported by the recognition engine
    pub raw_text: String,
    /// Canonical uppercase alphanumeric form
    pub normalized_text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Admission order of the originating frame
    pub sequence_index: u64,
    /// When the originating frame was captured
    pub captured_at: Instant,
}

/// Ordered store of candidates for one scanning session
///
/// Tracks a monotonically non-decreasing best-confidence statistic for
/// external observers (live UI feedback); selection decisions never read it.
#[derive(Debug, Default)]
pub struct CandidateCollector {
    candidates: Vec<FrameCandidate>,
    best_confidence: f32,
}

impl CandidateCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate, preserving arrival order
    pub fn offer(&mut self, candidate: FrameCandidate) {
        if candidate.confidence > self.best_confidence {
            self.best_confidence = candidate.confidence;
        }
        self.candidates.push(candidate);
    }

    /// Highest confidence seen so far (0.0 when empty)
    pub fn best_confidence(&self) -> f32 {
        self.best_confidence
    }

    /// Number of stored candidates
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether nothing has been stored
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// The winning candidate: maximum confidence, ties broken by smallest
    /// sequence index so the first-seen reading wins deterministically
    pub fn best_candidate(&self) -> Option<&FrameCandidate> {
        let mut best: Option<&FrameCandidate> = None;
        for candidate in &self.candidates {
            match best {
                Some(current) if candidate.confidence <= current.confidence => {}
                _ => best = Some(candidate),
            }
        }
        best
    }

    /// Discard all stored candidates; the best-confidence statistic resets
    /// with them
    pub fn clear(&mut self) {
        self.candidates.clear();
        self.best_confidence = 0.0;
    }
}
