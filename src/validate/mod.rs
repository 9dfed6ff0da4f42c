//! Serial validation and correction
//!
//! Pure decision logic that maps a recognized text and its confidence to a
//! terminal verdict: accept it, hold it for manual confirmation, or reject
//! it. Texts that miss the strict format get a bounded correction pass
//! driven by the confusion table before being tiered by confidence. The
//! whole module is deterministic and side-effect free so it can be tested
//! exhaustively without a session.

pub mod confusion;
pub mod format;
pub mod normalize;

pub use confusion::{ConfusionEntry, ConfusionTable, PositionScope};
pub use format::{CharClass, SerialFormat};

/// Verdict tier for a validated serial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLevel {
    /// Submit without asking
    Accept,
    /// Hold for manual confirmation
    Borderline,
    /// Discard
    Reject,
}

/// Closed set of reasons attached to every outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeReason {
    /// Text matched the strict format as read
    ExactFormat,
    /// Text matched the strict format after substitutions
    Corrected,
    /// Session ended with nothing stored
    NoCandidates,
    /// No corrected variant reached the strict format
    InvalidFormat,
    /// Penalized confidence fell below the borderline threshold
    LowConfidence,
}

/// Terminal verdict produced once per completed session
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    /// Verdict tier
    pub level: ValidationLevel,
    /// Corrected serial. Present for Accept and Borderline, and retained on
    /// a low-confidence reject so the operator can resubmit manually.
    pub serial: Option<String>,
    /// Confidence after correction penalties
    pub adjusted_confidence: f32,
    /// Why this tier was chosen
    pub reason: OutcomeReason,
    /// Number of substitutions applied to reach the strict format
    pub substitutions: usize,
}

impl ValidationOutcome {
    /// Outcome for a session that stored no candidates at all
    pub fn no_candidates() -> Self {
        Self {
            level: ValidationLevel::Reject,
            serial: None,
            adjusted_confidence: 0.0,
            reason: OutcomeReason::NoCandidates,
            substitutions: 0,
        }
    }
}

/// Upper bound on substitutions tried per candidate. Keeps the variant
/// enumeration small; real misreads on serial labels involve one or two
/// ambiguous characters.
const MAX_SUBSTITUTIONS: usize = 4;

/// Validator/corrector for recognized serial candidates
///
/// Holds the strict format, the confusion table, and the tiering
/// thresholds. `evaluate` uses only its arguments and this static state, so
/// repeated calls with identical inputs return identical outcomes.
#[derive(Debug, Clone)]
pub struct Validator {
    format: SerialFormat,
    table: ConfusionTable,
    accept_threshold: f32,
    borderline_threshold: f32,
    correction_penalty: f32,
}

impl Validator {
    /// Create a validator with explicit thresholds
    pub fn new(
        format: SerialFormat,
        table: ConfusionTable,
        accept_threshold: f32,
        borderline_threshold: f32,
        correction_penalty: f32,
    ) -> Self {
        Self {
            format,
            table,
            accept_threshold,
            borderline_threshold,
            correction_penalty,
        }
    }

    /// The strict target format
    pub fn format(&self) -> &SerialFormat {
        &self.format
    }

    /// Map a (text, confidence) pair to a terminal verdict
    pub fn evaluate(&self, text: &str, confidence: f32) -> ValidationOutcome {
        let (corrected, substitutions) = if self.format.matches(text) {
            (text.to_string(), 0)
        } else {
            match self.correct(text) {
                Some(result) => result,
                None => {
                    return ValidationOutcome {
                        level: ValidationLevel::Reject,
                        serial: None,
                        adjusted_confidence: confidence,
                        reason: OutcomeReason::InvalidFormat,
                        substitutions: 0,
                    }
                }
            }
        };

        let adjusted = confidence * self.correction_penalty.powi(substitutions as i32);
        let reason = if substitutions == 0 {
            OutcomeReason::ExactFormat
        } else {
            OutcomeReason::Corrected
        };

        if adjusted >= self.accept_threshold {
            ValidationOutcome {
                level: ValidationLevel::Accept,
                serial: Some(corrected),
                adjusted_confidence: adjusted,
                reason,
                substitutions,
            }
        } else if adjusted >= self.borderline_threshold {
            ValidationOutcome {
                level: ValidationLevel::Borderline,
                serial: Some(corrected),
                adjusted_confidence: adjusted,
                reason,
                substitutions,
            }
        } else {
            ValidationOutcome {
                level: ValidationLevel::Reject,
                serial: Some(corrected),
                adjusted_confidence: adjusted,
                reason: OutcomeReason::LowConfidence,
                substitutions,
            }
        }
    }

    /// Find the corrected variant with the fewest substitutions that matches
    /// the strict format. Variants with the same substitution count are
    /// tried in position order, then confusion-table priority order, so the
    /// result is deterministic.
    fn correct(&self, text: &str) -> Option<(String, usize)> {
        let chars: Vec<char> = text.chars().collect();
        // Substitutions preserve length, so a wrong-length text is beyond help.
        if chars.len() != self.format.len() {
            return None;
        }

        let sites: Vec<(usize, Vec<char>)> = chars
            .iter()
            .enumerate()
            .filter_map(|(pos, &c)| {
                let options = self.table.replacements_at(c, pos);
                if options.is_empty() {
                    None
                } else {
                    Some((pos, options))
                }
            })
            .collect();

        let max = MAX_SUBSTITUTIONS.min(sites.len());
        for count in 1..=max {
            let mut chosen = Vec::with_capacity(count);
            if let Some(variant) = self.search(&chars, &sites, 0, count, &mut chosen) {
                return Some((variant, count));
            }
        }
        None
    }

    /// Try every way of applying exactly `remaining` more substitutions
    /// from `sites[start..]`, returning the first strict-format match.
    fn search(
        &self,
        chars: &[char],
        sites: &[(usize, Vec<char>)],
        start: usize,
        remaining: usize,
        chosen: &mut Vec<(usize, char)>,
    ) -> Option<String> {
        if remaining == 0 {
            let mut variant: Vec<char> = chars.to_vec();
            for &(pos, replacement) in chosen.iter() {
                variant[pos] = replacement;
            }
            let candidate: String = variant.into_iter().collect();
            if self.format.matches(&candidate) {
                return Some(candidate);
            }
            return None;
        }

        let last_start = sites.len().checked_sub(remaining)?;
        for site in start..=last_start {
            let (pos, ref options) = sites[site];
            for &replacement in options {
                chosen.push((pos, replacement));
                if let Some(found) = self.search(chars, sites, site + 1, remaining - 1, chosen) {
                    return Some(found);
                }
                chosen.pop();
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_validator() -> Validator {
        Validator::new(
            SerialFormat::default(),
            ConfusionTable::default(),
            0.75,
            0.60,
            0.9,
        )
    }

    #[test]
    fn test_exact_format_high_confidence_accepts() {
        let v = default_validator();
        let outcome = v.evaluate("C02ABCDEFGHJ", 0.92);
        assert_eq!(outcome.level, ValidationLevel::Accept);
        assert_eq!(outcome.serial.as_deref(), Some("C02ABCDEFGHJ"));
        assert_eq!(outcome.reason, OutcomeReason::ExactFormat);
        assert_eq!(outcome.substitutions, 0);
        assert!((outcome.adjusted_confidence - 0.92).abs() < 1e-6);
    }

    #[test]
    fn test_exact_format_borderline_band() {
        let v = default_validator();
        let outcome = v.evaluate("C02ABCDEFGHJ", 0.70);
        assert_eq!(outcome.level, ValidationLevel::Borderline);
        assert_eq!(outcome.serial.as_deref(), Some("C02ABCDEFGHJ"));
    }

    #[test]
    fn test_low_confidence_rejects_regardless_of_format() {
        let v = default_validator();
        let outcome = v.evaluate("C02ABCDEFGHJ", 0.40);
        assert_eq!(outcome.level, ValidationLevel::Reject);
        assert_eq!(outcome.reason, OutcomeReason::LowConfidence);
        // Corrected text is kept for manual resubmission.
        assert_eq!(outcome.serial.as_deref(), Some("C02ABCDEFGHJ"));
    }

    #[test]
    fn test_invalid_format_rejects_without_serial() {
        let v = default_validator();
        let outcome = v.evaluate("C02ABCDE", 0.95);
        assert_eq!(outcome.level, ValidationLevel::Reject);
        assert_eq!(outcome.reason, OutcomeReason::InvalidFormat);
        assert_eq!(outcome.serial, None);
    }

    #[test]
    fn test_single_substitution_corrects_leading_digit() {
        let v = default_validator();
        // '0' in the first position is a misread 'O'.
        let outcome = v.evaluate("002ABCDEFGHJ", 0.90);
        assert_eq!(outcome.level, ValidationLevel::Accept);
        assert_eq!(outcome.serial.as_deref(), Some("O02ABCDEFGHJ"));
        assert_eq!(outcome.reason, OutcomeReason::Corrected);
        assert_eq!(outcome.substitutions, 1);
        assert!((outcome.adjusted_confidence - 0.81).abs() < 1e-6);
    }

    #[test]
    fn test_fewest_substitutions_wins() {
        // Both '0' and 'O' have substitutions available, but only the
        // leading '0' violates the format; one substitution must win.
        let format = SerialFormat::parse("A?A").unwrap();
        let v = Validator::new(format, ConfusionTable::default(), 0.75, 0.60, 0.9);
        let outcome = v.evaluate("0XO", 0.90);
        assert_eq!(outcome.substitutions, 1);
        assert_eq!(outcome.serial.as_deref(), Some("OXO"));
    }

    #[test]
    fn test_scenario_two_substitutions_lands_borderline() {
        // Positions 5 and 11 expect letters; the raw text has an ambiguous
        // '0' and '1' there. 0.80 * 0.9 * 0.9 = 0.648 -> Borderline.
        let format = SerialFormat::parse("A????A?????A").unwrap();
        let v = Validator::new(format, ConfusionTable::default(), 0.75, 0.60, 0.9);
        let outcome = v.evaluate("C02AB0DEFGH1", 0.80);
        assert_eq!(outcome.level, ValidationLevel::Borderline);
        assert_eq!(outcome.serial.as_deref(), Some("C02ABODEFGHI"));
        assert_eq!(outcome.substitutions, 2);
        assert!((outcome.adjusted_confidence - 0.648).abs() < 1e-6);
    }

    #[test]
    fn test_penalty_monotonic_in_substitution_count() {
        let format = SerialFormat::parse("A????A?????A").unwrap();
        let v = Validator::new(format, ConfusionTable::default(), 0.75, 0.60, 0.9);
        let one = default_validator().evaluate("002ABCDEFGHJ", 0.80);
        let two = v.evaluate("C02AB0DEFGH1", 0.80);
        assert!(one.adjusted_confidence < 0.80);
        assert!(two.adjusted_confidence < one.adjusted_confidence);
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let v = default_validator();
        let first = v.evaluate("C02AB0DEFGH1", 0.80);
        for _ in 0..10 {
            assert_eq!(v.evaluate("C02AB0DEFGH1", 0.80), first);
        }
    }

    #[test]
    fn test_uncorrectable_character_rejects() {
        // '*' never appears in the confusion table and violates the format.
        let v = default_validator();
        let outcome = v.evaluate("C02ABCDEFGH*", 0.95);
        assert_eq!(outcome.reason, OutcomeReason::InvalidFormat);
    }

    #[test]
    fn test_empty_text_rejects() {
        let v = default_validator();
        let outcome = v.evaluate("", 0.95);
        assert_eq!(outcome.level, ValidationLevel::Reject);
        assert_eq!(outcome.reason, OutcomeReason::InvalidFormat);
    }

    #[test]
    fn test_no_candidates_outcome() {
        let outcome = ValidationOutcome::no_candidates();
        assert_eq!(outcome.level, ValidationLevel::Reject);
        assert_eq!(outcome.reason, OutcomeReason::NoCandidates);
        assert_eq!(outcome.serial, None);
    }
}
