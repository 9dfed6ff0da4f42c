//! Candidate normalization and pre-filtering
//!
//! Raw engine output arrives with mixed case, stray punctuation, and
//! whitespace. Normalization reduces it to the canonical uppercase
//! alphanumeric form the rest of the pipeline works with. The pre-filter is
//! a loose length window, deliberately wider than the strict target length
//! so that correction still gets a chance at near-misses; exact-format
//! checking belongs to the validator.

/// Canonicalize raw recognized text: trim, uppercase, strip everything
/// that is not ASCII alphanumeric
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Loose length pre-filter applied before a candidate is stored
pub fn passes_prefilter(normalized: &str, min_len: usize, max_len: usize) -> bool {
    let len = normalized.chars().count();
    len >= min_len && len <= max_len
}
