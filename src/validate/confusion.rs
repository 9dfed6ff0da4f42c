//! Character confusion table
//!
//! Static, ordered list of character substitutions the recognition engine
//! commonly gets wrong on serial labels (0/O, 1/I, 5/S, 8/B). Entry order is
//! the priority order used when the corrector breaks ties between variants
//! with the same substitution count. Entries can be scoped to positions:
//! the first serial position is always a letter on the labels we target, so
//! digit-to-letter swaps apply everywhere while the reverse swaps are kept
//! away from the leading positions where a digit is never expected.

use serde::{Deserialize, Serialize};

/// Positions an entry applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionScope {
    /// Every position
    Anywhere,
    /// Exactly one position (0-based)
    At(usize),
    /// This position and everything after it (0-based)
    From(usize),
}

impl PositionScope {
    /// Whether the scope covers `position`
    pub fn covers(self, position: usize) -> bool {
        match self {
            PositionScope::Anywhere => true,
            PositionScope::At(p) => position == p,
            PositionScope::From(p) => position >= p,
        }
    }
}

/// One substitutable character pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionEntry {
    /// Character as read by the engine
    pub from: char,
    /// Character to substitute
    pub to: char,
    /// Positions the substitution applies to
    #[serde(default = "default_scope")]
    pub scope: PositionScope,
}

fn default_scope() -> PositionScope {
    PositionScope::Anywhere
}

/// Ordered set of substitutable character pairs
///
/// Loaded once per session from configuration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfusionTable {
    entries: Vec<ConfusionEntry>,
}

impl ConfusionTable {
    /// Build a table from explicit entries, keeping their order as priority
    pub fn new(entries: Vec<ConfusionEntry>) -> Self {
        Self { entries }
    }

    /// All entries in priority order
    pub fn entries(&self) -> &[ConfusionEntry] {
        &self.entries
    }

    /// Replacement candidates for `c` at `position`, in priority order
    pub fn replacements_at(&self, c: char, position: usize) -> Vec<char> {
        self.entries
            .iter()
            .filter(|e| e.from == c && e.scope.covers(position))
            .map(|e| e.to)
            .collect()
    }

    /// Whether `c` has any applicable substitution at `position`
    pub fn is_ambiguous_at(&self, c: char, position: usize) -> bool {
        self.entries
            .iter()
            .any(|e| e.from == c && e.scope.covers(position))
    }
}

impl Default for ConfusionTable {
    /// Digit/letter pairs seen on engraved and printed serial labels.
    /// Digit-to-letter swaps take priority; letter-to-digit swaps are
    /// excluded from the leading letter positions.
    fn default() -> Self {
        Self::new(vec![
            ConfusionEntry {
                from: '0',
                to: 'O',
                scope: PositionScope::Anywhere,
            },
            ConfusionEntry {
                from: '1',
                to: 'I',
                scope: PositionScope::Anywhere,
            },
            ConfusionEntry {
                from: '5',
                to: 'S',
                scope: PositionScope::Anywhere,
            },
            ConfusionEntry {
                from: '8',
                to: 'B',
                scope: PositionScope::Anywhere,
            },
            ConfusionEntry {
                from: 'O',
                to: '0',
                scope: PositionScope::From(1),
            },
            ConfusionEntry {
                from: 'I',
                to: '1',
                scope: PositionScope::From(1),
            },
            ConfusionEntry {
                from: 'S',
                to: '5',
                scope: PositionScope::From(1),
            },
            ConfusionEntry {
                from: 'B',
                to: '8',
                scope: PositionScope::From(1),
            },
        ])
    }
}
