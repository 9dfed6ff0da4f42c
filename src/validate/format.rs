//! Strict serial format definition
//!
//! The target format is a fixed-length template of per-position character
//! classes. Serials on Apple-style labels are 12 uppercase alphanumerics
//! with a letter in the first position, so the default template is
//! `A???????????`.

use anyhow::{bail, Result};

/// Character class expected at one serial position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharClass {
    /// Uppercase ASCII letter
    Letter,
    /// ASCII digit
    Digit,
    /// Uppercase ASCII letter or digit
    Any,
}

impl CharClass {
    /// Whether a character belongs to this class
    pub fn matches(self, c: char) -> bool {
        match self {
            CharClass::Letter => c.is_ascii_uppercase(),
            CharClass::Digit => c.is_ascii_digit(),
            CharClass::Any => c.is_ascii_uppercase() || c.is_ascii_digit(),
        }
    }
}

/// Strict target format for a serial number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialFormat {
    classes: Vec<CharClass>,
}

impl SerialFormat {
    /// Parse a template string: `A` = letter, `9` = digit, `?` = any
    /// alphanumeric. One template character per serial position.
    pub fn parse(template: &str) -> Result<Self> {
        if template.is_empty() {
            bail!("serial format template is empty");
        }
        let mut classes = Vec::with_capacity(template.len());
        for c in template.chars() {
            classes.push(match c {
                'A' => CharClass::Letter,
                '9' => CharClass::Digit,
                '?' => CharClass::Any,
                other => bail!("invalid format template character: '{}'", other),
            });
        }
        Ok(Self { classes })
    }

    /// Target serial length
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Expected class at a position
    pub fn class_at(&self, position: usize) -> Option<CharClass> {
        self.classes.get(position).copied()
    }

    /// Whether `text` matches the strict format exactly
    pub fn matches(&self, text: &str) -> bool {
        if text.chars().count() != self.classes.len() {
            return false;
        }
        text.chars()
            .zip(self.classes.iter())
            .all(|(c, class)| class.matches(c))
    }
}

impl Default for SerialFormat {
    /// 12 alphanumerics, letter first
    fn default() -> Self {
        Self::parse("A???????????").expect("default template is valid")
    }
}
