//! Scan configuration
//!
//! Static per-session settings stored in TOML format. Every threshold the
//! session and validator consume lives here so deployments can tune them
//! without a rebuild.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapter::RegionOfInterest;
use crate::session::SessionLimits;
use crate::validate::{ConfusionTable, SerialFormat, Validator};

/// Scanner settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanConfig {
    /// Session window and budget
    pub session: SessionSettings,
    /// Recognition engine hints
    pub recognition: RecognitionSettings,
    /// Validation thresholds and correction data
    pub validation: ValidationSettings,
    /// Submission tagging
    pub submission: SubmissionSettings,
}

/// Capture-session limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Maximum scanning time per session in milliseconds
    pub window_ms: u64,
    /// Maximum frames admitted per session
    pub frame_budget: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            window_ms: 6000,
            frame_budget: 30,
        }
    }
}

/// Hints forwarded to the recognition engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionSettings {
    /// Minimum text height in pixels the engine should resolve
    pub min_text_height: u32,
    /// Characters the engine should restrict itself to
    pub charset: String,
    /// Device label type being scanned (etched, sticker, screen, default)
    pub device_type: String,
    /// Region-of-interest override in normalized frame coordinates
    pub roi: Option<RegionOfInterest>,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            min_text_height: 24,
            charset: "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789".to_string(),
            device_type: "default".to_string(),
            roi: None,
        }
    }
}

/// Validation thresholds and correction data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSettings {
    /// Confidence at which an exact-format reading ends the session early
    pub high_confidence_threshold: f32,
    /// Penalized confidence required to accept without confirmation
    pub accept_threshold: f32,
    /// Penalized confidence required to hold for confirmation
    pub borderline_threshold: f32,
    /// Confidence multiplier applied per substitution (< 1)
    pub correction_penalty: f32,
    /// Loose pre-filter: minimum normalized length stored
    pub min_len: usize,
    /// Loose pre-filter: maximum normalized length stored
    pub max_len: usize,
    /// Strict format template: `A` letter, `9` digit, `?` any alphanumeric
    pub format: String,
    /// Substitutable character pairs, in priority order
    pub confusion: ConfusionTable,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            high_confidence_threshold: 0.85,
            accept_threshold: 0.75,
            borderline_threshold: 0.60,
            correction_penalty: 0.9,
            min_len: 10,
            max_len: 14,
            format: "A???????????".to_string(),
            confusion: ConfusionTable::default(),
        }
    }
}

/// Submission payload tagging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionSettings {
    /// Origin tag attached to every submission
    pub source_tag: String,
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self {
            source_tag: "live-scan".to_string(),
        }
    }
}

impl ScanConfig {
    /// Session limits derived from the settings
    pub fn limits(&self) -> SessionLimits {
        SessionLimits {
            window: Duration::from_millis(self.session.window_ms),
            frame_budget: self.session.frame_budget,
        }
    }

    /// Region of interest, falling back to the full frame
    pub fn roi(&self) -> RegionOfInterest {
        self.recognition.roi.unwrap_or_default()
    }

    /// Parse the strict format template
    pub fn serial_format(&self) -> Result<SerialFormat> {
        SerialFormat::parse(&self.validation.format)
            .with_context(|| format!("invalid format template '{}'", self.validation.format))
    }

    /// Build the validator from the validation settings
    pub fn build_validator(&self) -> Result<Validator> {
        Ok(Validator::new(
            self.serial_format()?,
            self.validation.confusion.clone(),
            self.validation.accept_threshold,
            self.validation.borderline_threshold,
            self.validation.correction_penalty,
        ))
    }
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "serialscan", "SerialScan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<ScanConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: ScanConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &ScanConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
