//! External collaborator interfaces
//!
//! The scan core consumes two services it does not implement: a text
//! recognition engine that reads serial candidates out of a frame region,
//! and a submission gateway that receives accepted serials. Both are narrow
//! async traits so the core stays decoupled from transport and engine
//! internals.

use std::time::{Instant, SystemTime};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A captured camera frame handed to the scan core
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Timestamp when the frame was captured
    pub captured_at: Instant,
}

impl CapturedFrame {
    /// Create a new captured frame timestamped now
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
        }
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Sub-rectangle of a frame examined by the recognition engine,
/// in normalized [0, 1] frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RegionOfInterest {
    /// The full frame
    pub fn full() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }
}

impl Default for RegionOfInterest {
    fn default() -> Self {
        Self::full()
    }
}

/// A single recognition request for one frame
pub struct RecognitionRequest<'a> {
    /// The frame to read
    pub frame: &'a CapturedFrame,
    /// Region of the frame to examine
    pub roi: RegionOfInterest,
    /// Minimum text height in pixels the engine should resolve
    pub min_text_height: u32,
    /// Characters the engine should restrict itself to
    pub charset_hint: &'a str,
}

/// One piece of text the recognition engine read from a frame
#[derive(Debug, Clone)]
pub struct Observation {
    /// Recognized text, as reported by the engine
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

/// Text recognition engine consumed by the scan core
///
/// A call may fail; per-frame failures are non-fatal and the frame is
/// skipped (it still counts against the session's frame budget).
#[async_trait]
pub trait RecognitionAdapter: Send + Sync {
    /// Read zero or more text observations from the request's region
    async fn recognize(&self, request: RecognitionRequest<'_>) -> Result<Vec<Observation>>;
}

/// Payload handed to the submission gateway for a terminal accept
#[derive(Debug, Clone)]
pub struct SerialSubmission {
    /// Corrected serial number
    pub serial: String,
    /// Confidence after correction penalties
    pub confidence: f32,
    /// Device label type the scan was configured for (e.g. "etched")
    pub device_type: String,
    /// Origin tag for the submission (e.g. "live-scan")
    pub source: String,
    /// Wall-clock time of the submission
    pub submitted_at: SystemTime,
}

/// Gateway response for a submission attempt
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// Whether the gateway accepted the serial
    pub accepted: bool,
    /// Human-readable status message
    pub message: String,
}

/// Destination for accepted serials
///
/// The core calls this at most once per terminal Accept or confirmed
/// Borderline outcome; idempotency and retries are the gateway's concern.
#[async_trait]
pub trait SubmissionGateway: Send + Sync {
    /// Submit an accepted serial
    async fn submit(&self, submission: SerialSubmission) -> Result<GatewayResponse>;
}
