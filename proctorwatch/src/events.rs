// proctorwatch/src/events.rs
//
// Shared domain types flowing through proctorwatch.
//
// Detectors produce ViolationSignal, the session controller consumes each
// signal once, and the log store persists accepted ones as ViolationRecord.
// The `type` strings below are the wire labels stored in the log and must
// stay stable: analysts query the audit trail by them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed question shown for every attempt.
pub const QUESTION: &str = "Explain the significance of AI in modern computing.";

// ── Session phase ─────────────────────────────────────────────────────────────

/// Lifecycle phase of one proctored attempt. One-way: NotStarted → Active → Submitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    NotStarted,
    Active,
    Submitted,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NOT_STARTED"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Submitted => write!(f, "SUBMITTED"),
        }
    }
}

// ── Detection types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    Visibility,  // document hidden → tab switch
    ScreenShare, // share track ended / share refused
    FrameSampler, // external face-detection verdicts
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Visibility => write!(f, "visibility"),
            Self::ScreenShare => write!(f, "screen_share"),
            Self::FrameSampler => write!(f, "frame_sampler"),
        }
    }
}

/// What a detector saw. `Detector` carries the label returned by the
/// external face-detection service verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    TabSwitch,
    ScreenShareStopped,
    ScreenShareDenied,
    Detector(String),
}

impl ViolationKind {
    /// Wire label persisted as the record's `type`.
    pub fn label(&self) -> &str {
        match self {
            Self::TabSwitch => "Tab Switch Detected",
            Self::ScreenShareStopped => "Screen Sharing Stopped",
            Self::ScreenShareDenied => "Screen Sharing Denied",
            Self::Detector(label) => label,
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationSignal {
    pub source: DetectorKind,
    pub kind: ViolationKind,
    pub detected_at: DateTime<Utc>,
}

impl ViolationSignal {
    pub fn now(source: DetectorKind, kind: ViolationKind) -> Self {
        Self { source, kind, detected_at: Utc::now() }
    }
}

// ── Persisted record ──────────────────────────────────────────────────────────

/// One row of the audit trail. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViolationRecord {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
}

impl ViolationRecord {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), kind: kind.into(), timestamp: Utc::now() }
    }
}

// ── Client-side observations ──────────────────────────────────────────────────

/// Document visibility as reported by the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Visible,
    Hidden,
}
