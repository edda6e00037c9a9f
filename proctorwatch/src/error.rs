// proctorwatch/src/error.rs
//
// Typed errors per concern. The binary edge converts these into anyhow.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Violation type is required")]
    MissingType,

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Capture-device failures. `Denied` is the user refusing a permission prompt.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("{device} permission denied")]
    Denied { device: &'static str },

    #[error("{device} unavailable: {reason}")]
    Unavailable { device: &'static str, reason: String },

    #[error("frame capture failed: {0}")]
    Capture(String),
}

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("detection request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("detection service error: {0}")]
    Service(String),
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("report request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("log server returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session already {0}")]
    InvalidTransition(crate::events::SessionPhase),

    #[error("session not active")]
    NotActive,

    #[error("could not start session: {0}")]
    Capture(#[from] MediaError),

    #[error("session controller stopped")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unsupported store location {0:?}: use a file path or \"memory\"")]
    UnsupportedStore(String),

    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
