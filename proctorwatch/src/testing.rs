// Test doubles shared across module tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::detectors::face_client::FaceDetection;
use crate::error::DetectError;
use crate::events::ViolationRecord;
use crate::reporter::{ReportOutcome, ViolationReporter};

/// Temp directory holding `n` tiny JPEG files.
pub fn frames_dir(n: usize) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..n {
        std::fs::write(dir.path().join(format!("frame_{i:03}.jpg")), b"\xff\xd8\xff\xe0fake\xff\xd9").unwrap();
    }
    dir
}

/// Replies from a script in call order, then `then` forever.
pub struct ScriptedDetection {
    replies: Mutex<VecDeque<Result<Option<String>, String>>>,
    then:    Option<String>,
    calls:   AtomicUsize,
}

impl ScriptedDetection {
    pub fn new(replies: Vec<Result<Option<String>, String>>) -> Self {
        Self { replies: Mutex::new(replies.into()), then: None, calls: AtomicUsize::new(0) }
    }

    /// Flags every frame with `label`.
    pub fn always(label: &str) -> Self {
        Self { then: Some(label.to_string()), ..Self::new(Vec::new()) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FaceDetection for ScriptedDetection {
    async fn detect(&self, _jpeg: Bytes) -> Result<Option<String>, DetectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().pop_front();
        match next {
            Some(Ok(v))  => Ok(v),
            Some(Err(e)) => Err(DetectError::Service(e)),
            None         => Ok(self.then.clone()),
        }
    }
}

/// Records every `report` call on a channel.
pub struct RecordingReporter {
    tx: mpsc::UnboundedSender<String>,
}

impl RecordingReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ViolationReporter for RecordingReporter {
    async fn report(&self, kind: &str) -> ReportOutcome {
        let _ = self.tx.send(kind.to_string());
        ReportOutcome::Logged(ViolationRecord::new(kind))
    }
}

/// Next reported type, or None if nothing arrives within `wait`.
pub async fn next_report(rx: &mut mpsc::UnboundedReceiver<String>, wait: Duration) -> Option<String> {
    tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
}
