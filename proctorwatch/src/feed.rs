// proctorwatch/src/feed.rs
//
// Scripted client surface.
//
// Drives a session from a JSONL feed of client-side events instead of a live
// browser. One event per line:
//
//   {"event":"permissions","screen":false,"camera":true}   answer the next prompts
//   {"event":"start"}                                       press "Start Test"
//   {"event":"visibility","state":"hidden"}                 tab switched away
//   {"event":"share_ended"}                                 user stopped sharing
//   {"event":"answer","text":"..."}                         answer box edited
//   {"event":"wait","ms":1500}                              pause (scaled by --speed)
//   {"event":"submit"}                                      press "Submit Test"
//
// Camera frames come from a directory of .jpg/.jpeg files, served in name
// order and cycled. Without a directory the camera exists but yields no
// frames, so sampling is a no-op.
//
// Modes mirror a log shipper: `tail` follows the file as it grows,
// `replay` plays a finished file once.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use crate::error::MediaError;
use crate::events::{SessionPhase, Visibility};
use crate::media::{Camera, Dimensions, MediaDevices, ScreenShare};
use crate::session::SessionHandle;

// ── Client events ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    Permissions {
        #[serde(default = "granted")]
        screen: bool,
        #[serde(default = "granted")]
        camera: bool,
    },
    Start,
    Visibility { state: Visibility },
    ShareEnded,
    Answer { text: String },
    Wait { ms: u64 },
    Submit,
}

fn granted() -> bool {
    true
}

// ── Screen share ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FeedScreenShare {
    ended: Notify,
    stops: AtomicUsize,
}

impl FeedScreenShare {
    #[cfg(test)]
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScreenShare for FeedScreenShare {
    async fn ended(&self) {
        self.ended.notified().await;
    }

    fn stop(&self) -> Result<(), MediaError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Camera ────────────────────────────────────────────────────────────────────

pub struct FeedCamera {
    frames:   Vec<PathBuf>,
    next:     AtomicUsize,
    reported: Option<Dimensions>,
    stopped:  AtomicBool,
    stops:    AtomicUsize,
}

impl FeedCamera {
    /// A camera with no frames: present, but every capture fails.
    pub fn empty() -> Self {
        Self::with_frames(Vec::new(), None)
    }

    pub async fn from_dir(dir: &Path, reported: Option<Dimensions>) -> Result<Self, MediaError> {
        let unavailable = |e: std::io::Error| MediaError::Unavailable { device: "camera", reason: e.to_string() };
        let mut entries = tokio::fs::read_dir(dir).await.map_err(unavailable)?;
        let mut frames = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
            let path = entry.path();
            let is_jpeg = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
                .unwrap_or(false);
            if is_jpeg { frames.push(path); }
        }
        frames.sort();
        info!("Camera feed {}: {} frames", dir.display(), frames.len());
        Ok(Self::with_frames(frames, reported))
    }

    fn with_frames(frames: Vec<PathBuf>, reported: Option<Dimensions>) -> Self {
        Self {
            frames,
            next: AtomicUsize::new(0),
            reported,
            stopped: AtomicBool::new(false),
            stops: AtomicUsize::new(0),
        }
    }

    #[cfg(test)]
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Camera for FeedCamera {
    fn dimensions(&self) -> Option<Dimensions> {
        self.reported
    }

    // Frames are already JPEG on disk; `dims` is the size the client would
    // scale to and is only logged here.
    async fn capture_jpeg(&self, dims: Dimensions) -> Result<Bytes, MediaError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(MediaError::Capture("camera stopped".into()));
        }
        if self.frames.is_empty() {
            return Err(MediaError::Capture("no frames available".into()));
        }
        let idx  = self.next.fetch_add(1, Ordering::Relaxed) % self.frames.len();
        let path = &self.frames[idx];
        debug!(frame = %path.display(), %dims, "capture");
        let data = tokio::fs::read(path).await.map_err(|e| MediaError::Capture(e.to_string()))?;
        Ok(Bytes::from(data))
    }

    fn stop(&self) -> Result<(), MediaError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ── Devices ───────────────────────────────────────────────────────────────────

pub struct FeedDevices {
    visibility:   broadcast::Sender<Visibility>,
    allow_screen: AtomicBool,
    allow_camera: AtomicBool,
    share:        Mutex<Option<Arc<FeedScreenShare>>>,
    camera:       Arc<FeedCamera>,
}

impl FeedDevices {
    pub fn new(camera: FeedCamera) -> Arc<Self> {
        let (visibility, _) = broadcast::channel(64);
        Arc::new(Self {
            visibility,
            allow_screen: AtomicBool::new(true),
            allow_camera: AtomicBool::new(true),
            share: Mutex::new(None),
            camera: Arc::new(camera),
        })
    }

    pub fn set_permissions(&self, screen: bool, camera: bool) {
        self.allow_screen.store(screen, Ordering::SeqCst);
        self.allow_camera.store(camera, Ordering::SeqCst);
    }

    pub fn set_visibility(&self, state: Visibility) {
        // No subscriber simply means no session is listening yet.
        let _ = self.visibility.send(state);
    }

    /// Ends the current share as if the user pressed "stop sharing".
    pub fn end_share(&self) {
        match self.share.lock().as_ref() {
            Some(share) => share.ended.notify_one(),
            None => debug!("share_ended with no active share"),
        }
    }

    #[cfg(test)]
    pub fn current_share(&self) -> Option<Arc<FeedScreenShare>> {
        self.share.lock().clone()
    }

    #[cfg(test)]
    pub fn camera(&self) -> Arc<FeedCamera> {
        Arc::clone(&self.camera)
    }
}

#[async_trait]
impl MediaDevices for FeedDevices {
    async fn display_media(&self) -> Result<Arc<dyn ScreenShare>, MediaError> {
        if !self.allow_screen.load(Ordering::SeqCst) {
            return Err(MediaError::Denied { device: "screen share" });
        }
        let share = Arc::new(FeedScreenShare::default());
        *self.share.lock() = Some(Arc::clone(&share));
        Ok(share)
    }

    async fn user_media(&self) -> Result<Arc<dyn Camera>, MediaError> {
        if !self.allow_camera.load(Ordering::SeqCst) {
            return Err(MediaError::Denied { device: "camera" });
        }
        Ok(self.camera.clone())
    }

    fn visibility_events(&self) -> broadcast::Receiver<Visibility> {
        self.visibility.subscribe()
    }
}

// ── Drivers ───────────────────────────────────────────────────────────────────

pub async fn apply(event: ClientEvent, devices: &FeedDevices, session: &SessionHandle, speed: f64) {
    match event {
        ClientEvent::Permissions { screen, camera } => devices.set_permissions(screen, camera),
        ClientEvent::Start => {
            if let Err(e) = session.start().await {
                warn!("Start refused: {}", e);
            }
        }
        ClientEvent::Visibility { state } => devices.set_visibility(state),
        ClientEvent::ShareEnded => devices.end_share(),
        ClientEvent::Answer { text } => {
            if let Err(e) = session.set_answer(text).await {
                warn!("Answer ignored: {}", e);
            }
        }
        ClientEvent::Wait { ms } => {
            let scaled = ms as f64 / speed.max(f64::EPSILON);
            tokio::time::sleep(Duration::from_secs_f64(scaled / 1000.0)).await;
        }
        ClientEvent::Submit => match session.submit().await {
            Ok(true) => info!("Test submitted"),
            Ok(false) => debug!("Submit ignored: already submitted"),
            Err(e) => warn!("Submit refused: {}", e),
        },
    }
}

fn parse_line(line: &str) -> Option<ClientEvent> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') { return None; }
    match serde_json::from_str::<ClientEvent>(line) {
        Ok(ev) => Some(ev),
        Err(e) => {
            warn!("Parse error: {}", e);
            None
        }
    }
}

/// Play a finished feed once, in order.
pub async fn replay(path: PathBuf, devices: Arc<FeedDevices>, session: SessionHandle, speed: f64) -> Result<()> {
    let content = tokio::fs::read_to_string(&path).await?;
    info!("Replaying {}", path.display());
    for line in content.lines() {
        if let Some(ev) = parse_line(line) {
            apply(ev, &devices, &session, speed).await;
        }
    }
    Ok(())
}

/// Follow a growing feed until the session is submitted.
pub async fn tail(path: PathBuf, devices: Arc<FeedDevices>, session: SessionHandle, seek_end: bool) -> Result<()> {
    let file = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();

    if seek_end {
        while lines.next_line().await?.is_some() {}
    }

    info!("Tailing {}", path.display());
    while session.snapshot().phase != SessionPhase::Submitted {
        match lines.next_line().await? {
            Some(line) => {
                if let Some(ev) = parse_line(&line) {
                    apply(ev, &devices, &session, 1.0).await;
                }
            }
            None => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
    Ok(())
}
