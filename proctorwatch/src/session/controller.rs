// proctorwatch/src/session/controller.rs
//
// Session state machine.
//
//   NotStarted ──start()──▶ Active ──submit() / expiry──▶ Submitted
//
// The Active variant owns every acquired resource (share, camera, detector
// tasks, countdown). Leaving Active moves that value out and releases it, so
// no other phase can hold a live capture. Signals count only while Active;
// anything else is dropped with a debug line.
//
// Persistence is fire-and-forget: each accepted signal spawns one report
// task. The state machine never waits on it; the outcome is only logged.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::timer::{format_remaining, spawn_countdown};
use super::{Collaborators, ExpiryPolicy, SessionSettings, SessionSnapshot, ViolationAlert};
use crate::detectors::frame_sampler::FrameSampler;
use crate::detectors::screen_share::{self, ScreenShareDetector};
use crate::detectors::visibility::VisibilityDetector;
use crate::detectors::{self, SignalSink};
use crate::error::SessionError;
use crate::events::{SessionPhase, ViolationSignal};
use crate::media::{Camera, ScreenShare};
use crate::reporter::ReportOutcome;

// ── State ─────────────────────────────────────────────────────────────────────

enum SessionState {
    NotStarted,
    Active(ActiveSession),
    Submitted { started_at: DateTime<Utc>, submitted_at: DateTime<Utc>, remaining_secs: u64 },
}

impl SessionState {
    fn phase(&self) -> SessionPhase {
        match self {
            Self::NotStarted => SessionPhase::NotStarted,
            Self::Active(_) => SessionPhase::Active,
            Self::Submitted { .. } => SessionPhase::Submitted,
        }
    }
}

struct ActiveSession {
    started_at:     DateTime<Utc>,
    remaining_secs: u64,
    screen:         Arc<dyn ScreenShare>,
    camera:         Arc<dyn Camera>,
    visibility:     JoinHandle<()>,
    share_ended:    JoinHandle<()>,
    sampler:        JoinHandle<()>,
    timer:          Option<JoinHandle<()>>,
}

impl ActiveSession {
    /// Independent best-effort teardown: listeners first so stopping our own
    /// tracks cannot be reported as a violation, then the hardware tracks.
    /// Returns the number of releases that failed.
    fn release(self) -> usize {
        self.visibility.abort();
        self.share_ended.abort();
        self.sampler.abort();
        if let Some(timer) = self.timer {
            timer.abort();
        }

        let mut failed = 0;
        if let Err(e) = self.screen.stop() {
            warn!("screen share release failed: {}", e);
            failed += 1;
        }
        if let Err(e) = self.camera.stop() {
            warn!("camera release failed: {}", e);
            failed += 1;
        }
        failed
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

pub struct SessionController {
    state:     SessionState,
    answer:    String,
    warning:   Option<String>,
    accepted:  u64,
    dropped:   u64,
    settings:  SessionSettings,
    collab:    Collaborators,
    signals:   SignalSink,
    ticks:     mpsc::Sender<()>,
    snapshots: watch::Sender<SessionSnapshot>,
    alerts:    broadcast::Sender<ViolationAlert>,
}

impl SessionController {
    pub(super) fn new(
        settings:  SessionSettings,
        collab:    Collaborators,
        signals:   SignalSink,
        ticks:     mpsc::Sender<()>,
    ) -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::default());
        let (alerts, _)    = broadcast::channel(64);
        let ctl = Self {
            state: SessionState::NotStarted,
            answer: String::new(),
            warning: None,
            accepted: 0,
            dropped: 0,
            settings,
            collab,
            signals,
            ticks,
            snapshots,
            alerts,
        };
        ctl.publish();
        ctl
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (started_at, submitted_at, remaining_secs) = match &self.state {
            SessionState::NotStarted => (None, None, self.settings.duration_secs),
            SessionState::Active(a) => (Some(a.started_at), None, a.remaining_secs),
            SessionState::Submitted { started_at, submitted_at, remaining_secs } => {
                (Some(*started_at), Some(*submitted_at), *remaining_secs)
            }
        };
        SessionSnapshot {
            phase: self.phase(),
            started_at,
            submitted_at,
            remaining_secs,
            answer: self.answer.clone(),
            warning: self.warning.clone(),
            accepted_signals: self.accepted,
            dropped_signals: self.dropped,
        }
    }

    pub(super) fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }

    pub(super) fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    pub(super) fn alert_sender(&self) -> broadcast::Sender<ViolationAlert> {
        self.alerts.clone()
    }

    /// Acquire captures and start every detector. A refused capture leaves the
    /// session NotStarted.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::NotStarted) {
            return Err(SessionError::InvalidTransition(self.phase()));
        }
        let devices = Arc::clone(&self.collab.devices);

        let screen = screen_share::acquire(&*devices, &self.signals).await?;
        let camera = match devices.user_media().await {
            Ok(c) => c,
            Err(e) => {
                warn!("Error accessing webcam: {}", e);
                if let Err(stop_err) = screen.stop() {
                    warn!("screen share release failed: {}", stop_err);
                }
                return Err(e.into());
            }
        };

        let visibility = detectors::spawn(
            Box::new(VisibilityDetector::new(devices.visibility_events())),
            self.signals.clone(),
        );
        let share_ended = detectors::spawn(
            Box::new(ScreenShareDetector::new(Arc::clone(&screen))),
            self.signals.clone(),
        );
        let sampler = detectors::spawn(
            Box::new(FrameSampler::new(
                Arc::clone(&camera),
                Arc::clone(&self.collab.detection),
                self.settings.sample_every,
            )),
            self.signals.clone(),
        );
        let timer = spawn_countdown(self.settings.tick_every, self.ticks.clone());

        let started_at = Utc::now();
        self.state = SessionState::Active(ActiveSession {
            started_at,
            remaining_secs: self.settings.duration_secs,
            screen,
            camera,
            visibility,
            share_ended,
            sampler,
            timer: Some(timer),
        });
        self.warning = None;
        info!(
            "Session started at {}, time left {}",
            started_at.format("%H:%M:%S"),
            format_remaining(self.settings.duration_secs)
        );
        Ok(())
    }

    /// Returns whether the signal was accepted and forwarded for persistence.
    pub fn receive_signal(&mut self, signal: ViolationSignal) -> bool {
        if !matches!(self.state, SessionState::Active(_)) {
            self.dropped += 1;
            debug!(
                source = %signal.source, phase = %self.phase(),
                "dropped {} outside active session", signal.kind
            );
            return false;
        }

        self.accepted += 1;
        let label = signal.kind.label().to_string();
        warn!(
            source = %signal.source, at = %signal.detected_at.format("%H:%M:%S%.3f"),
            "⚠️ Violation Detected: {}", label
        );
        self.warning = Some(label.clone());
        let remaining_secs = match &self.state {
            SessionState::Active(a) => a.remaining_secs,
            _ => 0,
        };
        // No subscriber just means nobody is watching the console.
        let _ = self.alerts.send(ViolationAlert { label: label.clone(), remaining_secs, count: self.accepted });

        let reporter = Arc::clone(&self.collab.reporter);
        tokio::spawn(async move {
            match reporter.report(&label).await {
                ReportOutcome::Logged(record) => debug!(id = %record.id, "persisted {}", record.kind),
                ReportOutcome::Failed(reason) => debug!("{} not persisted: {}", label, reason),
            }
        });
        true
    }

    /// Ends the attempt. `Ok(true)` when this call performed the transition,
    /// `Ok(false)` when the session was already submitted.
    pub fn submit(&mut self) -> Result<bool, SessionError> {
        let active = match std::mem::replace(&mut self.state, SessionState::NotStarted) {
            SessionState::Active(a) => a,
            SessionState::NotStarted => return Err(SessionError::NotActive),
            submitted @ SessionState::Submitted { .. } => {
                self.state = submitted;
                return Ok(false);
            }
        };

        let started_at     = active.started_at;
        let remaining_secs = active.remaining_secs;
        let failed         = active.release();
        let submitted_at   = Utc::now();
        self.state = SessionState::Submitted { started_at, submitted_at, remaining_secs };

        info!(
            "✅ Test submitted after {}s, {} violations, {} answer chars{}",
            (submitted_at - started_at).num_seconds(),
            self.accepted,
            self.answer.chars().count(),
            if failed > 0 { format!(", {} releases failed", failed) } else { String::new() },
        );
        Ok(true)
    }

    pub fn set_answer(&mut self, text: String) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Active(_)) {
            return Err(SessionError::NotActive);
        }
        self.answer = text;
        Ok(())
    }

    /// One countdown second. Reaching zero applies the expiry policy.
    pub fn tick(&mut self) {
        let active = match &mut self.state {
            SessionState::Active(a) => a,
            _ => return,
        };
        active.remaining_secs = active.remaining_secs.saturating_sub(1);
        if active.remaining_secs > 0 { return; }

        if let Some(timer) = active.timer.take() {
            timer.abort();
        }
        match self.settings.expiry {
            ExpiryPolicy::DisplayOnly => info!("Time is up (0:00); waiting for manual submit"),
            ExpiryPolicy::AutoSubmit => {
                info!("Time is up (0:00); auto-submitting");
                if let Err(e) = self.submit() {
                    warn!("auto-submit failed: {}", e);
                }
            }
        }
    }

    /// Controller is going away. An abandoned Active session is closed the
    /// same way as a submit so watchers never see the phase move backwards.
    pub(super) fn shutdown(&mut self) {
        if !matches!(self.state, SessionState::Active(_)) { return; }
        warn!("Session abandoned while active; closing it");
        if let Err(e) = self.submit() {
            warn!("closing abandoned session failed: {}", e);
        }
    }
}
