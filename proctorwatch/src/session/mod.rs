// proctorwatch/src/session/mod.rs
//
// Session actor.
//
// One tokio task owns the SessionController and is the only writer of session
// state. Everything else talks to it through a SessionHandle:
//
//   commands   start / submit / answer edits, each with a oneshot reply
//   signals    raw ViolationSignal from detectors (and tests)
//   ticks      countdown seconds
//
// The loop is biased toward signals so that a signal emitted while handling a
// command (e.g. ScreenShareDenied during start) is judged against the phase
// that command produced, before the next command can change it.

mod controller;
pub mod timer;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

pub use controller::SessionController;

use crate::detectors::face_client::FaceDetection;
use crate::error::SessionError;
use crate::events::{SessionPhase, ViolationSignal};
use crate::media::MediaDevices;
use crate::reporter::ViolationReporter;

// ── Settings ──────────────────────────────────────────────────────────────────

/// What happens when the countdown reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ExpiryPolicy {
    /// Countdown stops at 0:00; the attempt stays open until submitted.
    #[default]
    DisplayOnly,
    /// Reaching 0:00 submits the attempt.
    AutoSubmit,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub duration_secs: u64,
    pub sample_every:  Duration,
    pub tick_every:    Duration,
    pub expiry:        ExpiryPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            duration_secs: 300,
            sample_every:  Duration::from_secs(1),
            tick_every:    Duration::from_secs(1),
            expiry:        ExpiryPolicy::DisplayOnly,
        }
    }
}

/// External parties the controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub devices:   Arc<dyn MediaDevices>,
    pub detection: Arc<dyn FaceDetection>,
    pub reporter:  Arc<dyn ViolationReporter>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    pub phase:            SessionPhase,
    pub started_at:       Option<DateTime<Utc>>,
    pub submitted_at:     Option<DateTime<Utc>>,
    pub remaining_secs:   u64,
    pub answer:           String,
    pub warning:          Option<String>,
    pub accepted_signals: u64,
    pub dropped_signals:  u64,
}

/// One accepted violation, as shown to the test-taker.
#[derive(Debug, Clone)]
pub struct ViolationAlert {
    pub label:          String,
    pub remaining_secs: u64,
    pub count:          u64,
}

// ── Handle ────────────────────────────────────────────────────────────────────

enum Command {
    Start(oneshot::Sender<Result<(), SessionError>>),
    Submit(oneshot::Sender<Result<bool, SessionError>>),
    SetAnswer(String, oneshot::Sender<Result<(), SessionError>>),
}

#[derive(Clone)]
pub struct SessionHandle {
    commands:  mpsc::Sender<Command>,
    #[cfg(test)]
    signals:   mpsc::Sender<ViolationSignal>,
    snapshots: watch::Receiver<SessionSnapshot>,
    alerts:    broadcast::Sender<ViolationAlert>,
}

impl SessionHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, SessionError>>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await.map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        self.call(Command::Start).await
    }

    /// `Ok(true)` if this call submitted the attempt, `Ok(false)` if it was
    /// already submitted.
    pub async fn submit(&self) -> Result<bool, SessionError> {
        self.call(Command::Submit).await
    }

    pub async fn set_answer(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        self.call(|tx| Command::SetAnswer(text, tx)).await
    }

    /// Inject a raw signal, as a detector would.
    #[cfg(test)]
    pub async fn signal(&self, signal: ViolationSignal) -> Result<(), SessionError> {
        self.signals.send(signal).await.map_err(|_| SessionError::Closed)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Every accepted violation, one message each, from the moment of subscribing.
    pub fn alerts(&self) -> broadcast::Receiver<ViolationAlert> {
        self.alerts.subscribe()
    }

    /// Resolves with the first snapshot satisfying `pred`.
    pub async fn wait_until(
        &self,
        pred: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot, SessionError> {
        let mut rx = self.subscribe();
        let snap = rx.wait_for(pred).await.map_err(|_| SessionError::Closed)?;
        Ok(snap.clone())
    }
}

// ── Actor ─────────────────────────────────────────────────────────────────────

/// Spawn the controller task. It runs until every handle is dropped.
pub fn spawn(settings: SessionSettings, collab: Collaborators) -> (SessionHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx)       = mpsc::channel(32);
    let (signal_tx, signal_rx) = mpsc::channel(256);
    let (tick_tx, tick_rx)     = mpsc::channel(8);

    let ctl = SessionController::new(settings, collab, signal_tx.clone(), tick_tx);
    let snapshots = ctl.subscribe();
    let alerts    = ctl.alert_sender();

    let handle = SessionHandle {
        commands: cmd_tx,
        #[cfg(test)]
        signals: signal_tx,
        snapshots,
        alerts,
    };
    let task = tokio::spawn(run(ctl, cmd_rx, signal_rx, tick_rx));
    (handle, task)
}

async fn run(
    mut ctl:       SessionController,
    mut commands:  mpsc::Receiver<Command>,
    mut signals:   mpsc::Receiver<ViolationSignal>,
    mut ticks:     mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            Some(signal) = signals.recv() => { ctl.receive_signal(signal); }
            Some(()) = ticks.recv() => ctl.tick(),
            cmd = commands.recv() => match cmd {
                Some(Command::Start(reply)) => {
                    let res = ctl.start().await;
                    respond(&ctl, reply, res);
                }
                Some(Command::Submit(reply)) => {
                    let res = ctl.submit();
                    respond(&ctl, reply, res);
                }
                Some(Command::SetAnswer(text, reply)) => {
                    let res = ctl.set_answer(text);
                    respond(&ctl, reply, res);
                }
                None => break,
            },
        }
        ctl.publish();
    }
    debug!("session handles dropped, controller exiting");
    ctl.shutdown();
    ctl.publish();
}

/// Publish before replying so a caller that awaited the command sees its effect.
fn respond<T>(ctl: &SessionController, reply: oneshot::Sender<T>, value: T) {
    ctl.publish();
    let _ = reply.send(value);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::broadcast;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::error::MediaError;
    use crate::events::{DetectorKind, ViolationKind, Visibility};
    use crate::feed::{FeedCamera, FeedDevices};
    use crate::media::{Camera, ScreenShare};
    use crate::testing::{frames_dir, next_report, RecordingReporter, ScriptedDetection};

    const WAIT:  Duration = Duration::from_secs(2);
    const QUIET: Duration = Duration::from_millis(150);

    struct Rig {
        session: SessionHandle,
        devices: Arc<FeedDevices>,
        reports: UnboundedReceiver<String>,
        task:    JoinHandle<()>,
    }

    fn quick() -> SessionSettings {
        SessionSettings {
            duration_secs: 300,
            sample_every:  Duration::from_millis(50),
            tick_every:    Duration::from_secs(60),
            expiry:        ExpiryPolicy::DisplayOnly,
        }
    }

    fn rig_with(settings: SessionSettings, camera: FeedCamera, detection: ScriptedDetection) -> Rig {
        let devices = FeedDevices::new(camera);
        let (reporter, reports) = RecordingReporter::new();
        let (session, task) = spawn(settings, Collaborators {
            devices:   devices.clone(),
            detection: Arc::new(detection),
            reporter:  Arc::new(reporter),
        });
        Rig { session, devices, reports, task }
    }

    fn rig() -> Rig {
        rig_with(quick(), FeedCamera::empty(), ScriptedDetection::new(Vec::new()))
    }

    fn tab_switch() -> ViolationSignal {
        ViolationSignal::now(DetectorKind::Visibility, ViolationKind::TabSwitch)
    }

    #[tokio::test]
    async fn signals_outside_active_are_dropped() {
        let mut r = rig();

        r.session.signal(tab_switch()).await.unwrap();
        r.session.wait_until(|s| s.dropped_signals == 1).await.unwrap();

        r.session.start().await.unwrap();
        assert!(r.session.submit().await.unwrap());

        r.session.signal(tab_switch()).await.unwrap();
        let snap = r.session.wait_until(|s| s.dropped_signals == 2).await.unwrap();
        assert_eq!(snap.accepted_signals, 0);
        assert_eq!(snap.warning, None);
        assert_eq!(next_report(&mut r.reports, QUIET).await, None);
    }

    #[tokio::test]
    async fn each_accepted_signal_is_reported_once() {
        let mut r = rig();
        r.session.start().await.unwrap();

        r.session.signal(tab_switch()).await.unwrap();
        r.session.signal(tab_switch()).await.unwrap();

        assert_eq!(next_report(&mut r.reports, WAIT).await.as_deref(), Some("Tab Switch Detected"));
        assert_eq!(next_report(&mut r.reports, WAIT).await.as_deref(), Some("Tab Switch Detected"));
        assert_eq!(next_report(&mut r.reports, QUIET).await, None);

        let snap = r.session.wait_until(|s| s.accepted_signals == 2).await.unwrap();
        assert_eq!(snap.warning.as_deref(), Some("Tab Switch Detected"));
    }

    #[tokio::test]
    async fn invalid_transitions_are_refused() {
        let r = rig();
        assert!(matches!(r.session.submit().await, Err(SessionError::NotActive)));

        r.session.start().await.unwrap();
        assert!(matches!(
            r.session.start().await,
            Err(SessionError::InvalidTransition(SessionPhase::Active))
        ));

        r.session.submit().await.unwrap();
        assert!(matches!(
            r.session.start().await,
            Err(SessionError::InvalidTransition(SessionPhase::Submitted))
        ));
    }

    #[tokio::test]
    async fn second_submit_is_a_no_op() {
        let r = rig();
        r.session.start().await.unwrap();

        assert!(r.session.submit().await.unwrap());
        assert!(!r.session.submit().await.unwrap());

        let share = r.devices.current_share().unwrap();
        assert_eq!(share.stop_count(), 1);
        assert_eq!(r.devices.camera().stop_count(), 1);

        let snap = r.session.snapshot();
        assert_eq!(snap.phase, SessionPhase::Submitted);
        assert!(snap.submitted_at.is_some());
    }

    #[tokio::test]
    async fn refused_screen_share_keeps_session_not_started() {
        let mut r = rig();
        r.devices.set_permissions(false, true);

        let err = r.session.start().await.unwrap_err();
        assert!(matches!(err, SessionError::Capture(MediaError::Denied { device: "screen share" })));

        // The denial is emitted, but no session is active to accept it.
        let snap = r.session.wait_until(|s| s.dropped_signals == 1).await.unwrap();
        assert_eq!(snap.phase, SessionPhase::NotStarted);
        assert_eq!(next_report(&mut r.reports, QUIET).await, None);

        r.devices.set_permissions(true, true);
        r.session.start().await.unwrap();
        assert_eq!(r.session.snapshot().phase, SessionPhase::Active);
    }

    #[tokio::test]
    async fn refused_camera_releases_the_share() {
        let r = rig();
        r.devices.set_permissions(true, false);

        assert!(r.session.start().await.is_err());
        assert_eq!(r.session.snapshot().phase, SessionPhase::NotStarted);
        assert_eq!(r.devices.current_share().unwrap().stop_count(), 1);
    }

    #[tokio::test]
    async fn hidden_document_reports_tab_switch() {
        let mut r = rig();
        r.session.start().await.unwrap();

        r.devices.set_visibility(Visibility::Visible);
        r.devices.set_visibility(Visibility::Hidden);

        assert_eq!(next_report(&mut r.reports, WAIT).await.as_deref(), Some("Tab Switch Detected"));
        assert_eq!(next_report(&mut r.reports, QUIET).await, None);
    }

    #[tokio::test]
    async fn ended_share_reports_stopped() {
        let mut r = rig();
        r.session.start().await.unwrap();

        r.devices.end_share();

        assert_eq!(next_report(&mut r.reports, WAIT).await.as_deref(), Some("Screen Sharing Stopped"));
    }

    #[tokio::test]
    async fn detector_label_is_reported_verbatim() {
        let dir = frames_dir(1);
        let camera = FeedCamera::from_dir(dir.path(), None).await.unwrap();
        let mut r = rig_with(quick(), camera, ScriptedDetection::always("Mask Detected"));
        r.session.start().await.unwrap();

        assert_eq!(next_report(&mut r.reports, WAIT).await.as_deref(), Some("Mask Detected"));
        r.session.submit().await.unwrap();
    }

    #[tokio::test]
    async fn answer_edits_only_while_active() {
        let r = rig();
        assert!(matches!(r.session.set_answer("early").await, Err(SessionError::NotActive)));

        r.session.start().await.unwrap();
        r.session.set_answer("AI drives modern computing").await.unwrap();
        r.session.submit().await.unwrap();

        assert!(matches!(r.session.set_answer("late").await, Err(SessionError::NotActive)));
        assert_eq!(r.session.snapshot().answer, "AI drives modern computing");
    }

    #[tokio::test]
    async fn display_only_expiry_stays_active_at_zero() {
        let settings = SessionSettings { duration_secs: 2, tick_every: Duration::from_millis(10), ..quick() };
        let r = rig_with(settings, FeedCamera::empty(), ScriptedDetection::new(Vec::new()));
        r.session.start().await.unwrap();

        r.session.wait_until(|s| s.remaining_secs == 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snap = r.session.snapshot();
        assert_eq!(snap.phase, SessionPhase::Active);
        assert_eq!(snap.remaining_secs, 0);
        assert!(r.session.submit().await.unwrap());
    }

    #[tokio::test]
    async fn auto_submit_expiry_ends_the_attempt() {
        let settings = SessionSettings {
            duration_secs: 2,
            tick_every:    Duration::from_millis(10),
            expiry:        ExpiryPolicy::AutoSubmit,
            ..quick()
        };
        let r = rig_with(settings, FeedCamera::empty(), ScriptedDetection::new(Vec::new()));
        r.session.start().await.unwrap();

        let snap = r.session.wait_until(|s| s.phase == SessionPhase::Submitted).await.unwrap();
        assert_eq!(snap.remaining_secs, 0);
        assert_eq!(r.devices.camera().stop_count(), 1);
        assert!(!r.session.submit().await.unwrap());
    }

    #[tokio::test]
    async fn dropping_every_handle_closes_the_attempt() {
        let r = rig();
        r.session.start().await.unwrap();

        let devices = Arc::clone(&r.devices);
        let watcher = r.session.subscribe();
        drop(r.session);
        tokio::time::timeout(WAIT, r.task).await.unwrap().unwrap();

        assert_eq!(devices.current_share().unwrap().stop_count(), 1);
        assert_eq!(devices.camera().stop_count(), 1);
        let last = watcher.borrow().clone();
        assert_eq!(last.phase, SessionPhase::Submitted);
        assert!(last.submitted_at.is_some());
    }

    #[tokio::test]
    async fn back_to_back_violations_each_raise_an_alert() {
        let r = rig();
        let mut alerts = r.session.alerts();
        r.session.start().await.unwrap();

        r.session.signal(tab_switch()).await.unwrap();
        r.session
            .signal(ViolationSignal::now(DetectorKind::FrameSampler, ViolationKind::Detector("Mask Detected".into())))
            .await
            .unwrap();

        let first  = tokio::time::timeout(WAIT, alerts.recv()).await.unwrap().unwrap();
        let second = tokio::time::timeout(WAIT, alerts.recv()).await.unwrap().unwrap();
        assert_eq!((first.label.as_str(), first.count), ("Tab Switch Detected", 1));
        assert_eq!((second.label.as_str(), second.count), ("Mask Detected", 2));
        assert_eq!(second.remaining_secs, 300);
    }

    // ── Release failures ──────────────────────────────────────────────────────

    #[derive(Default)]
    struct StuckShare {
        stops: AtomicUsize,
    }

    #[async_trait]
    impl ScreenShare for StuckShare {
        async fn ended(&self) {
            std::future::pending::<()>().await
        }

        fn stop(&self) -> Result<(), MediaError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Err(MediaError::Capture("track busy".into()))
        }
    }

    struct StuckDevices {
        share: Arc<StuckShare>,
        inner: Arc<FeedDevices>,
    }

    #[async_trait]
    impl MediaDevices for StuckDevices {
        async fn display_media(&self) -> Result<Arc<dyn ScreenShare>, MediaError> {
            Ok(self.share.clone())
        }

        async fn user_media(&self) -> Result<Arc<dyn Camera>, MediaError> {
            self.inner.user_media().await
        }

        fn visibility_events(&self) -> broadcast::Receiver<Visibility> {
            self.inner.visibility_events()
        }
    }

    #[tokio::test]
    async fn failed_share_release_does_not_block_teardown() {
        let share = Arc::new(StuckShare::default());
        let inner = FeedDevices::new(FeedCamera::empty());
        let (reporter, _reports) = RecordingReporter::new();
        let (session, _task) = spawn(quick(), Collaborators {
            devices:   Arc::new(StuckDevices { share: Arc::clone(&share), inner: Arc::clone(&inner) }),
            detection: Arc::new(ScriptedDetection::new(Vec::new())),
            reporter:  Arc::new(reporter),
        });

        session.start().await.unwrap();
        assert!(session.submit().await.unwrap());

        assert_eq!(share.stops.load(Ordering::SeqCst), 1);
        assert_eq!(inner.camera().stop_count(), 1);
        assert_eq!(session.snapshot().phase, SessionPhase::Submitted);
    }
}
