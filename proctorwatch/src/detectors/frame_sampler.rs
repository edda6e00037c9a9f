// proctorwatch/src/detectors/frame_sampler.rs
//
// Camera frame sampling, fire-and-continue.
//
// Every `every` (1 s by default) the sampler spawns one independent task:
//   capture JPEG at the camera's reported size (640×480 if unknown)
//   → POST to the face-detection service
//   → violation label present → Detector(label) signal
//
// A slow or failing call never delays the next tick and shares no state with
// it. Failures are logged and swallowed so sampling never stalls. Aborting
// the sampler stops new ticks; calls already in flight run to completion and
// their signals are dropped by the controller once the session is submitted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::face_client::FaceDetection;
use super::{emit, Detector, SignalSink};
use crate::events::{DetectorKind, ViolationKind, ViolationSignal};
use crate::media::{Camera, Dimensions};

pub struct FrameSampler {
    camera:    Arc<dyn Camera>,
    detection: Arc<dyn FaceDetection>,
    every:     Duration,
}

impl FrameSampler {
    pub fn new(camera: Arc<dyn Camera>, detection: Arc<dyn FaceDetection>, every: Duration) -> Self {
        Self { camera, detection, every }
    }
}

#[async_trait]
impl Detector for FrameSampler {
    fn kind(&self) -> DetectorKind {
        DetectorKind::FrameSampler
    }

    async fn run(self: Box<Self>, sink: SignalSink) {
        // First capture one period after start, like a plain interval timer.
        let mut ticker = interval_at(Instant::now() + self.every, self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            tokio::spawn(sample_once(
                Arc::clone(&self.camera),
                Arc::clone(&self.detection),
                sink.clone(),
            ));
        }
    }
}

async fn sample_once(camera: Arc<dyn Camera>, detection: Arc<dyn FaceDetection>, sink: SignalSink) {
    let dims = Dimensions::or_fallback(camera.dimensions());
    let jpeg = match camera.capture_jpeg(dims).await {
        Ok(j) => j,
        Err(e) => {
            debug!("frame capture skipped: {}", e);
            return;
        }
    };

    match detection.detect(jpeg).await {
        Ok(Some(label)) => {
            emit(&sink, ViolationSignal::now(DetectorKind::FrameSampler, ViolationKind::Detector(label))).await;
        }
        Ok(None) => {}
        Err(e) => warn!("Error sending frame: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::spawn;
    use crate::error::DetectError;
    use crate::feed::FeedCamera;
    use crate::testing::{frames_dir, ScriptedDetection};
    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn failed_call_does_not_stall_sampling() {
        let dir = frames_dir(1);
        let camera: Arc<dyn Camera> = Arc::new(FeedCamera::from_dir(dir.path(), None).await.unwrap());
        let detection = Arc::new(ScriptedDetection::new(vec![
            Err("timeout".into()),
            Ok(None),
            Ok(Some("Multiple Faces Detected".into())),
        ]));
        let (tx, mut rx) = mpsc::channel(8);
        let task = spawn(
            Box::new(FrameSampler::new(camera, detection.clone(), Duration::from_millis(20))),
            tx,
        );

        let sig = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        task.abort();
        assert_eq!(sig.kind, ViolationKind::Detector("Multiple Faces Detected".into()));
        assert!(detection.calls() >= 3);
    }

    /// First call never answers; every later one flags the frame.
    struct StuckFirst {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl FaceDetection for StuckFirst {
        async fn detect(&self, _jpeg: Bytes) -> Result<Option<String>, DetectError> {
            if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                std::future::pending::<()>().await;
            }
            Ok(Some("Multiple Faces Detected".into()))
        }
    }

    #[tokio::test]
    async fn slow_call_does_not_delay_next_capture() {
        let dir = frames_dir(1);
        let camera: Arc<dyn Camera> = Arc::new(FeedCamera::from_dir(dir.path(), None).await.unwrap());
        let detection = Arc::new(StuckFirst { calls: Default::default() });
        let (tx, mut rx) = mpsc::channel(8);
        let task = spawn(
            Box::new(FrameSampler::new(camera, detection.clone(), Duration::from_millis(20))),
            tx,
        );

        let sig = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        task.abort();
        assert_eq!(sig.kind, ViolationKind::Detector("Multiple Faces Detected".into()));
        assert!(detection.calls.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    }

    struct SizeRecorder {
        reported: Option<Dimensions>,
        seen:     Mutex<Vec<Dimensions>>,
    }

    #[async_trait]
    impl Camera for SizeRecorder {
        fn dimensions(&self) -> Option<Dimensions> {
            self.reported
        }
        async fn capture_jpeg(&self, dims: Dimensions) -> Result<Bytes, crate::error::MediaError> {
            self.seen.lock().push(dims);
            Ok(Bytes::from_static(b"jpeg"))
        }
        fn stop(&self) -> Result<(), crate::error::MediaError> {
            Ok(())
        }
    }

    struct Never;

    #[async_trait]
    impl FaceDetection for Never {
        async fn detect(&self, _jpeg: Bytes) -> Result<Option<String>, DetectError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn capture_uses_fallback_size() {
        let camera = Arc::new(SizeRecorder { reported: None, seen: Mutex::new(Vec::new()) });
        let (tx, _rx) = mpsc::channel(1);
        sample_once(camera.clone(), Arc::new(Never), tx).await;
        assert_eq!(camera.seen.lock()[0], Dimensions { width: 640, height: 480 });
    }
}
