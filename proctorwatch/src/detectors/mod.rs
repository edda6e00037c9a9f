pub mod face_client;
pub mod frame_sampler;
pub mod screen_share;
pub mod visibility;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::events::{DetectorKind, ViolationSignal};

/// Where detectors deliver raw signals. The session controller decides
/// whether a signal counts; detectors know nothing about session phase.
pub type SignalSink = mpsc::Sender<ViolationSignal>;

#[async_trait]
pub trait Detector: Send {
    fn kind(&self) -> DetectorKind;

    /// Observe one signal source until it closes or the task is aborted.
    async fn run(self: Box<Self>, sink: SignalSink);
}

/// Run a detector as its own task. Aborting the handle is the only way the
/// controller stops it.
pub fn spawn(detector: Box<dyn Detector>, sink: SignalSink) -> JoinHandle<()> {
    let kind = detector.kind();
    tokio::spawn(async move {
        debug!(detector = %kind, "detector started");
        detector.run(sink).await;
        debug!(detector = %kind, "detector finished");
    })
}

/// Forward a signal; a closed sink means the session is gone, which is fine.
pub(crate) async fn emit(sink: &SignalSink, signal: ViolationSignal) {
    if sink.send(signal).await.is_err() {
        debug!("signal sink closed, dropping signal");
    }
}
