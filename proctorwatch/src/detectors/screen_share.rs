// proctorwatch/src/detectors/screen_share.rs
//
// Screen-share lifecycle detection.
//
//   acquire()  asks the client for a share; a refusal emits
//              ScreenShareDenied before the error is returned
//   run()      waits for the share-ended event, emits ScreenShareStopped
//
// A refusal happens before the session is Active, so the controller drops
// the ScreenShareDenied signal. It is still emitted: phase gating belongs to
// the controller, not to detectors.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{emit, Detector, SignalSink};
use crate::error::MediaError;
use crate::events::{DetectorKind, ViolationKind, ViolationSignal};
use crate::media::{MediaDevices, ScreenShare};

pub async fn acquire(
    devices: &dyn MediaDevices,
    sink:    &SignalSink,
) -> Result<Arc<dyn ScreenShare>, MediaError> {
    match devices.display_media().await {
        Ok(share) => Ok(share),
        Err(e) => {
            warn!("Screen share refused: {}", e);
            emit(sink, ViolationSignal::now(DetectorKind::ScreenShare, ViolationKind::ScreenShareDenied)).await;
            Err(e)
        }
    }
}

pub struct ScreenShareDetector {
    share: Arc<dyn ScreenShare>,
}

impl ScreenShareDetector {
    pub fn new(share: Arc<dyn ScreenShare>) -> Self {
        Self { share }
    }
}

#[async_trait]
impl Detector for ScreenShareDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::ScreenShare
    }

    async fn run(self: Box<Self>, sink: SignalSink) {
        self.share.ended().await;
        emit(&sink, ViolationSignal::now(DetectorKind::ScreenShare, ViolationKind::ScreenShareStopped)).await;
    }
}
