// proctorwatch/src/detectors/visibility.rs
//
// Tab-switch detection: every transition to a hidden document is one
// TabSwitch signal. Becoming visible again emits nothing.

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use super::{emit, Detector, SignalSink};
use crate::events::{DetectorKind, ViolationKind, ViolationSignal, Visibility};

pub struct VisibilityDetector {
    events: broadcast::Receiver<Visibility>,
}

impl VisibilityDetector {
    pub fn new(events: broadcast::Receiver<Visibility>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Detector for VisibilityDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Visibility
    }

    async fn run(mut self: Box<Self>, sink: SignalSink) {
        loop {
            match self.events.recv().await {
                Ok(Visibility::Hidden) => {
                    emit(&sink, ViolationSignal::now(DetectorKind::Visibility, ViolationKind::TabSwitch)).await;
                }
                Ok(Visibility::Visible) => {}
                Err(RecvError::Lagged(n)) => warn!("visibility detector lagged, {} events lost", n),
                Err(RecvError::Closed) => break,
            }
        }
    }
}
