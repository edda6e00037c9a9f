// proctorwatch/src/media.rs
//
// Capture-device seam.
//
// The session controller acquires a screen share and a camera through
// `MediaDevices` and owns the returned handles for the whole Active phase.
// Detectors receive shared read views (`Arc<dyn ...>`) and only ever read
// frames or wait for lifecycle events; `stop()` is called by the controller
// alone, once, during teardown.
//
// Document visibility comes from the same client surface, so its event
// channel is exposed here too.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::error::MediaError;
use crate::events::Visibility;

/// Used whenever the camera has not reported a usable resolution yet.
pub const FALLBACK_DIMENSIONS: Dimensions = Dimensions { width: 640, height: 480 };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width:  u32,
    pub height: u32,
}

impl Dimensions {
    /// Reported resolution if both sides are non-zero, otherwise 640×480.
    pub fn or_fallback(reported: Option<Dimensions>) -> Dimensions {
        match reported {
            Some(d) if d.width > 0 && d.height > 0 => d,
            _ => FALLBACK_DIMENSIONS,
        }
    }
}

impl std::str::FromStr for Dimensions {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s.split_once(['x', 'X']).ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
        let width  = w.trim().parse().map_err(|_| format!("bad width in {s:?}"))?;
        let height = h.trim().parse().map_err(|_| format!("bad height in {s:?}"))?;
        Ok(Self { width, height })
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[async_trait]
pub trait ScreenShare: Send + Sync {
    /// Resolves once the shared surface ends (user pressed "stop sharing",
    /// window closed). Stopping the share ourselves does not resolve it.
    async fn ended(&self);

    fn stop(&self) -> Result<(), MediaError>;
}

#[async_trait]
pub trait Camera: Send + Sync {
    /// Resolution the device reports, if it has reported one yet.
    fn dimensions(&self) -> Option<Dimensions>;

    /// Current frame, JPEG-encoded at `dims`.
    async fn capture_jpeg(&self, dims: Dimensions) -> Result<Bytes, MediaError>;

    fn stop(&self) -> Result<(), MediaError>;
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn display_media(&self) -> Result<Arc<dyn ScreenShare>, MediaError>;
    async fn user_media(&self) -> Result<Arc<dyn Camera>, MediaError>;
    fn visibility_events(&self) -> broadcast::Receiver<Visibility>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_when_unreported_or_zero() {
        assert_eq!(Dimensions::or_fallback(None), FALLBACK_DIMENSIONS);
        assert_eq!(
            Dimensions::or_fallback(Some(Dimensions { width: 0, height: 720 })),
            FALLBACK_DIMENSIONS
        );
        let hd = Dimensions { width: 1280, height: 720 };
        assert_eq!(Dimensions::or_fallback(Some(hd)), hd);
    }

    #[test]
    fn parses_width_by_height() {
        assert_eq!("1280x720".parse::<Dimensions>().unwrap(), Dimensions { width: 1280, height: 720 });
        assert!("1280".parse::<Dimensions>().is_err());
        assert!("ax720".parse::<Dimensions>().is_err());
    }
}
