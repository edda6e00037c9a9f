// proctorwatch/src/detectors/face_client.rs
//
// Client for the external face-detection service.
//
//   POST {base}/detect_faces   multipart, one field "image" (frame.jpg, image/jpeg)
//   → { "violation"?: string, "faces"?: number }   violation present = flagged frame
//   → { "error": string }                          service-side failure (HTTP 200)
//
// The vision model behind the endpoint is a black box here.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::trace;

use crate::error::DetectError;

#[derive(Debug, Default, Deserialize)]
pub struct DetectionVerdict {
    #[serde(default)]
    pub violation: Option<String>,
    #[serde(default)]
    pub faces: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait FaceDetection: Send + Sync {
    /// Returns the violation label for this frame, if any.
    async fn detect(&self, jpeg: Bytes) -> Result<Option<String>, DetectError>;
}

pub struct HttpFaceDetection {
    url:    String,
    client: reqwest::Client,
}

impl HttpFaceDetection {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DetectError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let url = format!("{}/detect_faces", base_url.trim_end_matches('/'));
        Ok(Self { url, client })
    }
}

#[async_trait]
impl FaceDetection for HttpFaceDetection {
    async fn detect(&self, jpeg: Bytes) -> Result<Option<String>, DetectError> {
        let part = Part::bytes(jpeg.to_vec()).file_name("frame.jpg").mime_str("image/jpeg")?;
        let form = Form::new().part("image", part);

        let res = self.client.post(&self.url).multipart(form).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body   = res.text().await.unwrap_or_default();
            return Err(DetectError::Service(format!("{}: {}", status, body)));
        }

        let verdict: DetectionVerdict = res.json().await?;
        if let Some(err) = verdict.error {
            return Err(DetectError::Service(err));
        }
        trace!(faces = ?verdict.faces, violation = ?verdict.violation, "detection verdict");
        Ok(verdict.violation.filter(|v| !v.trim().is_empty()))
    }
}
