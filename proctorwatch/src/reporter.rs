// proctorwatch/src/reporter.rs
//
// Violation reporter: ships an accepted violation to the log server.
//
// At most one attempt per violation: no retry queue, no backoff. A failed
// report is logged here and goes no further; the session state machine never
// sees the outcome as an error.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use crate::error::ReportError;
use crate::events::ViolationRecord;

#[derive(Debug, Clone)]
pub enum ReportOutcome {
    Logged(ViolationRecord),
    Failed(String),
}

#[async_trait]
pub trait ViolationReporter: Send + Sync {
    async fn report(&self, kind: &str) -> ReportOutcome;
}

#[derive(Debug, Deserialize)]
struct LoggedReply {
    violation: ViolationRecord,
}

pub struct HttpReporter {
    base_url: String,
    client:   reqwest::Client,
}

impl HttpReporter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url: base_url.into().trim_end_matches('/').to_string(), client })
    }

    pub async fn post_violation(&self, kind: &str) -> Result<ViolationRecord, ReportError> {
        let url = format!("{}/log-violation", self.base_url);
        let res = self.client.post(&url).json(&json!({ "type": kind })).send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body   = res.text().await.unwrap_or_default();
            return Err(ReportError::Status { status, body });
        }
        let reply: LoggedReply = res.json().await?;
        Ok(reply.violation)
    }

    /// Full audit trail, newest first.
    pub async fn list(&self) -> Result<Vec<ViolationRecord>, ReportError> {
        let url = format!("{}/violations", self.base_url);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body   = res.text().await.unwrap_or_default();
            return Err(ReportError::Status { status, body });
        }
        Ok(res.json().await?)
    }
}

#[async_trait]
impl ViolationReporter for HttpReporter {
    async fn report(&self, kind: &str) -> ReportOutcome {
        match self.post_violation(kind).await {
            Ok(record) => {
                debug!(id = %record.id, "Reported {}", record.kind);
                ReportOutcome::Logged(record)
            }
            Err(e) => {
                error!("Error logging violation {:?}: {}", kind, e);
                ReportOutcome::Failed(e.to_string())
            }
        }
    }
}
