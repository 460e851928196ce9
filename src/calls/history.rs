//! Call history reporting.
//!
//! Fire-and-forget: the coordinator posts a record when a connected call
//! terminates. Failures are logged and never affect teardown.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Metadata describing a terminated call.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub caller: String,
    pub callee: String,
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    /// Connected time in seconds.
    pub duration: i64,
}

impl CallRecord {
    pub fn ended(
        caller: impl Into<String>,
        callee: impl Into<String>,
        duration_secs: i64,
    ) -> Self {
        Self {
            caller: caller.into(),
            callee: callee.into(),
            status: "ended",
            timestamp: Utc::now(),
            duration: duration_secs,
        }
    }
}

/// Sink for terminated-call records.
#[async_trait]
pub trait CallHistoryReporter: Send + Sync {
    async fn report(&self, record: CallRecord) -> anyhow::Result<()>;
}

/// Reporter that POSTs the record as JSON to the history service.
///
/// `ureq` is blocking, so the request runs on the blocking pool.
pub struct HttpHistoryReporter {
    endpoint: String,
}

impl HttpHistoryReporter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl CallHistoryReporter for HttpHistoryReporter {
    async fn report(&self, record: CallRecord) -> anyhow::Result<()> {
        let endpoint = self.endpoint.clone();
        let body = serde_json::to_vec(&record)?;
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            ureq::post(&endpoint)
                .header("content-type", "application/json")
                .send(&body[..])?;
            Ok(())
        })
        .await?
    }
}

/// Reporter used when no history service is configured.
#[derive(Debug, Default)]
pub struct NullHistoryReporter;

#[async_trait]
impl CallHistoryReporter for NullHistoryReporter {
    async fn report(&self, _record: CallRecord) -> anyhow::Result<()> {
        Ok(())
    }
}
