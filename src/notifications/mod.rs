//! Operator notifications for cycle outcomes
//!
//! The scheduler reports every cycle - success or failure - through a
//! [`NotificationSink`]. The webhook sink POSTs a JSON payload to a
//! configured endpoint; deployments without an endpoint get the no-op sink.
//! Delivery failures never affect the cycle that produced the report.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::CycleReport;

/// Destination for cycle reports and error alerts
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a cycle summary (sent for both successful and failed cycles)
    async fn send_report(&self, subject: &str, report: &CycleReport) -> Result<()>;

    /// Deliver an error alert with the full error chain
    async fn send_error(&self, subject: &str, error_chain: &str) -> Result<()>;
}

/// Payload shape POSTed by the webhook sink
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a CycleReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Webhook sink delivering reports as JSON POST requests
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    /// Create a sink for the given endpoint
    ///
    /// # Errors
    ///
    /// Returns a config error for a malformed URL
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url).map_err(|e| Error::config(format!("invalid webhook URL: {e}")))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, url })
    }

    async fn post(&self, payload: &WebhookPayload<'_>) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("webhook delivery failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Notification(format!(
                "webhook endpoint answered {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send_report(&self, subject: &str, report: &CycleReport) -> Result<()> {
        self.post(&WebhookPayload {
            subject,
            report: Some(report),
            error: None,
        })
        .await
    }

    async fn send_error(&self, subject: &str, error_chain: &str) -> Result<()> {
        self.post(&WebhookPayload {
            subject,
            report: None,
            error: Some(error_chain),
        })
        .await
    }
}

/// Sink that logs and drops every notification
///
/// Used when no webhook endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn send_report(&self, subject: &str, report: &CycleReport) -> Result<()> {
        tracing::info!(subject = %subject, outcome = ?report.outcome, "cycle report (no sink configured)");
        Ok(())
    }

    async fn send_error(&self, subject: &str, error_chain: &str) -> Result<()> {
        tracing::error!(subject = %subject, error = %error_chain, "error report (no sink configured)");
        Ok(())
    }
}

/// In-memory sink capturing notifications for tests
#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: std::sync::Mutex<Vec<(String, CycleReport)>>,
    errors: std::sync::Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(String, CycleReport)> {
        self.reports.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(String, String)> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send_report(&self, subject: &str, report: &CycleReport) -> Result<()> {
        self.reports
            .lock()
            .unwrap()
            .push((subject.to_string(), report.clone()));
        Ok(())
    }

    async fn send_error(&self, subject: &str, error_chain: &str) -> Result<()> {
        self.errors
            .lock()
            .unwrap()
            .push((subject.to_string(), error_chain.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CatalogCounts, CycleOutcome};
    use chrono::Utc;
    use uuid::Uuid;

    fn report() -> CycleReport {
        CycleReport {
            cycle_id: Uuid::new_v4(),
            outcome: CycleOutcome::Success,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            counts_before: CatalogCounts::default(),
            counts_after: CatalogCounts {
                movies: 3,
                series: 1,
            },
            links_checked: 10,
            links_pruned: 2,
            sources_ranked: 4,
            error: None,
        }
    }

    #[test]
    fn test_webhook_sink_rejects_malformed_url() {
        assert!(WebhookSink::new("not a url").is_err());
        assert!(WebhookSink::new("https://hooks.example/report").is_ok());
    }

    #[test]
    fn test_payload_omits_empty_fields() {
        let r = report();
        let payload = WebhookPayload {
            subject: "cycle",
            report: Some(&r),
            error: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["subject"], "cycle");
        assert_eq!(json["report"]["links_checked"], 10);
    }

    #[tokio::test]
    async fn test_recording_sink_captures_both_kinds() {
        let sink = RecordingSink::new();
        sink.send_report("ok", &report()).await.unwrap();
        sink.send_error("bad", "boom").await.unwrap();

        assert_eq!(sink.reports().len(), 1);
        assert_eq!(sink.errors()[0].1, "boom");
    }

    #[tokio::test]
    async fn test_noop_sink_never_fails() {
        let sink = NoopSink;
        assert!(sink.send_report("ok", &report()).await.is_ok());
        assert!(sink.send_error("bad", "boom").await.is_ok());
    }
}
