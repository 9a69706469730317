//! Outbound notifications for accepted bookings and admin decisions.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use mbk_core::{AdminContact, BookingRecord};
use thiserror::Error;

mod email;
mod sheet;

pub use email::{booking_received_emails, decision_email, Email, ResendNotifier, RESEND_ENDPOINT};
pub use sheet::{SheetAction, SheetRow, WebhookSheetMirror};

pub const CRATE_NAME: &str = "mbk-notify";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} from {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("rendering email: {0}")]
    Render(#[from] askama::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tells the routed admin about a new booking and confirms receipt to
    /// the requester.
    async fn booking_received(&self, record: &BookingRecord, admin: &AdminContact) -> Result<(), NotifyError>;

    async fn decision_made(&self, record: &BookingRecord) -> Result<(), NotifyError>;

    /// False for implementations that deliver nothing.
    fn enabled(&self) -> bool {
        true
    }
}

/// Spreadsheet copy of the bookings table, kept for the admin team.
#[async_trait]
pub trait SheetMirror: Send + Sync {
    async fn append_booking(&self, record: &BookingRecord) -> Result<(), NotifyError>;

    async fn update_decision(&self, record: &BookingRecord) -> Result<(), NotifyError>;

    fn enabled(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn booking_received(&self, record: &BookingRecord, _admin: &AdminContact) -> Result<(), NotifyError> {
        tracing::debug!(request_id = %record.request_id, "email disabled; skipping booking notification");
        Ok(())
    }

    async fn decision_made(&self, record: &BookingRecord) -> Result<(), NotifyError> {
        tracing::debug!(request_id = %record.request_id, "email disabled; skipping decision notification");
        Ok(())
    }

    fn enabled(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct NoopSheetMirror;

#[async_trait]
impl SheetMirror for NoopSheetMirror {
    async fn append_booking(&self, _record: &BookingRecord) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn update_decision(&self, _record: &BookingRecord) -> Result<(), NotifyError> {
        Ok(())
    }

    fn enabled(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: Some(format!("mbk/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

pub fn http_client(config: &HttpClientConfig) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .gzip(true)
        .brotli(true)
        .timeout(config.timeout);
    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }
    builder.build().context("building reqwest client")
}

/// Sends a JSON body and treats any non-2xx answer as an error. Never retries.
pub(crate) async fn post_json<T: serde::Serialize + ?Sized>(
    request: reqwest::RequestBuilder,
    url: &str,
    body: &T,
) -> Result<(), NotifyError> {
    let resp = request.json(body).send().await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(NotifyError::HttpStatus {
        status: status.as_u16(),
        url: url.to_string(),
        body: body.chars().take(500).collect(),
    })
}
