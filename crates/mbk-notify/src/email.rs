use askama::Template;
use async_trait::async_trait;
use mbk_core::{AdminContact, BookingRecord, BookingRequest, ReservationStatus};
use serde::Serialize;
use tracing::{info_span, Instrument};

use crate::{post_json, Notifier, NotifyError};

pub const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

const INSTANT_FMT: &str = "%a, %b %-d, %Y %H:%M";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Email {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

#[derive(Template)]
#[template(path = "booking_received_admin.html")]
struct AdminNoticeTemplate<'a> {
    record: &'a BookingRecord,
    req: &'a BookingRequest,
    pickup: String,
    return_at: String,
    special: Option<&'a str>,
    review_url: Option<String>,
}

#[derive(Template)]
#[template(path = "booking_received_requester.html")]
struct ConfirmationTemplate<'a> {
    record: &'a BookingRecord,
    req: &'a BookingRequest,
    pickup: String,
    return_at: String,
}

#[derive(Template)]
#[template(path = "decision.html")]
struct DecisionTemplate<'a> {
    record: &'a BookingRecord,
    status: &'static str,
    status_lower: String,
    approved: bool,
    rejected: bool,
    notes: Option<&'a str>,
    pickup: String,
    return_at: String,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// The admin review email and the requester's confirmation, in that order.
pub fn booking_received_emails(
    record: &BookingRecord,
    admin: &AdminContact,
    from: &str,
    review_base_url: Option<&str>,
) -> Result<(Email, Email), NotifyError> {
    let req = &record.request;
    let pickup = record.pickup_at.format(INSTANT_FMT).to_string();
    let return_at = record.return_at.format(INSTANT_FMT).to_string();

    let to_admin = Email {
        from: from.to_string(),
        to: vec![admin.email.clone()],
        subject: format!("New Request: {} - {}", record.request_id, req.event_name),
        html: AdminNoticeTemplate {
            record,
            req,
            pickup: pickup.clone(),
            return_at: return_at.clone(),
            special: non_blank(req.special_requirements.as_deref()),
            review_url: review_base_url
                .map(|base| format!("{}/admin/requests/{}", base.trim_end_matches('/'), record.request_id)),
        }
        .render()?,
    };

    let to_requester = Email {
        from: from.to_string(),
        to: vec![req.email.clone()],
        subject: format!("Request Confirmation: {}", record.request_id),
        html: ConfirmationTemplate {
            record,
            req,
            pickup,
            return_at,
        }
        .render()?,
    };

    Ok((to_admin, to_requester))
}

pub fn decision_email(record: &BookingRecord, from: &str) -> Result<Email, NotifyError> {
    let status = record.status.as_str();
    let html = DecisionTemplate {
        record,
        status,
        status_lower: status.to_lowercase(),
        approved: record.status == ReservationStatus::Approved,
        rejected: record.status == ReservationStatus::Rejected,
        notes: non_blank(record.admin.admin_notes.as_deref()),
        pickup: record.pickup_at.format(INSTANT_FMT).to_string(),
        return_at: record.return_at.format(INSTANT_FMT).to_string(),
    }
    .render()?;

    Ok(Email {
        from: from.to_string(),
        to: vec![record.request.email.clone()],
        subject: format!("Request {status}: {}", record.request_id),
        html,
    })
}

/// Sends mail through the Resend HTTP API.
#[derive(Debug, Clone)]
pub struct ResendNotifier {
    client: reqwest::Client,
    api_key: String,
    from: String,
    review_base_url: Option<String>,
    endpoint: String,
}

impl ResendNotifier {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            from: from.into(),
            review_base_url: None,
            endpoint: RESEND_ENDPOINT.to_string(),
        }
    }

    pub fn with_review_base_url(mut self, url: Option<String>) -> Self {
        self.review_base_url = url;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn send(&self, email: &Email) -> Result<(), NotifyError> {
        let span = info_span!("send_email", subject = %email.subject, recipients = email.to.len());
        let request = self.client.post(&self.endpoint).bearer_auth(&self.api_key);
        post_json(request, &self.endpoint, email).instrument(span).await
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn booking_received(&self, record: &BookingRecord, admin: &AdminContact) -> Result<(), NotifyError> {
        let (to_admin, to_requester) =
            booking_received_emails(record, admin, &self.from, self.review_base_url.as_deref())?;
        self.send(&to_admin).await?;
        self.send(&to_requester).await
    }

    async fn decision_made(&self, record: &BookingRecord) -> Result<(), NotifyError> {
        self.send(&decision_email(record, &self.from)?).await
    }
}
