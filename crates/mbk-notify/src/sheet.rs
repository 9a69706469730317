use async_trait::async_trait;
use mbk_core::BookingRecord;
use serde::Serialize;
use tracing::{info_span, Instrument};

use crate::{post_json, NotifyError, SheetMirror};

const INSTANT_FMT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetAction {
    Append,
    UpdateDecision,
}

/// One spreadsheet row, keyed by request id in the first column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetRow {
    pub request_id: String,
    pub submitted_at: String,
    pub employee_name: String,
    pub department: String,
    pub position: String,
    pub phone_number: String,
    pub email: String,
    pub event_name: String,
    pub location: String,
    pub expected_users: u32,
    pub machine_unit: String,
    pub event_start: String,
    pub event_end: String,
    pub pickup_datetime: String,
    pub return_datetime: String,
    pub inform_to: String,
    pub used_before: bool,
    pub need_training: bool,
    pub special_requirements: String,
    pub request_status: String,
    pub approved_by: String,
    pub admin_notes: String,
    pub condition_pickup: String,
    pub condition_return: String,
    pub return_notes: String,
    pub actual_return_datetime: String,
}

impl From<&BookingRecord> for SheetRow {
    fn from(record: &BookingRecord) -> Self {
        let req = &record.request;
        let admin = &record.admin;
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        Self {
            request_id: record.request_id.clone(),
            submitted_at: record.created_at.to_rfc3339(),
            employee_name: req.employee_name.clone(),
            department: req.department.clone(),
            position: req.position.clone(),
            phone_number: req.phone_number.clone(),
            email: req.email.clone(),
            event_name: req.event_name.clone(),
            location: req.location.clone(),
            expected_users: req.expected_users,
            machine_unit: record.window.unit_id.to_string(),
            event_start: record.window.event_start.to_string(),
            event_end: record.window.event_end.to_string(),
            pickup_datetime: record.pickup_at.format(INSTANT_FMT).to_string(),
            return_datetime: record.return_at.format(INSTANT_FMT).to_string(),
            inform_to: req.inform_to.clone(),
            used_before: req.used_before,
            need_training: req.need_training,
            special_requirements: text(&req.special_requirements),
            request_status: record.status.to_string(),
            approved_by: text(&admin.approved_by),
            admin_notes: text(&admin.admin_notes),
            condition_pickup: text(&admin.condition_pickup),
            condition_return: text(&admin.condition_return),
            return_notes: text(&admin.return_notes),
            actual_return_datetime: admin
                .actual_return_at
                .map(|at| at.format(INSTANT_FMT).to_string())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SheetPayload<'a> {
    action: SheetAction,
    row: &'a SheetRow,
}

/// Posts rows to a webhook that owns the actual spreadsheet (e.g. an Apps
/// Script deployment).
#[derive(Debug, Clone)]
pub struct WebhookSheetMirror {
    client: reqwest::Client,
    url: String,
}

impl WebhookSheetMirror {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    async fn push(&self, action: SheetAction, record: &BookingRecord) -> Result<(), NotifyError> {
        let row = SheetRow::from(record);
        let span = info_span!("sheet_mirror", ?action, request_id = %record.request_id);
        post_json(self.client.post(&self.url), &self.url, &SheetPayload { action, row: &row })
            .instrument(span)
            .await
    }
}

#[async_trait]
impl SheetMirror for WebhookSheetMirror {
    async fn append_booking(&self, record: &BookingRecord) -> Result<(), NotifyError> {
        self.push(SheetAction::Append, record).await
    }

    async fn update_decision(&self, record: &BookingRecord) -> Result<(), NotifyError> {
        self.push(SheetAction::UpdateDecision, record).await
    }
}
