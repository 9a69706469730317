use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use mbk_core::{AdminDecision, BookingRecord, BookingRequest, BusinessTimezone, ReservationStatus, UnitCatalog, UnitId};
use mbk_engine::{can_submit, AvailabilityIndex, BookingValidator, CalendarRules, OffDay, Resolution, WindowResolver};
use mbk_notify::{
    http_client, HttpClientConfig, NoopNotifier, NoopSheetMirror, Notifier, ResendNotifier, SheetMirror,
    WebhookSheetMirror,
};
use mbk_storage::{BookingStore, DecisionStore, MemoryStore, PgStore, ReservationSource, SubmissionSink};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{load_catalog, load_holidays, IntakeConfig};
use crate::IntakeError;

/// A day range already held on the previewed unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookedSpan {
    pub pickup_date: NaiveDate,
    pub return_date: NaiveDate,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub resolution: Resolution,
    pub can_submit: bool,
    pub booked: Vec<BookedSpan>,
}

/// A persisted booking plus what happened to its best-effort side effects.
#[derive(Debug, Clone, Serialize)]
pub struct BookingOutcome {
    pub record: BookingRecord,
    pub notified: bool,
    pub mirrored: bool,
}

pub struct BookingService {
    calendar: CalendarRules,
    catalog: UnitCatalog,
    timezone: BusinessTimezone,
    store: Arc<dyn BookingStore>,
    notifier: Arc<dyn Notifier>,
    sheets: Arc<dyn SheetMirror>,
    last_millis: AtomicI64,
}

impl BookingService {
    pub fn new(
        calendar: CalendarRules,
        catalog: UnitCatalog,
        timezone: BusinessTimezone,
        store: Arc<dyn BookingStore>,
    ) -> Self {
        Self {
            calendar,
            catalog,
            timezone,
            store,
            notifier: Arc::new(NoopNotifier),
            sheets: Arc::new(NoopSheetMirror),
            last_millis: AtomicI64::new(0),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_sheet_mirror(mut self, sheets: Arc<dyn SheetMirror>) -> Self {
        self.sheets = sheets;
        self
    }

    /// Wires the service from configuration: Postgres when `DATABASE_URL` is
    /// set (migrations applied), memory otherwise; HTTP collaborators only
    /// when their keys are present.
    pub async fn from_config(config: &IntakeConfig) -> anyhow::Result<Self> {
        let timezone = config.timezone()?;
        let catalog = load_catalog(&config.workspace_root).await?;
        let calendar = CalendarRules::new(load_holidays(&config.workspace_root).await?);

        let store: Arc<dyn BookingStore> = match &config.database_url {
            Some(url) => {
                let store = PgStore::connect(url, timezone).await?;
                store.migrate().await?;
                Arc::new(store)
            }
            None => {
                warn!("DATABASE_URL not set; bookings are kept in memory and lost on restart");
                Arc::new(MemoryStore::new(timezone))
            }
        };

        let client = http_client(&HttpClientConfig {
            timeout: config.http_timeout(),
            ..Default::default()
        })
        .context("building notification client")?;
        let notifier: Arc<dyn Notifier> = match &config.resend_api_key {
            Some(key) => Arc::new(
                ResendNotifier::new(client.clone(), key.clone(), config.mail_from.clone())
                    .with_review_base_url(config.public_url.clone()),
            ),
            None => Arc::new(NoopNotifier),
        };
        let sheets: Arc<dyn SheetMirror> = match &config.sheet_webhook_url {
            Some(url) => Arc::new(WebhookSheetMirror::new(client, url.clone())),
            None => Arc::new(NoopSheetMirror),
        };

        Ok(Self::new(calendar, catalog, timezone, store)
            .with_notifier(notifier)
            .with_sheet_mirror(sheets))
    }

    pub fn catalog(&self) -> &UnitCatalog {
        &self.catalog
    }

    pub fn calendar(&self) -> &CalendarRules {
        &self.calendar
    }

    pub fn timezone(&self) -> BusinessTimezone {
        self.timezone
    }

    /// Fresh occupancy index; every call reads the store again.
    pub async fn snapshot(&self) -> Result<AvailabilityIndex, IntakeError> {
        let reservations = self
            .store
            .occupying_reservations()
            .instrument(info_span!("reservation_snapshot"))
            .await?;
        Ok(AvailabilityIndex::new(reservations, &self.timezone))
    }

    pub async fn preview(
        &self,
        unit_id: Option<&UnitId>,
        event_start: Option<NaiveDate>,
        event_end: Option<NaiveDate>,
    ) -> Result<Preview, IntakeError> {
        if let Some(unit_id) = unit_id {
            if !self.catalog.contains(unit_id) {
                return Err(IntakeError::UnknownUnit(unit_id.to_string()));
            }
        }
        let index = self.snapshot().await?;
        let resolution = WindowResolver::new(&self.calendar, &index).resolve(unit_id, event_start, event_end)?;
        let can_submit = can_submit(resolution.window(), &resolution.conflict_report());
        let booked = unit_id
            .map(|unit_id| {
                index
                    .spans(unit_id)
                    .iter()
                    .map(|span| BookedSpan {
                        pickup_date: span.pickup_date,
                        return_date: span.return_date,
                        label: span.label(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Preview {
            resolution,
            can_submit,
            booked,
        })
    }

    pub fn off_days(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<OffDay>, IntakeError> {
        Ok(self.calendar.off_days_between(from, to)?)
    }

    /// Validates against a freshly read snapshot, persists, then notifies and
    /// mirrors. Only validation and persistence can fail the submission.
    pub async fn submit(&self, request: BookingRequest) -> Result<BookingOutcome, IntakeError> {
        let span = info_span!("submit_booking", unit_id = %request.unit_id);
        async move {
            let index = self.snapshot().await?;
            let resolver = WindowResolver::new(&self.calendar, &index);
            let window = BookingValidator::new(&self.catalog).gate(&request, &resolver)?;

            let record = BookingRecord::pending(request, window, &self.timezone, self.next_timestamp());
            self.store.insert_booking(&record).await?;
            info!(
                request_id = %record.request_id,
                pickup_date = %record.window.pickup_date,
                return_date = %record.window.return_date,
                "booking accepted"
            );

            let notified = self.notify_received(&record).await;
            let mirrored = self.sheets.enabled()
                && match self.sheets.append_booking(&record).await {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(request_id = %record.request_id, error = %err, "sheet mirror append failed");
                        false
                    }
                };
            Ok(BookingOutcome {
                record,
                notified,
                mirrored,
            })
        }
        .instrument(span)
        .await
    }

    /// Strictly increasing per process, so request ids derived from it do
    /// not repeat within the same millisecond.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_millis();
        let step = |last: i64| now.max(last + 1);
        let millis = match self
            .last_millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(step(last)))
        {
            Ok(last) | Err(last) => step(last),
        };
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    async fn notify_received(&self, record: &BookingRecord) -> bool {
        if !self.notifier.enabled() {
            return false;
        }
        let Some(admin) = self.catalog.admin(&record.request.inform_to) else {
            warn!(
                request_id = %record.request_id,
                inform_to = %record.request.inform_to,
                "no admin contact to notify"
            );
            return false;
        };
        match self.notifier.booking_received(record, admin).await {
            Ok(()) => true,
            Err(err) => {
                warn!(request_id = %record.request_id, error = %err, "booking notification failed");
                false
            }
        }
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<BookingRecord>, IntakeError> {
        Ok(self.store.list_bookings(limit).await?)
    }

    pub async fn get(&self, request_id: &str) -> Result<BookingRecord, IntakeError> {
        Ok(self.store.get_booking(request_id).await?)
    }

    pub async fn decide(&self, request_id: &str, decision: AdminDecision) -> Result<BookingOutcome, IntakeError> {
        let record = self
            .store
            .apply_decision(request_id, &decision, Utc::now())
            .instrument(info_span!("apply_decision", request_id))
            .await?;
        info!(request_id, status = %record.status, "booking decided");

        let notified = match record.status {
            _ if !self.notifier.enabled() => false,
            ReservationStatus::Pending => false,
            ReservationStatus::Approved | ReservationStatus::Rejected => {
                match self.notifier.decision_made(&record).await {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(request_id, error = %err, "decision notification failed");
                        false
                    }
                }
            }
        };
        let mirrored = self.sheets.enabled()
            && match self.sheets.update_decision(&record).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(request_id, error = %err, "sheet mirror update failed");
                    false
                }
            };
        Ok(BookingOutcome {
            record,
            notified,
            mirrored,
        })
    }
}
