use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use mbk_core::{
    AdminDecision, AdminFields, BookingRecord, BookingRequest, BusinessTimezone, Reservation,
    ReservationStatus, ResolvedBookingWindow, UnitId,
};
use mbk_engine::AvailabilityIndex;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::{overlap_report, DecisionStore, ReservationSource, StoreError, SubmissionSink};

const EXCLUSION_VIOLATION: &str = "23P01";
const UNIQUE_VIOLATION: &str = "23505";

const BOOKING_COLUMNS: &str = r#"
    id, request_id, machine_unit, event_start, event_end, pickup_date, return_date,
    pickup_at, return_at, tz_offset_seconds, request_status, request_json, admin_json,
    created_at, updated_at
"#;

/// Postgres-backed store. Overlaps are refused by the table's exclusion
/// constraint, so the guarantee holds across processes.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    timezone: BusinessTimezone,
}

impl PgStore {
    pub fn new(pool: PgPool, timezone: BusinessTimezone) -> Self {
        Self { pool, timezone }
    }

    pub async fn connect(database_url: &str, timezone: BusinessTimezone) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self::new(pool, timezone))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("running database migrations")?;
        Ok(())
    }

    /// Turns a constraint violation into a conflict naming the first taken
    /// day, looked up against the current table contents.
    async fn explain_overlap(&self, record: &BookingRecord) -> StoreError {
        let unit_id = &record.window.unit_id;
        let date = match self.occupying_reservations().await {
            Ok(reservations) => AvailabilityIndex::new(reservations, &self.timezone)
                .excluding(record.id)
                .first_conflict(unit_id, record.window.pickup_date, record.window.return_date),
            Err(err) => {
                tracing::warn!(error = %err, "could not reload reservations after overlap");
                None
            }
        };
        StoreError::Conflict(overlap_report(unit_id, date))
    }
}

fn violates(err: &sqlx::Error, code: &str) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(code))
}

fn corrupt(id: &str, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

fn record_from_row(row: &PgRow) -> Result<BookingRecord, StoreError> {
    let request_id: String = row.try_get("request_id")?;
    let offset_seconds: i32 = row.try_get("tz_offset_seconds")?;
    let offset = FixedOffset::east_opt(offset_seconds)
        .ok_or_else(|| corrupt(&request_id, format!("offset {offset_seconds}s out of range")))?;

    let status: String = row.try_get("request_status")?;
    let status: ReservationStatus = status.parse().map_err(|e| corrupt(&request_id, e))?;

    let request_json: serde_json::Value = row.try_get("request_json")?;
    let request: BookingRequest =
        serde_json::from_value(request_json).map_err(|e| corrupt(&request_id, e))?;
    let admin_json: serde_json::Value = row.try_get("admin_json")?;
    let admin: AdminFields = serde_json::from_value(admin_json).map_err(|e| corrupt(&request_id, e))?;

    let pickup_at: DateTime<Utc> = row.try_get("pickup_at")?;
    let return_at: DateTime<Utc> = row.try_get("return_at")?;
    let machine_unit: String = row.try_get("machine_unit")?;

    Ok(BookingRecord {
        id: row.try_get("id")?,
        window: ResolvedBookingWindow {
            unit_id: UnitId::new(machine_unit),
            event_start: row.try_get::<NaiveDate, _>("event_start")?,
            event_end: row.try_get::<NaiveDate, _>("event_end")?,
            pickup_date: row.try_get::<NaiveDate, _>("pickup_date")?,
            return_date: row.try_get::<NaiveDate, _>("return_date")?,
        },
        request_id,
        request,
        pickup_at: pickup_at.with_timezone(&offset),
        return_at: return_at.with_timezone(&offset),
        status,
        admin,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn to_json<T: serde::Serialize>(id: &str, value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| corrupt(id, e))
}

#[async_trait]
impl ReservationSource for PgStore {
    async fn occupying_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, machine_unit, pickup_at, return_at, tz_offset_seconds, request_status
              FROM booking_requests
             WHERE request_status IN ('Pending', 'Approved')
             ORDER BY machine_unit, pickup_date
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id")?;
            let offset_seconds: i32 = row.try_get("tz_offset_seconds")?;
            let offset = FixedOffset::east_opt(offset_seconds).unwrap_or(self.timezone.offset());
            let status: String = row.try_get("request_status")?;
            let pickup_at: DateTime<Utc> = row.try_get("pickup_at")?;
            let return_at: DateTime<Utc> = row.try_get("return_at")?;
            let machine_unit: String = row.try_get("machine_unit")?;
            out.push(Reservation {
                id,
                unit_id: UnitId::new(machine_unit),
                pickup_at: pickup_at.with_timezone(&offset),
                return_at: return_at.with_timezone(&offset),
                status: status.parse().map_err(|e| corrupt(&id.to_string(), e))?,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl SubmissionSink for PgStore {
    async fn insert_booking(&self, record: &BookingRecord) -> Result<(), StoreError> {
        let span = info_span!(
            "insert_booking",
            request_id = %record.request_id,
            unit_id = %record.window.unit_id
        );
        let result = sqlx::query(
            r#"
            INSERT INTO booking_requests (
                id, request_id, machine_unit, event_start, event_end, pickup_date, return_date,
                pickup_at, return_at, tz_offset_seconds, request_status, employee_name, email,
                request_json, admin_json, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(record.id)
        .bind(&record.request_id)
        .bind(record.window.unit_id.as_str())
        .bind(record.window.event_start)
        .bind(record.window.event_end)
        .bind(self.timezone.date_of(&record.pickup_at))
        .bind(self.timezone.date_of(&record.return_at))
        .bind(record.pickup_at.with_timezone(&Utc))
        .bind(record.return_at.with_timezone(&Utc))
        .bind(record.pickup_at.offset().local_minus_utc())
        .bind(record.status.as_str())
        .bind(&record.request.employee_name)
        .bind(&record.request.email)
        .bind(to_json(&record.request_id, &record.request)?)
        .bind(to_json(&record.request_id, &record.admin)?)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .instrument(span)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if violates(&err, EXCLUSION_VIOLATION) => Err(self.explain_overlap(record).await),
            Err(err) if violates(&err, UNIQUE_VIOLATION) => {
                Err(StoreError::Duplicate(record.request_id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl DecisionStore for PgStore {
    async fn list_bookings(&self, limit: usize) -> Result<Vec<BookingRecord>, StoreError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM booking_requests ORDER BY created_at DESC LIMIT $1");
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn get_booking(&self, request_id: &str) -> Result<BookingRecord, StoreError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM booking_requests WHERE request_id = $1");
        let row = sqlx::query(&sql)
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        record_from_row(&row)
    }

    async fn apply_decision(
        &self,
        request_id: &str,
        decision: &AdminDecision,
        decided_at: DateTime<Utc>,
    ) -> Result<BookingRecord, StoreError> {
        let mut record = self.get_booking(request_id).await?;
        record.apply_decision(decision, decided_at);

        let result = sqlx::query(
            r#"
            UPDATE booking_requests
               SET request_status = $2,
                   admin_json = $3,
                   updated_at = $4
             WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .bind(record.status.as_str())
        .bind(to_json(request_id, &record.admin)?)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(StoreError::NotFound(request_id.to_string())),
            Ok(_) => Ok(record),
            Err(err) if violates(&err, EXCLUSION_VIOLATION) => Err(self.explain_overlap(&record).await),
            Err(err) => Err(err.into()),
        }
    }
}
