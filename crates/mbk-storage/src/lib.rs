//! Reservation snapshots and booking persistence.
//!
//! Two implementations share the same contracts: [`MemoryStore`] for tests and
//! database-less runs, and [`PgStore`] backed by Postgres through sqlx.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mbk_core::{AdminDecision, BookingRecord, ConflictReport, Reservation, UnitId};
use thiserror::Error;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "mbk-storage";

/// Default page size for booking listings.
pub const DEFAULT_LIST_LIMIT: usize = 200;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Conflict(ConflictReport),
    #[error("booking {0} not found")]
    NotFound(String),
    #[error("booking {0} already exists")]
    Duplicate(String),
    #[error("stored booking {id} is unreadable: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Snapshot of every reservation that currently holds a unit.
#[async_trait]
pub trait ReservationSource: Send + Sync {
    async fn occupying_reservations(&self) -> Result<Vec<Reservation>, StoreError>;
}

/// Write side of a submission. Implementations refuse a record whose window
/// overlaps another occupying booking on the same unit.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn insert_booking(&self, record: &BookingRecord) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DecisionStore: Send + Sync {
    /// Newest first.
    async fn list_bookings(&self, limit: usize) -> Result<Vec<BookingRecord>, StoreError>;

    async fn get_booking(&self, request_id: &str) -> Result<BookingRecord, StoreError>;

    /// Applies the decision and returns the updated record. Moving a booking
    /// back into an occupying status is refused when its window has since
    /// been taken.
    async fn apply_decision(
        &self,
        request_id: &str,
        decision: &AdminDecision,
        decided_at: DateTime<Utc>,
    ) -> Result<BookingRecord, StoreError>;
}

pub trait BookingStore: ReservationSource + SubmissionSink + DecisionStore {}

impl<T> BookingStore for T where T: ReservationSource + SubmissionSink + DecisionStore + ?Sized {}

pub(crate) fn overlap_report(unit_id: &UnitId, date: Option<NaiveDate>) -> ConflictReport {
    match date {
        Some(date) => ConflictReport::at(
            date,
            format!(
                "{unit_id} is already booked on {}. Please choose different event dates.",
                date.format("%a, %b %-d, %Y")
            ),
        ),
        None => ConflictReport {
            has_conflict: true,
            conflicting_date: None,
            message: format!(
                "{unit_id} was booked for an overlapping window in the meantime. \
                 Please choose different event dates."
            ),
        },
    }
}
