use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mbk_core::{AdminDecision, BookingRecord, BusinessTimezone, Reservation};
use mbk_engine::AvailabilityIndex;
use tokio::sync::Mutex;

use crate::{overlap_report, DecisionStore, ReservationSource, StoreError, SubmissionSink};

/// Process-local store. The overlap check and the write happen under one lock,
/// so two concurrent submissions for the same days cannot both land.
#[derive(Debug, Default)]
pub struct MemoryStore {
    timezone: BusinessTimezone,
    records: Mutex<Vec<BookingRecord>>,
}

impl MemoryStore {
    pub fn new(timezone: BusinessTimezone) -> Self {
        Self {
            timezone,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Seeds the store without overlap checks, e.g. with fixtures.
    pub fn with_records(timezone: BusinessTimezone, records: Vec<BookingRecord>) -> Self {
        Self {
            timezone,
            records: Mutex::new(records),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_free(
        &self,
        index: &AvailabilityIndex,
        record: &BookingRecord,
    ) -> Result<(), StoreError> {
        let unit_id = &record.window.unit_id;
        let pickup = self.timezone.date_of(&record.pickup_at);
        let ret = self.timezone.date_of(&record.return_at);
        match index.first_conflict(unit_id, pickup, ret) {
            Some(date) => Err(StoreError::Conflict(overlap_report(unit_id, Some(date)))),
            None => Ok(()),
        }
    }
}

fn index_of(records: &[BookingRecord], timezone: &BusinessTimezone) -> AvailabilityIndex {
    AvailabilityIndex::new(records.iter().map(BookingRecord::reservation), timezone)
}

#[async_trait]
impl ReservationSource for MemoryStore {
    async fn occupying_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|r| r.status.occupies())
            .map(BookingRecord::reservation)
            .collect())
    }
}

#[async_trait]
impl SubmissionSink for MemoryStore {
    async fn insert_booking(&self, record: &BookingRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if records
            .iter()
            .any(|r| r.id == record.id || r.request_id == record.request_id)
        {
            return Err(StoreError::Duplicate(record.request_id.clone()));
        }
        if record.status.occupies() {
            self.check_free(&index_of(&records, &self.timezone), record)?;
        }
        records.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl DecisionStore for MemoryStore {
    async fn list_bookings(&self, limit: usize) -> Result<Vec<BookingRecord>, StoreError> {
        let records = self.records.lock().await;
        let mut out = records.clone();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn get_booking(&self, request_id: &str) -> Result<BookingRecord, StoreError> {
        let records = self.records.lock().await;
        records
            .iter()
            .find(|r| r.request_id == request_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))
    }

    async fn apply_decision(
        &self,
        request_id: &str,
        decision: &AdminDecision,
        decided_at: DateTime<Utc>,
    ) -> Result<BookingRecord, StoreError> {
        let mut records = self.records.lock().await;
        let pos = records
            .iter()
            .position(|r| r.request_id == request_id)
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;

        let mut updated = records[pos].clone();
        updated.apply_decision(decision, decided_at);
        if updated.status.occupies() && !records[pos].status.occupies() {
            let others = index_of(&records, &self.timezone).excluding(updated.id);
            self.check_free(&others, &updated)?;
        }
        records[pos] = updated.clone();
        Ok(updated)
    }
}
