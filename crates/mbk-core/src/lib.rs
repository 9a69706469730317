//! Core domain model for machine-unit bookings.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "mbk-core";

/// Offset used when no business timezone is configured (Myanmar Standard Time).
pub const DEFAULT_OFFSET_SECONDS: i32 = 6 * 3600 + 30 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid UTC offset {0:?}, expected e.g. +06:30")]
    InvalidOffset(String),
    #[error("invalid time slot {0:?}, expected HH:00 between 09:00 and 16:00")]
    InvalidTimeSlot(String),
    #[error("unknown reservation status {0:?}")]
    UnknownStatus(String),
}

/// Identifier of a physical machine unit, e.g. `SCM-001-YGN`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReservationStatus {
    /// Pending and approved bookings hold the unit; rejected ones never do.
    pub fn occupies(self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Pending" | "pending" => Ok(Self::Pending),
            "Approved" | "approved" => Ok(Self::Approved),
            "Rejected" | "rejected" => Ok(Self::Rejected),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// The fixed offset in which instants are normalized to calendar dates.
///
/// Every date-only comparison (pickup, return, holiday lookups) works on the
/// calendar date an instant falls on in this offset, never on the instant's
/// own offset or on UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessTimezone {
    offset: FixedOffset,
}

impl BusinessTimezone {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn date_of<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    pub fn instant_at(&self, date: NaiveDate, slot: TimeSlot) -> DateTime<FixedOffset> {
        let local = date.and_time(slot.time());
        let utc = local - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        DateTime::from_naive_utc_and_offset(utc, self.offset)
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

impl Default for BusinessTimezone {
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(DEFAULT_OFFSET_SECONDS).unwrap_or_else(|| Utc.fix()),
        }
    }
}

impl FromStr for BusinessTimezone {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if matches!(raw, "Z" | "z" | "UTC" | "utc") {
            return Ok(Self::new(Utc.fix()));
        }
        let invalid = || CoreError::InvalidOffset(raw.to_string());
        let (sign, rest) = match raw.as_bytes().first() {
            Some(b'+') => (1, &raw[1..]),
            Some(b'-') => (-1, &raw[1..]),
            _ => return Err(invalid()),
        };
        let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
        let hours: i32 = hours.parse().map_err(|_| invalid())?;
        let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
        if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
            return Err(invalid());
        }
        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(Self::new)
            .ok_or_else(invalid)
    }
}

/// Hourly pickup/return slot between 09:00 and 16:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSlot {
    hour: u32,
}

impl TimeSlot {
    pub const FIRST_HOUR: u32 = 9;
    pub const LAST_HOUR: u32 = 16;

    pub fn at_hour(hour: u32) -> Result<Self, CoreError> {
        if (Self::FIRST_HOUR..=Self::LAST_HOUR).contains(&hour) {
            Ok(Self { hour })
        } else {
            Err(CoreError::InvalidTimeSlot(format!("{hour:02}:00")))
        }
    }

    pub fn all() -> impl Iterator<Item = TimeSlot> {
        (Self::FIRST_HOUR..=Self::LAST_HOUR).map(|hour| TimeSlot { hour })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, 0, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl Default for TimeSlot {
    fn default() -> Self {
        Self {
            hour: Self::FIRST_HOUR,
        }
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:00", self.hour)
    }
}

impl FromStr for TimeSlot {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidTimeSlot(s.to_string());
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        if minute != "00" {
            return Err(invalid());
        }
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        Self::at_hour(hour).map_err(|_| invalid())
    }
}

impl TryFrom<String> for TimeSlot {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeSlot> for String {
    fn from(value: TimeSlot) -> Self {
        value.to_string()
    }
}

/// A booking as seen by the availability index: who holds which unit, when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub unit_id: UnitId,
    pub pickup_at: DateTime<FixedOffset>,
    pub return_at: DateTime<FixedOffset>,
    pub status: ReservationStatus,
}

/// Intended usage span of a unit, in calendar dates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindow {
    pub unit_id: UnitId,
    pub event_start: NaiveDate,
    pub event_end: NaiveDate,
}

impl EventWindow {
    pub fn new(unit_id: UnitId, event_start: NaiveDate, event_end: NaiveDate) -> Self {
        Self {
            unit_id,
            event_start,
            event_end,
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.event_end >= self.event_start
    }
}

/// Pickup and return dates derived for an event window, already shifted onto
/// working days and checked against existing bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedBookingWindow {
    pub unit_id: UnitId,
    pub event_start: NaiveDate,
    pub event_end: NaiveDate,
    pub pickup_date: NaiveDate,
    pub return_date: NaiveDate,
}

impl ResolvedBookingWindow {
    /// Number of calendar days the unit is held, pickup and return included.
    pub fn held_days(&self) -> i64 {
        (self.return_date - self.pickup_date).num_days() + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConflictReport {
    pub has_conflict: bool,
    pub conflicting_date: Option<NaiveDate>,
    pub message: String,
}

impl ConflictReport {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn at(date: NaiveDate, message: impl Into<String>) -> Self {
        Self {
            has_conflict: true,
            conflicting_date: Some(date),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_conflict {
            f.write_str(&self.message)
        } else {
            f.write_str("no conflict")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminContact {
    pub key: String,
    pub display_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitEntry {
    pub id: UnitId,
    pub label: String,
    #[serde(default)]
    pub home_admin: Option<String>,
}

/// Closed set of bookable units and the admins requests can be routed to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnitCatalog {
    pub units: Vec<UnitEntry>,
    #[serde(default)]
    pub admins: Vec<AdminContact>,
}

impl UnitCatalog {
    pub fn new(units: Vec<UnitEntry>, admins: Vec<AdminContact>) -> Self {
        Self { units, admins }
    }

    pub fn contains(&self, unit_id: &UnitId) -> bool {
        self.unit(unit_id).is_some()
    }

    pub fn unit(&self, unit_id: &UnitId) -> Option<&UnitEntry> {
        self.units.iter().find(|u| &u.id == unit_id)
    }

    pub fn admin(&self, key: &str) -> Option<&AdminContact> {
        self.admins.iter().find(|a| a.key == key)
    }
}

/// Booking form as submitted by a requester. Dates stay optional because an
/// incomplete form is a normal state, not a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub employee_name: String,
    pub department: String,
    pub position: String,
    pub phone_number: String,
    pub email: String,
    pub event_name: String,
    pub location: String,
    pub expected_users: u32,
    pub unit_id: UnitId,
    #[serde(default)]
    pub event_start: Option<NaiveDate>,
    #[serde(default)]
    pub event_end: Option<NaiveDate>,
    #[serde(default)]
    pub pickup_time: Option<TimeSlot>,
    #[serde(default)]
    pub return_time: Option<TimeSlot>,
    pub inform_to: String,
    #[serde(default)]
    pub used_before: bool,
    #[serde(default = "default_need_training")]
    pub need_training: bool,
    #[serde(default)]
    pub special_requirements: Option<String>,
}

fn default_need_training() -> bool {
    true
}

/// Fields filled in by an admin while reviewing a booking.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdminFields {
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub admin_notes: Option<String>,
    #[serde(default)]
    pub condition_pickup: Option<String>,
    #[serde(default)]
    pub condition_return: Option<String>,
    #[serde(default)]
    pub return_notes: Option<String>,
    #[serde(default)]
    pub actual_return_at: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminDecision {
    pub status: ReservationStatus,
    #[serde(flatten)]
    pub fields: AdminFields,
}

/// Persisted booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: Uuid,
    pub request_id: String,
    pub request: BookingRequest,
    pub window: ResolvedBookingWindow,
    pub pickup_at: DateTime<FixedOffset>,
    pub return_at: DateTime<FixedOffset>,
    pub status: ReservationStatus,
    pub admin: AdminFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingRecord {
    /// Build a pending record for a window that has passed validation.
    pub fn pending(
        request: BookingRequest,
        window: ResolvedBookingWindow,
        timezone: &BusinessTimezone,
        created_at: DateTime<Utc>,
    ) -> Self {
        let pickup_at = timezone.instant_at(window.pickup_date, request.pickup_time.unwrap_or_default());
        let return_at = timezone.instant_at(window.return_date, request.return_time.unwrap_or_default());
        Self {
            id: Uuid::new_v4(),
            request_id: request_id_for(created_at),
            request,
            window,
            pickup_at,
            return_at,
            status: ReservationStatus::Pending,
            admin: AdminFields::default(),
            created_at,
            updated_at: created_at,
        }
    }

    pub fn reservation(&self) -> Reservation {
        Reservation {
            id: self.id,
            unit_id: self.window.unit_id.clone(),
            pickup_at: self.pickup_at,
            return_at: self.return_at,
            status: self.status,
        }
    }

    /// Sets the decided status and overlays the admin fields that were given.
    pub fn apply_decision(&mut self, decision: &AdminDecision, at: DateTime<Utc>) {
        self.status = decision.status;
        self.admin.overlay(&decision.fields);
        self.updated_at = at;
    }
}

impl AdminFields {
    /// Copies every field that is set in `update`; unset fields keep their value.
    pub fn overlay(&mut self, update: &AdminFields) {
        fn take(slot: &mut Option<String>, value: &Option<String>) {
            if let Some(value) = value {
                *slot = Some(value.clone());
            }
        }
        take(&mut self.approved_by, &update.approved_by);
        take(&mut self.admin_notes, &update.admin_notes);
        take(&mut self.condition_pickup, &update.condition_pickup);
        take(&mut self.condition_return, &update.condition_return);
        take(&mut self.return_notes, &update.return_notes);
        if update.actual_return_at.is_some() {
            self.actual_return_at = update.actual_return_at;
        }
    }
}

/// `REQ-` followed by the last eight digits of the millisecond timestamp.
pub fn request_id_for(at: DateTime<Utc>) -> String {
    let millis = at.timestamp_millis().unsigned_abs().to_string();
    let tail = &millis[millis.len().saturating_sub(8)..];
    format!("REQ-{tail}")
}
