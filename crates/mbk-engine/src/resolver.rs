//! Event window -> pickup/return dates -> conflict check.

use chrono::NaiveDate;
use mbk_core::{ConflictReport, EventWindow, ResolvedBookingWindow, UnitId};
use serde::Serialize;
use thiserror::Error;

use crate::availability::AvailabilityIndex;
use crate::calendar::{CalendarRules, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event end {end} is before event start {start}")]
pub struct InvalidWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Invalid(#[from] InvalidWindow),
    #[error("{0}")]
    Conflict(ConflictReport),
}

/// Outcome of resolving a possibly incomplete selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Resolution {
    /// No event start yet; nothing can be derived.
    Undefined,
    /// Pickup is known but the end date or the unit is still missing, so the
    /// window has not been checked against bookings.
    Provisional {
        pickup_date: NaiveDate,
        return_date: Option<NaiveDate>,
    },
    Resolved(ResolvedBookingWindow),
    Conflict {
        pickup_date: NaiveDate,
        return_date: NaiveDate,
        report: ConflictReport,
    },
}

impl Resolution {
    pub fn window(&self) -> Option<&ResolvedBookingWindow> {
        match self {
            Self::Resolved(window) => Some(window),
            _ => None,
        }
    }

    /// The conflict report for this outcome; empty unless it is a conflict.
    pub fn conflict_report(&self) -> ConflictReport {
        match self {
            Self::Conflict { report, .. } => report.clone(),
            _ => ConflictReport::none(),
        }
    }

    pub fn pickup_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Undefined => None,
            Self::Provisional { pickup_date, .. } | Self::Conflict { pickup_date, .. } => Some(*pickup_date),
            Self::Resolved(window) => Some(window.pickup_date),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WindowResolver<'a> {
    calendar: &'a CalendarRules,
    index: &'a AvailabilityIndex,
}

impl<'a> WindowResolver<'a> {
    pub fn new(calendar: &'a CalendarRules, index: &'a AvailabilityIndex) -> Self {
        Self { calendar, index }
    }

    /// Working day at or before the day preceding the event.
    pub fn pickup_for(&self, event_start: NaiveDate) -> NaiveDate {
        let day_before = event_start.pred_opt().unwrap_or(event_start);
        self.calendar.nearest_working_day(day_before, Direction::Backward)
    }

    /// Working day at or after the day following the event.
    pub fn return_for(&self, event_end: NaiveDate) -> NaiveDate {
        let day_after = event_end.succ_opt().unwrap_or(event_end);
        self.calendar.nearest_working_day(day_after, Direction::Forward)
    }

    /// Resolves whatever has been selected so far. Every call starts from
    /// scratch; nothing is carried over from earlier calls.
    pub fn resolve(
        &self,
        unit_id: Option<&UnitId>,
        event_start: Option<NaiveDate>,
        event_end: Option<NaiveDate>,
    ) -> Result<Resolution, InvalidWindow> {
        let Some(start) = event_start else {
            return Ok(Resolution::Undefined);
        };
        if let Some(end) = event_end {
            if end < start {
                return Err(InvalidWindow { start, end });
            }
        }

        let pickup_date = self.pickup_for(start);
        let (Some(unit_id), Some(end)) = (unit_id, event_end) else {
            return Ok(Resolution::Provisional {
                pickup_date,
                return_date: event_end.map(|end| self.return_for(end)),
            });
        };
        let return_date = self.return_for(end);

        match self.index.first_conflict(unit_id, pickup_date, return_date) {
            Some(conflict) => {
                tracing::debug!(%unit_id, %pickup_date, %return_date, %conflict, "booking window conflicts");
                Ok(Resolution::Conflict {
                    pickup_date,
                    return_date,
                    report: ConflictReport::at(
                        conflict,
                        conflict_message(unit_id, conflict, pickup_date, return_date),
                    ),
                })
            }
            None => Ok(Resolution::Resolved(ResolvedBookingWindow {
                unit_id: unit_id.clone(),
                event_start: start,
                event_end: end,
                pickup_date,
                return_date,
            })),
        }
    }

    /// Resolves a complete window, treating a conflict as an error.
    pub fn resolve_window(&self, window: &EventWindow) -> Result<ResolvedBookingWindow, ResolveError> {
        match self.resolve(Some(&window.unit_id), Some(window.event_start), Some(window.event_end))? {
            Resolution::Resolved(resolved) => Ok(resolved),
            Resolution::Conflict { report, .. } => Err(ResolveError::Conflict(report)),
            // A complete window always reaches one of the two arms above.
            Resolution::Undefined | Resolution::Provisional { .. } => {
                Err(ResolveError::Invalid(InvalidWindow {
                    start: window.event_start,
                    end: window.event_end,
                }))
            }
        }
    }
}

fn conflict_message(unit_id: &UnitId, conflict: NaiveDate, pickup: NaiveDate, ret: NaiveDate) -> String {
    const FMT: &str = "%a, %b %-d, %Y";
    format!(
        "{unit_id} is already booked on {}. The machine would be picked up on {} and returned on {}, \
         which overlaps an existing booking. Please choose different event dates.",
        conflict.format(FMT),
        pickup.format(FMT),
        ret.format(FMT),
    )
}

/// Selection held by a caller across edits. A new start date drops the end
/// date. Nothing derived is kept: every `resolve` call works against the
/// snapshot behind the resolver it is given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    unit_id: Option<UnitId>,
    event_start: Option<NaiveDate>,
    event_end: Option<NaiveDate>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit_id(&self) -> Option<&UnitId> {
        self.unit_id.as_ref()
    }

    pub fn event_start(&self) -> Option<NaiveDate> {
        self.event_start
    }

    pub fn event_end(&self) -> Option<NaiveDate> {
        self.event_end
    }

    pub fn set_unit(&mut self, unit_id: Option<UnitId>) {
        self.unit_id = unit_id;
    }

    pub fn set_start(&mut self, event_start: Option<NaiveDate>) {
        if self.event_start != event_start {
            self.event_end = None;
        }
        self.event_start = event_start;
    }

    /// Rejects an end before the current start, mirroring a range picker
    /// that never offers such dates.
    pub fn set_end(&mut self, event_end: Option<NaiveDate>) -> Result<(), InvalidWindow> {
        if let (Some(start), Some(end)) = (self.event_start, event_end) {
            if end < start {
                return Err(InvalidWindow { start, end });
            }
        }
        self.event_end = event_end;
        Ok(())
    }

    pub fn resolve(&self, resolver: &WindowResolver<'_>) -> Result<Resolution, InvalidWindow> {
        resolver.resolve(self.unit_id.as_ref(), self.event_start, self.event_end)
    }
}
