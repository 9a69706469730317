//! Read-only occupancy index over a point-in-time reservation snapshot.

use std::collections::HashMap;

use chrono::NaiveDate;
use mbk_core::{BusinessTimezone, Reservation, UnitId};
use serde::Serialize;
use uuid::Uuid;

/// The calendar days one reservation holds its unit, both ends inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccupiedSpan {
    pub reservation_id: Uuid,
    pub pickup_date: NaiveDate,
    pub return_date: NaiveDate,
}

impl OccupiedSpan {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.pickup_date <= date && date <= self.return_date
    }

    /// Short explanation for a blocked day, e.g. `Booked: Jun 10 - Jun 12`.
    pub fn label(&self) -> String {
        format!(
            "Booked: {} - {}",
            self.pickup_date.format("%b %-d"),
            self.return_date.format("%b %-d")
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct AvailabilityIndex {
    by_unit: HashMap<UnitId, Vec<OccupiedSpan>>,
}

impl AvailabilityIndex {
    /// Builds the index from a reservation snapshot. Reservations whose status
    /// does not hold the unit are dropped here, so callers may pass the full
    /// table.
    pub fn new(reservations: impl IntoIterator<Item = Reservation>, timezone: &BusinessTimezone) -> Self {
        let mut by_unit: HashMap<UnitId, Vec<OccupiedSpan>> = HashMap::new();
        for reservation in reservations {
            if !reservation.status.occupies() {
                continue;
            }
            let mut pickup_date = timezone.date_of(&reservation.pickup_at);
            let mut return_date = timezone.date_of(&reservation.return_at);
            if return_date < pickup_date {
                tracing::warn!(
                    reservation_id = %reservation.id,
                    unit_id = %reservation.unit_id,
                    %pickup_date,
                    %return_date,
                    "reservation returns before pickup; indexing the swapped span"
                );
                std::mem::swap(&mut pickup_date, &mut return_date);
            }
            by_unit.entry(reservation.unit_id).or_default().push(OccupiedSpan {
                reservation_id: reservation.id,
                pickup_date,
                return_date,
            });
        }
        for spans in by_unit.values_mut() {
            spans.sort_by_key(|s| (s.pickup_date, s.return_date, s.reservation_id));
        }
        Self { by_unit }
    }

    pub fn len(&self) -> usize {
        self.by_unit.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn spans(&self, unit_id: &UnitId) -> &[OccupiedSpan] {
        self.by_unit.get(unit_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_occupied(&self, unit_id: &UnitId, date: NaiveDate) -> bool {
        self.booking_at(unit_id, date).is_some()
    }

    /// The earliest-starting reservation holding `unit_id` on `date`.
    pub fn booking_at(&self, unit_id: &UnitId, date: NaiveDate) -> Option<&OccupiedSpan> {
        self.spans(unit_id).iter().find(|span| span.contains(date))
    }

    /// First occupied date in `start..=end`, scanning in ascending order.
    pub fn first_conflict(&self, unit_id: &UnitId, start: NaiveDate, end: NaiveDate) -> Option<NaiveDate> {
        if self.spans(unit_id).is_empty() {
            return None;
        }
        start
            .iter_days()
            .take_while(|day| *day <= end)
            .find(|day| self.is_occupied(unit_id, *day))
    }

    /// Copy of the index without one reservation, so a booking can be
    /// checked against everything except itself.
    pub fn excluding(&self, reservation_id: Uuid) -> Self {
        let by_unit = self
            .by_unit
            .iter()
            .map(|(unit, spans)| {
                let kept = spans
                    .iter()
                    .filter(|span| span.reservation_id != reservation_id)
                    .cloned()
                    .collect();
                (unit.clone(), kept)
            })
            .collect();
        Self { by_unit }
    }
}
