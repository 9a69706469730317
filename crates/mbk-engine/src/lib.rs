//! Availability and date-conflict resolution for machine-unit bookings.
//!
//! The pieces compose leaves-first: [`CalendarRules`] knows which days staff
//! can hand a unit over, [`AvailabilityIndex`] knows which days a unit is
//! already held, [`WindowResolver`] turns an event window into pickup/return
//! dates and checks them, and [`BookingValidator`] gates the final submit.
//! Everything here is synchronous and free of I/O.

pub mod availability;
pub mod calendar;
pub mod resolver;
pub mod validator;

pub use availability::{AvailabilityIndex, OccupiedSpan};
pub use calendar::{CalendarError, CalendarRules, Direction, Holiday, HolidayRule, HolidayTable, OffDay, OffDayReason};
pub use resolver::{InvalidWindow, Resolution, ResolveError, SelectionState, WindowResolver};
pub use validator::{can_submit, BookingValidator, FieldError, FieldErrors, Rejection};

pub const CRATE_NAME: &str = "mbk-engine";
