//! Booking intake: configuration, catalog and holiday loading, and the
//! service that ties the engine to storage and notifications.

use mbk_core::ConflictReport;
use mbk_engine::{CalendarError, FieldErrors, InvalidWindow, Rejection};
use mbk_storage::StoreError;
use thiserror::Error;

mod config;
mod service;

pub use config::{load_catalog, load_holidays, IntakeConfig, DEFAULT_MAIL_FROM, HOLIDAYS_FILE, UNITS_FILE};
pub use service::{BookedSpan, BookingOutcome, BookingService, Preview};

pub const CRATE_NAME: &str = "mbk-intake";

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("invalid booking fields: {0}")]
    Fields(FieldErrors),
    #[error("event start and end dates are required")]
    Incomplete,
    #[error(transparent)]
    InvalidWindow(#[from] InvalidWindow),
    #[error("unknown machine unit {0}")]
    UnknownUnit(String),
    #[error(transparent)]
    Calendar(#[from] CalendarError),
    #[error("{0}")]
    Conflict(ConflictReport),
    #[error("booking {0} not found")]
    NotFound(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("store failure: {0}")]
    Store(StoreError),
}

impl From<Rejection> for IntakeError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Fields(errors) => Self::Fields(errors),
            Rejection::Incomplete => Self::Incomplete,
            Rejection::Invalid(window) => Self::InvalidWindow(window),
            Rejection::Conflict(report) => Self::Conflict(report),
        }
    }
}

impl From<StoreError> for IntakeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(report) => Self::Conflict(report),
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}
