//! Final submission gate: form field constraints plus the resolved window.

use std::fmt;

use mbk_core::{BookingRequest, ConflictReport, ResolvedBookingWindow, UnitCatalog};
use serde::Serialize;
use thiserror::Error;

use crate::resolver::{InvalidWindow, Resolution, WindowResolver};

/// True iff a window was resolved and nothing conflicts with it.
pub fn can_submit(window: Option<&ResolvedBookingWindow>, conflict: &ConflictReport) -> bool {
    window.is_some() && !conflict.has_conflict
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for FieldErrors {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("invalid booking fields: {0}")]
    Fields(FieldErrors),
    #[error("event start and end dates are required")]
    Incomplete,
    #[error(transparent)]
    Invalid(#[from] InvalidWindow),
    #[error("{0}")]
    Conflict(ConflictReport),
}

pub struct BookingValidator<'a> {
    catalog: &'a UnitCatalog,
}

impl<'a> BookingValidator<'a> {
    pub fn new(catalog: &'a UnitCatalog) -> Self {
        Self { catalog }
    }

    /// Collects every field violation rather than stopping at the first.
    pub fn check_fields(&self, request: &BookingRequest) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();

        let required = [
            ("employee_name", &request.employee_name),
            ("department", &request.department),
            ("position", &request.position),
            ("phone_number", &request.phone_number),
            ("email", &request.email),
            ("event_name", &request.event_name),
            ("location", &request.location),
            ("inform_to", &request.inform_to),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                errors.push(field, "is required");
            }
        }

        if !request.email.trim().is_empty() && !looks_like_email(request.email.trim()) {
            errors.push("email", "is not a valid email address");
        }
        if request.expected_users == 0 {
            errors.push("expected_users", "must be at least 1");
        }
        if !self.catalog.contains(&request.unit_id) {
            errors.push("unit_id", format!("unknown machine unit {}", request.unit_id));
        }
        if !request.inform_to.trim().is_empty() && self.catalog.admin(&request.inform_to).is_none() {
            errors.push("inform_to", format!("unknown admin {}", request.inform_to));
        }
        if request.event_start.is_none() {
            errors.push("event_start", "is required");
        }
        if request.event_end.is_none() {
            errors.push("event_end", "is required");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Admits a resolution only when it carries a window and no conflict.
    pub fn admit(&self, resolution: &Resolution) -> Result<ResolvedBookingWindow, Rejection> {
        let report = resolution.conflict_report();
        match resolution.window() {
            Some(window) if can_submit(Some(window), &report) => Ok(window.clone()),
            _ if report.has_conflict => Err(Rejection::Conflict(report)),
            _ => Err(Rejection::Incomplete),
        }
    }

    /// Field checks, then a fresh resolution against `resolver`'s snapshot.
    pub fn gate(
        &self,
        request: &BookingRequest,
        resolver: &WindowResolver<'_>,
    ) -> Result<ResolvedBookingWindow, Rejection> {
        let fields = self.check_fields(request);
        let resolution = resolver.resolve(Some(&request.unit_id), request.event_start, request.event_end)?;
        match (fields, self.admit(&resolution)) {
            // A conflict outranks field errors.
            (_, Err(Rejection::Conflict(report))) => Err(Rejection::Conflict(report)),
            (Err(errors), _) => Err(Rejection::Fields(errors)),
            (Ok(()), admitted) => admitted,
        }
    }
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.contains(char::is_whitespace)
        && domain
            .split('.')
            .filter(|label| !label.is_empty())
            .count()
            >= 2
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::AvailabilityIndex;
    use crate::calendar::CalendarRules;
    use chrono::NaiveDate;
    use mbk_core::{AdminContact, UnitEntry, UnitId};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn catalog() -> UnitCatalog {
        UnitCatalog::new(
            vec![UnitEntry {
                id: UnitId::new("U1"),
                label: "Unit one".into(),
                home_admin: None,
            }],
            vec![AdminContact {
                key: "YGN-Admin".into(),
                display_name: "YGN Admin".into(),
                email: "admin-ygn@example.com".into(),
            }],
        )
    }

    fn request() -> BookingRequest {
        BookingRequest {
            employee_name: "Aye Aye".into(),
            department: "Marketing".into(),
            position: "Executive".into(),
            phone_number: "09 123 456".into(),
            email: "aye@example.com".into(),
            event_name: "Skin Fair".into(),
            location: "Junction City".into(),
            expected_users: 120,
            unit_id: UnitId::new("U1"),
            event_start: Some(date(2025, 6, 20)),
            event_end: Some(date(2025, 6, 21)),
            pickup_time: None,
            return_time: None,
            inform_to: "YGN-Admin".into(),
            used_before: false,
            need_training: true,
            special_requirements: None,
        }
    }

    #[test]
    fn can_submit_needs_window_and_no_conflict() {
        let window = ResolvedBookingWindow {
            unit_id: UnitId::new("U1"),
            event_start: date(2025, 6, 20),
            event_end: date(2025, 6, 21),
            pickup_date: date(2025, 6, 19),
            return_date: date(2025, 6, 23),
        };
        assert!(can_submit(Some(&window), &ConflictReport::none()));
        assert!(!can_submit(None, &ConflictReport::none()));
        assert!(!can_submit(Some(&window), &ConflictReport::at(date(2025, 6, 19), "taken")));
    }

    #[test]
    fn complete_request_passes_field_checks() {
        let catalog = catalog();
        assert_eq!(BookingValidator::new(&catalog).check_fields(&request()), Ok(()));
    }

    #[test]
    fn all_field_violations_are_collected() {
        let catalog = catalog();
        let mut req = request();
        req.employee_name = "  ".into();
        req.email = "not-an-email".into();
        req.expected_users = 0;
        req.unit_id = UnitId::new("U9");
        req.inform_to = "MDY-Admin".into();

        let errors = BookingValidator::new(&catalog).check_fields(&req).unwrap_err();
        for field in ["employee_name", "email", "expected_users", "unit_id", "inform_to"] {
            assert!(errors.has(field), "missing error for {field}: {errors}");
        }
        assert_eq!(errors.errors().len(), 5);
    }

    #[test]
    fn email_shape_check() {
        assert!(looks_like_email("a@b.co"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("@b.co"));
        assert!(!looks_like_email("a b@c.co"));
        assert!(!looks_like_email("a@@b.co"));
        assert!(!looks_like_email("a@.b.co"));
    }

    #[test]
    fn missing_end_blocks_submission() {
        let catalog = catalog();
        let cal = CalendarRules::default();
        let idx = AvailabilityIndex::default();
        let resolver = WindowResolver::new(&cal, &idx);
        let mut req = request();
        req.event_end = None;

        let resolution = resolver.resolve(Some(&req.unit_id), req.event_start, req.event_end).unwrap();
        let validator = BookingValidator::new(&catalog);
        assert_eq!(validator.admit(&resolution), Err(Rejection::Incomplete));
        assert!(matches!(validator.gate(&req, &resolver), Err(Rejection::Fields(e)) if e.has("event_end")));
    }

    #[test]
    fn gate_returns_resolved_window() {
        let catalog = catalog();
        let cal = CalendarRules::default();
        let idx = AvailabilityIndex::default();
        let resolver = WindowResolver::new(&cal, &idx);
        let window = BookingValidator::new(&catalog).gate(&request(), &resolver).unwrap();
        assert_eq!(window.pickup_date, date(2025, 6, 19));
        assert_eq!(window.return_date, date(2025, 6, 23));
    }
}
