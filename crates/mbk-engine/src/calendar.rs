//! Working-day rules: weekends, recurring and one-off holidays, and the
//! nearest-working-day walk used to place pickups and returns.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on the off-day walk. A validated table always yields a working
/// day long before this; the bound only guards hand-built degenerate tables.
const MAX_WALK_DAYS: usize = 3 * 366;

/// Longest range `off_days_between` will enumerate.
pub const MAX_OFF_DAY_RANGE_DAYS: i64 = 366;

/// Official Myanmar holidays observed on the same month-day every year.
const MYANMAR_RECURRING: &[(u32, u32, &str)] = &[
    (1, 1, "New Year's Day"),
    (1, 4, "Independence Day"),
    (2, 12, "Union Day"),
    (2, 13, "Union Day Holiday"),
    (3, 27, "Armed Forces Day"),
    (4, 13, "Thingyan"),
    (4, 14, "Thingyan"),
    (4, 15, "Thingyan"),
    (4, 16, "Thingyan"),
    (4, 17, "Myanmar New Year"),
    (5, 1, "May Day"),
    (7, 19, "Martyrs' Day"),
    (10, 14, "Thadingyut"),
    (11, 3, "Tazaungdaing"),
    (11, 8, "National Day"),
    (11, 27, "Tazaungmon Full Moon"),
    (12, 25, "Christmas Day"),
    (12, 30, "Year End Holiday"),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalendarError {
    #[error("invalid recurring holiday {0:?}, expected MM-DD")]
    InvalidMonthDay(String),
    #[error("holiday {name:?} must set exactly one of `recurring` or `date`")]
    AmbiguousEntry { name: String },
    #[error("recurring holidays cover {0} month-days; no working day would remain")]
    DegenerateTable(usize),
    #[error("holiday on {date} joins a run of {days} off-days; no working day is reachable from it")]
    OffDayRun { date: NaiveDate, days: usize },
    #[error("range {from}..={to} is reversed")]
    ReversedRange { from: NaiveDate, to: NaiveDate },
    #[error("range {from}..={to} spans more than {max} days")]
    RangeTooLong {
        from: NaiveDate,
        to: NaiveDate,
        max: i64,
    },
    #[error("parsing holiday table: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffDayReason {
    Sunday,
    Saturday,
    #[serde(rename = "public holiday")]
    PublicHoliday,
}

impl OffDayReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sunday => "Sunday",
            Self::Saturday => "Saturday",
            Self::PublicHoliday => "public holiday",
        }
    }
}

impl fmt::Display for OffDayReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolidayRule {
    /// Observed on this month-day every year.
    Recurring { month: u32, day: u32 },
    /// Observed once, on this exact date.
    Dated(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    pub name: String,
    pub rule: HolidayRule,
}

impl Holiday {
    pub fn recurring(month: u32, day: u32, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rule: HolidayRule::Recurring { month, day },
        }
    }

    pub fn dated(date: NaiveDate, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rule: HolidayRule::Dated(date),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffDay {
    pub date: NaiveDate,
    pub reason: OffDayReason,
    pub holiday_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct HolidayFile {
    #[allow(dead_code)]
    #[serde(default)]
    version: u32,
    #[serde(default)]
    holidays: Vec<HolidayEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct HolidayEntry {
    name: String,
    #[serde(default)]
    recurring: Option<String>,
    #[serde(default)]
    date: Option<NaiveDate>,
}

impl TryFrom<HolidayEntry> for Holiday {
    type Error = CalendarError;

    fn try_from(entry: HolidayEntry) -> Result<Self, Self::Error> {
        match (entry.recurring, entry.date) {
            (Some(month_day), None) => {
                let (month, day) = parse_month_day(&month_day)?;
                Ok(Holiday::recurring(month, day, entry.name))
            }
            (None, Some(date)) => Ok(Holiday::dated(date, entry.name)),
            _ => Err(CalendarError::AmbiguousEntry { name: entry.name }),
        }
    }
}

fn parse_month_day(raw: &str) -> Result<(u32, u32), CalendarError> {
    let invalid = || CalendarError::InvalidMonthDay(raw.to_string());
    let (month, day) = raw.trim().split_once('-').ok_or_else(invalid)?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    let day: u32 = day.parse().map_err(|_| invalid())?;
    check_month_day(month, day).map_err(|_| invalid())?;
    Ok((month, day))
}

fn check_month_day(month: u32, day: u32) -> Result<(), CalendarError> {
    // 2000 is a leap year, so 02-29 is accepted and simply never matches in
    // common years.
    NaiveDate::from_ymd_opt(2000, month, day)
        .map(|_| ())
        .ok_or_else(|| CalendarError::InvalidMonthDay(format!("{month:02}-{day:02}")))
}

/// Holiday table: recurring month-day rules plus explicit dated one-offs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HolidayTable {
    recurring: BTreeMap<(u32, u32), String>,
    dated: BTreeMap<NaiveDate, String>,
}

impl HolidayTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn myanmar() -> Self {
        let mut table = Self::empty();
        for (month, day, name) in MYANMAR_RECURRING {
            table
                .recurring
                .insert((*month, *day), (*name).to_string());
        }
        table
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, CalendarError> {
        let file: HolidayFile =
            serde_yaml::from_str(text).map_err(|err| CalendarError::Parse(err.to_string()))?;
        let mut table = Self::empty();
        for entry in file.holidays {
            table.insert(Holiday::try_from(entry)?)?;
        }
        Ok(table)
    }

    pub fn with(mut self, holiday: Holiday) -> Result<Self, CalendarError> {
        self.insert(holiday)?;
        Ok(self)
    }

    pub fn insert(&mut self, holiday: Holiday) -> Result<(), CalendarError> {
        match holiday.rule {
            HolidayRule::Recurring { month, day } => {
                check_month_day(month, day)?;
                if !self.recurring.contains_key(&(month, day)) && self.recurring.len() + 1 >= 365 {
                    return Err(CalendarError::DegenerateTable(self.recurring.len() + 1));
                }
                self.recurring.insert((month, day), holiday.name);
            }
            HolidayRule::Dated(date) => {
                let previous = self.dated.insert(date, holiday.name);
                let run = self.off_run_through(date);
                if run >= MAX_WALK_DAYS {
                    match previous {
                        Some(name) => self.dated.insert(date, name),
                        None => self.dated.remove(&date),
                    };
                    return Err(CalendarError::OffDayRun { date, days: run });
                }
            }
        }
        Ok(())
    }

    fn is_off(&self, date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun) || self.name_for(date).is_some()
    }

    /// Length of the unbroken off-day run containing `date`, counted up to
    /// the walk bound.
    fn off_run_through(&self, date: NaiveDate) -> usize {
        if !self.is_off(date) {
            return 0;
        }
        let mut run = 1;
        let mut back = date;
        while run < MAX_WALK_DAYS {
            match back.pred_opt() {
                Some(prev) if self.is_off(prev) => {
                    back = prev;
                    run += 1;
                }
                _ => break,
            }
        }
        let mut forward = date;
        while run < MAX_WALK_DAYS {
            match forward.succ_opt() {
                Some(next) if self.is_off(next) => {
                    forward = next;
                    run += 1;
                }
                _ => break,
            }
        }
        run
    }

    /// Name of the holiday falling on `date`; a dated entry wins over a
    /// recurring one on the same day.
    pub fn name_for(&self, date: NaiveDate) -> Option<&str> {
        self.dated
            .get(&date)
            .or_else(|| self.recurring.get(&(date.month(), date.day())))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.recurring.len() + self.dated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn holidays(&self) -> Vec<Holiday> {
        self.recurring
            .iter()
            .map(|((month, day), name)| Holiday::recurring(*month, *day, name.clone()))
            .chain(
                self.dated
                    .iter()
                    .map(|(date, name)| Holiday::dated(*date, name.clone())),
            )
            .collect()
    }
}

/// Classifies days as working or off and walks to the nearest working day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarRules {
    holidays: HolidayTable,
}

impl Default for CalendarRules {
    fn default() -> Self {
        Self::new(HolidayTable::myanmar())
    }
}

impl CalendarRules {
    pub fn new(holidays: HolidayTable) -> Self {
        Self { holidays }
    }

    pub fn holidays(&self) -> &HolidayTable {
        &self.holidays
    }

    pub fn is_weekend(&self, date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    pub fn is_fixed_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.name_for(date).is_some()
    }

    pub fn is_off_day(&self, date: NaiveDate) -> bool {
        self.is_weekend(date) || self.is_fixed_holiday(date)
    }

    pub fn off_day_reason(&self, date: NaiveDate) -> Option<OffDayReason> {
        match date.weekday() {
            Weekday::Sun => Some(OffDayReason::Sunday),
            Weekday::Sat => Some(OffDayReason::Saturday),
            _ if self.is_fixed_holiday(date) => Some(OffDayReason::PublicHoliday),
            _ => None,
        }
    }

    /// Steps from `date` in `direction` until a working day is reached.
    /// Returns `date` itself when it is already a working day.
    pub fn nearest_working_day(&self, date: NaiveDate, direction: Direction) -> NaiveDate {
        let mut current = date;
        for _ in 0..MAX_WALK_DAYS {
            if !self.is_off_day(current) {
                return current;
            }
            let next = match direction {
                Direction::Forward => current.succ_opt(),
                Direction::Backward => current.pred_opt(),
            };
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
        tracing::warn!(%date, ?direction, "no working day found within walk bound");
        date
    }

    /// Every off-day in `from..=to`, ascending.
    pub fn off_days_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<OffDay>, CalendarError> {
        if to < from {
            return Err(CalendarError::ReversedRange { from, to });
        }
        if (to - from).num_days() >= MAX_OFF_DAY_RANGE_DAYS {
            return Err(CalendarError::RangeTooLong {
                from,
                to,
                max: MAX_OFF_DAY_RANGE_DAYS,
            });
        }
        Ok(from
            .iter_days()
            .take_while(|day| *day <= to)
            .filter_map(|day| {
                self.off_day_reason(day).map(|reason| OffDay {
                    date: day,
                    reason,
                    holiday_name: self.holidays.name_for(day).map(ToString::to_string),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn weekends_are_saturday_and_sunday() {
        let cal = CalendarRules::new(HolidayTable::empty());
        assert!(cal.is_weekend(date(2025, 6, 21)));
        assert!(cal.is_weekend(date(2025, 6, 22)));
        assert!(!cal.is_weekend(date(2025, 6, 23)));
        assert_eq!(cal.off_day_reason(date(2025, 6, 22)), Some(OffDayReason::Sunday));
        assert_eq!(cal.off_day_reason(date(2025, 6, 21)), Some(OffDayReason::Saturday));
        assert_eq!(cal.off_day_reason(date(2025, 6, 23)), None);
    }

    #[test]
    fn recurring_holidays_match_every_year() {
        let cal = CalendarRules::default();
        assert!(cal.is_fixed_holiday(date(2025, 3, 27)));
        assert!(cal.is_fixed_holiday(date(2031, 3, 27)));
        assert!(!cal.is_fixed_holiday(date(2025, 3, 28)));
        assert_eq!(cal.holidays().name_for(date(2026, 5, 1)), Some("May Day"));
    }

    #[test]
    fn weekend_reason_wins_over_holiday() {
        // 2025-07-19 Martyrs' Day is a Saturday.
        let cal = CalendarRules::default();
        assert_eq!(cal.off_day_reason(date(2025, 7, 19)), Some(OffDayReason::Saturday));
        // 2025-05-01 May Day is a Thursday.
        assert_eq!(cal.off_day_reason(date(2025, 5, 1)), Some(OffDayReason::PublicHoliday));
        assert_eq!(OffDayReason::PublicHoliday.to_string(), "public holiday");
    }

    #[test]
    fn dated_entries_only_apply_once() {
        let table = HolidayTable::empty()
            .with(Holiday::dated(date(2025, 10, 7), "Full Moon of Thadingyut"))
            .unwrap();
        let cal = CalendarRules::new(table);
        assert!(cal.is_off_day(date(2025, 10, 7)));
        assert!(!cal.is_off_day(date(2026, 10, 7)));
    }

    #[test]
    fn working_day_is_returned_unchanged() {
        let cal = CalendarRules::default();
        let thursday = date(2025, 6, 19);
        assert_eq!(cal.nearest_working_day(thursday, Direction::Backward), thursday);
        assert_eq!(cal.nearest_working_day(thursday, Direction::Forward), thursday);
    }

    #[test]
    fn walk_skips_weekend_and_holiday_chain() {
        let cal = CalendarRules::default();
        // Thingyan 2025: Sat 12, Sun 13, holidays 14..17 (13 is also a holiday).
        assert_eq!(
            cal.nearest_working_day(date(2025, 4, 17), Direction::Backward),
            date(2025, 4, 11)
        );
        assert_eq!(
            cal.nearest_working_day(date(2025, 4, 12), Direction::Forward),
            date(2025, 4, 18)
        );
    }

    #[test]
    fn off_days_between_lists_reasons_in_order() {
        let cal = CalendarRules::default();
        let days = cal.off_days_between(date(2025, 2, 10), date(2025, 2, 16)).unwrap();
        let summary = days
            .iter()
            .map(|d| (d.date.day(), d.reason))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                (12, OffDayReason::PublicHoliday),
                (13, OffDayReason::PublicHoliday),
                (15, OffDayReason::Saturday),
                (16, OffDayReason::Sunday),
            ]
        );
        assert_eq!(days[0].holiday_name.as_deref(), Some("Union Day"));
    }

    #[test]
    fn off_days_between_rejects_bad_ranges() {
        let cal = CalendarRules::default();
        assert!(matches!(
            cal.off_days_between(date(2025, 2, 10), date(2025, 2, 9)),
            Err(CalendarError::ReversedRange { .. })
        ));
        assert!(matches!(
            cal.off_days_between(date(2025, 1, 1), date(2026, 1, 2)),
            Err(CalendarError::RangeTooLong { .. })
        ));
    }

    #[test]
    fn yaml_table_supports_recurring_and_dated_entries() {
        let yaml = r#"
version: 1
holidays:
  - name: Union Day
    recurring: "02-12"
  - name: Election Day
    date: 2025-12-28
"#;
        let table = HolidayTable::from_yaml_str(yaml).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.name_for(date(2030, 2, 12)), Some("Union Day"));
        assert_eq!(table.name_for(date(2025, 12, 28)), Some("Election Day"));
        assert_eq!(table.name_for(date(2026, 12, 28)), None);
    }

    #[test]
    fn yaml_table_rejects_malformed_entries() {
        let both = "holidays:\n  - name: Odd\n    recurring: \"01-01\"\n    date: 2025-01-01\n";
        assert_eq!(
            HolidayTable::from_yaml_str(both),
            Err(CalendarError::AmbiguousEntry { name: "Odd".into() })
        );
        let bad = "holidays:\n  - name: Nope\n    recurring: \"02-30\"\n";
        assert_eq!(
            HolidayTable::from_yaml_str(bad),
            Err(CalendarError::InvalidMonthDay("02-30".into()))
        );
    }

    #[test]
    fn degenerate_recurring_table_is_rejected() {
        let mut table = HolidayTable::empty();
        let mut day = date(2000, 1, 1);
        let mut result = Ok(());
        while day.year() == 2000 && result.is_ok() {
            result = table.insert(Holiday::recurring(day.month(), day.day(), "every day"));
            day = day.succ_opt().unwrap();
        }
        assert!(matches!(result, Err(CalendarError::DegenerateTable(_))));
    }

    #[test]
    fn endless_dated_run_is_rejected_and_walk_still_lands_on_working_day() {
        let mut table = HolidayTable::empty();
        let start = date(2030, 1, 1);
        let mut day = start;
        let mut result = Ok(());
        for _ in 0..MAX_WALK_DAYS + 10 {
            result = table.insert(Holiday::dated(day, "closed"));
            if result.is_err() {
                break;
            }
            day = day.succ_opt().unwrap();
        }
        assert!(matches!(result, Err(CalendarError::OffDayRun { date: d, .. }) if d == day));
        assert!(table.name_for(day).is_none());

        let cal = CalendarRules::new(table);
        let landed = cal.nearest_working_day(start, Direction::Forward);
        assert!(!cal.is_off_day(landed));
        assert!(landed > start);
    }

    fn any_date() -> impl Strategy<Value = NaiveDate> {
        (0i64..20_000).prop_map(|offset| date(1990, 1, 1) + chrono::Duration::days(offset))
    }

    fn any_table() -> impl Strategy<Value = HolidayTable> {
        (
            proptest::collection::vec((1u32..=12, 1u32..=28), 0..40),
            proptest::collection::vec(any_date(), 0..20),
        )
            .prop_map(|(recurring, dated)| {
                let mut table = HolidayTable::empty();
                for (month, day) in recurring {
                    table.insert(Holiday::recurring(month, day, "r")).unwrap();
                }
                for d in dated {
                    table.insert(Holiday::dated(d, "d")).unwrap();
                }
                table
            })
    }

    fn any_direction() -> impl Strategy<Value = Direction> {
        prop_oneof![Just(Direction::Forward), Just(Direction::Backward)]
    }

    proptest! {
        #[test]
        fn off_day_is_weekend_or_holiday(table in any_table(), d in any_date()) {
            let cal = CalendarRules::new(table);
            prop_assert_eq!(cal.is_off_day(d), cal.is_weekend(d) || cal.is_fixed_holiday(d));
            prop_assert_eq!(cal.is_off_day(d), cal.off_day_reason(d).is_some());
        }

        #[test]
        fn nearest_working_day_is_working_and_closest(
            table in any_table(),
            d in any_date(),
            direction in any_direction()
        ) {
            let cal = CalendarRules::new(table);
            let found = cal.nearest_working_day(d, direction);
            prop_assert!(!cal.is_off_day(found));
            match direction {
                Direction::Forward => {
                    prop_assert!(found >= d);
                    for skipped in d.iter_days().take_while(|x| *x < found) {
                        prop_assert!(cal.is_off_day(skipped));
                    }
                }
                Direction::Backward => {
                    prop_assert!(found <= d);
                    for skipped in found.succ_opt().unwrap().iter_days().take_while(|x| *x <= d) {
                        prop_assert!(cal.is_off_day(skipped));
                    }
                }
            }
        }

        #[test]
        fn nearest_working_day_is_idempotent(
            table in any_table(),
            d in any_date(),
            direction in any_direction()
        ) {
            let cal = CalendarRules::new(table);
            let once = cal.nearest_working_day(d, direction);
            prop_assert_eq!(cal.nearest_working_day(once, direction), once);
        }
    }
}
