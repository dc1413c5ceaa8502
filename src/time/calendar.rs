//! Business-day calendar and date arithmetic
//!
//! Holidays are supplied by the caller; weekends are Saturday/Sunday.
//! The calendar is threaded through as a value, never held in global state.

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::time::daycount::is_leap_year;

/// How a nominal date rolls when it lands on a non-business day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusinessDayConvention {
    /// Next business day
    #[default]
    Following,
    /// Following unless it crosses a month boundary, then previous
    ModFollowing,
    /// Prior business day
    Previous,
    /// No adjustment
    None,
}

/// Holiday calendar with weekend handling
#[derive(Debug, Clone, Default)]
pub struct Calendar {
    holidays: BTreeSet<NaiveDate>,
}

impl Calendar {
    /// Weekends-only calendar
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holidays(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn add_holiday(&mut self, date: NaiveDate) {
        self.holidays.insert(date);
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Adjust a date per the business-day convention.
    pub fn adjust(&self, date: NaiveDate, convention: BusinessDayConvention) -> NaiveDate {
        match convention {
            BusinessDayConvention::None => date,
            BusinessDayConvention::Following => self.next_business_day(date),
            BusinessDayConvention::Previous => self.previous_business_day(date),
            BusinessDayConvention::ModFollowing => {
                let following = self.next_business_day(date);
                if following.month() != date.month() {
                    self.previous_business_day(date)
                } else {
                    following
                }
            }
        }
    }

    /// The date itself if a business day, else the next one.
    pub fn next_business_day(&self, date: NaiveDate) -> NaiveDate {
        let mut current = date;
        while !self.is_business_day(current) {
            current += Duration::days(1);
        }
        current
    }

    /// The date itself if a business day, else the prior one.
    pub fn previous_business_day(&self, date: NaiveDate) -> NaiveDate {
        let mut current = date;
        while !self.is_business_day(current) {
            current -= Duration::days(1);
        }
        current
    }

    /// Step back `count` business days from `date` (after normalizing
    /// `date` itself onto a business day).
    pub fn business_days_before(&self, date: NaiveDate, count: u32) -> NaiveDate {
        let mut current = self.previous_business_day(date);
        for _ in 0..count {
            current -= Duration::days(1);
            current = self.previous_business_day(current);
        }
        current
    }
}

/// Add calendar months, clamping the day to the target month's length.
pub fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    let zero_based = date.month() as i32 - 1 + months;
    let year = date.year() + zero_based.div_euclid(12);
    let month = zero_based.rem_euclid(12) as u32 + 1;
    let day = date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).expect("clamped day is always valid")
}

/// Whole calendar months between two dates (ignores day-of-month).
pub fn whole_months(start: NaiveDate, end: NaiveDate) -> i32 {
    (end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32
}

/// Last day of the date's month.
pub fn end_of_month(date: NaiveDate) -> NaiveDate {
    let day = days_in_month(date.year(), date.month());
    NaiveDate::from_ymd_opt(date.year(), date.month(), day).expect("valid month end")
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => unreachable!("month out of range"),
    }
}
