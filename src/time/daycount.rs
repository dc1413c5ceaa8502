//! Day-count conventions and year fractions

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Day-count convention for accrual calculations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DayCount {
    /// 30/360 US (bond basis): D1 31->30, D2 31->30 only when D1 >= 30
    #[default]
    #[serde(rename = "30/360")]
    Us30360,
    /// 30E/360 (eurobond basis): both 31s become 30
    #[serde(rename = "30/360EU")]
    Eu30360,
    /// Actual/360
    #[serde(rename = "ACT/360")]
    Act360,
    /// Actual/365 fixed
    #[serde(rename = "ACT/365")]
    Act365,
    /// Actual/Actual with leap-year-weighted averaging across spanned years
    #[serde(rename = "ACT/ACT")]
    ActAct,
}

impl DayCount {
    /// Year fraction between two dates under this convention.
    pub fn year_frac(&self, start: NaiveDate, end: NaiveDate) -> f64 {
        match self {
            DayCount::Us30360 => days_30_360(start, end, false) as f64 / 360.0,
            DayCount::Eu30360 => days_30_360(start, end, true) as f64 / 360.0,
            DayCount::Act360 => (end - start).num_days() as f64 / 360.0,
            DayCount::Act365 => (end - start).num_days() as f64 / 365.0,
            DayCount::ActAct => act_act_year_frac(start, end),
        }
    }

    /// Day count between two dates under this convention.
    pub fn days_between(&self, start: NaiveDate, end: NaiveDate) -> i64 {
        match self {
            DayCount::Us30360 => days_30_360(start, end, false),
            DayCount::Eu30360 => days_30_360(start, end, true),
            _ => (end - start).num_days(),
        }
    }
}

/// 30/360 day count. `european` selects the 30E/360 terminal-day rules.
fn days_30_360(start: NaiveDate, end: NaiveDate, european: bool) -> i64 {
    let (y1, m1, mut d1) = (start.year() as i64, start.month() as i64, start.day() as i64);
    let (y2, m2, mut d2) = (end.year() as i64, end.month() as i64, end.day() as i64);

    if european {
        if d1 == 31 {
            d1 = 30;
        }
        if d2 == 31 {
            d2 = 30;
        }
    } else {
        if d1 == 31 {
            d1 = 30;
        }
        if d2 == 31 && d1 >= 30 {
            d2 = 30;
        }
    }

    360 * (y2 - y1) + 30 * (m2 - m1) + (d2 - d1)
}

/// ACT/ACT as actual days over the average length of the spanned years.
fn act_act_year_frac(start: NaiveDate, end: NaiveDate) -> f64 {
    if start == end {
        return 0.0;
    }
    let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
    let days = (hi - lo).num_days() as f64;

    let years: Vec<i32> = (lo.year()..=hi.year()).collect();
    let total_days: i64 = years
        .iter()
        .map(|&y| if is_leap_year(y) { 366 } else { 365 })
        .sum();
    let avg_year_len = total_days as f64 / years.len() as f64;

    let frac = days / avg_year_len;
    if start <= end {
        frac
    } else {
        -frac
    }
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}
