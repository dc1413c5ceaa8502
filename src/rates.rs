//! Annual-rate assumption curves and period-rate conversion
//!
//! Prepayment, default, and severity assumptions arrive as a scalar annual
//! rate or a per-period vector of annual rates. Vectors extend past their
//! last element by repeating it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::time::DayCount;

/// An annual-rate assumption: flat or per-period
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RateCurve {
    Flat(f64),
    Vector(Vec<f64>),
}

impl RateCurve {
    /// Annual rate applying to 1-indexed period `period`.
    pub fn annual_rate(&self, period: usize) -> f64 {
        match self {
            RateCurve::Flat(rate) => *rate,
            RateCurve::Vector(rates) => {
                if rates.is_empty() {
                    0.0
                } else if period == 0 {
                    rates[0]
                } else if period > rates.len() {
                    *rates.last().expect("non-empty")
                } else {
                    rates[period - 1]
                }
            }
        }
    }

    /// Rate for period `period` converted onto the accrual window.
    pub fn period_rate(
        &self,
        period: usize,
        accrual_begin: NaiveDate,
        accrual_end: NaiveDate,
        day_count: DayCount,
    ) -> f64 {
        annual_to_period_rate(self.annual_rate(period), accrual_begin, accrual_end, day_count)
    }

    pub fn is_zero(&self) -> bool {
        match self {
            RateCurve::Flat(rate) => *rate == 0.0,
            RateCurve::Vector(rates) => rates.iter().all(|&r| r == 0.0),
        }
    }
}

impl Default for RateCurve {
    fn default() -> Self {
        RateCurve::Flat(0.0)
    }
}

impl From<f64> for RateCurve {
    fn from(rate: f64) -> Self {
        RateCurve::Flat(rate)
    }
}

/// Convert an annual decay rate to the rate for one accrual period:
/// `1 - (1 - annual)^yf` where `yf` is the period's year fraction under
/// the given day count.
pub fn annual_to_period_rate(
    annual: f64,
    accrual_begin: NaiveDate,
    accrual_end: NaiveDate,
    day_count: DayCount,
) -> f64 {
    if accrual_end <= accrual_begin {
        return 0.0;
    }
    let yf = day_count.year_frac(accrual_begin, accrual_end);
    if annual >= 1.0 {
        // Full decay within any positive period
        return 1.0;
    }
    1.0 - (1.0 - annual).powf(yf)
}
