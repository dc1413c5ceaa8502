//! Payment-schedule generation
//!
//! A schedule steps from the first payment date by `12 / frequency` months
//! until maturity. Each nominal date is rolled per the business-day
//! convention; the end-of-month flag pins the day to the month end before
//! adjustment. Accrual boundaries for period p are
//! (adjusted previous payment date, adjusted current payment date].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::time::calendar::{add_months, end_of_month, BusinessDayConvention, Calendar};

/// Payments per year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentFrequency {
    Annual,
    SemiAnnual,
    Quarterly,
    Monthly,
}

impl PaymentFrequency {
    pub fn per_year(&self) -> u32 {
        match self {
            PaymentFrequency::Annual => 1,
            PaymentFrequency::SemiAnnual => 2,
            PaymentFrequency::Quarterly => 4,
            PaymentFrequency::Monthly => 12,
        }
    }

    pub fn months_per_period(&self) -> u32 {
        12 / self.per_year()
    }

    pub fn from_per_year(per_year: u32) -> EngineResult<Self> {
        match per_year {
            1 => Ok(PaymentFrequency::Annual),
            2 => Ok(PaymentFrequency::SemiAnnual),
            4 => Ok(PaymentFrequency::Quarterly),
            12 => Ok(PaymentFrequency::Monthly),
            other => Err(EngineError::validation(format!(
                "unsupported payment frequency: {other} per year"
            ))),
        }
    }
}

/// One period of a payment schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePeriod {
    /// Adjusted payment date
    pub payment_date: NaiveDate,
    /// Accrual begin (exclusive bound is the prior payment date)
    pub accrual_begin: NaiveDate,
    /// Accrual end == payment date
    pub accrual_end: NaiveDate,
}

/// Generate the adjusted payment schedule for an obligation.
///
/// The first accrual period begins at `dated_date`.
pub fn payment_schedule(
    calendar: &Calendar,
    dated_date: NaiveDate,
    first_payment_date: NaiveDate,
    maturity_date: NaiveDate,
    frequency: PaymentFrequency,
    convention: BusinessDayConvention,
    pin_end_of_month: bool,
) -> EngineResult<Vec<SchedulePeriod>> {
    if first_payment_date <= dated_date {
        return Err(EngineError::validation(
            "first_payment_date must be after dated_date",
        ));
    }
    if maturity_date < first_payment_date {
        return Err(EngineError::validation(
            "maturity_date must be on or after first_payment_date",
        ));
    }

    let step = frequency.months_per_period() as i32;
    let mut periods = Vec::new();
    let mut prev_adjusted = calendar.adjust(dated_date, convention);
    let mut nominal = first_payment_date;
    let mut index = 0;

    while nominal <= maturity_date {
        let pinned = if pin_end_of_month {
            end_of_month(nominal)
        } else {
            nominal
        };
        let adjusted = calendar.adjust(pinned, convention);

        periods.push(SchedulePeriod {
            payment_date: adjusted,
            accrual_begin: prev_adjusted,
            accrual_end: adjusted,
        });

        prev_adjusted = adjusted;
        index += 1;
        nominal = add_months(first_payment_date, index * step);
    }

    // Maturity is always a payment date even when it falls off-cycle
    if periods
        .last()
        .map(|p| p.payment_date < maturity_date)
        .unwrap_or(true)
    {
        let pinned = if pin_end_of_month {
            end_of_month(maturity_date)
        } else {
            maturity_date
        };
        let adjusted = calendar.adjust(pinned, convention);
        periods.push(SchedulePeriod {
            payment_date: adjusted,
            accrual_begin: prev_adjusted,
            accrual_end: adjusted,
        });
    }

    Ok(periods)
}
