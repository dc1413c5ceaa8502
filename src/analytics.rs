//! Cash-flow analytics: XIRR, present value, WAL, durations, price, and
//! discount margin
//!
//! XIRR uses Newton-Raphson with rate bounds and falls back to bisection
//! when the derivative degenerates or the iteration fails to settle.
//! Non-convergence is reported as `None`, never a panic.

use chrono::NaiveDate;

use crate::curve::YieldCurve;

const XIRR_TOLERANCE: f64 = 1e-10;
const XIRR_MAX_ITERATIONS: usize = 100;
const RATE_LOWER_BOUND: f64 = -0.99;
const RATE_UPPER_BOUND: f64 = 10.0;
const DAYS_PER_YEAR: f64 = 365.25;

/// NPV of dated cash flows at an annual rate, discounted on actual days
/// over 365.25 from the first date.
pub fn npv(cashflows: &[(NaiveDate, f64)], rate: f64) -> f64 {
    let Some(&(base_date, _)) = cashflows.first() else {
        return 0.0;
    };
    cashflows
        .iter()
        .map(|&(date, cf)| {
            let years = (date - base_date).num_days() as f64 / DAYS_PER_YEAR;
            cf / (1.0 + rate).powf(years)
        })
        .sum()
}

fn npv_and_derivative(cashflows: &[(NaiveDate, f64)], rate: f64) -> (f64, f64) {
    let Some(&(base_date, _)) = cashflows.first() else {
        return (0.0, 0.0);
    };
    let mut npv = 0.0;
    let mut dnpv = 0.0;
    for &(date, cf) in cashflows {
        let years = (date - base_date).num_days() as f64 / DAYS_PER_YEAR;
        let factor = (1.0 + rate).powf(years);
        npv += cf / factor;
        if years > 0.0 {
            dnpv -= cf * years / (factor * (1.0 + rate));
        }
    }
    (npv, dnpv)
}

/// Calculate XIRR for irregular dated cash flows using the Newton-Raphson
/// method with a bisection fallback.
///
/// Returns `None` when there is no sign change or no convergence.
pub fn xirr(cashflows: &[(NaiveDate, f64)]) -> Option<f64> {
    if cashflows.len() < 2 {
        return None;
    }
    if cashflows.iter().all(|&(_, cf)| cf.abs() < 1e-10) {
        return Some(0.0);
    }
    let has_positive = cashflows.iter().any(|&(_, cf)| cf > 1e-10);
    let has_negative = cashflows.iter().any(|&(_, cf)| cf < -1e-10);
    if !has_positive || !has_negative {
        return None;
    }

    let mut sorted: Vec<(NaiveDate, f64)> = cashflows.to_vec();
    sorted.sort_by_key(|&(date, _)| date);

    let mut rate = 0.1;
    for _ in 0..XIRR_MAX_ITERATIONS {
        let (value, derivative) = npv_and_derivative(&sorted, rate);
        if value.abs() < XIRR_TOLERANCE {
            return Some(rate);
        }
        if derivative.abs() < 1e-15 {
            return xirr_bisection(&sorted);
        }

        let new_rate = (rate - value / derivative).clamp(RATE_LOWER_BOUND, RATE_UPPER_BOUND);
        if (new_rate - rate).abs() < XIRR_TOLERANCE {
            return Some(new_rate);
        }
        rate = new_rate;
    }

    xirr_bisection(&sorted)
}

/// Fallback bisection over the bounded rate interval.
fn xirr_bisection(cashflows: &[(NaiveDate, f64)]) -> Option<f64> {
    let mut low = RATE_LOWER_BOUND;
    let mut high = RATE_UPPER_BOUND;

    let npv_low = npv(cashflows, low);
    let npv_high = npv(cashflows, high);
    if npv_low * npv_high > 0.0 {
        return None;
    }

    for _ in 0..1000 {
        let mid = (low + high) / 2.0;
        let npv_mid = npv(cashflows, mid);
        if npv_mid.abs() < XIRR_TOLERANCE || (high - low) / 2.0 < XIRR_TOLERANCE {
            return Some(mid);
        }
        if npv_mid * npv(cashflows, low) < 0.0 {
            high = mid;
        } else {
            low = mid;
        }
    }
    None
}

/// Weighted average life of dated principal flows, in years from the
/// analysis date.
pub fn weighted_average_life(
    principal_flows: &[(NaiveDate, f64)],
    analysis_date: NaiveDate,
) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for &(date, principal) in principal_flows {
        if principal <= 0.0 || date <= analysis_date {
            continue;
        }
        let years = (date - analysis_date).num_days() as f64 / DAYS_PER_YEAR;
        weighted += principal * years;
        total += principal;
    }
    if total > 0.0 {
        weighted / total
    } else {
        0.0
    }
}

/// Macaulay duration at a given annual yield and compounding frequency.
pub fn macaulay_duration(
    cashflows: &[(NaiveDate, f64)],
    analysis_date: NaiveDate,
    annual_yield: f64,
    frequency: u32,
) -> f64 {
    let f = frequency.max(1) as f64;
    let mut pv_total = 0.0;
    let mut weighted = 0.0;
    for &(date, cf) in cashflows {
        if date <= analysis_date || cf == 0.0 {
            continue;
        }
        let years = (date - analysis_date).num_days() as f64 / DAYS_PER_YEAR;
        let pv = cf / (1.0 + annual_yield / f).powf(years * f);
        pv_total += pv;
        weighted += years * pv;
    }
    if pv_total > 0.0 {
        weighted / pv_total
    } else {
        0.0
    }
}

/// Modified duration from Macaulay.
pub fn modified_duration(macaulay: f64, annual_yield: f64, frequency: u32) -> f64 {
    macaulay / (1.0 + annual_yield / frequency.max(1) as f64)
}

/// Price as a fraction of original balance: PV of the payment stream
/// discounted at the curve's zero rates.
pub fn price_from_curve(
    cashflows: &[(NaiveDate, f64)],
    analysis_date: NaiveDate,
    original_balance: f64,
    curve: &YieldCurve,
) -> Option<f64> {
    if original_balance <= 0.0 {
        return None;
    }
    let mut pv = 0.0;
    for &(date, cf) in cashflows {
        if date <= analysis_date || cf == 0.0 {
            continue;
        }
        let zero = curve.zero_rate(analysis_date, date).ok()?;
        let years = (date - analysis_date).num_days() as f64 / DAYS_PER_YEAR;
        pv += cf / (1.0 + zero).powf(years);
    }
    Some(pv / original_balance)
}

/// Discount margin: the spread over the period LIBOR path that discounts
/// the cash flows back to the target value. `libor_path[i]` is the index
/// reset applying to the cash flow at `cashflows[i]`; `frequency` is
/// payments per year. Solved by bisection; `None` when no root brackets.
pub fn discount_margin(
    cashflows: &[f64],
    libor_path: &[f64],
    frequency: u32,
    target_value: f64,
) -> Option<f64> {
    if cashflows.is_empty() || cashflows.len() != libor_path.len() || target_value <= 0.0 {
        return None;
    }
    let f = frequency.max(1) as f64;

    let value_at = |dm: f64| -> f64 {
        let mut discount = 1.0;
        let mut pv = 0.0;
        for (cf, libor) in cashflows.iter().zip(libor_path) {
            discount /= 1.0 + (libor + dm) / f;
            pv += cf * discount;
        }
        pv
    };

    let mut low = -0.05;
    let mut high = 1.0;
    let mut f_low = value_at(low) - target_value;
    let f_high = value_at(high) - target_value;
    if f_low * f_high > 0.0 {
        return None;
    }

    for _ in 0..200 {
        let mid = (low + high) / 2.0;
        let f_mid = value_at(mid) - target_value;
        if f_mid.abs() < 1e-10 || (high - low) / 2.0 < 1e-12 {
            return Some(mid);
        }
        if f_low * f_mid < 0.0 {
            high = mid;
        } else {
            low = mid;
            f_low = f_mid;
        }
    }
    None
}
