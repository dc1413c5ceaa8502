//! Per-asset cash-flow projection
//!
//! Projects an obligation's strip under prepayment/default/severity
//! assumptions. Defaults hit at period start, interest accrues on the
//! surviving balance, scheduled principal follows the amortization
//! profile, prepayments strip the remainder, and recoveries realize a
//! fixed number of periods after each default. The final period sweeps any
//! unrecovered default balance into net loss.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::assets::asset::{Amortization, Asset, RateSpec};
use crate::assets::cashflow::{CashflowRow, CashflowStrip};
use crate::curve::YieldCurve;
use crate::error::{EngineError, EngineResult};
use crate::rates::RateCurve;
use crate::time::Calendar;

/// Projection assumptions shared by asset and reinvestment strips
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CashflowAssumptions {
    #[serde(default)]
    pub prepayment: RateCurve,
    #[serde(default)]
    pub default: RateCurve,
    #[serde(default)]
    pub severity: RateCurve,
    /// Periods between a default and its recovery
    #[serde(default)]
    pub recovery_lag_periods: usize,
}

/// Project the strip for one obligation from the analysis date to
/// maturity.
pub fn project_cashflows(
    asset: &Asset,
    calendar: &Calendar,
    analysis_date: NaiveDate,
    assumptions: &CashflowAssumptions,
    curve: Option<&YieldCurve>,
) -> EngineResult<CashflowStrip> {
    asset.validate()?;

    let schedule: Vec<_> = asset
        .schedule(calendar)?
        .into_iter()
        .filter(|p| p.payment_date > analysis_date)
        .collect();

    let mut strip = CashflowStrip::with_periods(schedule.len());
    if schedule.is_empty() {
        return Ok(strip);
    }

    if asset.is_defaulted() {
        project_defaulted(asset, &schedule, assumptions, &mut strip);
        return Ok(strip);
    }

    let num_periods = schedule.len();
    let lag = assumptions.recovery_lag_periods;
    let months = asset.frequency.months_per_period();

    let mut beg_balance = asset.par_amount;
    let mut default_balance = 0.0;
    let mut mv_default_balance = 0.0;
    let mut defaults = vec![0.0; num_periods + 1];
    let mut mv_defaults = vec![0.0; num_periods + 1];

    for (p, period) in schedule.iter().enumerate().map(|(i, s)| (i + 1, s)) {
        let accrual_begin = period.accrual_begin;
        let accrual_end = period.accrual_end;

        // 1. Defaults at period start
        let default = beg_balance
            * assumptions
                .default
                .period_rate(p, accrual_begin, accrual_end, asset.day_count);
        let severity = assumptions.severity.annual_rate(p);
        let mv_default = default * (1.0 - severity);
        defaults[p] = default;
        mv_defaults[p] = mv_default;

        // 2. Coupon and interest on the surviving balance
        let coupon = period_coupon(asset, curve, accrual_begin, months)?;
        let yf = asset.day_count.year_frac(accrual_begin, accrual_end);
        let mut interest = yf * coupon * (beg_balance - default);

        let mut recorded_beg = beg_balance;
        if asset.is_piking() {
            // Interest capitalizes instead of paying cash
            beg_balance += interest;
            recorded_beg = beg_balance;
            interest = 0.0;
        }

        // 3. Scheduled principal
        let performing = beg_balance - default;
        let sched_principal = match asset.amortization {
            Amortization::Bullet => {
                if p == num_periods {
                    performing
                } else {
                    0.0
                }
            }
            Amortization::Amortizing => performing / (num_periods - p + 1) as f64,
        };

        // 4. Unscheduled principal
        let unsched_principal = (performing - sched_principal)
            * assumptions
                .prepayment
                .period_rate(p, accrual_begin, accrual_end, asset.day_count);

        // 5. Lagged recoveries
        let (recoveries, mut net_loss) = if p > lag {
            (
                mv_defaults[p - lag],
                defaults[p - lag] - mv_defaults[p - lag],
            )
        } else {
            (0.0, 0.0)
        };

        // 6. Balance roll
        let end_balance = beg_balance - default - sched_principal - unsched_principal;
        let mut end_default_balance = default_balance + default - recoveries - net_loss;
        let mut end_mv_default_balance = mv_default_balance + mv_default - recoveries;

        // 7. Final period liquidates the remaining default balance
        if p == num_periods {
            net_loss += end_default_balance;
            end_default_balance = 0.0;
            end_mv_default_balance = 0.0;
        }

        let row = strip.row_mut(p).expect("period allocated");
        *row = CashflowRow {
            payment_date: Some(period.payment_date),
            accrual_begin: Some(accrual_begin),
            accrual_end: Some(accrual_end),
            beg_balance: recorded_beg,
            end_balance,
            default_balance: end_default_balance,
            mv_default_balance: end_mv_default_balance,
            default,
            mv_default,
            interest,
            sched_principal,
            unsched_principal,
            recoveries,
            net_loss,
            sold: 0.0,
        };

        beg_balance = end_balance;
        default_balance = end_default_balance;
        mv_default_balance = end_mv_default_balance;
    }

    Ok(strip)
}

/// Entry-state defaulted assets skip accrual and only realize recoveries
/// after the lag window.
fn project_defaulted(
    asset: &Asset,
    schedule: &[crate::time::SchedulePeriod],
    assumptions: &CashflowAssumptions,
    strip: &mut CashflowStrip,
) {
    let recovery_rate = asset.effective_recovery_rate();
    let expected_recovery = asset.par_amount * recovery_rate;
    let expected_loss = asset.par_amount - expected_recovery;
    let recovery_period = assumptions.recovery_lag_periods.max(1).min(schedule.len());

    let mut default_balance = asset.par_amount;
    let mut mv_default_balance = expected_recovery;

    for (p, period) in schedule.iter().enumerate().map(|(i, s)| (i + 1, s)) {
        let (mut recoveries, mut net_loss) = if p == recovery_period {
            (expected_recovery, expected_loss)
        } else {
            (0.0, 0.0)
        };
        // A truncated window realizes everything in the last period
        if p == schedule.len() && p < recovery_period {
            recoveries = expected_recovery;
            net_loss = expected_loss;
        }

        default_balance -= recoveries + net_loss;
        mv_default_balance -= recoveries;

        let row = strip.row_mut(p).expect("period allocated");
        *row = CashflowRow {
            payment_date: Some(period.payment_date),
            accrual_begin: Some(period.accrual_begin),
            accrual_end: Some(period.accrual_end),
            beg_balance: 0.0,
            end_balance: 0.0,
            default_balance,
            mv_default_balance,
            default: 0.0,
            mv_default: 0.0,
            interest: 0.0,
            sched_principal: 0.0,
            unsched_principal: 0.0,
            recoveries,
            net_loss,
            sold: 0.0,
        };
    }
}

/// Resolve the coupon applying to one accrual period.
fn period_coupon(
    asset: &Asset,
    curve: Option<&YieldCurve>,
    accrual_begin: NaiveDate,
    months_per_period: u32,
) -> EngineResult<f64> {
    match &asset.rate {
        RateSpec::Fixed { coupon } => Ok(*coupon),
        RateSpec::Float {
            spread, floor, cap, ..
        } => {
            let curve = curve.ok_or_else(|| {
                EngineError::state(format!(
                    "asset {}: floating-rate projection requires a yield curve",
                    asset.id
                ))
            })?;
            let mut index = curve.spot_rate(accrual_begin, months_per_period)?;
            if let Some(cap) = cap {
                index = index.min(*cap);
            }
            if index > *floor {
                Ok(index + spread)
            } else {
                Ok(floor + spread)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::asset::fixtures::bullet_bond;
    use crate::assets::asset::AssetFlags;
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn analysis() -> NaiveDate {
        d(2025, 1, 15)
    }

    #[test]
    fn test_clean_bullet_bond() {
        // 1mm par, 5% fixed, 4 quarterly periods, no stress curves
        let asset = bullet_bond("A1", 1_000_000.0, 0.05);
        let strip = project_cashflows(
            &asset,
            &Calendar::new(),
            analysis(),
            &CashflowAssumptions::default(),
            None,
        )
        .unwrap();

        assert_eq!(strip.len(), 4);
        for (p, row) in strip.periods() {
            assert_relative_eq!(row.interest, 12_500.0, epsilon = 1e-6);
            if p < 4 {
                assert_relative_eq!(row.sched_principal, 0.0);
            }
        }
        assert_relative_eq!(strip.row(4).unwrap().sched_principal, 1_000_000.0);
        assert_relative_eq!(strip.row(4).unwrap().end_balance, 0.0);
    }

    #[test]
    fn test_bullet_total_cash_matches_coupon_identity() {
        let asset = bullet_bond("A1", 1_000_000.0, 0.05);
        let strip = project_cashflows(
            &asset,
            &Calendar::new(),
            analysis(),
            &CashflowAssumptions::default(),
            None,
        )
        .unwrap();

        let total: f64 = strip
            .iter()
            .map(|r| r.interest + r.sched_principal + r.unsched_principal + r.recoveries - r.net_loss)
            .sum();
        let yf = asset
            .day_count
            .year_frac(asset.dated_date, asset.maturity_date);
        assert_relative_eq!(total, 1_000_000.0 * (1.0 + 0.05 * yf), epsilon = 1.0);
    }

    #[test]
    fn test_full_default_period_two_with_lag() {
        // Full default in period 2, severity 0.4, one-period recovery lag
        let asset = bullet_bond("A1", 1_000_000.0, 0.05);
        let assumptions = CashflowAssumptions {
            default: RateCurve::Vector(vec![0.0, 1.0, 0.0, 0.0]),
            severity: RateCurve::Flat(0.4),
            recovery_lag_periods: 1,
            ..Default::default()
        };
        let strip =
            project_cashflows(&asset, &Calendar::new(), analysis(), &assumptions, None).unwrap();

        let p2 = strip.row(2).unwrap();
        assert_relative_eq!(p2.default, 1_000_000.0, epsilon = 1e-6);
        assert_relative_eq!(p2.mv_default, 600_000.0, epsilon = 1e-6);
        assert_relative_eq!(p2.interest, 0.0, epsilon = 1e-6);
        assert_relative_eq!(p2.end_balance, 0.0, epsilon = 1e-6);

        let p3 = strip.row(3).unwrap();
        assert_relative_eq!(p3.recoveries, 600_000.0, epsilon = 1e-6);
        assert_relative_eq!(p3.net_loss, 400_000.0, epsilon = 1e-6);

        let p4 = strip.row(4).unwrap();
        assert_relative_eq!(p4.total(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(p4.net_loss, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_hundred_percent_prepay_empties_period_one() {
        let asset = bullet_bond("A1", 1_000_000.0, 0.05);
        let assumptions = CashflowAssumptions {
            prepayment: RateCurve::Flat(1.0),
            ..Default::default()
        };
        let strip =
            project_cashflows(&asset, &Calendar::new(), analysis(), &assumptions, None).unwrap();

        assert_relative_eq!(strip.row(1).unwrap().end_balance, 0.0, epsilon = 1e-6);
        for p in 2..=4 {
            assert_relative_eq!(strip.row(p).unwrap().total(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_hundred_percent_severity_means_no_recovery() {
        let asset = bullet_bond("A1", 1_000_000.0, 0.05);
        let assumptions = CashflowAssumptions {
            default: RateCurve::Vector(vec![1.0]),
            severity: RateCurve::Flat(1.0),
            recovery_lag_periods: 1,
            ..Default::default()
        };
        let strip =
            project_cashflows(&asset, &Calendar::new(), analysis(), &assumptions, None).unwrap();

        let p2 = strip.row(2).unwrap();
        assert_relative_eq!(p2.recoveries, 0.0);
        assert_relative_eq!(p2.net_loss, 1_000_000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_balance_identity_holds_every_period() {
        let asset = bullet_bond("A1", 1_000_000.0, 0.06);
        let assumptions = CashflowAssumptions {
            prepayment: RateCurve::Flat(0.10),
            default: RateCurve::Flat(0.03),
            severity: RateCurve::Flat(0.4),
            recovery_lag_periods: 2,
        };
        let strip =
            project_cashflows(&asset, &Calendar::new(), analysis(), &assumptions, None).unwrap();

        let mut prev_end = None;
        for (_, row) in strip.periods() {
            assert_relative_eq!(row.balance_residual(), 0.0, epsilon = 1e-8);
            if let Some(prev) = prev_end {
                assert_relative_eq!(row.beg_balance, prev, epsilon = 1e-8);
            }
            prev_end = Some(row.end_balance);
        }
    }

    #[test]
    fn test_floating_rate_floor_binds() {
        let mut asset = bullet_bond("A1", 1_000_000.0, 0.0);
        asset.rate = RateSpec::Float {
            index_name: "LIBOR".to_string(),
            spread: 0.03,
            floor: 0.02,
            cap: None,
        };
        // Curve with deeply negative short rate
        let tenors = BTreeMap::from([(3, -0.01), (24, -0.01)]);
        let curve = YieldCurve::new("LIBOR", analysis(), &tenors).unwrap();

        let strip = project_cashflows(
            &asset,
            &Calendar::new(),
            analysis(),
            &CashflowAssumptions::default(),
            Some(&curve),
        )
        .unwrap();

        // floor + spread = 5% annual -> 12,500 per quarter
        assert_relative_eq!(strip.row(1).unwrap().interest, 12_500.0, epsilon = 1e-6);
    }

    #[test]
    fn test_floating_without_curve_is_state_error() {
        let mut asset = bullet_bond("A1", 1_000_000.0, 0.0);
        asset.rate = RateSpec::Float {
            index_name: "LIBOR".to_string(),
            spread: 0.03,
            floor: 0.02,
            cap: None,
        };
        let result = project_cashflows(
            &asset,
            &Calendar::new(),
            analysis(),
            &CashflowAssumptions::default(),
            None,
        );
        assert!(matches!(result, Err(EngineError::State(_))));
    }

    #[test]
    fn test_pik_asset_capitalizes_interest() {
        let mut asset = bullet_bond("A1", 1_000_000.0, 0.08);
        asset.flags = AssetFlags {
            pik_eligible: true,
            piking: true,
            ..Default::default()
        };
        let strip = project_cashflows(
            &asset,
            &Calendar::new(),
            analysis(),
            &CashflowAssumptions::default(),
            None,
        )
        .unwrap();

        let p1 = strip.row(1).unwrap();
        assert_relative_eq!(p1.interest, 0.0);
        assert!(p1.end_balance > 1_000_000.0);
        // Capitalized interest comes back as terminal principal
        assert!(strip.row(4).unwrap().sched_principal > 1_000_000.0);
    }

    #[test]
    fn test_entry_defaulted_asset_recovers_after_lag() {
        let mut asset = bullet_bond("A1", 1_000_000.0, 0.05);
        asset.flags.default_asset = true;
        asset.recovery_rate = Some(0.45);
        let assumptions = CashflowAssumptions {
            recovery_lag_periods: 2,
            ..Default::default()
        };
        let strip =
            project_cashflows(&asset, &Calendar::new(), analysis(), &assumptions, None).unwrap();

        assert_relative_eq!(strip.total_interest(), 0.0);
        let p2 = strip.row(2).unwrap();
        assert_relative_eq!(p2.recoveries, 450_000.0, epsilon = 1e-6);
        assert_relative_eq!(p2.net_loss, 550_000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_par_contributes_nothing() {
        let asset = bullet_bond("A1", 0.0, 0.05);
        let strip = project_cashflows(
            &asset,
            &Calendar::new(),
            analysis(),
            &CashflowAssumptions::default(),
            None,
        )
        .unwrap();
        for (_, row) in strip.periods() {
            assert_relative_eq!(row.total(), 0.0);
        }
    }
}
