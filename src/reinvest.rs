//! Reinvestment engine
//!
//! Reinvested principal buys a synthetic obligation strip: par at the
//! reinvestment price, a floating coupon off the curve with a floor, and
//! the same default/prepay/severity recurrence as a real asset, with
//! lagged recoveries. Multiple reinvestments sum onto a single strip.
//! Terminal liquidation realizes the performing balance at a price plus
//! the market value of defaults, and zeroes the future.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::assets::{CashflowRow, CashflowStrip};
use crate::curve::YieldCurve;
use crate::error::{EngineError, EngineResult};
use crate::rates::{annual_to_period_rate, RateCurve};
use crate::time::DayCount;

/// Proceeds bucket selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProceedsKind {
    Interest,
    Principal,
}

/// Parameters for reinvested purchases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinvestmentProfile {
    /// Synthetic asset tenor in months
    pub maturity_months: u32,
    /// Purchase price as a fraction of par, in (0, 1]
    pub reinvest_price: f64,
    pub spread: f64,
    pub floor: f64,
    /// Terminal liquidation price in [0, 1]
    pub liquidation_price: f64,
    /// Months between default and recovery
    pub lag_months: u32,
    #[serde(default)]
    pub prepayment: RateCurve,
    #[serde(default)]
    pub default: RateCurve,
    #[serde(default)]
    pub severity: RateCurve,
}

impl ReinvestmentProfile {
    pub fn validate(&self) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&self.reinvest_price) || self.reinvest_price == 0.0 {
            return Err(EngineError::validation(
                "reinvest_price must be in (0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.liquidation_price) {
            return Err(EngineError::validation(
                "liquidation_price must be in [0, 1]",
            ));
        }
        if self.maturity_months == 0 {
            return Err(EngineError::validation("maturity_months must be positive"));
        }
        Ok(())
    }
}

/// Rolling reinvestment strip driven by the deal's payment schedule
#[derive(Debug, Clone)]
pub struct ReinvestmentEngine {
    profile: ReinvestmentProfile,
    /// Payment date per period; index 0 carries the closing date
    payment_dates: Vec<NaiveDate>,
    strip: CashflowStrip,
    months_between_payments: u32,
    period: usize,
    last_period: usize,
    ready: bool,
}

impl ReinvestmentEngine {
    pub fn new(profile: ReinvestmentProfile) -> EngineResult<Self> {
        profile.validate()?;
        Ok(Self {
            profile,
            payment_dates: Vec::new(),
            strip: CashflowStrip::default(),
            months_between_payments: 3,
            period: 1,
            last_period: 0,
            ready: false,
        })
    }

    /// Bind to the deal schedule. `closing_date` anchors period 0;
    /// `payment_dates[i]` is period i+1's payment date.
    pub fn deal_setup(
        &mut self,
        closing_date: NaiveDate,
        payment_dates: &[NaiveDate],
        months_between_payments: u32,
    ) -> EngineResult<()> {
        if payment_dates.is_empty() {
            return Err(EngineError::validation(
                "reinvestment needs at least one payment date",
            ));
        }
        if months_between_payments == 0 {
            return Err(EngineError::validation(
                "months_between_payments must be positive",
            ));
        }
        self.payment_dates = std::iter::once(closing_date)
            .chain(payment_dates.iter().copied())
            .collect();
        self.strip = CashflowStrip::with_periods(payment_dates.len());
        self.months_between_payments = months_between_payments;
        self.period = 1;
        self.last_period = 0;
        self.ready = true;
        Ok(())
    }

    pub fn profile(&self) -> &ReinvestmentProfile {
        &self.profile
    }

    pub fn current_period(&self) -> usize {
        self.period
    }

    pub fn last_period(&self) -> usize {
        self.last_period
    }

    fn date_for(&self, period: usize) -> Option<NaiveDate> {
        self.payment_dates.get(period).copied()
    }

    /// Buy a synthetic strip with `amount` of principal cash, layering its
    /// flows onto the engine's strip from the next period forward.
    pub fn add_reinvestment(
        &mut self,
        amount: f64,
        curve: Option<&YieldCurve>,
    ) -> EngineResult<()> {
        if !self.ready {
            return Err(EngineError::state(
                "reinvestment requires deal_setup() before add_reinvestment()",
            ));
        }
        if amount <= 0.0 {
            return Ok(());
        }

        let num_payments =
            (self.profile.maturity_months / self.months_between_payments).max(1) as usize;
        let period_lag = (self.profile.lag_months / self.months_between_payments) as usize;

        let mut defaults = vec![0.0; num_payments + 1];
        let mut mv_defaults = vec![0.0; num_payments + 1];

        let mut beg_balance = amount / self.profile.reinvest_price;
        let mut default_balance = 0.0;
        let mut mv_default_balance = 0.0;

        for i in 1..=num_payments {
            let Some(accrual_begin) = self.date_for(self.period + i - 1) else {
                break;
            };
            let Some(accrual_end) = self.date_for(self.period + i) else {
                break;
            };

            let annual_default = self.profile.default.annual_rate(i);
            let default = beg_balance
                * annual_to_period_rate(annual_default, accrual_begin, accrual_end, DayCount::Us30360);
            let severity = self.profile.severity.annual_rate(i);
            let mv_default = default * (1.0 - severity);
            defaults[i] = default;
            mv_defaults[i] = mv_default;

            let index = match curve {
                Some(curve) => curve.spot_rate(accrual_begin, self.months_between_payments)?,
                None => {
                    return Err(EngineError::state(
                        "reinvestment coupon requires a yield curve",
                    ))
                }
            };
            let coupon = if index > self.profile.floor {
                index + self.profile.spread
            } else {
                self.profile.floor + self.profile.spread
            };
            let interest = DayCount::Us30360.year_frac(accrual_begin, accrual_end)
                * coupon
                * (beg_balance - default);

            let sched_principal = if i == num_payments {
                beg_balance - default
            } else {
                0.0
            };
            let annual_prepay = self.profile.prepayment.annual_rate(i);
            let unsched_principal = (beg_balance - default - sched_principal)
                * annual_to_period_rate(annual_prepay, accrual_begin, accrual_end, DayCount::Us30360);

            let (recoveries, mut net_loss) = if i > period_lag {
                (
                    mv_defaults[i - period_lag],
                    defaults[i - period_lag] - mv_defaults[i - period_lag],
                )
            } else {
                (0.0, 0.0)
            };

            let end_balance = beg_balance - default - sched_principal - unsched_principal;
            let mut end_default_balance = default_balance + default - recoveries - net_loss;
            let mut end_mv_default_balance = mv_default_balance + mv_default - recoveries;

            if i == num_payments {
                net_loss += end_default_balance;
                end_default_balance = 0.0;
                end_mv_default_balance = 0.0;
                if self.last_period < self.period + i {
                    self.last_period = self.period + i;
                }
            }

            let row = self.strip.ensure_period(self.period + i);
            row.payment_date.get_or_insert(accrual_end);
            row.accrual_begin.get_or_insert(accrual_begin);
            row.accrual_end.get_or_insert(accrual_end);
            row.beg_balance += beg_balance;
            row.default_balance += end_default_balance;
            row.mv_default_balance += end_mv_default_balance;
            row.default += default;
            row.mv_default += mv_default;
            row.interest += interest;
            row.sched_principal += sched_principal;
            row.unsched_principal += unsched_principal;
            row.recoveries += recoveries;
            row.net_loss += net_loss;
            row.end_balance += end_balance;

            beg_balance = end_balance;
            default_balance = end_default_balance;
            mv_default_balance = end_mv_default_balance;

            if self.period + i + 1 > self.strip.len() || end_balance == 0.0 {
                break;
            }
        }

        Ok(())
    }

    /// Proceeds the strip throws off in the current period.
    pub fn proceeds(&self, kind: ProceedsKind) -> f64 {
        let Some(row) = self.strip.row(self.period) else {
            return 0.0;
        };
        match kind {
            ProceedsKind::Interest => row.interest,
            ProceedsKind::Principal => {
                row.sched_principal + row.unsched_principal + row.recoveries
            }
        }
    }

    /// Performing plus defaulted balance entering next period.
    pub fn principal_balance_all(&self) -> f64 {
        self.strip
            .row(self.period + 1)
            .map(|r| r.beg_balance + r.default_balance)
            .unwrap_or(0.0)
    }

    pub fn principal_balance_ex_defaults(&self) -> f64 {
        self.strip
            .row(self.period + 1)
            .map(|r| r.beg_balance)
            .unwrap_or(0.0)
    }

    pub fn principal_balance_defaults(&self) -> f64 {
        self.strip
            .row(self.period + 1)
            .map(|r| r.default_balance)
            .unwrap_or(0.0)
    }

    pub fn mv_defaults(&self) -> f64 {
        self.strip
            .row(self.period + 1)
            .map(|r| r.mv_default_balance)
            .unwrap_or(0.0)
    }

    /// Unscheduled principal realized in the current period.
    pub fn unscheduled_principal(&self) -> f64 {
        self.strip
            .row(self.period)
            .map(|r| r.unsched_principal)
            .unwrap_or(0.0)
    }

    /// Sell the strip at a price: performing end balance at the price plus
    /// the market value of the default balance. Future periods zero out.
    pub fn liquidate(&mut self, price: f64) -> f64 {
        let Some(row) = self.strip.row(self.period) else {
            return 0.0;
        };
        let end_balance = row.beg_balance - row.default - row.unsched_principal - row.sched_principal;
        let end_default_balance =
            row.default_balance + row.default - row.recoveries - row.net_loss;
        let end_mv_default_balance = row.mv_default_balance + row.mv_default - row.recoveries;

        let sold = end_balance * price + end_mv_default_balance;
        let loss = (1.0 - price) * end_balance + (end_default_balance - end_mv_default_balance);

        self.strip.zero_from(self.period + 1);
        let row = self.strip.row_mut(self.period).expect("row exists");
        row.net_loss += loss;
        row.sold += sold;
        row.end_balance = 0.0;
        row.default_balance = 0.0;
        row.mv_default_balance = 0.0;

        self.last_period = self.period;
        sold
    }

    pub fn roll_forward(&mut self) {
        self.period += 1;
    }

    /// The accumulated strip rows through the last active period.
    pub fn cashflow_table(&self) -> Vec<CashflowRow> {
        (1..=self.last_period)
            .filter_map(|p| self.strip.row(p).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::add_months;
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn flat_curve(rate: f64) -> YieldCurve {
        let tenors = BTreeMap::from([(1, rate), (120, rate)]);
        YieldCurve::new("LIBOR", d(2025, 1, 15), &tenors).unwrap()
    }

    fn quarterly_dates(n: usize) -> Vec<NaiveDate> {
        (1..=n as i32).map(|i| add_months(d(2025, 1, 15), 3 * i)).collect()
    }

    fn profile() -> ReinvestmentProfile {
        ReinvestmentProfile {
            maturity_months: 12,
            reinvest_price: 1.0,
            spread: 0.04,
            floor: 0.01,
            liquidation_price: 0.70,
            lag_months: 3,
            prepayment: RateCurve::Flat(0.0),
            default: RateCurve::Flat(0.0),
            severity: RateCurve::Flat(0.4),
        }
    }

    fn engine(n_periods: usize) -> ReinvestmentEngine {
        let mut engine = ReinvestmentEngine::new(profile()).unwrap();
        engine
            .deal_setup(d(2025, 1, 15), &quarterly_dates(n_periods), 3)
            .unwrap();
        engine
    }

    #[test]
    fn test_add_before_setup_is_state_error() {
        let mut engine = ReinvestmentEngine::new(profile()).unwrap();
        let curve = flat_curve(0.03);
        assert!(matches!(
            engine.add_reinvestment(1_000_000.0, Some(&curve)),
            Err(EngineError::State(_))
        ));
    }

    #[test]
    fn test_reinvest_price_grosses_up_par() {
        let mut profile = profile();
        profile.reinvest_price = 0.95;
        let mut engine = ReinvestmentEngine::new(profile).unwrap();
        engine
            .deal_setup(d(2025, 1, 15), &quarterly_dates(12), 3)
            .unwrap();
        let curve = flat_curve(0.03);
        engine.add_reinvestment(950_000.0, Some(&curve)).unwrap();

        // First reinvestment row is period 2
        assert_relative_eq!(engine.principal_balance_ex_defaults(), 1_000_000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_clean_strip_pays_coupon_and_bullet() {
        let mut engine = engine(12);
        let curve = flat_curve(0.03);
        engine.add_reinvestment(1_000_000.0, Some(&curve)).unwrap();

        // Flows start the period after the purchase
        assert_relative_eq!(engine.proceeds(ProceedsKind::Interest), 0.0);
        engine.roll_forward();
        // Coupon is index + spread = 7%, quarterly on 1mm
        assert_relative_eq!(
            engine.proceeds(ProceedsKind::Interest),
            17_500.0,
            epsilon = 100.0
        );
        assert_relative_eq!(engine.proceeds(ProceedsKind::Principal), 0.0);

        // Bullet pays at period 5 (4 quarters after purchase)
        for _ in 0..3 {
            engine.roll_forward();
        }
        assert_relative_eq!(
            engine.proceeds(ProceedsKind::Principal),
            1_000_000.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_floor_binds_on_low_curve() {
        let mut engine = engine(12);
        let curve = flat_curve(0.001);
        engine.add_reinvestment(1_000_000.0, Some(&curve)).unwrap();
        engine.roll_forward();
        // floor + spread = 5%
        assert_relative_eq!(
            engine.proceeds(ProceedsKind::Interest),
            12_500.0,
            epsilon = 50.0
        );
    }

    #[test]
    fn test_multiple_reinvestments_sum() {
        let mut engine = engine(12);
        let curve = flat_curve(0.03);
        engine.add_reinvestment(600_000.0, Some(&curve)).unwrap();
        engine.add_reinvestment(400_000.0, Some(&curve)).unwrap();
        assert_relative_eq!(engine.principal_balance_ex_defaults(), 1_000_000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_defaults_recover_after_lag() {
        let mut profile = profile();
        profile.default = RateCurve::Flat(0.10);
        let mut engine = ReinvestmentEngine::new(profile).unwrap();
        engine
            .deal_setup(d(2025, 1, 15), &quarterly_dates(12), 3)
            .unwrap();
        let curve = flat_curve(0.03);
        engine.add_reinvestment(1_000_000.0, Some(&curve)).unwrap();

        // Period 2 takes the first default; recovery shows one lag later
        engine.roll_forward();
        let first_default_balance = engine.principal_balance_defaults();
        assert!(first_default_balance > 0.0);
        engine.roll_forward();
        let recovered = engine.proceeds(ProceedsKind::Principal);
        assert!(recovered > 0.0);
    }

    #[test]
    fn test_liquidation_prices_performing_and_defaults() {
        let mut engine = engine(12);
        let curve = flat_curve(0.03);
        engine.add_reinvestment(1_000_000.0, Some(&curve)).unwrap();

        engine.roll_forward(); // into the first coupon period
        let sold = engine.liquidate(0.70);
        assert_relative_eq!(sold, 700_000.0, epsilon = 1e-6);

        // Nothing flows afterwards
        engine.roll_forward();
        assert_relative_eq!(engine.proceeds(ProceedsKind::Interest), 0.0);
        assert_relative_eq!(engine.proceeds(ProceedsKind::Principal), 0.0);
        assert_eq!(engine.last_period(), 2);
    }

    #[test]
    fn test_truncates_at_deal_horizon() {
        // Only 2 deal periods left but a 12-month synthetic asset
        let mut engine = engine(2);
        let curve = flat_curve(0.03);
        engine.add_reinvestment(1_000_000.0, Some(&curve)).unwrap();
        // Strip stops at the horizon without panicking
        assert!(engine.cashflow_table().len() <= 2);
    }
}
