//! Manager incentive fee on subordinated distributions above an IRR hurdle
//!
//! The fee engine keeps a ledger of subordinated payments discounted to
//! the closing date at the hurdle rate. Until the cumulative payments in a
//! period meet the grown hurdle threshold, distributions pass through
//! untouched; once the threshold is reached the manager takes the fee rate
//! off every subsequent distribution. `threshold_reached` is monotone for
//! the life of the run.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::analytics::xirr;
use crate::error::{EngineError, EngineResult, RunWarning};

const HURDLE_DAYS_PER_YEAR: f64 = 365.0;

/// Per-period incentive-fee output row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncentivePeriod {
    pub threshold: f64,
    pub fee_paid: f64,
    /// Realized equity IRR through this period; `None` when the solver
    /// found no root
    pub irr: Option<f64>,
}

/// IRR-hurdle incentive fee state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncentiveFee {
    hurdle_rate: f64,
    fee_rate: f64,
    closing_date: Option<NaiveDate>,
    /// Dated subordinated payments, historical plus realized
    sub_payments: BTreeMap<NaiveDate, f64>,
    /// Negative PV (at the hurdle) of payments made so far
    cum_discounted: f64,
    threshold_reached: bool,

    current_threshold: f64,
    current_sub_payments: f64,
    current_fee: f64,
    current_date: Option<NaiveDate>,
    period: usize,
    deal_ready: bool,

    pub periods: Vec<IncentivePeriod>,
    warnings: Vec<RunWarning>,
}

impl IncentiveFee {
    /// Configure the hurdle, the fee rate, and any historical
    /// subordinated payments.
    pub fn new(
        hurdle_rate: f64,
        fee_rate: f64,
        historical_payments: BTreeMap<NaiveDate, f64>,
    ) -> EngineResult<Self> {
        if hurdle_rate <= -1.0 {
            return Err(EngineError::validation("hurdle rate must exceed -100%"));
        }
        if !(0.0..=1.0).contains(&fee_rate) {
            return Err(EngineError::validation("fee rate must be in [0, 1]"));
        }
        Ok(Self {
            hurdle_rate,
            fee_rate,
            closing_date: None,
            sub_payments: historical_payments,
            cum_discounted: 0.0,
            threshold_reached: false,
            current_threshold: 0.0,
            current_sub_payments: 0.0,
            current_fee: 0.0,
            current_date: None,
            period: 1,
            deal_ready: false,
            periods: Vec::new(),
            warnings: Vec::new(),
        })
    }

    /// Bind the fee to a deal: size the period arrays, drop payments past
    /// the analysis date, and fold history into the discounted ledger.
    pub fn deal_setup(
        &mut self,
        num_payments: usize,
        closing_date: NaiveDate,
        analysis_date: NaiveDate,
    ) -> EngineResult<()> {
        self.closing_date = Some(closing_date);
        self.periods = vec![IncentivePeriod::default(); num_payments];
        self.period = 1;

        self.sub_payments.retain(|&date, _| date <= analysis_date);

        self.cum_discounted = 0.0;
        for (&date, &payment) in &self.sub_payments {
            self.cum_discounted -= payment / self.growth_factor(closing_date, date);
            if self.cum_discounted > 0.0 {
                self.threshold_reached = true;
                break;
            }
        }

        self.deal_ready = true;
        Ok(())
    }

    fn growth_factor(&self, closing: NaiveDate, date: NaiveDate) -> f64 {
        let years = (date - closing).num_days() as f64 / HURDLE_DAYS_PER_YEAR;
        (1.0 + self.hurdle_rate).powf(years)
    }

    /// Start a period: grow the outstanding hurdle claim to the payment
    /// date.
    pub fn calc(&mut self, next_pay_date: NaiveDate) -> EngineResult<()> {
        let closing = self.require_setup()?;
        self.current_date = Some(next_pay_date);
        self.current_threshold = if self.threshold_reached {
            0.0
        } else {
            -self.cum_discounted * self.growth_factor(closing, next_pay_date)
        };
        if let Some(row) = self.periods.get_mut(self.period - 1) {
            row.threshold = self.current_threshold;
        }
        Ok(())
    }

    /// Additional subordinated payment still required to reach the hurdle
    /// this period.
    pub fn remaining_threshold(&self) -> f64 {
        if self.threshold_reached {
            0.0
        } else {
            (self.current_threshold - self.current_sub_payments).max(0.0)
        }
    }

    pub fn threshold_reached(&self) -> bool {
        self.threshold_reached
    }

    /// Record a distribution to the subordinated noteholders.
    pub fn pay_to_sub_noteholders(&mut self, amount: f64) -> EngineResult<()> {
        self.require_setup()?;
        self.current_sub_payments += amount;
        if self.current_threshold > 0.0 && self.current_sub_payments >= self.current_threshold {
            self.threshold_reached = true;
            debug!(
                "incentive hurdle reached in period {} at {:.2} of sub payments",
                self.period, self.current_sub_payments
            );
        }
        Ok(())
    }

    /// Run a gross amount through the fee gate; returns the net paid on
    /// to the sub-notes.
    pub fn pay_incentive_fee(&mut self, gross: f64) -> EngineResult<f64> {
        self.require_setup()?;
        if self.threshold_reached {
            let fee = gross * self.fee_rate;
            self.current_fee += fee;
            Ok(gross - fee)
        } else {
            Ok(gross)
        }
    }

    /// Close the period: settle the ledger, recompute the realized IRR,
    /// and advance.
    pub fn roll_forward(&mut self) -> EngineResult<()> {
        let closing = self.require_setup()?;
        let current_date = self
            .current_date
            .ok_or_else(|| EngineError::state("calc() must run before roll_forward()"))?;

        if let Some(row) = self.periods.get_mut(self.period - 1) {
            row.threshold = self.current_threshold;
            row.fee_paid = self.current_fee;
        }

        self.cum_discounted -=
            self.current_sub_payments / self.growth_factor(closing, current_date);
        *self.sub_payments.entry(current_date).or_insert(0.0) += self.current_sub_payments;

        let stream: Vec<(NaiveDate, f64)> = self
            .sub_payments
            .iter()
            .map(|(&date, &amount)| (date, amount))
            .collect();
        let irr = xirr(&stream);
        if irr.is_none() && stream.len() >= 2 {
            self.warnings.push(RunWarning::new(
                self.period,
                "equity IRR did not converge; recorded as null",
            ));
        }
        if let Some(row) = self.periods.get_mut(self.period - 1) {
            row.irr = irr;
        }

        self.period += 1;
        self.current_sub_payments = 0.0;
        self.current_fee = 0.0;
        Ok(())
    }

    pub fn total_fee_paid(&self) -> f64 {
        self.periods.iter().map(|p| p.fee_paid).sum()
    }

    pub fn cum_discounted(&self) -> f64 {
        self.cum_discounted
    }

    pub fn current_period(&self) -> usize {
        self.period
    }

    pub fn warnings(&self) -> &[RunWarning] {
        &self.warnings
    }

    fn require_setup(&self) -> EngineResult<NaiveDate> {
        if !self.deal_ready {
            return Err(EngineError::state(
                "incentive fee requires deal_setup() before use",
            ));
        }
        self.closing_date
            .ok_or_else(|| EngineError::state("incentive fee has no closing date"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn fee_under_test() -> IncentiveFee {
        let mut fee = IncentiveFee::new(0.08, 0.20, BTreeMap::new()).unwrap();
        fee.deal_setup(8, d(2020, 1, 1), d(2020, 1, 1)).unwrap();
        fee
    }

    #[test]
    fn test_use_before_setup_is_state_error() {
        let mut fee = IncentiveFee::new(0.08, 0.20, BTreeMap::new()).unwrap();
        assert!(matches!(
            fee.pay_to_sub_noteholders(100.0),
            Err(EngineError::State(_))
        ));
        assert!(matches!(fee.calc(d(2021, 1, 1)), Err(EngineError::State(_))));
    }

    #[test]
    fn test_hurdle_ledger_accumulates_at_discount() {
        // Hurdle 8%, fee 20%, closing 2020-01-01
        let mut fee = fee_under_test();

        fee.calc(d(2021, 1, 1)).unwrap();
        fee.pay_to_sub_noteholders(1_000_000.0).unwrap();
        assert!(!fee.threshold_reached());
        fee.roll_forward().unwrap();
        // Ledger holds -1,000,000 / 1.08^(366/365)
        let growth1 = 1.08_f64.powf(366.0 / 365.0);
        assert_relative_eq!(fee.cum_discounted(), -1_000_000.0 / growth1, epsilon = 1.0);

        fee.calc(d(2022, 1, 1)).unwrap();
        // Threshold is the ledger grown back to the payment date
        let growth2 = 1.08_f64.powf(731.0 / 365.0);
        assert_relative_eq!(
            fee.remaining_threshold(),
            1_000_000.0 / growth1 * growth2,
            epsilon = 1.0
        );
        fee.pay_to_sub_noteholders(1_000_000.0).unwrap();
        assert!(!fee.threshold_reached());
        fee.roll_forward().unwrap();
        assert_relative_eq!(
            fee.cum_discounted(),
            -(1_000_000.0 / growth1 + 1_000_000.0 / growth2),
            epsilon = 1.0
        );
    }

    #[test]
    fn test_threshold_crossing_starts_fee() {
        let mut fee = fee_under_test();

        for (date, amount) in [(d(2021, 1, 1), 1_000_000.0), (d(2022, 1, 1), 1_000_000.0)] {
            fee.calc(date).unwrap();
            fee.pay_to_sub_noteholders(amount).unwrap();
            fee.roll_forward().unwrap();
        }
        assert!(!fee.threshold_reached());

        // A payment clearing the grown threshold flips the flag
        fee.calc(d(2023, 1, 1)).unwrap();
        assert!(fee.remaining_threshold() > 2_000_000.0);
        fee.pay_to_sub_noteholders(2_500_000.0).unwrap();
        assert!(fee.threshold_reached());
        fee.roll_forward().unwrap();

        // Fee applies to every distribution afterwards
        fee.calc(d(2024, 1, 1)).unwrap();
        let net = fee.pay_incentive_fee(100_000.0).unwrap();
        assert_relative_eq!(net, 80_000.0);
        fee.pay_to_sub_noteholders(net).unwrap();
        fee.roll_forward().unwrap();
        assert_relative_eq!(fee.total_fee_paid(), 20_000.0);
    }

    #[test]
    fn test_threshold_reached_is_monotone() {
        let mut fee = fee_under_test();
        let mut seen_reached = false;
        let payments = [500_000.0, 4_000_000.0, 100.0, 50_000.0];
        for (i, amount) in payments.iter().enumerate() {
            fee.calc(d(2021 + i as i32, 1, 1)).unwrap();
            let net = fee.pay_incentive_fee(*amount).unwrap();
            fee.pay_to_sub_noteholders(net).unwrap();
            if seen_reached {
                assert!(fee.threshold_reached());
            }
            seen_reached |= fee.threshold_reached();
            fee.roll_forward().unwrap();
        }
        assert!(seen_reached);
    }

    #[test]
    fn test_no_fee_before_threshold() {
        let mut fee = fee_under_test();
        fee.calc(d(2021, 1, 1)).unwrap();
        let net = fee.pay_incentive_fee(250_000.0).unwrap();
        assert_relative_eq!(net, 250_000.0);
        assert_relative_eq!(fee.total_fee_paid(), 0.0);
    }

    #[test]
    fn test_historical_payments_discarded_past_analysis() {
        let history = BTreeMap::from([
            (d(2019, 1, 1), 100_000.0),
            (d(2021, 1, 1), 900_000.0), // after analysis, dropped
        ]);
        let mut fee = IncentiveFee::new(0.08, 0.20, history).unwrap();
        fee.deal_setup(8, d(2018, 1, 1), d(2020, 1, 1)).unwrap();
        // Only the 2019 payment is in the ledger
        let growth = 1.08_f64.powf(365.0 / 365.0);
        assert_relative_eq!(fee.cum_discounted(), -100_000.0 / growth, epsilon = 1.0);
    }

    #[test]
    fn test_irr_recorded_per_period() {
        let mut fee = fee_under_test();
        // Seed a negative flow so the XIRR has a sign change
        fee.calc(d(2020, 7, 1)).unwrap();
        fee.pay_to_sub_noteholders(-5_000_000.0).unwrap();
        fee.roll_forward().unwrap();

        fee.calc(d(2021, 7, 1)).unwrap();
        fee.pay_to_sub_noteholders(5_500_000.0).unwrap();
        fee.roll_forward().unwrap();

        let row = &fee.periods[1];
        let irr = row.irr.expect("irr should converge");
        assert_relative_eq!(irr, 0.10, epsilon = 0.01);
    }
}
