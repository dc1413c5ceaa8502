//! Tranche (liability) balances, accrual, and payment tracking
//!
//! Each tranche accrues interest per period off the LIBOR reset (floor
//! clamped for floaters), carries unpaid interest forward as deferred
//! interest, and amortizes as the waterfall directs. PIK-eligible tranches
//! accrue on balance plus deferred; others just carry the shortfall into
//! the next period's due amount.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::time::DayCount;

/// Tranche coupon specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrancheRate {
    Fixed { coupon: f64 },
    Float { spread: f64, floor: f64 },
}

/// Static tranche definition from the input bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tranche {
    pub name: String,
    /// Priority rank: 1 pays first
    pub rank: u32,
    pub original_balance: f64,
    pub rate: TrancheRate,
    #[serde(default)]
    pub pik_eligible: bool,
    #[serde(default)]
    pub day_count: DayCount,
    /// Equity / subordinated notes take the residual and have no
    /// contractual interest due
    #[serde(default)]
    pub is_equity: bool,
}

/// One period of tranche activity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranchePeriod {
    pub payment_date: Option<NaiveDate>,
    pub beg_balance: f64,
    pub end_balance: f64,
    pub coupon: f64,
    pub interest_due: f64,
    pub interest_paid: f64,
    pub principal_paid: f64,
    pub deferred_balance: f64,
}

/// Live tranche state across the deal run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrancheState {
    pub tranche: Tranche,
    pub balance: f64,
    pub deferred: f64,
    current_due: f64,
    current_coupon: f64,
    pub periods: Vec<TranchePeriod>,
}

impl TrancheState {
    pub fn new(tranche: Tranche, num_periods: usize) -> Self {
        let balance = tranche.original_balance;
        Self {
            tranche,
            balance,
            deferred: 0.0,
            current_due: 0.0,
            current_coupon: 0.0,
            periods: vec![TranchePeriod::default(); num_periods],
        }
    }

    pub fn name(&self) -> &str {
        &self.tranche.name
    }

    pub fn rank(&self) -> u32 {
        self.tranche.rank
    }

    /// Accrue interest for a 1-based period at the reset LIBOR.
    pub fn accrue(
        &mut self,
        period: usize,
        libor: f64,
        accrual_begin: NaiveDate,
        accrual_end: NaiveDate,
        payment_date: NaiveDate,
    ) {
        let coupon = match &self.tranche.rate {
            TrancheRate::Fixed { coupon } => *coupon,
            TrancheRate::Float { spread, floor } => {
                if libor > *floor {
                    libor + spread
                } else {
                    floor + spread
                }
            }
        };
        self.current_coupon = coupon;

        let yf = self.tranche.day_count.year_frac(accrual_begin, accrual_end);
        let accrual_base = if self.tranche.pik_eligible {
            self.balance + self.deferred
        } else {
            self.balance
        };
        let accrued = if self.tranche.is_equity {
            0.0
        } else {
            yf * coupon * accrual_base
        };
        self.current_due = accrued + self.deferred;

        if let Some(row) = self.periods.get_mut(period - 1) {
            row.payment_date = Some(payment_date);
            row.beg_balance = self.balance;
            row.coupon = coupon;
            row.interest_due = self.current_due;
            row.deferred_balance = self.deferred;
        }
    }

    pub fn interest_due(&self) -> f64 {
        self.current_due
    }

    pub fn coupon(&self) -> f64 {
        self.current_coupon
    }

    /// Pay interest from the available amount; returns what was consumed.
    /// The unpaid remainder defers to next period.
    pub fn pay_interest(&mut self, period: usize, available: f64) -> f64 {
        let paid = available.max(0.0).min(self.current_due);
        let unpaid = self.current_due - paid;
        self.current_due -= paid;
        self.deferred = unpaid;

        if let Some(row) = self.periods.get_mut(period - 1) {
            row.interest_paid += paid;
            row.deferred_balance = self.deferred;
        }
        paid
    }

    /// Pay principal from the available amount; returns what was consumed.
    pub fn pay_principal(&mut self, period: usize, available: f64) -> f64 {
        let paid = available.max(0.0).min(self.balance);
        self.balance -= paid;
        if let Some(row) = self.periods.get_mut(period - 1) {
            row.principal_paid += paid;
        }
        paid
    }

    /// Record residual distributions on the equity tranche.
    pub fn distribute_residual(&mut self, period: usize, amount: f64) {
        if let Some(row) = self.periods.get_mut(period - 1) {
            row.interest_paid += amount;
        }
    }

    /// Close out the period's balance column.
    pub fn roll_forward(&mut self, period: usize) {
        if let Some(row) = self.periods.get_mut(period - 1) {
            row.end_balance = self.balance;
            row.deferred_balance = self.deferred;
        }
    }

    pub fn total_interest_paid(&self) -> f64 {
        self.periods.iter().map(|p| p.interest_paid).sum()
    }

    pub fn total_principal_paid(&self) -> f64 {
        self.periods.iter().map(|p| p.principal_paid).sum()
    }

    /// Cash-flow stream (date, interest + principal paid) for risk
    /// measures; skips empty periods.
    pub fn payment_stream(&self) -> Vec<(NaiveDate, f64)> {
        self.periods
            .iter()
            .filter_map(|p| {
                let total = p.interest_paid + p.principal_paid;
                p.payment_date
                    .filter(|_| total != 0.0)
                    .map(|date| (date, total))
            })
            .collect()
    }
}

/// Risk measures calculated per tranche after a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrancheRiskMeasures {
    pub tranche_yield: Option<f64>,
    pub discount_margin: Option<f64>,
    pub price: Option<f64>,
    pub weighted_average_life: Option<f64>,
    pub macaulay_duration: Option<f64>,
    pub modified_duration: Option<f64>,
}
