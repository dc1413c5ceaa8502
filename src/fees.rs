//! Deal fees
//!
//! Trustee, administrative, and management fees accrue per period either
//! as a flat annual amount or as a rate on the fee basis (collateral
//! balance plus principal proceeds). Unpaid fee carries into the next
//! period's due amount.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::time::DayCount;

/// How the fee accrues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeKind {
    /// Flat annual dollar amount
    Fixed { annual_amount: f64 },
    /// Annual rate applied to the period fee basis
    OnBalance { rate: f64 },
}

/// Fee definition from the input bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSpec {
    /// Stable identifier, e.g. "TRUSTEE_FEE"
    pub id: String,
    pub kind: FeeKind,
    #[serde(default)]
    pub day_count: DayCount,
}

/// One period of fee activity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeePeriod {
    pub payment_date: Option<NaiveDate>,
    pub basis: f64,
    pub accrued: f64,
    pub due: f64,
    pub paid: f64,
}

/// Live fee state across a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeState {
    pub spec: FeeSpec,
    unpaid: f64,
    current_due: f64,
    pub periods: Vec<FeePeriod>,
}

impl FeeState {
    pub fn new(spec: FeeSpec, num_periods: usize) -> Self {
        Self {
            spec,
            unpaid: 0.0,
            current_due: 0.0,
            periods: vec![FeePeriod::default(); num_periods],
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Accrue the period's fee on the basis over the accrual window.
    pub fn accrue(
        &mut self,
        period: usize,
        basis: f64,
        accrual_begin: NaiveDate,
        accrual_end: NaiveDate,
        payment_date: NaiveDate,
    ) {
        let yf = self.spec.day_count.year_frac(accrual_begin, accrual_end);
        let accrued = match &self.spec.kind {
            FeeKind::Fixed { annual_amount } => annual_amount * yf,
            FeeKind::OnBalance { rate } => rate * basis * yf,
        };
        self.current_due = accrued + self.unpaid;

        if let Some(row) = self.periods.get_mut(period - 1) {
            row.payment_date = Some(payment_date);
            row.basis = basis;
            row.accrued = accrued;
            row.due = self.current_due;
        }
    }

    pub fn due(&self) -> f64 {
        self.current_due
    }

    /// Pay from the available amount; the shortfall carries forward.
    pub fn pay(&mut self, period: usize, available: f64) -> f64 {
        let paid = available.max(0.0).min(self.current_due);
        self.unpaid = self.current_due - paid;
        self.current_due -= paid;
        if let Some(row) = self.periods.get_mut(period - 1) {
            row.paid += paid;
        }
        paid
    }

    pub fn total_paid(&self) -> f64 {
        self.periods.iter().map(|p| p.paid).sum()
    }
}
