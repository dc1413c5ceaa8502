//! Per-asset cash-flow strip
//!
//! A strip is a run of per-period rows with aligned balance and flow
//! columns. Rows are stored 0-based; the accessors speak the domain's
//! 1-based period numbering. Strips from multiple sources sum row-wise
//! (reinvestment layers its synthetic purchases onto one strip).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One period of projected asset cash flows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CashflowRow {
    pub payment_date: Option<NaiveDate>,
    pub accrual_begin: Option<NaiveDate>,
    pub accrual_end: Option<NaiveDate>,

    // Balances
    pub beg_balance: f64,
    pub end_balance: f64,
    pub default_balance: f64,
    pub mv_default_balance: f64,

    // Period flows
    pub default: f64,
    pub mv_default: f64,
    pub interest: f64,
    pub sched_principal: f64,
    pub unsched_principal: f64,
    pub recoveries: f64,
    pub net_loss: f64,
    pub sold: f64,
}

impl CashflowRow {
    /// Cash generated this period (interest plus all principal-like flows).
    pub fn total(&self) -> f64 {
        self.interest + self.sched_principal + self.unsched_principal + self.recoveries + self.sold
    }

    /// Principal proceeds this period.
    pub fn principal(&self) -> f64 {
        self.sched_principal + self.unsched_principal + self.recoveries
    }

    /// Balance identity: end = beg - default - sched - unsched.
    pub fn balance_residual(&self) -> f64 {
        self.beg_balance
            - self.default
            - self.sched_principal
            - self.unsched_principal
            - self.end_balance
    }
}

/// Aligned per-period cash-flow rows for one asset or one synthetic strip
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CashflowStrip {
    rows: Vec<CashflowRow>,
}

impl CashflowStrip {
    pub fn with_periods(num_periods: usize) -> Self {
        Self {
            rows: vec![CashflowRow::default(); num_periods],
        }
    }

    /// Number of periods in the strip.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row for 1-based period `p`.
    pub fn row(&self, p: usize) -> Option<&CashflowRow> {
        if p == 0 {
            return None;
        }
        self.rows.get(p - 1)
    }

    /// Mutable row for 1-based period `p`.
    pub fn row_mut(&mut self, p: usize) -> Option<&mut CashflowRow> {
        if p == 0 {
            return None;
        }
        self.rows.get_mut(p - 1)
    }

    /// Grow the strip so 1-based period `p` exists.
    pub fn ensure_period(&mut self, p: usize) -> &mut CashflowRow {
        if p > self.rows.len() {
            self.rows.resize_with(p, CashflowRow::default);
        }
        &mut self.rows[p - 1]
    }

    pub fn push(&mut self, row: CashflowRow) {
        self.rows.push(row);
    }

    pub fn iter(&self) -> impl Iterator<Item = &CashflowRow> {
        self.rows.iter()
    }

    /// 1-based period numbers paired with rows.
    pub fn periods(&self) -> impl Iterator<Item = (usize, &CashflowRow)> {
        self.rows.iter().enumerate().map(|(i, r)| (i + 1, r))
    }

    pub fn total_interest(&self) -> f64 {
        self.rows.iter().map(|r| r.interest).sum()
    }

    pub fn total_principal(&self) -> f64 {
        self.rows.iter().map(|r| r.principal()).sum()
    }

    pub fn total_net_loss(&self) -> f64 {
        self.rows.iter().map(|r| r.net_loss).sum()
    }

    /// Zero out every flow and balance from 1-based period `p` onward.
    pub fn zero_from(&mut self, p: usize) {
        for row in self.rows.iter_mut().skip(p.saturating_sub(1)) {
            let dates = (row.payment_date, row.accrual_begin, row.accrual_end);
            *row = CashflowRow::default();
            (row.payment_date, row.accrual_begin, row.accrual_end) = dates;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_one_based_accessors() {
        let mut strip = CashflowStrip::with_periods(4);
        strip.row_mut(1).unwrap().interest = 100.0;
        strip.row_mut(4).unwrap().interest = 400.0;

        assert!(strip.row(0).is_none());
        assert_relative_eq!(strip.row(1).unwrap().interest, 100.0);
        assert_relative_eq!(strip.row(4).unwrap().interest, 400.0);
        assert!(strip.row(5).is_none());
    }

    #[test]
    fn test_ensure_period_grows() {
        let mut strip = CashflowStrip::default();
        strip.ensure_period(3).sched_principal = 50.0;
        assert_eq!(strip.len(), 3);
        assert_relative_eq!(strip.row(3).unwrap().sched_principal, 50.0);
    }

    #[test]
    fn test_balance_residual() {
        let row = CashflowRow {
            beg_balance: 1000.0,
            default: 100.0,
            sched_principal: 200.0,
            unsched_principal: 50.0,
            end_balance: 650.0,
            ..Default::default()
        };
        assert_relative_eq!(row.balance_residual(), 0.0);
    }

    #[test]
    fn test_zero_from_keeps_dates() {
        let mut strip = CashflowStrip::with_periods(3);
        let date = NaiveDate::from_ymd_opt(2025, 4, 15).unwrap();
        strip.row_mut(2).unwrap().payment_date = Some(date);
        strip.row_mut(2).unwrap().interest = 10.0;

        strip.zero_from(2);
        let row = strip.row(2).unwrap();
        assert_eq!(row.payment_date, Some(date));
        assert_relative_eq!(row.interest, 0.0);
    }
}
