//! Collateral pool
//!
//! Owns obligations by id together with the deal accounts and, once
//! projected, each asset's cash-flow strip. Buys clamp to available
//! principal cash and sells clamp to held par; both clamps are recorded as
//! run warnings rather than raised.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use log::warn;

use crate::accounts::{AccountKind, AccountSet, CashKind};
use crate::assets::{
    project_cashflows, Asset, CashflowAssumptions, CashflowStrip, FilterExpr,
};
use crate::curve::YieldCurve;
use crate::error::{EngineError, EngineResult, RunWarning};
use crate::money::identity_tolerance;
use crate::ratings::is_ccc_band;
use crate::time::Calendar;

/// Collateral pool with positions, accounts, and projected strips
#[derive(Debug, Clone, Default)]
pub struct CollateralPool {
    assets: BTreeMap<String, Asset>,
    strips: BTreeMap<String, CashflowStrip>,
    pub accounts: AccountSet,
    /// Current 1-based period once the deal is running
    period: usize,
    warnings: Vec<RunWarning>,
}

impl CollateralPool {
    pub fn new() -> Self {
        Self {
            assets: BTreeMap::new(),
            strips: BTreeMap::new(),
            accounts: AccountSet::new(),
            period: 1,
            warnings: Vec::new(),
        }
    }

    // ---- positions ----

    /// Add an asset; an existing id aggregates par.
    pub fn add_asset(&mut self, asset: Asset) -> EngineResult<()> {
        asset.validate()?;
        match self.assets.get_mut(&asset.id) {
            Some(existing) => existing.par_amount += asset.par_amount,
            None => {
                self.assets.insert(asset.id.clone(), asset);
            }
        }
        Ok(())
    }

    pub fn remove_asset(&mut self, id: &str) -> Option<Asset> {
        self.strips.remove(id);
        self.assets.remove(id)
    }

    pub fn asset(&self, id: &str) -> Option<&Asset> {
        self.assets.get(id)
    }

    pub fn asset_mut(&mut self, id: &str) -> Option<&mut Asset> {
        self.assets.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.assets.contains_key(id)
    }

    pub fn asset_ids(&self) -> Vec<String> {
        self.assets.keys().cloned().collect()
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn strip(&self, id: &str) -> Option<&CashflowStrip> {
        self.strips.get(id)
    }

    /// Adjust a position's par, flooring at zero.
    pub fn add_par(&mut self, id: &str, amount: f64) -> EngineResult<()> {
        let asset = self
            .assets
            .get_mut(id)
            .ok_or_else(|| EngineError::validation(format!("unknown asset id: {id}")))?;
        asset.par_amount = (asset.par_amount + amount).max(0.0);
        Ok(())
    }

    /// Buy par at a price, spending collection principal. Insufficient
    /// cash fills partially and records a warning.
    pub fn purchase(&mut self, asset: Asset, price: f64) -> EngineResult<f64> {
        asset.validate()?;
        if price <= 0.0 {
            return Err(EngineError::validation("purchase price must be positive"));
        }
        let cash = self
            .accounts
            .balance(AccountKind::Collection, CashKind::Principal);
        let cost = asset.par_amount * price;

        let filled_par = if cost <= cash {
            asset.par_amount
        } else {
            let filled = cash / price;
            self.warnings.push(RunWarning::new(
                self.period,
                format!(
                    "partial fill buying {}: wanted {:.2} par, filled {:.2}",
                    asset.id, asset.par_amount, filled
                ),
            ));
            warn!(
                "partial fill buying {}: wanted {:.2} par, cash only covers {:.2}",
                asset.id, asset.par_amount, filled
            );
            filled
        };

        if filled_par > 0.0 {
            self.accounts.add(
                AccountKind::Collection,
                CashKind::Principal,
                -(filled_par * price),
            );
            let mut position = asset;
            position.par_amount = filled_par;
            self.add_asset(position)?;
        }
        Ok(filled_par)
    }

    /// Sell par at a price; oversells clamp to the held amount.
    pub fn sell(&mut self, id: &str, par: f64, price: f64) -> EngineResult<f64> {
        if price < 0.0 {
            return Err(EngineError::validation("sale price must be non-negative"));
        }
        let held = self
            .assets
            .get(id)
            .map(|a| a.par_amount)
            .ok_or_else(|| EngineError::validation(format!("unknown asset id: {id}")))?;

        let sold = if par > held {
            self.warnings.push(RunWarning::new(
                self.period,
                format!("sell of {par:.2} par of {id} clamped to held {held:.2}"),
            ));
            warn!("sell of {par:.2} par of {id} clamped to held {held:.2}");
            held
        } else {
            par
        };

        self.add_par(id, -sold)?;
        self.accounts
            .add(AccountKind::Collection, CashKind::Principal, sold * price);
        Ok(sold)
    }

    // ---- aggregates ----

    pub fn total_par(&self) -> f64 {
        self.assets.values().map(|a| a.par_amount).sum()
    }

    pub fn performing_par(&self) -> f64 {
        self.assets
            .values()
            .filter(|a| !a.is_defaulted())
            .map(|a| a.par_amount)
            .sum()
    }

    pub fn defaulted_par(&self) -> f64 {
        self.assets
            .values()
            .filter(|a| a.is_defaulted())
            .map(|a| a.par_amount)
            .sum()
    }

    /// Market value of defaulted positions at their recovery rates.
    pub fn mv_of_defaulted(&self) -> f64 {
        self.assets
            .values()
            .filter(|a| a.is_defaulted())
            .map(|a| a.par_amount * a.effective_recovery_rate())
            .sum()
    }

    pub fn ccc_par(&self) -> f64 {
        self.assets
            .values()
            .filter(|a| !a.is_defaulted() && (is_ccc_band(&a.sp_rating) || is_ccc_band(&a.moodys_rating)))
            .map(|a| a.par_amount)
            .sum()
    }

    /// Haircut on the CCC bucket above the threshold share of total par:
    /// the excess is carried at recovery value instead of par.
    pub fn ccc_haircut(&self, threshold_pct: f64) -> f64 {
        let total = self.total_par();
        if total <= 0.0 {
            return 0.0;
        }
        let ccc = self.ccc_par();
        let excess = (ccc - threshold_pct * total).max(0.0);
        if excess <= 0.0 {
            return 0.0;
        }
        let ccc_recovery: f64 = {
            let (mv, par) = self
                .assets
                .values()
                .filter(|a| !a.is_defaulted() && (is_ccc_band(&a.sp_rating) || is_ccc_band(&a.moodys_rating)))
                .fold((0.0, 0.0), |(mv, par), a| {
                    (mv + a.par_amount * a.effective_recovery_rate(), par + a.par_amount)
                });
            if par > 0.0 {
                mv / par
            } else {
                0.0
            }
        };
        excess * (1.0 - ccc_recovery)
    }

    /// Par held by assets matching a filter.
    pub fn collateral_par(&self, filter: Option<&FilterExpr>) -> EngineResult<f64> {
        let mut total = 0.0;
        for asset in self.assets.values() {
            let include = match filter {
                Some(expr) => expr
                    .evaluate(asset)
                    .map_err(|e| EngineError::validation(e.to_string()))?,
                None => true,
            };
            if include {
                total += asset.par_amount;
            }
        }
        Ok(total)
    }

    pub fn asset_count(&self, filter: Option<&FilterExpr>) -> EngineResult<usize> {
        let mut count = 0;
        for asset in self.assets.values() {
            let include = match filter {
                Some(expr) => expr
                    .evaluate(asset)
                    .map_err(|e| EngineError::validation(e.to_string()))?,
                None => true,
            };
            if include {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn last_maturity_date(&self) -> Option<NaiveDate> {
        self.assets.values().map(|a| a.maturity_date).max()
    }

    // ---- projection ----

    /// Project every asset's strip from the analysis date. When a deal
    /// payment schedule is supplied, each asset's flows are bucketed into
    /// the deal period that pays on or after the asset's payment date, so
    /// monthly collateral aggregates cleanly into a quarterly deal.
    pub fn project(
        &mut self,
        calendar: &Calendar,
        analysis_date: NaiveDate,
        assumptions: &CashflowAssumptions,
        curve: Option<&YieldCurve>,
        deal_payment_dates: Option<&[NaiveDate]>,
    ) -> EngineResult<()> {
        self.strips.clear();
        for (id, asset) in &self.assets {
            let strip = project_cashflows(asset, calendar, analysis_date, assumptions, curve)?;
            let strip = match deal_payment_dates {
                Some(dates) if !dates.is_empty() => align_to_schedule(&strip, dates),
                _ => strip,
            };
            self.strips.insert(id.clone(), strip);
        }
        self.period = 1;
        Ok(())
    }

    pub fn current_period(&self) -> usize {
        self.period
    }

    pub fn roll_forward(&mut self) {
        self.period += 1;
    }

    /// Interest collected across strips in the current period.
    pub fn interest_proceeds(&self) -> f64 {
        self.strips
            .values()
            .filter_map(|s| s.row(self.period))
            .map(|r| r.interest)
            .sum()
    }

    /// Principal collected across strips in the current period (scheduled,
    /// unscheduled, recoveries, and anything sold).
    pub fn principal_proceeds(&self) -> f64 {
        self.strips
            .values()
            .filter_map(|s| s.row(self.period))
            .map(|r| r.principal() + r.sold)
            .sum()
    }

    pub fn unscheduled_principal(&self) -> f64 {
        self.strips
            .values()
            .filter_map(|s| s.row(self.period))
            .map(|r| r.unsched_principal)
            .sum()
    }

    pub fn recoveries(&self) -> f64 {
        self.strips
            .values()
            .filter_map(|s| s.row(self.period))
            .map(|r| r.recoveries)
            .sum()
    }

    /// Performing balance at the start of the current period.
    pub fn current_beg_balance(&self) -> f64 {
        self.strips
            .values()
            .filter_map(|s| s.row(self.period))
            .map(|r| r.beg_balance)
            .sum()
    }

    /// Performing balance entering next period.
    pub fn principal_balance_ex_defaults(&self) -> f64 {
        self.strips
            .values()
            .filter_map(|s| s.row(self.period + 1))
            .map(|r| r.beg_balance)
            .sum()
    }

    /// Defaulted balance entering next period.
    pub fn principal_balance_defaults(&self) -> f64 {
        self.strips
            .values()
            .filter_map(|s| s.row(self.period))
            .map(|r| r.default_balance)
            .sum()
    }

    /// Market value of the defaulted balance entering next period.
    pub fn mv_default_balance(&self) -> f64 {
        self.strips
            .values()
            .filter_map(|s| s.row(self.period))
            .map(|r| r.mv_default_balance)
            .sum()
    }

    /// All strips drained and nothing performing remains.
    pub fn is_exhausted(&self) -> bool {
        self.principal_balance_ex_defaults() <= 0.0
            && self.principal_balance_defaults() <= 0.0
            && self
                .strips
                .values()
                .all(|s| s.row(self.period + 1).map(|r| r.total() == 0.0).unwrap_or(true))
    }

    /// Liquidate every strip at the current period: performing balance at
    /// the price plus the market value of defaults; everything after the
    /// current period zeroes out.
    pub fn liquidate(&mut self, price: f64) -> f64 {
        let period = self.period;
        let mut proceeds = 0.0;
        for strip in self.strips.values_mut() {
            let Some(row) = strip.row(period) else {
                continue;
            };
            let end_balance =
                row.beg_balance - row.default - row.sched_principal - row.unsched_principal;
            let end_default =
                row.default_balance + row.default - row.recoveries - row.net_loss;
            let end_mv_default = row.mv_default_balance + row.mv_default - row.recoveries;

            let sold = end_balance * price + end_mv_default;
            let loss = (1.0 - price) * end_balance + (end_default - end_mv_default);

            strip.zero_from(period + 1);
            let row = strip.row_mut(period).expect("row exists");
            row.sold += sold;
            row.net_loss += loss;
            row.end_balance = 0.0;
            row.default_balance = 0.0;
            row.mv_default_balance = 0.0;
            proceeds += sold;
        }
        proceeds
    }

    /// Verify the pool balance identity for a 1-based period.
    pub fn check_consistency(&self, period: usize) -> EngineResult<()> {
        let residual: f64 = self
            .strips
            .values()
            .filter_map(|s| s.row(period))
            .map(|r| r.balance_residual())
            .sum();
        let tolerance = identity_tolerance(self.total_par());
        if residual.abs() > tolerance {
            return Err(EngineError::Consistency {
                period,
                message: format!(
                    "pool balance identity off by {residual:.4} (tolerance {tolerance:.4})"
                ),
            });
        }
        Ok(())
    }

    pub fn warnings(&self) -> &[RunWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<RunWarning> {
        std::mem::take(&mut self.warnings)
    }
}

/// Rebucket an asset strip onto the deal payment schedule. Flows sum into
/// the first deal period paying on or after the asset's payment date;
/// balances carry the window's opening and closing values. Flows past the
/// final deal date land in the last period.
fn align_to_schedule(
    strip: &crate::assets::CashflowStrip,
    deal_payment_dates: &[NaiveDate],
) -> crate::assets::CashflowStrip {
    let mut aligned = crate::assets::CashflowStrip::with_periods(deal_payment_dates.len());
    let mut seen: Vec<bool> = vec![false; deal_payment_dates.len()];

    for (_, row) in strip.periods() {
        let Some(asset_date) = row.payment_date else {
            continue;
        };
        let bucket = deal_payment_dates
            .iter()
            .position(|&d| d >= asset_date)
            .unwrap_or(deal_payment_dates.len() - 1);

        let target = aligned.ensure_period(bucket + 1);
        if !seen[bucket] {
            target.beg_balance = row.beg_balance;
            target.accrual_begin = row.accrual_begin;
            seen[bucket] = true;
        }
        target.payment_date = Some(deal_payment_dates[bucket]);
        target.accrual_end = row.accrual_end;
        target.default += row.default;
        target.mv_default += row.mv_default;
        target.interest += row.interest;
        target.sched_principal += row.sched_principal;
        target.unsched_principal += row.unsched_principal;
        target.recoveries += row.recoveries;
        target.net_loss += row.net_loss;
        target.sold += row.sold;
        target.end_balance = row.end_balance;
        target.default_balance = row.default_balance;
        target.mv_default_balance = row.mv_default_balance;
    }

    // Empty buckets carry the running balances so next-period views hold;
    // buckets ahead of the first asset payment hold the opening balance
    let mut prev_end = seen
        .iter()
        .position(|&s| s)
        .and_then(|i| aligned.row(i + 1))
        .map(|r| r.beg_balance)
        .unwrap_or(0.0);
    let mut prev_default = 0.0;
    let mut prev_mv_default = 0.0;
    for p in 1..=aligned.len() {
        let bucket_seen = seen[p - 1];
        let row = aligned.row_mut(p).expect("period allocated");
        if bucket_seen {
            prev_end = row.end_balance;
            prev_default = row.default_balance;
            prev_mv_default = row.mv_default_balance;
        } else {
            row.beg_balance = prev_end;
            row.end_balance = prev_end;
            row.default_balance = prev_default;
            row.mv_default_balance = prev_mv_default;
        }
    }

    aligned
}
