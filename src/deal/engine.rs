//! Deal engine: the period-by-period run driver
//!
//! One run walks the adjusted payment schedule in order: collections,
//! fee accrual, trigger snapshots, the interest cascade, the principal
//! cascade with its reinvestment bucket, then roll-forward. An event of
//! default reroutes both proceeds streams through the strict-rank
//! cascade. No step observes state written by a later step in the same
//! period.

use log::{debug, info};

use crate::accounts::{AccountKind, AccountSet, CashKind};
use crate::analytics::{
    discount_margin, macaulay_duration, modified_duration, price_from_curve,
    weighted_average_life, xirr,
};
use crate::compliance::{run_tests, ComplianceReport};
use crate::curve::YieldCurve;
use crate::deal::config::{calc_payment_dates, DealConfig, PaymentDates, ReinvestmentType};
use crate::deal::output::{DealOutput, PeriodOutput, ReinvestmentSummary, TrancheOutput};
use crate::error::{EngineError, EngineResult, RunWarning};
use crate::fees::FeeState;
use crate::incentive::IncentiveFee;
use crate::liabilities::{TrancheRiskMeasures, TrancheState};
use crate::money::{identity_tolerance, round_cents};
use crate::persist::{PersistenceSink, RunBoundary};
use crate::pool::CollateralPool;
use crate::reinvest::{ProceedsKind, ReinvestmentEngine};
use crate::time::Calendar;
use crate::triggers::{TriggerKind, TriggerState};
use crate::waterfall::{
    run_eod_waterfall, run_interest_waterfall, run_principal_waterfall, WaterfallOutcome,
};

/// Orchestrates one full deal run
pub struct DealEngine {
    config: DealConfig,
    calendar: Calendar,
    curve: YieldCurve,
    pool: CollateralPool,

    payment_dates: Vec<PaymentDates>,
    tranches: Vec<TrancheState>,
    fees: Vec<FeeState>,
    triggers: Vec<TriggerState>,
    incentive: Option<IncentiveFee>,
    reinvest: Option<ReinvestmentEngine>,

    // Period-indexed results (index = period - 1)
    interest_proceeds: Vec<f64>,
    principal_proceeds: Vec<f64>,
    notes_payable: Vec<f64>,
    reinvestment_amounts: Vec<f64>,
    residual_payments: Vec<f64>,
    libor_rates: Vec<f64>,

    compliance_at_closing: Option<ComplianceReport>,
    purchase_finance_remaining: f64,
    last_calculated_period: usize,
    warnings: Vec<RunWarning>,
    persistence: Option<Box<dyn PersistenceSink>>,
}

impl DealEngine {
    pub fn new(config: DealConfig, calendar: Calendar) -> EngineResult<Self> {
        config.validate()?;

        let curve = YieldCurve::new(
            "INDEX",
            config.deal_dates.analysis_date,
            &config.yield_curve,
        )?;

        let mut pool = CollateralPool::new();
        pool.accounts = AccountSet::with_initial_balances(
            config
                .initial_accounts
                .iter()
                .map(|(&kind, &account)| (kind, account)),
        );
        for asset in &config.assets {
            let mut asset = asset.clone();
            asset.update_derived_ratings();
            pool.add_asset(asset)?;
        }

        let purchase_finance_remaining = config.clo_inputs.purchase_finance_accrued_interest;
        Ok(Self {
            config,
            calendar,
            curve,
            pool,
            payment_dates: Vec::new(),
            tranches: Vec::new(),
            fees: Vec::new(),
            triggers: Vec::new(),
            incentive: None,
            reinvest: None,
            interest_proceeds: Vec::new(),
            principal_proceeds: Vec::new(),
            notes_payable: Vec::new(),
            reinvestment_amounts: Vec::new(),
            residual_payments: Vec::new(),
            libor_rates: Vec::new(),
            compliance_at_closing: None,
            purchase_finance_remaining,
            last_calculated_period: 0,
            warnings: Vec::new(),
            persistence: None,
        })
    }

    /// Attach an external store; it is invoked only at run boundaries.
    pub fn set_persistence(&mut self, sink: Box<dyn PersistenceSink>) {
        self.persistence = Some(sink);
    }

    /// Execute the run end to end and assemble the output bundle.
    pub fn run(&mut self) -> EngineResult<DealOutput> {
        self.payment_dates = calc_payment_dates(&self.config.deal_dates, &self.calendar)?;
        info!(
            "deal run: {} payment periods from {} to {}",
            self.payment_dates.len(),
            self.payment_dates[0].payment_date,
            self.payment_dates.last().unwrap().payment_date
        );
        self.deal_setup()?;

        let num_periods = self.payment_dates.len();
        let mut liquidate_next = false;

        for period in 1..=num_periods {
            let liquidating = liquidate_next;
            self.calculate_period(period, liquidating)?;

            let interest_pool = self.interest_proceeds[period - 1];
            let principal_pool = self.principal_proceeds[period - 1];

            if self.event_of_default_active() {
                let outcome = run_eod_waterfall(
                    period,
                    interest_pool + principal_pool,
                    &mut self.fees,
                    &mut self.tranches,
                    self.incentive.as_mut(),
                    &self.config.residual_tranche,
                )?;
                self.verify_conservation(period, interest_pool + principal_pool, &outcome)?;
                self.notes_payable[period - 1] = outcome.notes_paid;
                self.residual_payments[period - 1] = outcome.residual_paid;
            } else {
                let interest_outcome = run_interest_waterfall(
                    period,
                    &self.config.waterfall_steps,
                    interest_pool,
                    &mut self.fees,
                    &mut self.tranches,
                    &mut self.triggers,
                    self.incentive.as_mut(),
                )?;
                self.verify_conservation(period, interest_pool, &interest_outcome)?;

                let max_reinvestment = self.reinvestment_amount(period, liquidating);
                let principal_outcome = run_principal_waterfall(
                    period,
                    principal_pool,
                    max_reinvestment,
                    &mut self.tranches,
                    &mut self.triggers,
                    self.incentive.as_mut(),
                    &self.config.residual_tranche,
                )?;
                self.verify_conservation(period, principal_pool, &principal_outcome)?;

                self.notes_payable[period - 1] =
                    interest_outcome.notes_paid + principal_outcome.notes_paid;
                self.residual_payments[period - 1] =
                    interest_outcome.residual_paid + principal_outcome.residual_paid;
                self.reinvestment_amounts[period - 1] = principal_outcome.reinvested;

                if principal_outcome.reinvested > 0.0 {
                    if let Some(reinvest) = self.reinvest.as_mut() {
                        reinvest
                            .add_reinvestment(principal_outcome.reinvested, Some(&self.curve))?;
                    }
                }
            }

            if self.check_liquidation_trigger(period) {
                liquidate_next = true;
            }

            self.roll_forward(period);
            self.persist_boundary(RunBoundary::PeriodEnd(period))?;

            if self.portfolio_exhausted() {
                debug!("portfolio exhausted after period {period}");
                break;
            }
        }

        self.persist_boundary(RunBoundary::RunEnd(self.last_calculated_period))?;
        info!(
            "deal run complete: last period {}",
            self.last_calculated_period
        );
        let risk = self.calculate_risk_measures();
        Ok(self.build_output(risk))
    }

    /// Allocate run state and project the collateral.
    fn deal_setup(&mut self) -> EngineResult<()> {
        let num_periods = self.payment_dates.len();

        self.interest_proceeds = vec![0.0; num_periods];
        self.principal_proceeds = vec![0.0; num_periods];
        self.notes_payable = vec![0.0; num_periods];
        self.reinvestment_amounts = vec![0.0; num_periods];
        self.residual_payments = vec![0.0; num_periods];
        self.libor_rates = vec![0.0; num_periods];

        self.tranches = self
            .config
            .tranches
            .iter()
            .map(|t| TrancheState::new(t.clone(), num_periods))
            .collect();
        self.fees = self
            .config
            .fees
            .iter()
            .map(|f| FeeState::new(f.clone(), num_periods))
            .collect();
        self.triggers = self
            .config
            .triggers
            .iter()
            .map(|t| TriggerState::new(t.clone(), num_periods))
            .collect();

        if let (Some(hurdle), Some(rate)) = (
            self.config.incentive_hurdle_rate,
            self.config.incentive_fee_rate,
        ) {
            let mut fee = IncentiveFee::new(hurdle, rate, self.config.incentive_history.clone())?;
            fee.deal_setup(
                num_periods,
                self.config.deal_dates.closing_date,
                self.config.deal_dates.analysis_date,
            )?;
            self.incentive = Some(fee);
        }

        let deal_dates: Vec<_> = self.payment_dates.iter().map(|p| p.payment_date).collect();

        if let Some(profile) = &self.config.reinvestment_profile {
            let mut engine = ReinvestmentEngine::new(profile.clone())?;
            engine.deal_setup(
                self.config.deal_dates.closing_date,
                &deal_dates,
                self.config.deal_dates.months_between_payments,
            )?;
            self.reinvest = Some(engine);
        }

        // Ramp-up cash joins the collection account before period 1
        self.pool.accounts.transfer_all(
            AccountKind::RampUp,
            AccountKind::Collection,
            CashKind::Principal,
        );

        self.pool.project(
            &self.calendar,
            self.config.deal_dates.analysis_date,
            &self.config.cashflow_assumptions,
            Some(&self.curve),
            Some(&deal_dates),
        )?;

        let principal_cash = self
            .pool
            .accounts
            .balance(AccountKind::Collection, CashKind::Principal);
        self.compliance_at_closing = Some(run_tests(
            &self.pool,
            principal_cash,
            self.config.deal_dates.analysis_date,
            &self.config.concentration_limits,
            &self.config.test_weights,
        ));

        self.persist_boundary(RunBoundary::Setup)?;
        Ok(())
    }

    /// Hand run state to the attached store, if any.
    fn persist_boundary(&mut self, boundary: RunBoundary) -> EngineResult<()> {
        let Some(sink) = self.persistence.as_mut() else {
            return Ok(());
        };
        sink.save_accounts(boundary, &self.pool.accounts)?;
        if let Some(reinvest) = &self.reinvest {
            sink.save_reinvestment(boundary, &reinvest.cashflow_table())?;
        }
        if let Some(incentive) = &self.incentive {
            sink.save_incentive_state(boundary, incentive)?;
        }
        Ok(())
    }

    /// Collections, accruals, and trigger snapshots for one period.
    fn calculate_period(&mut self, period: usize, liquidating: bool) -> EngineResult<()> {
        let pd = self.payment_dates[period - 1];
        let last_payment_date = if period == 1 {
            self.config.deal_dates.closing_date
        } else {
            self.payment_dates[period - 2].payment_date
        };

        // LIBOR reset: period 1 takes the supplied rate
        let libor = if period == 1 {
            self.config.clo_inputs.current_libor
        } else {
            self.curve.spot_rate(
                pd.interest_determination_date,
                self.config.deal_dates.months_between_payments,
            )?
        };
        self.libor_rates[period - 1] = libor;

        // Collateral and reinvestment collections into the collection account
        self.pool.check_consistency(period)?;
        let pool_interest = self.pool.interest_proceeds();
        let pool_principal = self.pool.principal_proceeds();
        self.pool
            .accounts
            .add(AccountKind::Collection, CashKind::Interest, pool_interest);
        self.pool
            .accounts
            .add(AccountKind::Collection, CashKind::Principal, pool_principal);
        if let Some(reinvest) = &self.reinvest {
            self.pool.accounts.add(
                AccountKind::Collection,
                CashKind::Interest,
                reinvest.proceeds(ProceedsKind::Interest),
            );
            self.pool.accounts.add(
                AccountKind::Collection,
                CashKind::Principal,
                reinvest.proceeds(ProceedsKind::Principal),
            );
        }

        self.sweep_purchase_finance_accrued();

        // Liability accrual at the reset rate
        for tranche in &mut self.tranches {
            tranche.accrue(period, libor, last_payment_date, pd.payment_date, pd.payment_date);
        }
        if let Some(incentive) = self.incentive.as_mut() {
            incentive.calc(pd.payment_date)?;
        }

        // Liquidation realizes the portfolio into principal collections
        if liquidating {
            let pool_sale = self.pool.liquidate(self.config.liquidation_price);
            self.pool
                .accounts
                .add(AccountKind::Collection, CashKind::Principal, pool_sale);
            if let Some(reinvest) = self.reinvest.as_mut() {
                let price = reinvest.profile().liquidation_price;
                let sale = reinvest.liquidate(price);
                self.pool
                    .accounts
                    .add(AccountKind::Collection, CashKind::Principal, sale);
            }
            info!("period {period}: portfolio liquidated");
        }

        // Drain the collection account for the waterfalls; the interest
        // reserve feeds the interest stream
        let mut interest_withdrawal = self
            .pool
            .accounts
            .withdraw_all(AccountKind::Collection, CashKind::Interest);
        let principal_withdrawal = self
            .pool
            .accounts
            .withdraw_all(AccountKind::Collection, CashKind::Principal);
        interest_withdrawal += self
            .pool
            .accounts
            .withdraw_all(AccountKind::InterestReserve, CashKind::Principal);

        self.interest_proceeds[period - 1] = round_cents(interest_withdrawal);
        self.principal_proceeds[period - 1] = round_cents(principal_withdrawal);

        // Fee accrual on the collateral basis
        let fee_basis = self.pool.current_beg_balance()
            + principal_withdrawal
            + self.purchase_finance_remaining;
        for fee in &mut self.fees {
            fee.accrue(period, fee_basis, last_payment_date, pd.payment_date, pd.payment_date);
        }

        self.snapshot_triggers(period, interest_withdrawal, principal_withdrawal);
        Ok(())
    }

    /// Move purchase-finance accrued interest from the interest stream to
    /// the principal stream until the configured amount is exhausted.
    fn sweep_purchase_finance_accrued(&mut self) {
        if self.purchase_finance_remaining <= 0.0 {
            return;
        }
        let available = self
            .pool
            .accounts
            .balance(AccountKind::Collection, CashKind::Interest);
        let swept = self.purchase_finance_remaining.min(available);
        if swept > 0.0 {
            self.pool
                .accounts
                .add(AccountKind::Collection, CashKind::Interest, -swept);
            self.pool
                .accounts
                .add(AccountKind::Collection, CashKind::Principal, swept);
            self.purchase_finance_remaining -= swept;
        }
    }

    fn snapshot_triggers(
        &mut self,
        period: usize,
        interest_withdrawal: f64,
        principal_withdrawal: f64,
    ) {
        let reinvest_performing = self
            .reinvest
            .as_ref()
            .map(|r| r.principal_balance_ex_defaults())
            .unwrap_or(0.0);
        let reinvest_mv_defaults = self
            .reinvest
            .as_ref()
            .map(|r| r.mv_defaults())
            .unwrap_or(0.0);

        let performing = self.pool.principal_balance_ex_defaults() + reinvest_performing;
        let mv_defaults = self.pool.mv_default_balance() + reinvest_mv_defaults;
        let ccc_haircut = self.pool.ccc_haircut(self.config.ccc_threshold);

        let oc_numerator = performing + mv_defaults - ccc_haircut
            + principal_withdrawal
            + self.purchase_finance_remaining;
        let eod_numerator = performing + mv_defaults + principal_withdrawal;
        let ic_numerator = interest_withdrawal;

        for trigger in &mut self.triggers {
            let protected_rank = self
                .tranches
                .iter()
                .find(|t| t.name() == trigger.spec.protected_tranche)
                .map(|t| t.rank())
                .unwrap_or(u32::MAX);

            let is_eod_test = self
                .config
                .eod_trigger_id
                .as_deref()
                .is_some_and(|id| id == trigger.spec.id);

            match trigger.spec.kind {
                TriggerKind::Oc => {
                    let denominator: f64 = self
                        .tranches
                        .iter()
                        .filter(|t| !t.tranche.is_equity && t.rank() <= protected_rank)
                        .map(|t| t.balance)
                        .sum();
                    let numerator = if is_eod_test { eod_numerator } else { oc_numerator };
                    trigger.snapshot(period, numerator, denominator);
                }
                TriggerKind::Ic => {
                    let denominator: f64 = self
                        .tranches
                        .iter()
                        .filter(|t| !t.tranche.is_equity && t.rank() <= protected_rank)
                        .map(|t| t.interest_due())
                        .sum();
                    trigger.snapshot(period, ic_numerator, denominator);
                }
            }
        }
    }

    fn event_of_default_active(&self) -> bool {
        if self.config.clo_inputs.event_of_default {
            return true;
        }
        if let Some(id) = self.config.eod_trigger_id.as_deref() {
            return self
                .triggers
                .iter()
                .any(|t| t.spec.id == id && t.is_breached());
        }
        false
    }

    /// Reinvestment amount for the period under the pre/post policy.
    fn reinvestment_amount(&self, period: usize, liquidating: bool) -> f64 {
        let pay_date = self.payment_dates[period - 1].payment_date;
        let policy = &self.config.reinvestment_policy;

        let (kind, pct) = if liquidating || self.reinvest.is_none() {
            (ReinvestmentType::None, 0.0)
        } else if pay_date <= self.config.deal_dates.reinvestment_end_date {
            (policy.pre_type, policy.pre_pct)
        } else if pay_date < self.config.deal_dates.maturity_date {
            (policy.post_type, policy.post_pct)
        } else {
            (ReinvestmentType::None, 0.0)
        };

        let base = match kind {
            ReinvestmentType::AllPrincipal => self.principal_proceeds[period - 1],
            ReinvestmentType::UnscheduledPrincipal => {
                let mut unscheduled = self.pool.unscheduled_principal()
                    + self
                        .reinvest
                        .as_ref()
                        .map(|r| r.unscheduled_principal())
                        .unwrap_or(0.0);
                if policy.include_recoveries_in_unscheduled {
                    unscheduled += self.pool.recoveries();
                }
                unscheduled
            }
            ReinvestmentType::None => 0.0,
        };
        base * pct
    }

    /// Liquidate next period when the sub-note distribution rate falls
    /// below the call threshold after the no-call date, or one period
    /// before the schedule ends.
    fn check_liquidation_trigger(&self, period: usize) -> bool {
        if period + 1 == self.payment_dates.len() {
            return true;
        }

        let threshold = self.config.clo_inputs.call_when_sub_dist_below;
        if threshold <= 0.0 {
            return false;
        }
        let pay_date = self.payment_dates[period - 1].payment_date;
        if pay_date < self.config.deal_dates.no_call_date {
            return false;
        }
        let Some(equity) = self
            .tranches
            .iter()
            .find(|t| t.name() == self.config.residual_tranche)
        else {
            return false;
        };
        if equity.tranche.original_balance <= 0.0 {
            return false;
        }
        let dist_rate = self.residual_payments[period - 1] / equity.tranche.original_balance;
        dist_rate < threshold
    }

    fn roll_forward(&mut self, period: usize) {
        for tranche in &mut self.tranches {
            tranche.roll_forward(period);
        }
        if let Some(incentive) = self.incentive.as_mut() {
            // calc ran earlier in the period, so this cannot fail
            let _ = incentive.roll_forward();
        }
        self.pool.roll_forward();
        if let Some(reinvest) = self.reinvest.as_mut() {
            reinvest.roll_forward();
        }
        self.last_calculated_period = period;
    }

    fn portfolio_exhausted(&self) -> bool {
        let reinvest_alive = self
            .reinvest
            .as_ref()
            .map(|r| r.principal_balance_all() > 0.0)
            .unwrap_or(false);
        self.pool.is_exhausted() && !reinvest_alive
    }

    fn verify_conservation(
        &self,
        period: usize,
        entering: f64,
        outcome: &WaterfallOutcome,
    ) -> EngineResult<()> {
        let residual = (outcome.total_paid() + outcome.remainder - entering).abs();
        let tolerance = identity_tolerance(entering.max(self.pool.total_par()));
        if residual > tolerance {
            return Err(EngineError::Consistency {
                period,
                message: format!(
                    "waterfall paid {:.2} + remainder {:.2} != pool {:.2}",
                    outcome.total_paid(),
                    outcome.remainder,
                    entering
                ),
            });
        }
        Ok(())
    }

    /// Yield, DM, price, WAL, and durations per tranche from the
    /// realized payment streams.
    fn calculate_risk_measures(&mut self) -> Vec<TrancheRiskMeasures> {
        let analysis_date = self.config.deal_dates.analysis_date;
        let closing_date = self.config.deal_dates.closing_date;
        let frequency = self.config.deal_dates.payments_per_year();

        self.tranches
            .iter()
            .map(|tranche| {
                let mut risk = TrancheRiskMeasures::default();
                let stream = tranche.payment_stream();
                if stream.is_empty() || tranche.tranche.original_balance <= 0.0 {
                    return risk;
                }

                let mut xirr_stream = vec![(closing_date, -tranche.tranche.original_balance)];
                xirr_stream.extend(stream.iter().copied());
                risk.tranche_yield = xirr(&xirr_stream);
                if risk.tranche_yield.is_none() {
                    // Non-convergence keeps the run alive with a null entry
                    debug!("{}: yield solver did not converge", tranche.name());
                }

                let principal_flows: Vec<_> = tranche
                    .periods
                    .iter()
                    .filter_map(|p| p.payment_date.map(|d| (d, p.principal_paid)))
                    .collect();
                risk.weighted_average_life =
                    Some(weighted_average_life(&principal_flows, analysis_date));

                if let Some(y) = risk.tranche_yield {
                    let mac = macaulay_duration(&stream, analysis_date, y, frequency);
                    risk.macaulay_duration = Some(mac);
                    risk.modified_duration = Some(modified_duration(mac, y, frequency));
                }

                risk.price = price_from_curve(
                    &stream,
                    analysis_date,
                    tranche.tranche.original_balance,
                    &self.curve,
                );

                let period_payments: Vec<f64> = tranche
                    .periods
                    .iter()
                    .map(|p| p.interest_paid + p.principal_paid)
                    .collect();
                let libor_path = self.libor_rates.clone();
                let n = period_payments.len().min(libor_path.len());
                risk.discount_margin = discount_margin(
                    &period_payments[..n],
                    &libor_path[..n],
                    frequency,
                    tranche.tranche.original_balance,
                );

                risk
            })
            .collect()
    }

    fn build_output(&mut self, risk: Vec<TrancheRiskMeasures>) -> DealOutput {
        let periods = (1..=self.last_calculated_period)
            .map(|p| {
                let pd = self.payment_dates[p - 1];
                PeriodOutput {
                    period: p,
                    payment_date: pd.payment_date,
                    collection_begin: pd.collection_begin,
                    collection_end: pd.collection_end,
                    interest_proceeds: self.interest_proceeds[p - 1],
                    principal_proceeds: self.principal_proceeds[p - 1],
                    notes_paid: self.notes_payable[p - 1],
                    reinvested: self.reinvestment_amounts[p - 1],
                    residual_paid: self.residual_payments[p - 1],
                    libor: self.libor_rates[p - 1],
                }
            })
            .collect();

        let tranches = self
            .tranches
            .iter()
            .zip(risk)
            .map(|(state, risk)| TrancheOutput {
                name: state.name().to_string(),
                rank: state.rank(),
                original_balance: state.tranche.original_balance,
                ending_balance: state.balance,
                deferred_interest: state.deferred,
                final_coupon: state.coupon(),
                total_interest_paid: state.total_interest_paid(),
                total_principal_paid: state.total_principal_paid(),
                periods: state.periods.clone(),
                risk,
            })
            .collect();

        let reinvestment = self
            .reinvest
            .as_ref()
            .map(|r| ReinvestmentSummary {
                total_reinvested: self.reinvestment_amounts.iter().sum(),
                last_active_period: r.last_period(),
                cashflows: r.cashflow_table(),
            })
            .unwrap_or_default();

        let mut warnings = std::mem::take(&mut self.warnings);
        warnings.extend(self.pool.take_warnings());
        if let Some(incentive) = &self.incentive {
            warnings.extend(incentive.warnings().iter().cloned());
        }

        DealOutput {
            periods,
            payment_schedule: self.payment_dates.clone(),
            tranches,
            compliance_at_closing: self
                .compliance_at_closing
                .take()
                .expect("compliance runs during deal setup"),
            incentive_fee: self
                .incentive
                .as_ref()
                .map(|i| i.periods.clone())
                .unwrap_or_default(),
            reinvestment,
            last_calculated_period: self.last_calculated_period,
            warnings,
        }
    }
}
