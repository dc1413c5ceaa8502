//! Batch runner for scenario analysis
//!
//! Each scenario is an independent deal run over its own config; runs
//! share nothing mutable and parallelize across a worker pool. A
//! cancellation token is checked between runs; a cancelled batch returns
//! `Cancelled` with no partial results.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::deal::{DealConfig, DealEngine, DealOutput};
use crate::error::{EngineError, EngineResult};
use crate::time::Calendar;

/// Shared cooperative-cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// The underlying flag, for APIs that poll an `AtomicBool` directly.
    pub fn as_atomic(&self) -> &AtomicBool {
        &self.flag
    }
}

/// Pre-loaded runner for batches of deal runs
#[derive(Debug, Clone, Default)]
pub struct ScenarioRunner {
    calendar: Calendar,
}

impl ScenarioRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_calendar(calendar: Calendar) -> Self {
        Self { calendar }
    }

    /// Run a single deal config.
    pub fn run(&self, config: DealConfig) -> EngineResult<DealOutput> {
        let mut engine = DealEngine::new(config, self.calendar.clone())?;
        engine.run()
    }

    /// Run many scenarios in parallel. Cancellation between scenarios
    /// aborts the whole batch without partial results.
    pub fn run_scenarios(
        &self,
        configs: Vec<DealConfig>,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<DealOutput>> {
        let outputs: Vec<EngineResult<DealOutput>> = configs
            .into_par_iter()
            .map(|config| {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                let mut engine = DealEngine::new(config, self.calendar.clone())?;
                engine.run()
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        outputs.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::fixtures::bullet_bond;
    use crate::deal::{default_waterfall_steps, CloInputs, DealDates, ReinvestmentPolicy};
    use crate::liabilities::{Tranche, TrancheRate};
    use crate::time::{BusinessDayConvention, DayCount};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn small_config(coupon: f64) -> DealConfig {
        let tranches = vec![
            Tranche {
                name: "Class A".to_string(),
                rank: 1,
                original_balance: 700_000.0,
                rate: TrancheRate::Fixed { coupon: 0.03 },
                pik_eligible: false,
                day_count: DayCount::Us30360,
                is_equity: false,
            },
            Tranche {
                name: "Sub Notes".to_string(),
                rank: 10,
                original_balance: 300_000.0,
                rate: TrancheRate::Fixed { coupon: 0.0 },
                pik_eligible: false,
                day_count: DayCount::Us30360,
                is_equity: true,
            },
        ];
        let steps = default_waterfall_steps(&tranches, "Sub Notes");
        DealConfig {
            deal_dates: DealDates {
                analysis_date: d(2025, 1, 15),
                closing_date: d(2025, 1, 15),
                first_payment_date: d(2025, 4, 15),
                maturity_date: d(2026, 1, 15),
                reinvestment_end_date: d(2025, 1, 15),
                no_call_date: d(2026, 1, 15),
                payment_day: 15,
                months_between_payments: 3,
                business_day_convention: BusinessDayConvention::None,
                determination_date_offset: 0,
                interest_determination_date_offset: 0,
            },
            reinvestment_policy: ReinvestmentPolicy::default(),
            clo_inputs: CloInputs {
                current_libor: 0.03,
                event_of_default: false,
                purchase_finance_accrued_interest: 0.0,
                call_when_sub_dist_below: 0.0,
            },
            cashflow_assumptions: Default::default(),
            initial_accounts: BTreeMap::new(),
            tranches,
            waterfall_steps: steps,
            triggers: Vec::new(),
            fees: ["TRUSTEE_FEE", "ADMIN_FEE", "BASE_MANAGER_FEE", "JUNIOR_MANAGER_FEE"]
                .map(|id| crate::fees::FeeSpec {
                    id: id.to_string(),
                    kind: crate::fees::FeeKind::Fixed { annual_amount: 0.0 },
                    day_count: DayCount::Us30360,
                })
                .to_vec(),
            yield_curve: BTreeMap::from([(1, 0.03), (60, 0.03)]),
            reinvestment_profile: None,
            eod_trigger_id: None,
            ccc_threshold: 0.075,
            liquidation_price: 1.0,
            residual_tranche: "Sub Notes".to_string(),
            concentration_limits: Default::default(),
            test_weights: Default::default(),
            assets: vec![bullet_bond("A1", 1_000_000.0, coupon)],
            incentive_hurdle_rate: None,
            incentive_fee_rate: None,
            incentive_history: BTreeMap::new(),
        }
    }

    #[test]
    fn test_scenario_batch_runs_independently() {
        let runner = ScenarioRunner::new();
        let configs: Vec<DealConfig> = [0.04, 0.05, 0.06].map(small_config).to_vec();
        let outputs = runner
            .run_scenarios(configs, &CancellationToken::new())
            .unwrap();

        assert_eq!(outputs.len(), 3);
        // Higher collateral coupon throws off more interest
        assert!(
            outputs[2].total_interest_proceeds() > outputs[0].total_interest_proceeds()
        );
    }

    #[test]
    fn test_cancelled_batch_returns_cancelled() {
        let runner = ScenarioRunner::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = runner.run_scenarios(vec![small_config(0.05)], &cancel);
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_batch_matches_single_runs() {
        let runner = ScenarioRunner::new();
        let single = runner.run(small_config(0.05)).unwrap();
        let batch = runner
            .run_scenarios(vec![small_config(0.05)], &CancellationToken::new())
            .unwrap();
        assert_eq!(
            serde_json::to_string(&single).unwrap(),
            serde_json::to_string(&batch[0]).unwrap()
        );
    }
}
