//! Deal configuration and the run input bundle

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::accounts::Account;
use crate::accounts::AccountKind;
use crate::assets::{Asset, CashflowAssumptions};
use crate::error::{EngineError, EngineResult};
use crate::fees::FeeSpec;
use crate::liabilities::Tranche;
use crate::reinvest::ReinvestmentProfile;
use crate::time::{add_months, BusinessDayConvention, Calendar};
use crate::triggers::TriggerSpec;
use crate::waterfall::WaterfallStep;

/// Key deal dates and schedule parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealDates {
    pub analysis_date: NaiveDate,
    pub closing_date: NaiveDate,
    pub first_payment_date: NaiveDate,
    pub maturity_date: NaiveDate,
    pub reinvestment_end_date: NaiveDate,
    pub no_call_date: NaiveDate,
    /// Day of month payments target
    pub payment_day: u32,
    pub months_between_payments: u32,
    #[serde(default)]
    pub business_day_convention: BusinessDayConvention,
    /// Business days before a payment date that collections cut off
    #[serde(default)]
    pub determination_date_offset: u32,
    /// Business days before a payment date that LIBOR resets
    #[serde(default)]
    pub interest_determination_date_offset: u32,
}

impl DealDates {
    pub fn validate(&self) -> EngineResult<()> {
        if self.first_payment_date <= self.closing_date {
            return Err(EngineError::validation(
                "first_payment_date must be after closing_date",
            ));
        }
        if self.maturity_date <= self.first_payment_date {
            return Err(EngineError::validation(
                "maturity_date must be after first_payment_date",
            ));
        }
        if self.months_between_payments == 0 || 12 % self.months_between_payments != 0 {
            return Err(EngineError::validation(
                "months_between_payments must divide 12",
            ));
        }
        if !(1..=31).contains(&self.payment_day) {
            return Err(EngineError::validation("payment_day must be in 1..=31"));
        }
        Ok(())
    }

    pub fn payments_per_year(&self) -> u32 {
        12 / self.months_between_payments
    }
}

/// What principal feeds the reinvestment bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReinvestmentType {
    AllPrincipal,
    UnscheduledPrincipal,
    #[default]
    None,
}

/// Reinvestment strategy before and after the reinvestment end date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinvestmentPolicy {
    pub pre_type: ReinvestmentType,
    pub pre_pct: f64,
    pub post_type: ReinvestmentType,
    pub post_pct: f64,
    /// Count defaulted assets' recoveries in the unscheduled-principal base
    #[serde(default)]
    pub include_recoveries_in_unscheduled: bool,
}

impl Default for ReinvestmentPolicy {
    fn default() -> Self {
        Self {
            pre_type: ReinvestmentType::None,
            pre_pct: 0.0,
            post_type: ReinvestmentType::None,
            post_pct: 0.0,
            include_recoveries_in_unscheduled: false,
        }
    }
}

/// Scalar deal inputs the excluded collaborators feed in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloInputs {
    /// LIBOR applying to period 1 (later periods reset off the curve)
    pub current_libor: f64,
    #[serde(default)]
    pub event_of_default: bool,
    #[serde(default)]
    pub purchase_finance_accrued_interest: f64,
    /// Call the deal when the quarterly sub-note distribution rate drops
    /// below this level after the no-call date
    #[serde(default)]
    pub call_when_sub_dist_below: f64,
}

/// One period of the adjusted deal schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDates {
    pub payment_date: NaiveDate,
    pub collection_begin: NaiveDate,
    pub collection_end: NaiveDate,
    pub interest_determination_date: NaiveDate,
}

/// The full input bundle for one deal run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealConfig {
    pub deal_dates: DealDates,
    #[serde(default)]
    pub reinvestment_policy: ReinvestmentPolicy,
    pub clo_inputs: CloInputs,
    #[serde(default)]
    pub cashflow_assumptions: CashflowAssumptions,
    #[serde(default)]
    pub initial_accounts: BTreeMap<AccountKind, Account>,
    pub tranches: Vec<Tranche>,
    pub waterfall_steps: Vec<WaterfallStep>,
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
    #[serde(default)]
    pub fees: Vec<FeeSpec>,
    /// Sparse tenor-month -> rate map for the index curve
    pub yield_curve: BTreeMap<u32, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reinvestment_profile: Option<ReinvestmentProfile>,
    /// Trigger id whose breach, OR'd with the event-of-default input,
    /// selects the EOD waterfall
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eod_trigger_id: Option<String>,
    /// CCC bucket threshold share feeding the OC haircut
    #[serde(default = "default_ccc_threshold")]
    pub ccc_threshold: f64,
    /// Price applied when the portfolio liquidates
    #[serde(default = "default_liquidation_price")]
    pub liquidation_price: f64,
    /// Tranche receiving residual distributions
    pub residual_tranche: String,
    #[serde(default)]
    pub concentration_limits: crate::compliance::ConcentrationLimits,
    #[serde(default)]
    pub test_weights: crate::compliance::TestWeights,
    pub assets: Vec<Asset>,
    /// Historical subordinated payments for the incentive fee
    #[serde(default)]
    pub incentive_hurdle_rate: Option<f64>,
    #[serde(default)]
    pub incentive_fee_rate: Option<f64>,
    #[serde(default)]
    pub incentive_history: BTreeMap<NaiveDate, f64>,
}

fn default_ccc_threshold() -> f64 {
    0.075
}

fn default_liquidation_price() -> f64 {
    1.0
}

impl DealConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.deal_dates.validate()?;
        if self.tranches.is_empty() {
            return Err(EngineError::validation("deal needs at least one tranche"));
        }
        if !self
            .tranches
            .iter()
            .any(|t| t.name == self.residual_tranche)
        {
            return Err(EngineError::validation(format!(
                "residual tranche {} is not in the tranche list",
                self.residual_tranche
            )));
        }
        if self.yield_curve.is_empty() {
            return Err(EngineError::validation("yield curve cannot be empty"));
        }
        for step in &self.waterfall_steps {
            match step {
                WaterfallStep::Fee { id } => {
                    if !self.fees.iter().any(|f| &f.id == id) {
                        return Err(EngineError::validation(format!(
                            "waterfall references undefined fee: {id}"
                        )));
                    }
                }
                WaterfallStep::TrancheInterest { tranche }
                | WaterfallStep::TrancheCures { tranche }
                | WaterfallStep::Residual { tranche } => {
                    if !self.tranches.iter().any(|t| &t.name == tranche) {
                        return Err(EngineError::validation(format!(
                            "waterfall references undefined tranche: {tranche}"
                        )));
                    }
                }
            }
        }
        for asset in &self.assets {
            asset.validate()?;
        }
        if let Some(profile) = &self.reinvestment_profile {
            profile.validate()?;
        }
        Ok(())
    }
}

/// Build the adjusted payment schedule for the deal: steps of
/// `months_between_payments` from the first payment date (pinned to the
/// payment day), keeping dates after the analysis date, each adjusted for
/// business days, with collection windows and LIBOR reset dates.
pub fn calc_payment_dates(
    dates: &DealDates,
    calendar: &Calendar,
) -> EngineResult<Vec<PaymentDates>> {
    dates.validate()?;

    let first_nominal = pin_day(dates.first_payment_date, dates.payment_day);
    let mut periods = Vec::new();
    let mut index = 0;
    let mut prev_adjusted: Option<NaiveDate> = None;
    let mut prev_collection_end = dates.closing_date;

    loop {
        let nominal = add_months(first_nominal, (index * dates.months_between_payments) as i32);
        if nominal > dates.maturity_date {
            break;
        }
        index += 1;

        let adjusted = calendar.adjust(nominal, dates.business_day_convention);
        if adjusted <= dates.analysis_date {
            prev_adjusted = Some(adjusted);
            prev_collection_end =
                calendar.business_days_before(adjusted, dates.determination_date_offset);
            continue;
        }

        let collection_end =
            calendar.business_days_before(adjusted, dates.determination_date_offset);
        let (collection_begin, interest_determination_date) = match prev_adjusted {
            None => (dates.closing_date, dates.closing_date),
            Some(prev) => (
                prev_collection_end,
                calendar.business_days_before(prev, dates.interest_determination_date_offset),
            ),
        };

        periods.push(PaymentDates {
            payment_date: adjusted,
            collection_begin,
            collection_end,
            interest_determination_date,
        });

        prev_adjusted = Some(adjusted);
        prev_collection_end = collection_end;
    }

    if periods.is_empty() {
        return Err(EngineError::validation(
            "no payment dates fall between analysis date and maturity",
        ));
    }
    Ok(periods)
}

fn pin_day(date: NaiveDate, day: u32) -> NaiveDate {
    let clamped = day.min(crate::time::days_in_month(date.year(), date.month()));
    NaiveDate::from_ymd_opt(date.year(), date.month(), clamped).expect("clamped day valid")
}

/// The standard interest cascade for a tranche stack: trustee and admin
/// fees, senior management fee, interest and cures per tranche by rank,
/// junior management fee, then the residual.
pub fn default_waterfall_steps(tranches: &[Tranche], residual_tranche: &str) -> Vec<WaterfallStep> {
    let mut steps = vec![
        WaterfallStep::Fee {
            id: "TRUSTEE_FEE".to_string(),
        },
        WaterfallStep::Fee {
            id: "ADMIN_FEE".to_string(),
        },
        WaterfallStep::Fee {
            id: "BASE_MANAGER_FEE".to_string(),
        },
    ];

    let mut debt: Vec<&Tranche> = tranches
        .iter()
        .filter(|t| !t.is_equity && t.name != residual_tranche)
        .collect();
    debt.sort_by_key(|t| t.rank);
    for tranche in debt {
        steps.push(WaterfallStep::TrancheInterest {
            tranche: tranche.name.clone(),
        });
        steps.push(WaterfallStep::TrancheCures {
            tranche: tranche.name.clone(),
        });
    }

    steps.push(WaterfallStep::Fee {
        id: "JUNIOR_MANAGER_FEE".to_string(),
    });
    steps.push(WaterfallStep::Residual {
        tranche: residual_tranche.to_string(),
    });
    steps
}
