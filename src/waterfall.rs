//! Payment waterfalls
//!
//! The interest cascade runs an ordered step list: fees, tranche interest,
//! coverage-test cures, and the residual through the incentive-fee gate.
//! The principal cascade cures first, sets aside the reinvestment bucket,
//! then amortizes tranches by rank. The event-of-default cascade merges
//! both proceeds streams and pays strictly by rank with no reinvestment.
//! Every step settles in whole cents; paid plus remainder equals the
//! amount entering the step.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::fees::FeeState;
use crate::incentive::IncentiveFee;
use crate::liabilities::TrancheState;
use crate::money::round_cents;
use crate::triggers::{in_cure_order, TriggerState};

/// One step of the interest cascade, in execution order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaterfallStep {
    /// Pay a fee by id
    Fee { id: String },
    /// Pay a tranche's accrued interest
    TrancheInterest { tranche: String },
    /// Apply cures for the triggers protecting a tranche
    TrancheCures { tranche: String },
    /// Residual to the subordinated notes through the incentive-fee gate
    Residual { tranche: String },
}

/// What one step consumed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub label: String,
    pub available: f64,
    pub paid: f64,
}

/// Outcome of one cascade execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaterfallOutcome {
    pub steps: Vec<StepRecord>,
    /// Principal reserved for reinvestment (principal cascade only)
    pub reinvested: f64,
    /// Principal paid onto the notes
    pub notes_paid: f64,
    /// Residual distributed to the subordinated notes, net of incentive fee
    pub residual_paid: f64,
    /// Cash left after every step (normally zero once a residual step ran)
    pub remainder: f64,
}

impl WaterfallOutcome {
    pub fn total_paid(&self) -> f64 {
        self.steps.iter().map(|s| s.paid).sum()
    }

    fn record(&mut self, label: impl Into<String>, available: f64, paid: f64) {
        self.steps.push(StepRecord {
            label: label.into(),
            available,
            paid,
        });
    }
}

/// Run the interest cascade over the ordered step list.
#[allow(clippy::too_many_arguments)]
pub fn run_interest_waterfall(
    period: usize,
    steps: &[WaterfallStep],
    interest_pool: f64,
    fees: &mut [FeeState],
    tranches: &mut [TrancheState],
    triggers: &mut [TriggerState],
    incentive: Option<&mut IncentiveFee>,
) -> EngineResult<WaterfallOutcome> {
    let mut outcome = WaterfallOutcome::default();
    let mut available = round_cents(interest_pool);
    let mut incentive = incentive;

    for step in steps {
        let entering = available;
        match step {
            WaterfallStep::Fee { id } => {
                let fee = fees
                    .iter_mut()
                    .find(|f| f.id() == id)
                    .ok_or_else(|| EngineError::validation(format!("unknown fee in waterfall: {id}")))?;
                let paid = round_cents(fee.pay(period, available));
                available = round_cents(available - paid);
                outcome.record(id.clone(), entering, paid);
            }
            WaterfallStep::TrancheInterest { tranche } => {
                let state = find_tranche(tranches, tranche)?;
                let paid = round_cents(state.pay_interest(period, available));
                available = round_cents(available - paid);
                outcome.record(format!("{tranche} interest"), entering, paid);
            }
            WaterfallStep::TrancheCures { tranche } => {
                let paid = apply_cures_for(period, tranche, available, tranches, triggers);
                available = round_cents(available - paid);
                outcome.notes_paid += paid;
                outcome.record(format!("{tranche} cures"), entering, paid);
            }
            WaterfallStep::Residual { tranche } => {
                let paid = distribute_residual(
                    period,
                    tranche,
                    available,
                    tranches,
                    incentive.as_deref_mut(),
                )?;
                outcome.residual_paid += paid;
                available = 0.0;
                outcome.record(format!("{tranche} residual"), entering, entering);
            }
        }
    }

    outcome.remainder = available;
    Ok(outcome)
}

/// Run the principal cascade: cures in trigger order, the reinvestment
/// bucket, sequential paydown by rank, then residual.
#[allow(clippy::too_many_arguments)]
pub fn run_principal_waterfall(
    period: usize,
    principal_pool: f64,
    max_reinvestment: f64,
    tranches: &mut [TrancheState],
    triggers: &mut [TriggerState],
    incentive: Option<&mut IncentiveFee>,
    residual_tranche: &str,
) -> EngineResult<WaterfallOutcome> {
    let mut outcome = WaterfallOutcome::default();
    let mut available = round_cents(principal_pool);

    // Cures first, in their configured order
    for index in in_cure_order(triggers) {
        let entering = available;
        let trigger_id = triggers[index].spec.id.clone();
        let need = triggers[index].remaining_cure();
        if need <= 0.0 {
            continue;
        }
        let amount = round_cents(available.min(need));
        let paid = pay_senior_most(period, tranches, amount);
        triggers[index].apply_cure(period, paid);
        available = round_cents(available - paid);
        outcome.notes_paid += paid;
        outcome.record(format!("{trigger_id} cure"), entering, paid);
    }

    // Reinvestment bucket
    if max_reinvestment > 0.0 && available > 0.0 {
        let entering = available;
        let reserved = round_cents(available.min(max_reinvestment));
        available = round_cents(available - reserved);
        outcome.reinvested = reserved;
        outcome.record("reinvestment", entering, reserved);
    }

    // Sequential principal by rank
    let mut order: Vec<usize> = (0..tranches.len()).collect();
    order.sort_by_key(|&i| tranches[i].rank());
    for i in order {
        if available <= 0.0 {
            break;
        }
        if tranches[i].tranche.is_equity {
            continue;
        }
        let entering = available;
        let paid = round_cents(tranches[i].pay_principal(period, available));
        if paid > 0.0 {
            available = round_cents(available - paid);
            outcome.notes_paid += paid;
            outcome.record(format!("{} principal", tranches[i].name()), entering, paid);
        }
    }

    // Residual to the subordinated notes
    if available > 0.0 {
        let entering = available;
        let paid = distribute_residual(period, residual_tranche, available, tranches, incentive)?;
        outcome.residual_paid += paid;
        outcome.record(format!("{residual_tranche} residual"), entering, entering);
        available = 0.0;
    }

    outcome.remainder = available;
    Ok(outcome)
}

/// Event-of-default cascade: combined proceeds pay fees then tranches
/// strictly by rank (interest, then full principal), with no
/// reinvestment.
pub fn run_eod_waterfall(
    period: usize,
    combined_pool: f64,
    fees: &mut [FeeState],
    tranches: &mut [TrancheState],
    incentive: Option<&mut IncentiveFee>,
    residual_tranche: &str,
) -> EngineResult<WaterfallOutcome> {
    let mut outcome = WaterfallOutcome::default();
    let mut available = round_cents(combined_pool);

    for fee in fees.iter_mut() {
        let entering = available;
        let paid = round_cents(fee.pay(period, available));
        available = round_cents(available - paid);
        outcome.record(fee.id().to_string(), entering, paid);
    }

    let mut order: Vec<usize> = (0..tranches.len()).collect();
    order.sort_by_key(|&i| tranches[i].rank());
    for i in order {
        if tranches[i].tranche.is_equity {
            continue;
        }
        let entering = available;
        let interest_paid = round_cents(tranches[i].pay_interest(period, available));
        available = round_cents(available - interest_paid);
        let principal_paid = round_cents(tranches[i].pay_principal(period, available));
        available = round_cents(available - principal_paid);
        outcome.notes_paid += principal_paid;
        outcome.record(
            format!("{} interest+principal", tranches[i].name()),
            entering,
            round_cents(interest_paid + principal_paid),
        );
    }

    if available > 0.0 {
        let entering = available;
        let paid = distribute_residual(period, residual_tranche, available, tranches, incentive)?;
        outcome.residual_paid += paid;
        outcome.record(format!("{residual_tranche} residual"), entering, entering);
        available = 0.0;
    }

    outcome.remainder = available;
    Ok(outcome)
}

fn find_tranche<'a>(
    tranches: &'a mut [TrancheState],
    name: &str,
) -> EngineResult<&'a mut TrancheState> {
    tranches
        .iter_mut()
        .find(|t| t.name() == name)
        .ok_or_else(|| EngineError::validation(format!("unknown tranche in waterfall: {name}")))
}

/// Cures for every breached trigger protecting the named tranche,
/// limited by what is available. Cure cash pays down the senior-most
/// outstanding tranche.
fn apply_cures_for(
    period: usize,
    tranche: &str,
    available: f64,
    tranches: &mut [TrancheState],
    triggers: &mut [TriggerState],
) -> f64 {
    let mut remaining = available;
    let mut total = 0.0;
    for index in in_cure_order(triggers) {
        if triggers[index].spec.protected_tranche != tranche {
            continue;
        }
        let need = triggers[index].remaining_cure();
        if need <= 0.0 || remaining <= 0.0 {
            continue;
        }
        let amount = round_cents(remaining.min(need));
        let paid = pay_senior_most(period, tranches, amount);
        triggers[index].apply_cure(period, paid);
        remaining = round_cents(remaining - paid);
        total += paid;
    }
    round_cents(total)
}

/// Pay principal to the senior-most tranche with an outstanding balance.
fn pay_senior_most(period: usize, tranches: &mut [TrancheState], amount: f64) -> f64 {
    let mut order: Vec<usize> = (0..tranches.len()).collect();
    order.sort_by_key(|&i| tranches[i].rank());
    let mut remaining = amount;
    let mut total = 0.0;
    for i in order {
        if remaining <= 0.0 {
            break;
        }
        if tranches[i].tranche.is_equity {
            continue;
        }
        let paid = round_cents(tranches[i].pay_principal(period, remaining));
        remaining = round_cents(remaining - paid);
        total += paid;
    }
    round_cents(total)
}

/// Residual through the incentive gate to the subordinated notes.
fn distribute_residual(
    period: usize,
    tranche: &str,
    amount: f64,
    tranches: &mut [TrancheState],
    incentive: Option<&mut IncentiveFee>,
) -> EngineResult<f64> {
    let net = match incentive {
        Some(fee) => {
            let net = round_cents(fee.pay_incentive_fee(amount)?);
            fee.pay_to_sub_noteholders(net)?;
            net
        }
        None => round_cents(amount),
    };
    let state = find_tranche(tranches, tranche)?;
    state.distribute_residual(period, net);
    Ok(net)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::{FeeKind, FeeSpec};
    use crate::liabilities::{Tranche, TrancheRate};
    use crate::time::DayCount;
    use crate::triggers::{TriggerKind, TriggerSpec};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn fee(id: &str, annual: f64) -> FeeState {
        // Quarterly accrual of a flat annual fee
        let mut state = FeeState::new(
            FeeSpec {
                id: id.to_string(),
                kind: FeeKind::Fixed {
                    annual_amount: annual,
                },
                day_count: DayCount::Us30360,
            },
            4,
        );
        state.accrue(1, 0.0, d(2025, 1, 15), d(2025, 4, 15), d(2025, 4, 15));
        state
    }

    fn tranche(name: &str, rank: u32, balance: f64, coupon: f64, equity: bool) -> TrancheState {
        let mut state = TrancheState::new(
            Tranche {
                name: name.to_string(),
                rank,
                original_balance: balance,
                rate: TrancheRate::Fixed { coupon },
                pik_eligible: false,
                day_count: DayCount::Us30360,
                is_equity: equity,
            },
            4,
        );
        state.accrue(1, 0.0, d(2025, 1, 15), d(2025, 4, 15), d(2025, 4, 15));
        state
    }

    fn standard_steps() -> Vec<WaterfallStep> {
        vec![
            WaterfallStep::Fee { id: "TRUSTEE_FEE".into() },
            WaterfallStep::Fee { id: "BASE_MANAGER_FEE".into() },
            WaterfallStep::TrancheInterest { tranche: "Class A".into() },
            WaterfallStep::TrancheCures { tranche: "Class A".into() },
            WaterfallStep::TrancheInterest { tranche: "Class B".into() },
            WaterfallStep::TrancheCures { tranche: "Class B".into() },
            WaterfallStep::Fee { id: "JUNIOR_MANAGER_FEE".into() },
            WaterfallStep::Residual { tranche: "Sub Notes".into() },
        ]
    }

    #[test]
    fn test_interest_cascade_spec_scenario() {
        // 1mm pool; trustee 10k, senior mgmt 15k,
        // A interest 500k, B interest 400k, junior mgmt 50k, residual 25k
        let mut fees = vec![
            fee("TRUSTEE_FEE", 40_000.0),
            fee("BASE_MANAGER_FEE", 60_000.0),
            fee("JUNIOR_MANAGER_FEE", 200_000.0),
        ];
        let mut tranches = vec![
            tranche("Class A", 1, 50_000_000.0, 0.04, false),
            tranche("Class B", 2, 40_000_000.0, 0.04, false),
            tranche("Sub Notes", 10, 0.0, 0.0, true),
        ];
        let mut triggers: Vec<TriggerState> = Vec::new();

        let outcome = run_interest_waterfall(
            1,
            &standard_steps(),
            1_000_000.0,
            &mut fees,
            &mut tranches,
            &mut triggers,
            None,
        )
        .unwrap();

        let paid: Vec<f64> = outcome.steps.iter().map(|s| s.paid).collect();
        assert_relative_eq!(paid[0], 10_000.0);
        assert_relative_eq!(paid[1], 15_000.0);
        assert_relative_eq!(paid[2], 500_000.0);
        assert_relative_eq!(paid[3], 0.0); // no cures
        assert_relative_eq!(paid[4], 400_000.0);
        assert_relative_eq!(paid[5], 0.0);
        assert_relative_eq!(paid[6], 50_000.0);
        assert_relative_eq!(outcome.residual_paid, 25_000.0);
        assert_relative_eq!(outcome.remainder, 0.0);
    }

    #[test]
    fn test_each_step_conserves_cash() {
        let mut fees = vec![fee("TRUSTEE_FEE", 40_000.0), fee("BASE_MANAGER_FEE", 60_000.0), fee("JUNIOR_MANAGER_FEE", 200_000.0)];
        let mut tranches = vec![
            tranche("Class A", 1, 50_000_000.0, 0.04, false),
            tranche("Class B", 2, 40_000_000.0, 0.04, false),
            tranche("Sub Notes", 10, 0.0, 0.0, true),
        ];
        let mut triggers: Vec<TriggerState> = Vec::new();

        let pool = 700_000.0;
        let outcome = run_interest_waterfall(
            1,
            &standard_steps(),
            pool,
            &mut fees,
            &mut tranches,
            &mut triggers,
            None,
        )
        .unwrap();

        // Paid across steps plus the remainder equals the pool
        assert_relative_eq!(outcome.total_paid() + outcome.remainder, pool, epsilon = 0.01);
    }

    #[test]
    fn test_short_pool_stops_down_the_stack() {
        let mut fees = vec![fee("TRUSTEE_FEE", 40_000.0), fee("BASE_MANAGER_FEE", 60_000.0), fee("JUNIOR_MANAGER_FEE", 200_000.0)];
        let mut tranches = vec![
            tranche("Class A", 1, 50_000_000.0, 0.04, false),
            tranche("Class B", 2, 40_000_000.0, 0.04, false),
            tranche("Sub Notes", 10, 0.0, 0.0, true),
        ];
        let mut triggers: Vec<TriggerState> = Vec::new();

        // Only covers fees and part of Class A interest
        let outcome = run_interest_waterfall(
            1,
            &standard_steps(),
            300_000.0,
            &mut fees,
            &mut tranches,
            &mut triggers,
            None,
        )
        .unwrap();

        let a_interest = outcome.steps.iter().find(|s| s.label == "Class A interest").unwrap();
        assert_relative_eq!(a_interest.paid, 275_000.0);
        let b_interest = outcome.steps.iter().find(|s| s.label == "Class B interest").unwrap();
        assert_relative_eq!(b_interest.paid, 0.0);
        // Class B carries the shortfall as deferred
        assert!(tranches[1].deferred > 0.0);
    }

    #[test]
    fn test_ic_cure_diverts_interest_to_senior_principal() {
        let mut fees: Vec<FeeState> = Vec::new();
        let mut tranches = vec![
            tranche("Class A", 1, 10_000_000.0, 0.0, false),
            tranche("Sub Notes", 10, 0.0, 0.0, true),
        ];
        let mut triggers = vec![TriggerState::new(
            TriggerSpec {
                id: "CLASS_A_IC_TEST".into(),
                kind: TriggerKind::Ic,
                threshold: 1.2,
                protected_tranche: "Class A".into(),
                cure_order: 1,
            },
            4,
        )];
        triggers[0].snapshot(1, 100_000.0, 100_000.0); // ratio 1.0, breached

        let steps = vec![
            WaterfallStep::TrancheInterest { tranche: "Class A".into() },
            WaterfallStep::TrancheCures { tranche: "Class A".into() },
            WaterfallStep::Residual { tranche: "Sub Notes".into() },
        ];
        let outcome = run_interest_waterfall(
            1,
            &steps,
            500_000.0,
            &mut fees,
            &mut tranches,
            &mut triggers,
            None,
        )
        .unwrap();

        let cure_step = outcome.steps.iter().find(|s| s.label == "Class A cures").unwrap();
        assert!(cure_step.paid > 0.0);
        // Cure cash paid down Class A principal
        assert!(tranches[0].balance < 10_000_000.0);
        assert!(!triggers[0].is_breached());
    }

    #[test]
    fn test_principal_cascade_reserves_reinvestment_then_amortizes() {
        let mut tranches = vec![
            tranche("Class A", 1, 2_000_000.0, 0.0, false),
            tranche("Sub Notes", 10, 0.0, 0.0, true),
        ];
        let mut triggers: Vec<TriggerState> = Vec::new();

        let outcome = run_principal_waterfall(
            1,
            1_000_000.0,
            600_000.0,
            &mut tranches,
            &mut triggers,
            None,
            "Sub Notes",
        )
        .unwrap();

        assert_relative_eq!(outcome.reinvested, 600_000.0);
        assert_relative_eq!(outcome.notes_paid, 400_000.0);
        assert_relative_eq!(tranches[0].balance, 1_600_000.0);
    }

    #[test]
    fn test_principal_residual_after_notes_retire() {
        let mut tranches = vec![
            tranche("Class A", 1, 300_000.0, 0.0, false),
            tranche("Sub Notes", 10, 0.0, 0.0, true),
        ];
        let mut triggers: Vec<TriggerState> = Vec::new();

        let outcome = run_principal_waterfall(
            1,
            1_000_000.0,
            0.0,
            &mut tranches,
            &mut triggers,
            None,
            "Sub Notes",
        )
        .unwrap();

        assert_relative_eq!(outcome.notes_paid, 300_000.0);
        assert_relative_eq!(outcome.residual_paid, 700_000.0);
        assert_relative_eq!(outcome.remainder, 0.0);
    }

    #[test]
    fn test_eod_pays_strictly_by_rank() {
        let mut fees = vec![fee("TRUSTEE_FEE", 40_000.0)];
        let mut tranches = vec![
            tranche("Class B", 2, 1_000_000.0, 0.04, false),
            tranche("Class A", 1, 1_000_000.0, 0.04, false),
            tranche("Sub Notes", 10, 0.0, 0.0, true),
        ];

        // Pool covers the fee, Class A in full, and only part of Class B
        let outcome = run_eod_waterfall(
            1,
            1_510_000.0,
            &mut fees,
            &mut tranches,
            None,
            "Sub Notes",
        )
        .unwrap();

        // Class A fully retired before Class B sees a dollar of principal
        let class_a = tranches.iter().find(|t| t.name() == "Class A").unwrap();
        let class_b = tranches.iter().find(|t| t.name() == "Class B").unwrap();
        assert_relative_eq!(class_a.balance, 0.0);
        assert!(class_b.balance > 0.0);
        assert_relative_eq!(outcome.remainder, 0.0);
    }
}
