//! CLO Engine CLI
//!
//! Runs a small demonstration deal and prints the waterfall period table

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;

use chrono::NaiveDate;

use clo_engine::assets::{Amortization, Asset, AssetFlags, AssetKind, RateSpec, Seniority};
use clo_engine::deal::{
    default_waterfall_steps, CloInputs, DealConfig, DealDates, DealEngine, ReinvestmentPolicy,
    ReinvestmentType,
};
use clo_engine::fees::{FeeKind, FeeSpec};
use clo_engine::liabilities::{Tranche, TrancheRate};
use clo_engine::rates::RateCurve;
use clo_engine::ratings::{RatingHistory, RatingInputs};
use clo_engine::reinvest::ReinvestmentProfile;
use clo_engine::time::{BusinessDayConvention, Calendar, DayCount, PaymentFrequency};
use clo_engine::triggers::{TriggerKind, TriggerSpec};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn sample_loan(id: &str, issuer: u32, par: f64, spread: f64, industry: &str) -> Asset {
    Asset {
        id: id.to_string(),
        issuer_id: format!("ISSUER-{issuer}"),
        issue_name: format!("Term Loan {id}"),
        kind: AssetKind::Loan,
        seniority: Seniority::SeniorSecured,
        flags: AssetFlags::default(),
        par_amount: par,
        unfunded_amount: 0.0,
        pik_balance: 0.0,
        dated_date: date(2025, 1, 15),
        first_payment_date: date(2025, 4, 15),
        maturity_date: date(2030, 1, 15),
        frequency: PaymentFrequency::Quarterly,
        day_count: DayCount::Us30360,
        business_day_convention: BusinessDayConvention::Following,
        end_of_month: false,
        rate: RateSpec::Float {
            index_name: "LIBOR".to_string(),
            spread,
            floor: 0.01,
            cap: None,
        },
        amortization: Amortization::Bullet,
        moodys_rating: "B2".to_string(),
        sp_rating: "B".to_string(),
        rating_inputs: RatingInputs::default(),
        outlook: None,
        rating_history: RatingHistory::default(),
        recovery_rate: None,
        moodys_industry: industry.to_string(),
        sp_industry: industry.to_string(),
        country: "USA".to_string(),
        wal: None,
        market_value: None,
        facility_size: None,
        analyst_opinion: None,
    }
}

fn sample_config() -> DealConfig {
    let tranches = vec![
        Tranche {
            name: "Class A".to_string(),
            rank: 1,
            original_balance: 60_000_000.0,
            rate: TrancheRate::Float {
                spread: 0.013,
                floor: 0.0,
            },
            pik_eligible: false,
            day_count: DayCount::Us30360,
            is_equity: false,
        },
        Tranche {
            name: "Class B".to_string(),
            rank: 2,
            original_balance: 20_000_000.0,
            rate: TrancheRate::Float {
                spread: 0.022,
                floor: 0.0,
            },
            pik_eligible: false,
            day_count: DayCount::Us30360,
            is_equity: false,
        },
        Tranche {
            name: "Class C".to_string(),
            rank: 3,
            original_balance: 10_000_000.0,
            rate: TrancheRate::Float {
                spread: 0.035,
                floor: 0.0,
            },
            pik_eligible: true,
            day_count: DayCount::Us30360,
            is_equity: false,
        },
        Tranche {
            name: "Sub Notes".to_string(),
            rank: 10,
            original_balance: 12_000_000.0,
            rate: TrancheRate::Fixed { coupon: 0.0 },
            pik_eligible: false,
            day_count: DayCount::Us30360,
            is_equity: true,
        },
    ];
    let waterfall_steps = default_waterfall_steps(&tranches, "Sub Notes");

    let industries = ["Healthcare", "Software", "Retail", "Chemicals", "Media"];
    let assets: Vec<Asset> = (0..40)
        .map(|i| {
            sample_loan(
                &format!("L{i:02}"),
                i,
                2_500_000.0,
                0.032 + (i % 5) as f64 * 0.002,
                industries[(i % 5) as usize],
            )
        })
        .collect();

    DealConfig {
        deal_dates: DealDates {
            analysis_date: date(2025, 1, 15),
            closing_date: date(2025, 1, 15),
            first_payment_date: date(2025, 4, 15),
            maturity_date: date(2030, 1, 15),
            reinvestment_end_date: date(2027, 1, 15),
            no_call_date: date(2027, 1, 15),
            payment_day: 15,
            months_between_payments: 3,
            business_day_convention: BusinessDayConvention::Following,
            determination_date_offset: 2,
            interest_determination_date_offset: 2,
        },
        reinvestment_policy: ReinvestmentPolicy {
            pre_type: ReinvestmentType::AllPrincipal,
            pre_pct: 1.0,
            post_type: ReinvestmentType::UnscheduledPrincipal,
            post_pct: 0.5,
            include_recoveries_in_unscheduled: false,
        },
        clo_inputs: CloInputs {
            current_libor: 0.045,
            event_of_default: false,
            purchase_finance_accrued_interest: 0.0,
            call_when_sub_dist_below: 0.0,
        },
        cashflow_assumptions: clo_engine::assets::CashflowAssumptions {
            prepayment: RateCurve::Flat(0.15),
            default: RateCurve::Flat(0.02),
            severity: RateCurve::Flat(0.40),
            recovery_lag_periods: 2,
        },
        initial_accounts: BTreeMap::new(),
        tranches,
        waterfall_steps,
        triggers: vec![
            TriggerSpec {
                id: "CLASS_A_OC_TEST".to_string(),
                kind: TriggerKind::Oc,
                threshold: 1.25,
                protected_tranche: "Class A".to_string(),
                cure_order: 1,
            },
            TriggerSpec {
                id: "CLASS_A_IC_TEST".to_string(),
                kind: TriggerKind::Ic,
                threshold: 1.20,
                protected_tranche: "Class A".to_string(),
                cure_order: 2,
            },
            TriggerSpec {
                id: "CLASS_B_OC_TEST".to_string(),
                kind: TriggerKind::Oc,
                threshold: 1.12,
                protected_tranche: "Class B".to_string(),
                cure_order: 3,
            },
        ],
        fees: vec![
            FeeSpec {
                id: "TRUSTEE_FEE".to_string(),
                kind: FeeKind::Fixed {
                    annual_amount: 150_000.0,
                },
                day_count: DayCount::Us30360,
            },
            FeeSpec {
                id: "ADMIN_FEE".to_string(),
                kind: FeeKind::Fixed {
                    annual_amount: 100_000.0,
                },
                day_count: DayCount::Us30360,
            },
            FeeSpec {
                id: "BASE_MANAGER_FEE".to_string(),
                kind: FeeKind::OnBalance { rate: 0.0040 },
                day_count: DayCount::Us30360,
            },
            FeeSpec {
                id: "JUNIOR_MANAGER_FEE".to_string(),
                kind: FeeKind::OnBalance { rate: 0.0030 },
                day_count: DayCount::Us30360,
            },
        ],
        yield_curve: BTreeMap::from([
            (1, 0.044),
            (3, 0.045),
            (6, 0.046),
            (12, 0.047),
            (24, 0.048),
            (60, 0.050),
            (120, 0.051),
        ]),
        reinvestment_profile: Some(ReinvestmentProfile {
            maturity_months: 60,
            reinvest_price: 1.0,
            spread: 0.035,
            floor: 0.01,
            liquidation_price: 0.70,
            lag_months: 6,
            prepayment: RateCurve::Flat(0.15),
            default: RateCurve::Flat(0.02),
            severity: RateCurve::Flat(0.40),
        }),
        eod_trigger_id: Some("CLASS_A_OC_TEST".to_string()),
        ccc_threshold: 0.075,
        liquidation_price: 1.0,
        residual_tranche: "Sub Notes".to_string(),
        concentration_limits: Default::default(),
        test_weights: Default::default(),
        assets,
        incentive_hurdle_rate: Some(0.08),
        incentive_fee_rate: Some(0.20),
        incentive_history: BTreeMap::new(),
    }
}

fn main() {
    env_logger::init();

    println!("CLO Engine v0.1.0");
    println!("=================\n");

    let config = sample_config();
    let mut engine = DealEngine::new(config, Calendar::new()).expect("valid sample config");
    let output = engine.run().expect("sample deal runs");

    println!(
        "{:>4} {:>12} {:>14} {:>14} {:>14} {:>14} {:>12}",
        "Per", "Pay Date", "Interest", "Principal", "Notes Paid", "Reinvested", "Residual"
    );
    println!("{}", "-".repeat(90));
    for row in &output.periods {
        println!(
            "{:>4} {:>12} {:>14.2} {:>14.2} {:>14.2} {:>14.2} {:>12.2}",
            row.period,
            row.payment_date,
            row.interest_proceeds,
            row.principal_proceeds,
            row.notes_paid,
            row.reinvested,
            row.residual_paid,
        );
    }

    println!("\nTranches:");
    for tranche in &output.tranches {
        println!(
            "  {:<10} {:>14.2} -> {:>14.2}  interest paid {:>14.2}",
            tranche.name,
            tranche.original_balance,
            tranche.ending_balance,
            tranche.total_interest_paid,
        );
    }

    // Full period table to CSV for spreadsheet comparison
    let csv_path = "deal_output.csv";
    let mut file = File::create(csv_path).expect("unable to create CSV file");
    writeln!(
        file,
        "Period,PaymentDate,CollectionBegin,CollectionEnd,InterestProceeds,PrincipalProceeds,NotesPaid,Reinvested,Residual,LIBOR"
    )
    .unwrap();
    for row in &output.periods {
        writeln!(
            file,
            "{},{},{},{},{:.2},{:.2},{:.2},{:.2},{:.2},{:.6}",
            row.period,
            row.payment_date,
            row.collection_begin,
            row.collection_end,
            row.interest_proceeds,
            row.principal_proceeds,
            row.notes_paid,
            row.reinvested,
            row.residual_paid,
            row.libor,
        )
        .unwrap();
    }
    println!("\nFull results written to: {csv_path}");
}
