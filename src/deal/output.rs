//! Run output bundle

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::assets::CashflowRow;
use crate::compliance::ComplianceReport;
use crate::deal::config::PaymentDates;
use crate::error::RunWarning;
use crate::incentive::IncentivePeriod;
use crate::liabilities::{TranchePeriod, TrancheRiskMeasures};

/// One period of deal-level results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodOutput {
    pub period: usize,
    pub payment_date: NaiveDate,
    pub collection_begin: NaiveDate,
    pub collection_end: NaiveDate,
    pub interest_proceeds: f64,
    pub principal_proceeds: f64,
    pub notes_paid: f64,
    pub reinvested: f64,
    pub residual_paid: f64,
    pub libor: f64,
}

/// Per-tranche results across the run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrancheOutput {
    pub name: String,
    pub rank: u32,
    pub original_balance: f64,
    pub ending_balance: f64,
    pub deferred_interest: f64,
    pub final_coupon: f64,
    pub total_interest_paid: f64,
    pub total_principal_paid: f64,
    pub periods: Vec<TranchePeriod>,
    pub risk: TrancheRiskMeasures,
}

/// Reinvestment activity summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReinvestmentSummary {
    pub total_reinvested: f64,
    pub last_active_period: usize,
    pub cashflows: Vec<CashflowRow>,
}

/// Everything a deal run produces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealOutput {
    pub periods: Vec<PeriodOutput>,
    pub payment_schedule: Vec<PaymentDates>,
    pub tranches: Vec<TrancheOutput>,
    /// Concentration test results at closing
    pub compliance_at_closing: ComplianceReport,
    pub incentive_fee: Vec<IncentivePeriod>,
    pub reinvestment: ReinvestmentSummary,
    pub last_calculated_period: usize,
    pub warnings: Vec<RunWarning>,
}

impl DealOutput {
    pub fn tranche(&self, name: &str) -> Option<&TrancheOutput> {
        self.tranches.iter().find(|t| t.name == name)
    }

    pub fn total_interest_proceeds(&self) -> f64 {
        self.periods.iter().map(|p| p.interest_proceeds).sum()
    }

    pub fn total_principal_proceeds(&self) -> f64 {
        self.periods.iter().map(|p| p.principal_proceeds).sum()
    }

    pub fn total_residual_paid(&self) -> f64 {
        self.periods.iter().map(|p| p.residual_paid).sum()
    }
}
