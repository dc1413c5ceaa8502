//! Obligation (asset) model
//!
//! An obligation carries identification, classification, balances, its
//! payment schedule parameters, a rate specification, ratings, and
//! classification buckets. Positions are mutated only through the pool;
//! projection never mutates the obligation, it emits a fresh strip.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::ratings::{
    derive_moodys, derive_sp, is_default_symbol, recovery_rate_for, Outlook, RatingHistory,
    RatingInputs,
};
use crate::time::{
    payment_schedule, BusinessDayConvention, Calendar, DayCount, PaymentFrequency, SchedulePeriod,
};

/// Instrument kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetKind {
    Bond,
    Loan,
}

/// Capital-structure position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Seniority {
    SeniorSecured,
    SeniorUnsecured,
    Subordinate,
}

/// Coupon specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateSpec {
    Fixed {
        coupon: f64,
    },
    Float {
        index_name: String,
        spread: f64,
        floor: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cap: Option<f64>,
    },
}

/// Amortization profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Amortization {
    /// All principal at maturity
    #[default]
    Bullet,
    /// Remaining balance spread evenly over remaining periods
    Amortizing,
}

/// Boolean classification flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetFlags {
    pub default_asset: bool,
    pub pik_eligible: bool,
    pub piking: bool,
    pub cov_lite: bool,
    pub dip: bool,
    pub struct_finance: bool,
    pub revolver: bool,
    pub bridge_loan: bool,
    pub current_pay: bool,
}

/// A single obligation in the collateral pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    // Identification
    pub id: String,
    pub issuer_id: String,
    pub issue_name: String,

    // Classification
    pub kind: AssetKind,
    pub seniority: Seniority,
    #[serde(default)]
    pub flags: AssetFlags,

    // Balances
    pub par_amount: f64,
    #[serde(default)]
    pub unfunded_amount: f64,
    #[serde(default)]
    pub pik_balance: f64,

    // Schedule
    pub dated_date: NaiveDate,
    pub first_payment_date: NaiveDate,
    pub maturity_date: NaiveDate,
    pub frequency: PaymentFrequency,
    #[serde(default)]
    pub day_count: DayCount,
    #[serde(default)]
    pub business_day_convention: BusinessDayConvention,
    #[serde(default)]
    pub end_of_month: bool,

    // Rate
    pub rate: RateSpec,
    #[serde(default)]
    pub amortization: Amortization,

    // Ratings
    #[serde(default)]
    pub moodys_rating: String,
    #[serde(default)]
    pub sp_rating: String,
    #[serde(default)]
    pub rating_inputs: RatingInputs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlook: Option<Outlook>,
    #[serde(default)]
    pub rating_history: RatingHistory,

    // Recovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_rate: Option<f64>,

    // Classification buckets
    #[serde(default)]
    pub moodys_industry: String,
    #[serde(default)]
    pub sp_industry: String,
    #[serde(default)]
    pub country: String,

    // Analytics inputs used by filters and tests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyst_opinion: Option<String>,
}

impl Asset {
    /// Validate the invariants every obligation must satisfy.
    pub fn validate(&self) -> EngineResult<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::validation("asset id cannot be empty"));
        }
        if self.par_amount < 0.0 {
            return Err(EngineError::validation(format!(
                "asset {}: par_amount must be non-negative",
                self.id
            )));
        }
        if self.first_payment_date <= self.dated_date {
            return Err(EngineError::validation(format!(
                "asset {}: first_payment_date must be after dated_date",
                self.id
            )));
        }
        match &self.rate {
            RateSpec::Fixed { coupon } => {
                if !(0.0..=1.0).contains(coupon) {
                    return Err(EngineError::validation(format!(
                        "asset {}: coupon must be a decimal in [0, 1]",
                        self.id
                    )));
                }
            }
            RateSpec::Float { spread, floor, .. } => {
                if *spread < 0.0 {
                    return Err(EngineError::validation(format!(
                        "asset {}: float spread must be non-negative",
                        self.id
                    )));
                }
                if *floor < 0.0 {
                    return Err(EngineError::validation(format!(
                        "asset {}: float floor must be non-negative",
                        self.id
                    )));
                }
            }
        }
        if let Some(rr) = self.recovery_rate {
            if !(0.0..=1.0).contains(&rr) {
                return Err(EngineError::validation(format!(
                    "asset {}: recovery_rate must be in [0, 1]",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// Defaulted if flagged, or either agency shows D.
    pub fn is_defaulted(&self) -> bool {
        self.flags.default_asset
            || is_default_symbol(&self.moodys_rating)
            || is_default_symbol(&self.sp_rating)
    }

    /// Interest currently capitalizes instead of paying cash.
    pub fn is_piking(&self) -> bool {
        self.flags.pik_eligible && self.flags.piking
    }

    /// Stored recovery rate, else the Moody's table rate for the rating.
    pub fn effective_recovery_rate(&self) -> f64 {
        self.recovery_rate
            .unwrap_or_else(|| recovery_rate_for(&self.moodys_rating))
    }

    /// Fill whichever agency rating is missing from the hierarchy and the
    /// other agency's grade.
    pub fn update_derived_ratings(&mut self) {
        if self.moodys_rating.trim().is_empty() {
            self.moodys_rating = derive_moodys(
                &self.rating_inputs,
                Some(self.sp_rating.as_str()).filter(|s| !s.trim().is_empty()),
            );
        }
        if self.sp_rating.trim().is_empty() {
            self.sp_rating = derive_sp(
                &self.rating_inputs,
                Some(self.moodys_rating.as_str()).filter(|s| !s.trim().is_empty()),
            );
        }
    }

    /// Adjusted payment schedule for this obligation.
    pub fn schedule(&self, calendar: &Calendar) -> EngineResult<Vec<SchedulePeriod>> {
        payment_schedule(
            calendar,
            self.dated_date,
            self.first_payment_date,
            self.maturity_date,
            self.frequency,
            self.business_day_convention,
            self.end_of_month,
        )
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::bullet_bond;
    use super::*;

    #[test]
    fn test_validation_accepts_plain_bond() {
        assert!(bullet_bond("A1", 1_000_000.0, 0.05).validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_negative_par() {
        let mut asset = bullet_bond("A1", -1.0, 0.05);
        asset.par_amount = -1.0;
        assert!(asset.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_coupon_above_one() {
        let asset = bullet_bond("A1", 1_000_000.0, 5.0);
        assert!(asset.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_first_payment_before_dated() {
        let mut asset = bullet_bond("A1", 1_000_000.0, 0.05);
        asset.first_payment_date = asset.dated_date;
        assert!(asset.validate().is_err());
    }

    #[test]
    fn test_defaulted_by_rating() {
        let mut asset = bullet_bond("A1", 1_000_000.0, 0.05);
        assert!(!asset.is_defaulted());
        asset.sp_rating = "D".to_string();
        assert!(asset.is_defaulted());
    }

    #[test]
    fn test_effective_recovery_prefers_stored() {
        let mut asset = bullet_bond("A1", 1_000_000.0, 0.05);
        assert_eq!(asset.effective_recovery_rate(), 0.40); // B2 table rate
        asset.recovery_rate = Some(0.55);
        assert_eq!(asset.effective_recovery_rate(), 0.55);
    }

    #[test]
    fn test_derived_ratings_fill_missing() {
        let mut asset = bullet_bond("A1", 1_000_000.0, 0.05);
        asset.moodys_rating = String::new();
        asset.sp_rating = "BB-".to_string();
        asset.update_derived_ratings();
        assert_eq!(asset.moodys_rating, "Ba3");
    }

    #[test]
    fn test_schedule_has_four_quarters() {
        let asset = bullet_bond("A1", 1_000_000.0, 0.05);
        let schedule = asset.schedule(&Calendar::new()).unwrap();
        assert_eq!(schedule.len(), 4);
    }
}
