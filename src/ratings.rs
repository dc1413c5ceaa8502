//! Rating scales, cross-agency derivation, recovery rates, and rating
//! history
//!
//! Both agency scales map onto a shared 1..=22 rank (1 = AAA/Aaa,
//! 22 = D). Derivation walks the facility/issuer/senior/sub hierarchy and
//! falls back to the other agency's rating at the same rank.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// S&P rating symbols ordered best to worst
pub const SP_SCALE: [&str; 22] = [
    "AAA", "AA+", "AA", "AA-", "A+", "A", "A-", "BBB+", "BBB", "BBB-", "BB+", "BB", "BB-", "B+",
    "B", "B-", "CCC+", "CCC", "CCC-", "CC", "C", "D",
];

/// Moody's rating symbols ordered best to worst
pub const MOODYS_SCALE: [&str; 22] = [
    "Aaa", "Aa1", "Aa2", "Aa3", "A1", "A2", "A3", "Baa1", "Baa2", "Baa3", "Ba1", "Ba2", "Ba3",
    "B1", "B2", "B3", "Caa1", "Caa2", "Caa3", "Ca", "C", "D",
];

/// Rating outlook reported alongside the letter grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outlook {
    Positive,
    Negative,
    Stable,
    Upgrade,
    Downgrade,
}

/// Which agency a rating symbol belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Agency {
    Moodys,
    Sp,
}

/// Rank of a rating symbol on the shared 1..=22 scale; unknown symbols
/// rank as B/B2 (15).
pub fn rating_rank(symbol: &str) -> u8 {
    let trimmed = symbol.trim();
    for (i, s) in SP_SCALE.iter().enumerate() {
        if trimmed.eq_ignore_ascii_case(s) {
            return i as u8 + 1;
        }
    }
    for (i, s) in MOODYS_SCALE.iter().enumerate() {
        if trimmed == *s {
            return i as u8 + 1;
        }
    }
    15
}

/// Rating symbol at a rank on the requested agency scale.
pub fn rating_at_rank(agency: Agency, rank: u8) -> &'static str {
    let idx = (rank.clamp(1, 22) - 1) as usize;
    match agency {
        Agency::Sp => SP_SCALE[idx],
        Agency::Moodys => MOODYS_SCALE[idx],
    }
}

/// True for any CCC-band symbol (either agency).
pub fn is_ccc_band(symbol: &str) -> bool {
    let rank = rating_rank(symbol);
    (17..=21).contains(&rank)
}

/// True for the B band (B+/B/B- or B1/B2/B3).
pub fn is_b_band(symbol: &str) -> bool {
    let rank = rating_rank(symbol);
    (14..=16).contains(&rank)
}

pub fn is_default_symbol(symbol: &str) -> bool {
    symbol.trim().eq_ignore_ascii_case("D")
}

/// The rating hierarchy an asset carries for derivation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatingInputs {
    pub moodys_facility: Option<String>,
    pub moodys_issuer: Option<String>,
    pub moodys_senior_unsecured: Option<String>,
    pub moodys_subordinate: Option<String>,
    pub sp_facility: Option<String>,
    pub sp_issuer: Option<String>,
    pub sp_senior_unsecured: Option<String>,
    pub sp_subordinate: Option<String>,
}

/// Derive the effective Moody's rating: facility, then issuer, then senior
/// unsecured notched down one, then subordinate notched up one, then the
/// S&P rating mapped across, then B2.
pub fn derive_moodys(inputs: &RatingInputs, sp_rating: Option<&str>) -> String {
    if let Some(r) = nonempty(&inputs.moodys_facility) {
        return r.to_string();
    }
    if let Some(r) = nonempty(&inputs.moodys_issuer) {
        return r.to_string();
    }
    if let Some(r) = nonempty(&inputs.moodys_senior_unsecured) {
        return rating_at_rank(Agency::Moodys, rating_rank(r) + 1).to_string();
    }
    if let Some(r) = nonempty(&inputs.moodys_subordinate) {
        return rating_at_rank(Agency::Moodys, rating_rank(r).saturating_sub(1).max(1)).to_string();
    }
    if let Some(sp) = sp_rating.filter(|s| !s.trim().is_empty()) {
        return rating_at_rank(Agency::Moodys, rating_rank(sp)).to_string();
    }
    "B2".to_string()
}

/// Derive the effective S&P rating with the mirrored hierarchy.
pub fn derive_sp(inputs: &RatingInputs, moodys_rating: Option<&str>) -> String {
    if let Some(r) = nonempty(&inputs.sp_facility) {
        return r.to_string();
    }
    if let Some(r) = nonempty(&inputs.sp_issuer) {
        return r.to_string();
    }
    if let Some(r) = nonempty(&inputs.sp_senior_unsecured) {
        return rating_at_rank(Agency::Sp, rating_rank(r) + 1).to_string();
    }
    if let Some(r) = nonempty(&inputs.sp_subordinate) {
        return rating_at_rank(Agency::Sp, rating_rank(r).saturating_sub(1).max(1)).to_string();
    }
    if let Some(mdy) = moodys_rating.filter(|s| !s.trim().is_empty()) {
        return rating_at_rank(Agency::Sp, rating_rank(mdy)).to_string();
    }
    "B".to_string()
}

fn nonempty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// Moody's recovery rate by rating band; the fallback is 35%.
pub fn recovery_rate_for(moodys_rating: &str) -> f64 {
    match rating_rank(moodys_rating) {
        1..=4 => 0.70,
        5..=7 => 0.65,
        8..=10 => 0.60,
        11..=13 => 0.50,
        14..=16 => 0.40,
        17 => 0.30,
        18 => 0.25,
        19 => 0.20,
        _ => 0.35,
    }
}

/// A dated rating observation on one agency's scale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingObservation {
    pub date: NaiveDate,
    pub agency: Agency,
    pub rating: String,
}

/// Per-asset rating history with as-of lookup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatingHistory {
    observations: Vec<RatingObservation>,
}

impl RatingHistory {
    pub fn record(&mut self, date: NaiveDate, agency: Agency, rating: impl Into<String>) {
        self.observations.push(RatingObservation {
            date,
            agency,
            rating: rating.into(),
        });
        self.observations.sort_by_key(|o| o.date);
    }

    /// Latest rating on or before `as_of` for the agency, if any.
    pub fn rating_as_of(&self, as_of: NaiveDate, agency: Agency) -> Option<&str> {
        self.observations
            .iter()
            .rev()
            .find(|o| o.agency == agency && o.date <= as_of)
            .map(|o| o.rating.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_symmetry_across_agencies() {
        assert_eq!(rating_rank("BBB-"), rating_rank("Baa3"));
        assert_eq!(rating_rank("B2"), 15);
        assert_eq!(rating_rank("AAA"), 1);
        assert_eq!(rating_rank("D"), 22);
    }

    #[test]
    fn test_unknown_symbol_ranks_mid_b() {
        assert_eq!(rating_rank("NR"), 15);
    }

    #[test]
    fn test_band_membership() {
        assert!(is_ccc_band("CCC+"));
        assert!(is_ccc_band("Caa2"));
        assert!(!is_ccc_band("B-"));
        assert!(is_b_band("B+"));
        assert!(is_b_band("B3"));
        assert!(!is_b_band("BB-"));
    }

    #[test]
    fn test_derive_moodys_hierarchy() {
        let mut inputs = RatingInputs::default();
        assert_eq!(derive_moodys(&inputs, None), "B2");

        // Cross-agency fallback maps rank
        assert_eq!(derive_moodys(&inputs, Some("BB")), "Ba2");

        // Senior unsecured notches down
        inputs.moodys_senior_unsecured = Some("Ba2".into());
        assert_eq!(derive_moodys(&inputs, None), "Ba3");

        // Facility wins outright
        inputs.moodys_facility = Some("B1".into());
        assert_eq!(derive_moodys(&inputs, None), "B1");
    }

    #[test]
    fn test_derive_sp_subordinate_notches_up() {
        let inputs = RatingInputs {
            sp_subordinate: Some("B".into()),
            ..Default::default()
        };
        assert_eq!(derive_sp(&inputs, None), "B+");
    }

    #[test]
    fn test_recovery_rates_monotone_in_quality() {
        assert!(recovery_rate_for("Aa2") > recovery_rate_for("Baa2"));
        assert!(recovery_rate_for("Baa2") > recovery_rate_for("B2"));
        assert!(recovery_rate_for("B2") > recovery_rate_for("Caa3"));
    }

    #[test]
    fn test_history_as_of_lookup() {
        let mut hist = RatingHistory::default();
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 7, 15).unwrap();
        hist.record(d2, Agency::Sp, "B-");
        hist.record(d1, Agency::Sp, "B");

        let mid = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(hist.rating_as_of(mid, Agency::Sp), Some("B"));
        assert_eq!(hist.rating_as_of(d2, Agency::Sp), Some("B-"));
        assert_eq!(hist.rating_as_of(d1, Agency::Moodys), None);
    }
}
