//! Portfolio concentration tests and the compliance objective
//!
//! Each test computes a portfolio statistic, compares it against its
//! threshold, and contributes `(result - threshold) * weight` to the
//! objective when failing (mirrored for minimum tests). Thresholds and
//! weights are configuration, never constants baked into the tests.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::assets::Asset;
use crate::pool::CollateralPool;
use crate::ratings::{is_b_band, is_ccc_band, rating_rank};

/// Stable test identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestId {
    SingleObligor,
    SingleMoodysIndustry,
    SingleSpIndustry,
    BRatedMax,
    CccMax,
    CovLiteMax,
    DefaultedMax,
    NonUsaMax,
    WalMax,
    WarfMax,
    DiversityMin,
}

impl TestId {
    /// Numeric id kept stable across reports
    pub fn number(&self) -> u32 {
        match self {
            TestId::SingleObligor => 1,
            TestId::SingleMoodysIndustry => 9,
            TestId::SingleSpIndustry => 10,
            TestId::BRatedMax => 20,
            TestId::CovLiteMax => 30,
            TestId::CccMax => 35,
            TestId::DefaultedMax => 40,
            TestId::NonUsaMax => 42,
            TestId::WalMax => 45,
            TestId::WarfMax => 50,
            TestId::DiversityMin => 55,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TestId::SingleObligor => "Single Obligor Concentration",
            TestId::SingleMoodysIndustry => "Single Moody's Industry Concentration",
            TestId::SingleSpIndustry => "Single S&P Industry Concentration",
            TestId::BRatedMax => "B-Rated Assets",
            TestId::CovLiteMax => "Covenant-Lite Assets",
            TestId::CccMax => "CCC-Rated Assets",
            TestId::DefaultedMax => "Defaulted Assets",
            TestId::NonUsaMax => "Non-USA Assets",
            TestId::WalMax => "Weighted Average Life",
            TestId::WarfMax => "Weighted Average Rating Factor",
            TestId::DiversityMin => "Diversity Score",
        }
    }

    /// Whether the threshold is a ceiling or a floor
    fn is_maximum(&self) -> bool {
        !matches!(self, TestId::DiversityMin)
    }

    pub const ALL: [TestId; 11] = [
        TestId::SingleObligor,
        TestId::SingleMoodysIndustry,
        TestId::SingleSpIndustry,
        TestId::BRatedMax,
        TestId::CccMax,
        TestId::CovLiteMax,
        TestId::DefaultedMax,
        TestId::NonUsaMax,
        TestId::WalMax,
        TestId::WarfMax,
        TestId::DiversityMin,
    ];
}

/// Threshold configuration; shares are decimals of total par
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcentrationLimits {
    pub single_obligor: f64,
    pub single_moodys_industry: f64,
    pub single_sp_industry: f64,
    pub b_rated: f64,
    pub ccc: f64,
    pub cov_lite: f64,
    pub defaulted: f64,
    pub non_usa: f64,
    /// Years
    pub wal: f64,
    /// Moody's rating-factor points
    pub warf: f64,
    /// Effective obligor count
    pub diversity: f64,
}

impl Default for ConcentrationLimits {
    fn default() -> Self {
        Self {
            single_obligor: 0.02,
            single_moodys_industry: 0.12,
            single_sp_industry: 0.12,
            b_rated: 0.70,
            ccc: 0.075,
            cov_lite: 0.075,
            defaulted: 0.05,
            non_usa: 0.20,
            wal: 6.0,
            warf: 3000.0,
            diversity: 30.0,
        }
    }
}

impl ConcentrationLimits {
    fn threshold(&self, id: TestId) -> f64 {
        match id {
            TestId::SingleObligor => self.single_obligor,
            TestId::SingleMoodysIndustry => self.single_moodys_industry,
            TestId::SingleSpIndustry => self.single_sp_industry,
            TestId::BRatedMax => self.b_rated,
            TestId::CccMax => self.ccc,
            TestId::CovLiteMax => self.cov_lite,
            TestId::DefaultedMax => self.defaulted,
            TestId::NonUsaMax => self.non_usa,
            TestId::WalMax => self.wal,
            TestId::WarfMax => self.warf,
            TestId::DiversityMin => self.diversity,
        }
    }
}

/// Per-test objective weights; tests not present weigh 1.0
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestWeights(pub BTreeMap<TestId, f64>);

impl TestWeights {
    pub fn weight(&self, id: TestId) -> f64 {
        self.0.get(&id).copied().unwrap_or(1.0)
    }
}

/// One test outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub id: TestId,
    pub number: u32,
    pub name: String,
    pub threshold: f64,
    pub result: f64,
    pub pass: bool,
    pub comment: String,
}

/// All test outcomes plus the aggregated objective
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub results: Vec<TestResult>,
    pub objective: f64,
}

impl ComplianceReport {
    pub fn failing(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| !r.pass)
    }

    pub fn result(&self, id: TestId) -> Option<&TestResult> {
        self.results.iter().find(|r| r.id == id)
    }
}

/// Run every concentration test against the pool.
///
/// `principal_cash` joins the denominator the way principal proceeds join
/// the OC numerator: cash awaiting reinvestment still collateralizes.
pub fn run_tests(
    pool: &CollateralPool,
    principal_cash: f64,
    analysis_date: NaiveDate,
    limits: &ConcentrationLimits,
    weights: &TestWeights,
) -> ComplianceReport {
    let total_par = pool.total_par() + principal_cash.max(0.0);
    let mut results = Vec::with_capacity(TestId::ALL.len());

    for id in TestId::ALL {
        let result = match id {
            TestId::SingleObligor => max_group_share(pool, total_par, |a| a.issuer_id.clone()),
            TestId::SingleMoodysIndustry => {
                max_group_share(pool, total_par, |a| a.moodys_industry.clone())
            }
            TestId::SingleSpIndustry => {
                max_group_share(pool, total_par, |a| a.sp_industry.clone())
            }
            TestId::BRatedMax => bucket_share(pool, total_par, |a| {
                is_b_band(&a.sp_rating) || is_b_band(&a.moodys_rating)
            }),
            TestId::CccMax => bucket_share(pool, total_par, |a| {
                !a.is_defaulted() && (is_ccc_band(&a.sp_rating) || is_ccc_band(&a.moodys_rating))
            }),
            TestId::CovLiteMax => bucket_share(pool, total_par, |a| a.flags.cov_lite),
            TestId::DefaultedMax => bucket_share(pool, total_par, |a| a.is_defaulted()),
            TestId::NonUsaMax => {
                bucket_share(pool, total_par, |a| !a.country.eq_ignore_ascii_case("USA"))
            }
            TestId::WalMax => weighted_average_life(pool, analysis_date),
            TestId::WarfMax => weighted_average_rating_factor(pool),
            TestId::DiversityMin => diversity_score(pool),
        };

        let threshold = limits.threshold(id);
        let pass = if id.is_maximum() {
            result <= threshold
        } else {
            result >= threshold
        };

        results.push(TestResult {
            id,
            number: id.number(),
            name: id.name().to_string(),
            threshold,
            result,
            pass,
            comment: format!("{}: {:.4} vs {:.4}", id.name(), result, threshold),
        });
    }

    let objective = objective_value(&results, weights);
    ComplianceReport { results, objective }
}

/// Sum over failing tests of the signed excess times its weight.
pub fn objective_value(results: &[TestResult], weights: &TestWeights) -> f64 {
    results
        .iter()
        .filter(|r| !r.pass)
        .map(|r| {
            let excess = if r.id.is_maximum() {
                r.result - r.threshold
            } else {
                r.threshold - r.result
            };
            excess * weights.weight(r.id)
        })
        .sum()
}

/// Objective change from hypothetically adding par of a candidate asset,
/// honoring the position caps. Returns `None` when the caps exclude the
/// candidate outright.
pub fn candidate_objective(
    pool: &CollateralPool,
    candidate: &Asset,
    analysis_date: NaiveDate,
    limits: &ConcentrationLimits,
    weights: &TestWeights,
    max_loan_size: f64,
    max_par_amount: f64,
) -> Option<f64> {
    if candidate.par_amount > max_loan_size {
        return None;
    }
    if pool.total_par() + candidate.par_amount > max_par_amount {
        return None;
    }

    let before = run_tests(pool, 0.0, analysis_date, limits, weights).objective;
    let mut trial = pool.clone();
    if trial.add_asset(candidate.clone()).is_err() {
        return None;
    }
    let after = run_tests(&trial, 0.0, analysis_date, limits, weights).objective;
    Some(after - before)
}

fn max_group_share<K: Ord>(
    pool: &CollateralPool,
    total_par: f64,
    key: impl Fn(&Asset) -> K,
) -> f64 {
    if total_par <= 0.0 {
        return 0.0;
    }
    let mut groups: BTreeMap<K, f64> = BTreeMap::new();
    for asset in pool.assets() {
        *groups.entry(key(asset)).or_default() += asset.par_amount;
    }
    groups
        .values()
        .fold(0.0_f64, |max, &par| max.max(par / total_par))
}

fn bucket_share(pool: &CollateralPool, total_par: f64, member: impl Fn(&Asset) -> bool) -> f64 {
    if total_par <= 0.0 {
        return 0.0;
    }
    let bucket: f64 = pool
        .assets()
        .filter(|a| member(a))
        .map(|a| a.par_amount)
        .sum();
    bucket / total_par
}

/// Par-weighted average life in years; assets without a stored WAL use
/// time to maturity.
fn weighted_average_life(pool: &CollateralPool, analysis_date: NaiveDate) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for asset in pool.assets() {
        let life = asset.wal.unwrap_or_else(|| {
            (asset.maturity_date - analysis_date).num_days().max(0) as f64 / 365.25
        });
        weighted += life * asset.par_amount;
        total += asset.par_amount;
    }
    if total > 0.0 {
        weighted / total
    } else {
        0.0
    }
}

/// Moody's rating-factor table keyed by the shared rank scale.
fn rating_factor(moodys_rating: &str) -> f64 {
    match rating_rank(moodys_rating) {
        1 => 1.0,
        2 => 10.0,
        3 => 20.0,
        4 => 40.0,
        5 => 70.0,
        6 => 120.0,
        7 => 180.0,
        8 => 260.0,
        9 => 360.0,
        10 => 610.0,
        11 => 940.0,
        12 => 1350.0,
        13 => 1766.0,
        14 => 2220.0,
        15 => 2720.0,
        16 => 3490.0,
        17 => 4770.0,
        18 => 6500.0,
        19 => 8070.0,
        _ => 10000.0,
    }
}

fn weighted_average_rating_factor(pool: &CollateralPool) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for asset in pool.assets().filter(|a| !a.is_defaulted()) {
        weighted += rating_factor(&asset.moodys_rating) * asset.par_amount;
        total += asset.par_amount;
    }
    if total > 0.0 {
        weighted / total
    } else {
        0.0
    }
}

/// Effective obligor count: (sum of par)^2 over sum of squared
/// per-obligor par. Equal positions across N obligors score N.
fn diversity_score(pool: &CollateralPool) -> f64 {
    let mut by_obligor: BTreeMap<&str, f64> = BTreeMap::new();
    for asset in pool.assets() {
        *by_obligor.entry(asset.issuer_id.as_str()).or_default() += asset.par_amount;
    }
    let total: f64 = by_obligor.values().sum();
    let sum_squares: f64 = by_obligor.values().map(|p| p * p).sum();
    if sum_squares > 0.0 {
        total * total / sum_squares
    } else {
        0.0
    }
}
