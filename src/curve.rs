//! Yield curve: spot/forward/zero-rate interpolation
//!
//! A curve is built from a sparse tenor-month -> spot-rate map. Missing
//! months are filled by linear interpolation, then one-month forward rates
//! are derived as `f_i = (1+s_{i+1})^(i+1) / (1+s_i)^i - 1` and indexed by
//! the date `analysis_date + i` months. Spot queries compound forwards one
//! month at a time; dates before the first forward use the first forward,
//! dates past the last use the last, and dates in between interpolate the
//! adjacent forwards on day distance.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::error::{EngineError, EngineResult};
use crate::time::{add_months, whole_months};

/// Forward-rate yield curve built from sparse spot tenors
#[derive(Debug, Clone)]
pub struct YieldCurve {
    name: String,
    analysis_date: NaiveDate,
    /// Interpolated spot rate per integer month 1..=last_month
    spot_rates: Vec<f64>,
    /// One-month forward rates keyed by forward date
    forwards: BTreeMap<NaiveDate, f64>,
    last_forward: f64,
}

impl YieldCurve {
    /// Build a curve from `tenor_month -> annual spot rate`.
    pub fn new(
        name: impl Into<String>,
        analysis_date: NaiveDate,
        tenor_rates: &BTreeMap<u32, f64>,
    ) -> EngineResult<Self> {
        if tenor_rates.is_empty() {
            return Err(EngineError::validation("rate curve cannot be empty"));
        }
        if tenor_rates.keys().any(|&m| m == 0) {
            return Err(EngineError::validation("curve tenors start at month 1"));
        }

        let last_month = *tenor_rates.keys().last().expect("non-empty") as usize;
        let tenors: Vec<u32> = tenor_rates.keys().copied().collect();

        // Linear interpolation onto every integer month
        let mut spot_rates = vec![0.0; last_month + 1];
        for month in 1..=last_month {
            let m = month as u32;
            spot_rates[month] = match tenor_rates.get(&m) {
                Some(&rate) => rate,
                None => {
                    let prev = tenors.iter().rev().find(|&&t| t < m);
                    let next = tenors.iter().find(|&&t| t > m);
                    match (prev, next) {
                        (Some(&p), Some(&n)) => {
                            let w = (m - p) as f64 / (n - p) as f64;
                            (1.0 - w) * tenor_rates[&p] + w * tenor_rates[&n]
                        }
                        // Before the first tenor: flat at the first rate
                        (None, Some(&n)) => tenor_rates[&n],
                        (Some(&p), None) => tenor_rates[&p],
                        (None, None) => unreachable!("non-empty map"),
                    }
                }
            };
        }

        // Forward rates; the analysis date itself carries the 1-month spot
        let mut forwards = BTreeMap::new();
        forwards.insert(analysis_date, spot_rates[1]);
        let mut last_forward = spot_rates[1];
        for i in 1..last_month {
            let fwd = (1.0 + spot_rates[i + 1]).powi(i as i32 + 1)
                / (1.0 + spot_rates[i]).powi(i as i32)
                - 1.0;
            forwards.insert(add_months(analysis_date, i as i32), fwd);
            last_forward = fwd;
        }

        Ok(Self {
            name: name.into(),
            analysis_date,
            spot_rates,
            forwards,
            last_forward,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn analysis_date(&self) -> NaiveDate {
        self.analysis_date
    }

    /// Annualized spot rate for a term of `months` starting at `from_date`.
    pub fn spot_rate(&self, from_date: NaiveDate, months: u32) -> EngineResult<f64> {
        if months < 1 {
            return Err(EngineError::validation("spot_rate term must be >= 1 month"));
        }

        let first_date = *self.forwards.keys().next().expect("non-empty");
        let last_date = *self.forwards.keys().next_back().expect("non-empty");

        let mut factor = 1.0;
        let mut current = from_date;
        for _ in 0..months {
            let rate = if current <= first_date {
                self.forwards[&first_date]
            } else if current <= last_date {
                self.interpolated_forward(current)
            } else {
                self.last_forward
            };
            factor *= 1.0 + rate;
            current = add_months(current, 1);
        }

        Ok(factor.powf(1.0 / months as f64) - 1.0)
    }

    /// Forward rate at an arbitrary date, interpolating the adjacent
    /// one-month forwards on day distance.
    fn interpolated_forward(&self, date: NaiveDate) -> f64 {
        let prev = self
            .forwards
            .range(..date)
            .next_back()
            .map(|(&d, &r)| (d, r));
        let next = self.forwards.range(date..).next().map(|(&d, &r)| (d, r));

        match (prev, next) {
            (Some((pd, pr)), Some((nd, nr))) => {
                if nd == pd {
                    pr
                } else {
                    let w = (date - pd).num_days() as f64 / (nd - pd).num_days() as f64;
                    pr + (nr - pr) * w
                }
            }
            (Some((_, pr)), None) => pr,
            (None, Some((_, nr))) => nr,
            (None, None) => self.last_forward,
        }
    }

    /// Zero rate between two dates, interpolating the bracketing
    /// whole-month spot rates on the fractional-month offset.
    pub fn zero_rate(&self, start: NaiveDate, end: NaiveDate) -> EngineResult<f64> {
        if end <= start {
            return Err(EngineError::validation("zero_rate needs end after start"));
        }

        let months = whole_months(start, end);
        if months < 1 {
            // Sub-month stub: the 1-month rate applies
            return self.spot_rate(start, 1);
        }
        let months = months as u32;

        let low_date = add_months(start, months as i32);
        let (low_date, high_date, low_rate, high_rate) = if end > low_date {
            let high_date = add_months(low_date, 1);
            (
                low_date,
                high_date,
                self.spot_rate(start, months)?,
                self.spot_rate(start, months + 1)?,
            )
        } else {
            let high_date = low_date;
            let low_date = add_months(high_date, -1);
            let low_rate = if months == 1 {
                self.spot_rate(start, 1)?
            } else {
                self.spot_rate(start, months - 1)?
            };
            (low_date, high_date, low_rate, self.spot_rate(start, months)?)
        };

        if high_date == low_date {
            return Ok(low_rate);
        }
        let w = (end - low_date).num_days() as f64 / (high_date - low_date).num_days() as f64;
        Ok(low_rate + (high_rate - low_rate) * w)
    }

    /// Interpolated spot rate for an integer tenor month (1-indexed).
    pub fn tenor_rate(&self, month: usize) -> Option<f64> {
        self.spot_rates.get(month).copied().filter(|_| month >= 1)
    }

    pub fn last_month(&self) -> usize {
        self.spot_rates.len().saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn sample_curve() -> YieldCurve {
        let rates = BTreeMap::from([(3, 0.02), (6, 0.025), (12, 0.03)]);
        YieldCurve::new("TEST", d(2020, 1, 1), &rates).unwrap()
    }

    #[test]
    fn test_empty_curve_rejected() {
        let rates = BTreeMap::new();
        assert!(YieldCurve::new("EMPTY", d(2020, 1, 1), &rates).is_err());
    }

    #[test]
    fn test_spot_rate_round_trip() {
        let curve = sample_curve();
        // Every input tenor is recovered
        assert_relative_eq!(
            curve.spot_rate(d(2020, 1, 1), 3).unwrap(),
            0.02,
            epsilon = 1e-10
        );
        assert_relative_eq!(
            curve.spot_rate(d(2020, 1, 1), 6).unwrap(),
            0.025,
            epsilon = 1e-10
        );
        assert_relative_eq!(
            curve.spot_rate(d(2020, 1, 1), 12).unwrap(),
            0.03,
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_interpolated_tenor() {
        let curve = sample_curve();
        // Month 9 is midway between the 6m and 12m tenors
        let spot9 = curve.spot_rate(d(2020, 1, 1), 9).unwrap();
        assert_relative_eq!(spot9, 0.0275, epsilon = 5e-4);
        assert_relative_eq!(curve.tenor_rate(9).unwrap(), 0.0275, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_months_rejected() {
        let curve = sample_curve();
        assert!(curve.spot_rate(d(2020, 1, 1), 0).is_err());
    }

    #[test]
    fn test_beyond_last_tenor_uses_last_forward() {
        let curve = sample_curve();
        // Far past the curve the rate settles to the terminal forward
        let far = curve.spot_rate(d(2030, 1, 1), 3).unwrap();
        let farther = curve.spot_rate(d(2035, 1, 1), 3).unwrap();
        assert_relative_eq!(far, farther, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_rate_on_month_boundary_matches_spot() {
        let curve = sample_curve();
        let zero = curve.zero_rate(d(2020, 1, 1), d(2020, 7, 1)).unwrap();
        let spot = curve.spot_rate(d(2020, 1, 1), 6).unwrap();
        assert_relative_eq!(zero, spot, epsilon = 1e-10);
    }

    #[test]
    fn test_zero_rate_mid_month_between_spots() {
        let curve = sample_curve();
        let zero = curve.zero_rate(d(2020, 1, 1), d(2020, 7, 16)).unwrap();
        let lo = curve.spot_rate(d(2020, 1, 1), 6).unwrap();
        let hi = curve.spot_rate(d(2020, 1, 1), 7).unwrap();
        assert!(zero > lo.min(hi) && zero < lo.max(hi));
    }
}
