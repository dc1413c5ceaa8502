//! Over-collateralization and interest-coverage triggers
//!
//! A trigger snapshots its ratio once per period before the waterfall
//! runs. While breached, the waterfall diverts cash toward the protected
//! tranche until the denominator would pass the threshold; partial cures
//! carry the remaining requirement within the period.

use serde::{Deserialize, Serialize};

/// Coverage-test family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerKind {
    Oc,
    Ic,
}

/// Trigger definition from the input bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// Stable identifier, e.g. "CLASS_B_OC_TEST"
    pub id: String,
    pub kind: TriggerKind,
    /// Minimum passing ratio
    pub threshold: f64,
    /// Tranche whose coverage the test protects
    pub protected_tranche: String,
    /// Cures apply in ascending order across triggers
    pub cure_order: u32,
}

/// One period's snapshot of a trigger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerPeriod {
    pub numerator: f64,
    pub denominator: f64,
    pub ratio: f64,
    pub pass: bool,
    pub cure_paid: f64,
}

/// Live trigger state across a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerState {
    pub spec: TriggerSpec,
    breached: bool,
    remaining_cure: f64,
    pub periods: Vec<TriggerPeriod>,
}

impl TriggerState {
    pub fn new(spec: TriggerSpec, num_periods: usize) -> Self {
        Self {
            spec,
            breached: false,
            remaining_cure: 0.0,
            periods: vec![TriggerPeriod::default(); num_periods],
        }
    }

    /// Record the period's ratio and derive the cure requirement: the
    /// denominator reduction that restores `numerator / denominator` to
    /// the threshold.
    pub fn snapshot(&mut self, period: usize, numerator: f64, denominator: f64) {
        let ratio = if denominator > 0.0 {
            numerator / denominator
        } else {
            // Nothing to cover is a pass
            f64::INFINITY
        };
        self.breached = ratio < self.spec.threshold;
        self.remaining_cure = if self.breached && self.spec.threshold > 0.0 {
            (denominator - numerator / self.spec.threshold).max(0.0)
        } else {
            0.0
        };

        if let Some(row) = self.periods.get_mut(period - 1) {
            row.numerator = numerator;
            row.denominator = denominator;
            row.ratio = ratio;
            row.pass = !self.breached;
            row.cure_paid = 0.0;
        }
    }

    pub fn is_breached(&self) -> bool {
        self.breached
    }

    pub fn remaining_cure(&self) -> f64 {
        if self.breached {
            self.remaining_cure
        } else {
            0.0
        }
    }

    /// Consume available cash toward the cure; returns the amount used.
    pub fn apply_cure(&mut self, period: usize, available: f64) -> f64 {
        if !self.breached {
            return 0.0;
        }
        let used = available.max(0.0).min(self.remaining_cure);
        self.remaining_cure -= used;
        if self.remaining_cure <= 1e-9 {
            self.remaining_cure = 0.0;
            self.breached = false;
        }
        if let Some(row) = self.periods.get_mut(period - 1) {
            row.cure_paid += used;
        }
        used
    }

    pub fn ratio(&self, period: usize) -> Option<f64> {
        self.periods.get(period - 1).map(|r| r.ratio)
    }
}

/// Triggers sorted into their cure order.
pub fn in_cure_order(triggers: &mut [TriggerState]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..triggers.len()).collect();
    order.sort_by_key(|&i| triggers[i].spec.cure_order);
    order
}
