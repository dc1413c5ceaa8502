//! CLO Engine - cash-flow projection, waterfall, and compliance core
//!
//! This library provides:
//! - Per-asset cash-flow projection under prepay/default/severity curves
//! - Collateral pool management with buy/sell and filter queries
//! - Interest and principal waterfalls gated by OC/IC coverage tests
//! - Reinvestment modeling with lagged recoveries and terminal liquidation
//! - IRR-hurdle incentive fees and per-tranche risk measures
//! - Concentration testing with a compliance objective
//! - Correlated credit-migration Monte-Carlo simulation

pub mod accounts;
pub mod analytics;
pub mod assets;
pub mod compliance;
pub mod curve;
pub mod deal;
pub mod error;
pub mod fees;
pub mod incentive;
pub mod liabilities;
pub mod loader;
pub mod matrix;
pub mod migration;
pub mod money;
pub mod persist;
pub mod pool;
pub mod rates;
pub mod ratings;
pub mod reinvest;
pub mod runner;
pub mod time;
pub mod triggers;
pub mod waterfall;

// Re-export commonly used types
pub use accounts::{Account, AccountKind, AccountSet, CashKind};
pub use assets::{Asset, CashflowAssumptions, CashflowStrip, FilterExpr};
pub use compliance::{ComplianceReport, ConcentrationLimits, TestWeights};
pub use curve::YieldCurve;
pub use deal::{DealConfig, DealEngine, DealOutput};
pub use error::{EngineError, EngineResult, RunWarning};
pub use incentive::IncentiveFee;
pub use liabilities::{Tranche, TrancheState};
pub use migration::{CreditMigration, MigrationFrequency, TransitionMatrix};
pub use persist::{PersistenceSink, RunBoundary};
pub use pool::CollateralPool;
pub use reinvest::{ReinvestmentEngine, ReinvestmentProfile};
pub use runner::{CancellationToken, ScenarioRunner};
pub use time::{BusinessDayConvention, Calendar, DayCount, PaymentFrequency};
