//! Obligations, their projected cash flows, and filter queries

mod asset;
mod cashflow;
mod filter;
mod generator;

pub use asset::{Amortization, Asset, AssetFlags, AssetKind, RateSpec, Seniority};
pub use cashflow::{CashflowRow, CashflowStrip};
pub use filter::{CompareOp, FieldTag, FilterError, FilterExpr};
pub use generator::{project_cashflows, CashflowAssumptions};

#[cfg(test)]
pub(crate) use asset::fixtures;
