//! Deal configuration, the run engine, and its output bundle

mod config;
mod engine;
mod output;

pub use config::{
    calc_payment_dates, default_waterfall_steps, CloInputs, DealConfig, DealDates, PaymentDates,
    ReinvestmentPolicy, ReinvestmentType,
};
pub use engine::DealEngine;
pub use output::{DealOutput, PeriodOutput, ReinvestmentSummary, TrancheOutput};
