//! Optional persistence seam
//!
//! An external store can observe run state at boundaries only: after deal
//! setup, at each period end, and at run end. The engine never blocks on
//! a sink mid-period. Loading is the loader module's job; every state
//! type serializes, so a sink can store snapshots however it likes.

use crate::accounts::AccountSet;
use crate::assets::CashflowRow;
use crate::error::EngineResult;
use crate::incentive::IncentiveFee;

/// Where in the run a snapshot was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunBoundary {
    /// After deal setup, before period 1
    Setup,
    /// After the given period's roll-forward
    PeriodEnd(usize),
    /// After the final period
    RunEnd(usize),
}

/// Callbacks a store implements; defaults are no-ops so a sink overrides
/// only what it records.
pub trait PersistenceSink: Send {
    fn save_accounts(&mut self, _boundary: RunBoundary, _accounts: &AccountSet) -> EngineResult<()> {
        Ok(())
    }

    fn save_reinvestment(
        &mut self,
        _boundary: RunBoundary,
        _cashflows: &[CashflowRow],
    ) -> EngineResult<()> {
        Ok(())
    }

    fn save_incentive_state(
        &mut self,
        _boundary: RunBoundary,
        _state: &IncentiveFee,
    ) -> EngineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records every boundary it sees through a shared handle the test
    /// keeps after handing the sink to the engine.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingSink {
        pub boundaries: Arc<Mutex<Vec<RunBoundary>>>,
    }

    impl PersistenceSink for RecordingSink {
        fn save_accounts(
            &mut self,
            boundary: RunBoundary,
            _accounts: &AccountSet,
        ) -> EngineResult<()> {
            self.boundaries.lock().expect("sink lock").push(boundary);
            Ok(())
        }
    }
}
