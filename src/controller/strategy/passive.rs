use std::time::Duration;

use crate::controller::decision::SplittingDecision;
use crate::controller::link_view::LinkStatusView;
use crate::controller::measurement::MeasurementSample;
use crate::controller::state::SplittingState;
use crate::controller::strategy::SplitStrategy;
use crate::error::Result;

/// Measurements never change the split. Used when splitting is disabled or
/// ratios are driven from outside.
pub(crate) struct Passive;

impl SplitStrategy for Passive {
    fn name(&self) -> &'static str {
        "passive"
    }

    fn decide(
        &mut self,
        state: &mut SplittingState,
        view: &mut dyn LinkStatusView,
        sample: &MeasurementSample,
        _now: Duration,
    ) -> Result<SplittingDecision> {
        state.ensure_initialized(&sample.link_ids, view);
        Ok(SplittingDecision::unchanged(state.shares.clone()))
    }
}
