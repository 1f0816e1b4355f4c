//! Splitting algorithms. One implementation per mode, chosen once when the
//! engine is built.

use std::time::Duration;

use crate::controller::decision::SplittingDecision;
use crate::controller::link_view::LinkStatusView;
use crate::controller::measurement::MeasurementSample;
use crate::controller::props::{Mode, SplitConfig};
use crate::controller::state::SplittingState;
use crate::error::Result;

pub(crate) mod congestion_fallback;
pub(crate) mod hill_climb;
pub(crate) mod passive;
pub(crate) mod proportional;
pub(crate) mod qos_steer;

pub(crate) trait SplitStrategy: Send {
    fn name(&self) -> &'static str;

    /// Run one measurement cycle against `state`.
    fn decide(
        &mut self,
        state: &mut SplittingState,
        view: &mut dyn LinkStatusView,
        sample: &MeasurementSample,
        now: Duration,
    ) -> Result<SplittingDecision>;
}

/// Pick the algorithm for a validated configuration.
pub(crate) fn build(config: &SplitConfig) -> Box<dyn SplitStrategy> {
    match config.mode {
        Mode::HillClimbDelay => Box::new(hill_climb::HillClimb::from_config(config)),
        Mode::CongestionFallback => {
            Box::new(congestion_fallback::CongestionFallback::from_config(config))
        }
        Mode::CongestionAwareProportional if config.granularity.is_steer() => {
            Box::new(hill_climb::HillClimb::min_owd_steer(config))
        }
        Mode::CongestionAwareProportional => {
            Box::new(proportional::Proportional::from_config(config))
        }
        Mode::QosSteer => Box::new(qos_steer::QosSteer::from_config(config)),
        Mode::FixedDefault | Mode::ExternalOverride => Box::new(passive::Passive),
    }
}
