use std::time::Duration;

use tracing::debug;

use crate::controller::decision::SplittingDecision;
use crate::controller::link_view::LinkStatusView;
use crate::controller::measurement::MeasurementSample;
use crate::controller::props::SplitConfig;
use crate::controller::state::SplittingState;
use crate::controller::strategy::hill_climb::HillClimb;
use crate::controller::strategy::SplitStrategy;
use crate::error::Result;

/// Stay on the default link until it shows loss, then hill-climb.
#[derive(Debug, Clone)]
pub(crate) struct CongestionFallback {
    climb: HillClimb,
    loss_threshold: f64,
}

impl CongestionFallback {
    pub(crate) fn from_config(config: &SplitConfig) -> Self {
        Self {
            climb: HillClimb::from_config(config),
            loss_threshold: config.congestion_loss_threshold,
        }
    }
}

impl SplitStrategy for CongestionFallback {
    fn name(&self) -> &'static str {
        "congestion-fallback"
    }

    fn decide(
        &mut self,
        state: &mut SplittingState,
        view: &mut dyn LinkStatusView,
        sample: &MeasurementSample,
        _now: Duration,
    ) -> Result<SplittingDecision> {
        state.ensure_initialized(&sample.link_ids, view);
        self.climb.prime(state, sample);

        let default_link = view.default_link();
        if let Some(index) = sample.position(default_link) {
            if state.shares[index] == state.burst {
                // No loss measurement counts as not congested.
                let loss = sample.loss_rate[index].unwrap_or(0.0);
                if loss <= self.loss_threshold {
                    return Ok(SplittingDecision::unchanged(state.shares.clone()));
                }
                debug!(
                    link = default_link,
                    loss,
                    threshold = self.loss_threshold,
                    "default link congested, enabling splitting"
                );
            }
        }

        Ok(self.climb.climb(state, view, sample))
    }
}
