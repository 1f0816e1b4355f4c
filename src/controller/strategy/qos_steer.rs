use std::time::Duration;

use tracing::{debug, info};

use crate::controller::decision::SplittingDecision;
use crate::controller::link_view::{LinkId, LinkStatusView};
use crate::controller::measurement::MeasurementSample;
use crate::controller::props::SplitConfig;
use crate::controller::state::SplittingState;
use crate::controller::strategy::SplitStrategy;
use crate::error::{Result, SplitError};

/// Steer all traffic to one link: a backup link while it meets the QoS
/// targets, the primary (default) link otherwise.
#[derive(Debug, Clone)]
pub(crate) struct QosSteer {
    delay_violation_target: f64,
    loss_target: f64,
}

impl QosSteer {
    pub(crate) fn from_config(config: &SplitConfig) -> Self {
        Self {
            delay_violation_target: config.qos_delay_violation_target,
            loss_target: config.qos_loss_target,
        }
    }

    fn passes(&self, sample: &MeasurementSample, i: usize) -> bool {
        let delay_ok = sample.high_delay_ratio[i].is_some_and(|r| r < self.delay_violation_target);
        let loss_ok = sample.loss_rate[i].is_some_and(|l| l < self.loss_target);
        delay_ok && loss_ok
    }

    /// A measured but failing link gets its failure time stamped. A link
    /// without measurements is idle and may be retested immediately.
    fn record_outcome(view: &mut dyn LinkStatusView, sample: &MeasurementSample, i: usize, now: Duration) {
        let id = sample.link_ids[i];
        if sample.high_delay_ratio[i].is_some() && sample.loss_rate[i].is_some() {
            view.qos_mut().record_failure(id, now);
        } else {
            view.qos_mut().clear_failure(id);
        }
    }
}

impl SplitStrategy for QosSteer {
    fn name(&self) -> &'static str {
        "qos-steer"
    }

    fn decide(
        &mut self,
        state: &mut SplittingState,
        view: &mut dyn LinkStatusView,
        sample: &MeasurementSample,
        now: Duration,
    ) -> Result<SplittingDecision> {
        state.ensure_initialized(&sample.link_ids, view);

        let primary: LinkId = view.default_link();
        let primary_index = sample
            .position(primary)
            .ok_or(SplitError::UnknownLink(primary))?;

        // Nothing off the primary link means a backup is being tested, not
        // monitored.
        let testing = state
            .shares
            .iter()
            .enumerate()
            .all(|(i, &s)| i == primary_index || s == 0);

        let passing: Vec<usize> = (0..sample.links())
            .filter(|&i| i != primary_index)
            .filter(|&i| view.is_link_up(sample.link_ids[i]))
            .filter(|&i| self.passes(sample, i))
            .collect();

        let mut update = false;
        match passing.as_slice() {
            [] => {
                if !testing {
                    info!(link = primary, "QoS lost on backup link, steering to primary");
                    state.steer_all_to(primary_index);
                    update = true;
                }
                for i in (0..sample.links()).filter(|&i| i != primary_index) {
                    Self::record_outcome(view, sample, i, now);
                }
            }
            [index] => {
                let index = *index;
                let link = sample.link_ids[index];
                if state.shares[index] != state.burst {
                    info!(link, testing, "QoS met on backup link, steering to it");
                    state.steer_all_to(index);
                    update = true;
                } else {
                    debug!(link, "QoS still met on backup link");
                }
                view.qos_mut().record_pass(link, now);
            }
            _ => {
                return Err(SplitError::Unsupported(
                    "QoS passed on more than one backup link",
                ));
            }
        }

        state.assert_invariant();
        Ok(SplittingDecision::new(state.shares.clone(), update))
    }
}
