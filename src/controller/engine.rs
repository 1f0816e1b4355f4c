//! Policy engine: owns the splitting state of one flow direction and
//! dispatches measurement cycles to the configured algorithm.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::controller::decision::{ExternalAction, SplittingDecision};
use crate::controller::link_view::{LinkId, LinkStatusView};
use crate::controller::measurement::MeasurementSample;
use crate::controller::props::{Mode, SplitConfig, SUPPORTED_BURSTS};
use crate::controller::state::SplittingState;
use crate::controller::strategy::{self, SplitStrategy};
use crate::error::{Result, SplitError};

/// Receiver-side splitting controller for one direction of traffic.
///
/// The engine never owns link identity or status; every call takes the
/// shared [`LinkStatusView`]. Share vectors follow the order of
/// [`LinkStatusView::ordered_link_ids`], which measurement samples must use
/// as well.
pub struct PolicyEngine {
    config: SplitConfig,
    state: SplittingState,
    strategy: Box<dyn SplitStrategy>,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("mode", &self.config.mode)
            .field("strategy", &self.strategy.name())
            .field("state", &self.state)
            .finish()
    }
}

impl PolicyEngine {
    pub fn new(config: SplitConfig) -> Result<Self> {
        config.validate()?;
        let state = SplittingState::new(config.granularity.initial_burst());
        let strategy = strategy::build(&config);
        info!(
            mode = %config.mode,
            granularity = u32::from(config.granularity),
            strategy = strategy.name(),
            "splitting controller created"
        );
        Ok(Self {
            config,
            state,
            strategy,
        })
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn state(&self) -> &SplittingState {
        &self.state
    }

    /// Current burst size (sum of all shares).
    pub fn burst(&self) -> u32 {
        self.state.burst
    }

    pub fn qos_steer_enabled(&self) -> bool {
        self.config.mode == Mode::QosSteer
    }

    /// Packets a measurement interval should cover before it is evaluated.
    pub fn measurement_burst_requirement(&self) -> u32 {
        self.config.measurement_burst_scaler * self.state.burst
    }

    /// Run one measurement cycle.
    pub fn decide(
        &mut self,
        view: &mut dyn LinkStatusView,
        sample: &MeasurementSample,
        now: Duration,
    ) -> Result<SplittingDecision> {
        sample.validate()?;
        if self.state.is_initialized() && self.state.shares.len() != sample.links() {
            return Err(SplitError::MeasurementShape {
                field: "link-ids",
                expected: self.state.shares.len(),
                actual: sample.links(),
            });
        }

        let decision = self.strategy.decide(&mut self.state, view, sample, now)?;
        if decision.update {
            debug!(
                strategy = self.strategy.name(),
                shares = ?decision.shares,
                "splitting decision updated"
            );
        }
        Ok(decision)
    }

    /// Redistribute the share of a failed link.
    ///
    /// Before the first decision the answer is the default split, flagged as
    /// an update only when the failed link is not the default.
    pub fn on_link_down(
        &mut self,
        view: &mut dyn LinkStatusView,
        link: LinkId,
    ) -> Result<SplittingDecision> {
        let ids = view.ordered_link_ids();
        if !self.state.is_initialized() {
            let shares = SplittingState::default_shares(&ids, view.default_link(), self.state.burst);
            let update = self.config.mode != Mode::FixedDefault && link != view.default_link();
            return Ok(SplittingDecision::new(shares, update));
        }
        if self.config.mode == Mode::FixedDefault {
            return Ok(SplittingDecision::unchanged(self.state.shares.clone()));
        }

        if self.state.shares.len() != ids.len() {
            return Err(SplitError::MeasurementShape {
                field: "link-ids",
                expected: self.state.shares.len(),
                actual: ids.len(),
            });
        }
        let index = view.index_of(link).ok_or(SplitError::UnknownLink(link))?;

        let mut moved = self.state.shares[index];
        if moved == 0 {
            return Ok(SplittingDecision::unchanged(self.state.shares.clone()));
        }
        if !ids.iter().any(|&id| view.is_link_up(id)) {
            warn!(link, "all links down, keeping split");
            return Ok(SplittingDecision::unchanged(self.state.shares.clone()));
        }

        self.state.shares[index] = 0;
        let mut i = 0;
        while moved > 0 {
            if view.is_link_up(ids[i]) {
                self.state.shares[i] += 1;
                moved -= 1;
            }
            i = (i + 1) % ids.len();
        }

        self.state.assert_invariant();
        info!(link, shares = ?self.state.shares, "link down, share redistributed");
        Ok(SplittingDecision::new(self.state.shares.clone(), true))
    }

    /// Put the whole burst on `link`.
    ///
    /// A reverse decision targets the opposite direction and leaves this
    /// engine's state untouched.
    pub fn steer_to(
        &mut self,
        view: &dyn LinkStatusView,
        link: LinkId,
        reverse: bool,
    ) -> Result<SplittingDecision> {
        let ids = view.ordered_link_ids();
        if !ids.contains(&link) {
            return Err(SplitError::UnknownLink(link));
        }
        let shares = SplittingState::default_shares(&ids, link, self.state.burst);
        if !reverse {
            self.state.shares = shares.clone();
            self.state.decrease_counters = vec![1; ids.len()];
        }
        debug!(link, reverse, "steering all traffic");
        let mut decision = SplittingDecision::new(shares, true);
        decision.reverse = reverse;
        Ok(decision)
    }

    /// Apply ratios supplied by an external agent. The share total becomes
    /// the new burst size and must be a supported one.
    pub fn apply_external_action(
        &mut self,
        view: &dyn LinkStatusView,
        action: &ExternalAction,
    ) -> Result<SplittingDecision> {
        if self.config.mode != Mode::ExternalOverride {
            return Err(SplitError::InvalidConfig(format!(
                "external actions need mode {}, controller runs {}",
                Mode::ExternalOverride,
                self.config.mode
            )));
        }
        if action.link_ids.len() != action.shares.len() {
            return Err(SplitError::MeasurementShape {
                field: "shares",
                expected: action.link_ids.len(),
                actual: action.shares.len(),
            });
        }

        let ids = view.ordered_link_ids();
        let mut shares = if self.state.is_initialized() {
            self.state.shares.clone()
        } else {
            vec![0; ids.len()]
        };
        for (&link, &share) in action.link_ids.iter().zip(&action.shares) {
            let index = view.index_of(link).ok_or(SplitError::UnknownLink(link))?;
            let slot = shares.get_mut(index).ok_or(SplitError::UnknownLink(link))?;
            *slot = share;
        }

        let total: u32 = shares.iter().sum();
        if !SUPPORTED_BURSTS.contains(&total) {
            return Err(SplitError::Unsupported(
                "external share total is not a supported burst size",
            ));
        }

        let update = shares != self.state.shares;
        if total != self.state.burst {
            info!(from = self.state.burst, to = total, "external action changed burst size");
        }
        self.state.burst = total;
        self.state.shares = shares;
        if self.state.decrease_counters.len() != ids.len() {
            self.state.decrease_counters = vec![1; ids.len()];
        }
        self.state.assert_invariant();
        Ok(SplittingDecision::new(self.state.shares.clone(), update))
    }

    /// Admission gate for a QoS probe on `link`.
    ///
    /// Probing only starts while all traffic is on the primary link, and at
    /// most one probe may be outstanding. A failed probe is retried after the
    /// view's minimum retest interval.
    pub fn request_qos_test(
        &mut self,
        view: &mut dyn LinkStatusView,
        link: LinkId,
        now: Duration,
    ) -> Result<bool> {
        self.require_qos_steer()?;

        let primary = view.default_link();
        let off_primary: u32 = view
            .ordered_link_ids()
            .iter()
            .zip(&self.state.shares)
            .filter(|(&id, _)| id != primary)
            .map(|(_, &s)| s)
            .sum();
        if off_primary > 0 {
            return Ok(false);
        }

        let qos = view.qos_mut();
        match qos.last_test_failed_at.len() {
            0 => {
                qos.last_test_failed_at.insert(link, now);
                Ok(true)
            }
            1 => {
                let retest = qos.min_retest_interval;
                match qos.last_test_failed_at.get_mut(&link) {
                    Some(started) if now >= *started + retest => {
                        *started = now;
                        Ok(true)
                    }
                    Some(_) => Ok(false),
                    None => {
                        debug!(link, "probing a different backup link");
                        qos.last_test_failed_at.clear();
                        qos.last_test_failed_at.insert(link, now);
                        Ok(true)
                    }
                }
            }
            _ => Err(SplitError::Unsupported(
                "more than one outstanding QoS probe",
            )),
        }
    }

    /// Whether `link` passed a QoS test recently enough to be trusted.
    pub fn qos_valid(&self, view: &dyn LinkStatusView, link: LinkId, now: Duration) -> Result<bool> {
        self.require_qos_steer()?;
        Ok(view
            .qos()
            .valid_until
            .get(&link)
            .is_some_and(|&until| now <= until))
    }

    pub fn qos_flow_prioritization(&self) -> Result<bool> {
        self.require_qos_steer()?;
        Ok(self.config.qos_flow_prioritization)
    }

    fn require_qos_steer(&self) -> Result<()> {
        if self.qos_steer_enabled() {
            Ok(())
        } else {
            Err(SplitError::InvalidConfig(format!(
                "QoS admission needs mode {}, controller runs {}",
                Mode::QosSteer,
                self.config.mode
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::link_view::LinkTable;
    use crate::controller::props::Granularity;

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let config = SplitConfig::new(Mode::QosSteer, Granularity::Fixed(8));
        assert!(matches!(
            PolicyEngine::new(config),
            Err(SplitError::InvalidConfig(_))
        ));
    }

    #[test]
    fn shape_mismatch_after_init_is_an_error() {
        let mut table = LinkTable::new(&[0, 1]);
        let mut engine =
            PolicyEngine::new(SplitConfig::new(Mode::HillClimbDelay, Granularity::Fixed(8)))
                .unwrap();
        let sample = MeasurementSample::new(&[0, 1]).with_delays(&[10.0, 10.0]);
        engine.decide(&mut table, &sample, Duration::ZERO).unwrap();

        table.add_link(2);
        let sample = MeasurementSample::new(&[0, 1, 2]).with_delays(&[10.0, 10.0, 10.0]);
        let err = engine.decide(&mut table, &sample, Duration::ZERO).unwrap_err();
        assert!(matches!(err, SplitError::MeasurementShape { field: "link-ids", .. }));
    }

    #[test]
    fn reverse_steer_leaves_state_alone() {
        let table = LinkTable::new(&[0, 1]);
        let mut engine =
            PolicyEngine::new(SplitConfig::new(Mode::HillClimbDelay, Granularity::Fixed(8)))
                .unwrap();
        let decision = engine.steer_to(&table, 1, true).unwrap();
        assert_eq!(decision.shares, vec![0, 8]);
        assert!(decision.reverse);
        assert!(!engine.state().is_initialized());

        let decision = engine.steer_to(&table, 1, false).unwrap();
        assert!(!decision.reverse);
        assert_eq!(engine.state().shares, vec![0, 8]);
    }

    #[test]
    fn measurement_requirement_scales_with_burst() {
        let engine = PolicyEngine::new(SplitConfig::new(
            Mode::CongestionAwareProportional,
            Granularity::Fixed(32),
        ))
        .unwrap();
        assert_eq!(engine.measurement_burst_requirement(), 64);
    }
}
