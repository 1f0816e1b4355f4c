//! Congestion-aware proportional splitting.
//!
//! Each cycle classifies the interval into one of four cases from per-link
//! packet and delay-violation counts, computes a fractional target ratio and
//! rounds it to shares of the burst. With adaptive granularity the burst
//! itself follows the observed packet rate.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::controller::decision::SplittingDecision;
use crate::controller::link_view::LinkStatusView;
use crate::controller::measurement::MeasurementSample;
use crate::controller::props::{SplitConfig, MAX_SPLIT_BURST};
use crate::controller::rounding::ratio_to_shares;
use crate::controller::state::SplittingState;
use crate::controller::strategy::SplitStrategy;
use crate::error::{Result, SplitError};

/// Tolerance on the adaptive congestion scaler before clamping.
const SCALER_EPSILON: f64 = 1e-9;

/// Accepted deviation of a ratio vector's sum from 1.
const RATIO_SUM_TOLERANCE: f64 = 1e-3;

/// Smallest per-link bandwidth (packets/s) usable for the estimate.
const MIN_USABLE_BANDWIDTH: f64 = 1.0;

/// Burst size exponents allowed with adaptive granularity (8..=128).
const MIN_BURST_EXP: i64 = 3;
const MAX_BURST_EXP: i64 = 7;

#[derive(Debug, Clone)]
pub(crate) struct Proportional {
    adaptive_burst: bool,
    congestion_scaler: f64,
    adaptive_scaler: bool,
    scaler_min: f64,
    scaler_max: f64,
    bandwidth_estimate: bool,
    history_size: usize,
    rounding_bias: f64,
    measurement_burst_scaler: u32,
    relocation_step: u32,
    queueing_delay_target_ms: u32,
}

/// Per-interval totals over the up links.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    packets: u64,
    violations: u64,
    calm_packets: u64,
    calm_links: usize,
}

impl Proportional {
    pub(crate) fn from_config(config: &SplitConfig) -> Self {
        Self {
            adaptive_burst: config.granularity.is_adaptive(),
            congestion_scaler: config.congestion_scaler,
            adaptive_scaler: config.adaptive_congestion_scaler,
            scaler_min: config.congestion_scaler_min,
            scaler_max: config.congestion_scaler_max,
            bandwidth_estimate: config.bandwidth_estimate,
            history_size: config.history_size,
            rounding_bias: config.rounding_bias,
            measurement_burst_scaler: config.measurement_burst_scaler,
            relocation_step: config.relocation_step,
            queueing_delay_target_ms: config.queueing_delay_target_ms,
        }
    }

    fn check_counts(view: &dyn LinkStatusView, sample: &MeasurementSample) -> Result<()> {
        for (i, &id) in sample.link_ids.iter().enumerate() {
            if view.is_link_up(id) && sample.violation_count[i] > sample.packet_count[i] {
                return Err(SplitError::InvalidMeasurement(format!(
                    "link {} reports {} delay violations for {} packets",
                    id, sample.violation_count[i], sample.packet_count[i]
                )));
            }
        }
        Ok(())
    }

    /// Mark links that held share but delivered nothing as down.
    ///
    /// Only trusted at the largest burst, where every active link is
    /// guaranteed packets if the flow is running.
    fn infer_failures(
        &self,
        state: &mut SplittingState,
        view: &mut dyn LinkStatusView,
        sample: &MeasurementSample,
    ) -> bool {
        if state.burst != MAX_SPLIT_BURST {
            return false;
        }

        let ids = &sample.link_ids;
        let packets = &sample.packet_count;
        let mut failed = false;

        if state.active_links() == 1 {
            let Some(i) = state.shares.iter().position(|&s| s > 0) else {
                return false;
            };
            if view.is_link_up(ids[i]) && packets[i] == 0 && state.flow_active {
                info!(link = ids[i], "only active link stopped delivering, marking down");
                view.mark_inferred_down(ids[i]);
                state.flow_active = false;
                failed = true;
            }
            return failed;
        }

        let total: u64 = (0..ids.len())
            .filter(|&i| view.is_link_up(ids[i]))
            .map(|i| packets[i])
            .sum();
        let expected = u64::from(self.measurement_burst_scaler) * u64::from(state.burst);
        if total < expected {
            return false;
        }

        for i in 0..ids.len() {
            if view.is_link_up(ids[i]) && state.shares[i] > 0 && packets[i] == 0 {
                info!(
                    link = ids[i],
                    total_packets = total,
                    "active link received nothing, marking down"
                );
                view.mark_inferred_down(ids[i]);
                failed = true;
            }
        }
        failed
    }

    fn tally(
        &self,
        state: &mut SplittingState,
        view: &dyn LinkStatusView,
        sample: &MeasurementSample,
    ) -> Tally {
        let mut tally = Tally::default();
        for (i, &id) in sample.link_ids.iter().enumerate() {
            let packets = sample.packet_count[i];
            let violations = sample.violation_count[i];
            let mut bandwidth = 0.0;
            if view.is_link_up(id) {
                if state.shares[i] > 0 && packets > 0 {
                    state.flow_active = true;
                }
                if violations == 0 {
                    tally.calm_links += 1;
                    tally.calm_packets += packets;
                }
                tally.violations += violations;
                tally.packets += packets;
                if sample.interval_s > 0.0 {
                    bandwidth = packets as f64 / sample.interval_s;
                }
            }
            state.record_history(id, bandwidth, violations, self.history_size);
        }
        tally
    }

    /// Target ratio for this interval, or `None` to keep the current split.
    fn target_ratio(
        &self,
        state: &SplittingState,
        view: &dyn LinkStatusView,
        sample: &MeasurementSample,
        tally: &Tally,
    ) -> Option<Vec<f64>> {
        if tally.packets == 0 {
            self.idle_ratio(view, sample)
        } else if tally.violations == 0 {
            self.relocation_ratio(state, view, sample, tally)
        } else if tally.calm_links > 0 {
            Some(self.congestion_ratio(state, view, sample, tally))
        } else {
            Some(self.measured_ratio(view, sample, tally))
        }
    }

    /// No traffic: everything on the default link, or the first up link if
    /// the default is down.
    fn idle_ratio(&self, view: &dyn LinkStatusView, sample: &MeasurementSample) -> Option<Vec<f64>> {
        let default_link = view.default_link();
        let target = sample
            .position(default_link)
            .filter(|_| view.is_link_up(default_link))
            .or_else(|| sample.link_ids.iter().position(|&id| view.is_link_up(id)))?;
        let mut ratio = vec![0.0; sample.links()];
        ratio[target] = 1.0;
        Some(ratio)
    }

    /// No congestion: move a little traffic back to the default link.
    fn relocation_ratio(
        &self,
        state: &SplittingState,
        view: &dyn LinkStatusView,
        sample: &MeasurementSample,
        tally: &Tally,
    ) -> Option<Vec<f64>> {
        let default_link = view.default_link();
        let packets = &sample.packet_count;
        let mut links_with_data = 0;
        let mut donor = None;
        let mut default_index = None;

        for (i, &id) in sample.link_ids.iter().enumerate() {
            if !view.is_link_up(id) {
                continue;
            }
            if packets[i] > 0 {
                links_with_data += 1;
            }
            if id == default_link {
                default_index = Some(i);
            } else if packets[i] > 0 {
                donor = Some(i);
            }
        }

        let default_index = default_index?;
        let mut ratio = vec![0.0; sample.links()];
        if links_with_data == 1 {
            ratio[default_index] = 1.0;
            return Some(ratio);
        }

        let donor = donor?;
        let scale = f64::from(self.relocation_step) / f64::from(state.burst);
        let relocated = packets[donor].min((scale * tally.packets as f64).floor() as u64);
        if relocated == 0 {
            return None;
        }

        let total = tally.packets as f64;
        for (i, &id) in sample.link_ids.iter().enumerate() {
            if !view.is_link_up(id) {
                continue;
            }
            ratio[i] = if i == donor {
                (packets[i] - relocated) as f64 / total
            } else if i == default_index {
                (packets[i] + relocated) as f64 / total
            } else {
                packets[i] as f64 / total
            };
        }
        debug!(
            from = sample.link_ids[donor],
            to = default_link,
            packets = relocated,
            "relocating traffic toward default link"
        );
        Some(ratio)
    }

    /// Some links congested, others calm: take a scaled share of the
    /// violating traffic off the congested links.
    fn congestion_ratio(
        &self,
        state: &SplittingState,
        view: &dyn LinkStatusView,
        sample: &MeasurementSample,
        tally: &Tally,
    ) -> Vec<f64> {
        let n = sample.links();
        let mut max_bandwidth = vec![0.0; n];
        let mut calm_bandwidth = 0.0;
        let mut bandwidth_known = true;

        for (i, &id) in sample.link_ids.iter().enumerate() {
            if !view.is_link_up(id) {
                continue;
            }
            let history = state.history.get(&id);
            match (
                history.and_then(|h| h.max_bandwidth()),
                history.and_then(|h| h.max_violations()),
            ) {
                (Some(bw), Some(max_violations)) => {
                    max_bandwidth[i] = bw;
                    if sample.violation_count[i] == 0 {
                        calm_bandwidth += bw;
                    }
                    if max_violations == 0 || bw < MIN_USABLE_BANDWIDTH {
                        bandwidth_known = false;
                    }
                }
                _ => bandwidth_known = false,
            }
        }

        let violations = tally.violations as f64;
        let scaler = if self.adaptive_scaler && bandwidth_known {
            let headroom = calm_bandwidth * sample.interval_s - tally.calm_packets as f64;
            let alpha = headroom / violations;
            assert!(
                alpha >= -SCALER_EPSILON,
                "calm links cannot carry less than they delivered (scaler {})",
                alpha
            );
            alpha.clamp(self.scaler_min, self.scaler_max)
        } else {
            self.congestion_scaler
        };

        let total = tally.packets as f64;
        let use_bandwidth = self.bandwidth_estimate && bandwidth_known;
        let ratio: Vec<f64> = (0..n)
            .map(|i| {
                if !view.is_link_up(sample.link_ids[i]) {
                    return 0.0;
                }
                let packets = sample.packet_count[i] as f64;
                let link_violations = sample.violation_count[i] as f64;
                if link_violations > 0.0 {
                    (packets - link_violations * scaler) / total
                } else if use_bandwidth {
                    (tally.calm_packets as f64 + violations * scaler) * max_bandwidth[i]
                        / (calm_bandwidth * total)
                } else {
                    (packets + violations * scaler / tally.calm_links as f64) / total
                }
            })
            .collect();

        debug!(
            scaler,
            bandwidth_estimate = use_bandwidth,
            violations = tally.violations,
            "partial congestion, shifting violating traffic"
        );
        ratio
    }

    /// Every up link congested: split by delivered packets.
    fn measured_ratio(
        &self,
        view: &dyn LinkStatusView,
        sample: &MeasurementSample,
        tally: &Tally,
    ) -> Vec<f64> {
        let total = tally.packets as f64;
        sample
            .link_ids
            .iter()
            .zip(&sample.packet_count)
            .map(|(&id, &packets)| {
                if view.is_link_up(id) {
                    packets as f64 / total
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Burst size for the observed packet rate: a power of two in 8..=128.
    fn adaptive_burst_size(&self, total_packets: u64, sample: &MeasurementSample) -> u32 {
        let estimate = total_packets as f64 * sample.interval_threshold_s
            / (f64::from(self.measurement_burst_scaler) * sample.interval_s);
        let exp = (estimate.log2().floor() as i64).clamp(MIN_BURST_EXP, MAX_BURST_EXP);
        1 << exp
    }

    /// Per-link queueing delay for the sender to drain. Only reported when
    /// some, but not all, active links exceed the target.
    fn queueing_hint(&self, state: &SplittingState, sample: &MeasurementSample) -> Option<Vec<Option<u32>>> {
        let mut hint = vec![None; sample.links()];
        let mut active = 0;
        let mut high = 0;

        for i in 0..sample.links() {
            if state.shares[i] == 0 {
                continue;
            }
            active += 1;
            if !sample.delay_this_interval[i] {
                continue;
            }
            let (Some(delay), Some(min_owd)) = (sample.delay_ms[i], sample.min_owd_long_term_ms[i])
            else {
                continue;
            };
            let queueing = if delay > min_owd {
                (delay - min_owd) as u32
            } else {
                0
            };
            if queueing < self.queueing_delay_target_ms {
                hint[i] = Some(0);
            } else {
                high += 1;
                hint[i] = Some(queueing);
            }
        }

        (high > 0 && high < active).then_some(hint)
    }
}

impl SplitStrategy for Proportional {
    fn name(&self) -> &'static str {
        "congestion-aware-proportional"
    }

    fn decide(
        &mut self,
        state: &mut SplittingState,
        view: &mut dyn LinkStatusView,
        sample: &MeasurementSample,
        _now: Duration,
    ) -> Result<SplittingDecision> {
        Self::check_counts(view, sample)?;
        state.ensure_initialized(&sample.link_ids, view);
        if state.last_ratio.len() != sample.links() {
            let burst = f64::from(state.burst);
            state.last_ratio = state.shares.iter().map(|&s| f64::from(s) / burst).collect();
        }

        let mut update = self.infer_failures(state, view, sample);
        let tally = self.tally(state, view, sample);

        if let Some(ratio) = self.target_ratio(state, view, sample, &tally) {
            let sum: f64 = ratio.iter().sum();
            if sum <= 0.0 {
                warn!(?ratio, "empty target ratio, keeping split");
            } else {
                assert!(
                    (sum - 1.0).abs() <= RATIO_SUM_TOLERANCE,
                    "target ratio {:?} must sum to 1",
                    ratio
                );
                if self.adaptive_burst {
                    let burst = self.adaptive_burst_size(tally.packets, sample);
                    if burst != state.burst {
                        debug!(from = state.burst, to = burst, "adapting burst size");
                        state.burst = burst;
                    }
                }
                let shares =
                    ratio_to_shares(&ratio, &state.last_ratio, state.burst, self.rounding_bias);
                if shares != state.shares {
                    debug!(?ratio, ?shares, "new split");
                    state.shares = shares;
                    state.last_ratio = ratio;
                    update = true;
                }
            }
        }

        state.assert_invariant();
        let mut decision = SplittingDecision::new(state.shares.clone(), update);
        decision.queueing_delay = self.queueing_hint(state, sample);
        Ok(decision)
    }
}
