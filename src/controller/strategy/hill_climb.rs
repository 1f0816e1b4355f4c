use std::time::Duration;

use tracing::{debug, warn};

use crate::controller::decision::SplittingDecision;
use crate::controller::link_view::LinkStatusView;
use crate::controller::measurement::MeasurementSample;
use crate::controller::props::SplitConfig;
use crate::controller::state::SplittingState;
use crate::controller::strategy::SplitStrategy;
use crate::error::Result;

/// Lowest and highest value seen across the eligible links.
#[derive(Debug, Clone, Copy)]
struct Extrema {
    min_index: usize,
    min: f64,
    max_index: usize,
    max: f64,
}

impl Extrema {
    /// Links without a value are skipped. Only links holding share may
    /// become the maximum.
    fn scan(
        values: &[Option<f64>],
        shares: &[u32],
        eligible: impl Fn(usize) -> bool,
        seed: impl Fn(usize) -> bool,
    ) -> Option<Self> {
        let (start, first) = (0..values.len())
            .filter(|&i| seed(i))
            .find_map(|i| values[i].map(|v| (i, v)))?;
        let mut ext = Self {
            min_index: start,
            min: first,
            max_index: start,
            max: first,
        };
        for (i, value) in values.iter().enumerate() {
            if !eligible(i) {
                continue;
            }
            let Some(v) = *value else { continue };
            if ext.min > v {
                ext.min_index = i;
                ext.min = v;
            }
            if ext.max < v && shares[i] != 0 {
                ext.max_index = i;
                ext.max = v;
            }
        }
        Some(ext)
    }

    fn spread(&self) -> f64 {
        self.max - self.min
    }
}

/// Delay-driven hill climb: every cycle move a step from the slowest active
/// link to the fastest up link.
#[derive(Debug, Clone)]
pub(crate) struct HillClimb {
    delay_threshold_ms: f64,
    adaptive_step: bool,
    stability_guard: bool,
    loss_tie_break: bool,
    step_threshold: u32,
    loss_bound_factor: f64,
    /// Climb on the long-term minimum one-way delay instead of the average.
    use_min_owd: bool,
}

impl HillClimb {
    pub(crate) fn from_config(config: &SplitConfig) -> Self {
        Self {
            delay_threshold_ms: config.delay_threshold_ms,
            adaptive_step: config.adaptive_step,
            stability_guard: config.stability_guard,
            loss_tie_break: config.loss_tie_break,
            step_threshold: config.step_threshold,
            loss_bound_factor: config.loss_bound_factor,
            use_min_owd: false,
        }
    }

    /// Single-link steering for the proportional mode: follow the lowest
    /// minimum one-way delay, ignore loss.
    pub(crate) fn min_owd_steer(config: &SplitConfig) -> Self {
        Self {
            loss_tie_break: false,
            use_min_owd: true,
            ..Self::from_config(config)
        }
    }

    fn delays<'a>(&self, sample: &'a MeasurementSample) -> &'a [Option<f64>] {
        if self.use_min_owd {
            &sample.min_owd_long_term_ms
        } else {
            &sample.delay_ms
        }
    }

    /// First-use setup of the climb's own memory.
    pub(crate) fn prime(&self, state: &mut SplittingState, sample: &MeasurementSample) {
        let n = sample.links();
        if state.last_delay.len() != n {
            state.last_delay = self.delays(sample).to_vec();
        }
        if state.decrease_counters.len() != n {
            state.decrease_counters = vec![1; n];
        }
    }

    pub(crate) fn climb(
        &self,
        state: &mut SplittingState,
        view: &dyn LinkStatusView,
        sample: &MeasurementSample,
    ) -> SplittingDecision {
        state.ensure_initialized(&sample.link_ids, view);
        self.prime(state, sample);

        let delays = self.delays(sample);
        let up = |i: usize| view.is_link_up(sample.link_ids[i]);
        let shares = state.shares.clone();

        let Some(delay) = Extrema::scan(delays, &shares, up, |i| shares[i] > 0) else {
            debug!("no delay measured on any active link, keeping split");
            return SplittingDecision::unchanged(state.shares.clone());
        };

        let mut update = false;
        if delay.spread() > self.delay_threshold_ms {
            update = self.shift_from_slowest(state, delays, &delay);
        } else {
            state.decrease_counters.iter_mut().for_each(|c| *c = 1);
        }

        if !update && delay.spread() <= self.delay_threshold_ms && self.loss_tie_break {
            update = self.break_tie_on_loss(state, view, sample, &delay);
        }

        if self.stability_guard {
            state.last_delay = delays.to_vec();
        }

        state.assert_invariant();
        SplittingDecision::new(state.shares.clone(), update)
    }

    fn shift_from_slowest(
        &self,
        state: &mut SplittingState,
        delays: &[Option<f64>],
        delay: &Extrema,
    ) -> bool {
        let max = delay.max_index;
        let min = delay.min_index;

        if self.stability_guard {
            if let Some(last) = state.last_delay.get(max).copied().flatten() {
                if last > delay.max {
                    debug!(
                        link = max,
                        last,
                        current = delay.max,
                        "delay already falling, holding split"
                    );
                    return false;
                }
            }
        }

        let available = state.shares[max];
        if available == 0 {
            return false;
        }

        let step = if self.adaptive_step {
            for (i, counter) in state.decrease_counters.iter_mut().enumerate() {
                if i == max {
                    *counter += 1;
                } else {
                    *counter = 1;
                }
            }
            state.decrease_counters[max]
                .saturating_sub(self.step_threshold)
                .max(1)
                .min(available)
        } else {
            1
        };

        state.shares[max] -= step;
        state.shares[min] += step;
        debug!(
            from = max,
            to = min,
            step,
            spread_ms = delay.spread(),
            current = ?delays[max],
            "shifting share to faster link"
        );
        true
    }

    fn break_tie_on_loss(
        &self,
        state: &mut SplittingState,
        view: &dyn LinkStatusView,
        sample: &MeasurementSample,
        delay: &Extrema,
    ) -> bool {
        let up = |i: usize| view.is_link_up(sample.link_ids[i]);
        let Some(loss) = Extrema::scan(&sample.loss_rate, &state.shares, up, up) else {
            return false;
        };

        if loss.max > loss.min * self.loss_bound_factor {
            if state.shares[loss.max_index] == 0 {
                return false;
            }
            state.shares[loss.max_index] -= 1;
            state.shares[loss.min_index] += 1;
            debug!(
                from = loss.max_index,
                to = loss.min_index,
                max_loss = loss.max,
                min_loss = loss.min,
                "delays tied, shifting share away from lossy link"
            );
            return true;
        }

        // Steering: with delays tied, go back to the default link.
        if state.burst == 1 && delay.min_index != delay.max_index {
            let default_link = view.default_link();
            if !view.is_link_up(default_link) {
                return false;
            }
            let Some(index) = sample.position(default_link) else {
                warn!(link = default_link, "default link missing from measurement");
                return false;
            };
            if state.shares[index] != state.burst {
                state.steer_all_to(index);
                debug!(link = default_link, "steering back to default link");
                return true;
            }
        }
        false
    }
}

impl SplitStrategy for HillClimb {
    fn name(&self) -> &'static str {
        if self.use_min_owd {
            "min-owd-steer"
        } else {
            "hill-climb"
        }
    }

    fn decide(
        &mut self,
        state: &mut SplittingState,
        view: &mut dyn LinkStatusView,
        sample: &MeasurementSample,
        _now: Duration,
    ) -> Result<SplittingDecision> {
        Ok(self.climb(state, view, sample))
    }
}
