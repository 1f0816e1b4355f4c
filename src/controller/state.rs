use std::collections::{BTreeMap, VecDeque};

use crate::controller::link_view::{LinkId, LinkStatusView};

/// Bounded bandwidth / violation history of one link.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkHistory {
    bandwidth: VecDeque<f64>,
    violations: VecDeque<u64>,
}

impl LinkHistory {
    pub fn push(&mut self, bandwidth: f64, violations: u64, limit: usize) {
        self.bandwidth.push_back(bandwidth);
        self.violations.push_back(violations);
        while self.bandwidth.len() > limit {
            self.bandwidth.pop_front();
            self.violations.pop_front();
        }
    }

    pub fn max_bandwidth(&self) -> Option<f64> {
        self.bandwidth.iter().copied().reduce(f64::max)
    }

    pub fn max_violations(&self) -> Option<u64> {
        self.violations.iter().copied().max()
    }

    pub fn len(&self) -> usize {
        self.bandwidth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bandwidth.is_empty()
    }
}

/// Persistent per-controller memory.
///
/// `shares` is empty until the first decision; afterwards it always sums to
/// `burst`.
#[derive(Debug, Clone, Default)]
pub struct SplittingState {
    pub shares: Vec<u32>,
    pub burst: u32,
    /// Hill-climb step acceleration, one counter per link (starts at 1).
    pub decrease_counters: Vec<u32>,
    /// Delay seen in the previous cycle, for the stability guard.
    pub last_delay: Vec<Option<f64>>,
    /// Fractional ratio applied last by the proportional algorithm.
    pub last_ratio: Vec<f64>,
    pub history: BTreeMap<LinkId, LinkHistory>,
    /// Latched once any active link carried traffic; guards single-link
    /// failure inference against idle flows.
    pub flow_active: bool,
}

impl SplittingState {
    pub fn new(burst: u32) -> Self {
        Self {
            burst,
            ..Self::default()
        }
    }

    pub fn is_initialized(&self) -> bool {
        !self.shares.is_empty()
    }

    /// Full burst on the default link, in the order of `link_ids`.
    pub fn default_shares(link_ids: &[LinkId], default_link: LinkId, burst: u32) -> Vec<u32> {
        link_ids
            .iter()
            .map(|&id| if id == default_link { burst } else { 0 })
            .collect()
    }

    /// Lazily create the share vector with everything on the default link.
    pub fn ensure_initialized<V: LinkStatusView + ?Sized>(
        &mut self,
        link_ids: &[LinkId],
        view: &V,
    ) {
        if self.is_initialized() {
            return;
        }
        self.shares = Self::default_shares(link_ids, view.default_link(), self.burst);
        self.decrease_counters = vec![1; link_ids.len()];
    }

    /// Number of links currently holding share.
    pub fn active_links(&self) -> usize {
        self.shares.iter().filter(|&&s| s > 0).count()
    }

    pub fn share_sum(&self) -> u32 {
        self.shares.iter().sum()
    }

    /// Fatal check run at the end of every algorithm.
    pub fn assert_invariant(&self) {
        assert_eq!(
            self.share_sum(),
            self.burst,
            "share vector {:?} must sum to the burst size {}",
            self.shares,
            self.burst
        );
    }

    /// Move everything onto the link at `index`.
    pub fn steer_all_to(&mut self, index: usize) {
        for (i, share) in self.shares.iter_mut().enumerate() {
            *share = if i == index { self.burst } else { 0 };
        }
    }

    pub fn record_history(&mut self, link: LinkId, bandwidth: f64, violations: u64, limit: usize) {
        self.history
            .entry(link)
            .or_default()
            .push(bandwidth, violations, limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::link_view::LinkTable;

    #[test]
    fn history_keeps_only_the_newest_samples() {
        let mut history = LinkHistory::default();
        for i in 0..15 {
            history.push(i as f64, i, 10);
        }
        assert_eq!(history.len(), 10);
        assert_eq!(history.max_bandwidth(), Some(14.0));
        assert_eq!(history.max_violations(), Some(14));

        history.push(0.0, 0, 3);
        assert_eq!(history.len(), 3);
        assert_eq!(history.max_bandwidth(), Some(14.0));
    }

    #[test]
    fn lazy_init_puts_everything_on_the_default_link() {
        let mut table = LinkTable::new(&[4, 5, 6]);
        table.set_default_link(5);
        let mut state = SplittingState::new(16);
        state.ensure_initialized(&[4, 5, 6], &table);
        assert_eq!(state.shares, vec![0, 16, 0]);
        assert_eq!(state.decrease_counters, vec![1, 1, 1]);
        state.assert_invariant();
    }
}
