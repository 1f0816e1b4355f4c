//! Timed QoS measurement windows.
//!
//! A *test* window measures a backup link before traffic is moved onto it; a
//! *monitoring* window keeps measuring while traffic runs there. Closing a
//! window yields a [`MeasurementSample`] for the QoS-steer algorithm. Time is
//! the caller's clock, passed into every call.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::controller::decision::SplittingDecision;
use crate::controller::engine::PolicyEngine;
use crate::controller::link_view::{LinkId, LinkStatusView};
use crate::controller::measurement::MeasurementSample;
use crate::error::{Result, SplitError};

/// Weight applied to the previous window's packet count when estimating the
/// current one for early violation checks.
pub const DEFAULT_PACKET_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Test,
    Monitoring,
}

#[derive(Debug, Clone, Default)]
struct WindowStats {
    owd_sum_ms: f64,
    owd_packets: u64,
    high_owd_packets: u64,
    missing: u64,
    abnormal: u64,
    in_order: u64,
}

impl WindowStats {
    fn loss_rate(&self) -> f64 {
        if self.missing > self.abnormal {
            (self.missing - self.abnormal) as f64 / (self.missing + self.in_order) as f64
        } else {
            0.0
        }
    }

    fn average_owd(&self) -> f64 {
        self.owd_sum_ms / self.owd_packets as f64
    }
}

#[derive(Debug, Clone)]
struct Window {
    kind: WindowKind,
    deadline: Duration,
    stats: WindowStats,
}

/// A window that closed, with the sample to feed into the engine.
#[derive(Debug, Clone)]
pub struct ClosedWindow {
    pub link: LinkId,
    pub kind: WindowKind,
    pub sample: MeasurementSample,
}

#[derive(Debug, Clone)]
pub struct QosWindows {
    link_ids: Vec<LinkId>,
    high_delay_threshold_ms: f64,
    delay_violation_target: f64,
    loss_target: f64,
    packet_weight: f64,
    /// Duration of the last test window; monitoring windows reuse it.
    saved_duration: Option<Duration>,
    running: BTreeMap<LinkId, Window>,
    /// Packet count of the last measured window per link. Present only after
    /// a window that saw traffic, which is what enables early detection.
    last_packets: BTreeMap<LinkId, u64>,
}

impl QosWindows {
    /// Windows for the links in `link_ids` (measurement order). Packets whose
    /// one-way delay exceeds `high_delay_threshold_ms` count as violations.
    pub fn new(
        link_ids: &[LinkId],
        high_delay_threshold_ms: f64,
        delay_violation_target: f64,
        loss_target: f64,
    ) -> Self {
        Self {
            link_ids: link_ids.to_vec(),
            high_delay_threshold_ms,
            delay_violation_target,
            loss_target,
            packet_weight: DEFAULT_PACKET_WEIGHT,
            saved_duration: None,
            running: BTreeMap::new(),
            last_packets: BTreeMap::new(),
        }
    }

    pub fn with_packet_weight(mut self, weight: f64) -> Self {
        self.packet_weight = weight;
        self
    }

    pub fn is_running(&self, link: LinkId) -> bool {
        self.running.contains_key(&link)
    }

    pub fn saved_duration(&self) -> Option<Duration> {
        self.saved_duration
    }

    /// Start a window on `link`.
    ///
    /// `Some(duration)` starts a test window and remembers the duration;
    /// `None` starts a monitoring window of the remembered duration. Returns
    /// false if a window is already running on the link.
    pub fn start(&mut self, link: LinkId, duration: Option<Duration>, now: Duration) -> Result<bool> {
        if !self.link_ids.contains(&link) {
            return Err(SplitError::UnknownLink(link));
        }
        if self.is_running(link) {
            debug!(link, "QoS window already running");
            return Ok(false);
        }

        let kind = match duration {
            Some(d) if d.is_zero() => {
                return Err(SplitError::InvalidConfig(
                    "QoS test window needs a non-zero duration".to_string(),
                ))
            }
            Some(d) => {
                self.saved_duration = Some(d);
                // A fresh test has no previous count to compare against.
                self.last_packets.remove(&link);
                WindowKind::Test
            }
            None => WindowKind::Monitoring,
        };
        let length = self.saved_duration.ok_or_else(|| {
            SplitError::InvalidConfig("QoS monitoring started before any test window".to_string())
        })?;

        self.running.insert(
            link,
            Window {
                kind,
                deadline: now + length,
                stats: WindowStats::default(),
            },
        );
        debug!(link, ?kind, length_ms = length.as_millis() as u64, "QoS window started");
        Ok(true)
    }

    /// Stop the window on `link`, if any.
    pub fn cancel(&mut self, link: LinkId) {
        if self.running.remove(&link).is_some() {
            debug!(link, "QoS window cancelled");
        }
    }

    /// Account one received data packet.
    pub fn record_packet(&mut self, link: LinkId, owd_ms: f64) {
        if let Some(window) = self.running.get_mut(&link) {
            window.stats.owd_sum_ms += owd_ms;
            window.stats.owd_packets += 1;
            if owd_ms > self.high_delay_threshold_ms {
                window.stats.high_owd_packets += 1;
            }
        }
    }

    /// Account sequence-number bookkeeping: `missing` gaps, `abnormal`
    /// (late or reordered) arrivals that filled a gap, and `in_order` arrivals.
    pub fn record_sequence(&mut self, link: LinkId, missing: u64, abnormal: u64, in_order: u64) {
        if let Some(window) = self.running.get_mut(&link) {
            window.stats.missing += missing;
            window.stats.abnormal += abnormal;
            window.stats.in_order += in_order;
        }
    }

    /// Close every window whose deadline has passed.
    pub fn poll(&mut self, now: Duration) -> Vec<ClosedWindow> {
        let expired: Vec<LinkId> = self
            .running
            .iter()
            .filter(|(_, w)| now >= w.deadline)
            .map(|(&link, _)| link)
            .collect();

        let mut closed = Vec::with_capacity(expired.len());
        for link in expired {
            let Some(window) = self.running.remove(&link) else {
                continue;
            };
            let mut sample = self.empty_sample();
            let stats = &window.stats;
            if stats.owd_packets > 0 {
                let ratio = stats.high_owd_packets as f64 / stats.owd_packets as f64;
                self.fill(&mut sample, link, stats, ratio);
                self.last_packets.insert(link, stats.owd_packets);
            } else {
                debug!(link, "QoS window saw no traffic");
                self.last_packets.remove(&link);
            }
            closed.push(ClosedWindow {
                link,
                kind: window.kind,
                sample,
            });
        }
        closed
    }

    /// Close monitoring windows that already violate the QoS targets.
    ///
    /// The current count is compared against the weighted count of the
    /// previous window so that a short partial window does not look better
    /// than it is.
    pub fn early_violation(&mut self, now: Duration) -> Vec<ClosedWindow> {
        let mut violating = Vec::new();
        for (&link, window) in &self.running {
            if window.kind != WindowKind::Monitoring || now >= window.deadline {
                continue;
            }
            let Some(&previous) = self.last_packets.get(&link) else {
                continue;
            };
            let stats = &window.stats;
            if stats.owd_packets == 0 {
                continue;
            }
            let estimate = (self.packet_weight * previous as f64).max(stats.owd_packets as f64);
            let ratio = stats.high_owd_packets as f64 / estimate;
            let loss = stats.loss_rate();
            if ratio > self.delay_violation_target || loss > self.loss_target {
                info!(
                    link,
                    high_delay_ratio = ratio,
                    loss,
                    estimated_packets = estimate,
                    "early QoS violation"
                );
                violating.push((link, ratio));
            }
        }

        let mut closed = Vec::with_capacity(violating.len());
        for (link, ratio) in violating {
            let Some(window) = self.running.remove(&link) else {
                continue;
            };
            let mut sample = self.empty_sample();
            self.fill(&mut sample, link, &window.stats, ratio);
            self.last_packets.remove(&link);
            closed.push(ClosedWindow {
                link,
                kind: window.kind,
                sample,
            });
        }
        closed
    }

    fn empty_sample(&self) -> MeasurementSample {
        let seconds = self.saved_duration.unwrap_or_default().as_secs_f64();
        MeasurementSample::new(&self.link_ids).with_interval(seconds, seconds)
    }

    fn fill(&self, sample: &mut MeasurementSample, link: LinkId, stats: &WindowStats, ratio: f64) {
        if let Some(i) = sample.position(link) {
            sample.delay_ms[i] = Some(stats.average_owd());
            sample.delay_this_interval[i] = true;
            sample.high_delay_ratio[i] = Some(ratio);
            sample.loss_rate[i] = Some(stats.loss_rate());
            sample.packet_count[i] = stats.owd_packets;
        }
    }
}

/// QoS windows wired to a QoS-steer engine.
#[derive(Debug)]
pub struct QosSession {
    engine: PolicyEngine,
    windows: QosWindows,
}

impl QosSession {
    pub fn new(engine: PolicyEngine, windows: QosWindows) -> Result<Self> {
        if !engine.qos_steer_enabled() {
            return Err(SplitError::InvalidConfig(format!(
                "QoS session needs a qos-steer controller, got {}",
                engine.mode()
            )));
        }
        Ok(Self { engine, windows })
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    pub fn windows(&self) -> &QosWindows {
        &self.windows
    }

    pub fn windows_mut(&mut self) -> &mut QosWindows {
        &mut self.windows
    }

    /// Admit and start a test window on `link`.
    pub fn begin_test(
        &mut self,
        view: &mut dyn LinkStatusView,
        link: LinkId,
        duration: Duration,
        now: Duration,
    ) -> Result<bool> {
        if !self.engine.request_qos_test(view, link, now)? {
            debug!(link, "QoS test not admitted");
            return Ok(false);
        }
        self.windows.start(link, Some(duration), now)
    }

    /// Start monitoring `link` once traffic runs over it.
    pub fn begin_monitoring(&mut self, link: LinkId, now: Duration) -> Result<bool> {
        self.windows.start(link, None, now)
    }

    /// Close expired windows and run the engine on each. Returns the
    /// decisions that must be sent. Monitoring windows that did not change
    /// the split are restarted.
    pub fn poll(&mut self, view: &mut dyn LinkStatusView, now: Duration) -> Result<Vec<SplittingDecision>> {
        let mut updates = Vec::new();
        for closed in self.windows.poll(now) {
            let decision = self.engine.decide(view, &closed.sample, now)?;
            if decision.update {
                updates.push(decision);
            } else if closed.kind == WindowKind::Monitoring {
                self.windows.start(closed.link, None, now)?;
            }
        }
        Ok(updates)
    }

    /// Run the engine on monitoring windows closed early by a violation.
    pub fn check_early_violation(
        &mut self,
        view: &mut dyn LinkStatusView,
        now: Duration,
    ) -> Result<Vec<SplittingDecision>> {
        let mut updates = Vec::new();
        for closed in self.windows.early_violation(now) {
            let decision = self.engine.decide(view, &closed.sample, now)?;
            if decision.update {
                updates.push(decision);
            } else {
                warn!(link = closed.link, "early violation did not move traffic");
            }
        }
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_discounts_late_arrivals() {
        let stats = WindowStats {
            missing: 10,
            abnormal: 4,
            in_order: 90,
            ..WindowStats::default()
        };
        assert!((stats.loss_rate() - 0.06).abs() < 1e-12);

        let stats = WindowStats {
            missing: 3,
            abnormal: 5,
            in_order: 90,
            ..WindowStats::default()
        };
        assert_eq!(stats.loss_rate(), 0.0);
    }

    #[test]
    fn monitoring_needs_a_previous_test() {
        let mut windows = QosWindows::new(&[0, 1], 50.0, 0.01, 1.0);
        assert!(matches!(
            windows.start(1, None, Duration::ZERO),
            Err(SplitError::InvalidConfig(_))
        ));
        assert!(windows
            .start(1, Some(Duration::from_millis(500)), Duration::ZERO)
            .unwrap());
        assert!(!windows.start(1, None, Duration::ZERO).unwrap());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut windows = QosWindows::new(&[0, 1], 50.0, 0.01, 1.0);
        windows.cancel(1);
        windows
            .start(1, Some(Duration::from_secs(1)), Duration::ZERO)
            .unwrap();
        windows.cancel(1);
        windows.cancel(1);
        assert!(!windows.is_running(1));
        assert!(windows.poll(Duration::from_secs(2)).is_empty());
    }
}
