use serde::{Deserialize, Serialize};

use crate::controller::link_view::LinkId;
use crate::error::{Result, SplitError};

/// One measurement interval worth of per-link statistics.
///
/// Every array is indexed by position, in the order of `link_ids`. `None`
/// means the link produced no measurement this interval (idle or not probed),
/// never an extreme value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MeasurementSample {
    pub link_ids: Vec<LinkId>,
    /// Average one-way delay (ms).
    pub delay_ms: Vec<Option<f64>>,
    /// Whether the delay was measured during this interval.
    pub delay_this_interval: Vec<bool>,
    /// Long-term minimum one-way delay (ms).
    pub min_owd_long_term_ms: Vec<Option<f64>>,
    pub loss_rate: Vec<Option<f64>>,
    pub violation_count: Vec<u64>,
    pub packet_count: Vec<u64>,
    pub high_delay_ratio: Vec<Option<f64>>,
    /// Interval duration (seconds).
    pub interval_s: f64,
    /// Nominal interval threshold (seconds), used by adaptive granularity.
    pub interval_threshold_s: f64,
}

impl MeasurementSample {
    /// Empty sample for `link_ids`: no delay/loss measurement, zero packets.
    pub fn new(link_ids: &[LinkId]) -> Self {
        let n = link_ids.len();
        Self {
            link_ids: link_ids.to_vec(),
            delay_ms: vec![None; n],
            delay_this_interval: vec![false; n],
            min_owd_long_term_ms: vec![None; n],
            loss_rate: vec![None; n],
            violation_count: vec![0; n],
            packet_count: vec![0; n],
            high_delay_ratio: vec![None; n],
            interval_s: 1.0,
            interval_threshold_s: 1.0,
        }
    }

    pub fn links(&self) -> usize {
        self.link_ids.len()
    }

    pub fn with_delays(mut self, delays: &[f64]) -> Self {
        self.delay_ms = delays.iter().map(|&d| Some(d)).collect();
        self.delay_this_interval = vec![true; delays.len()];
        self
    }

    pub fn with_min_owd(mut self, owd: &[f64]) -> Self {
        self.min_owd_long_term_ms = owd.iter().map(|&d| Some(d)).collect();
        self
    }

    pub fn with_losses(mut self, losses: &[f64]) -> Self {
        self.loss_rate = losses.iter().map(|&l| Some(l)).collect();
        self
    }

    pub fn with_packets(mut self, packets: &[u64]) -> Self {
        self.packet_count = packets.to_vec();
        self
    }

    pub fn with_violations(mut self, violations: &[u64]) -> Self {
        self.violation_count = violations.to_vec();
        self
    }

    pub fn with_high_delay_ratios(mut self, ratios: &[f64]) -> Self {
        self.high_delay_ratio = ratios.iter().map(|&r| Some(r)).collect();
        self
    }

    pub fn with_interval(mut self, duration_s: f64, threshold_s: f64) -> Self {
        self.interval_s = duration_s;
        self.interval_threshold_s = threshold_s;
        self
    }

    /// Check the array shape. A mismatch is a wiring bug in the caller.
    pub fn validate(&self) -> Result<()> {
        let expected = self.links();
        if expected == 0 {
            return Err(SplitError::EmptyMeasurement);
        }
        let lengths = [
            ("delay-ms", self.delay_ms.len()),
            ("delay-this-interval", self.delay_this_interval.len()),
            ("min-owd-long-term-ms", self.min_owd_long_term_ms.len()),
            ("loss-rate", self.loss_rate.len()),
            ("violation-count", self.violation_count.len()),
            ("packet-count", self.packet_count.len()),
            ("high-delay-ratio", self.high_delay_ratio.len()),
        ];
        for (field, actual) in lengths {
            if actual != expected {
                return Err(SplitError::MeasurementShape {
                    field,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Position of `id` in this sample.
    pub fn position(&self, id: LinkId) -> Option<usize> {
        self.link_ids.iter().position(|&l| l == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_lengths_are_rejected() {
        let sample = MeasurementSample::new(&[0, 1]).with_delays(&[10.0]);
        match sample.validate() {
            Err(SplitError::MeasurementShape {
                field,
                expected,
                actual,
            }) => {
                assert_eq!(field, "delay-ms");
                assert_eq!(expected, 2);
                assert_eq!(actual, 1);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn zero_links_is_rejected() {
        let sample = MeasurementSample::new(&[]);
        assert!(matches!(sample.validate(), Err(SplitError::EmptyMeasurement)));
    }

    #[test]
    fn sample_round_trips_through_json() {
        let sample = MeasurementSample::new(&[0, 1])
            .with_delays(&[10.0, 20.0])
            .with_packets(&[100, 50]);
        let json = serde_json::to_string(&sample).unwrap();
        assert!(json.contains("\"delay-ms\":[10.0,20.0]"));
        let back: MeasurementSample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample);
    }
}
