//! Testing utilities and convenience functions for the splitting controller
//!
//! Fixtures for link tables, engines and measurement samples so behavioural
//! tests read as scenarios rather than setup code.

use std::time::Duration;

use crate::controller::{
    Granularity, LinkId, LinkStatusView, LinkTable, MeasurementSample, Mode, PolicyEngine,
    SplitConfig, SplittingDecision,
};

/// Install a test log subscriber (RUST_LOG aware). Safe to call from every
/// test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Link table with every link up; the first id is the default link.
pub fn create_link_table(ids: &[LinkId]) -> LinkTable {
    LinkTable::new(ids)
}

pub fn create_engine(mode: Mode, granularity: u32) -> PolicyEngine {
    let granularity = Granularity::try_from(granularity).expect("Unsupported test granularity");
    create_engine_with(SplitConfig::new(mode, granularity))
}

pub fn create_engine_with(config: SplitConfig) -> PolicyEngine {
    PolicyEngine::new(config).expect("Failed to create policy engine")
}

/// Sample with average delays and loss rates for every link.
pub fn delay_sample(ids: &[LinkId], delays: &[f64], losses: &[f64]) -> MeasurementSample {
    MeasurementSample::new(ids)
        .with_delays(delays)
        .with_losses(losses)
}

/// Sample with packet and delay-violation counts over a one second interval.
pub fn traffic_sample(ids: &[LinkId], packets: &[u64], violations: &[u64]) -> MeasurementSample {
    MeasurementSample::new(ids)
        .with_packets(packets)
        .with_violations(violations)
}

/// Sample carrying QoS results for each link.
pub fn qos_sample(ids: &[LinkId], high_delay: &[Option<f64>], loss: &[Option<f64>]) -> MeasurementSample {
    let mut sample = MeasurementSample::new(ids);
    sample.high_delay_ratio = high_delay.to_vec();
    sample.loss_rate = loss.to_vec();
    sample
}

/// Simulation time.
pub fn at_ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Feed the same sample `cycles` times, one second apart.
pub fn run_cycles(
    engine: &mut PolicyEngine,
    view: &mut dyn LinkStatusView,
    sample: &MeasurementSample,
    cycles: usize,
) -> Vec<SplittingDecision> {
    (0..cycles)
        .map(|i| {
            engine
                .decide(view, sample, Duration::from_secs(i as u64))
                .expect("Decision failed")
        })
        .collect()
}

/// Shares must sum to `burst` and fit the link count.
pub fn assert_valid_decision(decision: &SplittingDecision, links: usize, burst: u32) {
    assert_eq!(decision.shares.len(), links, "one share per link");
    assert_eq!(
        decision.burst(),
        burst,
        "shares {:?} must sum to {}",
        decision.shares,
        burst
    );
}
