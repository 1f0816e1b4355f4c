//! Congestion fallback algorithm tests
//!
//! Traffic stays on the default link until that link shows loss; after the
//! first split the hill climb is always in charge.

use splitcontrol::testing::*;
use splitcontrol::*;

#[test]
fn test_stays_on_default_link_without_loss() {
    init_for_tests();

    println!("=== Congestion Fallback Idle Test ===");

    let mut table = create_link_table(&[0, 1]);
    let mut engine = create_engine(Mode::CongestionFallback, 8);

    // Link 1 is much faster, but the default link is clean.
    let sample = delay_sample(&[0, 1], &[50.0, 10.0], &[0.01, 0.0]);
    for decision in run_cycles(&mut engine, &mut table, &sample, 5) {
        assert!(!decision.update);
        assert_eq!(decision.shares, vec![8, 0]);
    }
}

#[test]
fn test_missing_loss_counts_as_clean() {
    init_for_tests();

    let mut table = create_link_table(&[0, 1]);
    let mut engine = create_engine(Mode::CongestionFallback, 8);
    let sample = MeasurementSample::new(&[0, 1]).with_delays(&[50.0, 10.0]);
    let decision = engine.decide(&mut table, &sample, at_ms(0)).unwrap();
    assert!(!decision.update);
}

#[test]
fn test_loss_on_default_link_starts_splitting() {
    init_for_tests();

    println!("=== Congestion Fallback Trigger Test ===");

    let mut table = create_link_table(&[0, 1]);
    let mut engine = create_engine(Mode::CongestionFallback, 8);

    let lossy = delay_sample(&[0, 1], &[50.0, 10.0], &[0.2, 0.0]);
    let decision = engine.decide(&mut table, &lossy, at_ms(0)).unwrap();
    println!("Shares after congestion: {:?}", decision.shares);
    assert!(decision.update);
    assert_eq!(decision.shares, vec![7, 1]);

    // Loss is gone, but splitting has begun: keep climbing.
    let clean = delay_sample(&[0, 1], &[50.0, 10.0], &[0.0, 0.0]);
    let decision = engine.decide(&mut table, &clean, at_ms(1000)).unwrap();
    assert!(decision.update);
    assert_eq!(decision.shares, vec![6, 2]);
}

#[test]
fn test_custom_loss_threshold() {
    init_for_tests();

    let mut config = SplitConfig::new(Mode::CongestionFallback, Granularity::Fixed(8));
    config.congestion_loss_threshold = 0.3;
    let mut engine = create_engine_with(config);
    let mut table = create_link_table(&[0, 1]);

    let sample = delay_sample(&[0, 1], &[50.0, 10.0], &[0.2, 0.0]);
    let decision = engine.decide(&mut table, &sample, at_ms(0)).unwrap();
    assert!(!decision.update, "Loss below the configured threshold is tolerated");
}
