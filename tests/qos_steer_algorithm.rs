//! QoS steering algorithm tests
//!
//! Binary primary/backup steering with the admission gate and validity
//! windows kept in the link table.

use std::time::Duration;

use splitcontrol::testing::*;
use splitcontrol::*;

fn qos_engine() -> PolicyEngine {
    create_engine(Mode::QosSteer, 1)
}

fn backup_result(high_delay: Option<f64>, loss: Option<f64>) -> MeasurementSample {
    qos_sample(&[0, 1], &[None, high_delay], &[None, loss])
}

#[test]
fn test_scenario_e_passing_backup_takes_all_traffic() {
    init_for_tests();

    println!("=== QoS Steer Scenario E Test ===");

    let mut table = create_link_table(&[0, 1]);
    let mut engine = qos_engine();

    assert!(engine.request_qos_test(&mut table, 1, at_ms(1000)).unwrap());
    assert!(table.qos().last_test_failed_at.contains_key(&1));

    let decision = engine
        .decide(&mut table, &backup_result(Some(0.0), Some(0.0)), at_ms(2000))
        .unwrap();
    assert!(decision.update);
    assert_eq!(decision.shares, vec![0, 1]);

    let qos = table.qos();
    assert!(!qos.last_test_failed_at.contains_key(&1), "Failure stamp cleared");
    assert_eq!(
        qos.valid_until.get(&1),
        Some(&(at_ms(2000) + qos.max_valid_duration))
    );
    assert!(engine.qos_valid(&table, 1, at_ms(32_000)).unwrap());
    assert!(!engine.qos_valid(&table, 1, at_ms(32_001)).unwrap());
}

#[test]
fn test_failed_probe_waits_for_retest_interval() {
    init_for_tests();

    println!("=== QoS Steer Retest Interval Test ===");

    let mut table = create_link_table(&[0, 1]);
    let mut engine = qos_engine();

    assert!(engine.request_qos_test(&mut table, 1, at_ms(0)).unwrap());
    let decision = engine
        .decide(&mut table, &backup_result(Some(0.5), Some(0.0)), at_ms(500))
        .unwrap();
    assert!(!decision.update, "Failed test keeps traffic on primary");
    assert_eq!(decision.shares, vec![1, 0]);
    assert_eq!(table.qos().last_test_failed_at.get(&1), Some(&at_ms(500)));

    assert!(!engine.request_qos_test(&mut table, 1, at_ms(5_000)).unwrap());
    assert!(engine.request_qos_test(&mut table, 1, at_ms(10_500)).unwrap());
}

#[test]
fn test_idle_probe_can_retest_immediately() {
    init_for_tests();

    let mut table = create_link_table(&[0, 1]);
    let mut engine = qos_engine();

    assert!(engine.request_qos_test(&mut table, 1, at_ms(0)).unwrap());
    engine
        .decide(&mut table, &backup_result(None, None), at_ms(500))
        .unwrap();
    assert!(table.qos().last_test_failed_at.is_empty());
    assert!(engine.request_qos_test(&mut table, 1, at_ms(600)).unwrap());
}

#[test]
fn test_violation_while_on_backup_returns_to_primary() {
    init_for_tests();

    println!("=== QoS Steer Monitoring Fallback Test ===");

    let mut table = create_link_table(&[0, 1]);
    let mut engine = qos_engine();

    engine.request_qos_test(&mut table, 1, at_ms(0)).unwrap();
    engine
        .decide(&mut table, &backup_result(Some(0.0), Some(0.0)), at_ms(500))
        .unwrap();

    // No probing while traffic is off the primary link.
    assert!(!engine.request_qos_test(&mut table, 1, at_ms(600)).unwrap());

    let still_good = engine
        .decide(&mut table, &backup_result(Some(0.001), Some(0.0)), at_ms(1000))
        .unwrap();
    assert!(!still_good.update);
    assert_eq!(still_good.shares, vec![0, 1]);

    let bad = engine
        .decide(&mut table, &backup_result(Some(0.2), Some(0.0)), at_ms(1500))
        .unwrap();
    assert!(bad.update);
    assert_eq!(bad.shares, vec![1, 0]);
    assert!(!engine.qos_valid(&table, 1, at_ms(1500)).unwrap());
}

#[test]
fn test_probe_on_other_backup_replaces_outstanding_one() {
    init_for_tests();

    let mut table = create_link_table(&[0, 1, 2]);
    let mut engine = qos_engine();

    assert!(engine.request_qos_test(&mut table, 1, at_ms(0)).unwrap());
    assert!(engine.request_qos_test(&mut table, 2, at_ms(100)).unwrap());
    let outstanding: Vec<LinkId> = table.qos().last_test_failed_at.keys().copied().collect();
    assert_eq!(outstanding, vec![2]);
}

#[test]
fn test_multiple_outstanding_probes_are_unsupported() {
    init_for_tests();

    let mut table = create_link_table(&[0, 1, 2]);
    let mut engine = qos_engine();
    table.qos_mut().record_failure(1, Duration::ZERO);
    table.qos_mut().record_failure(2, Duration::ZERO);

    let err = engine.request_qos_test(&mut table, 1, at_ms(60_000)).unwrap_err();
    assert!(matches!(err, SplitError::Unsupported(_)));
}

#[test]
fn test_multiple_passing_links_are_unsupported() {
    init_for_tests();

    let mut table = create_link_table(&[0, 1, 2]);
    let mut engine = qos_engine();
    let sample = qos_sample(
        &[0, 1, 2],
        &[None, Some(0.0), Some(0.0)],
        &[None, Some(0.0), Some(0.0)],
    );
    let err = engine.decide(&mut table, &sample, at_ms(0)).unwrap_err();
    assert!(matches!(err, SplitError::Unsupported(_)));
}

#[test]
fn test_qos_queries_require_qos_mode() {
    init_for_tests();

    let mut table = create_link_table(&[0, 1]);
    let mut engine = create_engine(Mode::HillClimbDelay, 8);
    assert!(matches!(
        engine.request_qos_test(&mut table, 1, at_ms(0)),
        Err(SplitError::InvalidConfig(_))
    ));
    assert!(matches!(
        engine.qos_valid(&table, 1, at_ms(0)),
        Err(SplitError::InvalidConfig(_))
    ));
    assert!(matches!(
        engine.qos_flow_prioritization(),
        Err(SplitError::InvalidConfig(_))
    ));

    let mut config = SplitConfig::new(Mode::QosSteer, Granularity::Fixed(1));
    config.qos_flow_prioritization = true;
    let engine = create_engine_with(config);
    assert!(engine.qos_flow_prioritization().unwrap());
}
