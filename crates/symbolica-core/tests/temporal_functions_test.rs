//! Temporal functions driven through rule conditions with a fixed clock

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use symbolica_core::{Engine, Facts, FixedClock, RuleOutcome, RuleSpec, Value};

fn empty_facts() -> Facts {
    Facts::new()
}

fn engine_with_clock(specs: Vec<RuleSpec>) -> (Engine, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    ));
    let engine = Engine::compile(specs).unwrap().with_clock(clock.clone());
    (engine, clock)
}

#[test]
fn sustained_cpu_alarm_fires() {
    let (engine, clock) = engine_with_clock(vec![
        RuleSpec::new("cpu_alarm", "sustained_above('cpu', 90, 600)")
            .set("alert", true)
            .set("severity", "critical"),
    ]);

    // 20 samples of 95, spaced 30s apart, inside a 600s window
    for _ in 0..20 {
        engine.record_datapoint("cpu", 95.0);
        clock.advance(Duration::seconds(30));
    }

    let result = engine.reason(&empty_facts()).unwrap();
    assert_eq!(result.fired, vec!["cpu_alarm"]);
    assert_eq!(result.verdict.get("alert"), Some(&Value::Bool(true)));
}

#[test]
fn sustained_alarm_needs_full_window_coverage() {
    let (engine, clock) = engine_with_clock(vec![
        RuleSpec::new("cpu_alarm", "sustained_above('cpu', 90, 600)").set("alert", true)
    ]);

    // Only 120s of samples: high, but not sustained over the window
    for _ in 0..4 {
        engine.record_datapoint("cpu", 99.0);
        clock.advance(Duration::seconds(30));
    }

    let result = engine.reason(&empty_facts()).unwrap();
    assert!(result.fired.is_empty());
}

#[test]
fn recent_avg_threshold_rule() {
    let (engine, clock) = engine_with_clock(vec![
        RuleSpec::new("error_spike", "recent_avg('error_rate', 300) > 0.05")
            .set("page_oncall", true),
    ]);

    for value in [0.02, 0.09, 0.12] {
        engine.record_datapoint("error_rate", value);
        clock.advance(Duration::seconds(60));
    }

    let result = engine.reason(&empty_facts()).unwrap();
    assert_eq!(result.fired, vec!["error_spike"]);
}

#[test]
fn empty_window_reads_null_and_demotes_comparison() {
    let (engine, _clock) = engine_with_clock(vec![
        RuleSpec::new("no_data", "recent_avg('never_recorded', 300) > 1").set("x", true)
    ]);

    // Null > 1 is a type failure, demoted to not-firing
    let result = engine.reason(&empty_facts()).unwrap();
    assert!(result.fired.is_empty());
    match &result.traces[0].outcome {
        RuleOutcome::Skipped { kind, .. } => assert_eq!(kind, "type"),
        other => panic!("expected demoted comparison, got {other:?}"),
    }
}

#[test]
fn null_aware_rule_distinguishes_no_data_from_zero() {
    let (engine, clock) = engine_with_clock(vec![
        RuleSpec::new("no_data", "is_null(recent_count('heartbeat', 60))")
            .set("monitoring_gap", true),
    ]);

    let result = engine.reason(&empty_facts()).unwrap();
    assert_eq!(result.fired, vec!["no_data"]);

    // After a heartbeat sample the gap rule stops firing
    engine.record_datapoint("heartbeat", 1.0);
    clock.advance(Duration::seconds(10));
    let result = engine.reason(&empty_facts()).unwrap();
    assert!(result.fired.is_empty());
}

#[test]
fn recent_count_matches_sample_count() {
    let (engine, clock) = engine_with_clock(vec![
        RuleSpec::new("burst", "recent_count('requests', 120) >= 3").set("throttle", true)
    ]);

    for _ in 0..2 {
        engine.record_datapoint("requests", 1.0);
        clock.advance(Duration::seconds(30));
    }
    assert!(engine.reason(&empty_facts()).unwrap().fired.is_empty());

    engine.record_datapoint("requests", 1.0);
    let result = engine.reason(&empty_facts()).unwrap();
    assert_eq!(result.fired, vec!["burst"]);
}

#[test]
fn ttl_facts_feed_conditions_until_expiry() {
    let (engine, clock) = engine_with_clock(vec![
        RuleSpec::new("session_active", "has_ttl_fact('session') and ttl_fact('session') == 'abc'")
            .set("authorized", true),
    ]);

    engine.set_ttl_fact("session", Value::String("abc".into()), 120);

    let result = engine.reason(&empty_facts()).unwrap();
    assert_eq!(result.fired, vec!["session_active"]);

    clock.advance(Duration::seconds(121));
    let result = engine.reason(&empty_facts()).unwrap();
    assert!(result.fired.is_empty());
}

#[test]
fn frozen_now_is_shared_across_one_call() {
    // Both windowed reads in the condition observe the same `now`, so a
    // sample recorded right at the boundary is either in both or neither
    let (engine, clock) = engine_with_clock(vec![
        RuleSpec::new(
            "consistent",
            "recent_count('m', 60) == recent_count('m', 60)",
        )
        .set("stable", true),
    ]);

    engine.record_datapoint("m", 1.0);
    clock.advance(Duration::seconds(59));

    let result = engine.reason(&empty_facts()).unwrap();
    assert_eq!(result.fired, vec!["consistent"]);
}
