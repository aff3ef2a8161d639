//! Deadline and cancellation behavior: partial results, not errors

use std::time::Duration;
use symbolica_core::{
    CancellationToken, Engine, Facts, ReasonOptions, ReasonStatus, RuleSpec, Value,
};

fn facts(pairs: &[(&str, Value)]) -> Facts {
    pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
}

fn simple_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec::new("one", "x > 0").set("a", 1i64),
        RuleSpec::new("two", "x > 0").set("b", 2i64),
    ]
}

#[test]
fn expired_deadline_returns_partial_result() {
    let engine = Engine::compile(simple_rules()).unwrap();

    let result = engine
        .reason_with(
            &facts(&[("x", Value::Int(1))]),
            &ReasonOptions {
                deadline: Some(Duration::ZERO),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(result.status, ReasonStatus::TimedOut);
    assert!(!result.is_complete());
    assert!(result.fired.is_empty());
}

#[test]
fn cancelled_token_returns_partial_result() {
    let engine = Engine::compile(simple_rules()).unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let result = engine
        .reason_with(
            &facts(&[("x", Value::Int(1))]),
            &ReasonOptions {
                cancellation: Some(token),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(result.status, ReasonStatus::Cancelled);
    assert!(result.fired.is_empty());
}

#[test]
fn uncancelled_token_does_not_interfere() {
    let engine = Engine::compile(simple_rules()).unwrap();
    let token = CancellationToken::new();

    let result = engine
        .reason_with(
            &facts(&[("x", Value::Int(1))]),
            &ReasonOptions {
                cancellation: Some(token.clone()),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(result.status, ReasonStatus::Completed);
    assert_eq!(result.fired, vec!["one", "two"]);
    assert!(!token.is_cancelled());
}

#[test]
fn generous_deadline_completes_normally() {
    let engine = Engine::compile(simple_rules()).unwrap();

    let result = engine
        .reason_with(
            &facts(&[("x", Value::Int(1))]),
            &ReasonOptions {
                deadline: Some(Duration::from_secs(30)),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(result.status, ReasonStatus::Completed);
    assert_eq!(result.fired.len(), 2);
}

#[test]
fn partial_result_keeps_earlier_writes() {
    // Engine-level default options apply to plain reason() calls too
    let engine = Engine::compile(simple_rules())
        .unwrap()
        .with_options(ReasonOptions {
            deadline: Some(Duration::ZERO),
            ..Default::default()
        });

    let result = engine.reason(&facts(&[("x", Value::Int(1))])).unwrap();
    assert_eq!(result.status, ReasonStatus::TimedOut);
    // Nothing ran, and the result still carries the input view
    assert_eq!(
        result.enriched_facts().get("x"),
        Some(&Value::Int(1))
    );
}
