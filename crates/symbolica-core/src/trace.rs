//! Rule trace entries and the reasoning string
//!
//! Every evaluated rule leaves a trace entry; fired entries render into the
//! human-readable reasoning string, one checkmark-prefixed line per firing.
//! Verbose traces additionally render rules whose conditions failed with a
//! demoted evaluation error.

use serde::Serialize;
use symbolica_types::Value;

/// Outcome of evaluating one rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RuleOutcome {
    /// Condition held; actions were applied
    Fired,
    /// Condition evaluated cleanly to false
    ConditionFalse,
    /// Condition evaluation failed and was demoted to not-firing
    Skipped {
        /// Error category (e.g. `undefined_field`)
        kind: String,
        /// Full error message
        message: String,
    },
}

/// Per-rule trace entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleTrace {
    /// Rule id
    pub rule_id: String,
    /// Normalized condition text
    pub condition: String,
    /// What happened
    pub outcome: RuleOutcome,
    /// Field bindings observed while evaluating, in read order
    pub bindings: Vec<(String, Value)>,
    /// Writes performed by the actions, in action order
    pub writes: Vec<(String, Value)>,
    /// Id of the rule whose trigger scheduled this evaluation
    pub triggered_by: Option<String>,
    /// Impure functions invoked during evaluation
    pub impure_calls: Vec<String>,
}

impl RuleTrace {
    /// Render the reasoning line for a fired rule
    fn fired_line(&self) -> String {
        let mut line = format!("✓ {}: {}", self.rule_id, self.condition);
        if !self.writes.is_empty() {
            line.push_str(", set ");
            for (i, (field, value)) in self.writes.iter().enumerate() {
                if i > 0 {
                    line.push_str(", ");
                }
                line.push_str(&format!("{field}={value}"));
            }
        }
        if let Some(parent) = &self.triggered_by {
            line.push_str(&format!(" (triggered by {parent})"));
        }
        line
    }

    fn skipped_line(&self, kind: &str) -> String {
        format!("✗ {}: {} [{}]", self.rule_id, self.condition, kind)
    }
}

/// Render the ordered trace entries into the reasoning string.
///
/// The output is a deterministic function of the entries: one line per
/// fired rule, and (when `verbose`) one line per demoted failure.
#[must_use]
pub fn render_reasoning(traces: &[RuleTrace], verbose: bool) -> String {
    let mut lines = Vec::new();
    for trace in traces {
        match &trace.outcome {
            RuleOutcome::Fired => lines.push(trace.fired_line()),
            RuleOutcome::Skipped { kind, .. } if verbose => {
                lines.push(trace.skipped_line(kind));
            }
            _ => {}
        }
    }
    lines.join("\n")
}
