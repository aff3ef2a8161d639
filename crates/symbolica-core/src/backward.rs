//! Backward chaining: goal-directed reachability over the compiled rule set
//!
//! Answers two questions without executing any actions: which rules could
//! assign a requested output, and whether some such rule could plausibly
//! fire given the current facts. The reachability check is optimistic:
//! a comparison that cannot be evaluated because a field is missing counts
//! as satisfiable (the field may arrive in extended facts), while a
//! comparison that is definitively false on present facts is rescued only
//! when an upstream rule writing one of its fields could itself fire. The
//! search is a depth-bounded DFS memoized on `(rule_id, goal_field)`.
//!
//! A `false` answer is sound: no single rule can produce the goal under
//! any extension of the facts by fields not yet present. A `true` answer
//! is existential, necessary but not sufficient.

use crate::expr::ast::{self, BinaryOp, Expr, UnaryOp};
use crate::expr::evaluator::{evaluate, values_equal};
use crate::expr::{EvalContext, Observations};
use crate::functions::FunctionRegistry;
use crate::temporal::TemporalStore;
use crate::types::{CompiledRule, Facts, RuleSet};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use symbolica_types::Value;

const MAX_SEARCH_DEPTH: usize = 8;

/// A reasoning goal: output fields, each optionally pinned to a value
#[derive(Debug, Clone, PartialEq)]
pub struct Goal {
    targets: Vec<(String, Option<Value>)>,
}

impl Goal {
    /// Goal over a field regardless of value
    #[must_use]
    pub fn field(name: &str) -> Self {
        Self {
            targets: vec![(name.to_string(), None)],
        }
    }

    /// Goal over a field with a required value
    #[must_use]
    pub fn value(name: &str, value: impl Into<Value>) -> Self {
        Self {
            targets: vec![(name.to_string(), Some(value.into()))],
        }
    }

    /// Add another field to the goal
    #[must_use]
    pub fn and_field(mut self, name: &str) -> Self {
        self.targets.push((name.to_string(), None));
        self
    }

    /// Add another pinned field to the goal
    #[must_use]
    pub fn and_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.targets.push((name.to_string(), Some(value.into())));
        self
    }

    /// The goal's (field, optional value) targets
    #[must_use]
    pub fn targets(&self) -> &[(String, Option<Value>)] {
        &self.targets
    }
}

/// Goal-directed search over a compiled rule set
pub struct BackwardChainer<'a> {
    rule_set: &'a RuleSet,
    registry: &'a FunctionRegistry,
    temporal: &'a TemporalStore,
}

impl<'a> BackwardChainer<'a> {
    /// Create a chainer over a compiled rule set
    #[must_use]
    pub const fn new(
        rule_set: &'a RuleSet,
        registry: &'a FunctionRegistry,
        temporal: &'a TemporalStore,
    ) -> Self {
        Self {
            rule_set,
            registry,
            temporal,
        }
    }

    /// Rules whose write set intersects the goal and whose template for the
    /// goal field could produce the requested value. Literal templates are
    /// compared exactly; non-literal templates match conservatively.
    #[must_use]
    pub fn rules_for_goal(&self, goal: &Goal) -> Vec<&'a CompiledRule> {
        self.rule_set
            .rules()
            .iter()
            .filter(|rule| {
                goal.targets
                    .iter()
                    .any(|(field, want)| rule_can_supply(rule, field, want.as_ref()))
            })
            .collect()
    }

    /// Whether some supporting rule's condition could fire against `facts`.
    ///
    /// Missing fields make individual comparisons indeterminate-true; a
    /// comparison that is definitively false on present facts is treated as
    /// a subgoal for upstream writers of its fields.
    #[must_use]
    pub fn can_achieve(&self, goal: &Goal, facts: &Facts, now: DateTime<Utc>) -> bool {
        let mut search = Search {
            chainer: self,
            facts,
            now,
            memo: HashMap::new(),
            in_progress: HashSet::new(),
        };
        goal.targets.iter().any(|(field, want)| {
            self.rule_set
                .rules()
                .iter()
                .filter(|rule| rule_can_supply(rule, field, want.as_ref()))
                .any(|rule| search.rule_could_fire(rule, field, 0))
        })
    }
}

fn rule_can_supply(rule: &CompiledRule, field: &str, want: Option<&Value>) -> bool {
    if !rule.writes.contains(field) {
        return false;
    }
    let Some(want) = want else {
        return true;
    };
    // The last action writing the field is the one whose value survives
    let template = rule
        .actions
        .iter()
        .rev()
        .find(|action| action.target == field)
        .map(|action| &action.template);
    match template {
        Some(Expr::Literal(produced)) => values_equal(produced, want),
        Some(_) => true, // non-literal templates could produce any value
        None => false,
    }
}

struct Search<'a, 'b> {
    chainer: &'b BackwardChainer<'a>,
    facts: &'b Facts,
    now: DateTime<Utc>,
    memo: HashMap<(String, String), bool>,
    in_progress: HashSet<(String, String)>,
}

impl Search<'_, '_> {
    fn rule_could_fire(&mut self, rule: &CompiledRule, goal_field: &str, depth: usize) -> bool {
        if depth > MAX_SEARCH_DEPTH {
            return false;
        }
        let key = (rule.id.clone(), goal_field.to_string());
        if let Some(&memoized) = self.memo.get(&key) {
            return memoized;
        }
        if !self.in_progress.insert(key.clone()) {
            return false;
        }
        let result = self.could_hold(&rule.condition, depth);
        self.in_progress.remove(&key);
        self.memo.insert(key, result);
        result
    }

    fn could_hold(&mut self, expr: &Expr, depth: usize) -> bool {
        match expr {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => self.could_hold(left, depth) && self.could_hold(right, depth),
            Expr::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => self.could_hold(left, depth) || self.could_hold(right, depth),
            Expr::All(children) => children.iter().all(|c| self.could_hold(c, depth)),
            Expr::Any(children) => children.iter().any(|c| self.could_hold(c, depth)),
            Expr::Not(inner)
            | Expr::Unary {
                op: UnaryOp::Not,
                operand: inner,
            } => match self.try_evaluate(inner) {
                Some(value) => !value.is_truthy(),
                None => true, // indeterminate negation stays optimistic
            },
            leaf => match self.evaluate_leaf(leaf) {
                LeafVerdict::True => true,
                LeafVerdict::Indeterminate => true,
                LeafVerdict::False => self.rescue_via_upstream(leaf, depth),
                LeafVerdict::Failed => false,
            },
        }
    }

    /// A definitively-false leaf may still become true if an upstream rule
    /// rewrites one of the fields it reads
    fn rescue_via_upstream(&mut self, leaf: &Expr, depth: usize) -> bool {
        for field in ast::extract_refs(leaf) {
            let writers: Vec<String> =
                self.chainer.rule_set.writers_of(&field).to_vec();
            for writer_id in writers {
                let Some(writer) = self.chainer.rule_set.get(&writer_id) else {
                    continue;
                };
                if self.rule_could_fire(writer, &field, depth + 1) {
                    return true;
                }
            }
        }
        false
    }

    fn evaluate_leaf(&self, leaf: &Expr) -> LeafVerdict {
        match self.try_evaluate_result(leaf) {
            Ok(value) => {
                if value.is_truthy() {
                    LeafVerdict::True
                } else {
                    LeafVerdict::False
                }
            }
            Err(crate::error::SymbolicaError::UndefinedField { .. }) => LeafVerdict::Indeterminate,
            Err(_) => LeafVerdict::Failed,
        }
    }

    fn try_evaluate(&self, expr: &Expr) -> Option<Value> {
        self.try_evaluate_result(expr).ok()
    }

    fn try_evaluate_result(
        &self,
        expr: &Expr,
    ) -> crate::error::SymbolicaResult<Value> {
        let overlay = HashMap::new();
        let ctx = EvalContext {
            facts: self.facts,
            overlay: &overlay,
            registry: self.chainer.registry,
            temporal: self.chainer.temporal,
            now: self.now,
            deadline: None,
            cancelled: None,
            prompt_adapter: None,
            prompt_cache: None,
        };
        let mut obs = Observations::default();
        evaluate(expr, &ctx, &mut obs)
    }
}

enum LeafVerdict {
    True,
    False,
    Indeterminate,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuleSpec;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    struct Fixture {
        rule_set: RuleSet,
        registry: FunctionRegistry,
        temporal: TemporalStore,
    }

    impl Fixture {
        fn new(specs: Vec<RuleSpec>) -> Self {
            let registry = FunctionRegistry::with_builtins();
            let rule_set = RuleSet::compile(specs, &registry).unwrap();
            Self {
                rule_set,
                registry,
                temporal: TemporalStore::new(),
            }
        }

        fn chainer(&self) -> BackwardChainer<'_> {
            BackwardChainer::new(&self.rule_set, &self.registry, &self.temporal)
        }
    }

    fn lending_rules() -> Vec<RuleSpec> {
        vec![
            RuleSpec::new("vip_approval", "customer_tier == 'vip' and credit_score > 750")
                .set("approved", true)
                .set("credit_limit", 50_000i64),
            RuleSpec::new("manual_review", "credit_score <= 600")
                .set("approved", false)
                .set("needs_review", true),
        ]
    }

    fn facts(pairs: &[(&str, Value)]) -> Facts {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn test_rules_for_goal_by_field() {
        let fixture = Fixture::new(lending_rules());
        let chainer = fixture.chainer();

        let supporting = chainer.rules_for_goal(&Goal::field("approved"));
        let ids: Vec<&str> = supporting.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["vip_approval", "manual_review"]);
    }

    #[test]
    fn test_rules_for_goal_literal_value_match() {
        let fixture = Fixture::new(lending_rules());
        let chainer = fixture.chainer();

        let supporting = chainer.rules_for_goal(&Goal::value("approved", true));
        let ids: Vec<&str> = supporting.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["vip_approval"]);
    }

    #[test]
    fn test_rules_for_goal_template_matches_conservatively() {
        let fixture = Fixture::new(vec![
            RuleSpec::new("computed", "x > 0").set_template("approved", "x > 10")
        ]);
        let chainer = fixture.chainer();
        let supporting = chainer.rules_for_goal(&Goal::value("approved", true));
        assert_eq!(supporting.len(), 1);
    }

    #[test]
    fn test_can_achieve_with_satisfying_facts() {
        let fixture = Fixture::new(lending_rules());
        let chainer = fixture.chainer();

        let reachable = chainer.can_achieve(
            &Goal::value("approved", true),
            &facts(&[
                ("customer_tier", Value::String("vip".into())),
                ("credit_score", Value::Int(800)),
            ]),
            now(),
        );
        assert!(reachable);
    }

    #[test]
    fn test_can_achieve_false_on_contradicting_facts() {
        let fixture = Fixture::new(lending_rules());
        let chainer = fixture.chainer();

        // credit_score 100 contradicts vip_approval and nothing rewrites it
        let reachable = chainer.can_achieve(
            &Goal::value("approved", true),
            &facts(&[
                ("customer_tier", Value::String("vip".into())),
                ("credit_score", Value::Int(100)),
            ]),
            now(),
        );
        assert!(!reachable);
    }

    #[test]
    fn test_missing_fields_are_indeterminate_true() {
        let fixture = Fixture::new(lending_rules());
        let chainer = fixture.chainer();

        // No facts at all: both conditions are indeterminate, so the goal
        // stays reachable under some extension of the facts
        assert!(chainer.can_achieve(&Goal::value("approved", true), &facts(&[]), now()));
    }

    #[test]
    fn test_upstream_rescue_of_false_comparison() {
        let fixture = Fixture::new(vec![
            RuleSpec::new("promote", "status == 'pending'").set("stage", "ready"),
            RuleSpec::new("finalize", "stage == 'ready'").set("approved", true),
        ]);
        let chainer = fixture.chainer();

        // stage is present and wrong, but `promote` can rewrite it
        assert!(chainer.can_achieve(
            &Goal::value("approved", true),
            &facts(&[
                ("stage", Value::String("init".into())),
                ("status", Value::String("pending".into())),
            ]),
            now(),
        ));

        // ... and cannot when its own condition is definitively false
        assert!(!chainer.can_achieve(
            &Goal::value("approved", true),
            &facts(&[
                ("stage", Value::String("init".into())),
                ("status", Value::String("closed".into())),
            ]),
            now(),
        ));
    }

    #[test]
    fn test_goal_with_unwritten_field_unreachable() {
        let fixture = Fixture::new(lending_rules());
        let chainer = fixture.chainer();
        assert!(!chainer.can_achieve(&Goal::field("nonexistent_output"), &facts(&[]), now()));
    }
}
