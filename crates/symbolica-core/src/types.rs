//! Rule model: surface records, compiled rules, and the compiled rule set
//!
//! A [`RuleSpec`] is the record handed over by whatever loader the host
//! uses; compilation parses its textual conditions and templates, validates
//! ids, triggers, and function calls, analyzes field dependencies, and
//! produces an immutable [`RuleSet`] already sorted into execution order.
//! A `RuleSet` is safe to share across threads.

use crate::dependency::{self, DependencyGraph};
use crate::error::{SymbolicaError, SymbolicaResult};
use crate::expr::ast::{self, Expr};
use crate::expr::parser::{self, ConditionSpec};
use crate::functions::FunctionRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use symbolica_types::Value;
use tracing::{debug, instrument};

/// Default rule priority when the record omits one
pub const DEFAULT_PRIORITY: i32 = 100;

/// Fact environment handed to `reason`: identifier names to values
pub type Facts = HashMap<String, Value>;

/// One action in a rule record: the target field and a literal-or-template
/// value (`{{ ... }}` strings are parsed as expressions)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Output field this action writes
    pub field: String,
    /// Literal value, or a `{{ ... }}` template string
    pub value: Value,
}

/// Rule record as produced by the surface loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Unique non-empty identifier
    pub id: String,
    /// Execution priority; higher-priority writes dominate within a layer
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Condition: flat expression string or structured `all`/`any`/`not`
    pub condition: ConditionSpec,
    /// Ordered action list
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    /// Rule ids scheduled when this rule fires
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Metadata-only tags
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

const fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl RuleSpec {
    /// Start a rule record with a flat condition expression
    #[must_use]
    pub fn new(id: &str, condition: &str) -> Self {
        Self {
            id: id.to_string(),
            priority: DEFAULT_PRIORITY,
            condition: ConditionSpec::Expression(condition.to_string()),
            actions: Vec::new(),
            triggers: Vec::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Start a rule record with a structured condition
    #[must_use]
    pub fn with_condition(id: &str, condition: ConditionSpec) -> Self {
        Self {
            id: id.to_string(),
            priority: DEFAULT_PRIORITY,
            condition,
            actions: Vec::new(),
            triggers: Vec::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Set the priority
    #[must_use]
    pub const fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Append an action writing a literal value
    #[must_use]
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.actions.push(ActionSpec {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    /// Append an action whose value is a template expression
    #[must_use]
    pub fn set_template(mut self, field: &str, template: &str) -> Self {
        self.actions.push(ActionSpec {
            field: field.to_string(),
            value: Value::String(format!("{{{{ {template} }}}}")),
        });
        self
    }

    /// Append trigger targets
    #[must_use]
    pub fn triggers(mut self, ids: &[&str]) -> Self {
        self.triggers.extend(ids.iter().map(|s| (*s).to_string()));
        self
    }

    /// Append a tag
    #[must_use]
    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_string());
        self
    }
}

/// Compiled action: target field plus its template AST
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledAction {
    /// Output field this action writes
    pub target: String,
    /// Template evaluated to produce the written value
    pub template: Expr,
}

/// Rule after compilation; immutable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledRule {
    /// Unique identifier
    pub id: String,
    /// Execution priority
    pub priority: i32,
    /// Condition AST
    pub condition: Expr,
    /// Normalized condition text used in reasoning strings
    pub condition_text: String,
    /// Ordered compiled actions
    pub actions: Vec<CompiledAction>,
    /// Rule ids scheduled when this rule fires
    pub triggers: Vec<String>,
    /// Metadata-only tags
    pub tags: BTreeSet<String>,
    /// Fields read by the condition and templates (excluding names written
    /// by an earlier action of the same rule)
    pub reads: BTreeSet<String>,
    /// Fields written by the actions
    pub writes: BTreeSet<String>,
}

/// Immutable collection of compiled rules in execution order, with the
/// derived dependency artifacts
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    index: HashMap<String, usize>,
    graph: DependencyGraph,
    writers: HashMap<String, Vec<String>>,
}

impl RuleSet {
    /// Compile rule records into an executable rule set.
    ///
    /// Validates ids, trigger resolution, expressions, and function arities
    /// against `registry`; builds the dependency graph; rejects cycles; and
    /// orders rules topologically. Within a topological layer rules are
    /// ordered by ascending priority (id as the final tie-breaker), so the
    /// highest-priority rule fires last and its writes win under the
    /// later-write-wins overlay.
    #[instrument(skip_all, fields(rule_count = specs.len()))]
    pub fn compile(specs: Vec<RuleSpec>, registry: &FunctionRegistry) -> SymbolicaResult<Self> {
        let mut seen_ids = HashSet::new();
        for spec in &specs {
            if spec.id.is_empty() {
                return Err(SymbolicaError::rule("rule id must be non-empty"));
            }
            if !seen_ids.insert(spec.id.clone()) {
                return Err(SymbolicaError::rule_with_id(&spec.id, "duplicate rule id"));
            }
        }
        for spec in &specs {
            for trigger in &spec.triggers {
                if !seen_ids.contains(trigger) {
                    return Err(SymbolicaError::rule_with_id(
                        &spec.id,
                        format!("trigger references unknown rule '{trigger}'"),
                    ));
                }
            }
        }

        let mut rules = Vec::with_capacity(specs.len());
        for spec in specs {
            rules.push(compile_rule(spec, registry)?);
        }

        let graph = dependency::analyze(&rules)?;

        // Re-order the rule vector into the computed execution order
        let position: HashMap<&str, usize> = graph
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        rules.sort_by_key(|rule| position[rule.id.as_str()]);

        let index = rules
            .iter()
            .enumerate()
            .map(|(i, rule)| (rule.id.clone(), i))
            .collect();

        let mut writers: HashMap<String, Vec<String>> = HashMap::new();
        for rule in &rules {
            for field in &rule.writes {
                writers.entry(field.clone()).or_default().push(rule.id.clone());
            }
        }

        debug!(
            rules = rules.len(),
            layers = graph.layers.len(),
            "Compiled rule set"
        );

        Ok(Self {
            rules,
            index,
            graph,
            writers,
        })
    }

    /// Rules in execution order
    #[must_use]
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Look up a rule by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CompiledRule> {
        self.index.get(id).map(|&i| &self.rules[i])
    }

    /// Ids of rules that write `field`
    #[must_use]
    pub fn writers_of(&self, field: &str) -> &[String] {
        self.writers.get(field).map_or(&[], Vec::as_slice)
    }

    /// The dependency graph computed at compile time
    #[must_use]
    pub const fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Number of rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile_rule(spec: RuleSpec, registry: &FunctionRegistry) -> SymbolicaResult<CompiledRule> {
    let condition = parser::parse_condition(&spec.condition)
        .map_err(|e| scope_to_rule(e, &spec.id))?;
    validate_calls(&condition, registry).map_err(|e| scope_to_rule(e, &spec.id))?;

    let mut actions = Vec::with_capacity(spec.actions.len());
    let mut reads: BTreeSet<String> = ast::extract_refs(&condition).into_iter().collect();
    let mut writes = BTreeSet::new();
    let mut written_so_far: HashSet<String> = HashSet::new();

    for action in &spec.actions {
        let template = parser::parse_action_template(&action.value)
            .map_err(|e| scope_to_rule(e, &spec.id))?;
        validate_calls(&template, registry).map_err(|e| scope_to_rule(e, &spec.id))?;

        // A template read of a field this rule wrote earlier is internal
        // data flow, not an external dependency
        for name in ast::extract_refs(&template) {
            if !written_so_far.contains(&name) {
                reads.insert(name);
            }
        }
        written_so_far.insert(action.field.clone());
        writes.insert(action.field.clone());
        actions.push(CompiledAction {
            target: action.field.clone(),
            template,
        });
    }

    let condition_text = condition.to_string();
    Ok(CompiledRule {
        id: spec.id,
        priority: spec.priority,
        condition,
        condition_text,
        actions,
        triggers: spec.triggers,
        tags: spec.tags,
        reads,
        writes,
    })
}

fn validate_calls(expr: &Expr, registry: &FunctionRegistry) -> SymbolicaResult<()> {
    for (name, argc) in ast::extract_calls(expr) {
        registry.validate_call(&name, argc)?;
    }
    Ok(())
}

fn scope_to_rule(err: SymbolicaError, rule_id: &str) -> SymbolicaError {
    match err {
        SymbolicaError::Rule { message, .. } => SymbolicaError::rule_with_id(rule_id, message),
        SymbolicaError::Parse { .. } | SymbolicaError::UnknownFunction { .. } | SymbolicaError::Arity { .. } => {
            SymbolicaError::rule_with_id(rule_id, err.to_string())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> FunctionRegistry {
        FunctionRegistry::with_builtins()
    }

    #[test]
    fn test_compile_extracts_read_write_sets() {
        let spec = RuleSpec::new("r1", "credit_score > 750 and tier == 'vip'")
            .set("approved", true)
            .set_template("limit", "base_limit * 2");
        let rule_set = RuleSet::compile(vec![spec], &registry()).unwrap();

        let rule = rule_set.get("r1").unwrap();
        assert_eq!(
            rule.reads.iter().collect::<Vec<_>>(),
            vec!["base_limit", "credit_score", "tier"]
        );
        assert_eq!(
            rule.writes.iter().collect::<Vec<_>>(),
            vec!["approved", "limit"]
        );
    }

    #[test]
    fn test_earlier_action_writes_are_not_reads() {
        let spec = RuleSpec::new("r1", "x > 0")
            .set("base", 10i64)
            .set_template("total", "base * 2");
        let rule_set = RuleSet::compile(vec![spec], &registry()).unwrap();

        let rule = rule_set.get("r1").unwrap();
        // `base` is written by the first action, so the second action's
        // read of it is internal
        assert_eq!(rule.reads.iter().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn test_duplicate_rule_id_rejected() {
        let specs = vec![
            RuleSpec::new("dup", "x > 0").set("a", 1i64),
            RuleSpec::new("dup", "x > 1").set("b", 2i64),
        ];
        let err = RuleSet::compile(specs, &registry()).unwrap_err();
        assert!(matches!(err, SymbolicaError::Rule { .. }));
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_unresolved_trigger_rejected() {
        let specs = vec![RuleSpec::new("a", "x > 0").set("y", 1i64).triggers(&["ghost"])];
        let err = RuleSet::compile(specs, &registry()).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_unknown_function_rejected_at_compile() {
        let specs = vec![RuleSpec::new("a", "mystery(x) > 0").set("y", 1i64)];
        let err = RuleSet::compile(specs, &registry()).unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn test_bad_arity_rejected_at_compile() {
        let specs = vec![RuleSpec::new("a", "len(x, y) > 0").set("z", 1i64)];
        let err = RuleSet::compile(specs, &registry()).unwrap_err();
        assert!(err.to_string().contains("len"));
    }

    #[test]
    fn test_rule_spec_deserializes_from_json() {
        let spec: RuleSpec = serde_json::from_str(
            r#"{
                "id": "vip_approval",
                "priority": 100,
                "condition": "customer_tier == 'vip' and credit_score > 750",
                "actions": [
                    {"field": "approved", "value": true},
                    {"field": "credit_limit", "value": 50000}
                ],
                "triggers": [],
                "tags": ["lending"]
            }"#,
        )
        .unwrap();
        assert_eq!(spec.id, "vip_approval");
        assert_eq!(spec.actions.len(), 2);
        assert!(spec.tags.contains("lending"));

        let rule_set = RuleSet::compile(vec![spec], &registry()).unwrap();
        assert_eq!(rule_set.len(), 1);
        assert_eq!(rule_set.writers_of("approved"), ["vip_approval"]);
    }
}
