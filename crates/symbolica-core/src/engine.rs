//! Engine facade
//!
//! Owns the compiled rule set together with its collaborators (function
//! registry, temporal store, clock, optional prompt adapter) and exposes
//! the reasoning API. The rule set is immutable after compilation and an
//! `Engine` is safe to share across threads; the temporal store is the
//! only shared mutable state and guards itself.

use crate::backward::{BackwardChainer, Goal};
use crate::clock::{Clock, SystemClock};
use crate::error::SymbolicaResult;
use crate::executor::{DagExecutor, ExecutionResult, ReasonOptions};
use crate::expr::evaluator::evaluate;
use crate::expr::parser::parse_expression;
use crate::expr::{EvalContext, Observations};
use crate::functions::{FunctionRegistry, PromptAdapter};
use crate::temporal::TemporalStore;
use crate::types::{CompiledRule, Facts, RuleSet, RuleSpec};
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use symbolica_types::Value;
use tracing::{info, instrument};

/// Summary of a compiled rule set for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineAnalysis {
    /// Number of compiled rules
    pub rule_count: usize,
    /// Rule ids in execution order
    pub execution_order: Vec<String>,
    /// Number of topological layers
    pub layer_count: usize,
    /// Number of dependency edges
    pub edge_count: usize,
}

/// Deterministic rule engine over a compiled rule set
pub struct Engine {
    rule_set: RuleSet,
    registry: FunctionRegistry,
    temporal: Arc<TemporalStore>,
    clock: Arc<dyn Clock>,
    prompt_adapter: Option<Arc<dyn PromptAdapter>>,
    options: ReasonOptions,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("rules", &self.rule_set.len())
            .field("registry", &self.registry)
            .finish()
    }
}

impl Engine {
    /// Compile rule records with the built-in function registry
    pub fn compile(specs: Vec<RuleSpec>) -> SymbolicaResult<Self> {
        Self::compile_with(specs, FunctionRegistry::with_builtins())
    }

    /// Compile rule records against a caller-populated registry.
    ///
    /// The registry must be fully populated first: name resolution and
    /// arity validation happen here, and the registry is read-only from
    /// now on.
    #[instrument(skip_all, fields(rule_count = specs.len()))]
    pub fn compile_with(
        specs: Vec<RuleSpec>,
        registry: FunctionRegistry,
    ) -> SymbolicaResult<Self> {
        let rule_set = RuleSet::compile(specs, &registry)?;
        info!(rules = rule_set.len(), "Engine compiled");
        Ok(Self {
            rule_set,
            registry,
            temporal: Arc::new(TemporalStore::new()),
            clock: Arc::new(SystemClock),
            prompt_adapter: None,
            options: ReasonOptions::default(),
        })
    }

    /// Replace the clock (tests inject a deterministic one)
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the temporal store (e.g. to share one across engines)
    #[must_use]
    pub fn with_temporal_store(mut self, store: Arc<TemporalStore>) -> Self {
        self.temporal = store;
        self
    }

    /// Attach an LLM adapter behind `PROMPT(...)`
    #[must_use]
    pub fn with_prompt_adapter(mut self, adapter: Arc<dyn PromptAdapter>) -> Self {
        self.prompt_adapter = Some(adapter);
        self
    }

    /// Set the default per-call options
    #[must_use]
    pub fn with_options(mut self, options: ReasonOptions) -> Self {
        self.options = options;
        self
    }

    /// Evaluate the rule set against `facts` with the default options
    pub fn reason(&self, facts: &Facts) -> SymbolicaResult<ExecutionResult> {
        self.reason_with(facts, &self.options.clone())
    }

    /// Evaluate the rule set against `facts` with explicit options
    pub fn reason_with(
        &self,
        facts: &Facts,
        opts: &ReasonOptions,
    ) -> SymbolicaResult<ExecutionResult> {
        let mut executor = DagExecutor::new(&self.rule_set, &self.registry, &self.temporal);
        if let Some(adapter) = self.prompt_adapter.as_deref() {
            executor = executor.with_prompt_adapter(adapter);
        }
        executor.reason(facts, self.clock.now(), opts)
    }

    /// Evaluate a single condition expression against facts (debug helper)
    pub fn test_condition(&self, expression: &str, facts: &Facts) -> SymbolicaResult<bool> {
        let expr = parse_expression(expression)?;
        let overlay = HashMap::new();
        let ctx = EvalContext {
            facts,
            overlay: &overlay,
            registry: &self.registry,
            temporal: &self.temporal,
            now: self.clock.now(),
            deadline: None,
            cancelled: None,
            prompt_adapter: self.prompt_adapter.as_deref(),
            prompt_cache: None,
        };
        let mut obs = Observations::default();
        Ok(evaluate(&expr, &ctx, &mut obs)?.is_truthy())
    }

    /// Rules that could assign the goal's fields
    #[must_use]
    pub fn rules_for_goal(&self, goal: &Goal) -> Vec<&CompiledRule> {
        BackwardChainer::new(&self.rule_set, &self.registry, &self.temporal).rules_for_goal(goal)
    }

    /// Whether the goal is plausibly reachable from `facts`
    #[must_use]
    pub fn can_achieve(&self, goal: &Goal, facts: &Facts) -> bool {
        BackwardChainer::new(&self.rule_set, &self.registry, &self.temporal).can_achieve(
            goal,
            facts,
            self.clock.now(),
        )
    }

    /// Record a time-series sample at the current clock time
    pub fn record_datapoint(&self, key: &str, value: f64) {
        self.temporal.record(key, value, self.clock.now());
    }

    /// Store a TTL fact expiring `ttl_seconds` from the current clock time
    pub fn set_ttl_fact(&self, key: &str, value: Value, ttl_seconds: i64) {
        self.temporal
            .set_ttl_fact(key, value, Duration::seconds(ttl_seconds), self.clock.now());
    }

    /// The temporal store backing this engine
    #[must_use]
    pub fn temporal(&self) -> &TemporalStore {
        &self.temporal
    }

    /// The compiled rule set
    #[must_use]
    pub const fn rule_set(&self) -> &RuleSet {
        &self.rule_set
    }

    /// Summary of the compiled rule set
    #[must_use]
    pub fn analysis(&self) -> EngineAnalysis {
        let graph = self.rule_set.graph();
        EngineAnalysis {
            rule_count: self.rule_set.len(),
            execution_order: graph.order.clone(),
            layer_count: graph.layers.len(),
            edge_count: graph.edge_count(),
        }
    }
}
