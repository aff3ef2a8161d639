//! DAG executor: topological rule evaluation with trigger chaining
//!
//! Runs one `reason` call: rules are evaluated in the compiled topological
//! order against the original facts overlaid by accumulated writes, then
//! the trigger queue is drained so forward-chained rules get a second look
//! at the enriched environment. A rule fires at most once per call. When
//! two rules write the same field the later firing wins, which together
//! with the compile-time ordering makes the outcome a deterministic
//! function of the rule set and the facts.

use crate::error::{SymbolicaError, SymbolicaResult};
use crate::expr::evaluator::evaluate;
use crate::expr::{Deadline, EvalContext, Observations, PromptCache};
use crate::functions::{FunctionRegistry, PromptAdapter};
use crate::temporal::TemporalStore;
use crate::trace::{render_reasoning, RuleOutcome, RuleTrace};
use crate::types::{CompiledRule, Facts, RuleSet};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use symbolica_types::Value;
use tracing::{debug, instrument};

/// Cooperative cancellation flag for in-flight `reason` calls.
///
/// The executor checks it between rule evaluations; impure host functions
/// see it through the evaluation context and should honor it too.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create an uncancelled token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn flag(&self) -> &AtomicBool {
        &self.0
    }
}

/// How runtime evaluation errors outside the always-demoted class
/// (`UndefinedField`, `Type`) are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorStrategy {
    /// `DivisionByZero`, arity and prompt failures abort the call
    #[default]
    Strict,
    /// Those failures also demote the rule to not-firing
    Permissive,
}

/// Per-call execution options
#[derive(Debug, Clone, Default)]
pub struct ReasonOptions {
    /// Wall-clock budget for the whole call
    pub deadline: Option<Duration>,
    /// Cancellation flag checked between rule evaluations
    pub cancellation: Option<CancellationToken>,
    /// Error handling strategy
    pub error_strategy: ErrorStrategy,
    /// Render non-firing evaluation failures into the reasoning string
    pub verbose_trace: bool,
}

/// How a `reason` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReasonStatus {
    /// Every scheduled rule was evaluated
    Completed,
    /// The deadline expired; the result is partial
    TimedOut,
    /// The caller cancelled; the result is partial
    Cancelled,
}

/// Outcome of one `reason` call
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Accumulated writes (later firings win per field)
    pub verdict: HashMap<String, Value>,
    /// Fired rule ids in firing order
    pub fired: Vec<String>,
    /// Deterministic rendering of the fired trace entries
    pub reasoning: String,
    /// Total elapsed wall time
    pub elapsed: Duration,
    /// Completion status; partial results keep verdict and traces
    pub status: ReasonStatus,
    /// Per-rule trace entries in evaluation order
    pub traces: Vec<RuleTrace>,
    facts: HashMap<String, Value>,
}

impl ExecutionResult {
    /// Original facts overlaid with the verdict
    #[must_use]
    pub fn enriched_facts(&self) -> HashMap<String, Value> {
        let mut enriched = self.facts.clone();
        enriched.extend(self.verdict.iter().map(|(k, v)| (k.clone(), v.clone())));
        enriched
    }

    /// Whether the call ran to completion
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == ReasonStatus::Completed
    }
}

struct PassState {
    overlay: HashMap<String, Value>,
    fired: Vec<String>,
    fired_set: HashSet<String>,
    queue: VecDeque<(String, String)>,
    queued: HashSet<String>,
    // First rule to schedule each trigger target; firing order may reach
    // the target through the topological pass before the queue drains, and
    // the trace still names the scheduling rule
    trigger_parent: HashMap<String, String>,
    traces: Vec<RuleTrace>,
    prompt_cache: PromptCache,
}

impl PassState {
    fn new() -> Self {
        Self {
            overlay: HashMap::new(),
            fired: Vec::new(),
            fired_set: HashSet::new(),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            trigger_parent: HashMap::new(),
            traces: Vec::new(),
            prompt_cache: PromptCache::default(),
        }
    }
}

/// Executes compiled rule sets against fact maps
pub struct DagExecutor<'a> {
    rule_set: &'a RuleSet,
    registry: &'a FunctionRegistry,
    temporal: &'a TemporalStore,
    prompt_adapter: Option<&'a dyn PromptAdapter>,
}

impl<'a> DagExecutor<'a> {
    /// Create an executor over a compiled rule set
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
            prompt_adapter: None,
        }
    }

    /// Attach a prompt adapter for `PROMPT(...)` calls
    #[must_use]
    pub const fn with_prompt_adapter(mut self, adapter: &'a dyn PromptAdapter) -> Self {
        self.prompt_adapter = Some(adapter);
        self
    }

    /// Evaluate the rule set against `facts` with `now` frozen for every
    /// temporal function in the call.
    ///
    /// # Errors
    ///
    /// Fatal per-rule failures (under [`ErrorStrategy::Strict`]) abort the
    /// call with an error. Deadline expiry and cancellation do not: they
    /// return the partial result flagged accordingly.
    #[instrument(skip_all, fields(rules = self.rule_set.len()))]
    pub fn reason(
        &self,
        facts: &Facts,
        now: DateTime<Utc>,
        opts: &ReasonOptions,
    ) -> SymbolicaResult<ExecutionResult> {
        let started = Instant::now();
        let deadline = opts.deadline.map(Deadline::after);
        let mut state = PassState::new();
        let mut status = ReasonStatus::Completed;

        // Topological pass
        for rule in self.rule_set.rules() {
            if let Some(interrupted) = interruption(opts, deadline) {
                status = interrupted;
                break;
            }
            if state.fired_set.contains(&rule.id) {
                continue;
            }
            if let Some(interrupted) =
                self.evaluate_rule(rule, None, facts, now, deadline, opts, &mut state)?
            {
                status = interrupted;
                break;
            }
        }

        // Drain forward-chaining triggers; firings may enqueue more
        while status == ReasonStatus::Completed {
            let Some((id, parent)) = state.queue.pop_front() else {
                break;
            };
            state.queued.remove(&id);
            if let Some(interrupted) = interruption(opts, deadline) {
                status = interrupted;
                break;
            }
            if state.fired_set.contains(&id) {
                continue;
            }
            let rule = self.rule_set.get(&id).ok_or_else(|| {
                SymbolicaError::internal(format!("trigger target '{id}' missing from rule set"))
            })?;
            if let Some(interrupted) =
                self.evaluate_rule(rule, Some(parent), facts, now, deadline, opts, &mut state)?
            {
                status = interrupted;
                break;
            }
        }

        let reasoning = render_reasoning(&state.traces, opts.verbose_trace);
        let elapsed = started.elapsed();
        debug!(
            fired = state.fired.len(),
            status = ?status,
            elapsed_us = elapsed.as_micros() as u64,
            "Reason call finished"
        );

        Ok(ExecutionResult {
            verdict: state.overlay,
            fired: state.fired,
            reasoning,
            elapsed,
            status,
            traces: state.traces,
            facts: facts.clone(),
        })
    }

    fn context<'s>(
        &'s self,
        facts: &'s Facts,
        overlay: &'s HashMap<String, Value>,
        prompt_cache: &'s PromptCache,
        now: DateTime<Utc>,
        deadline: Option<Deadline>,
        opts: &'s ReasonOptions,
    ) -> EvalContext<'s> {
        EvalContext {
            facts,
            overlay,
            registry: self.registry,
            temporal: self.temporal,
            now,
            deadline,
            cancelled: opts.cancellation.as_ref().map(CancellationToken::flag),
            prompt_adapter: self.prompt_adapter,
            prompt_cache: Some(prompt_cache),
        }
    }

    /// Evaluate one rule; fire it if the condition holds. Returns
    /// `Ok(Some(status))` when the call must stop with a partial result.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_rule(
        &self,
        rule: &CompiledRule,
        triggered_by: Option<String>,
        facts: &Facts,
        now: DateTime<Utc>,
        deadline: Option<Deadline>,
        opts: &ReasonOptions,
        state: &mut PassState,
    ) -> SymbolicaResult<Option<ReasonStatus>> {
        let triggered_by =
            triggered_by.or_else(|| state.trigger_parent.get(&rule.id).cloned());
        let mut obs = Observations::default();
        let decided = {
            let ctx = self.context(facts, &state.overlay, &state.prompt_cache, now, deadline, opts);
            evaluate(&rule.condition, &ctx, &mut obs)
        };

        let fired = match decided {
            Ok(value) => value.is_truthy(),
            Err(e) if e.is_call_terminal() => return Ok(Some(terminal_status(&e))),
            Err(e) if demotes(&e, opts.error_strategy) => {
                state.traces.push(RuleTrace {
                    rule_id: rule.id.clone(),
                    condition: rule.condition_text.clone(),
                    outcome: RuleOutcome::Skipped {
                        kind: e.category().to_string(),
                        message: e.to_string(),
                    },
                    bindings: obs.reads,
                    writes: vec![],
                    triggered_by,
                    impure_calls: impure_call_names(&obs.calls),
                });
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !fired {
            state.traces.push(RuleTrace {
                rule_id: rule.id.clone(),
                condition: rule.condition_text.clone(),
                outcome: RuleOutcome::ConditionFalse,
                bindings: obs.reads,
                writes: vec![],
                triggered_by,
                impure_calls: impure_call_names(&obs.calls),
            });
            return Ok(None);
        }

        // Apply actions in order; later templates of the same rule see the
        // writes of earlier ones. On a demoted failure the rule must not
        // half-fire, so the overlay is restored wholesale.
        let checkpoint = state.overlay.clone();
        let mut writes = Vec::with_capacity(rule.actions.len());
        for action in &rule.actions {
            let produced = {
                let ctx =
                    self.context(facts, &state.overlay, &state.prompt_cache, now, deadline, opts);
                evaluate(&action.template, &ctx, &mut obs)
            };
            match produced {
                Ok(value) => {
                    state.overlay.insert(action.target.clone(), value.clone());
                    writes.push((action.target.clone(), value));
                }
                Err(e) if e.is_call_terminal() => {
                    state.overlay = checkpoint;
                    return Ok(Some(terminal_status(&e)));
                }
                Err(e) if demotes(&e, opts.error_strategy) => {
                    state.overlay = checkpoint;
                    state.traces.push(RuleTrace {
                        rule_id: rule.id.clone(),
                        condition: rule.condition_text.clone(),
                        outcome: RuleOutcome::Skipped {
                            kind: e.category().to_string(),
                            message: e.to_string(),
                        },
                        bindings: obs.reads,
                        writes: vec![],
                        triggered_by,
                        impure_calls: impure_call_names(&obs.calls),
                    });
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }

        state.fired.push(rule.id.clone());
        state.fired_set.insert(rule.id.clone());
        state.traces.push(RuleTrace {
            rule_id: rule.id.clone(),
            condition: rule.condition_text.clone(),
            outcome: RuleOutcome::Fired,
            bindings: obs.reads,
            writes,
            triggered_by,
            impure_calls: impure_call_names(&obs.calls),
        });

        for target in &rule.triggers {
            if !state.fired_set.contains(target) && !state.queued.contains(target) {
                state.queue.push_back((target.clone(), rule.id.clone()));
                state.queued.insert(target.clone());
                state.trigger_parent.entry(target.clone()).or_insert_with(|| rule.id.clone());
            }
        }

        Ok(None)
    }
}

fn impure_call_names(calls: &[crate::expr::CallObservation]) -> Vec<String> {
    calls.iter().filter(|c| !c.pure).map(|c| c.name.clone()).collect()
}

fn demotes(error: &SymbolicaError, strategy: ErrorStrategy) -> bool {
    error.is_condition_demotable()
        || (strategy == ErrorStrategy::Permissive && error.is_strictness_gated())
}

fn terminal_status(error: &SymbolicaError) -> ReasonStatus {
    match error {
        SymbolicaError::Cancelled => ReasonStatus::Cancelled,
        _ => ReasonStatus::TimedOut,
    }
}

fn interruption(opts: &ReasonOptions, deadline: Option<Deadline>) -> Option<ReasonStatus> {
    if opts.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled) {
        return Some(ReasonStatus::Cancelled);
    }
    if deadline.is_some_and(|d| d.expired()) {
        return Some(ReasonStatus::TimedOut);
    }
    None
}
