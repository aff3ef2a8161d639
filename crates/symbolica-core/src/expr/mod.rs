//! Expression sub-language: AST, parser, and evaluator
//!
//! Conditions and action templates share one expression language. It is
//! deliberately total over its operators: no loops, no assignment, no
//! arbitrary code execution. Expressions are parsed once at compile time
//! and evaluated against a fact environment on every `reason` call.

pub mod ast;
pub mod evaluator;
pub mod parser;

use crate::functions::{FunctionRegistry, PromptAdapter};
use crate::temporal::TemporalStore;
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::time::Instant;
use symbolica_types::Value;

/// Cache of `PROMPT(...)` results, keyed by substituted prompt text and
/// scoped to one `reason` call
pub type PromptCache = RefCell<HashMap<String, Value>>;

/// Per-call deadline carried through evaluation
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    /// When the enclosing `reason` call started
    pub started: Instant,
    /// Instant past which evaluation must abort
    pub at: Instant,
}

impl Deadline {
    /// Build a deadline `budget` from now
    #[must_use]
    pub fn after(budget: std::time::Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            at: started + budget,
        }
    }

    /// Whether the deadline has passed
    #[must_use]
    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Milliseconds elapsed since the call started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Environment view for one expression evaluation
pub struct EvalContext<'a> {
    /// Original facts for this call (immutable)
    pub facts: &'a HashMap<String, Value>,
    /// Writes accumulated so far; read before `facts`
    pub overlay: &'a HashMap<String, Value>,
    /// Function registry (read-only during evaluation)
    pub registry: &'a FunctionRegistry,
    /// Temporal store backing the windowed functions
    pub temporal: &'a TemporalStore,
    /// Wall time frozen at the start of the `reason` call
    pub now: DateTime<Utc>,
    /// Deadline for the enclosing call, checked at call boundaries
    pub deadline: Option<Deadline>,
    /// Cooperative cancellation flag, visible to impure host functions
    pub cancelled: Option<&'a AtomicBool>,
    /// Optional LLM adapter behind `PROMPT(...)`
    pub prompt_adapter: Option<&'a dyn PromptAdapter>,
    /// Per-call prompt result cache
    pub prompt_cache: Option<&'a PromptCache>,
}

impl<'a> EvalContext<'a> {
    /// Read a name through the overlay, falling back to the original facts
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&'a Value> {
        self.overlay.get(name).or_else(|| self.facts.get(name))
    }
}

/// Record of what one evaluation observed: field reads that resolved, and
/// function calls. The executor attaches this to the rule trace entry.
#[derive(Debug, Default, Clone)]
pub struct Observations {
    /// Field bindings seen during evaluation, in read order
    pub reads: Vec<(String, Value)>,
    /// Functions invoked during evaluation
    pub calls: Vec<CallObservation>,
}

/// One observed function call
#[derive(Debug, Clone)]
pub struct CallObservation {
    /// Function name as written in the expression
    pub name: String,
    /// Purity flag from the function descriptor
    pub pure: bool,
}

impl Observations {
    /// Record a resolved field read
    pub fn record_read(&mut self, name: &str, value: &Value) {
        if !self.reads.iter().any(|(n, _)| n == name) {
            self.reads.push((name.to_string(), value.clone()));
        }
    }

    /// Record a function call
    pub fn record_call(&mut self, name: &str, pure: bool) {
        self.calls.push(CallObservation {
            name: name.to_string(),
            pure,
        });
    }

    /// Names of impure functions invoked during this evaluation
    #[must_use]
    pub fn impure_calls(&self) -> Vec<&str> {
        self.calls.iter().filter(|c| !c.pure).map(|c| c.name.as_str()).collect()
    }
}
