//! Symbolica Prelude
//!
//! This crate re-exports the most frequently used public items from the
//! Symbolica ecosystem (currently `symbolica-core` and `symbolica-types`).
//! Down-stream applications can depend on `symbolica-prelude` to avoid
//! long import lists and to stay insulated from internal module
//! reshuffles.

#![deny(warnings)]
#![deny(missing_docs)]

// Re-export core engine & type system ---------------------------------------------------------

pub use symbolica_core::{
    // Engine surface
    Engine, EngineAnalysis,
    // Fundamental data types
    Facts, Value,
    // Rule structure
    ActionSpec, CompiledRule, ConditionSpec, RuleSet, RuleSpec,
    // Runtime results
    ExecutionResult, ReasonOptions, ReasonStatus, RuleOutcome, RuleTrace,
    // Goal-directed search
    BackwardChainer, Goal,
    // Collaborators
    Clock, FixedClock, FunctionRegistry, PromptAdapter, SystemClock, TemporalStore,
    // Errors
    SymbolicaError, SymbolicaResult,
};

// When new crates expose stable public APIs, add re-exports here in a backwards-compatible
// manner.
