//! Symbolica Core
//!
//! Deterministic rule engine: declarative IF/THEN rules are compiled once
//! into a dependency-ordered rule set, then evaluated against fact maps to
//! produce a verdict plus an auditable trace of what fired and why. The
//! engine targets sub-millisecond evaluation of rule sets in the hundreds
//! to low thousands and sits inside larger decision pipelines where
//! reproducibility and explainability matter.

use tracing::{debug, instrument};

pub mod backward;
pub mod clock;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod executor;
pub mod expr;
pub mod functions;
pub mod temporal;
pub mod trace;
/// Rule model shared across the engine
pub mod types;

pub use backward::{BackwardChainer, Goal};
pub use clock::{Clock, FixedClock, SystemClock};
pub use dependency::DependencyGraph;
pub use engine::{Engine, EngineAnalysis};
pub use error::{SymbolicaError, SymbolicaResult};
pub use executor::{
    CancellationToken, DagExecutor, ErrorStrategy, ExecutionResult, ReasonOptions, ReasonStatus,
};
pub use expr::ast::{BinaryOp, Expr, UnaryOp};
pub use expr::parser::{parse_expression, ConditionSpec};
pub use functions::{FunctionRegistry, PromptAdapter};
pub use symbolica_types::Value;
pub use temporal::{TemporalConfig, TemporalStats, TemporalStore};
pub use trace::{RuleOutcome, RuleTrace};
pub use types::{ActionSpec, CompiledRule, Facts, RuleSet, RuleSpec, DEFAULT_PRIORITY};

/// Initialize the core engine components
#[instrument]
pub fn init() -> anyhow::Result<()> {
    debug!("Initializing Symbolica core engine");
    Ok(())
}
