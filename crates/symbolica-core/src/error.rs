//! Structured error handling for the Symbolica engine
//!
//! Compile-time errors abort rule set construction. Runtime errors split
//! into per-rule failures (some of which demote to "condition is false")
//! and per-call failures that terminate the `reason` call with a partial
//! result. The accessors on [`SymbolicaError`] encode that taxonomy so the
//! executor does not have to pattern-match variants inline.

use thiserror::Error;

/// Error type covering every engine operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SymbolicaError {
    /// Malformed expression or rule surface input
    #[error("Parse error at position {position}: expected {expected}, found {found}")]
    Parse {
        position: usize,
        expected: String,
        found: String,
    },

    /// The rule dependency graph contains a cycle
    #[error("Cyclic rule dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// Rule-level validation failure (duplicate id, unresolved trigger, ...)
    #[error("Rule error{}: {message}", .rule_id.as_deref().map(|id| format!(" in '{id}'")).unwrap_or_default())]
    Rule {
        message: String,
        rule_id: Option<String>,
    },

    /// A bare reference read a name absent from facts and overlay
    #[error("Undefined field: {field}")]
    UndefinedField { field: String },

    /// Operands with incompatible tags reached an operator
    #[error("Type error: {message}")]
    Type { message: String },

    /// Division or modulo with a zero divisor
    #[error("Division by zero")]
    DivisionByZero,

    /// A function was called with the wrong number of arguments
    #[error("Function '{function}' expects {expected} arguments, got {got}")]
    Arity {
        function: String,
        expected: String,
        got: usize,
    },

    /// A call resolved to no registered function
    #[error("Unknown function: {name}")]
    UnknownFunction { name: String },

    /// `PROMPT(...)` was evaluated with no adapter configured
    #[error("PROMPT() is unavailable: no prompt adapter configured")]
    PromptUnavailable,

    /// The configured prompt adapter failed
    #[error("Prompt error: {message}")]
    Prompt { message: String },

    /// The per-call deadline expired mid-evaluation
    #[error("Evaluation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The caller requested cancellation
    #[error("Evaluation cancelled")]
    Cancelled,

    /// Invariant violation inside the engine
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SymbolicaError {
    /// Error category for logging and metrics
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::CyclicDependency { .. } => "cyclic_dependency",
            Self::Rule { .. } => "rule",
            Self::UndefinedField { .. } => "undefined_field",
            Self::Type { .. } => "type",
            Self::DivisionByZero => "division_by_zero",
            Self::Arity { .. } => "arity",
            Self::UnknownFunction { .. } => "unknown_function",
            Self::PromptUnavailable => "prompt_unavailable",
            Self::Prompt { .. } => "prompt",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal { .. } => "internal",
        }
    }

    /// Failures that always demote a condition to "did not fire"
    #[must_use]
    pub const fn is_condition_demotable(&self) -> bool {
        matches!(self, Self::UndefinedField { .. } | Self::Type { .. })
    }

    /// Failures that demote only under the permissive error strategy
    #[must_use]
    pub const fn is_strictness_gated(&self) -> bool {
        matches!(
            self,
            Self::DivisionByZero
                | Self::Arity { .. }
                | Self::UnknownFunction { .. }
                | Self::PromptUnavailable
                | Self::Prompt { .. }
        )
    }

    /// Per-call failures that terminate the `reason` call with a partial result
    #[must_use]
    pub const fn is_call_terminal(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled)
    }

    /// Create a parse error
    pub fn parse(position: usize, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::Parse {
            position,
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a rule validation error without a rule id
    pub fn rule(message: impl Into<String>) -> Self {
        Self::Rule {
            message: message.into(),
            rule_id: None,
        }
    }

    /// Create a rule validation error scoped to a rule id
    pub fn rule_with_id(rule_id: &str, message: impl Into<String>) -> Self {
        Self::Rule {
            message: message.into(),
            rule_id: Some(rule_id.to_string()),
        }
    }

    /// Create an undefined field error
    pub fn undefined_field(field: &str) -> Self {
        Self::UndefinedField {
            field: field.to_string(),
        }
    }

    /// Create a type error
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type alias for engine operations
pub type SymbolicaResult<T> = Result<T, SymbolicaError>;
