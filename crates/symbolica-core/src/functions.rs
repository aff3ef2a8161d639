//! Function registry for condition and template expressions
//!
//! Maps function names to descriptors carrying arity bounds, a purity flag,
//! and the callable itself. Two callable shapes exist: plain functions over
//! evaluated arguments, and context-aware functions that additionally see
//! the evaluation environment (the temporal functions and `PROMPT` need the
//! frozen `now`, the temporal store, and the prompt adapter).
//!
//! Registrations must complete before compilation; during evaluation the
//! registry is read-only. Host code may add pure functions freely; impure
//! registrations require the registry to have been explicitly opened with
//! [`FunctionRegistry::permit_impure`], and impure calls are recorded in
//! rule traces.

use crate::error::{SymbolicaError, SymbolicaResult};
use crate::expr::EvalContext;
use crate::temporal::SustainedCmp;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use symbolica_types::Value;

/// Adapter behind the `PROMPT(...)` function. The engine never talks to an
/// LLM directly; hosts provide this and the engine stays usable without it.
pub trait PromptAdapter: Send + Sync {
    /// Complete a fully substituted prompt, returning the raw response text
    fn complete(&self, prompt: &str, max_tokens: Option<u32>) -> anyhow::Result<String>;
}

/// Context-aware function: sees evaluated arguments plus the environment
pub trait ContextFunction: Send + Sync {
    /// Invoke the function
    fn call(&self, args: &[Value], ctx: &EvalContext<'_>) -> SymbolicaResult<Value>;
}

type PlainFn = Box<dyn Fn(&[Value]) -> SymbolicaResult<Value> + Send + Sync>;

enum Callable {
    Plain(PlainFn),
    Context(Box<dyn ContextFunction>),
}

/// Descriptor for one registered function
pub struct FunctionDescriptor {
    min_args: usize,
    max_args: Option<usize>,
    pure: bool,
    callable: Callable,
}

impl FunctionDescriptor {
    /// Whether calls to this function are free of side effects
    #[must_use]
    pub const fn is_pure(&self) -> bool {
        self.pure
    }

    /// Arity bounds as (min, max); `None` max means variadic
    #[must_use]
    pub const fn arity(&self) -> (usize, Option<usize>) {
        (self.min_args, self.max_args)
    }

    fn arity_label(&self) -> String {
        match (self.min_args, self.max_args) {
            (min, Some(max)) if min == max => min.to_string(),
            (min, Some(max)) => format!("{min}..{max}"),
            (min, None) => format!("at least {min}"),
        }
    }
}

impl std::fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("pure", &self.pure)
            .finish()
    }
}

/// Lookup table from function name to descriptor
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionDescriptor>,
    impure_permitted: bool,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("impure_permitted", &self.impure_permitted)
            .finish()
    }
}

impl FunctionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry populated with the built-in functions
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        // Null handling
        registry.insert_pure("is_null", 1, Some(1), |args| {
            Ok(Value::Bool(matches!(args[0], Value::Null)))
        });
        registry.insert_pure("coalesce", 1, None, |args| {
            Ok(args
                .iter()
                .find(|v| !matches!(v, &Value::Null))
                .cloned()
                .unwrap_or(Value::Null))
        });

        // Collection and string helpers
        registry.insert_pure("len", 1, Some(1), builtin_len);
        registry.insert_pure("sum", 1, Some(1), builtin_sum);
        registry.insert_pure("abs", 1, Some(1), builtin_abs);
        registry.insert_pure("min", 1, None, |args| builtin_min_max(args, false));
        registry.insert_pure("max", 1, None, |args| builtin_min_max(args, true));
        registry.insert_pure("startswith", 2, Some(2), |args| {
            Ok(string_edge_check(&args[0], &args[1], true))
        });
        registry.insert_pure("endswith", 2, Some(2), |args| {
            Ok(string_edge_check(&args[0], &args[1], false))
        });
        registry.insert_pure("contains", 2, Some(2), builtin_contains);
        registry.insert_pure("upper", 1, Some(1), |args| match &args[0] {
            Value::String(s) => Ok(Value::String(s.to_uppercase())),
            other => Err(type_err("upper()", "string", other)),
        });
        registry.insert_pure("lower", 1, Some(1), |args| match &args[0] {
            Value::String(s) => Ok(Value::String(s.to_lowercase())),
            other => Err(type_err("lower()", "string", other)),
        });

        // Coercion
        registry.insert_pure("to_int", 1, Some(1), builtin_to_int);
        registry.insert_pure("to_float", 1, Some(1), builtin_to_float);
        registry.insert_pure("to_string", 1, Some(1), |args| {
            Ok(Value::String(args[0].to_string()))
        });

        // Temporal functions
        registry.insert_context("record", 2, Some(3), false, Box::new(RecordFunction));
        registry.insert_context("recent_avg", 2, Some(2), true, Box::new(WindowAggFunction(Agg::Avg)));
        registry.insert_context("recent_max", 2, Some(2), true, Box::new(WindowAggFunction(Agg::Max)));
        registry.insert_context("recent_min", 2, Some(2), true, Box::new(WindowAggFunction(Agg::Min)));
        registry.insert_context("recent_count", 2, Some(2), true, Box::new(WindowAggFunction(Agg::Count)));
        registry.insert_context(
            "sustained_above",
            3,
            Some(3),
            true,
            Box::new(SustainedFunction(SustainedCmp::Above)),
        );
        registry.insert_context(
            "sustained_below",
            3,
            Some(3),
            true,
            Box::new(SustainedFunction(SustainedCmp::Below)),
        );
        registry.insert_context("ttl_fact", 1, Some(1), true, Box::new(TtlFactFunction { presence: false }));
        registry.insert_context("has_ttl_fact", 1, Some(1), true, Box::new(TtlFactFunction { presence: true }));

        // LLM hook; fails PromptUnavailable until an adapter is configured
        registry.insert_context("PROMPT", 1, Some(3), false, Box::new(PromptFunction));

        registry
    }

    /// Allow subsequent impure host registrations on this registry
    pub fn permit_impure(&mut self) {
        self.impure_permitted = true;
    }

    /// Register a pure host function
    pub fn register_pure<F>(&mut self, name: &str, min_args: usize, max_args: Option<usize>, f: F)
    where
        F: Fn(&[Value]) -> SymbolicaResult<Value> + Send + Sync + 'static,
    {
        self.insert_pure(name, min_args, max_args, f);
    }

    /// Register an impure host function. Fails unless the registry was
    /// explicitly opened with [`permit_impure`](Self::permit_impure).
    pub fn register_impure<F>(
        &mut self,
        name: &str,
        min_args: usize,
        max_args: Option<usize>,
        f: F,
    ) -> SymbolicaResult<()>
    where
        F: Fn(&[Value]) -> SymbolicaResult<Value> + Send + Sync + 'static,
    {
        if !self.impure_permitted {
            return Err(SymbolicaError::rule(format!(
                "impure function '{name}' requires permit_impure() on the registry"
            )));
        }
        self.functions.insert(
            name.to_string(),
            FunctionDescriptor {
                min_args,
                max_args,
                pure: false,
                callable: Callable::Plain(Box::new(f)),
            },
        );
        Ok(())
    }

    fn insert_pure<F>(&mut self, name: &str, min_args: usize, max_args: Option<usize>, f: F)
    where
        F: Fn(&[Value]) -> SymbolicaResult<Value> + Send + Sync + 'static,
    {
        self.functions.insert(
            name.to_string(),
            FunctionDescriptor {
                min_args,
                max_args,
                pure: true,
                callable: Callable::Plain(Box::new(f)),
            },
        );
    }

    fn insert_context(
        &mut self,
        name: &str,
        min_args: usize,
        max_args: Option<usize>,
        pure: bool,
        function: Box<dyn ContextFunction>,
    ) {
        self.functions.insert(
            name.to_string(),
            FunctionDescriptor {
                min_args,
                max_args,
                pure,
                callable: Callable::Context(function),
            },
        );
    }

    /// Look up a descriptor by name
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.get(name)
    }

    /// Whether `name` resolves to a registered function
    #[must_use]
    pub fn knows(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    fn checked_descriptor(&self, name: &str, argc: usize) -> SymbolicaResult<&FunctionDescriptor> {
        let descriptor = self
            .functions
            .get(name)
            .ok_or_else(|| SymbolicaError::UnknownFunction {
                name: name.to_string(),
            })?;

        let ok = argc >= descriptor.min_args
            && descriptor.max_args.is_none_or(|max| argc <= max);
        if !ok {
            return Err(SymbolicaError::Arity {
                function: name.to_string(),
                expected: descriptor.arity_label(),
                got: argc,
            });
        }
        Ok(descriptor)
    }

    /// Validate that `name` exists and accepts `argc` arguments
    pub fn validate_call(&self, name: &str, argc: usize) -> SymbolicaResult<()> {
        self.checked_descriptor(name, argc).map(|_| ())
    }

    /// Call a function with already-evaluated arguments
    pub fn call(
        &self,
        name: &str,
        args: &[Value],
        ctx: &EvalContext<'_>,
    ) -> SymbolicaResult<Value> {
        match &self.checked_descriptor(name, args.len())?.callable {
            Callable::Plain(f) => f(args),
            Callable::Context(f) => f.call(args, ctx),
        }
    }

    /// Names of all registered functions, sorted
    #[must_use]
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ---------------------------------------------------------------------------------------------
// Plain built-ins
// ---------------------------------------------------------------------------------------------

fn type_err(function: &str, expected: &str, got: &Value) -> SymbolicaError {
    SymbolicaError::type_error(format!(
        "{function} expects {expected}, got {}",
        got.type_name()
    ))
}

fn builtin_len(args: &[Value]) -> SymbolicaResult<Value> {
    let len = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(map) => map.len(),
        Value::Null => 0,
        other => return Err(type_err("len()", "string, list, or map", other)),
    };
    Ok(Value::Int(len as i64))
}

fn builtin_sum(args: &[Value]) -> SymbolicaResult<Value> {
    let items = match &args[0] {
        Value::List(items) => items,
        Value::Null => return Ok(Value::Int(0)),
        other => return Err(type_err("sum()", "list", other)),
    };

    let mut int_sum = 0i64;
    let mut float_sum = 0f64;
    let mut all_ints = true;
    for item in items {
        match item {
            Value::Int(i) => {
                int_sum += i;
                #[allow(clippy::cast_precision_loss)]
                {
                    float_sum += *i as f64;
                }
            }
            Value::Float(f) => {
                all_ints = false;
                float_sum += f;
            }
            other => return Err(type_err("sum()", "numeric elements", other)),
        }
    }
    Ok(if all_ints {
        Value::Int(int_sum)
    } else {
        Value::Float(float_sum)
    })
}

fn builtin_abs(args: &[Value]) -> SymbolicaResult<Value> {
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(i.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(type_err("abs()", "numeric", other)),
    }
}

fn builtin_min_max(args: &[Value], want_max: bool) -> SymbolicaResult<Value> {
    let name = if want_max { "max()" } else { "min()" };
    let candidates: &[Value] = match args {
        [Value::List(items)] => items.as_slice(),
        _ => args,
    };
    if candidates.is_empty() {
        return Err(SymbolicaError::type_error(format!("{name} of an empty sequence")));
    }

    let mut best = &candidates[0];
    for candidate in &candidates[1..] {
        let ordering = candidate
            .partial_cmp(best)
            .ok_or_else(|| {
                SymbolicaError::type_error(format!(
                    "{name} cannot compare {} with {}",
                    candidate.type_name(),
                    best.type_name()
                ))
            })?;
        let replace = if want_max {
            ordering == std::cmp::Ordering::Greater
        } else {
            ordering == std::cmp::Ordering::Less
        };
        if replace {
            best = candidate;
        }
    }
    Ok(best.clone())
}

fn string_edge_check(value: &Value, edge: &Value, start: bool) -> Value {
    if matches!(value, Value::Null) || matches!(edge, Value::Null) {
        return Value::Bool(false);
    }
    let (value, edge) = (value.to_string(), edge.to_string());
    Value::Bool(if start {
        value.starts_with(&edge)
    } else {
        value.ends_with(&edge)
    })
}

fn builtin_contains(args: &[Value]) -> SymbolicaResult<Value> {
    let found = match (&args[0], &args[1]) {
        (Value::Null, _) => false,
        (Value::String(haystack), needle) => haystack.contains(&needle.to_string()),
        (Value::List(items), needle) => items.contains(needle),
        (Value::Map(map), Value::String(key)) => map.contains_key(key),
        (container, _) => {
            return Err(type_err("contains()", "string, list, or map", container));
        }
    };
    Ok(Value::Bool(found))
}

fn builtin_to_int(args: &[Value]) -> SymbolicaResult<Value> {
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        #[allow(clippy::cast_possible_truncation)]
        Value::Float(f) => Ok(Value::Int(*f as i64)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| SymbolicaError::type_error(format!("to_int() cannot parse '{s}'"))),
        other => Err(type_err("to_int()", "numeric, bool, or string", other)),
    }
}

fn builtin_to_float(args: &[Value]) -> SymbolicaResult<Value> {
    match &args[0] {
        #[allow(clippy::cast_precision_loss)]
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| SymbolicaError::type_error(format!("to_float() cannot parse '{s}'"))),
        other => Err(type_err("to_float()", "numeric, bool, or string", other)),
    }
}

// ---------------------------------------------------------------------------------------------
// Context-aware built-ins: temporal functions and PROMPT
// ---------------------------------------------------------------------------------------------

fn expect_key(function: &str, value: &Value) -> SymbolicaResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(type_err(function, "string key", other)),
    }
}

fn expect_f64(function: &str, value: &Value) -> SymbolicaResult<f64> {
    value.as_f64().ok_or_else(|| type_err(function, "numeric", value))
}

fn window_duration(function: &str, value: &Value) -> SymbolicaResult<Duration> {
    let seconds = expect_f64(function, value)?;
    if seconds < 0.0 {
        return Err(SymbolicaError::type_error(format!(
            "{function} window must be non-negative"
        )));
    }
    #[allow(clippy::cast_possible_truncation)]
    let millis = (seconds * 1000.0) as i64;
    Ok(Duration::milliseconds(millis))
}

struct RecordFunction;

impl ContextFunction for RecordFunction {
    fn call(&self, args: &[Value], ctx: &EvalContext<'_>) -> SymbolicaResult<Value> {
        let key = expect_key("record()", &args[0])?;
        let value = expect_f64("record()", &args[1])?;
        let at: DateTime<Utc> = match args.get(2) {
            Some(ts) => {
                let epoch = expect_f64("record()", ts)?;
                #[allow(clippy::cast_possible_truncation)]
                let millis = (epoch * 1000.0) as i64;
                DateTime::from_timestamp_millis(millis)
                    .ok_or_else(|| SymbolicaError::type_error("record() timestamp out of range"))?
            }
            None => ctx.now,
        };
        ctx.temporal.record(&key, value, at);
        Ok(Value::Null)
    }
}

#[derive(Clone, Copy)]
enum Agg {
    Avg,
    Max,
    Min,
    Count,
}

struct WindowAggFunction(Agg);

impl ContextFunction for WindowAggFunction {
    fn call(&self, args: &[Value], ctx: &EvalContext<'_>) -> SymbolicaResult<Value> {
        let key = expect_key("window aggregate", &args[0])?;
        let window = window_duration("window aggregate", &args[1])?;

        // Empty windows surface Null, not zero, so rules can tell
        // "no data" apart from "data equals 0"
        Ok(match self.0 {
            Agg::Avg => ctx
                .temporal
                .avg_in_window(&key, window, ctx.now)
                .map_or(Value::Null, Value::Float),
            Agg::Max => ctx
                .temporal
                .max_in_window(&key, window, ctx.now)
                .map_or(Value::Null, Value::Float),
            Agg::Min => ctx
                .temporal
                .min_in_window(&key, window, ctx.now)
                .map_or(Value::Null, Value::Float),
            Agg::Count => ctx
                .temporal
                .count_in_window(&key, window, ctx.now)
                .map_or(Value::Null, Value::Int),
        })
    }
}

struct SustainedFunction(SustainedCmp);

impl ContextFunction for SustainedFunction {
    fn call(&self, args: &[Value], ctx: &EvalContext<'_>) -> SymbolicaResult<Value> {
        let key = expect_key("sustained check", &args[0])?;
        let threshold = expect_f64("sustained check", &args[1])?;
        let window = window_duration("sustained check", &args[2])?;
        Ok(Value::Bool(
            ctx.temporal.sustained(&key, threshold, window, self.0, ctx.now),
        ))
    }
}

struct TtlFactFunction {
    presence: bool,
}

impl ContextFunction for TtlFactFunction {
    fn call(&self, args: &[Value], ctx: &EvalContext<'_>) -> SymbolicaResult<Value> {
        let key = expect_key("ttl_fact()", &args[0])?;
        if self.presence {
            Ok(Value::Bool(ctx.temporal.has_ttl_fact(&key, ctx.now)))
        } else {
            Ok(ctx.temporal.ttl_fact(&key, ctx.now).unwrap_or(Value::Null))
        }
    }
}

struct PromptFunction;

impl ContextFunction for PromptFunction {
    fn call(&self, args: &[Value], ctx: &EvalContext<'_>) -> SymbolicaResult<Value> {
        let template = match &args[0] {
            Value::String(s) => s.clone(),
            other => return Err(type_err("PROMPT()", "string template", other)),
        };
        let return_type = match args.get(1) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => return Err(type_err("PROMPT()", "string return type", other)),
            None => "str".to_string(),
        };
        let max_tokens = match args.get(2) {
            Some(value) => Some(
                u32::try_from(value.as_int().ok_or_else(|| {
                    type_err("PROMPT()", "integer max_tokens", value)
                })?)
                .map_err(|_| SymbolicaError::type_error("PROMPT() max_tokens out of range"))?,
            ),
            None => None,
        };

        let prompt = substitute_placeholders(&template, ctx)?;

        if let Some(cache) = ctx.prompt_cache {
            if let Some(cached) = cache.borrow().get(&prompt) {
                return Ok(cached.clone());
            }
        }

        let adapter = ctx.prompt_adapter.ok_or(SymbolicaError::PromptUnavailable)?;
        let response = adapter
            .complete(&prompt, max_tokens)
            .map_err(|e| SymbolicaError::Prompt {
                message: e.to_string(),
            })?;

        let value = coerce_prompt_response(&response, &return_type)?;
        if let Some(cache) = ctx.prompt_cache {
            cache.borrow_mut().insert(prompt, value.clone());
        }
        Ok(value)
    }
}

/// Replace `{name}` placeholders with environment values
fn substitute_placeholders(template: &str, ctx: &EvalContext<'_>) -> SymbolicaResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();

    while let Some(ch) = chars.next() {
        if ch != '{' {
            out.push(ch);
            continue;
        }
        let mut name = String::new();
        let mut closed = false;
        for inner in chars.by_ref() {
            if inner == '}' {
                closed = true;
                break;
            }
            name.push(inner);
        }
        let is_ident = closed
            && !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !name.starts_with(|c: char| c.is_ascii_digit());
        if !is_ident {
            // Not a placeholder; keep the braces verbatim
            out.push('{');
            out.push_str(&name);
            if closed {
                out.push('}');
            }
            continue;
        }
        let value = ctx
            .lookup(&name)
            .ok_or_else(|| SymbolicaError::undefined_field(&name))?;
        out.push_str(&value.to_string());
    }
    Ok(out)
}

fn coerce_prompt_response(response: &str, return_type: &str) -> SymbolicaResult<Value> {
    match return_type {
        "str" | "string" => Ok(Value::String(response.trim().to_string())),
        "int" => extract_number(response)
            .map(|n| {
                #[allow(clippy::cast_possible_truncation)]
                let truncated = n as i64;
                Value::Int(truncated)
            })
            .ok_or_else(|| SymbolicaError::Prompt {
                message: format!("no integer found in response '{response}'"),
            }),
        "float" => extract_number(response).map(Value::Float).ok_or_else(|| {
            SymbolicaError::Prompt {
                message: format!("no number found in response '{response}'"),
            }
        }),
        "bool" => {
            let lowered = response.trim().to_lowercase();
            Ok(Value::Bool(
                ["true", "yes", "y", "1"].iter().any(|t| lowered.starts_with(t)),
            ))
        }
        other => Err(SymbolicaError::Prompt {
            message: format!("unsupported return type '{other}'"),
        }),
    }
}

fn extract_number(response: &str) -> Option<f64> {
    response
        .split(|c: char| !(c.is_ascii_digit() || c == '-' || c == '.'))
        .filter(|token| !token.is_empty())
        .find_map(|token| token.parse::<f64>().ok())
}
