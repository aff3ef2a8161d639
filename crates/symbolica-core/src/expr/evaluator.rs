//! Expression evaluator
//!
//! Evaluates AST nodes against a fact environment (original facts overlaid
//! by accumulated writes), producing a `Value` or a typed failure. Boolean
//! operators short-circuit with truthiness but always report `Bool`;
//! numeric operators promote `Int` to `Float` when mixed; reads and calls
//! land in the observation log the executor attaches to rule traces.

use crate::error::{SymbolicaError, SymbolicaResult};
use crate::expr::ast::{BinaryOp, Expr, UnaryOp};
use crate::expr::{EvalContext, Observations};
use symbolica_types::Value;

/// Evaluate an expression in the given environment
pub fn evaluate(
    expr: &Expr,
    ctx: &EvalContext<'_>,
    obs: &mut Observations,
) -> SymbolicaResult<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),

        Expr::Ref(name) => match ctx.lookup(name) {
            Some(value) => {
                obs.record_read(name, value);
                Ok(value.clone())
            }
            None => Err(SymbolicaError::undefined_field(name)),
        },

        // Safe read: the `x or <literal>` idiom maps an absent name to Null
        // so the short-circuit hands back the default
        Expr::SafeRef(name) => match ctx.lookup(name) {
            Some(value) => {
                obs.record_read(name, value);
                Ok(value.clone())
            }
            None => Ok(Value::Null),
        },

        Expr::Binary { op, left, right } => match op {
            BinaryOp::And => {
                let lhs = evaluate(left, ctx, obs)?;
                if !lhs.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                let rhs = evaluate(right, ctx, obs)?;
                Ok(Value::Bool(rhs.is_truthy()))
            }
            BinaryOp::Or => {
                let lhs = evaluate(left, ctx, obs)?;
                if lhs.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                let rhs = evaluate(right, ctx, obs)?;
                Ok(Value::Bool(rhs.is_truthy()))
            }
            _ => {
                let lhs = evaluate(left, ctx, obs)?;
                let rhs = evaluate(right, ctx, obs)?;
                apply_binary(*op, &lhs, &rhs)
            }
        },

        Expr::Unary { op, operand } => {
            let value = evaluate(operand, ctx, obs)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                UnaryOp::Negate => match value {
                    Value::Int(i) => Ok(Value::Int(-i)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(SymbolicaError::type_error(format!(
                        "cannot negate {}",
                        other.type_name()
                    ))),
                },
            }
        }

        Expr::Call { name, args } => {
            if let Some(deadline) = ctx.deadline {
                if deadline.expired() {
                    return Err(SymbolicaError::Timeout {
                        elapsed_ms: deadline.elapsed_ms(),
                    });
                }
            }
            let mut arg_values = Vec::with_capacity(args.len());
            for arg in args {
                arg_values.push(evaluate(arg, ctx, obs)?);
            }
            let pure = ctx.registry.descriptor(name).is_some_and(|d| d.is_pure());
            obs.record_call(name, pure);
            ctx.registry.call(name, &arg_values, ctx)
        }

        Expr::Index { container, key } => {
            let container = evaluate(container, ctx, obs)?;
            let key = evaluate(key, ctx, obs)?;
            index_value(&container, &key)
        }

        Expr::In { item, container } => {
            let item = evaluate(item, ctx, obs)?;
            let container = evaluate(container, ctx, obs)?;
            membership(&item, &container).map(Value::Bool)
        }

        Expr::ListLiteral(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(evaluate(item, ctx, obs)?);
            }
            Ok(Value::List(values))
        }

        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => {
            let decided = evaluate(cond, ctx, obs)?;
            if decided.is_truthy() {
                evaluate(then, ctx, obs)
            } else {
                evaluate(otherwise, ctx, obs)
            }
        }

        Expr::All(children) => {
            for child in children {
                if !evaluate(child, ctx, obs)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }

        Expr::Any(children) => {
            for child in children {
                if evaluate(child, ctx, obs)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }

        Expr::Not(inner) => {
            let value = evaluate(inner, ctx, obs)?;
            Ok(Value::Bool(!value.is_truthy()))
        }
    }
}

/// Structural equality with Int/Float promotion
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    if left.is_numeric() && right.is_numeric() {
        return left.as_f64() == right.as_f64();
    }
    left == right
}

fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> SymbolicaResult<Value> {
    use Value::{Int, String as VStr};

    match op {
        BinaryOp::Equal => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::NotEqual => Ok(Value::Bool(!values_equal(left, right))),

        BinaryOp::LessThan
        | BinaryOp::LessThanOrEqual
        | BinaryOp::GreaterThan
        | BinaryOp::GreaterThanOrEqual => {
            let ordering = left.partial_cmp(right).ok_or_else(|| {
                SymbolicaError::type_error(format!(
                    "cannot compare {} with {}",
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            let result = match op {
                BinaryOp::LessThan => ordering == std::cmp::Ordering::Less,
                BinaryOp::LessThanOrEqual => ordering != std::cmp::Ordering::Greater,
                BinaryOp::GreaterThan => ordering == std::cmp::Ordering::Greater,
                BinaryOp::GreaterThanOrEqual => ordering != std::cmp::Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }

        BinaryOp::Add => match (left, right) {
            (Int(a), Int(b)) => Ok(Int(a + b)),
            (VStr(a), VStr(b)) => Ok(VStr(format!("{a}{b}"))),
            _ => numeric_op(op, left, right, |a, b| a + b),
        },
        BinaryOp::Subtract => match (left, right) {
            (Int(a), Int(b)) => Ok(Int(a - b)),
            _ => numeric_op(op, left, right, |a, b| a - b),
        },
        BinaryOp::Multiply => match (left, right) {
            (Int(a), Int(b)) => Ok(Int(a * b)),
            _ => numeric_op(op, left, right, |a, b| a * b),
        },
        BinaryOp::Divide => match (left, right) {
            (Int(_), Int(0)) => Err(SymbolicaError::DivisionByZero),
            (Int(a), Int(b)) => Ok(Int(a / b)),
            _ => {
                if right.as_f64() == Some(0.0) {
                    return Err(SymbolicaError::DivisionByZero);
                }
                numeric_op(op, left, right, |a, b| a / b)
            }
        },
        BinaryOp::Modulo => match (left, right) {
            (Int(_), Int(0)) => Err(SymbolicaError::DivisionByZero),
            (Int(a), Int(b)) => Ok(Int(a % b)),
            _ => {
                if right.as_f64() == Some(0.0) {
                    return Err(SymbolicaError::DivisionByZero);
                }
                numeric_op(op, left, right, |a, b| a % b)
            }
        },

        BinaryOp::And | BinaryOp::Or => Err(SymbolicaError::internal(
            "boolean operators must short-circuit in evaluate()",
        )),
    }
}

// Keep the generic mixed-number path out of each arm
fn numeric_op(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    f: impl FnOnce(f64, f64) -> f64,
) -> SymbolicaResult<Value> {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::Float(f(a, b))),
        _ => Err(SymbolicaError::type_error(format!(
            "cannot apply {} to {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn index_value(container: &Value, key: &Value) -> SymbolicaResult<Value> {
    match (container, key) {
        (Value::List(items), Value::Int(idx)) => {
            let len = items.len() as i64;
            let effective = if *idx < 0 { len + idx } else { *idx };
            if effective < 0 || effective >= len {
                return Err(SymbolicaError::type_error(format!(
                    "list index {idx} out of bounds for length {len}"
                )));
            }
            #[allow(clippy::cast_sign_loss)]
            let position = effective as usize;
            Ok(items[position].clone())
        }
        // Missing map keys read as Null so rules can use null checks
        (Value::Map(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or(Value::Null))
        }
        (Value::String(s), Value::Int(idx)) => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let effective = if *idx < 0 { len + idx } else { *idx };
            if effective < 0 || effective >= len {
                return Err(SymbolicaError::type_error(format!(
                    "string index {idx} out of bounds for length {len}"
                )));
            }
            #[allow(clippy::cast_sign_loss)]
            let position = effective as usize;
            Ok(Value::String(chars[position].to_string()))
        }
        (container, key) => Err(SymbolicaError::type_error(format!(
            "cannot index {} with {}",
            container.type_name(),
            key.type_name()
        ))),
    }
}

fn membership(item: &Value, container: &Value) -> SymbolicaResult<bool> {
    match container {
        Value::List(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::String(haystack) => match item {
            Value::String(needle) => Ok(haystack.contains(needle)),
            other => Err(SymbolicaError::type_error(format!(
                "cannot test {} membership in a string",
                other.type_name()
            ))),
        },
        Value::Map(map) => match item {
            Value::String(key) => Ok(map.contains_key(key)),
            other => Err(SymbolicaError::type_error(format!(
                "cannot test {} membership in a map",
                other.type_name()
            ))),
        },
        other => Err(SymbolicaError::type_error(format!(
            "'in' expects a list, string, or map, got {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse_expression;
    use crate::functions::FunctionRegistry;
    use crate::temporal::TemporalStore;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn eval_with(
        source: &str,
        facts: &[(&str, Value)],
    ) -> (SymbolicaResult<Value>, Observations) {
        let registry = FunctionRegistry::with_builtins();
        let temporal = TemporalStore::new();
        let facts: HashMap<String, Value> =
            facts.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect();
        let overlay = HashMap::new();
        let ctx = EvalContext {
            facts: &facts,
            overlay: &overlay,
            registry: &registry,
            temporal: &temporal,
            now: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            deadline: None,
            cancelled: None,
            prompt_adapter: None,
            prompt_cache: None,
        };
        let expr = parse_expression(source).unwrap();
        let mut obs = Observations::default();
        let result = evaluate(&expr, &ctx, &mut obs);
        (result, obs)
    }

    fn eval_ok(source: &str, facts: &[(&str, Value)]) -> Value {
        eval_with(source, facts).0.unwrap()
    }

    #[test]
    fn test_arithmetic_promotion() {
        assert_eq!(eval_ok("2 + 3", &[]), Value::Int(5));
        assert_eq!(eval_ok("2 + 3.5", &[]), Value::Float(5.5));
        assert_eq!(eval_ok("7 / 2", &[]), Value::Int(3));
        assert_eq!(eval_ok("7.0 / 2", &[]), Value::Float(3.5));
        assert_eq!(eval_ok("7 % 4", &[]), Value::Int(3));
        assert_eq!(eval_ok("-3 * 2", &[]), Value::Int(-6));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(
            eval_ok("'ab' + 'cd'", &[]),
            Value::String("abcd".into())
        );
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(eval_with("1 / 0", &[]).0, Err(SymbolicaError::DivisionByZero));
        assert_eq!(eval_with("1.5 % 0.0", &[]).0, Err(SymbolicaError::DivisionByZero));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval_ok("2 < 3", &[]), Value::Bool(true));
        assert_eq!(eval_ok("2 >= 2.0", &[]), Value::Bool(true));
        assert_eq!(eval_ok("'a' < 'b'", &[]), Value::Bool(true));
        assert_eq!(eval_ok("1 == 1.0", &[]), Value::Bool(true));
        assert_eq!(eval_ok("'1' == 1", &[]), Value::Bool(false));
        assert_eq!(eval_ok("null == null", &[]), Value::Bool(true));
    }

    #[test]
    fn test_cross_category_ordering_is_type_error() {
        let (result, _) = eval_with("'10' > 5", &[]);
        assert!(matches!(result, Err(SymbolicaError::Type { .. })));
    }

    #[test]
    fn test_boolean_short_circuit_and_truthiness() {
        // Right side would fail; short-circuit avoids it
        assert_eq!(eval_ok("false and missing_field", &[]), Value::Bool(false));
        assert_eq!(eval_ok("true or missing_field", &[]), Value::Bool(true));

        // Non-bool operands go through truthiness, result stays Bool
        assert_eq!(eval_ok("1 and 'x'", &[]), Value::Bool(true));
        assert_eq!(eval_ok("0 or ''", &[]), Value::Bool(false));
        assert_eq!(eval_ok("not ''", &[]), Value::Bool(true));
    }

    #[test]
    fn test_reference_reads() {
        let facts = [("score", Value::Int(800))];
        assert_eq!(eval_ok("score > 750", &facts), Value::Bool(true));

        let (result, _) = eval_with("missing > 1", &facts);
        assert_eq!(
            result,
            Err(SymbolicaError::undefined_field("missing"))
        );
    }

    #[test]
    fn test_null_versus_missing_distinction() {
        // A fact bound to Null reads fine and is falsy
        let facts = [("opt", Value::Null)];
        assert_eq!(eval_ok("opt or 5", &facts), Value::Bool(true));
        assert_eq!(eval_ok("not opt", &facts), Value::Bool(true));

        // Bare read of a missing name is an error ...
        let (result, _) = eval_with("opt2 == null", &facts);
        assert!(matches!(result, Err(SymbolicaError::UndefinedField { .. })));

        // ... but the safe-read idiom swallows the miss
        assert_eq!(eval_ok("opt2 or 5", &facts), Value::Bool(true));
    }

    #[test]
    fn test_membership_and_indexing() {
        let facts = [
            (
                "tiers",
                Value::List(vec![Value::String("vip".into()), Value::String("gold".into())]),
            ),
            ("tier", Value::String("vip".into())),
        ];
        assert_eq!(eval_ok("tier in tiers", &facts), Value::Bool(true));
        assert_eq!(eval_ok("tiers[0] == 'vip'", &facts), Value::Bool(true));
        assert_eq!(eval_ok("tiers[-1] == 'gold'", &facts), Value::Bool(true));
        assert_eq!(eval_ok("'ip' in tier", &facts), Value::Bool(true));

        let (result, _) = eval_with("tiers[9]", &facts);
        assert!(matches!(result, Err(SymbolicaError::Type { .. })));
    }

    #[test]
    fn test_map_index_missing_key_is_null() {
        let mut limits = HashMap::new();
        limits.insert("daily".to_string(), Value::Int(100));
        let facts = [("limits", Value::Map(limits))];
        assert_eq!(eval_ok("limits['daily']", &facts), Value::Int(100));
        assert_eq!(
            eval_ok("is_null(limits['weekly'])", &facts),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_conditional() {
        let facts = [("x", Value::Int(4))];
        assert_eq!(eval_ok("if x > 0 then x else 0", &facts), Value::Int(4));
        assert_eq!(eval_ok("if x > 9 then x else 0", &facts), Value::Int(0));
    }

    #[test]
    fn test_structured_combinators() {
        use crate::expr::ast::Expr;
        let registry = FunctionRegistry::with_builtins();
        let temporal = TemporalStore::new();
        let facts: HashMap<String, Value> =
            [("x".to_string(), Value::Int(5))].into_iter().collect();
        let overlay = HashMap::new();
        let ctx = EvalContext {
            facts: &facts,
            overlay: &overlay,
            registry: &registry,
            temporal: &temporal,
            now: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            deadline: None,
            cancelled: None,
            prompt_adapter: None,
            prompt_cache: None,
        };
        let mut obs = Observations::default();

        let all = Expr::All(vec![
            parse_expression("x > 0").unwrap(),
            parse_expression("x < 10").unwrap(),
        ]);
        assert_eq!(evaluate(&all, &ctx, &mut obs).unwrap(), Value::Bool(true));

        // Short-circuits before the failing read
        let any = Expr::Any(vec![
            parse_expression("x == 5").unwrap(),
            parse_expression("missing > 0").unwrap(),
        ]);
        assert_eq!(evaluate(&any, &ctx, &mut obs).unwrap(), Value::Bool(true));

        // A failure in a reached child propagates
        let all = Expr::All(vec![
            parse_expression("x > 0").unwrap(),
            parse_expression("missing > 0").unwrap(),
        ]);
        assert!(matches!(
            evaluate(&all, &ctx, &mut obs),
            Err(SymbolicaError::UndefinedField { .. })
        ));

        let not = Expr::Not(Box::new(parse_expression("x > 9").unwrap()));
        assert_eq!(evaluate(&not, &ctx, &mut obs).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_overlay_wins_over_facts() {
        let registry = FunctionRegistry::with_builtins();
        let temporal = TemporalStore::new();
        let facts: HashMap<String, Value> =
            [("tier".to_string(), Value::String("basic".into()))].into_iter().collect();
        let overlay: HashMap<String, Value> =
            [("tier".to_string(), Value::String("premium".into()))].into_iter().collect();
        let ctx = EvalContext {
            facts: &facts,
            overlay: &overlay,
            registry: &registry,
            temporal: &temporal,
            now: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            deadline: None,
            cancelled: None,
            prompt_adapter: None,
            prompt_cache: None,
        };
        let expr = parse_expression("tier == 'premium'").unwrap();
        let mut obs = Observations::default();
        assert_eq!(evaluate(&expr, &ctx, &mut obs).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_observation_log() {
        let (result, obs) = eval_with(
            "score > 700 and len(name) > 2",
            &[
                ("score", Value::Int(800)),
                ("name", Value::String("acme".into())),
            ],
        );
        assert_eq!(result.unwrap(), Value::Bool(true));
        assert_eq!(
            obs.reads,
            vec![
                ("score".to_string(), Value::Int(800)),
                ("name".to_string(), Value::String("acme".into())),
            ]
        );
        assert_eq!(obs.calls.len(), 1);
        assert_eq!(obs.calls[0].name, "len");
        assert!(obs.calls[0].pure);
        assert!(obs.impure_calls().is_empty());
    }

    #[test]
    fn test_unknown_function() {
        let (result, _) = eval_with("mystery(1)", &[]);
        assert!(matches!(
            result,
            Err(SymbolicaError::UnknownFunction { .. })
        ));
    }
}
