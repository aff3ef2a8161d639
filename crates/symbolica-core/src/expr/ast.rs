//! Abstract syntax tree for condition and template expressions

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use symbolica_types::Value;

/// AST node representing an expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Literal value
    Literal(Value),

    /// Field reference; reading an absent name is an error
    Ref(String),

    /// Field reference produced by the `x or <literal>` rewrite; reading an
    /// absent name yields `Null` so the fallback literal wins
    SafeRef(String),

    /// Binary operation (a + b, a > b, a and b, ...)
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Unary operation (-a, not a)
    Unary { op: UnaryOp, operand: Box<Expr> },

    /// Function call (recent_avg('cpu', 300), len(items))
    Call { name: String, args: Vec<Expr> },

    /// Container indexing: list by position, map by key
    Index {
        container: Box<Expr>,
        key: Box<Expr>,
    },

    /// Membership test (`x in [1, 2, 3]`)
    In {
        item: Box<Expr>,
        container: Box<Expr>,
    },

    /// List literal ([1, 2, 3])
    ListLiteral(Vec<Expr>),

    /// Ternary conditional (`if cond then a else b`)
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },

    /// Structured conjunction: true iff every child is truthy
    All(Vec<Expr>),

    /// Structured disjunction: true iff some child is truthy
    Any(Vec<Expr>),

    /// Structured negation
    Not(Box<Expr>),
}

/// Binary operators supported by the expression language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,

    // Logical
    And,
    Or,
}

/// Unary operators supported by the expression language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Logical negation (`not x`)
    Not,
    /// Numeric negation (`-x`)
    Negate,
}

impl BinaryOp {
    /// Binding power of this operator (higher = tighter)
    #[must_use]
    pub const fn precedence(&self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Equal
            | Self::NotEqual
            | Self::LessThan
            | Self::LessThanOrEqual
            | Self::GreaterThan
            | Self::GreaterThanOrEqual => 3,
            Self::Add | Self::Subtract => 4,
            Self::Multiply | Self::Divide | Self::Modulo => 5,
        }
    }

    /// Surface spelling of this operator
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

impl Expr {
    /// Create a literal integer expression
    #[must_use]
    pub const fn int(value: i64) -> Self {
        Self::Literal(Value::Int(value))
    }

    /// Create a literal float expression
    #[must_use]
    pub const fn float(value: f64) -> Self {
        Self::Literal(Value::Float(value))
    }

    /// Create a literal string expression
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Literal(Value::String(value.into()))
    }

    /// Create a literal boolean expression
    #[must_use]
    pub const fn bool(value: bool) -> Self {
        Self::Literal(Value::Bool(value))
    }

    /// Create a null literal expression
    #[must_use]
    pub const fn null() -> Self {
        Self::Literal(Value::Null)
    }

    /// Create a field reference
    #[must_use]
    pub fn field(name: &str) -> Self {
        Self::Ref(name.to_string())
    }

    /// Create a binary operation
    #[must_use]
    pub fn binary(left: Self, op: BinaryOp, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Create a unary operation
    #[must_use]
    pub fn unary(op: UnaryOp, operand: Self) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// Create a function call
    #[must_use]
    pub fn call(name: &str, args: Vec<Self>) -> Self {
        Self::Call {
            name: name.to_string(),
            args,
        }
    }

    /// Binding power of this node when printed; used to decide parentheses
    const fn binding(&self) -> u8 {
        match self {
            Self::Conditional { .. } => 0,
            Self::Binary { op, .. } => op.precedence(),
            Self::In { .. } => 3,
            Self::Unary { .. } => 6,
            Self::Call { .. } | Self::Index { .. } => 7,
            _ => 8,
        }
    }

    fn fmt_at(&self, f: &mut fmt::Formatter<'_>, min_binding: u8) -> fmt::Result {
        let needs_parens = self.binding() < min_binding;
        if needs_parens {
            write!(f, "(")?;
        }
        match self {
            Self::Literal(value) => write!(f, "{}", value.literal_repr())?,
            Self::Ref(name) | Self::SafeRef(name) => write!(f, "{name}")?,
            Self::Binary { op, left, right } => {
                let prec = op.precedence();
                left.fmt_at(f, prec)?;
                write!(f, " {} ", op.symbol())?;
                right.fmt_at(f, prec + 1)?;
            }
            Self::Unary { op, operand } => {
                match op {
                    UnaryOp::Not => write!(f, "not ")?,
                    UnaryOp::Negate => write!(f, "-")?,
                }
                operand.fmt_at(f, 6)?;
            }
            Self::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    arg.fmt_at(f, 0)?;
                }
                write!(f, ")")?;
            }
            Self::Index { container, key } => {
                container.fmt_at(f, 7)?;
                write!(f, "[")?;
                key.fmt_at(f, 0)?;
                write!(f, "]")?;
            }
            Self::In { item, container } => {
                item.fmt_at(f, 4)?;
                write!(f, " in ")?;
                container.fmt_at(f, 4)?;
            }
            Self::ListLiteral(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_at(f, 0)?;
                }
                write!(f, "]")?;
            }
            Self::Conditional {
                cond,
                then,
                otherwise,
            } => {
                write!(f, "if ")?;
                cond.fmt_at(f, 0)?;
                write!(f, " then ")?;
                then.fmt_at(f, 0)?;
                write!(f, " else ")?;
                otherwise.fmt_at(f, 0)?;
            }
            // Structured combinators render the way the surface loader
            // flattens them, each child fully parenthesized
            Self::All(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " and ")?;
                    }
                    write!(f, "(")?;
                    child.fmt_at(f, 0)?;
                    write!(f, ")")?;
                }
            }
            Self::Any(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " or ")?;
                    }
                    write!(f, "(")?;
                    child.fmt_at(f, 0)?;
                    write!(f, ")")?;
                }
            }
            Self::Not(inner) => {
                write!(f, "not (")?;
                inner.fmt_at(f, 0)?;
                write!(f, ")")?;
            }
        }
        if needs_parens {
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_at(f, 0)
    }
}

/// Extract all field names referenced by an expression, sorted
#[must_use]
pub fn extract_refs(expr: &Expr) -> Vec<String> {
    let mut refs = HashSet::new();
    collect_refs(expr, &mut refs);
    let mut result: Vec<String> = refs.into_iter().collect();
    result.sort();
    result
}

/// Extract every function call in an expression as (name, arg count)
#[must_use]
pub fn extract_calls(expr: &Expr) -> Vec<(String, usize)> {
    let mut calls = Vec::new();
    collect_calls(expr, &mut calls);
    calls
}

fn collect_calls(expr: &Expr, calls: &mut Vec<(String, usize)>) {
    match expr {
        Expr::Call { name, args } => {
            calls.push((name.clone(), args.len()));
            for arg in args {
                collect_calls(arg, calls);
            }
        }
        Expr::Binary { left, right, .. } => {
            collect_calls(left, calls);
            collect_calls(right, calls);
        }
        Expr::Unary { operand, .. } => collect_calls(operand, calls),
        Expr::Index { container, key } => {
            collect_calls(container, calls);
            collect_calls(key, calls);
        }
        Expr::In { item, container } => {
            collect_calls(item, calls);
            collect_calls(container, calls);
        }
        Expr::ListLiteral(items) => {
            for item in items {
                collect_calls(item, calls);
            }
        }
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => {
            collect_calls(cond, calls);
            collect_calls(then, calls);
            collect_calls(otherwise, calls);
        }
        Expr::All(children) | Expr::Any(children) => {
            for child in children {
                collect_calls(child, calls);
            }
        }
        Expr::Not(inner) => collect_calls(inner, calls),
        Expr::Literal(_) | Expr::Ref(_) | Expr::SafeRef(_) => {}
    }
}

fn collect_refs(expr: &Expr, refs: &mut HashSet<String>) {
    match expr {
        Expr::Ref(name) | Expr::SafeRef(name) => {
            refs.insert(name.clone());
        }
        Expr::Binary { left, right, .. } => {
            collect_refs(left, refs);
            collect_refs(right, refs);
        }
        Expr::Unary { operand, .. } => collect_refs(operand, refs),
        // Function names are not field references; only arguments count
        Expr::Call { args, .. } => {
            for arg in args {
                collect_refs(arg, refs);
            }
        }
        Expr::Index { container, key } => {
            collect_refs(container, refs);
            collect_refs(key, refs);
        }
        Expr::In { item, container } => {
            collect_refs(item, refs);
            collect_refs(container, refs);
        }
        Expr::ListLiteral(items) => {
            for item in items {
                collect_refs(item, refs);
            }
        }
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => {
            collect_refs(cond, refs);
            collect_refs(then, refs);
            collect_refs(otherwise, refs);
        }
        Expr::All(children) | Expr::Any(children) => {
            for child in children {
                collect_refs(child, refs);
            }
        }
        Expr::Not(inner) => collect_refs(inner, refs),
        Expr::Literal(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_table() {
        assert!(BinaryOp::Multiply.precedence() > BinaryOp::Add.precedence());
        assert!(BinaryOp::Add.precedence() > BinaryOp::Equal.precedence());
        assert!(BinaryOp::And.precedence() > BinaryOp::Or.precedence());
    }

    #[test]
    fn test_ref_extraction_skips_function_names() {
        let expr = Expr::binary(
            Expr::field("amount"),
            BinaryOp::Add,
            Expr::call("max", vec![Expr::field("tax"), Expr::int(100)]),
        );
        assert_eq!(extract_refs(&expr), vec!["amount", "tax"]);
    }

    #[test]
    fn test_display_minimal_parens() {
        let expr = Expr::binary(
            Expr::int(2),
            BinaryOp::Add,
            Expr::binary(Expr::int(3), BinaryOp::Multiply, Expr::int(4)),
        );
        assert_eq!(expr.to_string(), "2 + 3 * 4");

        let expr = Expr::binary(
            Expr::binary(Expr::int(2), BinaryOp::Add, Expr::int(3)),
            BinaryOp::Multiply,
            Expr::int(4),
        );
        assert_eq!(expr.to_string(), "(2 + 3) * 4");
    }

    #[test]
    fn test_display_right_associative_parens() {
        // a - (b - c) keeps its parens; (a - b) - c does not
        let expr = Expr::binary(
            Expr::field("a"),
            BinaryOp::Subtract,
            Expr::binary(Expr::field("b"), BinaryOp::Subtract, Expr::field("c")),
        );
        assert_eq!(expr.to_string(), "a - (b - c)");
    }

    #[test]
    fn test_display_structured_all() {
        let expr = Expr::All(vec![
            Expr::binary(Expr::field("x"), BinaryOp::GreaterThan, Expr::int(0)),
            Expr::binary(Expr::field("y"), BinaryOp::Equal, Expr::string("a")),
        ]);
        assert_eq!(expr.to_string(), "(x > 0) and (y == 'a')");
    }

    #[test]
    fn test_display_string_literal_quoted() {
        let expr = Expr::binary(
            Expr::field("tier"),
            BinaryOp::Equal,
            Expr::string("vip"),
        );
        assert_eq!(expr.to_string(), "tier == 'vip'");
    }
}
