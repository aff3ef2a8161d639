//! Parser for condition and template expressions
//!
//! Implements a recursive descent parser with conventional precedence
//! (`or` < `and` < comparison < additive < multiplicative < unary) over a
//! hand-written lexer. Two surface forms resolve to the same AST: flat
//! expression strings, and nested structured `all`/`any`/`not` maps whose
//! leaves are themselves flat expressions. Parsing never evaluates
//! anything.

use crate::error::{SymbolicaError, SymbolicaResult};
use crate::expr::ast::{BinaryOp, Expr, UnaryOp};
use serde::{Deserialize, Serialize};
use std::fmt;
use symbolica_types::Value;

/// Token types recognized by the lexer
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Int(i64),
    Float(f64),
    Str(String),

    // Identifiers and keywords
    Ident(String),
    True,
    False,
    Null,
    If,
    Then,
    Else,
    And,
    Or,
    Not,
    In,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,

    // Special
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(n) => write!(f, "{n}"),
            Token::Float(n) => write!(f, "{n}"),
            Token::Str(s) => write!(f, "'{s}'"),
            Token::Ident(name) => write!(f, "{name}"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Null => write!(f, "null"),
            Token::If => write!(f, "if"),
            Token::Then => write!(f, "then"),
            Token::Else => write!(f, "else"),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::In => write!(f, "in"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::LeftParen => write!(f, "("),
            Token::RightParen => write!(f, ")"),
            Token::LeftBracket => write!(f, "["),
            Token::RightBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

/// Lexer for tokenizing expression strings
struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self) -> SymbolicaResult<Token> {
        let start = self.position;
        let mut number = String::new();
        let mut is_float = false;

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                number.push(ch);
                self.advance();
            } else if ch == '.' && !is_float && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                number.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if is_float {
            number
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| SymbolicaError::parse(start, "float literal", number.clone()))
        } else {
            number
                .parse::<i64>()
                .map(Token::Int)
                .map_err(|_| SymbolicaError::parse(start, "integer literal", number.clone()))
        }
    }

    fn read_string(&mut self, delimiter: char) -> SymbolicaResult<Token> {
        let start = self.position;
        self.advance(); // opening quote
        let mut string = String::new();

        while let Some(ch) = self.current() {
            if ch == delimiter {
                self.advance();
                return Ok(Token::Str(string));
            } else if ch == '\\' {
                self.advance();
                // The only escapes are the delimiter and the backslash itself
                match self.current() {
                    Some(c) if c == delimiter || c == '\\' => {
                        string.push(c);
                        self.advance();
                    }
                    Some(other) => {
                        return Err(SymbolicaError::parse(
                            self.position,
                            format!("escaped '{delimiter}' or '\\'"),
                            format!("\\{other}"),
                        ));
                    }
                    None => break,
                }
            } else {
                string.push(ch);
                self.advance();
            }
        }

        Err(SymbolicaError::parse(
            start,
            format!("closing {delimiter}"),
            "end of input",
        ))
    }

    fn read_identifier(&mut self) -> Token {
        let mut identifier = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                identifier.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match identifier.as_str() {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "if" => Token::If,
            "then" => Token::Then,
            "else" => Token::Else,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "in" => Token::In,
            _ => Token::Ident(identifier),
        }
    }

    /// Next token together with its starting position
    fn next_token(&mut self) -> SymbolicaResult<(Token, usize)> {
        self.skip_whitespace();
        let pos = self.position;

        let Some(ch) = self.current() else {
            return Ok((Token::Eof, pos));
        };

        let token = match ch {
            '0'..='9' => self.read_number()?,
            '\'' | '"' => self.read_string(ch)?,
            'a'..='z' | 'A'..='Z' | '_' => self.read_identifier(),
            '+' => {
                self.advance();
                Token::Plus
            }
            '-' => {
                self.advance();
                Token::Minus
            }
            '*' => {
                self.advance();
                Token::Star
            }
            '/' => {
                self.advance();
                Token::Slash
            }
            '%' => {
                self.advance();
                Token::Percent
            }
            '=' => {
                if self.peek() == Some('=') {
                    self.advance();
                    self.advance();
                    Token::Eq
                } else {
                    return Err(SymbolicaError::parse(pos, "'=='", "'='"));
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    self.advance();
                    Token::Ne
                } else {
                    return Err(SymbolicaError::parse(pos, "'!='", "'!'"));
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.advance();
                    self.advance();
                    Token::Le
                } else {
                    self.advance();
                    Token::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.advance();
                    self.advance();
                    Token::Ge
                } else {
                    self.advance();
                    Token::Gt
                }
            }
            '(' => {
                self.advance();
                Token::LeftParen
            }
            ')' => {
                self.advance();
                Token::RightParen
            }
            '[' => {
                self.advance();
                Token::LeftBracket
            }
            ']' => {
                self.advance();
                Token::RightBracket
            }
            ',' => {
                self.advance();
                Token::Comma
            }
            other => {
                return Err(SymbolicaError::parse(pos, "expression", other.to_string()));
            }
        };

        Ok((token, pos))
    }
}

/// Parser for expression strings
struct Parser {
    lexer: Lexer,
    current: Token,
    current_pos: usize,
}

impl Parser {
    fn new(input: &str) -> SymbolicaResult<Self> {
        let mut lexer = Lexer::new(input);
        let (current, current_pos) = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            current_pos,
        })
    }

    fn advance(&mut self) -> SymbolicaResult<()> {
        let (token, pos) = self.lexer.next_token()?;
        self.current = token;
        self.current_pos = pos;
        Ok(())
    }

    fn expect(&mut self, expected: &Token) -> SymbolicaResult<()> {
        if std::mem::discriminant(&self.current) == std::mem::discriminant(expected) {
            self.advance()
        } else {
            Err(SymbolicaError::parse(
                self.current_pos,
                format!("'{expected}'"),
                format!("'{}'", self.current),
            ))
        }
    }

    fn parse_expression(&mut self) -> SymbolicaResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> SymbolicaResult<Expr> {
        let mut left = self.parse_and()?;

        while matches!(self.current, Token::Or) {
            self.advance()?;
            let right = self.parse_and()?;
            // `x or <literal>` is the missing-field fallback idiom: the bare
            // read becomes a safe read so an absent name yields Null and the
            // short-circuit hands back the default
            left = match (left, right) {
                (Expr::Ref(name), right @ Expr::Literal(_)) => {
                    Expr::binary(Expr::SafeRef(name), BinaryOp::Or, right)
                }
                (left, right) => Expr::binary(left, BinaryOp::Or, right),
            };
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> SymbolicaResult<Expr> {
        let mut left = self.parse_comparison()?;

        while matches!(self.current, Token::And) {
            self.advance()?;
            let right = self.parse_comparison()?;
            left = Expr::binary(left, BinaryOp::And, right);
        }

        Ok(left)
    }

    fn parse_comparison(&mut self) -> SymbolicaResult<Expr> {
        let mut left = self.parse_additive()?;

        loop {
            let op = match self.current {
                Token::Eq => BinaryOp::Equal,
                Token::Ne => BinaryOp::NotEqual,
                Token::Lt => BinaryOp::LessThan,
                Token::Le => BinaryOp::LessThanOrEqual,
                Token::Gt => BinaryOp::GreaterThan,
                Token::Ge => BinaryOp::GreaterThanOrEqual,
                Token::In => {
                    self.advance()?;
                    let container = self.parse_additive()?;
                    left = Expr::In {
                        item: Box::new(left),
                        container: Box::new(container),
                    };
                    continue;
                }
                _ => break,
            };
            self.advance()?;
            let right = self.parse_additive()?;
            left = Expr::binary(left, op, right);
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> SymbolicaResult<Expr> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.current {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Subtract,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = Expr::binary(left, op, right);
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> SymbolicaResult<Expr> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.current {
                Token::Star => BinaryOp::Multiply,
                Token::Slash => BinaryOp::Divide,
                Token::Percent => BinaryOp::Modulo,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = Expr::binary(left, op, right);
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> SymbolicaResult<Expr> {
        match self.current {
            Token::Minus => {
                self.advance()?;
                let operand = self.parse_unary()?;
                Ok(Expr::unary(UnaryOp::Negate, operand))
            }
            Token::Not => {
                self.advance()?;
                let operand = self.parse_unary()?;
                Ok(Expr::unary(UnaryOp::Not, operand))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> SymbolicaResult<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.current {
                Token::LeftParen => {
                    // Only bare identifiers can be called
                    let Expr::Ref(name) = expr else {
                        return Err(SymbolicaError::parse(
                            self.current_pos,
                            "operator",
                            "'('",
                        ));
                    };
                    self.advance()?;
                    let mut args = Vec::new();
                    if !matches!(self.current, Token::RightParen) {
                        args.push(self.parse_expression()?);
                        while matches!(self.current, Token::Comma) {
                            self.advance()?;
                            args.push(self.parse_expression()?);
                        }
                    }
                    self.expect(&Token::RightParen)?;
                    expr = Expr::call(&name, args);
                }
                Token::LeftBracket => {
                    self.advance()?;
                    let key = self.parse_expression()?;
                    self.expect(&Token::RightBracket)?;
                    expr = Expr::Index {
                        container: Box::new(expr),
                        key: Box::new(key),
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> SymbolicaResult<Expr> {
        match &self.current {
            Token::Int(value) => {
                let val = *value;
                self.advance()?;
                Ok(Expr::int(val))
            }
            Token::Float(value) => {
                let val = *value;
                self.advance()?;
                Ok(Expr::float(val))
            }
            Token::Str(value) => {
                let val = value.clone();
                self.advance()?;
                Ok(Expr::string(val))
            }
            Token::True => {
                self.advance()?;
                Ok(Expr::bool(true))
            }
            Token::False => {
                self.advance()?;
                Ok(Expr::bool(false))
            }
            Token::Null => {
                self.advance()?;
                Ok(Expr::null())
            }
            Token::Ident(name) => {
                let field = name.clone();
                self.advance()?;
                Ok(Expr::Ref(field))
            }
            Token::LeftParen => {
                self.advance()?;
                let expr = self.parse_expression()?;
                self.expect(&Token::RightParen)?;
                Ok(expr)
            }
            Token::LeftBracket => {
                self.advance()?;
                let mut items = Vec::new();
                if !matches!(self.current, Token::RightBracket) {
                    items.push(self.parse_expression()?);
                    while matches!(self.current, Token::Comma) {
                        self.advance()?;
                        if matches!(self.current, Token::RightBracket) {
                            break; // trailing comma
                        }
                        items.push(self.parse_expression()?);
                    }
                }
                self.expect(&Token::RightBracket)?;
                Ok(Expr::ListLiteral(items))
            }
            Token::If => {
                self.advance()?;
                let cond = self.parse_expression()?;
                self.expect(&Token::Then)?;
                let then = self.parse_expression()?;
                self.expect(&Token::Else)?;
                let otherwise = self.parse_expression()?;
                Ok(Expr::Conditional {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                })
            }
            other => Err(SymbolicaError::parse(
                self.current_pos,
                "expression",
                format!("'{other}'"),
            )),
        }
    }
}

/// Parse a flat expression string into an AST
pub fn parse_expression(input: &str) -> SymbolicaResult<Expr> {
    let mut parser = Parser::new(input)?;
    let expr = parser.parse_expression()?;

    if !matches!(parser.current, Token::Eof) {
        return Err(SymbolicaError::parse(
            parser.current_pos,
            "end of input",
            format!("'{}'", parser.current),
        ));
    }

    Ok(expr)
}

/// Surface form of a rule condition: a flat expression string, or a nested
/// structured combinator with a single `all`/`any`/`not` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionSpec {
    /// Flat expression string
    Expression(String),
    /// Every sub-condition must hold
    All { all: Vec<ConditionSpec> },
    /// At least one sub-condition must hold
    Any { any: Vec<ConditionSpec> },
    /// The sub-condition must not hold
    Not { not: Box<ConditionSpec> },
}

/// Resolve a condition spec (flat or structured) into an AST
pub fn parse_condition(spec: &ConditionSpec) -> SymbolicaResult<Expr> {
    match spec {
        ConditionSpec::Expression(text) => parse_expression(text),
        ConditionSpec::All { all } => Ok(Expr::All(
            all.iter().map(parse_condition).collect::<SymbolicaResult<Vec<_>>>()?,
        )),
        ConditionSpec::Any { any } => Ok(Expr::Any(
            any.iter().map(parse_condition).collect::<SymbolicaResult<Vec<_>>>()?,
        )),
        ConditionSpec::Not { not } => Ok(Expr::Not(Box::new(parse_condition(not)?))),
    }
}

const TEMPLATE_OPEN: &str = "{{";
const TEMPLATE_CLOSE: &str = "}}";

/// Compile an action value into a template AST.
///
/// Non-string values are literals of their inferred type. String values
/// wrapped in `{{ ... }}` are parsed as expressions; all other strings are
/// literal strings.
pub fn parse_action_template(value: &Value) -> SymbolicaResult<Expr> {
    if let Value::String(text) = value {
        let trimmed = text.trim();
        if trimmed.len() > TEMPLATE_OPEN.len() + TEMPLATE_CLOSE.len()
            && trimmed.starts_with(TEMPLATE_OPEN)
            && trimmed.ends_with(TEMPLATE_CLOSE)
        {
            let inner = &trimmed[TEMPLATE_OPEN.len()..trimmed.len() - TEMPLATE_CLOSE.len()];
            return parse_expression(inner.trim());
        }
    }
    Ok(Expr::Literal(value.clone()))
}
