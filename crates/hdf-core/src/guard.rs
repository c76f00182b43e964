// SPDX-License-Identifier: Apache-2.0
//! Guard expressions over named input/history variables.
//!
//! A guard is a boolean expression of integer/boolean comparisons joined by
//! `&&`, `||`, and `!`, with parentheses. Variables resolve against a
//! [`VariableScope`] populated from live input values and consumption
//! history. Guards are parsed when a transition is constructed; a malformed
//! guard is rejected there, never at evaluation time.
//!
//! Grammar (precedence low to high):
//! ```text
//! or    := and ('||' and)*
//! and   := not ('&&' not)*
//! not   := '!' not | cmp
//! cmp   := atom (('==' | '!=' | '<' | '<=' | '>' | '>=') atom)?
//! atom  := ident | integer | 'true' | 'false' | '(' or ')'
//! ```

use std::fmt;

use thiserror::Error;

use crate::token::{Token, VariableScope};

/// Guard rejected at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardParseError {
    /// Unexpected character at the byte offset.
    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedCharacter {
        /// Offending character.
        found: char,
        /// Byte offset into the guard source.
        offset: usize,
    },
    /// The expression ended where a term was required.
    #[error("unexpected end of guard expression")]
    UnexpectedEnd,
    /// Input remained after a complete expression.
    #[error("trailing input at offset {offset}")]
    TrailingInput {
        /// Byte offset of the first unconsumed token.
        offset: usize,
    },
    /// Integer literal out of range.
    #[error("integer literal out of range at offset {offset}")]
    BadInteger {
        /// Byte offset of the literal.
        offset: usize,
    },
}

/// Guard evaluation failure. Fatal: propagates to the host engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    /// The guard referenced a variable absent from the scope.
    #[error("guard references undefined variable '{name}'")]
    UndefinedVariable {
        /// Variable name as written in the guard.
        name: String,
    },
    /// Operands of incompatible kinds (e.g. `bool < int`).
    #[error("type mismatch in guard: {context}")]
    TypeMismatch {
        /// Operator and operand kinds.
        context: String,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Expr {
    Var(String),
    Int(i64),
    Bool(bool),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// A parsed, evaluable guard expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Guard {
    source: String,
    expr: Expr,
}

impl Guard {
    /// Parses a guard from its textual form.
    pub fn parse(source: &str) -> Result<Self, GuardParseError> {
        let tokens = lex(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(GuardParseError::TrailingInput { offset: tok.offset });
        }
        Ok(Self {
            source: source.to_owned(),
            expr,
        })
    }

    /// A guard that is always enabled.
    #[must_use]
    pub fn always() -> Self {
        Self {
            source: "true".to_owned(),
            expr: Expr::Bool(true),
        }
    }

    /// The textual form this guard was parsed from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the guard against the scope.
    pub fn evaluate(&self, scope: &VariableScope) -> Result<bool, GuardError> {
        match eval(&self.expr, scope)? {
            Token::Bool(b) => Ok(b),
            Token::Int(_) => Err(GuardError::TypeMismatch {
                context: format!("guard '{}' is not boolean", self.source),
            }),
        }
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn eval(expr: &Expr, scope: &VariableScope) -> Result<Token, GuardError> {
    match expr {
        Expr::Var(name) => scope
            .get(name)
            .ok_or_else(|| GuardError::UndefinedVariable { name: name.clone() }),
        Expr::Int(v) => Ok(Token::Int(*v)),
        Expr::Bool(v) => Ok(Token::Bool(*v)),
        Expr::Not(inner) => match eval(inner, scope)? {
            Token::Bool(b) => Ok(Token::Bool(!b)),
            Token::Int(_) => Err(GuardError::TypeMismatch {
                context: "'!' applied to an integer".to_owned(),
            }),
        },
        Expr::And(lhs, rhs) => {
            // No short-circuit: an undefined variable on either side is a
            // configuration error and must surface regardless of the other
            // operand's value.
            let l = expect_bool(eval(lhs, scope)?, "&&")?;
            let r = expect_bool(eval(rhs, scope)?, "&&")?;
            Ok(Token::Bool(l && r))
        }
        Expr::Or(lhs, rhs) => {
            let l = expect_bool(eval(lhs, scope)?, "||")?;
            let r = expect_bool(eval(rhs, scope)?, "||")?;
            Ok(Token::Bool(l || r))
        }
        Expr::Cmp(op, lhs, rhs) => {
            let l = eval(lhs, scope)?;
            let r = eval(rhs, scope)?;
            let result = match (op, l, r) {
                (CmpOp::Eq, a, b) => same_kind_eq(a, b)?,
                (CmpOp::Ne, a, b) => !same_kind_eq(a, b)?,
                (CmpOp::Lt, Token::Int(a), Token::Int(b)) => a < b,
                (CmpOp::Le, Token::Int(a), Token::Int(b)) => a <= b,
                (CmpOp::Gt, Token::Int(a), Token::Int(b)) => a > b,
                (CmpOp::Ge, Token::Int(a), Token::Int(b)) => a >= b,
                (_, a, b) => {
                    return Err(GuardError::TypeMismatch {
                        context: format!("ordering comparison of {a} and {b}"),
                    })
                }
            };
            Ok(Token::Bool(result))
        }
    }
}

fn expect_bool(token: Token, op: &str) -> Result<bool, GuardError> {
    match token {
        Token::Bool(b) => Ok(b),
        Token::Int(v) => Err(GuardError::TypeMismatch {
            context: format!("'{op}' applied to integer {v}"),
        }),
    }
}

fn same_kind_eq(a: Token, b: Token) -> Result<bool, GuardError> {
    match (a, b) {
        (Token::Int(x), Token::Int(y)) => Ok(x == y),
        (Token::Bool(x), Token::Bool(y)) => Ok(x == y),
        (x, y) => Err(GuardError::TypeMismatch {
            context: format!("equality comparison of {x} and {y}"),
        }),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Lexeme {
    Ident(String),
    Int(i64),
    Cmp(CmpOp),
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
}

#[derive(Clone, Debug)]
struct Spanned {
    lexeme: Lexeme,
    offset: usize,
}

fn lex(source: &str) -> Result<Vec<Spanned>, GuardParseError> {
    let bytes = source.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        let offset = i;
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '(' => {
                out.push(Spanned {
                    lexeme: Lexeme::LParen,
                    offset,
                });
                i += 1;
            }
            ')' => {
                out.push(Spanned {
                    lexeme: Lexeme::RParen,
                    offset,
                });
                i += 1;
            }
            '&' if bytes.get(i + 1) == Some(&b'&') => {
                out.push(Spanned {
                    lexeme: Lexeme::AndAnd,
                    offset,
                });
                i += 2;
            }
            '|' if bytes.get(i + 1) == Some(&b'|') => {
                out.push(Spanned {
                    lexeme: Lexeme::OrOr,
                    offset,
                });
                i += 2;
            }
            '=' if bytes.get(i + 1) == Some(&b'=') => {
                out.push(Spanned {
                    lexeme: Lexeme::Cmp(CmpOp::Eq),
                    offset,
                });
                i += 2;
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    out.push(Spanned {
                        lexeme: Lexeme::Cmp(CmpOp::Ne),
                        offset,
                    });
                    i += 2;
                } else {
                    out.push(Spanned {
                        lexeme: Lexeme::Bang,
                        offset,
                    });
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    out.push(Spanned {
                        lexeme: Lexeme::Cmp(CmpOp::Le),
                        offset,
                    });
                    i += 2;
                } else {
                    out.push(Spanned {
                        lexeme: Lexeme::Cmp(CmpOp::Lt),
                        offset,
                    });
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    out.push(Spanned {
                        lexeme: Lexeme::Cmp(CmpOp::Ge),
                        offset,
                    });
                    i += 2;
                } else {
                    out.push(Spanned {
                        lexeme: Lexeme::Cmp(CmpOp::Gt),
                        offset,
                    });
                    i += 1;
                }
            }
            '0'..='9' | '-' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let text = &source[start..i];
                let value: i64 = text
                    .parse()
                    .map_err(|_| GuardParseError::BadInteger { offset })?;
                out.push(Spanned {
                    lexeme: Lexeme::Int(value),
                    offset,
                });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric()
                        || bytes[i] == b'_'
                        || bytes[i] == b'#')
                {
                    i += 1;
                }
                out.push(Spanned {
                    lexeme: Lexeme::Ident(source[start..i].to_owned()),
                    offset,
                });
            }
            found => {
                return Err(GuardParseError::UnexpectedCharacter { found, offset });
            }
        }
    }
    Ok(out)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Spanned> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, lexeme: &Lexeme) -> bool {
        if self.peek().is_some_and(|t| t.lexeme == *lexeme) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn parse_or(&mut self) -> Result<Expr, GuardParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Lexeme::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, GuardParseError> {
        let mut lhs = self.parse_not()?;
        while self.eat(&Lexeme::AndAnd) {
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, GuardParseError> {
        if self.eat(&Lexeme::Bang) {
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr, GuardParseError> {
        let lhs = self.parse_atom()?;
        if let Some(Spanned {
            lexeme: Lexeme::Cmp(op),
            ..
        }) = self.peek().cloned()
        {
            self.pos += 1;
            let rhs = self.parse_atom()?;
            return Ok(Expr::Cmp(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_atom(&mut self) -> Result<Expr, GuardParseError> {
        match self.bump() {
            None => Err(GuardParseError::UnexpectedEnd),
            Some(tok) => match tok.lexeme {
                Lexeme::Int(v) => Ok(Expr::Int(v)),
                Lexeme::Ident(name) => match name.as_str() {
                    "true" => Ok(Expr::Bool(true)),
                    "false" => Ok(Expr::Bool(false)),
                    _ => Ok(Expr::Var(name)),
                },
                Lexeme::LParen => {
                    let inner = self.parse_or()?;
                    if self.eat(&Lexeme::RParen) {
                        Ok(inner)
                    } else {
                        match self.peek() {
                            Some(next) => Err(GuardParseError::TrailingInput {
                                offset: next.offset,
                            }),
                            None => Err(GuardParseError::UnexpectedEnd),
                        }
                    }
                }
                _ => Err(GuardParseError::TrailingInput { offset: tok.offset }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn scope(pairs: &[(&str, Token)]) -> VariableScope {
        let mut s = VariableScope::new();
        for (name, value) in pairs {
            s.set(*name, *value);
        }
        s
    }

    #[test]
    fn comparison_and_boolean_connectives() {
        let guard = Guard::parse("x >= 5 && (y == 0 || !flag)").unwrap();
        let s = scope(&[
            ("x", Token::Int(7)),
            ("y", Token::Int(3)),
            ("flag", Token::Bool(false)),
        ]);
        assert!(guard.evaluate(&s).unwrap());

        let s = scope(&[
            ("x", Token::Int(7)),
            ("y", Token::Int(3)),
            ("flag", Token::Bool(true)),
        ]);
        assert!(!guard.evaluate(&s).unwrap());
    }

    #[test]
    fn always_guard_needs_no_variables() {
        let guard = Guard::always();
        assert!(guard.evaluate(&VariableScope::new()).unwrap());
        assert_eq!(guard.source(), "true");
    }

    #[test]
    fn negative_literals_parse() {
        let guard = Guard::parse("x > -2").unwrap();
        assert!(guard.evaluate(&scope(&[("x", Token::Int(0))])).unwrap());
    }

    #[test]
    fn history_variable_names_parse() {
        let guard = Guard::parse("in_1 != in_0").unwrap();
        let s = scope(&[("in_0", Token::Int(2)), ("in_1", Token::Int(3))]);
        assert!(guard.evaluate(&s).unwrap());
    }

    #[test]
    fn malformed_guards_fail_at_parse_time() {
        assert!(matches!(
            Guard::parse("x >="),
            Err(GuardParseError::UnexpectedEnd)
        ));
        assert!(matches!(
            Guard::parse("x == 1 extra"),
            Err(GuardParseError::TrailingInput { .. })
        ));
        assert!(matches!(
            Guard::parse("x @ 1"),
            Err(GuardParseError::UnexpectedCharacter { found: '@', .. })
        ));
        assert!(matches!(
            Guard::parse("(x == 1"),
            Err(GuardParseError::UnexpectedEnd)
        ));
    }

    #[test]
    fn undefined_variable_is_fatal_at_evaluation() {
        let guard = Guard::parse("missing == 1").unwrap();
        assert_eq!(
            guard.evaluate(&VariableScope::new()),
            Err(GuardError::UndefinedVariable {
                name: "missing".to_owned()
            })
        );
    }

    #[test]
    fn non_boolean_guard_is_a_type_error() {
        let guard = Guard::parse("x").unwrap();
        let err = guard.evaluate(&scope(&[("x", Token::Int(1))]));
        assert!(matches!(err, Err(GuardError::TypeMismatch { .. })));
    }
}
