//! Recursive-descent parser for the expression sub-language.
//!
//! The grammar is fully parenthesized binary form: the whole input is
//! exactly one `( ... )` expression, whose body is either two parenthesized
//! sub-expressions joined by `AND`/`OR`/`XOR` or two terminal values joined
//! by a comparison operator. Trailing tokens after the closing paren are a
//! syntax error.

use super::ast::{BinOp, ExprNode};
use super::token::{Spanned, Token, tokenize};
use super::{ExprError, ExprResult};

/// Parse expression source text into a tree.
pub fn parse(source: &str) -> ExprResult<ExprNode> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, index: 0 };
    let node = parser.parse_expr()?;
    if let Some(extra) = parser.peek() {
        return Err(ExprError::Syntax {
            pos: extra.pos,
            message: "trailing input after expression".to_string(),
        });
    }
    Ok(node)
}

struct Parser {
    tokens: Vec<Spanned>,
    index: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Option<Spanned> {
        let spanned = self.tokens.get(self.index).cloned();
        if spanned.is_some() {
            self.index += 1;
        }
        spanned
    }

    fn end_pos(&self) -> usize {
        self.tokens.last().map(|s| s.pos + 1).unwrap_or(0)
    }

    fn syntax(&self, pos: usize, message: impl Into<String>) -> ExprError {
        ExprError::Syntax {
            pos,
            message: message.into(),
        }
    }

    fn expect_lparen(&mut self) -> ExprResult<()> {
        match self.next() {
            Some(Spanned {
                token: Token::LParen,
                ..
            }) => Ok(()),
            Some(other) => Err(self.syntax(other.pos, "expected '('")),
            None => Err(self.syntax(self.end_pos(), "expected '(', found end of input")),
        }
    }

    fn expect_rparen(&mut self) -> ExprResult<()> {
        match self.next() {
            Some(Spanned {
                token: Token::RParen,
                ..
            }) => Ok(()),
            Some(other) => Err(self.syntax(other.pos, "expected ')'")),
            None => Err(self.syntax(self.end_pos(), "expected ')', found end of input")),
        }
    }

    fn expect_op(&mut self) -> ExprResult<(BinOp, usize)> {
        match self.next() {
            Some(Spanned {
                token: Token::Op(op),
                pos,
            }) => Ok((op, pos)),
            Some(other) => Err(self.syntax(other.pos, "expected an operator")),
            None => Err(self.syntax(self.end_pos(), "expected an operator, found end of input")),
        }
    }

    fn parse_expr(&mut self) -> ExprResult<ExprNode> {
        self.expect_lparen()?;

        let node = if matches!(
            self.peek(),
            Some(Spanned {
                token: Token::LParen,
                ..
            })
        ) {
            // Boolean form: both sides are parenthesized sub-expressions.
            let lhs = self.parse_expr()?;
            let (op, op_pos) = self.expect_op()?;
            if op.is_comparison() {
                return Err(ExprError::Structure(format!(
                    "'{}' compares terminal values, not sub-expressions",
                    op
                )));
            }
            match self.peek() {
                Some(Spanned {
                    token: Token::LParen,
                    ..
                }) => {}
                _ => {
                    return Err(self.syntax(
                        op_pos,
                        format!("'{}' requires parenthesized sub-expressions on both sides", op),
                    ));
                }
            }
            let rhs = self.parse_expr()?;
            ExprNode::Bin {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }
        } else {
            // Comparison form: both sides are terminal values.
            let lhs = self.parse_terminal()?;
            let (op, _) = self.expect_op()?;
            if op.is_boolean() {
                return Err(ExprError::Structure(format!(
                    "'{}' joins parenthesized sub-expressions, not values",
                    op
                )));
            }
            let rhs = self.parse_terminal()?;
            ExprNode::Bin {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }
        };

        self.expect_rparen()?;
        Ok(node)
    }

    fn parse_terminal(&mut self) -> ExprResult<ExprNode> {
        match self.next() {
            Some(Spanned {
                token: Token::Literal(text),
                ..
            }) => Ok(ExprNode::Literal(text)),
            Some(Spanned {
                token: Token::Field { moniker, field },
                ..
            }) => Ok(ExprNode::FieldRef { moniker, field }),
            Some(Spanned {
                token: Token::Var(name),
                ..
            }) => Ok(ExprNode::VarRef(name)),
            Some(other) => Err(self.syntax(other.pos, "expected a value")),
            None => Err(self.syntax(self.end_pos(), "expected a value, found end of input")),
        }
    }
}
