//! Expression tree for the embedded sub-language.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary operators. `And`/`Or`/`Xor` join sub-expressions; the rest compare
/// terminal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    /// Both sides true.
    And,
    /// Either side true.
    Or,
    /// Exactly one side true.
    Xor,
    /// Equality (case-insensitive for strings).
    Equal,
    /// Inequality.
    NotEqual,
    /// Strictly greater (case-sensitive lexical for strings).
    GreaterThan,
    /// Greater or equal.
    GreaterOrEqual,
    /// Strictly less.
    LessThan,
    /// Less or equal.
    LessOrEqual,
}

impl BinOp {
    /// Whether this operator joins sub-expressions.
    pub fn is_boolean(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or | BinOp::Xor)
    }

    /// Whether this operator compares terminal values.
    pub fn is_comparison(self) -> bool {
        !self.is_boolean()
    }

    /// Source-form spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Xor => "XOR",
            BinOp::Equal => "==",
            BinOp::NotEqual => "!=",
            BinOp::GreaterThan => ">",
            BinOp::GreaterOrEqual => ">=",
            BinOp::LessThan => "<",
            BinOp::LessOrEqual => "<=",
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of the expression tree.
///
/// Terminals (`Literal`, `FieldRef`, `VarRef`) resolve to typed values;
/// `Bin` nodes are internal. The parser guarantees that boolean `Bin` nodes
/// hold `Bin` children and comparison `Bin` nodes hold terminal children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprNode {
    /// Quoted or bare literal text, typed at evaluation time.
    Literal(String),
    /// Reference to a device field, read at evaluation time.
    FieldRef {
        /// Driver moniker.
        moniker: String,
        /// Field name within the driver.
        field: String,
    },
    /// Reference to a (possibly scope-prefixed) variable.
    VarRef(String),
    /// Internal operator node with exactly two children.
    Bin {
        /// The operator.
        op: BinOp,
        /// Left child.
        lhs: Box<ExprNode>,
        /// Right child.
        rhs: Box<ExprNode>,
    },
}

impl ExprNode {
    /// Whether this node is a terminal value.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExprNode::Bin { .. })
    }

    /// Render the node back to source form. Parsing the result yields an
    /// equal tree.
    pub fn render(&self) -> String {
        match self {
            ExprNode::Literal(text) => render_literal(text),
            ExprNode::FieldRef { moniker, field } => format!("$({}.{})", moniker, field),
            ExprNode::VarRef(name) => format!("%({})", name),
            ExprNode::Bin { op, lhs, rhs } => {
                format!("({} {} {})", lhs.render(), op, rhs.render())
            }
        }
    }
}

impl fmt::Display for ExprNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Render literal text, quoting when the bare form would not re-tokenize to
/// the same literal.
pub fn render_literal(text: &str) -> String {
    if is_bare_safe(text) {
        text.to_string()
    } else {
        let mut out = String::with_capacity(text.len() + 2);
        out.push('"');
        for ch in text.chars() {
            match ch {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                other => out.push(other),
            }
        }
        out.push('"');
        out
    }
}

fn is_bare_safe(text: &str) -> bool {
    if text.is_empty()
        || text.eq_ignore_ascii_case("AND")
        || text.eq_ignore_ascii_case("OR")
        || text.eq_ignore_ascii_case("XOR")
    {
        return false;
    }
    let first = text.as_bytes()[0];
    if first == b'%' || first == b'$' {
        return false;
    }
    text.bytes().all(|b| {
        !b.is_ascii_whitespace() && !matches!(b, b'(' | b')' | b'"' | b'=' | b'!' | b'<' | b'>')
    })
}
