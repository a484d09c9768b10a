//! Typed evaluator for expression trees.
//!
//! Depth-first, left then right. Terminals resolve to typed values: a field
//! reference triggers a proxy read, a variable reference a scope lookup, a
//! literal is tagged with the richest kind it parses as. `AND` and `OR`
//! short-circuit, so the skipped side is never resolved and performs no
//! remote reads; `XOR` always evaluates both children.

use super::ast::{BinOp, ExprNode, render_literal};
use super::{ExprError, ExprResult};
use crate::engine::vars::VarScopes;
use crate::host::FieldProxy;
use crate::value::{Value, values_cmp, values_equal};
use std::cmp::Ordering;

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    /// The boolean the expression produced.
    pub value: bool,
    /// The expression in source form with resolved values substituted.
    /// Short-circuited subtrees keep their unresolved source form.
    pub expanded: String,
}

/// Evaluate a parsed expression against live field and variable state.
pub fn evaluate(
    node: &ExprNode,
    fields: &dyn FieldProxy,
    vars: &VarScopes<'_>,
) -> ExprResult<EvalOutcome> {
    match node {
        ExprNode::Bin { op, lhs, rhs } if op.is_boolean() => {
            let left = evaluate(lhs, fields, vars)?;
            match op {
                BinOp::And if !left.value => Ok(EvalOutcome {
                    value: false,
                    expanded: format!("({} AND {})", left.expanded, rhs.render()),
                }),
                BinOp::Or if left.value => Ok(EvalOutcome {
                    value: true,
                    expanded: format!("({} OR {})", left.expanded, rhs.render()),
                }),
                _ => {
                    let right = evaluate(rhs, fields, vars)?;
                    let value = match op {
                        BinOp::And => left.value && right.value,
                        BinOp::Or => left.value || right.value,
                        BinOp::Xor => left.value != right.value,
                        _ => unreachable!(),
                    };
                    Ok(EvalOutcome {
                        value,
                        expanded: format!("({} {} {})", left.expanded, op, right.expanded),
                    })
                }
            }
        }
        ExprNode::Bin { op, lhs, rhs } => {
            let lv = resolve_terminal(lhs, fields, vars)?;
            let rv = resolve_terminal(rhs, fields, vars)?;
            let value = match op {
                BinOp::Equal => values_equal(&lv, &rv),
                BinOp::NotEqual => !values_equal(&lv, &rv),
                BinOp::GreaterThan => values_cmp(&lv, &rv) == Ordering::Greater,
                BinOp::GreaterOrEqual => values_cmp(&lv, &rv) != Ordering::Less,
                BinOp::LessThan => values_cmp(&lv, &rv) == Ordering::Less,
                BinOp::LessOrEqual => values_cmp(&lv, &rv) != Ordering::Greater,
                _ => unreachable!(),
            };
            Ok(EvalOutcome {
                value,
                expanded: format!(
                    "({} {} {})",
                    render_literal(&lv.to_string()),
                    op,
                    render_literal(&rv.to_string())
                ),
            })
        }
        terminal => {
            // The parser never yields a bare terminal at expression level.
            Err(ExprError::Structure(format!(
                "expected an operator node, found '{}'",
                terminal.render()
            )))
        }
    }
}

fn resolve_terminal(
    node: &ExprNode,
    fields: &dyn FieldProxy,
    vars: &VarScopes<'_>,
) -> ExprResult<Value> {
    match node {
        ExprNode::Literal(text) => Ok(Value::tag_literal(text)),
        ExprNode::FieldRef { moniker, field } => fields
            .read_field(moniker, field)
            .map_err(ExprError::Field),
        ExprNode::VarRef(name) => Ok(vars.read(name)?),
        ExprNode::Bin { .. } => Err(ExprError::Structure(
            "operator node used where a value was expected".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::trace::NullTracer;
    use crate::engine::vars::{GlobalVars, LocalVars};
    use crate::host::{DriverState, InMemoryFieldProxy, WaitMode};
    use crate::expr::parse;

    /// Field proxy that panics on read; proves short-circuited sides are
    /// never resolved.
    struct ExplodingProxy;

    impl FieldProxy for ExplodingProxy {
        fn read_field(&self, moniker: &str, field: &str) -> anyhow::Result<Value> {
            panic!("field {}.{} was read", moniker, field);
        }

        fn write_field(
            &self,
            _moniker: &str,
            _field: &str,
            _value: &Value,
            _mode: WaitMode,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        fn driver_state(&self, _moniker: &str) -> anyhow::Result<DriverState> {
            Ok(DriverState::Connected)
        }
    }

    fn eval_src(src: &str, fields: &dyn FieldProxy) -> EvalOutcome {
        let mut local = LocalVars::new();
        local.set("c", Value::Card(10));
        let global = GlobalVars::new();
        let vars = VarScopes::new(&mut local, &global, &NullTracer);
        evaluate(&parse(src).unwrap(), fields, &vars).unwrap()
    }

    #[test]
    fn and_short_circuits_without_reading_right_field() {
        let out = eval_src("((1 == 2) AND ($(a.b) > 15))", &ExplodingProxy);
        assert!(!out.value);
        assert_eq!(out.expanded, "((1 == 2) AND ($(a.b) > 15))");
    }

    #[test]
    fn or_short_circuits_without_reading_right_field() {
        let out = eval_src("((1 == 1) OR ($(a.b) > 15))", &ExplodingProxy);
        assert!(out.value);
    }

    #[test]
    fn xor_evaluates_both_sides() {
        let out = eval_src("((1 == 1) XOR (%(c) == 10))", &ExplodingProxy);
        assert!(!out.value);
        let out = eval_src("((1 == 1) XOR (%(c) == 11))", &ExplodingProxy);
        assert!(out.value);
    }

    #[test]
    fn nested_expression_against_fields() {
        let proxy = InMemoryFieldProxy::new();
        proxy.set("a", "b", Value::Card(75));
        let out = eval_src("(($(a.b) > 15) AND (%(c) == 10))", &proxy);
        assert!(out.value);
        assert_eq!(out.expanded, "((75 > 15) AND (10 == 10))");
    }

    #[test]
    fn string_equality_ignores_case() {
        let out = eval_src("(Light == light)", &ExplodingProxy);
        assert!(out.value);
    }

    #[test]
    fn string_ordering_is_case_sensitive() {
        // 'L' sorts before 'l', so GreaterThan is false.
        let out = eval_src("(Light > light)", &ExplodingProxy);
        assert!(!out.value);
    }

    #[test]
    fn card_widens_to_float_for_comparison() {
        let out = eval_src("(10 == 10.0)", &ExplodingProxy);
        assert!(out.value);
    }

    #[test]
    fn string_vs_card_compares_lexically() {
        let out = eval_src("(abc > 5)", &ExplodingProxy);
        assert!(out.value);
    }

    #[test]
    fn missing_variable_is_hard_error() {
        let mut local = LocalVars::new();
        let global = GlobalVars::new();
        let vars = VarScopes::new(&mut local, &global, &NullTracer);
        let err = evaluate(
            &parse("(%(missing) == 1)").unwrap(),
            &ExplodingProxy,
            &vars,
        )
        .unwrap_err();
        assert!(matches!(err, ExprError::Var(_)));
    }
}
