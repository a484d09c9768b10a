//! Integration tests of the expression sub-language: grammar pinning,
//! coercion, short-circuiting, and render/parse round-trips.

use parking_lot::Mutex;
use proptest::prelude::*;

use baton::expr::ast::{BinOp, ExprNode};
use baton::expr::{evaluate, parse};
use baton::{
    DriverState, FieldProxy, GlobalVars, LocalVars, NullTracer, Value, VarScopes, WaitMode,
};

/// Field proxy that counts reads per field and errors on fields whose
/// moniker is `forbidden`.
struct CountingProxy {
    reads: Mutex<Vec<String>>,
}

impl CountingProxy {
    fn new() -> Self {
        Self {
            reads: Mutex::new(Vec::new()),
        }
    }

    fn read_log(&self) -> Vec<String> {
        self.reads.lock().clone()
    }
}

impl FieldProxy for CountingProxy {
    fn read_field(&self, moniker: &str, field: &str) -> anyhow::Result<Value> {
        self.reads.lock().push(format!("{}.{}", moniker, field));
        if moniker == "forbidden" {
            anyhow::bail!("field {}.{} must not be read", moniker, field);
        }
        Ok(Value::Card(75))
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

fn eval_with(proxy: &CountingProxy, src: &str) -> bool {
    let mut local = LocalVars::new();
    local.set("c", Value::Card(10));
    let global = GlobalVars::new();
    let vars = VarScopes::new(&mut local, &global, &NullTracer);
    evaluate(&parse(src).unwrap(), proxy, &vars).unwrap().value
}

#[test]
fn and_with_false_left_never_reads_the_right_field() {
    let proxy = CountingProxy::new();
    assert!(!eval_with(
        &proxy,
        "((1 == 2) AND ($(forbidden.Field) > 15))"
    ));
    assert!(proxy.read_log().is_empty());
}

#[test]
fn or_with_true_left_never_reads_the_right_field() {
    let proxy = CountingProxy::new();
    assert!(eval_with(&proxy, "((1 == 1) OR ($(forbidden.Field) > 15))"));
    assert!(proxy.read_log().is_empty());
}

#[test]
fn both_sides_read_when_the_left_does_not_decide() {
    let proxy = CountingProxy::new();
    assert!(eval_with(&proxy, "((1 == 1) AND ($(a.b) > 15))"));
    assert_eq!(proxy.read_log(), vec!["a.b".to_string()]);
}

#[test]
fn reference_nested_example_evaluates_and_round_trips() {
    let src = "(($(a.b) > 15) AND (%(c) == 10))";
    let node = parse(src).unwrap();
    assert_eq!(node.render(), src);

    let proxy = CountingProxy::new();
    assert!(eval_with(&proxy, src));
    assert_eq!(proxy.read_log(), vec!["a.b".to_string()]);
}

#[test]
fn card_and_float_meet_at_float() {
    let proxy = CountingProxy::new();
    assert!(eval_with(&proxy, "(10 == 10.0)"));
    assert!(eval_with(&proxy, "(10 < 10.5)"));
}

#[test]
fn string_and_card_meet_at_lexical_string() {
    let proxy = CountingProxy::new();
    // Falls back to string comparison instead of failing conversion.
    assert!(eval_with(&proxy, "(abc > 5)"));
    assert!(!eval_with(&proxy, "(abc == 5)"));
}

#[test]
fn equality_ignores_case_but_ordering_does_not() {
    let proxy = CountingProxy::new();
    assert!(eval_with(&proxy, "(Light == light)"));
    assert!(!eval_with(&proxy, "(Light > light)"));
    assert!(eval_with(&proxy, "(Light < light)"));
}

#[test]
fn xor_needs_exactly_one_true_side() {
    let proxy = CountingProxy::new();
    assert!(eval_with(&proxy, "((1 == 1) XOR (1 == 2))"));
    assert!(!eval_with(&proxy, "((1 == 1) XOR (2 == 2))"));
}

// Property: rendering any well-formed tree and parsing it back yields the
// same tree.

fn terminal_strategy() -> impl Strategy<Value = ExprNode> {
    let bare = "[a-z][a-z0-9]{0,6}";
    prop_oneof![
        "[a-zA-Z0-9 ]{0,10}".prop_map(ExprNode::Literal),
        (bare, bare).prop_map(|(moniker, field)| ExprNode::FieldRef { moniker, field }),
        bare.prop_map(ExprNode::VarRef),
    ]
}

fn comparison_op() -> impl Strategy<Value = BinOp> {
    prop_oneof![
        Just(BinOp::Equal),
        Just(BinOp::NotEqual),
        Just(BinOp::GreaterThan),
        Just(BinOp::GreaterOrEqual),
        Just(BinOp::LessThan),
        Just(BinOp::LessOrEqual),
    ]
}

fn boolean_op() -> impl Strategy<Value = BinOp> {
    prop_oneof![Just(BinOp::And), Just(BinOp::Or), Just(BinOp::Xor)]
}

fn expr_strategy() -> impl Strategy<Value = ExprNode> {
    let comparison = (terminal_strategy(), comparison_op(), terminal_strategy()).prop_map(
        |(lhs, op, rhs)| ExprNode::Bin {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
    );
    comparison.prop_recursive(4, 32, 2, |inner| {
        (inner.clone(), boolean_op(), inner).prop_map(|(lhs, op, rhs)| ExprNode::Bin {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    })
}

proptest! {
    #[test]
    fn render_then_parse_is_identity(node in expr_strategy()) {
        let rendered = node.render();
        let reparsed = parse(&rendered).unwrap();
        prop_assert_eq!(reparsed, node);
    }
}
