//! Odoo domain encoding.
//!
//! Odoo expects a flat list in Polish (prefix) notation: `"&"`, `"|"` and
//! `"!"` operators followed by their operands, each leaf being a
//! `[field, operator, value]` triple. An n-ary conjunction needs n-1 leading
//! `"&"` operators.

use mirror_common::{Condition, Domain};
use serde_json::{json, Value};

const AND: &str = "&";
const OR: &str = "|";
const NOT: &str = "!";

/// Leaf that matches every record; stands in for an empty conjunction.
fn true_leaf() -> Value {
    json!([1, "=", 1])
}

/// Leaf that matches nothing; stands in for an empty disjunction.
fn false_leaf() -> Value {
    json!([0, "=", 1])
}

/// Encode `domain` into the list sent as the `search_read` domain argument.
/// A match-everything domain encodes to `[]`.
pub fn encode_domain(domain: &Domain) -> Vec<Value> {
    let mut out = Vec::new();
    if !domain.is_everything() {
        push_node(domain, &mut out);
    }
    out
}

fn push_node(domain: &Domain, out: &mut Vec<Value>) {
    match domain {
        Domain::All(items) => push_nary(AND, items, true_leaf, out),
        Domain::Any(items) => push_nary(OR, items, false_leaf, out),
        Domain::Not(inner) => {
            out.push(Value::from(NOT));
            push_node(inner, out);
        }
        Domain::Leaf(condition) => out.push(leaf(condition)),
    }
}

fn push_nary(op: &str, items: &[Domain], empty: fn() -> Value, out: &mut Vec<Value>) {
    if items.is_empty() {
        out.push(empty());
        return;
    }
    for _ in 1..items.len() {
        out.push(Value::from(op));
    }
    for item in items {
        push_node(item, out);
    }
}

fn leaf(condition: &Condition) -> Value {
    json!([condition.field, condition.op.as_str(), condition.value])
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_common::Operator;

    fn a() -> Domain {
        Domain::leaf("a", Operator::Eq, 1)
    }

    fn b() -> Domain {
        Domain::leaf("b", Operator::Gt, 2)
    }

    fn c() -> Domain {
        Domain::leaf("c", Operator::In, json!(["x", "y"]))
    }

    #[test]
    fn everything_encodes_to_empty_list() {
        assert!(encode_domain(&Domain::everything()).is_empty());
    }

    #[test]
    fn single_leaf() {
        assert_eq!(encode_domain(&a()), vec![json!(["a", "=", 1])]);
    }

    #[test]
    fn conjunction_uses_n_minus_one_ands() {
        let encoded = encode_domain(&Domain::All(vec![a(), b(), c()]));
        assert_eq!(
            encoded,
            vec![
                json!("&"),
                json!("&"),
                json!(["a", "=", 1]),
                json!(["b", ">", 2]),
                json!(["c", "in", ["x", "y"]]),
            ]
        );
    }

    #[test]
    fn nested_or_inside_and() {
        let domain = Domain::All(vec![a(), Domain::Any(vec![b(), c()])]);
        assert_eq!(
            encode_domain(&domain),
            vec![
                json!("&"),
                json!(["a", "=", 1]),
                json!("|"),
                json!(["b", ">", 2]),
                json!(["c", "in", ["x", "y"]]),
            ]
        );
    }

    #[test]
    fn negation_prefixes_operand() {
        let domain = Domain::Not(Box::new(Domain::All(vec![a(), b()])));
        assert_eq!(
            encode_domain(&domain),
            vec![json!("!"), json!("&"), json!(["a", "=", 1]), json!(["b", ">", 2])]
        );
    }

    #[test]
    fn empty_disjunction_matches_nothing() {
        assert_eq!(encode_domain(&Domain::Any(vec![])), vec![json!([0, "=", 1])]);
    }

    #[test]
    fn nested_empty_conjunction_is_true_leaf() {
        let domain = Domain::Any(vec![a(), Domain::All(vec![])]);
        assert_eq!(
            encode_domain(&domain),
            vec![json!("|"), json!(["a", "=", 1]), json!([1, "=", 1])]
        );
    }

    #[test]
    fn keyset_continuation_shape() {
        let ts = "2026-03-01 10:00:00";
        let domain = Domain::leaf("write_date", Operator::Gt, ts).or(Domain::All(vec![
            Domain::leaf("write_date", Operator::Eq, ts),
            Domain::leaf("id", Operator::Gt, 2),
        ]));
        assert_eq!(
            encode_domain(&domain),
            vec![
                json!("|"),
                json!(["write_date", ">", ts]),
                json!("&"),
                json!(["write_date", "=", ts]),
                json!(["id", ">", 2]),
            ]
        );
    }
}
