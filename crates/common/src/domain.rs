//! Filter trees sent to the source system.
//!
//! A [`Domain`] is a backend-neutral predicate: comparisons combined with
//! conjunction, disjunction and negation. Each backend owns exactly one
//! encoder for it; the tree itself never knows the wire format.
//!
//! In configuration files a domain is written as nested maps:
//!
//! ```yaml
//! filter:
//!   all:
//!     - { field: active, op: "=", value: true }
//!     - any:
//!         - { field: state, op: in, value: [sale, done] }
//!         - not: { field: company_id, op: "=", value: false }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not in")]
    NotIn,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "ilike")]
    ILike,
    #[serde(rename = "=like")]
    EqLike,
    #[serde(rename = "=ilike")]
    EqILike,
    #[serde(rename = "child_of")]
    ChildOf,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Like => "like",
            Self::ILike => "ilike",
            Self::EqLike => "=like",
            Self::EqILike => "=ilike",
            Self::ChildOf => "child_of",
        }
    }
}

/// A single `field <op> value` comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDomain", into = "RawDomain")]
pub enum Domain {
    /// Conjunction. An empty list matches every record.
    All(Vec<Domain>),
    /// Disjunction. An empty list matches nothing.
    Any(Vec<Domain>),
    Not(Box<Domain>),
    Leaf(Condition),
}

impl Domain {
    pub fn leaf(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self::Leaf(Condition {
            field: field.into(),
            op,
            value: value.into(),
        })
    }

    /// The domain that matches every record.
    pub fn everything() -> Self {
        Self::All(Vec::new())
    }

    pub fn is_everything(&self) -> bool {
        matches!(self, Self::All(items) if items.iter().all(Domain::is_everything))
    }

    /// Conjunction of `self` and `other`, flattening nested `All` nodes and
    /// dropping match-everything operands.
    pub fn and(self, other: Domain) -> Domain {
        let mut items = Vec::new();
        for part in [self, other] {
            match part {
                Domain::All(inner) => items.extend(inner.into_iter().filter(|d| !d.is_everything())),
                d => items.push(d),
            }
        }
        if items.len() == 1 {
            return items.remove(0);
        }
        Domain::All(items)
    }

    /// Disjunction of `self` and `other`, flattening nested `Any` nodes.
    pub fn or(self, other: Domain) -> Domain {
        let mut items = Vec::new();
        for part in [self, other] {
            match part {
                Domain::Any(inner) => items.extend(inner),
                d => items.push(d),
            }
        }
        Domain::Any(items)
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::everything()
    }
}

/// Map-shaped representation used for (de)serialization: exactly one of
/// `all`, `any`, `not`, or `field` + `op` (+ `value`) must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDomain {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    all: Option<Vec<Domain>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    any: Option<Vec<Domain>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    not: Option<Box<Domain>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    op: Option<Operator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
}

impl TryFrom<RawDomain> for Domain {
    type Error = String;

    fn try_from(raw: RawDomain) -> Result<Self, Self::Error> {
        let combinators =
            usize::from(raw.all.is_some()) + usize::from(raw.any.is_some()) + usize::from(raw.not.is_some());
        let is_leaf = raw.field.is_some() || raw.op.is_some() || raw.value.is_some();

        match (combinators, is_leaf) {
            (1, false) => {
                if let Some(all) = raw.all {
                    Ok(Domain::All(all))
                } else if let Some(any) = raw.any {
                    Ok(Domain::Any(any))
                } else {
                    raw.not
                        .map(Domain::Not)
                        .ok_or_else(|| "filter node is empty".to_string())
                }
            }
            (0, true) => {
                let field = raw
                    .field
                    .filter(|f| !f.trim().is_empty())
                    .ok_or_else(|| "filter comparison requires a non-empty `field`".to_string())?;
                let op = raw
                    .op
                    .ok_or_else(|| format!("filter comparison on `{field}` requires an `op`"))?;
                Ok(Domain::Leaf(Condition {
                    field,
                    op,
                    value: raw.value.unwrap_or(Value::Null),
                }))
            }
            (0, false) => Err("filter node is empty".to_string()),
            _ => Err(
                "filter node must contain exactly one of `all`, `any`, `not` or a comparison"
                    .to_string(),
            ),
        }
    }
}

impl From<Domain> for RawDomain {
    fn from(domain: Domain) -> Self {
        match domain {
            Domain::All(items) => RawDomain {
                all: Some(items),
                ..Default::default()
            },
            Domain::Any(items) => RawDomain {
                any: Some(items),
                ..Default::default()
            },
            Domain::Not(inner) => RawDomain {
                not: Some(inner),
                ..Default::default()
            },
            Domain::Leaf(c) => RawDomain {
                field: Some(c.field),
                op: Some(c.op),
                value: Some(c.value),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn and_flattens_and_drops_everything() {
        let a = Domain::leaf("active", Operator::Eq, true);
        let b = Domain::leaf("id", Operator::Gt, 10);
        let c = Domain::leaf("state", Operator::In, json!(["sale"]));

        let combined = Domain::everything().and(a.clone()).and(b.clone()).and(c.clone());
        assert_eq!(combined, Domain::All(vec![a, b, c]));
    }

    #[test]
    fn and_with_everything_returns_other_operand() {
        let a = Domain::leaf("active", Operator::Eq, true);
        assert_eq!(Domain::everything().and(a.clone()), a);
    }

    #[test]
    fn or_flattens_nested_any() {
        let a = Domain::leaf("a", Operator::Eq, 1);
        let b = Domain::leaf("b", Operator::Eq, 2);
        let c = Domain::leaf("c", Operator::Eq, 3);
        let combined = a.clone().or(b.clone()).or(c.clone());
        assert_eq!(combined, Domain::Any(vec![a, b, c]));
    }

    #[test]
    fn deserializes_nested_yaml() {
        let yaml = r#"
all:
  - { field: active, op: "=", value: true }
  - any:
      - { field: state, op: in, value: [sale, done] }
      - not: { field: company_id, op: "=", value: false }
"#;
        let domain: Domain = serde_yaml::from_str(yaml).expect("valid domain");
        let expected = Domain::All(vec![
            Domain::leaf("active", Operator::Eq, true),
            Domain::Any(vec![
                Domain::leaf("state", Operator::In, json!(["sale", "done"])),
                Domain::Not(Box::new(Domain::leaf("company_id", Operator::Eq, false))),
            ]),
        ]);
        assert_eq!(domain, expected);
    }

    #[test]
    fn rejects_mixed_node() {
        let err = serde_json::from_value::<Domain>(json!({
            "all": [],
            "field": "x",
            "op": "="
        }))
        .unwrap_err();
        assert!(err.to_string().contains("exactly one"), "got: {err}");
    }

    #[test]
    fn rejects_comparison_without_op() {
        let err = serde_json::from_value::<Domain>(json!({ "field": "x", "value": 1 })).unwrap_err();
        assert!(err.to_string().contains("requires an `op`"), "got: {err}");
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(serde_json::from_value::<Domain>(json!({ "every": [] })).is_err());
    }

    #[test]
    fn serializes_back_to_map_shape() {
        let domain = Domain::Not(Box::new(Domain::leaf("active", Operator::Eq, true)));
        let value = serde_json::to_value(&domain).unwrap();
        assert_eq!(
            value,
            json!({ "not": { "field": "active", "op": "=", "value": true } })
        );
    }
}
