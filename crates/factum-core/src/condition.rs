//! The declarative predicate tree evaluated both in-process (against an
//! incoming fact, to decide whether a counter applies) and rendered to a
//! store-side query (to filter candidate historical facts).
//!
//! The predicate AST is a tagged sum rather than the dynamic, duck-typed
//! shape a document-store query language allows. A single visitor walks it
//! twice — [`Condition::evaluate`] for the in-process path, and
//! [`Condition::to_store_query`] for the store-side path — so the two modes
//! cannot silently drift apart.

use crate::error::{FactumError, FactumResult};
use crate::types::Fact;
use chrono::{DateTime, Duration, Utc};
use factum_types::FactValue;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};

/// A node of the predicate tree.
///
/// Field names are payload attribute names (the `x` in `fact.d.x`, not the
/// wire-level `"d.x"` dotted path) — config loading, where a dotted path
/// would be parsed into this tree, is a caller concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Condition {
    /// `{ field: value }` — equality, with type coercion. Absent field
    /// matches only `value == null`.
    Eq {
        /// Payload attribute to read.
        field: String,
        /// Value to compare against.
        value: Json,
    },
    /// `$ne` — inequality. Absent field never matches (never "not equal" to
    /// `null` either, per the spec's absent-vs-null distinction).
    Ne {
        /// Payload attribute to read.
        field: String,
        /// Value to compare against.
        value: Json,
    },
    /// `$in` — field's value is one of `values`.
    In {
        /// Payload attribute to read.
        field: String,
        /// Candidate values.
        values: Vec<Json>,
    },
    /// `$nin` — field's value is none of `values`.
    Nin {
        /// Payload attribute to read.
        field: String,
        /// Excluded values.
        values: Vec<Json>,
    },
    /// `$gt`.
    Gt {
        /// Payload attribute to read.
        field: String,
        /// Value to compare against.
        value: Json,
    },
    /// `$gte`.
    Gte {
        /// Payload attribute to read.
        field: String,
        /// Value to compare against.
        value: Json,
    },
    /// `$lt`.
    Lt {
        /// Payload attribute to read.
        field: String,
        /// Value to compare against.
        value: Json,
    },
    /// `$lte`.
    Lte {
        /// Payload attribute to read.
        field: String,
        /// Value to compare against.
        value: Json,
    },
    /// `$exists` — whether the field is present (and non-null) at all.
    Exists {
        /// Payload attribute to read.
        field: String,
        /// Expected presence.
        expected: bool,
    },
    /// `$regex` with optional `$options` (e.g. `"i"`). Matches only string
    /// values; any other type fails silently (treated as non-match).
    Regex {
        /// Payload attribute to read.
        field: String,
        /// Regular expression pattern.
        pattern: String,
        /// Optional inline flags, currently only case-insensitivity (`"i"`).
        options: Option<String>,
    },
    /// `$not` — negates a sub-condition.
    Not(Box<Condition>),
    /// `$and` / implicit top-level conjunction of sibling clauses.
    And(Vec<Condition>),
    /// `$or`.
    Or(Vec<Condition>),
    /// `$nor` — none of the sub-conditions may match.
    Nor(Vec<Condition>),
    /// `$expr` — field-to-field (or field-to-computed-value) comparison.
    Expr(ExprCondition),
}

/// One `$expr` comparison: `{ $op: [left, right] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExprCondition {
    /// Comparison operator.
    pub op: ExprOp,
    /// Left-hand operand.
    pub left: ExprOperand,
    /// Right-hand operand.
    pub right: ExprOperand,
}

/// Comparison operators available inside `$expr`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ExprOp {
    /// `$eq`.
    Eq,
    /// `$ne`.
    Ne,
    /// `$gt`.
    Gt,
    /// `$gte`.
    Gte,
    /// `$lt`.
    Lt,
    /// `$lte`.
    Lte,
}

/// Units accepted by `$dateAdd`/`$dateSubtract`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum DateUnit {
    /// Days.
    Day,
    /// Hours.
    Hour,
    /// Minutes.
    Minute,
    /// Seconds.
    Second,
}

impl DateUnit {
    fn to_duration(self, amount: i64) -> Duration {
        match self {
            Self::Day => Duration::days(amount),
            Self::Hour => Duration::hours(amount),
            Self::Minute => Duration::minutes(amount),
            Self::Second => Duration::seconds(amount),
        }
    }
}

/// One side of an `$expr` comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprOperand {
    /// `"$d.x"` — read a payload field.
    Field(String),
    /// `{ $dateAdd: { field, unit, amount } }`.
    DateAdd {
        /// Payload field to read a timestamp from.
        field: String,
        /// Unit of `amount`.
        unit: DateUnit,
        /// Quantity to add.
        amount: i64,
    },
    /// `{ $dateSubtract: { field, unit, amount } }`.
    DateSubtract {
        /// Payload field to read a timestamp from.
        field: String,
        /// Unit of `amount`.
        unit: DateUnit,
        /// Quantity to subtract.
        amount: i64,
    },
    /// A constant, not read off the fact.
    Literal(Json),
}

impl ExprOperand {
    fn resolve(&self, fact: &Fact) -> Option<FactValue> {
        match self {
            Self::Field(field) => fact.attribute(field).cloned(),
            Self::Literal(json) => FactValue::try_from(json).ok(),
            Self::DateAdd { field, unit, amount } => {
                let dt = fact.attribute(field).and_then(FactValue::as_date)?;
                Some(FactValue::Date(*dt + unit.to_duration(*amount)))
            }
            Self::DateSubtract { field, unit, amount } => {
                let dt = fact.attribute(field).and_then(FactValue::as_date)?;
                Some(FactValue::Date(*dt - unit.to_duration(*amount)))
            }
        }
    }
}

impl Condition {
    /// Evaluate this predicate tree against a fact's payload in-process.
    pub fn evaluate(&self, fact: &Fact) -> FactumResult<bool> {
        match self {
            Self::Eq { field, value } => Ok(eq_or_absent(fact.attribute(field), value)),
            Self::Ne { field, value } => match fact.attribute(field) {
                None => Ok(false),
                Some(actual) => Ok(!values_equal(actual, value)),
            },
            Self::In { field, values } => Ok(match fact.attribute(field) {
                None => values.iter().any(|v| v.is_null()),
                Some(actual) => values.iter().any(|v| values_equal(actual, v)),
            }),
            Self::Nin { field, values } => Ok(match fact.attribute(field) {
                None => !values.iter().any(|v| v.is_null()),
                Some(actual) => !values.iter().any(|v| values_equal(actual, v)),
            }),
            Self::Gt { field, value } => compare(fact, field, value, std::cmp::Ordering::is_gt),
            Self::Gte { field, value } => {
                compare(fact, field, value, std::cmp::Ordering::is_ge)
            }
            Self::Lt { field, value } => compare(fact, field, value, std::cmp::Ordering::is_lt),
            Self::Lte { field, value } => {
                compare(fact, field, value, std::cmp::Ordering::is_le)
            }
            Self::Exists { field, expected } => {
                Ok(fact.attribute(field).is_some() == *expected)
            }
            Self::Regex { field, pattern, options } => {
                let Some(actual) = fact.attribute(field) else { return Ok(false) };
                let FactValue::String(s) = actual else { return Ok(false) };
                let pattern = if options.as_deref() == Some("i") {
                    format!("(?i){pattern}")
                } else {
                    pattern.clone()
                };
                let re = Regex::new(&pattern)
                    .map_err(|e| FactumError::invalid_predicate(field.clone(), e.to_string()))?;
                Ok(re.is_match(s))
            }
            Self::Not(inner) => inner.evaluate(fact).map(|b| !b),
            Self::And(clauses) => {
                for clause in clauses {
                    if !clause.evaluate(fact)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(clauses) => {
                for clause in clauses {
                    if clause.evaluate(fact)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Nor(clauses) => {
                for clause in clauses {
                    if clause.evaluate(fact)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Expr(expr) => evaluate_expr(expr, fact),
        }
    }

    /// Render this predicate tree into a MongoDB-shaped query fragment, for
    /// use in a `PipelineBuilder` `match` stage. Behaviorally equivalent to
    /// [`Self::evaluate`] on the supported subset.
    pub fn to_store_query(&self) -> Json {
        match self {
            Self::Eq { field, value } => json!({ field: { "$eq": value } }),
            Self::Ne { field, value } => json!({ field: { "$ne": value } }),
            Self::In { field, values } => json!({ field: { "$in": values } }),
            Self::Nin { field, values } => json!({ field: { "$nin": values } }),
            Self::Gt { field, value } => json!({ field: { "$gt": value } }),
            Self::Gte { field, value } => json!({ field: { "$gte": value } }),
            Self::Lt { field, value } => json!({ field: { "$lt": value } }),
            Self::Lte { field, value } => json!({ field: { "$lte": value } }),
            Self::Exists { field, expected } => json!({ field: { "$exists": expected } }),
            Self::Regex { field, pattern, options } => {
                let mut obj = serde_json::Map::new();
                obj.insert("$regex".to_string(), Json::String(pattern.clone()));
                if let Some(options) = options {
                    obj.insert("$options".to_string(), Json::String(options.clone()));
                }
                json!({ field: Json::Object(obj) })
            }
            Self::Not(inner) => json!({ "$nor": [inner.to_store_query()] }),
            Self::And(clauses) => {
                json!({ "$and": clauses.iter().map(Condition::to_store_query).collect::<Vec<_>>() })
            }
            Self::Or(clauses) => {
                json!({ "$or": clauses.iter().map(Condition::to_store_query).collect::<Vec<_>>() })
            }
            Self::Nor(clauses) => {
                json!({ "$nor": clauses.iter().map(Condition::to_store_query).collect::<Vec<_>>() })
            }
            Self::Expr(expr) => json!({ "$expr": expr.to_store_query() }),
        }
    }
}

impl ExprCondition {
    fn to_store_query(&self) -> Json {
        let op = match self.op {
            ExprOp::Eq => "$eq",
            ExprOp::Ne => "$ne",
            ExprOp::Gt => "$gt",
            ExprOp::Gte => "$gte",
            ExprOp::Lt => "$lt",
            ExprOp::Lte => "$lte",
        };
        json!({ op: [self.left.to_store_query(), self.right.to_store_query()] })
    }
}

impl ExprOperand {
    fn to_store_query(&self) -> Json {
        match self {
            Self::Field(field) => Json::String(format!("$d.{field}")),
            Self::Literal(json) => json.clone(),
            Self::DateAdd { field, unit, amount } => json!({
                "$dateAdd": { "startDate": format!("$d.{field}"), "unit": unit_key(*unit), "amount": amount }
            }),
            Self::DateSubtract { field, unit, amount } => json!({
                "$dateSubtract": { "startDate": format!("$d.{field}"), "unit": unit_key(*unit), "amount": amount }
            }),
        }
    }
}

fn unit_key(unit: DateUnit) -> &'static str {
    match unit {
        DateUnit::Day => "day",
        DateUnit::Hour => "hour",
        DateUnit::Minute => "minute",
        DateUnit::Second => "second",
    }
}

fn evaluate_expr(expr: &ExprCondition, fact: &Fact) -> FactumResult<bool> {
    let left = expr.left.resolve(fact);
    let right = expr.right.resolve(fact);
    let (Some(left), Some(right)) = (left, right) else { return Ok(false) };
    let Some(ordering) = comparable_cmp(&left, &right) else { return Ok(false) };
    Ok(match expr.op {
        ExprOp::Eq => ordering.is_eq(),
        ExprOp::Ne => !ordering.is_eq(),
        ExprOp::Gt => ordering.is_gt(),
        ExprOp::Gte => ordering.is_ge(),
        ExprOp::Lt => ordering.is_lt(),
        ExprOp::Lte => ordering.is_le(),
    })
}

fn compare(
    fact: &Fact,
    field: &str,
    value: &Json,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> FactumResult<bool> {
    let Some(actual) = fact.attribute(field) else { return Ok(false) };
    let Ok(expected) = FactValue::try_from(value) else { return Ok(false) };
    Ok(comparable_cmp(actual, &expected).is_some_and(accept))
}

/// Compare two fact values with the coercion rules from the predicate
/// grammar: numeric strings compare as numbers, booleans as booleans,
/// ISO-string values compare as timestamps when the other side is a
/// timestamp. Falls back to `FactValue`'s own partial order otherwise.
fn comparable_cmp(a: &FactValue, b: &FactValue) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (FactValue::String(s), n @ (FactValue::Integer(_) | FactValue::Float(_))) = (a, b) {
        if let (Ok(parsed), Some(n)) = (s.parse::<f64>(), n.as_f64()) {
            return parsed.partial_cmp(&n);
        }
    }
    if let (n @ (FactValue::Integer(_) | FactValue::Float(_)), FactValue::String(s)) = (a, b) {
        if let (Some(n), Ok(parsed)) = (n.as_f64(), s.parse::<f64>()) {
            return n.partial_cmp(&parsed);
        }
    }
    if let (FactValue::Date(a), FactValue::Date(b)) = (a, b) {
        return a.partial_cmp(b);
    }
    if let (FactValue::String(s), FactValue::Date(dt)) = (a, b) {
        return parse_iso(s).map(|parsed| parsed.cmp(dt));
    }
    if let (FactValue::Date(dt), FactValue::String(s)) = (a, b) {
        return parse_iso(s).map(|parsed| dt.cmp(&parsed));
    }
    a.partial_cmp(b)
}

fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

fn values_equal(actual: &FactValue, expected: &Json) -> bool {
    match FactValue::try_from(expected) {
        Ok(expected) => comparable_cmp(actual, &expected).is_some_and(std::cmp::Ordering::is_eq),
        Err(_) => false,
    }
}

fn eq_or_absent(actual: Option<&FactValue>, expected: &Json) -> bool {
    match actual {
        None => expected.is_null(),
        Some(actual) => values_equal(actual, expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn fact(attrs: &[(&str, FactValue)]) -> Fact {
        Fact {
            id: "f1".into(),
            t: 1,
            c: Utc.timestamp_opt(0, 0).unwrap(),
            d: attrs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    #[test]
    fn missing_field_matches_eq_null_not_ne_null() {
        let f = fact(&[]);
        let eq_null = Condition::Eq { field: "x".into(), value: Json::Null };
        let ne_null = Condition::Ne { field: "x".into(), value: Json::Null };
        assert!(eq_null.evaluate(&f).unwrap());
        assert!(!ne_null.evaluate(&f).unwrap());
    }

    #[test]
    fn exists_false_matches_absent_field() {
        let f = fact(&[]);
        let cond = Condition::Exists { field: "x".into(), expected: false };
        assert!(cond.evaluate(&f).unwrap());
    }

    #[test]
    fn numeric_string_coerces_for_comparison() {
        let f = fact(&[("amount", FactValue::String("100".into()))]);
        let cond = Condition::Gt { field: "amount".into(), value: json!(50) };
        assert!(cond.evaluate(&f).unwrap());
    }

    #[test]
    fn regex_fails_silently_on_non_string() {
        let f = fact(&[("x", FactValue::Integer(5))]);
        let cond = Condition::Regex { field: "x".into(), pattern: "5".into(), options: None };
        assert!(!cond.evaluate(&f).unwrap());
    }

    #[test]
    fn and_short_circuits_on_first_false() {
        let f = fact(&[("a", FactValue::Integer(1))]);
        let cond = Condition::And(vec![
            Condition::Eq { field: "a".into(), value: json!(1) },
            Condition::Eq { field: "missing".into(), value: json!(2) },
        ]);
        assert!(!cond.evaluate(&f).unwrap());
    }

    #[test]
    fn store_query_renders_and_or_nesting() {
        let cond = Condition::And(vec![
            Condition::Eq { field: "a".into(), value: json!(1) },
            Condition::Or(vec![Condition::Exists { field: "b".into(), expected: true }]),
        ]);
        let rendered = cond.to_store_query();
        assert_eq!(rendered["$and"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn expr_compares_two_fields() {
        let f = fact(&[("a", FactValue::Integer(5)), ("b", FactValue::Integer(3))]);
        let cond = Condition::Expr(ExprCondition {
            op: ExprOp::Gt,
            left: ExprOperand::Field("a".into()),
            right: ExprOperand::Field("b".into()),
        });
        assert!(cond.evaluate(&f).unwrap());
    }
}
