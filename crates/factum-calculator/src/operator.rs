//! The aggregation-operator contract shared by every counter attribute.
//!
//! A `CounterDefinition` attribute names one of five operators (`$sum`,
//! `$avg`, `$min`, `$max`, `$addToSet`) and a source field. Evaluating that
//! attribute over a set of facts produces a [`PartialAggregate`] — "partial"
//! because split counters (see `CounterProducer`) evaluate each time slice
//! independently and must recombine the per-slice results afterwards without
//! re-reading the underlying facts. `$avg` is why the state carries a sum and
//! a count rather than a plain average: averaging two already-averaged parts
//! is not the same number as averaging the union of their inputs.

use factum_types::FactValue;
use std::collections::HashMap;

/// Running aggregation state for one operator over one attribute.
///
/// This is also the wire shape a `FactStore` facet stage is expected to
/// return per counter part: a `$sum` facet yields a bare number, an `$avg`
/// facet yields `{sum, count}`, `$min`/`$max` yield the extremal value (or
/// nothing, if no fact matched), and `$addToSet` yields an array.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialAggregate {
    /// Running total for `$sum`.
    Sum(f64),
    /// Running sum and count for `$avg`; finalized as `sum / count`.
    Avg {
        /// Sum of every value seen so far.
        sum: f64,
        /// Count of values seen so far.
        count: u64,
    },
    /// Running minimum for `$min`. `None` until the first value arrives.
    Min(Option<FactValue>),
    /// Running maximum for `$max`. `None` until the first value arrives.
    Max(Option<FactValue>),
    /// Accumulated distinct values for `$addToSet`.
    AddToSet(Vec<FactValue>),
}

impl PartialAggregate {
    /// Convert this partial aggregate to the value a caller sees once no
    /// further facts or parts will be folded in.
    pub fn finalize(&self) -> FactValue {
        match self {
            Self::Sum(total) => FactValue::Float(*total),
            Self::Avg { sum, count } => {
                if *count == 0 {
                    FactValue::Null
                } else {
                    FactValue::Float(sum / *count as f64)
                }
            }
            Self::Min(v) | Self::Max(v) => v.clone().unwrap_or(FactValue::Null),
            Self::AddToSet(values) => FactValue::Array(values.clone()),
        }
    }
}

/// Names a concrete aggregation operator. Mirrors the fixed set named in
/// counter attribute maps (`$sum`, `$avg`, `$min`, `$max`, `$addToSet`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationOperator {
    /// `$sum` — running total.
    Sum,
    /// `$avg` — mean of matched values.
    Avg,
    /// `$min` — smallest matched value.
    Min,
    /// `$max` — largest matched value.
    Max,
    /// `$addToSet` — deduplicated collection of matched values.
    AddToSet,
}

impl AggregationOperator {
    /// Parse the config-facing key (e.g. `"$sum"`) into an operator.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "$sum" => Some(Self::Sum),
            "$avg" => Some(Self::Avg),
            "$min" => Some(Self::Min),
            "$max" => Some(Self::Max),
            "$addToSet" => Some(Self::AddToSet),
            _ => None,
        }
    }

    /// Render the operator back to its config-facing key.
    pub fn as_key(&self) -> &'static str {
        match self {
            Self::Sum => "$sum",
            Self::Avg => "$avg",
            Self::Min => "$min",
            Self::Max => "$max",
            Self::AddToSet => "$addToSet",
        }
    }

    /// An empty accumulator, the starting point before any fact is folded in.
    pub fn empty(&self) -> PartialAggregate {
        match self {
            Self::Sum => PartialAggregate::Sum(0.0),
            Self::Avg => PartialAggregate::Avg { sum: 0.0, count: 0 },
            Self::Min => PartialAggregate::Min(None),
            Self::Max => PartialAggregate::Max(None),
            Self::AddToSet => PartialAggregate::AddToSet(Vec::new()),
        }
    }

    /// Fold one value into an in-process accumulator.
    ///
    /// Non-numeric values are ignored by `$sum`/`$avg`/`$min`/`$max` rather
    /// than treated as an error: a counter attribute that reads a field which
    /// is absent on some matched facts should still aggregate the facts
    /// where it is present.
    pub fn accumulate(&self, state: &mut PartialAggregate, value: &FactValue) {
        match (self, state) {
            (Self::Sum, PartialAggregate::Sum(total)) => {
                if let Some(n) = value.as_f64() {
                    *total += n;
                }
            }
            (Self::Avg, PartialAggregate::Avg { sum, count }) => {
                if let Some(n) = value.as_f64() {
                    *sum += n;
                    *count += 1;
                }
            }
            (Self::Min, PartialAggregate::Min(current)) => {
                if is_smaller(value, current) {
                    *current = Some(value.clone());
                }
            }
            (Self::Max, PartialAggregate::Max(current)) => {
                if is_larger(value, current) {
                    *current = Some(value.clone());
                }
            }
            (Self::AddToSet, PartialAggregate::AddToSet(values)) => {
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
            (op, state) => unreachable!(
                "PartialAggregate variant does not match operator {:?}: {:?}",
                op, state
            ),
        }
    }

    /// Recombine independently computed parts (e.g. one per split-counter
    /// time slice) into a single accumulator, as if the underlying facts had
    /// been folded in directly.
    pub fn merge(&self, parts: &[PartialAggregate]) -> PartialAggregate {
        let mut acc = self.empty();
        for part in parts {
            match (self, &mut acc, part) {
                (Self::Sum, PartialAggregate::Sum(total), PartialAggregate::Sum(p)) => {
                    *total += p;
                }
                (
                    Self::Avg,
                    PartialAggregate::Avg { sum, count },
                    PartialAggregate::Avg {
                        sum: p_sum,
                        count: p_count,
                    },
                ) => {
                    *sum += p_sum;
                    *count += p_count;
                }
                (Self::Min, PartialAggregate::Min(current), PartialAggregate::Min(p)) => {
                    if let Some(candidate) = p {
                        if is_smaller(candidate, current) {
                            *current = Some(candidate.clone());
                        }
                    }
                }
                (Self::Max, PartialAggregate::Max(current), PartialAggregate::Max(p)) => {
                    if let Some(candidate) = p {
                        if is_larger(candidate, current) {
                            *current = Some(candidate.clone());
                        }
                    }
                }
                (
                    Self::AddToSet,
                    PartialAggregate::AddToSet(values),
                    PartialAggregate::AddToSet(p),
                ) => {
                    for v in p {
                        if !values.contains(v) {
                            values.push(v.clone());
                        }
                    }
                }
                (op, acc, part) => unreachable!(
                    "merge operand mismatch for operator {:?}: {:?} / {:?}",
                    op, acc, part
                ),
            }
        }
        acc
    }
}

fn is_smaller(candidate: &FactValue, current: &Option<FactValue>) -> bool {
    match current {
        None => true,
        Some(existing) => matches!(
            candidate.partial_cmp(existing),
            Some(std::cmp::Ordering::Less)
        ),
    }
}

fn is_larger(candidate: &FactValue, current: &Option<FactValue>) -> bool {
    match current {
        None => true,
        Some(existing) => matches!(
            candidate.partial_cmp(existing),
            Some(std::cmp::Ordering::Greater)
        ),
    }
}

/// Fields a counter attribute may reference: a source field to pull from the
/// fact payload, keyed by attribute name.
pub type AttributeSources = HashMap<String, String>;
