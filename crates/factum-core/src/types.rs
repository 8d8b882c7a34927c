//! The fact-indexing data model: `Fact`, `IndexEntry`, `IndexConfigEntry`,
//! `CounterDefinition`, and the configuration rows that drive them.

use crate::condition::Condition;
use chrono::{DateTime, Utc};
use factum_types::FactValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A fact's identity. Globally unique, caller-supplied or generated.
pub type FactId = String;

/// A fact or index-entry payload: attribute name to scalar/timestamp value.
pub type PayloadMap = HashMap<String, FactValue>;

/// A typed event record, as defined in the data model: `{id, t, c, d}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fact {
    /// Globally unique identity.
    pub id: FactId,
    /// Fact type — a positive integer naming which field-config rows apply.
    pub t: i64,
    /// Creation timestamp.
    pub c: DateTime<Utc>,
    /// Canonical payload, keyed by the field-config's `dst` names.
    pub d: PayloadMap,
}

impl Fact {
    /// Read a payload attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&FactValue> {
        self.d.get(name)
    }
}

/// Which hashing scheme an `IndexConfigEntry` uses to derive `IndexEntry.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexValueKind {
    /// `h = base64(sha1("{indexType}:{value}"))`.
    Hash = 1,
    /// `h = "{indexType}:{stringified value}"`, unhashed.
    Value = 2,
}

/// `fieldName` in an `IndexConfigEntry` may name one payload attribute or
/// several (any of which produces an entry for that config row).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldNameSpec {
    /// A single canonical attribute name.
    Single(String),
    /// Any one of several candidate attribute names.
    Multiple(Vec<String>),
}

impl FieldNameSpec {
    /// Enumerate the candidate field names, in declaration order.
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::Single(name) => vec![name.as_str()],
            Self::Multiple(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// A `{limit, count}` row of the `countersCount` staircase: counters whose
/// `maxEvaluatedRecords` is at least `limit` may not exceed `count` per
/// execution group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CountersCountThreshold {
    /// The `maxEvaluatedRecords` floor this threshold applies to.
    pub limit: u64,
    /// Maximum number of such counters allowed in one group.
    pub count: u64,
}

/// One row of the index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfigEntry {
    /// Candidate payload attribute(s) this index is built from.
    pub field_name: FieldNameSpec,
    /// Payload attribute supplying `IndexEntry.dt`.
    pub date_name: String,
    /// Unique human-readable name for this index type.
    pub index_type_name: String,
    /// Unique numeric index type, stored as `IndexEntry.it`.
    pub index_type: i64,
    /// Whether the attribute value is hashed or stored verbatim.
    pub index_value: IndexValueKind,
    /// In-process predicate deciding whether this config row applies to a
    /// given fact.
    pub computation_conditions: Option<Condition>,
    /// Reserved for forward compatibility with the wire config shape.
    /// Distinct from `CounterDefinition.caps.max_evaluated_records` (the
    /// cap `PipelineBuilder`/`InMemoryFactStore` actually apply as a
    /// pre-grouping `limit`); parsed and validated but not otherwise read.
    pub limit: Option<u64>,
    /// Per-group sizing thresholds for counters riding this index.
    #[serde(default)]
    pub counters_count: Vec<CountersCountThreshold>,
}

impl IndexConfigEntry {
    /// Validate the structural invariants from the data model: canonical
    /// field names look like `f{1..23}` when used as a slot name, and
    /// `indexType`/`indexTypeName` must be meaningful identifiers.
    pub fn validate(&self) -> Result<(), String> {
        if self.index_type_name.trim().is_empty() {
            return Err("indexTypeName must not be empty".to_string());
        }
        if self.index_type <= 0 {
            return Err(format!(
                "indexType must be positive, got {}",
                self.index_type
            ));
        }
        if self.date_name.trim().is_empty() {
            return Err("dateName must not be empty".to_string());
        }
        Ok(())
    }
}

/// The composite identity of an `IndexEntry`: `(h, f)` is the uniqueness key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexEntryId {
    /// `base64(sha1(indexType + ":" + value))` or the raw `"{it}:{v}"` form.
    pub h: String,
    /// The owning fact's id.
    pub f: FactId,
}

/// A derived record enabling lookup of facts by hashed (or raw) attribute
/// value. See §3 of the data model for field semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Composite identity.
    #[serde(flatten)]
    pub id: IndexEntryId,
    /// Reference timestamp, read from the index config's `dateName`.
    pub dt: DateTime<Utc>,
    /// Insertion time.
    pub c: DateTime<Utc>,
    /// The numeric index type this entry was produced for.
    pub it: i64,
    /// Stringified attribute value that produced `h`.
    pub v: String,
    /// The owning fact's type.
    pub t: i64,
    /// Optional denormalized copy of the owning fact's payload.
    pub d: Option<PayloadMap>,
}

/// One output attribute of a counter: an aggregation operator applied to a
/// constant or a payload path read off each matching fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterAttribute {
    /// Aggregation operator key, e.g. `"$sum"`.
    pub operator: String,
    /// What the operator reads from each matching fact.
    pub source: AttributeSource,
}

/// The value an operator folds in for each matching fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeSource {
    /// Read `fact.d[field]`.
    Field(String),
    /// A literal, the same for every matching fact (e.g. counting via
    /// `$sum` over a constant `1`).
    Constant(FactValue),
}

/// A time window, relative to the incoming fact's reference timestamp, in
/// milliseconds. `0` on either side means unbounded on that side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    /// Milliseconds before the reference timestamp (far edge of the window).
    pub from_time_ms: u64,
    /// Milliseconds before the reference timestamp (near edge, closer to now).
    pub to_time_ms: u64,
}

impl TimeWindow {
    /// Whether `boundary_ms` strictly splits this window: it must fall
    /// strictly inside `(to_time_ms, from_time_ms)`, not on either endpoint.
    pub fn is_split_by(&self, boundary_ms: u64) -> bool {
        boundary_ms > self.to_time_ms && boundary_ms < self.from_time_ms
    }
}

/// Non-negative caps on record counts. `0` means unbounded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordCaps {
    /// Cap on records evaluated before grouping (0 = unbounded).
    pub max_evaluated_records: u64,
    /// Cap on records matching a counter's own conditions (0 = unbounded).
    pub max_matching_records: u64,
}

impl RecordCaps {
    /// No caps at all.
    pub const UNBOUNDED: Self = Self { max_evaluated_records: 0, max_matching_records: 0 };
}

/// A declarative aggregation counter: filter predicates, an aggregation
/// expression per output attribute, and an optional time-bounded window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterDefinition {
    /// Unique counter name.
    pub name: String,
    /// Which `IndexConfigEntry.index_type_name` this counter rides on.
    pub index_type_name: String,
    /// In-process predicate: does this counter apply to the incoming fact?
    pub computation_conditions: Option<Condition>,
    /// Store-side predicate: which historical facts does this counter see?
    pub evaluation_conditions: Option<Condition>,
    /// Output attribute name to aggregation expression.
    pub attributes: HashMap<String, CounterAttribute>,
    /// Time window, relative to the incoming fact.
    pub window: TimeWindow,
    /// Record caps.
    pub caps: RecordCaps,
}

impl CounterDefinition {
    /// Validate the structural invariants from the data model.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("counter name must not be empty".to_string());
        }
        if self.window.from_time_ms != 0
            && self.window.to_time_ms != 0
            && self.window.from_time_ms <= self.window.to_time_ms
        {
            return Err(format!(
                "counter '{}': fromTimeMs ({}) must be greater than toTimeMs ({})",
                self.name, self.window.from_time_ms, self.window.to_time_ms
            ));
        }
        if self.attributes.is_empty() {
            return Err(format!("counter '{}': attributes must not be empty", self.name));
        }
        Ok(())
    }
}

/// Identifies one slice of a time-interval-split counter.
///
/// Ad-hoc `"name#N"` string keys are replaced with this typed pair
/// internally; the `#N` suffix is produced only at the external boundary —
/// pipeline construction and the public result map — via [`Self::flatten`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CounterPartKey {
    /// The original, unsplit counter name.
    pub base: String,
    /// `None` for a counter that was never split; `Some(index)` for one
    /// slice of a split counter, in ascending window order.
    pub part_index: Option<u32>,
}

impl CounterPartKey {
    /// A key for a counter that is not split.
    pub fn whole(base: impl Into<String>) -> Self {
        Self { base: base.into(), part_index: None }
    }

    /// A key for one part of a split counter.
    pub fn part(base: impl Into<String>, part_index: u32) -> Self {
        Self { base: base.into(), part_index: Some(part_index) }
    }

    /// Render to the external `"{base}#{part_index}"` form.
    pub fn flatten(&self) -> String {
        match self.part_index {
            Some(i) => format!("{}#{i}", self.base),
            None => self.base.clone(),
        }
    }
}

/// One row of the field configuration used by `FactMapper`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfigEntry {
    /// Source attribute name on the incoming message.
    pub src: String,
    /// Destination attribute name on the produced fact.
    pub dst: String,
    /// Message types this mapping applies to.
    pub message_types: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_window_split_excludes_endpoints() {
        let window = TimeWindow { from_time_ms: 120_000, to_time_ms: 0 };
        assert!(!window.is_split_by(0));
        assert!(!window.is_split_by(120_000));
        assert!(window.is_split_by(60_000));
    }

    #[test]
    fn counter_part_key_flattens_only_when_split() {
        assert_eq!(CounterPartKey::whole("total").flatten(), "total");
        assert_eq!(CounterPartKey::part("total", 2).flatten(), "total#2");
    }

    #[test]
    fn counter_validate_rejects_inverted_window() {
        let counter = CounterDefinition {
            name: "bad".into(),
            index_type_name: "idx".into(),
            computation_conditions: None,
            evaluation_conditions: None,
            attributes: HashMap::from([(
                "total".to_string(),
                CounterAttribute {
                    operator: "$sum".into(),
                    source: AttributeSource::Field("amount".into()),
                },
            )]),
            window: TimeWindow { from_time_ms: 10, to_time_ms: 20 },
            caps: RecordCaps::UNBOUNDED,
        };
        assert!(counter.validate().is_err());
    }
}
