//! Produces the secondary index entries for a fact, per the index
//! configuration.

use crate::error::FactumResult;
use crate::types::{Fact, IndexConfigEntry, IndexEntry, IndexEntryId, IndexValueKind};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use factum_types::FactValue;
use sha1::{Digest, Sha1};
use tracing::warn;

/// Pairs a produced hash with the `IndexConfigEntry` that produced it, for
/// later planning by `CounterProducer`/`PipelineBuilder`.
#[derive(Debug, Clone, Copy)]
pub struct HashedIndexRef<'a> {
    /// The hash (or raw `"{it}:{v}"` form) that identifies this bucket.
    pub hash_value: &'a str,
    /// The index config row it was produced from.
    pub index: &'a IndexConfigEntry,
}

/// Turns a fact into its set of index entries.
pub struct FactIndexer {
    config: Vec<IndexConfigEntry>,
    include_fact_data: bool,
}

impl FactIndexer {
    /// Build an indexer from an already-loaded, already-validated index
    /// configuration. `include_fact_data` mirrors the process-wide
    /// `includeFactDataToIndex` knob: whether entries embed the owning
    /// fact's payload.
    pub fn new(config: Vec<IndexConfigEntry>, include_fact_data: bool) -> Self {
        Self { config, include_fact_data }
    }

    /// The index configuration this indexer was built from.
    pub fn config(&self) -> &[IndexConfigEntry] {
        &self.config
    }

    /// Produce every index entry for `fact`. Pure and deterministic: for a
    /// fixed fact and config, output is byte-identical across runs, ordered
    /// by index-config declaration order and then by `fieldName` list order.
    #[tracing::instrument(skip(self, fact), fields(fact_id = %fact.id))]
    pub fn index(&self, fact: &Fact) -> FactumResult<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        for row in &self.config {
            for field_name in row.field_name.names() {
                let Some(value) = fact.attribute(field_name) else { continue };
                if matches!(value, FactValue::Null) {
                    continue;
                }
                if let Some(cond) = &row.computation_conditions {
                    if !cond.evaluate(fact)? {
                        continue;
                    }
                }
                let Some(dt) = resolve_date(fact, &row.date_name) else {
                    warn!(
                        index_type_name = %row.index_type_name,
                        date_name = %row.date_name,
                        "skipping index entry: dateName unparseable",
                    );
                    continue;
                };
                let stringified = value.as_string();
                let h = match row.index_value {
                    IndexValueKind::Hash => hash_value(row.index_type, &stringified),
                    IndexValueKind::Value => format!("{}:{}", row.index_type, stringified),
                };
                entries.push(IndexEntry {
                    id: IndexEntryId { h, f: fact.id.clone() },
                    dt,
                    c: Utc::now(),
                    it: row.index_type,
                    v: stringified,
                    t: fact.t,
                    d: self.include_fact_data.then(|| fact.d.clone()),
                });
            }
        }
        Ok(entries)
    }

    /// Pair each produced entry's hash with its originating config row, for
    /// `CounterExecutor`'s grouping step.
    pub fn hash_values_for_search<'a>(
        &'a self,
        entries: &'a [IndexEntry],
    ) -> Vec<HashedIndexRef<'a>> {
        entries
            .iter()
            .filter_map(|entry| {
                self.config
                    .iter()
                    .find(|row| row.index_type == entry.it)
                    .map(|index| HashedIndexRef { hash_value: entry.id.h.as_str(), index })
            })
            .collect()
    }
}

fn hash_value(index_type: i64, value: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{index_type}:{value}"));
    BASE64.encode(hasher.finalize())
}

fn resolve_date(fact: &Fact, date_name: &str) -> Option<DateTime<Utc>> {
    match fact.attribute(date_name)? {
        FactValue::Date(dt) => Some(*dt),
        FactValue::Integer(ms) => DateTime::from_timestamp_millis(*ms),
        #[allow(clippy::cast_possible_truncation)]
        FactValue::Float(ms) => DateTime::from_timestamp_millis(*ms as i64),
        FactValue::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldNameSpec;

    fn fact(attrs: &[(&str, FactValue)]) -> Fact {
        Fact {
            id: "f1".into(),
            t: 1,
            c: Utc::now(),
            d: attrs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    fn index_config() -> IndexConfigEntry {
        IndexConfigEntry {
            field_name: FieldNameSpec::Single("f1".into()),
            date_name: "dt".into(),
            index_type_name: "test_type_1".into(),
            index_type: 1,
            index_value: IndexValueKind::Hash,
            computation_conditions: None,
            limit: None,
            counters_count: Vec::new(),
        }
    }

    #[test]
    fn indexes_present_non_null_fields_only() {
        let indexer = FactIndexer::new(vec![index_config()], false);
        let f = fact(&[
            ("f1", FactValue::String("value1".into())),
            ("dt", FactValue::Date(Utc::now())),
        ]);
        let entries = indexer.index(&f).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].it, 1);
        assert_eq!(entries[0].v, "value1");
    }

    #[test]
    fn skips_null_field() {
        let indexer = FactIndexer::new(vec![index_config()], false);
        let f = fact(&[("f1", FactValue::Null), ("dt", FactValue::Date(Utc::now()))]);
        assert!(indexer.index(&f).unwrap().is_empty());
    }

    #[test]
    fn skips_entry_on_unparseable_date() {
        let indexer = FactIndexer::new(vec![index_config()], false);
        let f = fact(&[
            ("f1", FactValue::String("value1".into())),
            ("dt", FactValue::String("not-a-date".into())),
        ]);
        assert!(indexer.index(&f).unwrap().is_empty());
    }

    #[test]
    fn hash_index_is_deterministic() {
        let indexer = FactIndexer::new(vec![index_config()], false);
        let f = fact(&[
            ("f1", FactValue::String("value1".into())),
            ("dt", FactValue::Date(Utc::now())),
        ]);
        let a = indexer.index(&f).unwrap();
        let b = indexer.index(&f).unwrap();
        assert_eq!(a[0].id.h, b[0].id.h);
    }

    #[test]
    fn value_index_is_unhashed_raw_form() {
        let mut config = index_config();
        config.index_value = IndexValueKind::Value;
        let indexer = FactIndexer::new(vec![config], false);
        let f = fact(&[
            ("f1", FactValue::String("value1".into())),
            ("dt", FactValue::Date(Utc::now())),
        ]);
        let entries = indexer.index(&f).unwrap();
        assert_eq!(entries[0].id.h, "1:value1");
    }

    #[test]
    fn multi_field_name_candidates_each_produce_an_entry() {
        let mut config = index_config();
        config.field_name = FieldNameSpec::Multiple(vec!["f1".into(), "f2".into()]);
        let indexer = FactIndexer::new(vec![config], false);
        let f = fact(&[
            ("f1", FactValue::String("a".into())),
            ("f2", FactValue::String("b".into())),
            ("dt", FactValue::Date(Utc::now())),
        ]);
        let entries = indexer.index(&f).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn hash_values_for_search_pairs_hash_with_config_row() {
        let indexer = FactIndexer::new(vec![index_config()], false);
        let f = fact(&[
            ("f1", FactValue::String("value1".into())),
            ("dt", FactValue::Date(Utc::now())),
        ]);
        let entries = indexer.index(&f).unwrap();
        let pairs = indexer.hash_values_for_search(&entries);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].index.index_type_name, "test_type_1");
    }
}
