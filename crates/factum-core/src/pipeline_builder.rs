//! Translates a counter-part group into a store-side aggregation pipeline
//! fragment. Building the fragment and running it are different jobs —
//! execution belongs to `FactStore`.

use crate::counter_producer::CounterPart;
use crate::types::AttributeSource;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as Json, json};

/// Builds `match`/`lookup`/`limit`/`facet` pipeline fragments for one
/// `(index-entry, counter-group)` pair.
pub struct PipelineBuilder {
    /// Whether index entries already carry the fact payload (`d`), making a
    /// `$lookup` back into the fact collection unnecessary.
    include_fact_data: bool,
    /// Whether counter pipelines are allowed to `$lookup` into the fact
    /// collection at all.
    lookup_facts: bool,
}

impl PipelineBuilder {
    /// Construct a builder from the process-wide `includeFactDataToIndex`
    /// and `lookupFacts` knobs.
    pub fn new(include_fact_data: bool, lookup_facts: bool) -> Self {
        Self { include_fact_data, lookup_facts }
    }

    /// Build the full pipeline for one hash bucket and one group of counter
    /// parts riding on it.
    ///
    /// The outer `match` stage uses the union of every part's time window
    /// in the group, so it can never exclude a candidate any part actually
    /// needs; each facet sub-pipeline then re-applies its own (possibly
    /// narrower) window so parts with differing windows inside one group
    /// still see exactly their own candidates.
    pub fn build(
        &self,
        hash_value: &str,
        incoming_fact_id: &str,
        reference_time: DateTime<Utc>,
        group: &[&CounterPart],
    ) -> Vec<Json> {
        let mut stages = Vec::new();

        let mut outer_match = Map::new();
        outer_match.insert("_id.h".to_string(), json!(hash_value));
        outer_match.insert("_id.f".to_string(), json!({ "$ne": incoming_fact_id }));
        if let Some(bound) = union_dt_bound(group, reference_time) {
            outer_match.insert("dt".to_string(), bound);
        }
        stages.push(json!({ "$match": outer_match }));

        if self.lookup_facts && !self.include_fact_data {
            stages.push(json!({
                "$lookup": {
                    "from": "facts",
                    "localField": "_id.f",
                    "foreignField": "id",
                    "as": "fact",
                },
            }));
            stages.push(json!({ "$unwind": "$fact" }));
        }

        if let Some(limit) = group
            .iter()
            .filter_map(|part| nonzero(part.definition.caps.max_evaluated_records))
            .min()
        {
            stages.push(json!({ "$limit": limit }));
        }

        let mut facet = Map::new();
        for part in group {
            facet.insert(part.key.flatten(), Json::Array(self.counter_sub_pipeline(part, reference_time)));
        }
        stages.push(json!({ "$facet": facet }));

        stages
    }

    fn counter_sub_pipeline(&self, part: &CounterPart, reference_time: DateTime<Utc>) -> Vec<Json> {
        let mut sub = Vec::new();

        let mut sub_match = Map::new();
        if let Some(bound) = dt_bound(&part.definition.window, reference_time) {
            sub_match.insert("dt".to_string(), bound);
        }
        if let Some(condition) = &part.definition.evaluation_conditions {
            merge_condition(&mut sub_match, &rewrite_field_paths(&condition.to_store_query(), "d"));
        }
        if !sub_match.is_empty() {
            sub.push(json!({ "$match": sub_match }));
        }

        if let Some(limit) = nonzero(part.definition.caps.max_matching_records) {
            sub.push(json!({ "$limit": limit }));
        }

        sub.push(json!({ "$group": group_stage(part) }));
        sub
    }
}

fn nonzero(n: u64) -> Option<u64> {
    (n != 0).then_some(n)
}

/// The `dt` range one window implies, relative to `reference_time`. `None`
/// when both sides are unbounded.
fn dt_bound(window: &crate::types::TimeWindow, reference_time: DateTime<Utc>) -> Option<Json> {
    let mut range = Map::new();
    if window.from_time_ms != 0 {
        let far = reference_time - chrono::Duration::milliseconds(window.from_time_ms as i64);
        range.insert("$gt".to_string(), json!(far));
    }
    if window.to_time_ms != 0 {
        let near = reference_time - chrono::Duration::milliseconds(window.to_time_ms as i64);
        range.insert("$lte".to_string(), json!(near));
    }
    (!range.is_empty()).then(|| Json::Object(range))
}

/// The widest `dt` range across every part in a group: the earliest `$gt`
/// and the latest `$lte` of any member, so the outer `match` never excludes
/// a candidate a narrower per-part window would keep.
fn union_dt_bound(group: &[&CounterPart], reference_time: DateTime<Utc>) -> Option<Json> {
    let mut widest_far: Option<DateTime<Utc>> = None;
    let mut widest_near: Option<DateTime<Utc>> = None;
    let mut any_bounded = false;

    for part in group {
        let window = &part.definition.window;
        any_bounded = true;
        if window.from_time_ms == 0 {
            widest_far = None;
        } else if let Some(current) = widest_far {
            let far = reference_time - chrono::Duration::milliseconds(window.from_time_ms as i64);
            widest_far = Some(current.min(far));
        }
        if window.to_time_ms == 0 {
            widest_near = Some(reference_time);
        } else {
            let near = reference_time - chrono::Duration::milliseconds(window.to_time_ms as i64);
            widest_near = Some(widest_near.map_or(near, |current: DateTime<Utc>| current.max(near)));
        }
    }

    if !any_bounded {
        return None;
    }
    let mut range = Map::new();
    if let Some(far) = widest_far {
        range.insert("$gt".to_string(), json!(far));
    }
    if let Some(near) = widest_near {
        range.insert("$lte".to_string(), json!(near));
    }
    (!range.is_empty()).then(|| Json::Object(range))
}

fn merge_condition(target: &mut Map<String, Json>, rendered: &Json) {
    let Json::Object(fields) = rendered else { return };
    for (key, value) in fields {
        match target.get_mut(key) {
            Some(Json::Object(existing)) => {
                if let Json::Object(incoming) = value {
                    existing.extend(incoming.clone());
                }
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Rewrite a rendered condition's bare field-name keys (e.g. `"amount"`) to
/// the store's nested payload path (e.g. `"d.amount"`). Operator keys
/// (`$eq`, `$and`, …) are left alone; `$and`/`$or`/`$nor` arrays recurse so
/// every leaf field gets the same prefix. `$expr` operands already carry
/// their own `"$d."`-prefixed paths and are left untouched.
fn rewrite_field_paths(value: &Json, prefix: &str) -> Json {
    match value {
        Json::Object(map) => {
            let mut out = Map::new();
            for (key, v) in map {
                if key.starts_with('$') {
                    let rewritten = if matches!(key.as_str(), "$and" | "$or" | "$nor") {
                        rewrite_field_paths(v, prefix)
                    } else {
                        v.clone()
                    };
                    out.insert(key.clone(), rewritten);
                } else {
                    out.insert(format!("{prefix}.{key}"), v.clone());
                }
            }
            Json::Object(out)
        }
        Json::Array(items) => Json::Array(items.iter().map(|i| rewrite_field_paths(i, prefix)).collect()),
        other => other.clone(),
    }
}

fn group_stage(part: &CounterPart) -> Json {
    let mut doc = Map::new();
    doc.insert("_id".to_string(), Json::Null);
    for (name, attr) in &part.definition.attributes {
        let operand = match &attr.source {
            AttributeSource::Field(field) => json!(format!("$d.{field}")),
            AttributeSource::Constant(value) => Json::from(value),
        };
        doc.insert(name.clone(), json!({ attr.operator.clone(): operand }));
    }
    Json::Object(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use crate::types::{CounterAttribute, CounterDefinition, CounterPartKey, RecordCaps, TimeWindow};
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::HashMap;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn counter_part(name: &str, from_time_ms: u64, to_time_ms: u64) -> CounterPart {
        CounterPart {
            key: CounterPartKey::whole(name),
            definition: CounterDefinition {
                name: name.to_string(),
                index_type_name: "test_type_1".into(),
                computation_conditions: None,
                evaluation_conditions: None,
                attributes: HashMap::from([(
                    "total".to_string(),
                    CounterAttribute { operator: "$sum".into(), source: AttributeSource::Field("amount".into()) },
                )]),
                window: TimeWindow { from_time_ms, to_time_ms },
                caps: RecordCaps::UNBOUNDED,
            },
        }
    }

    #[test]
    fn outer_match_excludes_incoming_fact_and_matches_hash() {
        let builder = PipelineBuilder::new(true, false);
        let part = counter_part("total", 120_000, 0);
        let stages = builder.build("hash-1", "fact-1", now(), &[&part]);
        let outer_match = &stages[0]["$match"];
        assert_eq!(outer_match["_id.h"], json!("hash-1"));
        assert_eq!(outer_match["_id.f"]["$ne"], json!("fact-1"));
    }

    #[test]
    fn unbounded_window_produces_no_dt_bound() {
        let builder = PipelineBuilder::new(true, false);
        let part = counter_part("total", 0, 0);
        let stages = builder.build("hash-1", "fact-1", now(), &[&part]);
        assert!(stages[0]["$match"].get("dt").is_none());
    }

    #[test]
    fn lookup_stage_added_only_when_payload_not_denormalized() {
        let builder = PipelineBuilder::new(false, true);
        let part = counter_part("total", 0, 0);
        let stages = builder.build("hash-1", "fact-1", now(), &[&part]);
        assert!(stages.iter().any(|s| s.get("$lookup").is_some()));
    }

    #[test]
    fn facet_contains_one_sub_pipeline_per_part_name() {
        let builder = PipelineBuilder::new(true, false);
        let whole = counter_part("total", 120_000, 0);
        let part0 = CounterPart { key: CounterPartKey::part("total", 0), ..counter_part("total", 30_000, 0) };
        let stages = builder.build("hash-1", "fact-1", now(), &[&whole, &part0]);
        let facet = stages.last().unwrap()["$facet"].as_object().unwrap();
        assert!(facet.contains_key("total"));
        assert!(facet.contains_key("total#0"));
    }

    #[test]
    fn group_stage_renders_sum_operator_over_field() {
        let part = counter_part("total", 120_000, 0);
        let stage = group_stage(&part);
        assert_eq!(stage["total"]["$sum"], json!("$d.amount"));
    }

    #[test]
    fn max_matching_records_becomes_a_limit_before_group() {
        let mut part = counter_part("total", 120_000, 0);
        part.definition.caps = RecordCaps { max_evaluated_records: 0, max_matching_records: 10 };
        let builder = PipelineBuilder::new(true, false);
        let sub = builder.counter_sub_pipeline(&part, now());
        assert!(sub.iter().any(|s| s.get("$limit") == Some(&json!(10))));
    }

    #[test]
    fn evaluation_conditions_render_with_payload_prefix() {
        let mut part = counter_part("total", 120_000, 0);
        part.definition.evaluation_conditions =
            Some(Condition::Eq { field: "amount".into(), value: json!(100) });
        let builder = PipelineBuilder::new(true, false);
        let sub = builder.counter_sub_pipeline(&part, now());
        let match_stage = &sub[0]["$match"];
        assert_eq!(match_stage["d.amount"]["$eq"], json!(100));
    }
}
