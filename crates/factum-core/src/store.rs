//! `FactStore` port: the contract the engine drives against a document
//! store, plus an in-memory reference implementation used by tests.

use crate::counter_producer::CounterPart;
use crate::error::{FactumError, FactumResult};
use crate::types::{AttributeSource, CounterPartKey, Fact, FactId, IndexEntry, TimeWindow};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use factum_calculator::{AggregationOperator, PartialAggregate};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Outcome of [`FactStore::save_fact`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveFactOutcome {
    /// A new row was created.
    pub inserted: bool,
    /// An existing row (same `id`) was overwritten.
    pub updated: bool,
    /// The write was a no-op (store-specific; the in-memory store never
    /// reports this).
    pub ignored: bool,
    /// Wall-clock time the store spent on this call.
    pub processing_time: Duration,
}

/// Outcome of [`FactStore::save_index_entries`].
#[derive(Debug, Clone, Default)]
pub struct SaveIndexEntriesOutcome {
    /// Number of new `(h, f)` rows created.
    pub inserted: usize,
    /// Number of rows that already existed and were overwritten.
    pub updated: usize,
    /// Per-entry failure descriptions; a non-empty list does not fail the
    /// call as a whole.
    pub errors: Vec<String>,
    /// Wall-clock time the store spent on this call.
    pub processing_time: Duration,
}

impl SaveIndexEntriesOutcome {
    /// Whether every entry in the batch was written without error.
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of [`FactStore::get_relevant_facts`].
#[derive(Debug, Clone, Default)]
pub struct RelevantFactsOutcome {
    /// Matching facts, most-recently-indexed first.
    pub result: Vec<Fact>,
    /// Wall-clock time the store spent on this call.
    pub processing_time: Duration,
}

/// The store-facing contract the engine drives. A real adapter runs the
/// fragments `PipelineBuilder` produces against an aggregation-capable
/// document store; [`InMemoryFactStore`] evaluates the same semantics
/// directly, without going through a pipeline DSL.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Persist a fact. Idempotent on `id`.
    async fn save_fact(&self, fact: Fact) -> FactumResult<SaveFactOutcome>;

    /// Persist a batch of index entries. Idempotent on `(h, f)`.
    async fn save_index_entries(&self, entries: Vec<IndexEntry>) -> FactumResult<SaveIndexEntriesOutcome>;

    /// Distinct facts that have at least one index entry with `h` in
    /// `hashes`, excluding `excluded_fact_id`, optionally depth-limited and
    /// date-cut.
    async fn get_relevant_facts(
        &self,
        hashes: &[String],
        excluded_fact_id: &str,
        depth_limit: Option<u64>,
        depth_from_date: Option<DateTime<Utc>>,
    ) -> FactumResult<RelevantFactsOutcome>;

    /// Evaluate one hash bucket's counter-part group, returning each part's
    /// own partial aggregate per output attribute. Recombining split parts
    /// into the user-visible counter value is `CounterProducer::merge`'s
    /// job, not the store's.
    ///
    /// `depth_limit`/`depth_from_date` are the global caps `CounterExecutor`
    /// was invoked with, applied across the whole candidate set before any
    /// per-part window or condition filtering.
    async fn get_relevant_fact_counters(
        &self,
        hash_value: &str,
        excluded_fact_id: &str,
        reference_time: DateTime<Utc>,
        depth_limit: Option<u64>,
        depth_from_date: Option<DateTime<Utc>>,
        group: &[CounterPart],
    ) -> FactumResult<HashMap<CounterPartKey, HashMap<String, PartialAggregate>>>;

    /// Idempotent schema and secondary-index setup.
    async fn create_database(&self) -> FactumResult<()>;

    /// Append-only audit trail entry.
    async fn save_log(&self, process_id: &str, message: &str, fact_id: Option<&str>) -> FactumResult<()>;

    /// Synchronous, fast-failing connectivity check.
    fn check_connection(&self) -> FactumResult<()>;
}

/// One row of the in-memory store's audit log.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Identifier of the `processMessage` call this log entry belongs to.
    pub process_id: String,
    /// Human-readable message.
    pub message: String,
    /// The fact this log entry concerns, if any.
    pub fact_id: Option<FactId>,
    /// When this entry was recorded.
    pub logged_at: DateTime<Utc>,
}

/// Reference `FactStore` implementation: no network, no persistence across
/// process restarts, used by tests and local development.
#[derive(Debug, Default)]
pub struct InMemoryFactStore {
    facts: DashMap<FactId, Fact>,
    index_entries: DashMap<(String, String), IndexEntry>,
    logs: RwLock<Vec<LogRecord>>,
}

impl InMemoryFactStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of facts currently held. Exposed for the idempotency tests.
    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    /// Number of index entries currently held.
    pub fn index_entry_count(&self) -> usize {
        self.index_entries.len()
    }
}

#[async_trait]
impl FactStore for InMemoryFactStore {
    async fn save_fact(&self, fact: Fact) -> FactumResult<SaveFactOutcome> {
        let started = Instant::now();
        let existed = self.facts.contains_key(&fact.id);
        self.facts.insert(fact.id.clone(), fact);
        Ok(SaveFactOutcome {
            inserted: !existed,
            updated: existed,
            ignored: false,
            processing_time: started.elapsed(),
        })
    }

    async fn save_index_entries(&self, entries: Vec<IndexEntry>) -> FactumResult<SaveIndexEntriesOutcome> {
        let started = Instant::now();
        let mut inserted = 0usize;
        let mut updated = 0usize;
        let mut errors = Vec::new();
        for entry in entries {
            if entry.id.h.is_empty() || entry.id.f.is_empty() {
                errors.push(format!("index entry missing h or f: {:?}", entry.id));
                continue;
            }
            let key = (entry.id.h.clone(), entry.id.f.clone());
            if self.index_entries.contains_key(&key) {
                updated += 1;
            } else {
                inserted += 1;
            }
            self.index_entries.insert(key, entry);
        }
        Ok(SaveIndexEntriesOutcome { inserted, updated, errors, processing_time: started.elapsed() })
    }

    async fn get_relevant_facts(
        &self,
        hashes: &[String],
        excluded_fact_id: &str,
        depth_limit: Option<u64>,
        depth_from_date: Option<DateTime<Utc>>,
    ) -> FactumResult<RelevantFactsOutcome> {
        let started = Instant::now();
        let hash_set: HashSet<&str> = hashes.iter().map(String::as_str).collect();

        let mut entries: Vec<IndexEntry> = self
            .index_entries
            .iter()
            .filter(|row| hash_set.contains(row.key().0.as_str()) && row.key().1 != excluded_fact_id)
            .filter(|row| depth_from_date.map_or(true, |cutoff| row.value().dt <= cutoff))
            .map(|row| row.value().clone())
            .collect();
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.c));

        if let Some(limit) = depth_limit {
            entries.truncate(limit as usize);
        }

        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for entry in entries {
            if seen.insert(entry.id.f.clone()) {
                if let Some(fact) = self.facts.get(&entry.id.f) {
                    result.push(fact.clone());
                }
            }
        }

        Ok(RelevantFactsOutcome { result, processing_time: started.elapsed() })
    }

    async fn get_relevant_fact_counters(
        &self,
        hash_value: &str,
        excluded_fact_id: &str,
        reference_time: DateTime<Utc>,
        depth_limit: Option<u64>,
        depth_from_date: Option<DateTime<Utc>>,
        group: &[CounterPart],
    ) -> FactumResult<HashMap<CounterPartKey, HashMap<String, PartialAggregate>>> {
        let mut candidates: Vec<IndexEntry> = self
            .index_entries
            .iter()
            .filter(|row| row.key().0 == hash_value && row.key().1 != excluded_fact_id)
            .filter(|row| depth_from_date.map_or(true, |cutoff| row.value().dt <= cutoff))
            .map(|row| row.value().clone())
            .collect();
        let group_cap = group
            .iter()
            .filter_map(|part| {
                (part.definition.caps.max_evaluated_records != 0)
                    .then_some(part.definition.caps.max_evaluated_records)
            })
            .min();
        if let Some(limit) = depth_limit.into_iter().chain(group_cap).min() {
            candidates.sort_by_key(|entry| std::cmp::Reverse(entry.c));
            candidates.truncate(limit as usize);
        }

        let mut result = HashMap::new();
        for part in group {
            let mut attrs = HashMap::new();
            for (attr_name, attr) in &part.definition.attributes {
                let operator = AggregationOperator::from_key(&attr.operator).ok_or_else(|| {
                    FactumError::config_invalid(
                        part.key.flatten(),
                        format!("unknown aggregation operator '{}'", attr.operator),
                    )
                })?;
                let mut state = operator.empty();
                let mut matched = 0u64;
                for entry in &candidates {
                    if !dt_in_window(entry.dt, &part.definition.window, reference_time) {
                        continue;
                    }
                    let Some(fact) = self.facts.get(&entry.id.f) else { continue };
                    if let Some(condition) = &part.definition.evaluation_conditions {
                        if !condition.evaluate(&fact)? {
                            continue;
                        }
                    }
                    let value = match &attr.source {
                        AttributeSource::Field(field) => fact.attribute(field).cloned(),
                        AttributeSource::Constant(value) => Some(value.clone()),
                    };
                    if let Some(value) = value {
                        operator.accumulate(&mut state, &value);
                    }
                    matched += 1;
                    let cap = part.definition.caps.max_matching_records;
                    if cap != 0 && matched >= cap {
                        break;
                    }
                }
                attrs.insert(attr_name.clone(), state);
            }
            result.insert(part.key.clone(), attrs);
        }
        Ok(result)
    }

    async fn create_database(&self) -> FactumResult<()> {
        Ok(())
    }

    async fn save_log(&self, process_id: &str, message: &str, fact_id: Option<&str>) -> FactumResult<()> {
        self.logs.write().await.push(LogRecord {
            process_id: process_id.to_string(),
            message: message.to_string(),
            fact_id: fact_id.map(str::to_string),
            logged_at: Utc::now(),
        });
        Ok(())
    }

    fn check_connection(&self) -> FactumResult<()> {
        Ok(())
    }
}

fn dt_in_window(dt: DateTime<Utc>, window: &TimeWindow, reference_time: DateTime<Utc>) -> bool {
    if window.from_time_ms != 0 {
        let far = reference_time - ChronoDuration::milliseconds(window.from_time_ms as i64);
        if dt <= far {
            return false;
        }
    }
    if window.to_time_ms != 0 {
        let near = reference_time - ChronoDuration::milliseconds(window.to_time_ms as i64);
        if dt > near {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CounterAttribute, CounterDefinition, IndexEntryId, RecordCaps};
    use factum_types::FactValue;

    fn fact(id: &str, amount: f64) -> Fact {
        Fact {
            id: id.to_string(),
            t: 1,
            c: Utc::now(),
            d: HashMap::from([("amount".to_string(), FactValue::Float(amount))]),
        }
    }

    fn entry(h: &str, f: &str, dt: DateTime<Utc>) -> IndexEntry {
        IndexEntry {
            id: IndexEntryId { h: h.to_string(), f: f.to_string() },
            dt,
            c: Utc::now(),
            it: 1,
            v: "value1".to_string(),
            t: 1,
            d: None,
        }
    }

    #[tokio::test]
    async fn save_fact_is_idempotent_on_id() {
        let store = InMemoryFactStore::new();
        let first = store.save_fact(fact("f1", 1.0)).await.unwrap();
        let second = store.save_fact(fact("f1", 2.0)).await.unwrap();
        assert!(first.inserted && !first.updated);
        assert!(second.updated && !second.inserted);
        assert_eq!(store.fact_count(), 1);
    }

    #[tokio::test]
    async fn save_index_entries_is_idempotent_on_h_f() {
        let store = InMemoryFactStore::new();
        let now = Utc::now();
        let outcome = store.save_index_entries(vec![entry("h1", "f1", now), entry("h1", "f1", now)]).await.unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.updated, 1);
        assert_eq!(store.index_entry_count(), 1);
    }

    #[tokio::test]
    async fn get_relevant_facts_excludes_the_incoming_fact() {
        let store = InMemoryFactStore::new();
        let now = Utc::now();
        for id in ["f1", "f2", "f3"] {
            store.save_fact(fact(id, 1.0)).await.unwrap();
            store.save_index_entries(vec![entry("h1", id, now)]).await.unwrap();
        }
        let result = store
            .get_relevant_facts(&["h1".to_string()], "f1", None, None)
            .await
            .unwrap();
        assert_eq!(result.result.len(), 2);
        assert!(result.result.iter().all(|f| f.id != "f1"));
    }

    #[tokio::test]
    async fn get_relevant_facts_honors_depth_limit() {
        let store = InMemoryFactStore::new();
        let now = Utc::now();
        for id in ["f1", "f2", "f3", "f4"] {
            store.save_fact(fact(id, 1.0)).await.unwrap();
            store.save_index_entries(vec![entry("h1", id, now)]).await.unwrap();
        }
        let result = store
            .get_relevant_facts(&["h1".to_string()], "none", Some(2), None)
            .await
            .unwrap();
        assert!(result.result.len() <= 2);
    }

    #[tokio::test]
    async fn get_relevant_facts_honors_date_cutoff() {
        let store = InMemoryFactStore::new();
        let base = Utc::now();
        store.save_fact(fact("f1", 1.0)).await.unwrap();
        store.save_index_entries(vec![entry("h1", "f1", base + ChronoDuration::milliseconds(2000))]).await.unwrap();
        store.save_fact(fact("f2", 1.0)).await.unwrap();
        store.save_index_entries(vec![entry("h1", "f2", base + ChronoDuration::milliseconds(1000))]).await.unwrap();

        let result = store
            .get_relevant_facts(&["h1".to_string()], "none", None, Some(base + ChronoDuration::milliseconds(1500)))
            .await
            .unwrap();
        assert_eq!(result.result.len(), 1);
        assert_eq!(result.result[0].id, "f2");
    }

    #[tokio::test]
    async fn get_relevant_fact_counters_sums_matching_amounts() {
        let store = InMemoryFactStore::new();
        let now = Utc::now();
        store.save_fact(fact("f1", 100.0)).await.unwrap();
        store.save_index_entries(vec![entry("h1", "f1", now)]).await.unwrap();
        store.save_fact(fact("f2", 200.0)).await.unwrap();
        store.save_index_entries(vec![entry("h1", "f2", now)]).await.unwrap();

        let part = CounterPart {
            key: CounterPartKey::whole("total"),
            definition: CounterDefinition {
                name: "total".into(),
                index_type_name: "test_type_1".into(),
                computation_conditions: None,
                evaluation_conditions: None,
                attributes: HashMap::from([(
                    "sumA".to_string(),
                    CounterAttribute { operator: "$sum".into(), source: AttributeSource::Field("amount".into()) },
                )]),
                window: TimeWindow { from_time_ms: 0, to_time_ms: 0 },
                caps: RecordCaps::UNBOUNDED,
            },
        };

        let result =
            store.get_relevant_fact_counters("h1", "f0", now, None, None, &[part]).await.unwrap();
        let whole = &result[&CounterPartKey::whole("total")];
        assert_eq!(whole["sumA"].finalize(), FactValue::Float(300.0));
    }

    #[tokio::test]
    async fn get_relevant_fact_counters_honors_max_evaluated_records() {
        let store = InMemoryFactStore::new();
        let base = Utc::now();
        for (idx, id) in ["f1", "f2", "f3"].into_iter().enumerate() {
            let dt = base + ChronoDuration::milliseconds(idx as i64 * 1000);
            store.save_fact(fact(id, 100.0)).await.unwrap();
            store.save_index_entries(vec![entry("h1", id, dt)]).await.unwrap();
        }

        let part = CounterPart {
            key: CounterPartKey::whole("total"),
            definition: CounterDefinition {
                name: "total".into(),
                index_type_name: "test_type_1".into(),
                computation_conditions: None,
                evaluation_conditions: None,
                attributes: HashMap::from([(
                    "sumA".to_string(),
                    CounterAttribute { operator: "$sum".into(), source: AttributeSource::Field("amount".into()) },
                )]),
                window: TimeWindow { from_time_ms: 0, to_time_ms: 0 },
                caps: RecordCaps { max_evaluated_records: 2, max_matching_records: 0 },
            },
        };

        let result = store
            .get_relevant_fact_counters("h1", "f0", base + ChronoDuration::milliseconds(5000), None, None, &[part])
            .await
            .unwrap();
        let whole = &result[&CounterPartKey::whole("total")];
        assert_eq!(whole["sumA"].finalize(), FactValue::Float(200.0));
    }
}
