//! Dispatches per-index counter queries across a bounded worker pool,
//! enforces timeouts, and reassembles results into a flat counter map.

use crate::counter_producer::{CounterPart, CounterProducer};
use crate::error::FactumError;
use crate::store::FactStore;
use crate::types::{CounterPartKey, CountersCountThreshold, Fact, IndexConfigEntry, IndexEntry};
use chrono::{DateTime, Utc};
use factum_calculator::{AggregationRegistry, PartialAggregate};
use factum_types::FactValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{trace, warn};
use uuid::Uuid;

/// Aggregate timing collected across one [`CounterExecutor::evaluate`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionMetrics {
    /// Total wall-clock time of the call.
    pub total_elapsed: Duration,
    /// Sum of every dispatched query's own execution time.
    pub query_time_sum: Duration,
    /// Number of queries dispatched.
    pub query_count: usize,
    /// Sum of time spent waiting for a worker slot across all dispatches.
    pub wait_for_worker_time: Duration,
}

/// A counter group that did not complete. Never fatal to the surrounding
/// call — sibling groups still report their own results.
#[derive(Debug, Clone)]
pub struct GroupFailure {
    /// The (possibly `#N`-suffixed) group label that failed.
    pub index_type_name: String,
    /// Human-readable reason.
    pub reason: String,
}

/// Result of evaluating every applicable counter for one incoming fact.
#[derive(Debug, Clone, Default)]
pub struct EvaluateOutcome {
    /// Final, recombined `{counterName: {attribute: value}}` map.
    pub counters: HashMap<String, HashMap<String, FactValue>>,
    /// Timing metrics for this call.
    pub metrics: ExecutionMetrics,
    /// Groups that timed out or errored.
    pub failures: Vec<GroupFailure>,
}

struct Dispatch {
    request_id: String,
    index_type_name: String,
    hash_value: String,
    group: Vec<CounterPart>,
}

struct DispatchOutcome {
    index_type_name: String,
    wait_time: Duration,
    query_time: Duration,
    result: Result<HashMap<CounterPartKey, HashMap<String, PartialAggregate>>, FactumError>,
}

/// Partitions counters into bounded-size groups, dispatches one store query
/// per `(index-entry, group)` pair through a fixed-size worker pool, and
/// reassembles the results.
pub struct CounterExecutor {
    store: Arc<dyn FactStore>,
    producer: Arc<CounterProducer>,
    index_type_names: HashMap<i64, String>,
    counters_count: HashMap<String, Vec<CountersCountThreshold>>,
    worker_semaphore: Arc<Semaphore>,
    worker_acquire_timeout: Duration,
    query_timeout: Duration,
    request_counter: AtomicU64,
}

impl CounterExecutor {
    /// Build an executor over an already-constructed store and counter
    /// producer. `index_config` supplies the `it -> indexTypeName` mapping
    /// and each index type's `countersCount` staircase.
    pub fn new(
        store: Arc<dyn FactStore>,
        producer: Arc<CounterProducer>,
        index_config: &[IndexConfigEntry],
        worker_pool_size: usize,
        worker_acquire_timeout: Duration,
        query_timeout: Duration,
    ) -> Self {
        let index_type_names =
            index_config.iter().map(|row| (row.index_type, row.index_type_name.clone())).collect();
        let counters_count = index_config
            .iter()
            .map(|row| (row.index_type_name.clone(), row.counters_count.clone()))
            .collect();
        Self {
            store,
            producer,
            index_type_names,
            counters_count,
            worker_semaphore: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            worker_acquire_timeout,
            query_timeout,
            request_counter: AtomicU64::new(0),
        }
    }

    /// A process-local, monotonic-plus-random request identifier. Distinct
    /// across calls even when invoked concurrently from multiple tasks.
    fn next_request_id(&self) -> String {
        let sequence = self.request_counter.fetch_add(1, Ordering::Relaxed);
        format!("{sequence}-{}", Uuid::new_v4().simple())
    }

    /// Evaluate every counter that applies to `fact`, given the index
    /// entries already produced for it.
    pub async fn evaluate(
        &self,
        fact: &Fact,
        index_entries: &[IndexEntry],
        depth_limit: Option<u64>,
        depth_from_date: Option<DateTime<Utc>>,
    ) -> EvaluateOutcome {
        let started = Instant::now();
        let reference_time = fact.c;

        let mut entries_by_index_type: HashMap<&str, Vec<&IndexEntry>> = HashMap::new();
        for entry in index_entries {
            if let Some(name) = self.index_type_names.get(&entry.it) {
                entries_by_index_type.entry(name.as_str()).or_default().push(entry);
            }
        }

        let mut failures = Vec::new();
        let mut dispatches = Vec::new();
        for (index_type_name, entries) in &entries_by_index_type {
            let mut applicable = Vec::new();
            for part in self.producer.counters_for_index_type(index_type_name) {
                match &part.definition.computation_conditions {
                    None => applicable.push(part.clone()),
                    Some(condition) => match condition.evaluate(fact) {
                        Ok(true) => applicable.push(part.clone()),
                        Ok(false) => {}
                        Err(err) => failures.push(GroupFailure {
                            index_type_name: (*index_type_name).to_string(),
                            reason: err.to_string(),
                        }),
                    },
                }
            }
            if applicable.is_empty() {
                continue;
            }

            let thresholds = self.counters_count.get(*index_type_name).cloned().unwrap_or_default();
            for (group_index, group) in partition_into_groups(applicable, &thresholds).into_iter().enumerate() {
                let label = if group_index == 0 {
                    (*index_type_name).to_string()
                } else {
                    format!("{index_type_name}#{group_index}")
                };
                for entry in entries {
                    dispatches.push(Dispatch {
                        request_id: self.next_request_id(),
                        index_type_name: label.clone(),
                        hash_value: entry.id.h.clone(),
                        group: group.clone(),
                    });
                }
            }
        }

        let mut join_set = JoinSet::new();
        for dispatch in dispatches {
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&self.worker_semaphore);
            let worker_acquire_timeout = self.worker_acquire_timeout;
            let query_timeout = self.query_timeout;
            let excluded_fact_id = fact.id.clone();
            join_set.spawn(async move {
                trace!(request_id = %dispatch.request_id, group = %dispatch.index_type_name, "dispatching counter query");
                let wait_started = Instant::now();
                let permit = match tokio::time::timeout(worker_acquire_timeout, semaphore.acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    _ => {
                        return DispatchOutcome {
                            index_type_name: dispatch.index_type_name,
                            wait_time: wait_started.elapsed(),
                            query_time: Duration::ZERO,
                            result: Err(FactumError::WorkerTimeout {
                                timeout_ms: u64::try_from(worker_acquire_timeout.as_millis()).unwrap_or(u64::MAX),
                            }),
                        };
                    }
                };
                let wait_time = wait_started.elapsed();

                let query_started = Instant::now();
                let outcome = tokio::time::timeout(
                    query_timeout,
                    store.get_relevant_fact_counters(
                        &dispatch.hash_value,
                        &excluded_fact_id,
                        reference_time,
                        depth_limit,
                        depth_from_date,
                        &dispatch.group,
                    ),
                )
                .await;
                drop(permit);
                let query_time = query_started.elapsed();

                let result = match outcome {
                    Ok(result) => result,
                    Err(_) => Err(FactumError::QueryTimeout {
                        counter_name: dispatch.index_type_name.clone(),
                        timeout_ms: u64::try_from(query_timeout.as_millis()).unwrap_or(u64::MAX),
                    }),
                };
                DispatchOutcome { index_type_name: dispatch.index_type_name, wait_time, query_time, result }
            });
        }

        let mut raw: HashMap<CounterPartKey, HashMap<String, Vec<PartialAggregate>>> = HashMap::new();
        let mut metrics = ExecutionMetrics::default();
        while let Some(joined) = join_set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    failures.push(GroupFailure {
                        index_type_name: "unknown".to_string(),
                        reason: format!("dispatch task failed: {join_err}"),
                    });
                    continue;
                }
            };
            metrics.query_count += 1;
            metrics.query_time_sum += outcome.query_time;
            metrics.wait_for_worker_time += outcome.wait_time;
            match outcome.result {
                Ok(parts) => {
                    for (key, attrs) in parts {
                        let slot = raw.entry(key).or_default();
                        for (attr_name, state) in attrs {
                            slot.entry(attr_name).or_default().push(state);
                        }
                    }
                }
                Err(err) => {
                    warn!(group = %outcome.index_type_name, error = %err, "counter group failed");
                    failures.push(GroupFailure { index_type_name: outcome.index_type_name, reason: err.to_string() });
                }
            }
        }

        let registry = AggregationRegistry::new();
        let mut collapsed: HashMap<CounterPartKey, HashMap<String, PartialAggregate>> = HashMap::new();
        for (key, attrs) in raw {
            let Some(definition) = self.producer.get_counter_description(&key.base) else { continue };
            let mut merged_attrs = HashMap::new();
            for (attr_name, states) in attrs {
                let Some(attr) = definition.attributes.get(&attr_name) else { continue };
                match registry.merge(&attr.operator, &states) {
                    Ok(merged) => {
                        merged_attrs.insert(attr_name, merged);
                    }
                    Err(err) => failures.push(GroupFailure {
                        index_type_name: key.base.clone(),
                        reason: err.to_string(),
                    }),
                }
            }
            collapsed.insert(key, merged_attrs);
        }

        let counters = match self.producer.merge(collapsed) {
            Ok(counters) => counters,
            Err(err) => {
                failures.push(GroupFailure { index_type_name: "merge".to_string(), reason: err.to_string() });
                HashMap::new()
            }
        };

        metrics.total_elapsed = started.elapsed();
        EvaluateOutcome { counters, metrics, failures }
    }
}

/// Greedily partitions `parts` into groups honoring the `countersCount`
/// staircase: a counter with `maxEvaluatedRecords >= threshold.limit` is
/// bound by `threshold.count` for whichever group it lands in. Each
/// counter's own tightest applicable threshold is tracked, and a new group
/// opens as soon as adding the next counter would exceed the tightest bound
/// among the current group's members.
fn partition_into_groups(parts: Vec<CounterPart>, thresholds: &[CountersCountThreshold]) -> Vec<Vec<CounterPart>> {
    let mut groups = Vec::new();
    let mut current: Vec<CounterPart> = Vec::new();
    let mut current_cap = u64::MAX;

    for part in parts {
        let cap = individual_cap(&part, thresholds);
        let combined_cap = current_cap.min(cap);
        if !current.is_empty() && (current.len() as u64 + 1) > combined_cap {
            groups.push(std::mem::take(&mut current));
            current_cap = u64::MAX;
        }
        current_cap = current_cap.min(cap);
        current.push(part);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

fn individual_cap(part: &CounterPart, thresholds: &[CountersCountThreshold]) -> u64 {
    thresholds
        .iter()
        .filter(|threshold| part.definition.caps.max_evaluated_records >= threshold.limit)
        .map(|threshold| threshold.count)
        .min()
        .unwrap_or(u64::MAX)
}
