//! Process-wide engine configuration: worker pool sizing, timeouts, and the
//! knobs that shape `PipelineBuilder`/`CounterExecutor` behavior.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A document store connection-pool sizing triple.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConnectionPoolConfig {
    /// Minimum pool size kept warm.
    pub min_pool_size: u32,
    /// Maximum concurrent connections.
    pub max_pool_size: u32,
    /// Maximum connections being established at once.
    pub max_connecting: u32,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self { min_pool_size: 1, max_pool_size: 20, max_connecting: 4 }
    }
}

/// Every process-wide knob named in the external-interfaces contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Concurrent store queries per `getRelevantFactCounters` call.
    pub worker_pool_size: usize,
    /// Deadline waiting for a free worker slot.
    pub worker_acquire_timeout_ms: u64,
    /// Deadline for one store aggregation query.
    pub query_timeout_ms: u64,
    /// Boundary list driving counter time-interval splitting. Must be
    /// positive and strictly increasing.
    pub split_intervals: Vec<u64>,
    /// Hard cap on total counters processed per call (0 disables).
    pub max_counters_processing: u64,
    /// Hard cap on counters per dispatched group (0 disables).
    pub max_counters_per_request: u64,
    /// Denormalize the owning fact's payload into its index entries.
    pub include_fact_data_to_index: bool,
    /// Whether counter pipelines may `$lookup` back into the fact collection.
    pub lookup_facts: bool,
    /// Use bulk upsert for index-entry writes.
    pub index_bulk_update: bool,
    /// Counter names allowed to evaluate; `None` means all.
    pub allowed_counters_names: Option<HashSet<String>>,
    /// Document store connection pool sizing.
    pub connection_pool: ConnectionPoolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 8,
            worker_acquire_timeout_ms: 2_000,
            query_timeout_ms: 5_000,
            split_intervals: Vec::new(),
            max_counters_processing: 0,
            max_counters_per_request: 0,
            include_fact_data_to_index: false,
            lookup_facts: true,
            index_bulk_update: true,
            allowed_counters_names: None,
            connection_pool: ConnectionPoolConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Whether `counter_name` is permitted under `allowed_counters_names`.
    /// Always `true` when the whitelist is absent.
    pub fn allows_counter(&self, counter_name: &str) -> bool {
        self.allowed_counters_names.as_ref().map_or(true, |allowed| allowed.contains(counter_name))
    }

    /// Overlay values from environment variables onto the defaults. Unset or
    /// unparseable variables leave the existing value untouched.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(size) = std::env::var("FACTUM_WORKER_POOL_SIZE") {
            if let Ok(val) = size.parse() {
                config.worker_pool_size = val;
            }
        }
        if let Ok(timeout) = std::env::var("FACTUM_WORKER_ACQUIRE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse() {
                config.worker_acquire_timeout_ms = val;
            }
        }
        if let Ok(timeout) = std::env::var("FACTUM_QUERY_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse() {
                config.query_timeout_ms = val;
            }
        }
        if let Ok(intervals) = std::env::var("FACTUM_SPLIT_INTERVALS_MS") {
            config.split_intervals =
                intervals.split(',').filter_map(|part| part.trim().parse().ok()).collect();
        }
        if let Ok(cap) = std::env::var("FACTUM_MAX_COUNTERS_PROCESSING") {
            if let Ok(val) = cap.parse() {
                config.max_counters_processing = val;
            }
        }
        if let Ok(cap) = std::env::var("FACTUM_MAX_COUNTERS_PER_REQUEST") {
            if let Ok(val) = cap.parse() {
                config.max_counters_per_request = val;
            }
        }
        if let Ok(flag) = std::env::var("FACTUM_INCLUDE_FACT_DATA_TO_INDEX") {
            config.include_fact_data_to_index = flag.eq_ignore_ascii_case("true");
        }
        if let Ok(flag) = std::env::var("FACTUM_LOOKUP_FACTS") {
            config.lookup_facts = flag.eq_ignore_ascii_case("true");
        }
        if let Ok(flag) = std::env::var("FACTUM_INDEX_BULK_UPDATE") {
            config.index_bulk_update = flag.eq_ignore_ascii_case("true");
        }
        if let Ok(names) = std::env::var("FACTUM_ALLOWED_COUNTERS_NAMES") {
            config.allowed_counters_names =
                Some(names.split(',').map(str::trim).map(str::to_string).collect());
        }
        if let Ok(val) = std::env::var("FACTUM_MIN_POOL_SIZE") {
            if let Ok(val) = val.parse() {
                config.connection_pool.min_pool_size = val;
            }
        }
        if let Ok(val) = std::env::var("FACTUM_MAX_POOL_SIZE") {
            if let Ok(val) = val.parse() {
                config.connection_pool.max_pool_size = val;
            }
        }
        if let Ok(val) = std::env::var("FACTUM_MAX_CONNECTING") {
            if let Ok(val) = val.parse() {
                config.connection_pool.max_connecting = val;
            }
        }

        config
    }
}
