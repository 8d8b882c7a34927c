//! Loads and validates counter configs, splits counters by time-interval
//! boundary, and recombines split-counter parts after evaluation.

use crate::error::{FactumError, FactumResult};
use crate::types::{CounterDefinition, CounterPartKey, TimeWindow};
use factum_calculator::{AggregationRegistry, PartialAggregate};
use factum_types::FactValue;
use std::collections::HashMap;

/// One time-bounded slice of a counter. Unsplit counters produce exactly one
/// part, whose key carries no part index.
#[derive(Debug, Clone)]
pub struct CounterPart {
    /// Typed part key — `{base, None}` for an unsplit counter.
    pub key: CounterPartKey,
    /// The counter definition narrowed to this part's sub-window. Every
    /// other field (predicates, attributes, index type) is unchanged from
    /// the original.
    pub definition: CounterDefinition,
}

/// Loads/validates counter configs, splits them by the configured time
/// boundaries, and exposes per-index-type lookup plus the merge step that
/// recombines split-counter results.
pub struct CounterProducer {
    /// Original (unsplit) counter definitions, keyed by name.
    originals: HashMap<String, CounterDefinition>,
    /// Split parts, grouped by the index type they ride on.
    parts_by_index: HashMap<String, Vec<CounterPart>>,
    registry: AggregationRegistry,
}

impl CounterProducer {
    /// Build a producer from an already-loaded counter config and the
    /// `splitIntervals` boundary list. Every counter is validated; the
    /// boundary list must be strictly increasing and positive.
    pub fn new(counters: Vec<CounterDefinition>, split_intervals: Vec<u64>) -> FactumResult<Self> {
        if !split_intervals.windows(2).all(|w| w[0] < w[1]) || split_intervals.iter().any(|&b| b == 0)
        {
            return Err(FactumError::config_invalid(
                "splitIntervals",
                "boundaries must be positive and strictly increasing",
            ));
        }

        let mut originals = HashMap::new();
        let mut parts_by_index: HashMap<String, Vec<CounterPart>> = HashMap::new();
        for counter in counters {
            counter
                .validate()
                .map_err(|message| FactumError::config_invalid(counter.name.clone(), message))?;
            if originals.contains_key(&counter.name) {
                return Err(FactumError::config_invalid(
                    counter.name.clone(),
                    "duplicate counter name",
                ));
            }
            let parts = split_counter(&counter, &split_intervals);
            parts_by_index.entry(counter.index_type_name.clone()).or_default().extend(parts);
            originals.insert(counter.name.clone(), counter);
        }

        Ok(Self { originals, parts_by_index, registry: AggregationRegistry::new() })
    }

    /// Every counter part (already split) riding on `index_type_name`, in
    /// declaration order.
    pub fn counters_for_index_type(&self, index_type_name: &str) -> &[CounterPart] {
        self.parts_by_index.get(index_type_name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The original (unsplit) counter definition, by name.
    pub fn get_counter_description(&self, name: &str) -> Option<&CounterDefinition> {
        self.originals.get(name)
    }

    /// Recombine per-part aggregate results into the flat `{counterName:
    /// aggregate}` map the caller sees. `parts` holds, for every part key
    /// that was evaluated, a map from output attribute name to the partial
    /// aggregate computed for that attribute over that part's sub-window.
    ///
    /// The recombined value is exactly what evaluating the unsplit counter
    /// over the whole window would have produced — splitting is a
    /// performance technique, not a semantic change.
    pub fn merge(
        &self,
        parts: HashMap<CounterPartKey, HashMap<String, PartialAggregate>>,
    ) -> FactumResult<HashMap<String, HashMap<String, FactValue>>> {
        let mut grouped: HashMap<String, Vec<(Option<u32>, HashMap<String, PartialAggregate>)>> =
            HashMap::new();
        for (key, attrs) in parts {
            grouped.entry(key.base).or_default().push((key.part_index, attrs));
        }

        let mut result = HashMap::new();
        for (base, mut entries) in grouped {
            entries.sort_by_key(|(idx, _)| idx.unwrap_or(0));
            let Some(definition) = self.originals.get(&base) else { continue };

            let mut merged_attrs = HashMap::new();
            for (attr_name, attr) in &definition.attributes {
                let per_part: Vec<PartialAggregate> = entries
                    .iter()
                    .filter_map(|(_, attrs)| attrs.get(attr_name).cloned())
                    .collect();
                if per_part.is_empty() {
                    continue;
                }
                let merged = self
                    .registry
                    .merge(&attr.operator, &per_part)
                    .map_err(|e| FactumError::invalid_predicate(attr_name.clone(), e.to_string()))?;
                merged_attrs.insert(attr_name.clone(), merged.finalize());
            }
            result.insert(base, merged_attrs);
        }
        Ok(result)
    }
}

/// Decompose `counter`'s window at every boundary it strictly contains. A
/// boundary equal to either endpoint does not split. Counters entirely
/// below or above all boundaries are returned as a single unsplit part.
fn split_counter(counter: &CounterDefinition, boundaries: &[u64]) -> Vec<CounterPart> {
    let window = counter.window;
    let mut applicable: Vec<u64> =
        boundaries.iter().copied().filter(|&b| window.is_split_by(b)).collect();
    applicable.sort_unstable();

    if applicable.is_empty() {
        return vec![CounterPart {
            key: CounterPartKey::whole(counter.name.clone()),
            definition: counter.clone(),
        }];
    }

    let mut edges = vec![window.to_time_ms];
    edges.extend(applicable);
    edges.push(window.from_time_ms);

    edges
        .windows(2)
        .enumerate()
        .map(|(i, edge)| {
            let mut definition = counter.clone();
            definition.window = TimeWindow { to_time_ms: edge[0], from_time_ms: edge[1] };
            CounterPart {
                key: CounterPartKey::part(counter.name.clone(), i as u32),
                definition,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttributeSource, CounterAttribute, RecordCaps};

    fn counter(name: &str, from_time_ms: u64, to_time_ms: u64) -> CounterDefinition {
        CounterDefinition {
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
        }
    }

    #[test]
    fn counter_within_single_boundary_window_is_not_split() {
        let producer = CounterProducer::new(vec![counter("total", 100_000, 0)], vec![30_000, 60_000]).unwrap();
        let parts = producer.counters_for_index_type("test_type_1");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].key, CounterPartKey::whole("total"));
    }

    #[test]
    fn counter_spanning_both_boundaries_splits_into_three_parts() {
        let producer =
            CounterProducer::new(vec![counter("total", 120_000, 0)], vec![30_000, 60_000]).unwrap();
        let parts = producer.counters_for_index_type("test_type_1");
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].definition.window, TimeWindow { to_time_ms: 0, from_time_ms: 30_000 });
        assert_eq!(parts[1].definition.window, TimeWindow { to_time_ms: 30_000, from_time_ms: 60_000 });
        assert_eq!(
            parts[2].definition.window,
            TimeWindow { to_time_ms: 60_000, from_time_ms: 120_000 }
        );
    }

    #[test]
    fn boundary_equal_to_endpoint_does_not_split() {
        let producer =
            CounterProducer::new(vec![counter("total", 60_000, 0)], vec![60_000]).unwrap();
        assert_eq!(producer.counters_for_index_type("test_type_1").len(), 1);
    }

    #[test]
    fn merge_recombines_split_sum_to_match_unsplit_total() {
        let producer = CounterProducer::new(vec![counter("total", 120_000, 0)], vec![]).unwrap();
        let mut parts = HashMap::new();
        parts.insert(
            CounterPartKey::whole("total"),
            HashMap::from([("total".to_string(), PartialAggregate::Sum(300.0))]),
        );
        let merged = producer.merge(parts).unwrap();
        assert_eq!(merged["total"]["total"], FactValue::Float(300.0));
    }

    #[test]
    fn merge_sums_across_split_parts() {
        let producer = CounterProducer::new(vec![counter("total", 120_000, 0)], vec![60_000]).unwrap();
        let mut parts = HashMap::new();
        parts.insert(
            CounterPartKey::part("total", 0),
            HashMap::from([("total".to_string(), PartialAggregate::Sum(100.0))]),
        );
        parts.insert(
            CounterPartKey::part("total", 1),
            HashMap::from([("total".to_string(), PartialAggregate::Sum(200.0))]),
        );
        let merged = producer.merge(parts).unwrap();
        assert_eq!(merged["total"]["total"], FactValue::Float(300.0));
    }

    #[test]
    fn rejects_non_monotonic_split_intervals() {
        let err = CounterProducer::new(vec![counter("total", 120_000, 0)], vec![60_000, 30_000]);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_duplicate_counter_names() {
        let err = CounterProducer::new(
            vec![counter("total", 120_000, 0), counter("total", 60_000, 0)],
            vec![],
        );
        assert!(err.is_err());
    }
}
