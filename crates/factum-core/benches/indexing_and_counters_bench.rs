use chrono::Utc;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use factum_core::{
    AttributeSource, CounterAttribute, CounterDefinition, CounterExecutor, CounterProducer,
    FactIndexer, FactMapper, FactStore, FieldConfigEntry, FieldNameSpec, IndexConfigEntry,
    IndexValueKind, InMemoryFactStore, Message, PayloadMap, RecordCaps, TimeWindow,
};
use factum_types::FactValue;
use std::sync::Arc;
use std::time::Duration;

fn field_config() -> Vec<FieldConfigEntry> {
    vec![
        FieldConfigEntry { src: "entity_id".into(), dst: "entity_id".into(), message_types: vec![1] },
        FieldConfigEntry { src: "amount".into(), dst: "amount".into(), message_types: vec![1] },
        FieldConfigEntry { src: "dt".into(), dst: "dt".into(), message_types: vec![1] },
    ]
}

fn index_config() -> Vec<IndexConfigEntry> {
    vec![IndexConfigEntry {
        field_name: FieldNameSpec::Single("entity_id".into()),
        date_name: "dt".into(),
        index_type_name: "by_entity".into(),
        index_type: 1,
        index_value: IndexValueKind::Hash,
        computation_conditions: None,
        limit: None,
        counters_count: Vec::new(),
    }]
}

fn sum_counter() -> CounterDefinition {
    CounterDefinition {
        name: "total".into(),
        index_type_name: "by_entity".into(),
        computation_conditions: None,
        evaluation_conditions: None,
        attributes: std::collections::HashMap::from([(
            "sumA".to_string(),
            CounterAttribute { operator: "$sum".into(), source: AttributeSource::Field("amount".into()) },
        )]),
        window: TimeWindow { from_time_ms: 0, to_time_ms: 0 },
        caps: RecordCaps::UNBOUNDED,
    }
}

fn message(entity_id: i64, amount: f64) -> Message {
    Message {
        t: 1,
        d: PayloadMap::from([
            ("entity_id".to_string(), FactValue::Integer(entity_id)),
            ("amount".to_string(), FactValue::Float(amount)),
            ("dt".to_string(), FactValue::Date(Utc::now())),
        ]),
    }
}

fn bench_indexing(c: &mut Criterion) {
    let mapper = FactMapper::new(field_config());
    let indexer = FactIndexer::new(index_config(), false);

    let mut group = c.benchmark_group("indexing");
    for size in [1_000, 10_000, 100_000].iter() {
        group.bench_with_input(BenchmarkId::new("index_facts", size), size, |b, &size| {
            b.iter_batched(
                || {
                    (0..size)
                        .map(|i| mapper.map(&message(i as i64 % 100, i as f64), Some(format!("fact-{i}"))).unwrap())
                        .collect::<Vec<_>>()
                },
                |facts| {
                    for fact in &facts {
                        black_box(indexer.index(fact).unwrap());
                    }
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_counter_evaluation(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mapper = FactMapper::new(field_config());
    let indexer = FactIndexer::new(index_config(), false);

    let mut group = c.benchmark_group("counter_evaluation");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for prior_count in [100, 1_000, 10_000].iter() {
        let store = Arc::new(InMemoryFactStore::new());
        runtime.block_on(async {
            for i in 0..*prior_count {
                let fact = mapper.map(&message(0, i as f64), Some(format!("prior-{i}"))).unwrap();
                let entries = indexer.index(&fact).unwrap();
                store.save_fact(fact).await.unwrap();
                store.save_index_entries(entries).await.unwrap();
            }
        });

        let producer = Arc::new(CounterProducer::new(vec![sum_counter()], vec![]).unwrap());
        let executor = CounterExecutor::new(
            store.clone() as Arc<dyn FactStore>,
            producer,
            &index_config(),
            8,
            Duration::from_millis(500),
            Duration::from_millis(500),
        );

        group.bench_with_input(
            BenchmarkId::new("evaluate_against_priors", prior_count),
            prior_count,
            |b, _| {
                b.iter(|| {
                    runtime.block_on(async {
                        let incoming = mapper.map(&message(0, 1.0), Some("incoming".into())).unwrap();
                        let entries = indexer.index(&incoming).unwrap();
                        black_box(executor.evaluate(&incoming, &entries, None, None).await)
                    })
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_indexing, bench_counter_evaluation);
criterion_main!(benches);
