use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use sagaflow_core::{AssociationValue, SagaId};
use sagaflow_messaging::UnitOfWork;
use sagaflow_saga::{
    CachingSagaRepository, InMemorySagaStore, LockingSagaRepository, SagaRepository, SagaRoot,
    SagaStore,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BenchProcess {
    steps_completed: u32,
}

impl SagaRoot for BenchProcess {
    fn saga_type() -> &'static str {
        "saga.bench"
    }
}

type Repo = LockingSagaRepository<CachingSagaRepository<BenchProcess, Arc<InMemorySagaStore>>>;

fn locked_repo(store: &Arc<InMemorySagaStore>) -> Repo {
    LockingSagaRepository::new(CachingSagaRepository::new(Arc::clone(store)))
}

fn seed(store: &InMemorySagaStore, identifier: &SagaId) {
    store
        .insert_saga(
            BenchProcess::saga_type(),
            identifier,
            serde_json::to_value(BenchProcess::default()).unwrap(),
            None,
            &[AssociationValue::new("orderId", identifier.as_str())]
                .into_iter()
                .collect(),
        )
        .unwrap();
}

/// Repeated loads of one identifier within a single processing tree: after
/// the first store read everything is served from the managed-instance cache.
fn bench_cached_load(c: &mut Criterion) {
    sagaflow_observability::init();

    let store = Arc::new(InMemorySagaStore::new());
    let identifier = SagaId::new("bench-cached").unwrap();
    seed(&store, &identifier);
    let repo: CachingSagaRepository<BenchProcess, Arc<InMemorySagaStore>> =
        CachingSagaRepository::new(Arc::clone(&store));

    let mut group = c.benchmark_group("load");
    group.throughput(Throughput::Elements(1));
    group.bench_function("cached", |b| {
        let uow = UnitOfWork::begin();
        b.iter(|| {
            let saga = repo.load(&uow, &identifier).unwrap().unwrap();
            black_box(saga.is_active());
        });
        uow.rollback().unwrap();
    });
    group.finish();
}

/// Full load cycle: every iteration runs its own tree, so the instance is
/// evicted and re-read from the store each time.
fn bench_store_backed_load(c: &mut Criterion) {
    let store = Arc::new(InMemorySagaStore::new());
    let identifier = SagaId::new("bench-store").unwrap();
    seed(&store, &identifier);
    let repo = locked_repo(&store);

    let mut group = c.benchmark_group("load");
    group.throughput(Throughput::Elements(1));
    group.bench_function("store_backed", |b| {
        b.iter(|| {
            let uow = UnitOfWork::begin();
            let saga = repo.load(&uow, &identifier).unwrap().unwrap();
            black_box(saga.is_active());
            uow.commit().unwrap();
        });
    });
    group.finish();
}

/// Create-and-commit cycles at varying association counts.
fn bench_create_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_commit");
    for associations in [1usize, 4, 16] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::from_parameter(associations),
            &associations,
            |b, &associations| {
                let store = Arc::new(InMemorySagaStore::new());
                let repo = locked_repo(&store);
                let mut sequence = 0u64;
                b.iter(|| {
                    sequence += 1;
                    let identifier = SagaId::new(format!("bench-{sequence}")).unwrap();
                    let uow = UnitOfWork::begin();
                    let saga = repo
                        .create(&uow, identifier, Box::new(|| Ok(BenchProcess::default())))
                        .unwrap();
                    for n in 0..associations {
                        saga.associate(AssociationValue::new("k", n.to_string()));
                    }
                    uow.commit().unwrap();
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_cached_load,
    bench_store_backed_load,
    bench_create_commit
);
criterion_main!(benches);
