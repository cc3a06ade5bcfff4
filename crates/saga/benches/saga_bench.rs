use std::sync::Arc;

use common::{CorrelationId, SagaId};
use criterion::{Criterion, criterion_group, criterion_main};
use event_bus::InMemoryEventBus;
use saga::contexts::{
    InMemoryAccountContext, InMemoryOrganizationContext, InMemoryProjectContext,
};
use saga::{Orchestrator, OrchestratorConfig, StepRegistry, project_creation};
use saga_store::InMemorySagaStore;

fn build_orchestrator() -> Orchestrator<InMemorySagaStore, InMemoryEventBus> {
    let store = Arc::new(InMemorySagaStore::new());
    let bus = Arc::new(InMemoryEventBus::new());
    let mut registry = StepRegistry::new();
    registry.register(project_creation::definition()).unwrap();

    let accounts = InMemoryAccountContext::new();
    accounts.add_account("alice");
    let orgs = InMemoryOrganizationContext::new();
    orgs.add_org("acme", usize::MAX);

    Orchestrator::new(
        store,
        bus,
        Arc::new(registry),
        OrchestratorConfig::default(),
    )
    .register_adapter(Arc::new(accounts))
    .register_adapter(Arc::new(orgs))
    .register_adapter(Arc::new(InMemoryProjectContext::new()))
}

fn bench_project_creation_saga(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let orchestrator = build_orchestrator();
    let mut n: u64 = 0;

    c.bench_function("saga/project_creation_happy_path", |b| {
        b.iter(|| {
            n += 1;
            rt.block_on(async {
                orchestrator
                    .start(
                        SagaId::new(),
                        project_creation::SAGA_NAME,
                        CorrelationId::new(),
                        serde_json::json!({
                            "owner_id": "alice",
                            "org_id": "acme",
                            "project_id": format!("p-{n}"),
                        }),
                    )
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_saga_resume_from_checkpoint(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let orchestrator = build_orchestrator();
    let mut n: u64 = 0;

    c.bench_function("saga/resume_from_checkpoint", |b| {
        b.iter(|| {
            n += 1;
            rt.block_on(async {
                let saga_id = SagaId::new();
                // Accept without running, then resume the way the
                // recovery sweep would.
                orchestrator
                    .accept(
                        saga_id,
                        project_creation::SAGA_NAME,
                        CorrelationId::new(),
                        serde_json::json!({
                            "owner_id": "alice",
                            "org_id": "acme",
                            "project_id": format!("r-{n}"),
                        }),
                    )
                    .await
                    .unwrap();
                orchestrator.run(saga_id).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_project_creation_saga,
    bench_saga_resume_from_checkpoint
);
criterion_main!(benches);
