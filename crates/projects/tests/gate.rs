use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mixgate_common::ProjectId;
use mixgate_projects::{AdmissionGate, GateError, NewProject, ProjectRegistry, ProjectUpdate};
use mixgate_rate_limit::{
    CounterStore, Increment, MemoryCounterStore, RateCounter, RateLimiter, StoreError,
};

const TIMEOUT: Duration = Duration::from_secs(2);

fn setup(limit: u64) -> (AdmissionGate, Arc<ProjectRegistry>, Arc<MemoryCounterStore>) {
    let store = Arc::new(MemoryCounterStore::new());
    let registry = Arc::new(ProjectRegistry::new(store.clone()));
    let gate = AdmissionGate::new(
        registry.clone(),
        RateLimiter::new(store.clone(), limit),
        TIMEOUT,
    );
    (gate, registry, store)
}

fn with_token(name: &str) -> NewProject {
    NewProject {
        name: name.to_string(),
        analytics_token: Some("mp-token".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_unknown_key_is_not_found() {
    let (gate, _, _) = setup(2);
    assert!(matches!(
        gate.resolve_and_admit("nope").await,
        Err(GateError::ProjectNotFound)
    ));
}

#[tokio::test]
async fn test_throttles_after_threshold() {
    let (gate, registry, _) = setup(2);
    let project = registry.create("acme", with_token("web")).await.unwrap();

    let first = gate.resolve_and_admit(&project.api_key).await.unwrap();
    assert_eq!(first.remaining, Some(1));
    assert_eq!(first.project.id, project.id);
    let second = gate.resolve_and_admit(&project.api_key).await.unwrap();
    assert_eq!(second.remaining, Some(0));

    match gate.resolve_and_admit(&project.api_key).await {
        Err(GateError::Rejected { reason, retry_after }) => {
            assert_eq!(reason, "rate limit exceeded");
            assert!(retry_after <= Duration::from_secs(3600));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_premium_projects_bypass_counter() {
    let (gate, registry, store) = setup(1);
    let project = registry
        .create(
            "acme",
            NewProject {
                is_premium: true,
                ..with_token("web")
            },
        )
        .await
        .unwrap();

    for _ in 0..10 {
        let admitted = gate.resolve_and_admit(&project.api_key).await.unwrap();
        assert_eq!(admitted.remaining, None);
    }
    assert_eq!(store.get(project.id).await.unwrap().count, 0);
}

#[tokio::test]
async fn test_premium_upgrade_takes_effect_immediately() {
    let (gate, registry, _) = setup(1);
    let project = registry.create("acme", with_token("web")).await.unwrap();

    gate.resolve_and_admit(&project.api_key).await.unwrap();
    assert!(gate.resolve_and_admit(&project.api_key).await.is_err());

    registry
        .update(
            "acme",
            &project.slug,
            ProjectUpdate {
                is_premium: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(gate.resolve_and_admit(&project.api_key).await.is_ok());
}

#[tokio::test]
async fn test_misconfigured_project_is_checked_after_admission() {
    let (gate, registry, store) = setup(5);
    let project = registry
        .create(
            "acme",
            NewProject {
                name: "no-token".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    match gate.resolve_and_admit(&project.api_key).await {
        Err(GateError::ProjectMisconfigured(id)) => assert_eq!(id, project.id),
        other => panic!("expected misconfigured, got {:?}", other),
    }
    assert_eq!(store.get(project.id).await.unwrap().count, 1);
}

#[tokio::test]
async fn test_throttling_wins_over_misconfiguration() {
    let (gate, registry, _) = setup(1);
    let project = registry
        .create(
            "acme",
            NewProject {
                name: "no-token".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let _ = gate.resolve_and_admit(&project.api_key).await;
    assert!(matches!(
        gate.resolve_and_admit(&project.api_key).await,
        Err(GateError::Rejected { .. })
    ));
}

#[tokio::test]
async fn test_missing_counter_surfaces_configuration_error() {
    let (gate, registry, store) = setup(5);
    let project = registry.create("acme", with_token("web")).await.unwrap();
    store.delete(project.id).await.unwrap();

    let err = gate.resolve_and_admit(&project.api_key).await.unwrap_err();
    assert!(matches!(err, GateError::Configuration(id) if id == project.id));
    assert_eq!(err.kind(), "configuration");
}

/// Delegates to a memory store, with knobs to slow down or break admission.
struct FlakyStore {
    inner: MemoryCounterStore,
    delay: Option<Duration>,
    broken: bool,
}

#[async_trait]
impl CounterStore for FlakyStore {
    async fn get(&self, id: ProjectId) -> Result<RateCounter, StoreError> {
        self.inner.get(id).await
    }
    async fn create(&self, id: ProjectId) -> Result<RateCounter, StoreError> {
        self.inner.create(id).await
    }
    async fn increment(&self, id: ProjectId) -> Result<RateCounter, StoreError> {
        self.inner.increment(id).await
    }
    async fn increment_below(&self, id: ProjectId, limit: u64) -> Result<Increment, StoreError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.broken {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.increment_below(id, limit).await
    }
    async fn reset(&self, id: ProjectId) -> Result<RateCounter, StoreError> {
        self.inner.reset(id).await
    }
    async fn reset_all(&self) -> Result<usize, StoreError> {
        self.inner.reset_all().await
    }
    async fn delete(&self, id: ProjectId) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }
    async fn list(&self) -> Result<Vec<RateCounter>, StoreError> {
        self.inner.list().await
    }
}

#[tokio::test]
async fn test_slow_store_times_out_and_fails_closed() {
    let store = Arc::new(FlakyStore {
        inner: MemoryCounterStore::new(),
        delay: Some(Duration::from_millis(500)),
        broken: false,
    });
    let registry = Arc::new(ProjectRegistry::new(store.clone()));
    let gate = AdmissionGate::new(
        registry.clone(),
        RateLimiter::new(store.clone(), 10),
        Duration::from_millis(20),
    );
    let project = registry.create("acme", with_token("web")).await.unwrap();

    match gate.resolve_and_admit(&project.api_key).await {
        Err(GateError::Timeout(t)) => assert_eq!(t, Duration::from_millis(20)),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_store_failure_fails_closed() {
    let store = Arc::new(FlakyStore {
        inner: MemoryCounterStore::new(),
        delay: None,
        broken: true,
    });
    let registry = Arc::new(ProjectRegistry::new(store.clone()));
    let gate = AdmissionGate::new(registry.clone(), RateLimiter::new(store, 10), TIMEOUT);
    let project = registry.create("acme", with_token("web")).await.unwrap();

    let err = gate.resolve_and_admit(&project.api_key).await.unwrap_err();
    assert!(matches!(err, GateError::StoreUnavailable(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_gate_calls_respect_threshold() {
    let (gate, registry, store) = setup(25);
    let project = registry.create("acme", with_token("web")).await.unwrap();

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let gate = gate.clone();
            let key = project.api_key.clone();
            tokio::spawn(async move { gate.resolve_and_admit(&key).await.is_ok() })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 25);
    assert_eq!(store.get(project.id).await.unwrap().count, 25);
}
