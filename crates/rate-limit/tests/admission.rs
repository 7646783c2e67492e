use std::sync::Arc;

use mixgate_common::ProjectId;
use mixgate_rate_limit::{
    AdmitError, CounterStore, MemoryCounterStore, ProjectDescriptor, RateLimiter, ResetJob,
    SqliteCounterStore,
};

fn stores() -> Vec<(&'static str, Arc<dyn CounterStore>)> {
    vec![
        ("memory", Arc::new(MemoryCounterStore::new())),
        ("sqlite", Arc::new(SqliteCounterStore::in_memory().unwrap())),
    ]
}

async fn fresh_project(store: &Arc<dyn CounterStore>) -> ProjectDescriptor {
    let project = ProjectDescriptor {
        id: ProjectId::new(),
        is_premium: false,
    };
    store.create(project.id).await.unwrap();
    project
}

#[tokio::test]
async fn test_monotonic_admission() {
    for (name, store) in stores() {
        let limiter = RateLimiter::new(store.clone(), 5);
        let project = fresh_project(&store).await;

        for i in 0..5 {
            assert!(
                limiter.admit(&project).await.unwrap().is_allowed(),
                "[{}] call {} should be allowed",
                name,
                i
            );
        }
        assert!(!limiter.admit(&project).await.unwrap().is_allowed(), "[{}]", name);
        assert!(!limiter.admit(&project).await.unwrap().is_allowed(), "[{}]", name);
        assert_eq!(store.get(project.id).await.unwrap().count, 5, "[{}]", name);
    }
}

#[tokio::test]
async fn test_basic_throttle_then_reset() {
    for (name, store) in stores() {
        let limiter = RateLimiter::new(store.clone(), 2);
        let project = fresh_project(&store).await;

        let results: Vec<bool> = {
            let mut out = Vec::new();
            for _ in 0..3 {
                out.push(limiter.admit(&project).await.unwrap().is_allowed());
            }
            out
        };
        assert_eq!(results, vec![true, true, false], "[{}]", name);

        store.reset(project.id).await.unwrap();
        assert!(limiter.admit(&project).await.unwrap().is_allowed(), "[{}]", name);
    }
}

#[tokio::test]
async fn test_missing_counter_is_configuration_error() {
    for (name, store) in stores() {
        let limiter = RateLimiter::new(store, 2);
        let project = ProjectDescriptor {
            id: ProjectId::new(),
            is_premium: false,
        };

        match limiter.admit(&project).await {
            Err(AdmitError::Configuration(id)) => assert_eq!(id, project.id, "[{}]", name),
            other => panic!("[{}] expected configuration error, got {:?}", name, other),
        }
    }
}

#[tokio::test]
async fn test_premium_bypass() {
    for (name, store) in stores() {
        let limiter = RateLimiter::new(store.clone(), 1);
        let mut project = fresh_project(&store).await;
        project.is_premium = true;

        for _ in 0..20 {
            assert!(limiter.admit(&project).await.unwrap().is_allowed(), "[{}]", name);
        }
        assert_eq!(store.get(project.id).await.unwrap().count, 0, "[{}]", name);
    }
}

#[tokio::test]
async fn test_reset_all_idempotent_and_empty() {
    for (name, store) in stores() {
        let job = ResetJob::new(store.clone());
        assert_eq!(job.run_once().await.unwrap(), 0, "[{}] empty pass", name);

        let limiter = RateLimiter::new(store.clone(), 10);
        let a = fresh_project(&store).await;
        let b = fresh_project(&store).await;
        limiter.admit(&a).await.unwrap();
        limiter.admit(&b).await.unwrap();
        limiter.admit(&b).await.unwrap();

        assert_eq!(job.run_once().await.unwrap(), 2, "[{}]", name);
        let first: Vec<u64> = store.list().await.unwrap().iter().map(|c| c.count).collect();
        assert_eq!(job.run_once().await.unwrap(), 2, "[{}]", name);
        let second: Vec<u64> = store.list().await.unwrap().iter().map(|c| c.count).collect();

        assert_eq!(first, vec![0, 0], "[{}]", name);
        assert_eq!(first, second, "[{}]", name);
    }
}

async fn hammer(store: Arc<dyn CounterStore>, threshold: u64, callers: usize) -> (usize, u64) {
    let limiter = RateLimiter::new(store.clone(), threshold);
    let project = fresh_project(&store).await;

    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.admit(&project).await.unwrap().is_allowed() })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    let count = store.get(project.id).await.unwrap().count;
    (admitted, count)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_admission_never_overshoots() {
    for (name, store) in stores() {
        let (admitted, count) = hammer(store, 50, 200).await;
        assert_eq!(admitted, 50, "[{}]", name);
        assert_eq!(count, 50, "[{}]", name);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_admission_below_threshold() {
    for (name, store) in stores() {
        let (admitted, count) = hammer(store, 50, 30).await;
        assert_eq!(admitted, 30, "[{}]", name);
        assert_eq!(count, 30, "[{}]", name);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_projects_are_independent() {
    let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
    let limiter = RateLimiter::new(store.clone(), 3);
    let projects = vec![fresh_project(&store).await, fresh_project(&store).await];

    let mut handles = Vec::new();
    for project in &projects {
        for _ in 0..10 {
            let limiter = limiter.clone();
            let project = *project;
            handles.push(tokio::spawn(async move {
                limiter.admit(&project).await.unwrap().is_allowed()
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for project in &projects {
        assert_eq!(store.get(project.id).await.unwrap().count, 3);
    }
}
