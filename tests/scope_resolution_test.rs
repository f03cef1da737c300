//! 作用域解析的集成测试

use aspectcore::errors::ContainerError;
use aspectcore::infrastructure::container::{ExecutionContext, ProviderRule, ScopeKind, SessionHolder};
use aspectcore::{RuleSet, Runtime, RuntimeConfig};
use futures::future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Connection {
    serial: usize,
}

fn counting(id: &str, scope: ScopeKind, created: Arc<AtomicUsize>) -> ProviderRule {
    ProviderRule::new(id, scope, move |_| {
        // 放大竞争窗口
        std::thread::sleep(Duration::from_millis(2));
        Ok(Connection {
            serial: created.fetch_add(1, Ordering::SeqCst),
        })
    })
}

fn runtime(rules: RuleSet) -> Arc<Runtime> {
    Arc::new(Runtime::new(rules, RuntimeConfig::default()).unwrap())
}

#[tokio::test]
async fn test_singleton_constructed_once_under_contention() {
    let created = Arc::new(AtomicUsize::new(0));
    let runtime = runtime(RuleSet::new().provider(counting("pool", ScopeKind::Singleton, created.clone())));

    let mut handles = vec![];
    for _ in 0..32 {
        let runtime = runtime.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            runtime.resolve_as::<Connection>("pool", None).map(|c| c.serial)
        }));
    }

    let results = future::join_all(handles).await;
    for result in results {
        assert_eq!(result.unwrap().unwrap(), 0);
    }
    assert_eq!(created.load(Ordering::SeqCst), 1);

    let stats = runtime.container_stats();
    assert_eq!(stats.singleton_misses, 1);
    assert_eq!(stats.singleton_hits, 31);
}

#[tokio::test]
async fn test_request_scope_shared_within_context_only() {
    let created = Arc::new(AtomicUsize::new(0));
    let runtime = runtime(RuleSet::new().provider(counting("tx", ScopeKind::Request, created.clone())));

    let mut handles = vec![];
    for _ in 0..8 {
        let runtime = runtime.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let context = ExecutionContext::new().with_activity("orders/create");
            let first = runtime.resolve_as::<Connection>("tx", Some(&context)).unwrap();
            let second = runtime.resolve_as::<Connection>("tx", Some(&context)).unwrap();
            assert!(Arc::ptr_eq(&first, &second));
            let report = runtime.complete_request(&context);
            assert_eq!(report.destroyed, 1);
            first.serial
        }));
    }

    let mut serials: Vec<usize> = future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    serials.sort_unstable();
    serials.dedup();
    assert_eq!(serials.len(), 8);
}

#[test]
fn test_prototype_never_cached() {
    let created = Arc::new(AtomicUsize::new(0));
    let runtime = runtime(RuleSet::new().provider(counting("cmd", ScopeKind::Prototype, created.clone())));

    let a = runtime.resolve_as::<Connection>("cmd", None).unwrap();
    let b = runtime.resolve_as::<Connection>("cmd", None).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

#[test]
fn test_request_scope_outside_context_fails_fast() {
    let created = Arc::new(AtomicUsize::new(0));
    let runtime = runtime(RuleSet::new().provider(counting("tx", ScopeKind::Request, created.clone())));

    let err = runtime.resolve("tx", None).unwrap_err();
    assert!(matches!(
        err,
        ContainerError::ScopeUnavailable { scope: ScopeKind::Request, ref provider_id } if provider_id == "tx"
    ));
    assert_eq!(created.load(Ordering::SeqCst), 0);
}

#[test]
fn test_session_scope_and_expiry() {
    let created = Arc::new(AtomicUsize::new(0));
    let destroyed = Arc::new(AtomicUsize::new(0));
    let hook_count = destroyed.clone();
    let runtime = runtime(RuleSet::new().provider(
        counting("cart", ScopeKind::Session, created.clone()).with_destroy(move |_: &Connection| {
            hook_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    ));

    let session = Arc::new(SessionHolder::new());
    let context = ExecutionContext::new().with_session(session.clone());
    let first = runtime.resolve_as::<Connection>("cart", Some(&context)).unwrap();

    // 同一会话的另一个请求
    let next = ExecutionContext::new().with_session(session.clone());
    let again = runtime.resolve_as::<Connection>("cart", Some(&next)).unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    let report = runtime.expire_session(session.as_ref());
    assert_eq!(report.destroyed, 1);
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);

    let fresh = runtime.resolve_as::<Connection>("cart", Some(&next)).unwrap();
    assert_ne!(fresh.serial, first.serial);
}

#[test]
fn test_factory_resolves_dependencies() {
    struct Repository {
        connection: Arc<Connection>,
    }

    let created = Arc::new(AtomicUsize::new(0));
    let runtime = runtime(
        RuleSet::new()
            .provider(counting("pool", ScopeKind::Singleton, created.clone()))
            .provider(ProviderRule::new("repo", ScopeKind::Prototype, |resolver| {
                Ok(Repository {
                    connection: resolver.resolve_as::<Connection>("pool")?,
                })
            })),
    );

    let a = runtime.resolve_as::<Repository>("repo", None).unwrap();
    let b = runtime.resolve_as::<Repository>("repo", None).unwrap();
    assert!(Arc::ptr_eq(&a.connection, &b.connection));
}

#[test]
fn test_nested_resolution_across_scopes_does_not_deadlock() {
    struct Pair {
        _inner: Arc<Connection>,
    }

    fn nested(id: &str, scope: ScopeKind, inner: &'static str) -> ProviderRule {
        ProviderRule::new(id, scope, move |resolver| {
            // 让两个线程都先拿到外层作用域
            std::thread::sleep(Duration::from_millis(20));
            Ok(Pair {
                _inner: resolver.resolve_as::<Connection>(inner)?,
            })
        })
    }

    let created = Arc::new(AtomicUsize::new(0));
    let runtime = runtime(
        RuleSet::new()
            .provider(nested("s1", ScopeKind::Singleton, "c2"))
            .provider(nested("c1", ScopeKind::Context, "s2"))
            .provider(counting("s2", ScopeKind::Singleton, created.clone()))
            .provider(counting("c2", ScopeKind::Context, created.clone())),
    );

    let (done, finished) = std::sync::mpsc::channel();
    for id in ["s1", "c1"] {
        let runtime = runtime.clone();
        let done = done.clone();
        std::thread::spawn(move || {
            let resolved = runtime.resolve_as::<Pair>(id, None).is_ok();
            let _ = done.send((id, resolved));
        });
    }

    for _ in 0..2 {
        let (id, resolved) = finished
            .recv_timeout(Duration::from_secs(5))
            .expect("nested resolution stalled");
        assert!(resolved, "{} failed to resolve", id);
    }
    assert_eq!(created.load(Ordering::SeqCst), 2);
}
