//! 作用域存储与作用域锁

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::rule::{DestroyHook, ProviderRule};
use super::{Instance, ScopeKind};
use crate::errors::ContainerError;

/// 每种作用域一把可重入锁，同一种作用域内的构造是串行的
pub(crate) struct ScopeLocks {
    locks: [ReentrantMutex<()>; 5],
}

/// 持有下标 `0..=index` 的全部作用域锁
pub(crate) struct ScopeGuard<'a> {
    _held: Vec<ReentrantMutexGuard<'a, ()>>,
}

impl ScopeLocks {
    pub(crate) fn new() -> Self {
        Self {
            locks: std::array::from_fn(|_| ReentrantMutex::new(())),
        }
    }

    /// 总是按下标升序加锁，工厂跨作用域嵌套解析时不会形成环形等待。
    /// 原型作用域没有锁，返回 `None`
    pub(crate) fn acquire(&self, kind: ScopeKind) -> Option<ScopeGuard<'_>> {
        let index = kind.lock_index()?;
        Some(ScopeGuard {
            _held: self.locks[..=index].iter().map(|lock| lock.lock()).collect(),
        })
    }
}

/// 规则集的代次；存储的代次低于该作用域的下限时视为过期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StoreEpochs {
    current: u64,
    floors: [u64; 5],
}

impl StoreEpochs {
    pub(crate) fn initial() -> Self {
        Self {
            current: 0,
            floors: [0; 5],
        }
    }

    /// 下一代规则集；被保留的作用域沿用原来的下限
    pub(crate) fn next(&self, preserves: impl Fn(ScopeKind) -> bool) -> Self {
        let current = self.current + 1;
        let mut floors = self.floors;
        for kind in ScopeKind::ALL {
            if let Some(index) = kind.lock_index() {
                if !preserves(kind) {
                    floors[index] = current;
                }
            }
        }
        Self { current, floors }
    }

    pub(crate) fn current(&self) -> u64 {
        self.current
    }

    pub(crate) fn accepts(&self, store: &ScopeStore) -> bool {
        store
            .kind()
            .lock_index()
            .is_some_and(|index| store.generation() >= self.floors[index])
    }
}

/// 受管实例；带着构造它的规则所声明的销毁钩子，规则集切换后仍能正确销毁
#[derive(Clone)]
pub struct ManagedInstance {
    pub provider_id: String,
    pub instance: Instance,
    pub(crate) destroy: Option<DestroyHook>,
}

impl ManagedInstance {
    pub fn new(rule: &ProviderRule, instance: Instance) -> Self {
        Self {
            provider_id: rule.id().to_string(),
            instance,
            destroy: rule.destroy_hook().cloned(),
        }
    }
}

impl std::fmt::Debug for ManagedInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedInstance")
            .field("provider_id", &self.provider_id)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct StoreEntries {
    order: Vec<String>,
    instances: HashMap<String, ManagedInstance>,
}

/// 一次销毁的结果；失败只记录，不中断其余实例的销毁
#[derive(Debug, Default)]
pub struct DestroyReport {
    pub destroyed: usize,
    pub failures: Vec<ContainerError>,
}

impl DestroyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn merge(&mut self, other: DestroyReport) {
        self.destroyed += other.destroyed;
        self.failures.extend(other.failures);
    }
}

/// 某个生命周期持有者上的实例存储，按插入顺序保存
pub struct ScopeStore {
    kind: ScopeKind,
    generation: u64,
    entries: Mutex<StoreEntries>,
}

impl std::fmt::Debug for ScopeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeStore")
            .field("kind", &self.kind)
            .field("generation", &self.generation)
            .field("ids", &self.ids())
            .finish()
    }
}

impl ScopeStore {
    pub fn new(kind: ScopeKind) -> Self {
        Self::with_generation(kind, 0)
    }

    /// 标记为由第 `generation` 代规则集分配
    pub fn with_generation(kind: ScopeKind, generation: u64) -> Self {
        Self {
            kind,
            generation,
            entries: Mutex::new(StoreEntries::default()),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, provider_id: &str) -> Option<Instance> {
        self.entries
            .lock()
            .instances
            .get(provider_id)
            .map(|managed| managed.instance.clone())
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.entries.lock().instances.contains_key(provider_id)
    }

    /// 插入实例；同一 id 已存在时保留原有实例并返回它
    pub fn insert(&self, managed: ManagedInstance) -> Instance {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.instances.get(&managed.provider_id) {
            return existing.instance.clone();
        }
        let instance = managed.instance.clone();
        entries.order.push(managed.provider_id.clone());
        entries
            .instances
            .insert(managed.provider_id.clone(), managed);
        instance
    }

    /// 移出一个实例而不调用销毁钩子
    pub fn remove(&self, provider_id: &str) -> Option<ManagedInstance> {
        let mut entries = self.entries.lock();
        let removed = entries.instances.remove(provider_id)?;
        entries.order.retain(|id| id != provider_id);
        Some(removed)
    }

    /// 按插入顺序取出全部实例并清空存储
    pub fn take_all(&self) -> Vec<ManagedInstance> {
        let mut entries = self.entries.lock();
        let StoreEntries {
            order,
            mut instances,
        } = std::mem::take(&mut *entries);
        order
            .into_iter()
            .filter_map(|id| instances.remove(&id))
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.lock().order.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按插入顺序销毁全部实例，然后清空存储
    pub fn destroy(&self) -> DestroyReport {
        let instances = self.take_all();
        let mut report = DestroyReport::default();

        for managed in instances {
            match teardown(&managed) {
                Ok(()) => report.destroyed += 1,
                Err(e) => {
                    warn!("{} scope teardown: {}", self.kind, e);
                    report.failures.push(e);
                }
            }
        }

        debug!(
            "Destroyed {} {} scoped instance(s), {} failure(s)",
            report.destroyed,
            self.kind,
            report.failures.len()
        );
        report
    }
}

/// 调用构造时记录的销毁钩子；没有钩子时直接丢弃实例
fn teardown(managed: &ManagedInstance) -> Result<(), ContainerError> {
    match &managed.destroy {
        Some(hook) => hook(&managed.instance)
            .map_err(|e| ContainerError::destruction(&managed.provider_id, e)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn managed(id: &str, value: u32) -> ManagedInstance {
        ManagedInstance {
            provider_id: id.to_string(),
            instance: Arc::new(value),
            destroy: None,
        }
    }

    #[test]
    fn test_insert_keeps_single_entry_per_id() {
        let store = ScopeStore::new(ScopeKind::Request);
        store.insert(managed("a", 1));
        let kept = store.insert(managed("a", 2));

        assert_eq!(*kept.downcast_ref::<u32>().unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_take_all_preserves_insertion_order() {
        let store = ScopeStore::new(ScopeKind::Context);
        for id in ["c", "a", "b"] {
            store.insert(managed(id, 0));
        }
        store.remove("a");

        let ids: Vec<String> = store.take_all().into_iter().map(|m| m.provider_id).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_destroy_is_best_effort() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = destroyed.clone();
        let broken = ProviderRule::new("broken", ScopeKind::Request, |_| Ok(1u32))
            .with_destroy(|_: &u32| Err("socket already closed".into()));
        let healthy = ProviderRule::new("healthy", ScopeKind::Request, |_| Ok(2u32)).with_destroy(
            move |_: &u32| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        let store = ScopeStore::new(ScopeKind::Request);
        store.insert(ManagedInstance::new(&broken, Arc::new(1u32)));
        store.insert(ManagedInstance::new(&healthy, Arc::new(2u32)));
        store.insert(managed("plain", 3));

        let report = store.destroy();
        assert_eq!(report.destroyed, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            &report.failures[0],
            ContainerError::DestructionFailed { provider_id, .. } if provider_id == "broken"
        ));
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_scope_locks_are_reentrant() {
        let locks = ScopeLocks::new();
        let _outer = locks.acquire(ScopeKind::Session).unwrap();
        let _inner = locks.acquire(ScopeKind::Session).unwrap();
        let _wider = locks.acquire(ScopeKind::Context).unwrap();
        assert!(locks.acquire(ScopeKind::Prototype).is_none());
    }

    #[test]
    fn test_epochs_expire_unpreserved_stores() {
        let first = StoreEpochs::initial();
        let session = ScopeStore::with_generation(ScopeKind::Session, first.current());
        let context = ScopeStore::with_generation(ScopeKind::Context, first.current());
        assert!(first.accepts(&session));

        let second = first.next(|kind| kind == ScopeKind::Context);
        assert_eq!(second.current(), 1);
        assert!(!second.accepts(&session));
        assert!(second.accepts(&context));

        let third = second.next(|_| false);
        assert!(!third.accepts(&context));
        assert!(third.accepts(&ScopeStore::with_generation(ScopeKind::Request, third.current())));
    }
}
