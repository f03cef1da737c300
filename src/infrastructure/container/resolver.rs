//! 作用域解析器
//!
//! 按提供者声明的作用域返回实例，必要时构造：
//! - Singleton：整个规则集生命周期内至多构造一次，失败会被记住
//! - Prototype：每次构造新实例，从不存储
//! - Request / Session / Application / Context：在对应持有者的存储中查找或构造

use std::any::Any;
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

use super::context::{attach_store, detach_store, find_store, AttributeHolder, ExecutionContext};
use super::rule::{ProviderRegistry, ProviderRule, SingletonSlot};
use super::scope::{DestroyReport, ManagedInstance, ScopeLocks, ScopeStore, StoreEpochs};
use super::{Instance, ScopeKind};
use crate::errors::ContainerError;

thread_local! {
    /// 当前线程上正在构造的提供者 id
    static RESOLVING: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// 构造期间把 id 压入解析栈，离开作用域时弹出
struct ResolutionGuard;

impl ResolutionGuard {
    fn enter(provider_id: &str) -> Result<Self, ContainerError> {
        RESOLVING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(position) = stack.iter().position(|id| id == provider_id) {
                let mut chain = stack[position..].to_vec();
                chain.push(provider_id.to_string());
                return Err(ContainerError::CircularDependency { chain });
            }
            stack.push(provider_id.to_string());
            Ok(ResolutionGuard)
        })
    }
}

impl Drop for ResolutionGuard {
    fn drop(&mut self) {
        RESOLVING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// 内部统计信息（原子计数器）
#[derive(Default)]
struct InnerStats {
    total_resolutions: AtomicUsize,
    singleton_hits: AtomicUsize,
    singleton_misses: AtomicUsize,
    prototype_creations: AtomicUsize,
    scoped_hits: AtomicUsize,
    scoped_creations: AtomicUsize,
}

/// 解析统计快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerStats {
    pub total_resolutions: usize,
    pub singleton_hits: usize,
    pub singleton_misses: usize,
    pub prototype_creations: usize,
    pub scoped_hits: usize,
    pub scoped_creations: usize,
}

impl ContainerStats {
    /// 缓存命中率（原型解析不计入）
    pub fn hit_rate(&self) -> f64 {
        let hits = (self.singleton_hits + self.scoped_hits) as f64;
        let misses = (self.singleton_misses + self.scoped_creations) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }
}

pub(crate) fn downcast_instance<T: Any + Send + Sync>(
    provider_id: &str,
    instance: Instance,
) -> Result<Arc<T>, ContainerError> {
    instance
        .downcast::<T>()
        .map_err(|_| ContainerError::TypeCastFailed {
            provider_id: provider_id.to_string(),
            expected_type: std::any::type_name::<T>(),
        })
}

pub struct ScopeResolver {
    locks: ScopeLocks,
    singletons: ScopeStore,
    context_store: Arc<ScopeStore>,
    application: Arc<dyn AttributeHolder>,
    epochs: StoreEpochs,
    stats: InnerStats,
}

impl ScopeResolver {
    /// `application` 在执行上下文未提供应用持有者时使用；
    /// `context_store` 是进程级的 Context 作用域存储
    pub fn new(application: Arc<dyn AttributeHolder>, context_store: Arc<ScopeStore>) -> Self {
        Self {
            locks: ScopeLocks::new(),
            singletons: ScopeStore::new(ScopeKind::Singleton),
            context_store,
            application,
            epochs: StoreEpochs::initial(),
            stats: InnerStats::default(),
        }
    }

    /// 宿主持有者上代次过期的存储会在下次访问时被销毁并重新分配
    pub(crate) fn with_epochs(mut self, epochs: StoreEpochs) -> Self {
        self.epochs = epochs;
        self
    }

    pub(crate) fn epochs(&self) -> StoreEpochs {
        self.epochs
    }

    pub fn resolve(
        &self,
        providers: &ProviderRegistry,
        provider_id: &str,
        context: Option<&ExecutionContext>,
    ) -> Result<Instance, ContainerError> {
        self.stats.total_resolutions.fetch_add(1, Ordering::Relaxed);
        let rule = providers.require(provider_id)?;

        match rule.scope() {
            ScopeKind::Singleton => self.resolve_singleton(providers, rule, context),
            ScopeKind::Prototype => {
                let instance = self.construct(providers, rule, context)?;
                self.stats.prototype_creations.fetch_add(1, Ordering::Relaxed);
                Ok(instance)
            }
            kind => self.resolve_scoped(providers, rule, kind, context),
        }
    }

    fn resolve_singleton(
        &self,
        providers: &ProviderRegistry,
        rule: &ProviderRule,
        context: Option<&ExecutionContext>,
    ) -> Result<Instance, ContainerError> {
        if let SingletonSlot::Ready(instance) = rule.singleton_slot() {
            self.stats.singleton_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(instance);
        }

        let _guard = self.locks.acquire(ScopeKind::Singleton);
        match rule.singleton_slot() {
            SingletonSlot::Ready(instance) => {
                self.stats.singleton_hits.fetch_add(1, Ordering::Relaxed);
                Ok(instance)
            }
            SingletonSlot::Failed(source) => Err(ContainerError::ConstructionFailed {
                provider_id: rule.id().to_string(),
                source,
            }),
            SingletonSlot::Empty => {
                self.stats.singleton_misses.fetch_add(1, Ordering::Relaxed);
                match self.construct(providers, rule, context) {
                    Ok(instance) => {
                        rule.fill_singleton(instance.clone());
                        self.singletons.insert(ManagedInstance::new(rule, instance.clone()));
                        debug!("Singleton '{}' constructed", rule.id());
                        Ok(instance)
                    }
                    Err(ContainerError::ConstructionFailed {
                        provider_id,
                        source,
                    }) => {
                        rule.poison_singleton(source.clone());
                        Err(ContainerError::ConstructionFailed {
                            provider_id,
                            source,
                        })
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn resolve_scoped(
        &self,
        providers: &ProviderRegistry,
        rule: &ProviderRule,
        kind: ScopeKind,
        context: Option<&ExecutionContext>,
    ) -> Result<Instance, ContainerError> {
        if let Some(instance) = self
            .current_store(kind, context)
            .and_then(|store| store.get(rule.id()))
        {
            self.stats.scoped_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(instance);
        }

        let _guard = self.locks.acquire(kind);
        let store = self.locate_store(kind, rule.id(), context)?;
        if let Some(instance) = store.get(rule.id()) {
            self.stats.scoped_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(instance);
        }

        let instance = self.construct(providers, rule, context)?;
        self.stats.scoped_creations.fetch_add(1, Ordering::Relaxed);
        trace!("{} scoped instance '{}' constructed", kind, rule.id());
        Ok(store.insert(ManagedInstance::new(rule, instance)))
    }

    fn application_holder<'c>(&'c self, context: Option<&'c ExecutionContext>) -> &'c Arc<dyn AttributeHolder> {
        context
            .and_then(ExecutionContext::application)
            .unwrap_or(&self.application)
    }

    /// 不加锁、不分配的查找；只返回当前代次的存储
    fn current_store(&self, kind: ScopeKind, context: Option<&ExecutionContext>) -> Option<Arc<ScopeStore>> {
        let store = match kind {
            ScopeKind::Request => find_store(context?, kind),
            ScopeKind::Session => find_store(context?.session()?.as_ref(), kind),
            ScopeKind::Application => find_store(self.application_holder(context).as_ref(), kind),
            ScopeKind::Context => Some(self.context_store.clone()),
            ScopeKind::Singleton | ScopeKind::Prototype => None,
        }?;
        self.epochs.accepts(&store).then_some(store)
    }

    /// 找到作用域对应持有者上的存储；所需持有者缺失时立即失败，不回退到其他作用域
    fn locate_store(
        &self,
        kind: ScopeKind,
        provider_id: &str,
        context: Option<&ExecutionContext>,
    ) -> Result<Arc<ScopeStore>, ContainerError> {
        let unavailable = || ContainerError::ScopeUnavailable {
            scope: kind,
            provider_id: provider_id.to_string(),
        };

        let holder: &dyn AttributeHolder = match kind {
            ScopeKind::Request => context.ok_or_else(unavailable)?,
            ScopeKind::Session => context
                .and_then(ExecutionContext::session)
                .ok_or_else(unavailable)?
                .as_ref(),
            ScopeKind::Application => self.application_holder(context).as_ref(),
            ScopeKind::Context => return Ok(self.context_store.clone()),
            ScopeKind::Singleton | ScopeKind::Prototype => return Err(unavailable()),
        };
        Ok(self.holder_store(holder, kind))
    }

    /// 持有者上的当前代次存储；旧规则集留下的存储先销毁再替换
    fn holder_store(&self, holder: &dyn AttributeHolder, kind: ScopeKind) -> Arc<ScopeStore> {
        if let Some(store) = find_store(holder, kind) {
            if self.epochs.accepts(&store) {
                return store;
            }
            detach_store(holder, kind);
            let report = store.destroy();
            debug!(
                "Discarded {} store from rule set generation {}: {} destroyed, {} failure(s)",
                kind,
                store.generation(),
                report.destroyed,
                report.failures.len()
            );
        }
        let store = Arc::new(ScopeStore::with_generation(kind, self.epochs.current()));
        attach_store(holder, store.clone());
        store
    }

    fn construct(
        &self,
        providers: &ProviderRegistry,
        rule: &ProviderRule,
        context: Option<&ExecutionContext>,
    ) -> Result<Instance, ContainerError> {
        let _entry = ResolutionGuard::enter(rule.id())?;
        let resolver = ProviderResolver {
            scopes: self,
            providers,
            context,
        };
        rule.factory()
            .create(&resolver)
            .map_err(|e| ContainerError::construction(rule.id(), e))
    }

    /// 立即构造全部非懒加载的单例，遇到第一个失败即返回
    pub fn initialize_singletons(&self, providers: &ProviderRegistry) -> Result<usize, ContainerError> {
        let mut initialized = 0;
        for rule in providers
            .iter()
            .filter(|rule| rule.scope() == ScopeKind::Singleton && !rule.is_lazy())
        {
            self.resolve(providers, rule.id(), None)?;
            initialized += 1;
        }
        if initialized > 0 {
            info!("Initialized {} eager singleton(s)", initialized);
        }
        Ok(initialized)
    }

    /// 把保留下来的单例放回新规则的单例槽
    pub(crate) fn adopt_singleton(&self, rule: &ProviderRule, instance: Instance) {
        let _guard = self.locks.acquire(ScopeKind::Singleton);
        rule.fill_singleton(instance.clone());
        self.singletons.insert(ManagedInstance::new(rule, instance));
    }

    pub(crate) fn singletons(&self) -> &ScopeStore {
        &self.singletons
    }

    pub(crate) fn context_store(&self) -> &Arc<ScopeStore> {
        &self.context_store
    }

    /// 销毁全部单例并清空单例槽
    pub fn destroy_singletons(&self, providers: &ProviderRegistry) -> DestroyReport {
        let _guard = self.locks.acquire(ScopeKind::Singleton);
        for rule in providers.iter() {
            rule.clear_singleton();
        }
        self.singletons.destroy()
    }

    pub fn destroy_context(&self) -> DestroyReport {
        let _guard = self.locks.acquire(ScopeKind::Context);
        self.context_store.destroy()
    }

    /// 销毁默认应用持有者上的应用作用域实例
    pub fn destroy_application(&self) -> DestroyReport {
        let _guard = self.locks.acquire(ScopeKind::Application);
        detach_store(self.application.as_ref(), ScopeKind::Application)
            .map(|store| store.destroy())
            .unwrap_or_default()
    }

    pub fn destroy_request(&self, context: &ExecutionContext) -> DestroyReport {
        let _guard = self.locks.acquire(ScopeKind::Request);
        detach_store(context, ScopeKind::Request)
            .map(|store| store.destroy())
            .unwrap_or_default()
    }

    pub fn destroy_session(&self, session: &dyn AttributeHolder) -> DestroyReport {
        let _guard = self.locks.acquire(ScopeKind::Session);
        detach_store(session, ScopeKind::Session)
            .map(|store| store.destroy())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> ContainerStats {
        ContainerStats {
            total_resolutions: self.stats.total_resolutions.load(Ordering::Relaxed),
            singleton_hits: self.stats.singleton_hits.load(Ordering::Relaxed),
            singleton_misses: self.stats.singleton_misses.load(Ordering::Relaxed),
            prototype_creations: self.stats.prototype_creations.load(Ordering::Relaxed),
            scoped_hits: self.stats.scoped_hits.load(Ordering::Relaxed),
            scoped_creations: self.stats.scoped_creations.load(Ordering::Relaxed),
        }
    }
}

/// 交给提供者工厂的解析句柄，用于解析工厂自身的依赖
pub struct ProviderResolver<'a> {
    scopes: &'a ScopeResolver,
    providers: &'a ProviderRegistry,
    context: Option<&'a ExecutionContext>,
}

impl<'a> ProviderResolver<'a> {
    pub fn resolve(&self, provider_id: &str) -> Result<Instance, ContainerError> {
        self.scopes.resolve(self.providers, provider_id, self.context)
    }

    pub fn resolve_as<T: Any + Send + Sync>(&self, provider_id: &str) -> Result<Arc<T>, ContainerError> {
        downcast_instance(provider_id, self.resolve(provider_id)?)
    }

    pub fn context(&self) -> Option<&'a ExecutionContext> {
        self.context
    }
}
