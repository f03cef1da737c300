//! 运行时
//!
//! 持有当前生效的规则集：提供者注册表、作用域解析器与通知规则注册表。
//! 读取方拿到的是不可变快照，`reset` 以整体替换的方式切换规则集。

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::aspect::{AdviceRuleRegistry, AspectRule, Dispatcher, Intercepted, Operations, RegistryStats};
use crate::config::{ContainerConfig, RuntimeConfig};
use crate::errors::{BoxError, ContainerError, RuleError};
use crate::infrastructure::container::context::find_store;
use crate::infrastructure::container::resolver::downcast_instance;
use crate::infrastructure::container::scope::StoreEpochs;
use crate::infrastructure::container::{
    ApplicationHolder, AttributeHolder, ContainerStats, DestroyReport, ExecutionContext, Instance,
    ProviderRegistry, ProviderRule, ScopeKind, ScopeResolver, ScopeStore,
};
use crate::logging::OperationTimer;
use crate::pointcut::Joinpoint;

/// 一组提供者规则与切面规则
#[derive(Clone, Default)]
pub struct RuleSet {
    pub providers: Vec<Arc<ProviderRule>>,
    pub aspects: Vec<Arc<AspectRule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, rule: ProviderRule) -> Self {
        self.providers.push(Arc::new(rule));
        self
    }

    pub fn aspect(mut self, rule: AspectRule) -> Self {
        self.aspects.push(Arc::new(rule));
        self
    }
}

/// `reset` 时保留哪些作用域存储
///
/// 运行时持有的存储（单例、应用、上下文）在 `reset` 中立即销毁；挂在宿主对象上的
/// 请求、会话与租户应用存储在下一次访问时按代次判定过期，再销毁并重新分配
#[derive(Debug, Clone, Default)]
pub struct ResetOptions {
    pub preserve: Vec<ScopeKind>,
}

impl ResetOptions {
    pub fn preserving(kinds: &[ScopeKind]) -> Self {
        Self {
            preserve: kinds.to_vec(),
        }
    }

    pub fn preserves(&self, kind: ScopeKind) -> bool {
        self.preserve.contains(&kind)
    }
}

impl From<&ContainerConfig> for ResetOptions {
    fn from(config: &ContainerConfig) -> Self {
        Self::preserving(&config.preserve_on_reset)
    }
}

struct ActiveRules {
    providers: ProviderRegistry,
    resolver: ScopeResolver,
    advice: AdviceRuleRegistry,
}

impl ActiveRules {
    /// 每个运行时使用规则的独立副本，单例槽不在运行时之间共享
    fn build(
        rules: &RuleSet,
        config: &RuntimeConfig,
        application: Arc<dyn AttributeHolder>,
        context_store: Arc<ScopeStore>,
        epochs: StoreEpochs,
    ) -> Result<Self, RuleError> {
        let providers = ProviderRegistry::new(
            rules
                .providers
                .iter()
                .map(|rule| Arc::new(rule.detached()))
                .collect(),
        )?;
        let advice = AdviceRuleRegistry::new(rules.aspects.clone())?
            .with_cache(config.intercept.advice_cache);
        let resolver = ScopeResolver::new(application, context_store).with_epochs(epochs);

        Ok(Self {
            providers,
            resolver,
            advice,
        })
    }

    fn has_provider(&self, provider_id: &str, scope: ScopeKind) -> bool {
        self.providers
            .get(provider_id)
            .map(|rule| rule.scope() == scope)
            .unwrap_or(false)
    }
}

pub struct Runtime {
    config: RuntimeConfig,
    application: Arc<ApplicationHolder>,
    active: RwLock<Arc<ActiveRules>>,
    reset_lock: Mutex<()>,
}

impl Runtime {
    /// 激活规则集；配置要求时立即构造非懒加载单例
    pub fn new(rules: RuleSet, config: RuntimeConfig) -> Result<Self, RuleError> {
        let application = Arc::new(ApplicationHolder::new(&config.container.application_name));
        let epochs = StoreEpochs::initial();
        let active = ActiveRules::build(
            &rules,
            &config,
            application.clone(),
            Arc::new(ScopeStore::with_generation(ScopeKind::Context, epochs.current())),
            epochs,
        )?;

        if config.container.eager_singletons {
            active.resolver.initialize_singletons(&active.providers)?;
        }

        info!(
            providers = active.providers.len(),
            aspects = active.advice.len(),
            application = %config.container.application_name,
            "Runtime activated"
        );

        Ok(Self {
            config,
            application,
            active: RwLock::new(Arc::new(active)),
            reset_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn application(&self) -> &Arc<ApplicationHolder> {
        &self.application
    }

    fn snapshot(&self) -> Arc<ActiveRules> {
        self.active.read().clone()
    }

    /// 按提供者的作用域解析实例
    pub fn resolve(&self, provider_id: &str, context: Option<&ExecutionContext>) -> Result<Instance, ContainerError> {
        let active = self.snapshot();
        active.resolver.resolve(&active.providers, provider_id, context)
    }

    pub fn resolve_as<T: Any + Send + Sync>(
        &self,
        provider_id: &str,
        context: Option<&ExecutionContext>,
    ) -> Result<Arc<T>, ContainerError> {
        let instance = self.resolve(provider_id, context)?;
        downcast_instance::<T>(provider_id, instance)
    }

    /// 为已解析的实例包上拦截代理
    pub fn intercept<T: Operations + ?Sized>(
        self: &Arc<Self>,
        provider_id: &str,
        target: Arc<T>,
    ) -> Result<Intercepted<T>, ContainerError> {
        let active = self.snapshot();
        let rule = active.providers.require(provider_id)?;
        Ok(Intercepted::new(self.clone(), rule.id(), rule.class_name(), target))
    }

    /// 解析并拦截；上下文同时用于作用域解析和连接点的 container
    pub fn resolve_intercepted<T: Operations + Any>(
        self: &Arc<Self>,
        provider_id: &str,
        context: Option<Arc<ExecutionContext>>,
    ) -> Result<Intercepted<T>, ContainerError> {
        let target = self.resolve_as::<T>(provider_id, context.as_deref())?;
        let intercepted = self.intercept(provider_id, target)?;
        Ok(match context {
            Some(context) => intercepted.with_context(context),
            None => intercepted,
        })
    }

    /// 对一次调用执行通知链
    pub fn dispatch<F>(
        &self,
        joinpoint: &Joinpoint,
        args: &[Value],
        context: Option<&ExecutionContext>,
        call: F,
    ) -> Result<Value, BoxError>
    where
        F: FnOnce() -> Result<Value, BoxError>,
    {
        let active = self.snapshot();
        let beans = |provider_id: &str| active.resolver.resolve(&active.providers, provider_id, context);
        Dispatcher::new(&active.advice, &self.config.intercept.exempt_operations)
            .with_context(context)
            .with_advice_beans(&beans)
            .dispatch(joinpoint, args, call)
    }

    /// 以上下文的活动名执行一个工作单元；没有活动名时不经过通知
    pub fn run_activity<F>(&self, context: &ExecutionContext, args: &[Value], work: F) -> Result<Value, BoxError>
    where
        F: FnOnce() -> Result<Value, BoxError>,
    {
        let Some(activity) = context.activity() else {
            debug!("Execution context {} has no activity, running without advice", context.id());
            return work();
        };

        let active = self.snapshot();
        let beans = |provider_id: &str| active.resolver.resolve(&active.providers, provider_id, Some(context));
        Dispatcher::new(&active.advice, &self.config.intercept.exempt_operations)
            .with_context(Some(context))
            .with_advice_beans(&beans)
            .run_activity(activity, args, work)
    }

    /// 请求结束：销毁该上下文的请求作用域实例
    pub fn complete_request(&self, context: &ExecutionContext) -> DestroyReport {
        let active = self.snapshot();
        let report = active.resolver.destroy_request(context);
        debug!(
            context = %context.id(),
            destroyed = report.destroyed,
            "Request scope completed"
        );
        report
    }

    /// 会话过期：销毁该持有者上的会话作用域实例
    pub fn expire_session(&self, session: &dyn AttributeHolder) -> DestroyReport {
        let active = self.snapshot();
        active.resolver.destroy_session(session)
    }

    /// 按 `container.preserve_on_reset` 配置的保留范围切换规则集
    pub fn reload(&self, rules: RuleSet) -> Result<DestroyReport, RuleError> {
        self.reset(rules, ResetOptions::from(&self.config.container))
    }

    /// 切换规则集
    ///
    /// 通知缓存总是失效；运行时持有的单例、应用和上下文存储除非列在
    /// `options.preserve` 中，否则立即销毁。宿主持有的请求与会话存储在下一次
    /// 访问时过期。保留的实例只有在新规则中仍有同 id 同作用域的提供者时才会留下。
    pub fn reset(&self, rules: RuleSet, options: ResetOptions) -> Result<DestroyReport, RuleError> {
        let _serial = self.reset_lock.lock();
        let timer = OperationTimer::new("runtime.reset")
            .with_metadata("providers", rules.providers.len())
            .with_metadata("aspects", rules.aspects.len());

        let old = self.snapshot();
        let epochs = old.resolver.epochs().next(|kind| options.preserves(kind));
        let context_store = if options.preserves(ScopeKind::Context) {
            old.resolver.context_store().clone()
        } else {
            Arc::new(ScopeStore::with_generation(ScopeKind::Context, epochs.current()))
        };
        let new = ActiveRules::build(
            &rules,
            &self.config,
            self.application.clone(),
            context_store,
            epochs,
        )?;

        let mut report = DestroyReport::default();

        if options.preserves(ScopeKind::Singleton) {
            let mut adopted = 0;
            for managed in old.resolver.singletons().take_all() {
                match new.providers.get(&managed.provider_id) {
                    Some(rule) if rule.scope() == ScopeKind::Singleton => {
                        new.resolver.adopt_singleton(rule, managed.instance);
                        adopted += 1;
                    }
                    _ => {
                        old.resolver.singletons().insert(managed);
                    }
                }
            }
            debug!("Carried {} singleton(s) across reset", adopted);
        }
        if options.preserves(ScopeKind::Context) {
            report.merge(prune(&new, old.resolver.context_store(), ScopeKind::Context));
        }
        if options.preserves(ScopeKind::Application) {
            if let Some(store) = find_store(self.application.as_ref(), ScopeKind::Application) {
                report.merge(prune(&new, &store, ScopeKind::Application));
            }
        }

        let new_generation = epochs.current();
        *self.active.write() = Arc::new(new);

        report.merge(old.resolver.destroy_singletons(&old.providers));
        if !options.preserves(ScopeKind::Context) {
            report.merge(old.resolver.destroy_context());
        }
        if !options.preserves(ScopeKind::Application) {
            report.merge(old.resolver.destroy_application());
        }

        if self.config.container.eager_singletons {
            let active = self.snapshot();
            if let Err(e) = active.resolver.initialize_singletons(&active.providers) {
                warn!("Eager singleton initialization failed after reset: {}", e);
            }
        }

        for failure in &report.failures {
            warn!("Reset teardown failure: {}", failure);
        }
        let elapsed = timer.finish();
        info!(
            preserved = ?options.preserve,
            destroyed = report.destroyed,
            failures = report.failures.len(),
            generation = new_generation,
            elapsed_us = elapsed.as_micros() as u64,
            "Runtime reset"
        );
        Ok(report)
    }

    /// 销毁全部由运行时持有的实例
    pub fn shutdown(&self) -> DestroyReport {
        let _serial = self.reset_lock.lock();
        let active = self.snapshot();

        let mut report = active.resolver.destroy_singletons(&active.providers);
        report.merge(active.resolver.destroy_context());
        report.merge(active.resolver.destroy_application());

        info!(
            destroyed = report.destroyed,
            failures = report.failures.len(),
            "Runtime shut down"
        );
        report
    }

    pub fn container_stats(&self) -> ContainerStats {
        self.snapshot().resolver.stats()
    }

    pub fn advice_stats(&self) -> RegistryStats {
        self.snapshot().advice.stats()
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.snapshot().providers.ids()
    }

    pub fn aspect_ids(&self) -> Vec<String> {
        self.snapshot()
            .advice
            .aspects()
            .iter()
            .map(|aspect| aspect.id().to_string())
            .collect()
    }
}

/// 移除保留存储中已无对应提供者的实例并销毁
fn prune(new: &ActiveRules, store: &ScopeStore, kind: ScopeKind) -> DestroyReport {
    let stale = ScopeStore::new(kind);
    for provider_id in store.ids() {
        if new.has_provider(&provider_id, kind) {
            continue;
        }
        if let Some(managed) = store.remove(&provider_id) {
            stale.insert(managed);
        }
    }
    stale.destroy()
}
