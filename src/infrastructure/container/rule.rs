//! 提供者规则
//!
//! 规则由规则加载子系统产生，加载后只读；唯一可变的部分是单例槽。

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::resolver::ProviderResolver;
use super::{Instance, ScopeKind};
use crate::errors::{BoxError, ContainerError, SharedError};

/// 提供者工厂
pub trait ProviderFactory: Send + Sync {
    /// 创建实例，可通过 `resolver` 解析自身依赖
    fn create(&self, resolver: &ProviderResolver<'_>) -> Result<Instance, BoxError>;
}

/// 函数式提供者工厂
pub struct FnProviderFactory<F, T> {
    factory_fn: F,
    _phantom: std::marker::PhantomData<fn() -> T>,
}

impl<F, T> FnProviderFactory<F, T> {
    pub fn new(factory_fn: F) -> Self {
        Self {
            factory_fn,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<F, T> ProviderFactory for FnProviderFactory<F, T>
where
    F: Fn(&ProviderResolver<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn create(&self, resolver: &ProviderResolver<'_>) -> Result<Instance, BoxError> {
        let instance = (self.factory_fn)(resolver)?;
        Ok(Arc::new(instance))
    }
}

/// 销毁钩子，尽力而为地调用
pub type DestroyHook = Arc<dyn Fn(&Instance) -> Result<(), BoxError> + Send + Sync>;

/// 单例槽：只会被填充一次；构造失败会被记住，直到下一次 reset
#[derive(Clone, Default)]
pub(crate) enum SingletonSlot {
    #[default]
    Empty,
    Ready(Instance),
    Failed(SharedError),
}

pub struct ProviderRule {
    id: String,
    class_name: String,
    scope: ScopeKind,
    lazy: bool,
    factory: Arc<dyn ProviderFactory>,
    destroy: Option<DestroyHook>,
    singleton: Mutex<SingletonSlot>,
}

impl fmt::Debug for ProviderRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRule")
            .field("id", &self.id)
            .field("class_name", &self.class_name)
            .field("scope", &self.scope)
            .field("lazy", &self.lazy)
            .field("has_destroy_hook", &self.destroy.is_some())
            .finish()
    }
}

impl ProviderRule {
    /// 以闭包注册提供者，类名默认取 `T` 的类型名
    pub fn new<T, F>(id: &str, scope: ScopeKind, factory: F) -> Self
    where
        F: Fn(&ProviderResolver<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        Self::from_factory(
            id,
            std::any::type_name::<T>(),
            scope,
            Arc::new(FnProviderFactory::<F, T>::new(factory)),
        )
    }

    pub fn from_factory(
        id: &str,
        class_name: &str,
        scope: ScopeKind,
        factory: Arc<dyn ProviderFactory>,
    ) -> Self {
        Self {
            id: id.to_string(),
            class_name: class_name.to_string(),
            scope,
            lazy: true,
            factory,
            destroy: None,
            singleton: Mutex::new(SingletonSlot::Empty),
        }
    }

    /// 复制规则定义，单例槽为空；每个激活的规则集持有自己的副本
    pub fn detached(&self) -> Self {
        Self {
            id: self.id.clone(),
            class_name: self.class_name.clone(),
            scope: self.scope,
            lazy: self.lazy,
            factory: self.factory.clone(),
            destroy: self.destroy.clone(),
            singleton: Mutex::new(SingletonSlot::Empty),
        }
    }

    pub fn with_class_name(mut self, class_name: &str) -> Self {
        self.class_name = class_name.to_string();
        self
    }

    /// 非懒加载的单例会在规则集激活时立即构造
    pub fn eager(mut self) -> Self {
        self.lazy = false;
        self
    }

    /// 注册类型化的销毁钩子；实例类型不符时钩子报告错误
    pub fn with_destroy<T, H>(mut self, hook: H) -> Self
    where
        T: Send + Sync + 'static,
        H: Fn(&T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.destroy = Some(Arc::new(move |instance: &Instance| {
            let typed = instance
                .downcast_ref::<T>()
                .ok_or_else(|| format!("instance is not a {}", std::any::type_name::<T>()))?;
            hook(typed)
        }));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn scope(&self) -> ScopeKind {
        self.scope
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub(crate) fn factory(&self) -> &dyn ProviderFactory {
        self.factory.as_ref()
    }

    pub(crate) fn destroy_hook(&self) -> Option<&DestroyHook> {
        self.destroy.as_ref()
    }

    pub(crate) fn singleton_slot(&self) -> SingletonSlot {
        self.singleton.lock().clone()
    }

    pub(crate) fn fill_singleton(&self, instance: Instance) {
        *self.singleton.lock() = SingletonSlot::Ready(instance);
    }

    pub(crate) fn poison_singleton(&self, source: SharedError) {
        *self.singleton.lock() = SingletonSlot::Failed(source);
    }

    pub(crate) fn clear_singleton(&self) -> Option<Instance> {
        match std::mem::take(&mut *self.singleton.lock()) {
            SingletonSlot::Ready(instance) => Some(instance),
            _ => None,
        }
    }
}

/// 提供者规则表，保持声明顺序，按 id 查找
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    rules: Vec<Arc<ProviderRule>>,
    index: HashMap<String, usize>,
}

impl ProviderRegistry {
    pub fn new(rules: Vec<Arc<ProviderRule>>) -> Result<Self, ContainerError> {
        let mut index = HashMap::with_capacity(rules.len());
        for (position, rule) in rules.iter().enumerate() {
            if index.insert(rule.id().to_string(), position).is_some() {
                return Err(ContainerError::DuplicateProvider(rule.id().to_string()));
            }
        }
        Ok(Self { rules, index })
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ProviderRule>> {
        self.index.get(id).map(|&position| &self.rules[position])
    }

    pub fn require(&self, id: &str) -> Result<&Arc<ProviderRule>, ContainerError> {
        self.get(id).ok_or_else(|| ContainerError::ProviderNotFound {
            provider_id: id.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProviderRule>> {
        self.rules.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.rules.iter().map(|rule| rule.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pool {
        size: usize,
    }

    #[test]
    fn test_rule_defaults() {
        let rule = ProviderRule::new("pool", ScopeKind::Singleton, |_| Ok(Pool { size: 4 }));
        assert_eq!(rule.id(), "pool");
        assert!(rule.class_name().ends_with("Pool"));
        assert!(rule.is_lazy());
        assert!(!rule.eager().is_lazy());
    }

    #[test]
    fn test_detached_copy_has_empty_slot() {
        let rule = ProviderRule::new("pool", ScopeKind::Singleton, |_| Ok(Pool { size: 1 })).eager();
        rule.fill_singleton(Arc::new(Pool { size: 1 }));

        let copy = rule.detached();
        assert!(matches!(copy.singleton_slot(), SingletonSlot::Empty));
        assert!(matches!(rule.singleton_slot(), SingletonSlot::Ready(_)));
        assert!(!copy.is_lazy());
        assert_eq!(copy.class_name(), rule.class_name());
    }

    #[test]
    fn test_typed_destroy_hook() {
        let rule = ProviderRule::new("pool", ScopeKind::Singleton, |_| Ok(Pool { size: 4 }))
            .with_destroy(|pool: &Pool| {
                if pool.size == 4 {
                    Ok(())
                } else {
                    Err("unexpected size".into())
                }
            });
        let hook = rule.destroy_hook().unwrap();

        let pool: Instance = Arc::new(Pool { size: 4 });
        assert!(hook(&pool).is_ok());

        let wrong: Instance = Arc::new("not a pool");
        assert!(hook(&wrong).is_err());
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let rules = vec![
            Arc::new(ProviderRule::new("a", ScopeKind::Prototype, |_| Ok(1u8))),
            Arc::new(ProviderRule::new("a", ScopeKind::Singleton, |_| Ok(2u8))),
        ];
        assert!(matches!(
            ProviderRegistry::new(rules),
            Err(ContainerError::DuplicateProvider(id)) if id == "a"
        ));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ProviderRegistry::new(vec![
            Arc::new(ProviderRule::new("a", ScopeKind::Prototype, |_| Ok(1u8))),
            Arc::new(ProviderRule::new("b", ScopeKind::Request, |_| Ok(2u8))),
        ])
        .unwrap();

        assert_eq!(registry.ids(), vec!["a", "b"]);
        assert_eq!(registry.require("b").unwrap().scope(), ScopeKind::Request);
        assert!(matches!(
            registry.require("c"),
            Err(ContainerError::ProviderNotFound { provider_id }) if provider_id == "c"
        ));
    }
}
