//! 通知规则注册表
//!
//! 连接点第一次被拦截时，对全部切面求值切点并把命中的通知拆分成
//! before / after / finally / 异常处理器四个有序列表；之后的调用直接复用。

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::rule::{AdviceAction, AdviceKind, AspectRule, ExceptionHandler, JoinpointTarget};
use crate::errors::RuleError;
use crate::pointcut::{Joinpoint, PointcutMatch};

/// 绑定到某个连接点的一条通知
#[derive(Clone)]
pub struct BoundAdvice {
    pub aspect: Arc<AspectRule>,
    pub groups: Arc<PointcutMatch>,
    pub action: Arc<dyn AdviceAction>,
}

#[derive(Clone)]
pub struct BoundHandler {
    pub aspect: Arc<AspectRule>,
    pub groups: Arc<PointcutMatch>,
    pub handler: ExceptionHandler,
}

/// 一个连接点的通知集合，发布后不可变
#[derive(Clone, Default)]
pub struct AdviceBundle {
    aspects: Vec<Arc<AspectRule>>,
    before: Vec<BoundAdvice>,
    after: Vec<BoundAdvice>,
    finally: Vec<BoundAdvice>,
    handlers: Vec<BoundHandler>,
}

impl AdviceBundle {
    fn push(&mut self, aspect: &Arc<AspectRule>, groups: PointcutMatch) {
        let groups = Arc::new(groups);
        let bind = |action: &Arc<dyn AdviceAction>| BoundAdvice {
            aspect: aspect.clone(),
            groups: groups.clone(),
            action: action.clone(),
        };

        for advice in aspect.advices() {
            match advice.kind {
                AdviceKind::Before => self.before.push(bind(&advice.action)),
                AdviceKind::After => self.after.push(bind(&advice.action)),
                AdviceKind::Around => {
                    self.before.push(bind(&advice.action));
                    self.after.push(bind(&advice.action));
                }
                AdviceKind::Finally => self.finally.push(bind(&advice.action)),
            }
        }
        for handler in aspect.handlers() {
            self.handlers.push(BoundHandler {
                aspect: aspect.clone(),
                groups: groups.clone(),
                handler: handler.clone(),
            });
        }
        self.aspects.push(aspect.clone());
    }

    /// 命中的切面（按执行顺序）
    pub fn aspects(&self) -> &[Arc<AspectRule>] {
        &self.aspects
    }

    pub fn aspect_ids(&self) -> Vec<&str> {
        self.aspects.iter().map(|aspect| aspect.id()).collect()
    }

    pub fn before(&self) -> &[BoundAdvice] {
        &self.before
    }

    pub fn after(&self) -> &[BoundAdvice] {
        &self.after
    }

    pub fn finally(&self) -> &[BoundAdvice] {
        &self.finally
    }

    pub fn handlers(&self) -> &[BoundHandler] {
        &self.handlers
    }

    /// 没有命中任何切面
    pub fn is_empty(&self) -> bool {
        self.aspects.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub aspects: usize,
    pub cached_bundles: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
}

pub struct AdviceRuleRegistry {
    aspects: Vec<Arc<AspectRule>>,
    cache: DashMap<(JoinpointTarget, Joinpoint), Arc<AdviceBundle>>,
    cache_enabled: bool,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
}

impl AdviceRuleRegistry {
    /// 按 `order` 升序稳定排序；顺序相同或未指定时保持声明顺序
    pub fn new(aspects: Vec<Arc<AspectRule>>) -> Result<Self, RuleError> {
        let mut seen = HashSet::new();
        for aspect in &aspects {
            if !seen.insert(aspect.id().to_string()) {
                return Err(RuleError::DuplicateAspect(aspect.id().to_string()));
            }
        }

        let mut aspects = aspects;
        aspects.sort_by_key(|aspect| aspect.order_key());
        debug!("Advice registry built with {} aspect(s)", aspects.len());

        Ok(Self {
            aspects,
            cache: DashMap::new(),
            cache_enabled: true,
            cache_hits: AtomicUsize::new(0),
            cache_misses: AtomicUsize::new(0),
        })
    }

    /// 关闭缓存后每次调用都重新求值切点（用于排查规则）
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn aspects(&self) -> &[Arc<AspectRule>] {
        &self.aspects
    }

    /// 提供者方法连接点的通知集合
    pub fn bundle_for(&self, joinpoint: &Joinpoint) -> Arc<AdviceBundle> {
        self.cached(JoinpointTarget::Method, joinpoint)
    }

    /// 活动（整个工作单元）的通知集合，只按 container 匹配
    pub fn activity_bundle(&self, activity: &str) -> Arc<AdviceBundle> {
        self.cached(JoinpointTarget::Activity, &Joinpoint::activity(activity))
    }

    fn cached(&self, target: JoinpointTarget, joinpoint: &Joinpoint) -> Arc<AdviceBundle> {
        if !self.cache_enabled {
            return Arc::new(self.compute(target, joinpoint));
        }

        let key = (target, joinpoint.clone());
        if let Some(bundle) = self.cache.get(&key) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return bundle.clone();
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        // 并发计算同一连接点时保留先发布的那一份
        let bundle = Arc::new(self.compute(target, joinpoint));
        self.cache.entry(key).or_insert(bundle).clone()
    }

    fn compute(&self, target: JoinpointTarget, joinpoint: &Joinpoint) -> AdviceBundle {
        let mut bundle = AdviceBundle::default();
        for aspect in self
            .aspects
            .iter()
            .filter(|aspect| aspect.joinpoint_target() == target)
        {
            if let Some(groups) = aspect.pointcut_rule().evaluate(joinpoint) {
                bundle.push(aspect, groups);
            }
        }
        trace!(
            "Joinpoint {} resolved to aspects {:?}",
            joinpoint,
            bundle.aspect_ids()
        );
        bundle
    }

    pub fn len(&self) -> usize {
        self.aspects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aspects.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            aspects: self.aspects.len(),
            cached_bundles: self.cache.len(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}
