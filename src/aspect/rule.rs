//! 切面规则
//!
//! 一个切面由切点、按声明顺序排列的通知、异常处理器以及可选的通知提供者组成。

use serde_json::Value;
use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use super::AdvicePhase;
use crate::errors::{error_chain, BoxError, RuleError};
use crate::infrastructure::container::{ExecutionContext, Instance};
use crate::pointcut::{Joinpoint, PointcutMatch, PointcutPattern, PointcutRule, TestExpression};

/// 没有执行上下文时的数据上下文
pub(crate) static NO_DATA: Value = Value::Null;

/// 通知动作执行时可见的信息
pub struct AdviceContext<'a> {
    pub aspect_id: &'a str,
    pub phase: AdvicePhase,
    pub joinpoint: &'a Joinpoint,
    /// 命中的 include 模式捕获到的通配符分组
    pub groups: &'a PointcutMatch,
    pub args: &'a [Value],
    /// AFTER 阶段为真实调用的结果；FINALLY 阶段在没有故障时也可见
    pub result: Option<&'a Value>,
    /// FINALLY / EXCEPTION 阶段当前未决的故障
    pub fault: Option<&'a (dyn Error + Send + Sync + 'static)>,
    pub execution: Option<&'a ExecutionContext>,
    pub(crate) advice_bean: Option<&'a Instance>,
}

impl<'a> AdviceContext<'a> {
    /// 切面声明的通知提供者实例
    pub fn advice_bean<T: Any + Send + Sync>(&self) -> Option<&'a T> {
        self.advice_bean.and_then(|bean| bean.downcast_ref::<T>())
    }

    /// 测试表达式使用的同一份数据上下文
    pub fn data(&self) -> &'a Value {
        self.execution.map(ExecutionContext::data).unwrap_or(&NO_DATA)
    }
}

pub trait AdviceAction: Send + Sync {
    fn execute(&self, context: &AdviceContext<'_>) -> Result<(), BoxError>;
}

impl<F> AdviceAction for F
where
    F: Fn(&AdviceContext<'_>) -> Result<(), BoxError> + Send + Sync,
{
    fn execute(&self, context: &AdviceContext<'_>) -> Result<(), BoxError> {
        self(context)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdviceKind {
    Before,
    After,
    /// 同时出现在 before 与 after 列表中
    Around,
    Finally,
}

#[derive(Clone)]
pub struct AdviceRule {
    pub kind: AdviceKind,
    pub action: Arc<dyn AdviceAction>,
}

impl fmt::Debug for AdviceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdviceRule").field("kind", &self.kind).finish()
    }
}

fn is_fault_of<E: Error + 'static>(fault: &(dyn Error + 'static)) -> bool {
    fault.is::<E>()
}

fn any_fault(_: &(dyn Error + 'static)) -> bool {
    true
}

/// 异常处理器声明的故障类型；按 `source()` 链逐个向下转型匹配
#[derive(Clone, Copy)]
pub struct FaultType {
    name: &'static str,
    matcher: fn(&(dyn Error + 'static)) -> bool,
}

impl FaultType {
    pub fn of<E: Error + 'static>() -> Self {
        Self {
            name: std::any::type_name::<E>(),
            matcher: is_fault_of::<E>,
        }
    }

    pub fn any() -> Self {
        Self {
            name: "*",
            matcher: any_fault,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn matches(&self, fault: &(dyn Error + 'static)) -> bool {
        error_chain(fault).any(|cause| (self.matcher)(cause))
    }
}

impl fmt::Debug for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// 异常处理器的处置结果
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// 吞掉故障，以替代值作为调用结果
    Recover(Value),
    /// 原样抛出原故障
    Rethrow,
}

pub type HandlerAction =
    Arc<dyn Fn(&AdviceContext<'_>) -> Result<HandlerOutcome, BoxError> + Send + Sync>;

#[derive(Clone)]
pub struct ExceptionHandler {
    pub fault_type: FaultType,
    pub action: HandlerAction,
}

impl fmt::Debug for ExceptionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionHandler")
            .field("fault_type", &self.fault_type)
            .finish()
    }
}

/// 切面作用的连接点种类
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum JoinpointTarget {
    /// 提供者方法调用
    #[default]
    Method,
    /// 整个工作单元，只按 container（活动名）匹配
    Activity,
}

#[derive(Debug, Clone)]
pub struct AspectRule {
    id: String,
    order: Option<i32>,
    target: JoinpointTarget,
    pointcut: PointcutRule,
    advices: Vec<AdviceRule>,
    handlers: Vec<ExceptionHandler>,
    advice_provider: Option<String>,
}

impl AspectRule {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            order: None,
            target: JoinpointTarget::Method,
            pointcut: PointcutRule::default(),
            advices: Vec::new(),
            handlers: Vec::new(),
            advice_provider: None,
        }
    }

    /// 数值越小越先执行；未指定时排在所有指定了顺序的切面之后
    pub fn order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn target(mut self, target: JoinpointTarget) -> Self {
        self.target = target;
        self
    }

    pub fn pointcut(mut self, pointcut: PointcutRule) -> Self {
        self.pointcut = pointcut;
        self
    }

    /// 编译并追加一个 include 三元组
    pub fn include(
        mut self,
        container: Option<&str>,
        provider: Option<&str>,
        operation: Option<&str>,
    ) -> Result<Self, RuleError> {
        let pattern = self.compile(container, provider, operation)?;
        self.pointcut = self.pointcut.include(pattern);
        Ok(self)
    }

    /// 编译并追加一个 exclude 三元组
    pub fn exclude(
        mut self,
        container: Option<&str>,
        provider: Option<&str>,
        operation: Option<&str>,
    ) -> Result<Self, RuleError> {
        let pattern = self.compile(container, provider, operation)?;
        self.pointcut = self.pointcut.exclude(pattern);
        Ok(self)
    }

    fn compile(
        &self,
        container: Option<&str>,
        provider: Option<&str>,
        operation: Option<&str>,
    ) -> Result<PointcutPattern, RuleError> {
        PointcutPattern::new(container, provider, operation).map_err(|source| {
            RuleError::InvalidPattern {
                aspect_id: self.id.clone(),
                source,
            }
        })
    }

    pub fn when(mut self, expression: impl TestExpression + 'static) -> Self {
        self.pointcut = self.pointcut.with_test(expression);
        self
    }

    /// 追加一个已实现 [`AdviceAction`] 的通知
    pub fn advice(mut self, kind: AdviceKind, action: Arc<dyn AdviceAction>) -> Self {
        self.advices.push(AdviceRule { kind, action });
        self
    }

    pub fn before<F>(self, action: F) -> Self
    where
        F: Fn(&AdviceContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.advice(AdviceKind::Before, Arc::new(action))
    }

    pub fn after<F>(self, action: F) -> Self
    where
        F: Fn(&AdviceContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.advice(AdviceKind::After, Arc::new(action))
    }

    pub fn around<F>(self, action: F) -> Self
    where
        F: Fn(&AdviceContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.advice(AdviceKind::Around, Arc::new(action))
    }

    pub fn finally<F>(self, action: F) -> Self
    where
        F: Fn(&AdviceContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.advice(AdviceKind::Finally, Arc::new(action))
    }

    /// 处理类型为 `E`（或 `source()` 链中含有 `E`）的故障
    pub fn on_fault<E, F>(mut self, action: F) -> Self
    where
        E: Error + 'static,
        F: Fn(&AdviceContext<'_>) -> Result<HandlerOutcome, BoxError> + Send + Sync + 'static,
    {
        self.handlers.push(ExceptionHandler {
            fault_type: FaultType::of::<E>(),
            action: Arc::new(action),
        });
        self
    }

    pub fn on_any_fault<F>(mut self, action: F) -> Self
    where
        F: Fn(&AdviceContext<'_>) -> Result<HandlerOutcome, BoxError> + Send + Sync + 'static,
    {
        self.handlers.push(ExceptionHandler {
            fault_type: FaultType::any(),
            action: Arc::new(action),
        });
        self
    }

    /// 通知动作可通过 [`AdviceContext::advice_bean`] 取得的提供者
    pub fn advice_provider(mut self, provider_id: &str) -> Self {
        self.advice_provider = Some(provider_id.to_string());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn order_key(&self) -> i32 {
        self.order.unwrap_or(i32::MAX)
    }

    pub fn joinpoint_target(&self) -> JoinpointTarget {
        self.target
    }

    pub fn pointcut_rule(&self) -> &PointcutRule {
        &self.pointcut
    }

    pub fn advices(&self) -> &[AdviceRule] {
        &self.advices
    }

    pub fn handlers(&self) -> &[ExceptionHandler] {
        &self.handlers
    }

    pub fn advice_provider_id(&self) -> Option<&str> {
        self.advice_provider.as_deref()
    }
}
