//! 拦截分发
//!
//! 每次调用按以下状态机执行：
//!
//! ```text
//! ENTER      豁免操作直接调用
//! RESOLVE    取通知集合；为空时直接调用
//! BEFORE     依次执行；出错则跳过 CALL 与 AFTER，故障带入 FINALLY
//! CALL       仅在 BEFORE 成功后调用真实操作
//! AFTER      仅在 CALL 成功后执行；出错则覆盖结果
//! FINALLY    总是执行；后出现的故障覆盖先前的故障
//! EXCEPTION  第一个类型匹配的处理器可用替代值恢复或重新抛出；无匹配时原样返回
//! ```

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::registry::{AdviceBundle, AdviceRuleRegistry, BoundAdvice};
use super::rule::{AdviceContext, HandlerOutcome};
use super::AdvicePhase;
use crate::errors::{AdviceError, BoxError, ContainerError};
use crate::infrastructure::container::{ExecutionContext, Instance};
use crate::pointcut::{Joinpoint, PointcutMatch};
use crate::runtime::Runtime;

/// 被拦截对象与拦截代理共同实现的能力接口
pub trait Operations: Send + Sync {
    fn invoke(&self, operation: &str, args: &[Value]) -> Result<Value, BoxError>;
}

impl<T: Operations + ?Sized> Operations for Arc<T> {
    fn invoke(&self, operation: &str, args: &[Value]) -> Result<Value, BoxError> {
        (**self).invoke(operation, args)
    }
}

type AdviceBeanSource<'a> = dyn Fn(&str) -> Result<Instance, ContainerError> + 'a;

fn no_advice_beans(provider_id: &str) -> Result<Instance, ContainerError> {
    Err(ContainerError::ProviderNotFound {
        provider_id: provider_id.to_string(),
    })
}

/// 本次调用中实际参与的切面（测试表达式为真）
struct Participant<'b> {
    aspect_id: &'b str,
    bean: Option<Instance>,
}

struct Call<'c> {
    joinpoint: &'c Joinpoint,
    args: &'c [Value],
    participants: Vec<Participant<'c>>,
}

impl<'c> Call<'c> {
    fn participant(&self, aspect_id: &str) -> Option<&Participant<'c>> {
        self.participants.iter().find(|p| p.aspect_id == aspect_id)
    }
}

fn advice_fault(aspect_id: &str, phase: AdvicePhase, source: BoxError) -> BoxError {
    Box::new(AdviceError::ExecutionFailed {
        aspect_id: aspect_id.to_string(),
        phase,
        source,
    })
}

pub struct Dispatcher<'a> {
    registry: &'a AdviceRuleRegistry,
    exempt: &'a [String],
    context: Option<&'a ExecutionContext>,
    beans: &'a AdviceBeanSource<'a>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(registry: &'a AdviceRuleRegistry, exempt: &'a [String]) -> Self {
        Self {
            registry,
            exempt,
            context: None,
            beans: &no_advice_beans,
        }
    }

    pub fn with_context(mut self, context: Option<&'a ExecutionContext>) -> Self {
        self.context = context;
        self
    }

    /// 用于解析切面声明的通知提供者
    pub fn with_advice_beans(mut self, beans: &'a AdviceBeanSource<'a>) -> Self {
        self.beans = beans;
        self
    }

    /// 拦截一次提供者方法调用
    pub fn dispatch<F>(&self, joinpoint: &Joinpoint, args: &[Value], call: F) -> Result<Value, BoxError>
    where
        F: FnOnce() -> Result<Value, BoxError>,
    {
        // ENTER
        if let Some(operation) = joinpoint.operation.as_deref() {
            if self.exempt.iter().any(|exempt| exempt == operation) {
                trace!("Operation '{}' is exempt from interception", operation);
                return call();
            }
        }

        // RESOLVE
        let bundle = self.registry.bundle_for(joinpoint);
        self.execute(joinpoint, &bundle, args, call)
    }

    /// 拦截整个工作单元
    pub fn run_activity<F>(&self, activity: &str, args: &[Value], work: F) -> Result<Value, BoxError>
    where
        F: FnOnce() -> Result<Value, BoxError>,
    {
        let joinpoint = Joinpoint::activity(activity);
        let bundle = self.registry.activity_bundle(activity);
        self.execute(&joinpoint, &bundle, args, work)
    }

    fn execute<F>(
        &self,
        joinpoint: &Joinpoint,
        bundle: &AdviceBundle,
        args: &[Value],
        call: F,
    ) -> Result<Value, BoxError>
    where
        F: FnOnce() -> Result<Value, BoxError>,
    {
        if bundle.is_empty() {
            return call();
        }

        let (participants, pending) = self.participants(bundle);
        if participants.is_empty() {
            return call();
        }
        let call_state = Call {
            joinpoint,
            args,
            participants,
        };

        let mut outcome = match pending {
            Some(fault) => Err(fault),
            None => match self.run_advice(&call_state, bundle.before(), AdvicePhase::Before, None) {
                // CALL
                Ok(()) => call(),
                Err(fault) => Err(fault),
            },
        };

        // AFTER
        if let Ok(value) = &outcome {
            if let Err(fault) = self.run_advice(&call_state, bundle.after(), AdvicePhase::After, Some(value)) {
                outcome = Err(fault);
            }
        }

        // FINALLY
        for advice in bundle.finally() {
            let Some(participant) = call_state.participant(advice.aspect.id()) else {
                continue;
            };
            let context = self.advice_context(
                &call_state,
                advice.aspect.id(),
                &advice.groups,
                participant,
                AdvicePhase::Finally,
                outcome.as_ref().ok(),
                outcome.as_ref().err().map(|fault| &**fault),
            );
            if let Err(source) = advice.action.execute(&context) {
                warn!(
                    "Finally advice of aspect '{}' failed at {}: {}",
                    advice.aspect.id(),
                    joinpoint,
                    source
                );
                outcome = Err(advice_fault(advice.aspect.id(), AdvicePhase::Finally, source));
            }
        }

        // EXCEPTION
        match outcome {
            Ok(value) => Ok(value),
            Err(fault) => self.handle_fault(&call_state, bundle, fault),
        }
    }

    /// 按本次调用的数据上下文过滤切面，并解析通知提供者
    fn participants<'b>(&self, bundle: &'b AdviceBundle) -> (Vec<Participant<'b>>, Option<BoxError>) {
        let data = self
            .context
            .map(ExecutionContext::data)
            .unwrap_or(&super::rule::NO_DATA);
        let mut participants = Vec::with_capacity(bundle.aspects().len());
        let mut pending = None;

        for aspect in bundle.aspects() {
            match aspect.pointcut_rule().test(data) {
                Ok(true) => {}
                Ok(false) => {
                    trace!("Aspect '{}' skipped by test expression", aspect.id());
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Test expression of aspect '{}' failed, skipping aspect: {}",
                        aspect.id(),
                        e
                    );
                    continue;
                }
            }

            let bean = match aspect.advice_provider_id() {
                Some(provider_id) if pending.is_none() => match (self.beans)(provider_id) {
                    Ok(bean) => Some(bean),
                    Err(source) => {
                        pending = Some(Box::new(AdviceError::AdviceProviderUnavailable {
                            aspect_id: aspect.id().to_string(),
                            provider_id: provider_id.to_string(),
                            source,
                        }) as BoxError);
                        None
                    }
                },
                _ => None,
            };
            participants.push(Participant {
                aspect_id: aspect.id(),
                bean,
            });
        }
        (participants, pending)
    }

    fn run_advice(
        &self,
        call: &Call<'_>,
        advices: &[BoundAdvice],
        phase: AdvicePhase,
        result: Option<&Value>,
    ) -> Result<(), BoxError> {
        for advice in advices {
            let Some(participant) = call.participant(advice.aspect.id()) else {
                continue;
            };
            let context = self.advice_context(
                call,
                advice.aspect.id(),
                &advice.groups,
                participant,
                phase,
                result,
                None,
            );
            advice.action.execute(&context).map_err(|source| {
                debug!(
                    "{} advice of aspect '{}' failed at {}: {}",
                    phase,
                    advice.aspect.id(),
                    call.joinpoint,
                    source
                );
                advice_fault(advice.aspect.id(), phase, source)
            })?;
        }
        Ok(())
    }

    fn handle_fault(&self, call: &Call<'_>, bundle: &AdviceBundle, fault: BoxError) -> Result<Value, BoxError> {
        for bound in bundle.handlers() {
            let Some(participant) = call.participant(bound.aspect.id()) else {
                continue;
            };
            if !bound.handler.fault_type.matches(&*fault) {
                continue;
            }

            let context = self.advice_context(
                call,
                bound.aspect.id(),
                &bound.groups,
                participant,
                AdvicePhase::Exception,
                None,
                Some(&*fault),
            );
            return match (bound.handler.action)(&context) {
                Ok(HandlerOutcome::Recover(value)) => {
                    debug!(
                        "Fault at {} recovered by aspect '{}': {}",
                        call.joinpoint,
                        bound.aspect.id(),
                        fault
                    );
                    Ok(value)
                }
                Ok(HandlerOutcome::Rethrow) => Err(fault),
                Err(source) => Err(advice_fault(bound.aspect.id(), AdvicePhase::Exception, source)),
            };
        }
        Err(fault)
    }

    #[allow(clippy::too_many_arguments)]
    fn advice_context<'c>(
        &'c self,
        call: &'c Call<'_>,
        aspect_id: &'c str,
        groups: &'c PointcutMatch,
        participant: &'c Participant<'_>,
        phase: AdvicePhase,
        result: Option<&'c Value>,
        fault: Option<&'c (dyn std::error::Error + Send + Sync + 'static)>,
    ) -> AdviceContext<'c> {
        AdviceContext {
            aspect_id,
            phase,
            joinpoint: call.joinpoint,
            groups,
            args: call.args,
            result,
            fault,
            execution: self.context,
            advice_bean: participant.bean.as_ref(),
        }
    }
}

/// 拦截代理：实现与目标相同的 [`Operations`]，每次调用经过分发状态机
pub struct Intercepted<T: ?Sized> {
    provider_id: String,
    provider_class: String,
    target: Arc<T>,
    runtime: Arc<Runtime>,
    context: Option<Arc<ExecutionContext>>,
}

impl<T: ?Sized> Intercepted<T> {
    pub(crate) fn new(runtime: Arc<Runtime>, provider_id: &str, provider_class: &str, target: Arc<T>) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            provider_class: provider_class.to_string(),
            target,
            runtime,
            context: None,
        }
    }

    /// 绑定执行上下文；活动名作为连接点的 container
    pub fn with_context(mut self, context: Arc<ExecutionContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }
}

impl<T: Operations + ?Sized> Operations for Intercepted<T> {
    fn invoke(&self, operation: &str, args: &[Value]) -> Result<Value, BoxError> {
        let context = self.context.as_deref();
        let joinpoint = Joinpoint::operation(&self.provider_id, &self.provider_class, operation)
            .with_container(context.and_then(ExecutionContext::activity));
        self.runtime
            .dispatch(&joinpoint, args, context, || self.target.invoke(operation, args))
    }
}
