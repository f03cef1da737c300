//! 切面：通知规则、通知缓存与拦截分发
//!
//! - `rule`       切面规则、通知动作与异常处理器
//! - `registry`   按连接点缓存的通知集合
//! - `dispatcher` 拦截调用的分阶段状态机

pub mod dispatcher;
pub mod registry;
pub mod rule;

use serde::Serialize;
use std::fmt;

pub use dispatcher::{Dispatcher, Intercepted, Operations};
pub use registry::{AdviceBundle, AdviceRuleRegistry, BoundAdvice, BoundHandler, RegistryStats};
pub use rule::{
    AdviceAction, AdviceContext, AdviceKind, AdviceRule, AspectRule, ExceptionHandler, FaultType,
    HandlerOutcome, JoinpointTarget,
};

/// 分发状态机中执行通知的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvicePhase {
    Before,
    After,
    Finally,
    Exception,
}

impl fmt::Display for AdvicePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdvicePhase::Before => "before",
            AdvicePhase::After => "after",
            AdvicePhase::Finally => "finally",
            AdvicePhase::Exception => "exception",
        };
        f.write_str(name)
    }
}
