//! aspectcore
//!
//! 作用域化的依赖注入容器与方法拦截运行时：
//! - `wildcard`       通配符模式编译与分组匹配
//! - `pointcut`       连接点与切点规则
//! - `infrastructure` 提供者规则、作用域存储与解析器
//! - `aspect`         切面规则、通知注册表与拦截分发
//! - `runtime`        规则集激活、解析、拦截与重置

pub mod aspect;
pub mod config;
pub mod errors;
pub mod infrastructure;
pub mod logging;
pub mod pointcut;
pub mod runtime;
pub mod wildcard;

// Re-export commonly used items for convenience
pub use aspect::{AspectRule, Intercepted, Operations};
pub use config::RuntimeConfig;
pub use errors::{AdviceError, BoxError, ContainerError, RuleError};
pub use infrastructure::container::{ExecutionContext, Instance, ProviderRule, ScopeKind};
pub use pointcut::{Joinpoint, PointcutPattern, PointcutRule};
pub use runtime::{ResetOptions, RuleSet, Runtime};
pub use wildcard::WildcardPattern;
