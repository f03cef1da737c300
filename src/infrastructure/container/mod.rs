//! 依赖注入容器
//!
//! 按声明的作用域解析并缓存受管实例：
//! - `rule`     提供者规则与工厂
//! - `scope`    作用域存储与作用域锁
//! - `context`  执行上下文与会话/应用持有者
//! - `resolver` 作用域解析器

pub mod context;
pub mod resolver;
pub mod rule;
pub mod scope;

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub use context::{ApplicationHolder, AttributeHolder, ExecutionContext, SessionHolder};
pub use resolver::{ContainerStats, ProviderResolver, ScopeResolver};
pub use rule::{ProviderFactory, ProviderRegistry, ProviderRule};
pub use scope::{DestroyReport, ManagedInstance, ScopeStore};

/// 受管实例（类型擦除）
pub type Instance = Arc<dyn Any + Send + Sync>;

/// 作用域种类，规则加载后不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    /// 整个进程只构造一次
    Singleton,
    /// 每次解析都构造新实例，从不存储
    Prototype,
    /// 在一个执行上下文（请求）内共享
    Request,
    /// 在一个会话持有者内共享
    Session,
    /// 在应用持有者内共享
    Application,
    /// 进程级，但不是单例
    Context,
}

impl ScopeKind {
    pub const ALL: [ScopeKind; 6] = [
        ScopeKind::Singleton,
        ScopeKind::Prototype,
        ScopeKind::Request,
        ScopeKind::Session,
        ScopeKind::Application,
        ScopeKind::Context,
    ];

    /// 作用域锁数组中的下标；原型作用域不加锁
    pub(crate) fn lock_index(self) -> Option<usize> {
        match self {
            ScopeKind::Singleton => Some(0),
            ScopeKind::Request => Some(1),
            ScopeKind::Session => Some(2),
            ScopeKind::Application => Some(3),
            ScopeKind::Context => Some(4),
            ScopeKind::Prototype => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScopeKind::Singleton => "singleton",
            ScopeKind::Prototype => "prototype",
            ScopeKind::Request => "request",
            ScopeKind::Session => "session",
            ScopeKind::Application => "application",
            ScopeKind::Context => "context",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
