//! 基础设施层
//!
//! 提供依赖注入容器：提供者规则、作用域存储与作用域解析。

pub mod container;

pub use container::{ContainerStats, ExecutionContext, Instance, ProviderRule, ScopeKind};
