use std::sync::Arc;
use thiserror::Error;

use crate::aspect::AdvicePhase;
use crate::infrastructure::container::ScopeKind;

/// 装箱后的任意错误，作为业务操作与通知动作的统一故障类型
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 可在多处共享的错误（单例构造失败会被记住并重复返回）
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("No provider registered with id '{provider_id}'")]
    ProviderNotFound { provider_id: String },

    #[error("{scope} scope is not available for provider '{provider_id}'")]
    ScopeUnavailable {
        scope: ScopeKind,
        provider_id: String,
    },

    #[error("Failed to construct provider '{provider_id}': {source}")]
    ConstructionFailed {
        provider_id: String,
        #[source]
        source: SharedError,
    },

    #[error("Failed to destroy provider '{provider_id}': {source}")]
    DestructionFailed {
        provider_id: String,
        #[source]
        source: SharedError,
    },

    #[error("Circular dependency detected: {}", .chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    #[error("Type cast failed for provider '{provider_id}': expected '{expected_type}'")]
    TypeCastFailed {
        provider_id: String,
        expected_type: &'static str,
    },

    #[error("Provider id '{0}' is declared more than once")]
    DuplicateProvider(String),
}

impl ContainerError {
    pub(crate) fn construction(provider_id: &str, source: impl Into<BoxError>) -> Self {
        ContainerError::ConstructionFailed {
            provider_id: provider_id.to_string(),
            source: Arc::from(source.into()),
        }
    }

    pub(crate) fn destruction(provider_id: &str, source: BoxError) -> Self {
        ContainerError::DestructionFailed {
            provider_id: provider_id.to_string(),
            source: Arc::from(source),
        }
    }
}

/// 通知动作自身抛出的故障，与业务故障一样进入 FINALLY/EXCEPTION 流程
#[derive(Debug, Error)]
pub enum AdviceError {
    #[error("{phase} advice of aspect '{aspect_id}' failed: {source}")]
    ExecutionFailed {
        aspect_id: String,
        phase: AdvicePhase,
        #[source]
        source: BoxError,
    },

    #[error("Advice provider '{provider_id}' of aspect '{aspect_id}' could not be resolved: {source}")]
    AdviceProviderUnavailable {
        aspect_id: String,
        provider_id: String,
        #[source]
        source: ContainerError,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("Pattern '{0}' ends with a dangling escape character")]
    DanglingEscape(String),
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Aspect id '{0}' is declared more than once")]
    DuplicateAspect(String),
    #[error("Invalid pattern in aspect '{aspect_id}': {source}")]
    InvalidPattern {
        aspect_id: String,
        #[source]
        source: PatternError,
    },
    #[error(transparent)]
    Container(#[from] ContainerError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file '{0}': {1}")]
    FileRead(String, #[source] std::io::Error),
    #[error("Failed to parse TOML from file '{0}': {1}")]
    TomlParse(String, #[source] toml::de::Error),
    #[error("Invalid value '{value}' for '{field}'")]
    InvalidValue { field: String, value: String },
    #[error("Other Config Error: {0}")]
    Other(String),
}

/// 沿 `source()` 链遍历错误；共享错误（`Arc`）节点会被展开为其内部错误
pub fn error_chain<'a>(
    error: &'a (dyn std::error::Error + 'static),
) -> impl Iterator<Item = &'a (dyn std::error::Error + 'static)> {
    std::iter::successors(Some(unwrap_shared(error)), |current| {
        current.source().map(unwrap_shared)
    })
}

fn unwrap_shared<'a>(
    error: &'a (dyn std::error::Error + 'static),
) -> &'a (dyn std::error::Error + 'static) {
    match error.downcast_ref::<SharedError>() {
        Some(shared) => shared.as_ref(),
        None => error,
    }
}

/// 构造一个简单的字符串故障，便于测试和适配层使用
pub fn fault(message: impl Into<String>) -> BoxError {
    message.into().into()
}
