//! 切点求值
//!
//! 目标三元组 (container, provider, operation) 命中切点的条件：
//! 1. 至少一个 include 模式逐字段匹配；
//! 2. 没有任何 exclude 模式匹配（exclude 总是优先）；
//! 3. 若附带测试表达式，则表达式在本次调用的数据上下文中为真。

mod expression;

pub use expression::{AllOf, AnyOf, FieldEquals, FieldExists, Not, TestExpression};

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::errors::{BoxError, PatternError};
use crate::wildcard::WildcardPattern;

/// 容器名（活动/请求名）的分隔符
pub const CONTAINER_SEPARATOR: &str = "/";
/// 提供者 id 的分隔符
pub const PROVIDER_SEPARATOR: &str = ".";
/// 提供者模式前缀，带此前缀时按类名而非 id 匹配
pub const CLASS_PATTERN_PREFIX: &str = "class:";

/// 一个具体的连接点
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Joinpoint {
    pub container: Option<String>,
    pub provider_id: Option<String>,
    pub provider_class: Option<String>,
    pub operation: Option<String>,
}

impl Joinpoint {
    /// 提供者方法连接点
    pub fn operation(provider_id: &str, provider_class: &str, operation: &str) -> Self {
        Self {
            container: None,
            provider_id: Some(provider_id.to_string()),
            provider_class: Some(provider_class.to_string()),
            operation: Some(operation.to_string()),
        }
    }

    /// 整个工作单元（活动）的连接点
    pub fn activity(name: &str) -> Self {
        Self {
            container: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn with_container(mut self, container: Option<&str>) -> Self {
        self.container = container.map(str::to_string);
        self
    }
}

impl fmt::Display for Joinpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}^{}",
            self.container.as_deref().unwrap_or("*"),
            self.provider_id.as_deref().unwrap_or("*"),
            self.operation.as_deref().unwrap_or("*"),
        )
    }
}

#[derive(Debug, Clone)]
enum FieldPattern {
    /// 整个字段只有 `*` 或 `**`：匹配任意值，跨越分隔符
    Any(Option<&'static str>),
    Exact(String, Option<&'static str>),
    Wildcard(WildcardPattern),
}

impl FieldPattern {
    fn compile(pattern: &str, separator: Option<&'static str>) -> Result<Self, PatternError> {
        if matches!(pattern, "*" | "**") {
            return Ok(FieldPattern::Any(separator));
        }
        if !WildcardPattern::has_wildcards(pattern) {
            return Ok(FieldPattern::Exact(pattern.to_string(), separator));
        }
        let compiled = match separator {
            Some(sep) => WildcardPattern::with_separator(pattern, sep)?,
            None => WildcardPattern::compile(pattern)?,
        };
        Ok(FieldPattern::Wildcard(compiled))
    }

    fn captures(&self, candidate: &str) -> Option<Vec<String>> {
        match self {
            FieldPattern::Any(separator) => Some(split_groups(candidate, *separator)),
            FieldPattern::Exact(expected, separator) => {
                (expected == candidate).then(|| split_groups(candidate, *separator))
            }
            FieldPattern::Wildcard(pattern) => pattern
                .captures(candidate)
                .map(|m| m.groups().map(str::to_string).collect()),
        }
    }
}

/// 非通配的命中值按分隔符切分，与通配匹配的分组口径一致
fn split_groups(candidate: &str, separator: Option<&str>) -> Vec<String> {
    match separator {
        Some(sep) => candidate.split(sep).map(str::to_string).collect(),
        None => vec![candidate.to_string()],
    }
}

#[derive(Debug, Clone)]
enum ProviderPattern {
    Id(FieldPattern),
    Class(FieldPattern),
}

/// 一个 include 或 exclude 模式三元组；`None` 字段以及单独的 `*`/`**` 字段匹配任意值
#[derive(Debug, Clone, Default)]
pub struct PointcutPattern {
    container: Option<FieldPattern>,
    provider: Option<ProviderPattern>,
    operation: Option<FieldPattern>,
}

/// 各字段捕获到的通配符分组
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointcutMatch {
    pub container: Vec<String>,
    pub provider: Vec<String>,
    pub operation: Vec<String>,
}

impl PointcutPattern {
    pub fn new(
        container: Option<&str>,
        provider: Option<&str>,
        operation: Option<&str>,
    ) -> Result<Self, PatternError> {
        let container = container
            .map(|p| FieldPattern::compile(p, Some(CONTAINER_SEPARATOR)))
            .transpose()?;
        let provider = provider
            .map(|p| match p.strip_prefix(CLASS_PATTERN_PREFIX) {
                Some(class) => FieldPattern::compile(class, Some(PROVIDER_SEPARATOR))
                    .map(ProviderPattern::Class),
                None => FieldPattern::compile(p, Some(PROVIDER_SEPARATOR)).map(ProviderPattern::Id),
            })
            .transpose()?;
        let operation = operation
            .map(|p| FieldPattern::compile(p, None))
            .transpose()?;
        Ok(Self {
            container,
            provider,
            operation,
        })
    }

    /// 仅匹配提供者
    pub fn provider(pattern: &str) -> Result<Self, PatternError> {
        Self::new(None, Some(pattern), None)
    }

    /// 仅匹配操作名
    pub fn operation(pattern: &str) -> Result<Self, PatternError> {
        Self::new(None, None, Some(pattern))
    }

    /// 逐字段匹配；缺省的候选字段按空串处理
    pub fn captures(&self, joinpoint: &Joinpoint) -> Option<PointcutMatch> {
        let mut matched = PointcutMatch::default();

        if let Some(pattern) = &self.container {
            matched.container = pattern.captures(joinpoint.container.as_deref().unwrap_or(""))?;
        }
        if let Some(pattern) = &self.provider {
            matched.provider = match pattern {
                ProviderPattern::Id(p) => p.captures(joinpoint.provider_id.as_deref().unwrap_or(""))?,
                ProviderPattern::Class(p) => {
                    p.captures(joinpoint.provider_class.as_deref().unwrap_or(""))?
                }
            };
        }
        if let Some(pattern) = &self.operation {
            matched.operation = pattern.captures(joinpoint.operation.as_deref().unwrap_or(""))?;
        }
        Some(matched)
    }

    pub fn matches(&self, joinpoint: &Joinpoint) -> bool {
        self.captures(joinpoint).is_some()
    }
}

/// 切点规则
#[derive(Clone, Default)]
pub struct PointcutRule {
    includes: Vec<PointcutPattern>,
    excludes: Vec<PointcutPattern>,
    test: Option<Arc<dyn TestExpression>>,
}

impl fmt::Debug for PointcutRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointcutRule")
            .field("includes", &self.includes)
            .field("excludes", &self.excludes)
            .field("test", &self.test.as_ref().map(|t| t.describe()))
            .finish()
    }
}

impl PointcutRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, pattern: PointcutPattern) -> Self {
        self.includes.push(pattern);
        self
    }

    pub fn exclude(mut self, pattern: PointcutPattern) -> Self {
        self.excludes.push(pattern);
        self
    }

    pub fn with_test(mut self, expression: impl TestExpression + 'static) -> Self {
        self.test = Some(Arc::new(expression));
        self
    }

    pub fn has_test(&self) -> bool {
        self.test.is_some()
    }

    /// 只做模式部分的判定（include/exclude），结果可按连接点缓存
    pub fn evaluate(&self, joinpoint: &Joinpoint) -> Option<PointcutMatch> {
        if self.excludes.iter().any(|p| p.matches(joinpoint)) {
            trace!("Joinpoint {} rejected by exclude pattern", joinpoint);
            return None;
        }
        if self.includes.is_empty() {
            return Some(PointcutMatch::default());
        }
        self.includes.iter().find_map(|p| p.captures(joinpoint))
    }

    /// 测试表达式部分，每次调用单独求值；没有表达式时恒为真
    pub fn test(&self, data: &Value) -> Result<bool, BoxError> {
        match &self.test {
            Some(expression) => expression.evaluate(data),
            None => Ok(true),
        }
    }

    /// 完整判定
    pub fn matches(&self, joinpoint: &Joinpoint, data: &Value) -> Result<Option<PointcutMatch>, BoxError> {
        match self.evaluate(joinpoint) {
            Some(matched) if self.test(data)? => Ok(Some(matched)),
            _ => Ok(None),
        }
    }
}
