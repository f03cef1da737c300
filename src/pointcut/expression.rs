//! 切点的布尔测试表达式
//!
//! 表达式针对每次调用的数据上下文（`serde_json::Value`）求值。

use serde_json::Value;
use std::sync::Arc;

use crate::errors::BoxError;

pub trait TestExpression: Send + Sync {
    fn evaluate(&self, data: &Value) -> Result<bool, BoxError>;

    /// 用于日志输出
    fn describe(&self) -> String {
        "<expression>".to_string()
    }
}

impl<F> TestExpression for F
where
    F: Fn(&Value) -> Result<bool, BoxError> + Send + Sync,
{
    fn evaluate(&self, data: &Value) -> Result<bool, BoxError> {
        self(data)
    }
}

/// JSON Pointer 指向的值等于期望值
#[derive(Debug, Clone)]
pub struct FieldEquals {
    pointer: String,
    expected: Value,
}

impl FieldEquals {
    pub fn new(pointer: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self {
            pointer: pointer.into(),
            expected: expected.into(),
        }
    }
}

impl TestExpression for FieldEquals {
    fn evaluate(&self, data: &Value) -> Result<bool, BoxError> {
        Ok(data.pointer(&self.pointer) == Some(&self.expected))
    }

    fn describe(&self) -> String {
        format!("{} == {}", self.pointer, self.expected)
    }
}

/// JSON Pointer 指向的值存在且不为 null
#[derive(Debug, Clone)]
pub struct FieldExists {
    pointer: String,
}

impl FieldExists {
    pub fn new(pointer: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
        }
    }
}

impl TestExpression for FieldExists {
    fn evaluate(&self, data: &Value) -> Result<bool, BoxError> {
        Ok(data
            .pointer(&self.pointer)
            .is_some_and(|value| !value.is_null()))
    }

    fn describe(&self) -> String {
        format!("exists({})", self.pointer)
    }
}

pub struct Not(pub Arc<dyn TestExpression>);

impl TestExpression for Not {
    fn evaluate(&self, data: &Value) -> Result<bool, BoxError> {
        Ok(!self.0.evaluate(data)?)
    }

    fn describe(&self) -> String {
        format!("!({})", self.0.describe())
    }
}

pub struct AllOf(pub Vec<Arc<dyn TestExpression>>);

impl TestExpression for AllOf {
    fn evaluate(&self, data: &Value) -> Result<bool, BoxError> {
        for expression in &self.0 {
            if !expression.evaluate(data)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|e| e.describe()).collect();
        parts.join(" && ")
    }
}

pub struct AnyOf(pub Vec<Arc<dyn TestExpression>>);

impl TestExpression for AnyOf {
    fn evaluate(&self, data: &Value) -> Result<bool, BoxError> {
        for expression in &self.0 {
            if expression.evaluate(data)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|e| e.describe()).collect();
        parts.join(" || ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_equals() {
        let data = json!({"user": {"role": "admin"}});
        assert!(FieldEquals::new("/user/role", "admin").evaluate(&data).unwrap());
        assert!(!FieldEquals::new("/user/role", "guest").evaluate(&data).unwrap());
        assert!(!FieldEquals::new("/missing", "admin").evaluate(&data).unwrap());
    }

    #[test]
    fn test_field_exists() {
        let data = json!({"token": "abc", "empty": null});
        assert!(FieldExists::new("/token").evaluate(&data).unwrap());
        assert!(!FieldExists::new("/empty").evaluate(&data).unwrap());
        assert!(!FieldExists::new("/other").evaluate(&data).unwrap());
    }

    #[test]
    fn test_combinators() {
        let data = json!({"a": 1, "b": 2});
        let a: Arc<dyn TestExpression> = Arc::new(FieldEquals::new("/a", 1));
        let b: Arc<dyn TestExpression> = Arc::new(FieldEquals::new("/b", 3));

        assert!(!AllOf(vec![a.clone(), b.clone()]).evaluate(&data).unwrap());
        assert!(AnyOf(vec![a.clone(), b.clone()]).evaluate(&data).unwrap());
        assert!(Not(b.clone()).evaluate(&data).unwrap());
        assert_eq!(AllOf(vec![a, b]).describe(), "/a == 1 && /b == 3");
    }

    #[test]
    fn test_closure_expression() {
        let expression = |data: &Value| -> Result<bool, BoxError> {
            Ok(data.as_u64().ok_or("not a number")? > 10)
        };
        assert!(expression.evaluate(&json!(42)).unwrap());
        assert!(expression.evaluate(&json!("x")).is_err());
    }
}
