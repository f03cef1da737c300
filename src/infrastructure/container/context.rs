//! 执行上下文与生命周期持有者
//!
//! 宿主适配层为每个工作单元创建一个 [`ExecutionContext`]。会话与应用持有者
//! 只需实现 [`AttributeHolder`]，作用域存储本身作为属性挂在持有者上。

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::scope::ScopeStore;
use super::{Instance, ScopeKind};

/// 持有作用域存储的属性名前缀
const SCOPE_ATTRIBUTE_PREFIX: &str = "aspectcore.scope.";

/// 通用属性读写，由宿主的会话/应用对象实现
pub trait AttributeHolder: Send + Sync {
    fn get_attribute(&self, name: &str) -> Option<Instance>;
    fn set_attribute(&self, name: &str, value: Instance);
    fn remove_attribute(&self, name: &str) -> Option<Instance>;
}

fn scope_attribute(kind: ScopeKind) -> String {
    format!("{}{}", SCOPE_ATTRIBUTE_PREFIX, kind)
}

/// 持有者上已挂载的作用域存储；同名属性不是存储时视为没有
pub(crate) fn find_store(holder: &dyn AttributeHolder, kind: ScopeKind) -> Option<Arc<ScopeStore>> {
    holder
        .get_attribute(&scope_attribute(kind))
        .and_then(|value| value.downcast::<ScopeStore>().ok())
}

/// 把存储挂到持有者上，替换原有的同类存储。调用方需持有该作用域的锁
pub(crate) fn attach_store(holder: &dyn AttributeHolder, store: Arc<ScopeStore>) {
    holder.set_attribute(&scope_attribute(store.kind()), store);
}

/// 从持有者上摘下作用域存储
pub(crate) fn detach_store(holder: &dyn AttributeHolder, kind: ScopeKind) -> Option<Arc<ScopeStore>> {
    holder
        .remove_attribute(&scope_attribute(kind))
        .and_then(|value| value.downcast::<ScopeStore>().ok())
}

/// 会话持有者
pub struct SessionHolder {
    id: Uuid,
    created_at: DateTime<Utc>,
    attributes: DashMap<String, Instance>,
}

impl SessionHolder {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            attributes: DashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Default for SessionHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHolder")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("attributes", &self.attributes.len())
            .finish()
    }
}

impl AttributeHolder for SessionHolder {
    fn get_attribute(&self, name: &str) -> Option<Instance> {
        self.attributes.get(name).map(|entry| entry.value().clone())
    }

    fn set_attribute(&self, name: &str, value: Instance) {
        self.attributes.insert(name.to_string(), value);
    }

    fn remove_attribute(&self, name: &str) -> Option<Instance> {
        self.attributes.remove(name).map(|(_, value)| value)
    }
}

/// 应用持有者
pub struct ApplicationHolder {
    name: String,
    started_at: DateTime<Utc>,
    attributes: DashMap<String, Instance>,
}

impl ApplicationHolder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            started_at: Utc::now(),
            attributes: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

impl fmt::Debug for ApplicationHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationHolder")
            .field("name", &self.name)
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl AttributeHolder for ApplicationHolder {
    fn get_attribute(&self, name: &str) -> Option<Instance> {
        self.attributes.get(name).map(|entry| entry.value().clone())
    }

    fn set_attribute(&self, name: &str, value: Instance) {
        self.attributes.insert(name.to_string(), value);
    }

    fn remove_attribute(&self, name: &str) -> Option<Instance> {
        self.attributes.remove(name).map(|(_, value)| value)
    }
}

/// 一个工作单元（请求、命令、定时任务）的执行上下文
///
/// 自身也是请求作用域的属性持有者
pub struct ExecutionContext {
    id: Uuid,
    activity: Option<String>,
    data: Value,
    attributes: DashMap<String, Instance>,
    session: Option<Arc<dyn AttributeHolder>>,
    application: Option<Arc<dyn AttributeHolder>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            activity: None,
            data: Value::Null,
            attributes: DashMap::new(),
            session: None,
            application: None,
        }
    }

    /// 活动名，作为连接点的 container 字段
    pub fn with_activity(mut self, activity: &str) -> Self {
        self.activity = Some(activity.to_string());
        self
    }

    /// 测试表达式求值用的数据上下文
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_session(mut self, session: Arc<dyn AttributeHolder>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_application(mut self, application: Arc<dyn AttributeHolder>) -> Self {
        self.application = Some(application);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn activity(&self) -> Option<&str> {
        self.activity.as_deref()
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn session(&self) -> Option<&Arc<dyn AttributeHolder>> {
        self.session.as_ref()
    }

    pub fn application(&self) -> Option<&Arc<dyn AttributeHolder>> {
        self.application.as_ref()
    }

    /// 已分配的请求作用域存储（不会触发分配）
    pub fn request_store(&self) -> Option<Arc<ScopeStore>> {
        find_store(self, ScopeKind::Request)
    }
}

impl AttributeHolder for ExecutionContext {
    fn get_attribute(&self, name: &str) -> Option<Instance> {
        self.attributes.get(name).map(|entry| entry.value().clone())
    }

    fn set_attribute(&self, name: &str, value: Instance) {
        self.attributes.insert(name.to_string(), value);
    }

    fn remove_attribute(&self, name: &str) -> Option<Instance> {
        self.attributes.remove(name).map(|(_, value)| value)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("activity", &self.activity)
            .field("data", &self.data)
            .field("has_session", &self.session.is_some())
            .field("has_application", &self.application.is_some())
            .finish()
    }
}
