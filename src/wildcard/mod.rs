//! 通配符模式
//!
//! 规则加载时编译模式，运行期只做匹配和分组提取。

mod matcher;
mod pattern;

pub use matcher::{Groups, WildcardMatch};
pub use pattern::WildcardPattern;
