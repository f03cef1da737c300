//! 通配符模式编译
//!
//! 将模式字符串编译为令牌程序：
//! - `?`  一个非分隔符字符；位于分隔符或输入末尾时为零宽
//! - `*`  零或多个非分隔符字符
//! - `**` 零或多个完整的分隔段
//! - `+`  恰好一个非分隔符字符
//! - `\`  转义下一个字符

use std::fmt;

use super::matcher::{Scan, WildcardMatch};
use crate::errors::PatternError;

const ESCAPE_CHAR: char = '\\';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token {
    Literal(char),
    Question,
    Star,
    DoubleStar,
    Plus,
    Separator,
}

/// 已编译的通配符模式，规则加载时编译一次，之后只读共享
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardPattern {
    source: String,
    separator: Option<String>,
    tokens: Vec<Token>,
}

impl WildcardPattern {
    /// 编译不带分隔符的模式
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        Self::compile_with(pattern, None)
    }

    /// 编译带分隔符的模式；空分隔符等同于无分隔符
    pub fn with_separator(pattern: &str, separator: &str) -> Result<Self, PatternError> {
        Self::compile_with(pattern, Some(separator))
    }

    fn compile_with(pattern: &str, separator: Option<&str>) -> Result<Self, PatternError> {
        let separator = separator.filter(|s| !s.is_empty()).map(str::to_string);
        let mut tokens = Vec::with_capacity(pattern.len());
        let mut rest = pattern;

        while let Some(c) = rest.chars().next() {
            if let Some(sep) = separator.as_deref() {
                if rest.starts_with(sep) {
                    tokens.push(Token::Separator);
                    rest = &rest[sep.len()..];
                    continue;
                }
            }
            rest = &rest[c.len_utf8()..];

            let token = match c {
                ESCAPE_CHAR => {
                    let escaped = rest
                        .chars()
                        .next()
                        .ok_or_else(|| PatternError::DanglingEscape(pattern.to_string()))?;
                    rest = &rest[escaped.len_utf8()..];
                    Token::Literal(escaped)
                }
                '*' if rest.starts_with('*') => {
                    rest = &rest[1..];
                    Token::DoubleStar
                }
                '*' => Token::Star,
                '?' => Token::Question,
                '+' => Token::Plus,
                other => Token::Literal(other),
            };
            tokens.push(token);
        }

        Ok(Self {
            source: pattern.to_string(),
            separator,
            tokens,
        })
    }

    /// 判断字符串是否包含通配符；不含时调用方可以直接做字符串比较
    pub fn has_wildcards(pattern: &str) -> bool {
        pattern.contains(['*', '?', '+', ESCAPE_CHAR])
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn separator(&self) -> Option<&str> {
        self.separator.as_deref()
    }

    pub(crate) fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// 是否完整匹配
    pub fn matches(&self, input: &str) -> bool {
        self.captures(input).is_some()
    }

    /// 匹配成功时返回可按分隔段取值的结果
    pub fn captures<'a>(&self, input: &'a str) -> Option<WildcardMatch<'a>> {
        Scan::new(self, input).run()
    }
}

impl fmt::Display for WildcardPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_tokens() {
        let pattern = WildcardPattern::with_separator("a/**/b?+*", "/").unwrap();
        assert_eq!(
            pattern.tokens(),
            &[
                Token::Literal('a'),
                Token::Separator,
                Token::DoubleStar,
                Token::Separator,
                Token::Literal('b'),
                Token::Question,
                Token::Plus,
                Token::Star,
            ]
        );
    }

    #[test]
    fn test_multi_char_separator() {
        let pattern = WildcardPattern::with_separator("app::*", "::").unwrap();
        assert_eq!(pattern.tokens()[3], Token::Separator);
        assert_eq!(pattern.tokens().len(), 5);
    }

    #[test]
    fn test_escape() {
        let pattern = WildcardPattern::compile(r"a\*b").unwrap();
        assert_eq!(
            pattern.tokens(),
            &[Token::Literal('a'), Token::Literal('*'), Token::Literal('b')]
        );
        assert!(pattern.matches("a*b"));
        assert!(!pattern.matches("axb"));
    }

    #[test]
    fn test_dangling_escape() {
        let result = WildcardPattern::compile(r"abc\");
        assert_eq!(result, Err(PatternError::DanglingEscape(r"abc\".to_string())));
    }

    #[test]
    fn test_empty_separator_is_none() {
        let pattern = WildcardPattern::with_separator("a/b", "").unwrap();
        assert_eq!(pattern.separator(), None);
    }

    #[test]
    fn test_has_wildcards() {
        assert!(WildcardPattern::has_wildcards("user*"));
        assert!(WildcardPattern::has_wildcards("a?b"));
        assert!(!WildcardPattern::has_wildcards("userService"));
    }
}
