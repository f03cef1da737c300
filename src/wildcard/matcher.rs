//! 通配符匹配与分组提取

use std::iter::FusedIterator;
use std::ops::Range;

use super::pattern::{Token, WildcardPattern};

/// 一次成功匹配的结果，记录每一次跨越分隔符的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardMatch<'a> {
    input: &'a str,
    crossings: Vec<Range<usize>>,
}

impl<'a> WildcardMatch<'a> {
    pub fn input(&self) -> &'a str {
        self.input
    }

    /// 分组数量，等于分隔符跨越次数加一
    pub fn group_count(&self) -> usize {
        self.crossings.len() + 1
    }

    /// 第 N 与第 N+1 次分隔符跨越之间的子串；第 0 组为首次跨越之前的内容
    pub fn find(&self, group: usize) -> Option<&'a str> {
        if group > self.crossings.len() {
            return None;
        }
        let start = match group {
            0 => 0,
            n => self.crossings[n - 1].end,
        };
        let end = self
            .crossings
            .get(group)
            .map_or(self.input.len(), |range| range.start);
        Some(&self.input[start..end])
    }

    /// 按顺序（或用 `rev()` 逆序）遍历所有分组
    pub fn groups(&self) -> Groups<'_, 'a> {
        Groups {
            matched: self,
            front: 0,
            back: self.group_count(),
        }
    }
}

pub struct Groups<'m, 'a> {
    matched: &'m WildcardMatch<'a>,
    front: usize,
    back: usize,
}

impl<'a> Iterator for Groups<'_, 'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let group = self.matched.find(self.front);
        self.front += 1;
        group
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back - self.front;
        (remaining, Some(remaining))
    }
}

impl DoubleEndedIterator for Groups<'_, '_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        self.matched.find(self.back)
    }
}

impl ExactSizeIterator for Groups<'_, '_> {}

impl FusedIterator for Groups<'_, '_> {}

/// 单次扫描状态：(令牌下标, 输入下标) 游标对，失败位置做记忆化，最坏 O(n·m)
pub(crate) struct Scan<'p, 'a> {
    tokens: &'p [Token],
    separator: Option<&'p str>,
    input: &'a str,
    width: usize,
    failed: Vec<bool>,
    crossings: Vec<Range<usize>>,
}

impl<'p, 'a> Scan<'p, 'a> {
    pub(crate) fn new(pattern: &'p WildcardPattern, input: &'a str) -> Self {
        let width = input.len() + 1;
        Self {
            tokens: pattern.tokens(),
            separator: pattern.separator(),
            input,
            width,
            failed: vec![false; (pattern.tokens().len() + 1) * width],
            crossings: Vec::new(),
        }
    }

    pub(crate) fn run(mut self) -> Option<WildcardMatch<'a>> {
        if self.step(0, 0) {
            Some(WildcardMatch {
                input: self.input,
                crossings: self.crossings,
            })
        } else {
            None
        }
    }

    fn step(&mut self, ti: usize, ii: usize) -> bool {
        let key = ti * self.width + ii;
        if self.failed[key] {
            return false;
        }

        let matched = match self.tokens.get(ti).copied() {
            None => ii == self.input.len(),
            Some(Token::Literal(c)) => {
                self.input[ii..].starts_with(c) && self.step(ti + 1, ii + c.len_utf8())
            }
            Some(Token::Plus) => self.consumable(ii) && self.step(ti + 1, ii + self.char_len(ii)),
            // 位于分隔符或输入末尾时为零宽
            Some(Token::Question) => {
                if self.consumable(ii) {
                    self.step(ti + 1, ii + self.char_len(ii))
                } else {
                    self.step(ti + 1, ii)
                }
            }
            Some(Token::Star) => self.star(ti, ii),
            Some(Token::DoubleStar) => match self.separator {
                Some(sep) => self.double_star(ti, ii, sep),
                None => self.star(ti, ii),
            },
            Some(Token::Separator) => self.separator_token(ti, ii),
        };

        if !matched {
            self.failed[key] = true;
        }
        matched
    }

    /// `*`：向前吞掉非分隔符字符，直到剩余程序能够匹配
    fn star(&mut self, ti: usize, ii: usize) -> bool {
        let mut j = ii;
        loop {
            if self.step(ti + 1, j) {
                return true;
            }
            if !self.consumable(j) {
                return false;
            }
            j += self.char_len(j);
        }
    }

    /// `**`：只在分段边界处停下（起点、分隔符前、输入末端），
    /// 从末端向回寻找最远的可行边界，并记录途经的分隔符
    fn double_star(&mut self, ti: usize, ii: usize, sep: &str) -> bool {
        let mut boundaries: Vec<usize> = std::iter::once(ii)
            .chain(
                self.input[ii..]
                    .match_indices(sep)
                    .map(|(offset, _)| ii + offset)
                    .filter(|&j| j > ii),
            )
            .collect();
        if boundaries.last() != Some(&self.input.len()) {
            boundaries.push(self.input.len());
        }

        for &j in boundaries.iter().rev() {
            let mark = self.crossings.len();
            self.record_crossings(ii, j, sep);
            if self.step(ti + 1, j) {
                return true;
            }
            self.crossings.truncate(mark);
        }

        // 零个分段时吸收紧随其后的分隔符，使 `a/**/b` 能匹配 `a/b`
        self.tokens.get(ti + 1) == Some(&Token::Separator) && self.step(ti + 2, ii)
    }

    fn separator_token(&mut self, ti: usize, ii: usize) -> bool {
        let Some(sep) = self.separator else {
            return false;
        };
        if !self.input[ii..].starts_with(sep) {
            return false;
        }
        let end = ii + sep.len();
        self.crossings.push(ii..end);
        if self.step(ti + 1, end) {
            true
        } else {
            self.crossings.pop();
            false
        }
    }

    fn record_crossings(&mut self, from: usize, to: usize, sep: &str) {
        let mut k = from;
        while k < to {
            if self.input[k..].starts_with(sep) && k + sep.len() <= to {
                self.crossings.push(k..k + sep.len());
                k += sep.len();
            } else {
                k += self.char_len(k);
            }
        }
    }

    /// 当前位置是否存在可被 `?`/`+`/`*` 吞掉的字符
    fn consumable(&self, i: usize) -> bool {
        i < self.input.len() && !self.on_separator(i)
    }

    fn on_separator(&self, i: usize) -> bool {
        self.separator
            .is_some_and(|sep| self.input[i..].starts_with(sep))
    }

    fn char_len(&self, i: usize) -> usize {
        self.input[i..].chars().next().map_or(0, char::len_utf8)
    }
}
