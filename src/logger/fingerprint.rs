//! 指纹与去重
//!
//! 指纹只依赖 (message, 堆栈首行, source, category)，同一错误在不同时间、不同上下文下得到同一指纹。
//! 去重计数只存在于进程内存中，与持久化日志无关。

use crate::common::{Category, LogEntry};
use crate::common::models::first_line;
use std::collections::HashMap;
use std::sync::Mutex;

/// 32位滚动哈希（hash * 31 + c），以8位十六进制输出
fn rolling_hash(input: &str) -> String {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32);
    }
    format!("{:08x}", hash as u32)
}

/// 计算指纹
pub fn compute_fingerprint(message: &str, stack: Option<&str>, source: &str, category: Category) -> String {
    let stack_head = first_line(stack).unwrap_or("");
    let key = format!("{}|{}|{}|{}", message, stack_head.trim(), source, category.as_str());
    rolling_hash(&key)
}

/// 对已有条目重新计算指纹
pub fn fingerprint(entry: &LogEntry) -> String {
    compute_fingerprint(&entry.message, entry.stack.as_deref(), &entry.source, entry.category)
}

/// 去重结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    /// 放行，附带计数快照（第几次出现）
    Allow { occurrences: u32 },
    Suppress,
}

/// 按指纹计数的去重器
#[derive(Debug)]
pub struct DedupTracker {
    max_duplicates: u32,
    counts: Mutex<HashMap<String, u32>>,
}

impl DedupTracker {
    pub fn new(max_duplicates: u32) -> Self {
        Self {
            max_duplicates,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// 计数已达上限则抑制，否则计数加一并放行
    pub fn check(&self, fingerprint: &str) -> DedupDecision {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(fingerprint.to_string()).or_insert(0);
        if *count >= self.max_duplicates {
            return DedupDecision::Suppress;
        }
        *count += 1;
        DedupDecision::Allow { occurrences: *count }
    }

    pub fn should_suppress(&self, fingerprint: &str) -> bool {
        matches!(self.check(fingerprint), DedupDecision::Suppress)
    }

    pub fn occurrences(&self, fingerprint: &str) -> u32 {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(fingerprint)
            .copied()
            .unwrap_or(0)
    }

    pub fn reset(&self) {
        self.counts.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
