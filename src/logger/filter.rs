//! 级别过滤与采样
//!
//! 两者都在管道最前端执行，被拒绝的调用不产生任何副作用，但仍然返回成功。

use crate::common::Severity;
use rand::Rng;

/// 最低级别过滤器
#[derive(Debug, Clone, Copy)]
pub struct SeverityFilter {
    min: Severity,
}

impl SeverityFilter {
    pub fn new(min: Severity) -> Self {
        Self { min }
    }

    pub fn min_severity(&self) -> Severity {
        self.min
    }

    pub fn is_loggable(&self, severity: Severity) -> bool {
        severity.rank() >= self.min.rank()
    }

    /// 文本级别的判断：无法识别的级别视为低于阈值
    pub fn is_loggable_str(&self, severity: &str) -> bool {
        severity
            .parse::<Severity>()
            .map(|s| self.is_loggable(s))
            .unwrap_or(false)
    }
}

/// 统计采样
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    rate: f64,
}

impl Sampler {
    pub fn new(rate: f64) -> Self {
        Self {
            rate: if rate.is_nan() { 1.0 } else { rate.clamp(0.0, 1.0) },
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// 以 `rate` 的概率保留本次调用
    pub fn should_sample(&self) -> bool {
        if self.rate >= 1.0 {
            return true;
        }
        if self.rate <= 0.0 {
            return false;
        }
        rand::thread_rng().gen::<f64>() < self.rate
    }
}
