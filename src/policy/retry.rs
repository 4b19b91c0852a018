use std::time::Duration;

use crate::common::utils::calculate_backoff;

// ==========================================
// 重试延迟策略
// ==========================================

/// 重试延迟策略
///
/// 输入是即将进行的第几次重试 (从 1 开始)，输出是这次重试前要等待多久。
pub trait RetryPolicy: Send + Sync + 'static {
    fn delay(&self, retry_count: u32) -> Duration;
}

/// 固定间隔重试
#[derive(Debug, Clone)]
pub struct FixedDelay {
    pub interval: Duration,
}

impl FixedDelay {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl RetryPolicy for FixedDelay {
    fn delay(&self, _retry_count: u32) -> Duration {
        self.interval
    }
}

/// 指数退避重试 (带全抖动)
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// 基础延迟 (秒)
    pub base_secs: f64,
    /// 封顶延迟 (秒)
    pub max_secs: f64,
}

impl ExponentialBackoff {
    pub fn new(base_secs: f64, max_secs: f64) -> Self {
        Self { base_secs, max_secs }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_secs: 30.0,
            max_secs: 3600.0,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn delay(&self, retry_count: u32) -> Duration {
        Duration::from_secs_f64(calculate_backoff(retry_count, self.base_secs, self.max_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_is_constant() {
        let policy = FixedDelay::new(Duration::from_secs(5));
        assert_eq!(policy.delay(1), Duration::from_secs(5));
        assert_eq!(policy.delay(10), Duration::from_secs(5));
    }

    #[test]
    fn backoff_never_exceeds_cap() {
        let policy = ExponentialBackoff::new(1.0, 8.0);
        for attempt in 1..=12 {
            assert!(policy.delay(attempt) <= Duration::from_secs_f64(8.0));
        }
    }
}
