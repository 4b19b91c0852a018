use serde::{Deserialize, Serialize};

// ==========================================
// 调度器配置
// ==========================================

/// 调度器全局配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 调度循环周期 (毫秒)
    /// - 有新任务到来时会被 Notify 提前唤醒，这里只是兜底上限。
    pub tick_interval_ms: u64,

    /// Worker 数量 (执行并发上限)
    pub workers: usize,

    /// 分发队列容量
    /// - 队列满时调度循环停止分发，任务回退 Pending 等下一轮 (背压)。
    pub queue_capacity: usize,

    /// 单轮调度最多分发多少任务
    pub dispatch_batch_size: usize,

    /// 默认执行超时 (毫秒)，任务未单独指定时生效
    pub default_timeout_ms: u64,

    /// 重试退避基础延迟 (秒)
    pub retry_base_delay_secs: f64,

    /// 重试退避封顶延迟 (秒)
    pub retry_max_delay_secs: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 30_000,
            workers: num_cpus::get().max(1),
            queue_capacity: 256,
            dispatch_batch_size: 64,
            default_timeout_ms: 300_000,
            retry_base_delay_secs: 30.0,
            retry_max_delay_secs: 3600.0,
        }
    }
}

impl SchedulerConfig {
    /// 开发/测试配置: 快速 tick, 小并发
    pub fn new_dev() -> Self {
        Self {
            tick_interval_ms: 25,
            workers: 2,
            queue_capacity: 32,
            dispatch_batch_size: 16,
            default_timeout_ms: 10_000,
            retry_base_delay_secs: 0.1,
            retry_max_delay_secs: 1.0,
        }
    }
}
