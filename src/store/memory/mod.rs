//! 内存存储实现
//!
//! - 主数据: DashMap<id, Job>，单条记录的更新在分片锁内完成。
//! - Pending 索引: BTreeMap<(到期毫秒, id), ()>，调度循环按时间范围扫描。
//! - 索引是建议性的: 扫描时一律回查主数据校验状态，失效项顺手清理。
//!
//! 锁序约定: 绝不在持有 DashMap 条目引用时去拿索引锁；
//! 持有索引锁时只读 DashMap 是允许的。

mod jobs;
mod recurring;

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::common::model::{Job, RecurringJob};

/// 内存存储
///
/// 同时实现 [`JobStore`](crate::store::JobStore) 与
/// [`RecurringJobStore`](crate::store::RecurringJobStore)，开箱即用。
pub struct MemoryStore {
    /// 任务主数据
    jobs: DashMap<String, Job>,

    /// Pending 时间索引: (scheduled_at 毫秒, 任务 ID) -> ()
    pending: Mutex<BTreeMap<(u64, String), ()>>,

    /// 循环任务定义
    recurring: DashMap<String, RecurringJob>,

    /// 新任务可见性通知
    notify: Arc<Notify>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            pending: Mutex::new(BTreeMap::new()),
            recurring: DashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    /// 时间索引键: f64 秒 -> 毫秒整数，同毫秒内按 ID 排序保证键唯一
    fn pending_key(at: f64, id: &str) -> (u64, String) {
        ((at.max(0.0) * 1000.0) as u64, id.to_string())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
