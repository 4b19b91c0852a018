use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::common::error::Result;
use crate::common::model::{Job, JsonMap, RecurringJob};

// ==========================================
// 1. 任务存储 (JobStore)
// ==========================================

/// 任务存储
///
/// 所有状态流转都在存储层以 CAS 语义完成:
/// - 前置状态匹配则原子更新并返回 Ok(true)。
/// - 前置状态不匹配 (迟到/重复的请求) 返回 Ok(false)，不报错。
/// - 只有存储本身故障才返回 Err。
///
/// 外界看到的任务永远是完整记录，不存在半成品状态。
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// 写入新任务，ID 冲突时报错
    async fn insert(&self, job: Job) -> Result<()>;

    /// 按 ID 查询
    async fn get(&self, id: &str) -> Result<Option<Job>>;

    /// 全量列出
    async fn list(&self) -> Result<Vec<Job>>;

    /// 删除任务记录，返回是否存在
    async fn remove(&self, id: &str) -> Result<bool>;

    /// 取出到期的 Pending 任务 (只读快照)
    ///
    /// - 按优先级从高到低，同优先级按 scheduled_at 从早到晚。
    /// - 不改变任务状态，认领由 mark_scheduled 单独完成。
    async fn due_pending(&self, now: f64, limit: usize) -> Result<Vec<Job>>;

    /// 认领: Pending -> Scheduled
    async fn mark_scheduled(&self, id: &str) -> Result<bool>;

    /// 回退: Scheduled -> Pending (分发队列满时的背压出口)
    async fn requeue(&self, id: &str, at: f64) -> Result<bool>;

    /// 开始执行: Pending|Scheduled -> Running
    ///
    /// 成功时写入 started_at 并返回任务快照；
    /// 状态不匹配 (例如恰好被取消) 返回 Ok(None)。
    async fn mark_running(&self, id: &str) -> Result<Option<Job>>;

    /// 成功收尾: Running -> Completed
    async fn complete(&self, id: &str, results: JsonMap) -> Result<bool>;

    /// 失败收尾: Running -> Failed
    async fn fail(&self, id: &str, error: &str) -> Result<bool>;

    /// 取消: Pending|Scheduled -> Cancelled
    async fn cancel(&self, id: &str) -> Result<bool>;

    /// 暂停: Pending -> Paused
    async fn pause(&self, id: &str) -> Result<bool>;

    /// 恢复: Paused -> Pending
    async fn resume(&self, id: &str) -> Result<bool>;

    /// 显式重试: Failed -> Pending
    ///
    /// 仅在 retry_count < max_retries 时生效；
    /// 成功时 retry_count+1, scheduled_at = now + delay。
    async fn retry(&self, id: &str, delay: Duration) -> Result<bool>;

    /// 新任务可见性通知句柄
    ///
    /// insert/resume/retry/requeue 等让任务重新变为 Pending 的操作
    /// 都会触发它，调度循环据此提前醒来。
    fn notifier(&self) -> Arc<Notify>;
}

// ==========================================
// 2. 循环任务存储 (RecurringJobStore)
// ==========================================

/// 循环任务存储
#[async_trait]
pub trait RecurringJobStore: Send + Sync + 'static {
    /// 写入循环任务定义，ID 冲突时报错
    async fn insert_recurring(&self, job: RecurringJob) -> Result<()>;

    /// 按 ID 查询
    async fn get_recurring(&self, id: &str) -> Result<Option<RecurringJob>>;

    /// 全量列出
    async fn list_recurring(&self) -> Result<Vec<RecurringJob>>;

    /// 删除定义，返回是否存在
    async fn remove_recurring(&self, id: &str) -> Result<bool>;

    /// 启用/禁用，返回是否存在
    async fn set_recurring_enabled(&self, id: &str, enabled: bool) -> Result<bool>;

    /// 取出所有已启用且 next_run <= now 的循环任务
    async fn due_recurring(&self, now: f64) -> Result<Vec<RecurringJob>>;

    /// 触发成功后推进时间轴: last_run / next_run 前移并清空 last_error
    async fn mark_fired(&self, id: &str, last_run: f64, next_run: f64) -> Result<bool>;

    /// 只刷新 next_run (重新启用时跳过禁用期间积欠的触发)
    async fn set_next_run(&self, id: &str, next_run: f64) -> Result<bool>;

    /// Fail-closed: 求值失败时禁用并记录错误，绝不静默重试
    async fn disable_with_error(&self, id: &str, error: &str) -> Result<bool>;
}
