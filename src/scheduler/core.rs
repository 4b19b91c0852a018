use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::SchedulerClient;
use super::pacemaker::{PacerEvent, TickPacer};
use super::stats;
use crate::common::TimeUtils;
use crate::common::config::SchedulerConfig;
use crate::common::error::{Result, SchedulerError};
use crate::common::model::{AuditEvent, Job, JobStats, RecurringJob};
use crate::common::traits::{AuditSink, ScheduleEvaluator};
use crate::executor::JobExecutor;
use crate::policy::RetryPolicy;
use crate::store::{JobStore, RecurringJobStore};
use crate::workflow::WorkflowEngine;

// ==========================================
// 调度器 (Scheduler)
// ==========================================

pub(super) struct SchedulerInner {
    pub(super) config: SchedulerConfig,
    pub(super) jobs: Arc<dyn JobStore>,
    pub(super) recurring: Arc<dyn RecurringJobStore>,
    pub(super) evaluator: Arc<dyn ScheduleEvaluator>,
    pub(super) retry_policy: Arc<dyn RetryPolicy>,
    pub(super) audit: Arc<dyn AuditSink>,
    pub(super) executor: Arc<JobExecutor>,
    pub(super) client: SchedulerClient,
    /// 工作流引擎 (构建时可关闭)
    pub(super) workflows: Option<WorkflowEngine>,

    /// 分发通道 (有界，背压出口)
    pub(super) dispatch_tx: mpsc::Sender<String>,
    /// 接收端，run() 启动时被一次性取走
    pub(super) dispatch_rx: Mutex<Option<mpsc::Receiver<String>>>,

    /// 全局分发暂停
    pub(super) paused: Arc<AtomicBool>,
    pub(super) shutdown: CancellationToken,
}

/// 调度器
///
/// 单 Actor 调度循环 + 有界分发通道 + 固定 Worker 池。
/// 实例自持有全部状态，进程内可以并存多个互不相干的调度器。
///
/// 用法: [`SchedulerBuilder`](super::SchedulerBuilder) 构建，
/// `start()` 后用公开方法提交和管理任务，`shutdown()` 收尾。
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub(super) fn from_inner(inner: Arc<SchedulerInner>) -> Self {
        Self { inner }
    }

    // ==========================================
    // 1. 运行
    // ==========================================

    /// 运行调度循环 (阻塞当前任务直到 shutdown)
    ///
    /// 只能运行一次，重复调用返回 Err。
    pub async fn run(&self) -> Result<()> {
        let rx = self
            .inner
            .dispatch_rx
            .lock()
            .take()
            .ok_or_else(|| SchedulerError::Config("scheduler is already running".into()))?;

        // Worker 池: 共享一个接收端，天然的 work-stealing
        let shared_rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut workers = JoinSet::new();
        for worker_id in 0..self.inner.config.workers.max(1) {
            let rx = shared_rx.clone();
            let executor = self.inner.executor.clone();
            let shutdown = self.inner.shutdown.clone();
            workers.spawn(async move {
                loop {
                    let next = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            _ = shutdown.cancelled() => None,
                            job = rx.recv() => job,
                        }
                    };
                    let Some(job_id) = next else { break };
                    if let Err(err) = executor.execute(&job_id).await {
                        error!(worker_id, job_id = %job_id, error = %err, "job execution error");
                    }
                }
                debug!(worker_id, "worker stopped");
            });
        }

        info!(
            workers = self.inner.config.workers,
            tick_interval_ms = self.inner.config.tick_interval_ms,
            "scheduler started"
        );

        // 调度 Actor: Tick 串行处理，永不重叠
        let pacer = TickPacer::new(
            self.inner.paused.clone(),
            self.inner.jobs.notifier(),
            self.inner.shutdown.clone(),
            std::time::Duration::from_millis(self.inner.config.tick_interval_ms),
        );
        loop {
            match pacer.wait_next().await {
                PacerEvent::Shutdown => break,
                PacerEvent::Tick => {
                    if let Err(err) = self.dispatch_due().await {
                        error!(error = %err, "dispatch tick failed");
                    }
                    if let Err(err) = self.fire_recurring().await {
                        error!(error = %err, "recurring tick failed");
                    }
                }
            }
        }

        // 协作式收尾: 广播取消，等 Worker 退出
        self.inner.executor.cancel_all_running();
        while workers.join_next().await.is_some() {}
        info!("scheduler stopped");
        Ok(())
    }

    /// 后台启动调度循环
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.run().await {
                error!(error = %err, "scheduler exited with error");
            }
        })
    }

    /// 发出关机信号 (幂等)
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// 暂停分发 (不影响已在执行的任务)
    pub fn pause_dispatch(&self) {
        self.inner.paused.store(true, Ordering::Relaxed);
    }

    /// 恢复分发
    pub fn resume_dispatch(&self) {
        self.inner.paused.store(false, Ordering::Relaxed);
        self.inner.jobs.notifier().notify_one();
    }

    // ==========================================
    // 2. 调度循环内部
    // ==========================================

    /// 分发到期任务
    ///
    /// 认领 (Pending -> Scheduled) 后 try_send 进分发通道；
    /// 通道满则把任务回退 Pending 并结束本轮 (背压)。
    async fn dispatch_due(&self) -> Result<()> {
        let now = TimeUtils::now_f64();
        let due = self
            .inner
            .jobs
            .due_pending(now, self.inner.config.dispatch_batch_size)
            .await?;

        for job in due {
            if !self.inner.jobs.mark_scheduled(&job.id).await? {
                // 认领失败: 刚好被取消/暂停了
                continue;
            }
            match self.inner.dispatch_tx.try_send(job.id.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.inner.jobs.requeue(&job.id, job.scheduled_at).await?;
                    debug!(job_id = %job.id, "dispatch queue full, backing off");
                    break;
                }
                Err(TrySendError::Closed(_)) => return Err(SchedulerError::ChannelClosed),
            }
        }
        Ok(())
    }

    /// 触发到期的循环任务
    ///
    /// 每次触发恰好生成一个独立 Job；求值失败或时间轴不前进时
    /// fail-closed: 禁用该循环任务并把错误写进 last_error。
    async fn fire_recurring(&self) -> Result<()> {
        let now = TimeUtils::now_f64();
        for rec in self.inner.recurring.due_recurring(now).await? {
            let next = match self
                .inner
                .evaluator
                .next_after(&rec.schedule, rec.timezone.as_deref(), now)
            {
                Ok(next) if next > now => next,
                Ok(next) => {
                    let msg = format!("schedule does not advance: next_run {next} <= now {now}");
                    warn!(recurring_id = %rec.id, "{msg}");
                    self.inner.recurring.disable_with_error(&rec.id, &msg).await?;
                    self.inner
                        .audit
                        .record(AuditEvent::new("recurring_disabled", &rec.id, msg));
                    continue;
                }
                Err(err) => {
                    let msg = format!("{err:#}");
                    warn!(recurring_id = %rec.id, error = %msg, "schedule evaluation failed");
                    self.inner.recurring.disable_with_error(&rec.id, &msg).await?;
                    self.inner
                        .audit
                        .record(AuditEvent::new("recurring_disabled", &rec.id, msg));
                    continue;
                }
            };

            let job = rec.template.instantiate(&rec.id);
            let job_id = job.id.clone();
            if let Err(err) = self.inner.jobs.insert(job).await {
                error!(recurring_id = %rec.id, error = %err, "failed to insert recurring instance");
                continue;
            }
            self.inner.recurring.mark_fired(&rec.id, now, next).await?;
            self.inner.audit.record(AuditEvent::new(
                "recurring_fired",
                &rec.id,
                format!("instantiated job {job_id}"),
            ));
        }
        Ok(())
    }

    // ==========================================
    // 3. 任务管理 API
    // ==========================================

    /// 提交任务，返回任务 ID
    pub async fn submit(&self, job: Job) -> Result<String> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SchedulerError::SchedulerShutdown);
        }
        self.inner.client.submit(job).await
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.inner.jobs.get(id).await.ok().flatten()
    }

    pub async fn list(&self) -> Vec<Job> {
        self.inner.jobs.list().await.unwrap_or_default()
    }

    /// 取消任务 (只对 Pending/Scheduled 生效)
    pub async fn cancel(&self, id: &str) -> bool {
        match self.inner.jobs.cancel(id).await {
            Ok(true) => {
                self.inner
                    .audit
                    .record(AuditEvent::new("job_cancelled", id, "cancelled"));
                true
            }
            Ok(false) => false,
            Err(err) => {
                error!(job_id = id, error = %err, "cancel failed");
                false
            }
        }
    }

    /// 暂停任务 (只对 Pending 生效)
    pub async fn pause(&self, id: &str) -> bool {
        match self.inner.jobs.pause(id).await {
            Ok(true) => {
                self.inner
                    .audit
                    .record(AuditEvent::new("job_paused", id, "paused"));
                true
            }
            Ok(false) => false,
            Err(err) => {
                error!(job_id = id, error = %err, "pause failed");
                false
            }
        }
    }

    /// 恢复任务 (只对 Paused 生效)
    pub async fn resume(&self, id: &str) -> bool {
        match self.inner.jobs.resume(id).await {
            Ok(true) => {
                self.inner
                    .audit
                    .record(AuditEvent::new("job_resumed", id, "resumed"));
                true
            }
            Ok(false) => false,
            Err(err) => {
                error!(job_id = id, error = %err, "resume failed");
                false
            }
        }
    }

    /// 显式重试失败任务，延迟由重试策略决定
    pub async fn retry(&self, id: &str) -> bool {
        let job = match self.inner.jobs.get(id).await {
            Ok(Some(job)) => job,
            _ => return false,
        };
        if !job.can_retry() {
            return false;
        }
        let delay = self.inner.retry_policy.delay(job.retry_count + 1);
        match self.inner.jobs.retry(id, delay).await {
            Ok(true) => {
                self.inner.audit.record(AuditEvent::new(
                    "job_retried",
                    id,
                    format!("retry {} scheduled in {delay:?}", job.retry_count + 1),
                ));
                true
            }
            Ok(false) => false,
            Err(err) => {
                error!(job_id = id, error = %err, "retry failed");
                false
            }
        }
    }

    /// 删除任务记录
    pub async fn delete(&self, id: &str) -> bool {
        self.inner.jobs.remove(id).await.unwrap_or(false)
    }

    /// 统计汇总
    pub async fn stats(&self) -> JobStats {
        stats::aggregate(&self.list().await)
    }

    /// 提交句柄 (可独立克隆给上游组件)
    pub fn client(&self) -> SchedulerClient {
        self.inner.client.clone()
    }

    /// 工作流引擎 (构建时未关闭则总是 Some)
    pub fn workflows(&self) -> Option<WorkflowEngine> {
        self.inner.workflows.clone()
    }

    // ==========================================
    // 4. 循环任务管理 API
    // ==========================================

    /// 注册循环任务
    ///
    /// 提交时就求值一次 next_run，非法描述符当场拒绝。
    pub async fn add_recurring(&self, mut rec: RecurringJob) -> Result<String> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SchedulerError::SchedulerShutdown);
        }
        let now = TimeUtils::now_f64();
        rec.next_run = self
            .inner
            .evaluator
            .next_after(&rec.schedule, rec.timezone.as_deref(), now)
            .map_err(|err| SchedulerError::InvalidSchedule(format!("{err:#}")))?;

        let id = rec.id.clone();
        self.inner.recurring.insert_recurring(rec).await?;
        self.inner.audit.record(AuditEvent::new(
            "recurring_added",
            &id,
            "recurring job registered",
        ));
        Ok(id)
    }

    pub async fn get_recurring(&self, id: &str) -> Option<RecurringJob> {
        self.inner.recurring.get_recurring(id).await.ok().flatten()
    }

    pub async fn list_recurring(&self) -> Vec<RecurringJob> {
        self.inner.recurring.list_recurring().await.unwrap_or_default()
    }

    pub async fn remove_recurring(&self, id: &str) -> bool {
        self.inner.recurring.remove_recurring(id).await.unwrap_or(false)
    }

    /// 启用/禁用循环任务
    ///
    /// 重新启用时刷新 next_run，避免补跑禁用期间积欠的触发。
    pub async fn set_recurring_enabled(&self, id: &str, enabled: bool) -> bool {
        if enabled {
            let rec = match self.inner.recurring.get_recurring(id).await {
                Ok(Some(rec)) => rec,
                _ => return false,
            };
            let now = TimeUtils::now_f64();
            let next = match self
                .inner
                .evaluator
                .next_after(&rec.schedule, rec.timezone.as_deref(), now)
            {
                Ok(next) => next,
                Err(err) => {
                    warn!(recurring_id = id, error = %format!("{err:#}"), "re-enable refused");
                    return false;
                }
            };
            if !self
                .inner
                .recurring
                .set_recurring_enabled(id, true)
                .await
                .unwrap_or(false)
            {
                return false;
            }
            let _ = self.inner.recurring.set_next_run(id, next).await;
            true
        } else {
            self.inner
                .recurring
                .set_recurring_enabled(id, false)
                .await
                .unwrap_or(false)
        }
    }
}
