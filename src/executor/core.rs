use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::context::JobContext;
use super::registry::HandlerRegistry;
use crate::common::error::Result;
use crate::common::model::AuditEvent;
use crate::common::traits::AuditSink;
use crate::store::JobStore;

// ==========================================
// 任务执行器 (JobExecutor)
// ==========================================

/// 任务执行器
///
/// Worker 领到任务 ID 后调用 execute 完成一次完整执行:
/// 认领 -> 路由 -> 带超时执行 -> 收尾落库 -> 审计。
///
/// 安全护栏:
/// - Handler Panic 被 catch_unwind 捕获，折叠成 Failed，绝不拖垮 Worker。
/// - 每个任务有独立超时 (tokio::time::timeout)。
/// - 未注册的 job_type 直接判 Failed，错误信息固定为 "Unknown job type"。
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    registry: HandlerRegistry,
    audit: Arc<dyn AuditSink>,
    /// 任务未单独指定时的默认超时 (毫秒)
    default_timeout_ms: u64,
    /// 正在执行的任务及其取消令牌
    running: DashMap<String, CancellationToken>,
    shutdown: CancellationToken,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: HandlerRegistry,
        audit: Arc<dyn AuditSink>,
        default_timeout_ms: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            registry,
            audit,
            default_timeout_ms,
            running: DashMap::new(),
            shutdown,
        }
    }

    /// 执行一个任务 (以 ID 认领)
    ///
    /// 认领失败 (任务恰好被取消/删除) 时静默跳过，这不是错误。
    pub async fn execute(&self, id: &str) -> Result<()> {
        // CAS 认领: 只有 Pending/Scheduled 能进 Running
        let Some(job) = self.store.mark_running(id).await? else {
            debug!(job_id = id, "job no longer runnable, skipping");
            return Ok(());
        };

        let Some(handler) = self.registry.get(&job.job_type) else {
            warn!(job_id = id, job_type = %job.job_type, "no handler registered");
            self.store.fail(id, "Unknown job type").await?;
            self.audit.record(AuditEvent::new(
                "job_failed",
                id,
                format!("unknown job type: {}", job.job_type),
            ));
            return Ok(());
        };

        let token = self.shutdown.child_token();
        self.running.insert(id.to_string(), token.clone());

        let timeout_ms = job.timeout_ms.unwrap_or(self.default_timeout_ms);
        let ctx = JobContext::new(job, token);

        // Panic 防线在超时防线内侧: 超时先裁决，Panic 再折叠。
        // timeout_ms == 0 表示不设超时 (工作流载体任务暂停时可无限期驻留)。
        let work = AssertUnwindSafe(handler.run(ctx)).catch_unwind();
        let outcome = if timeout_ms == 0 {
            Ok(work.await)
        } else {
            tokio::time::timeout(Duration::from_millis(timeout_ms), work).await
        };

        self.running.remove(id);

        match outcome {
            // 超时
            Err(_) => {
                let msg = format!("Execution timed out after {timeout_ms}ms");
                self.store.fail(id, &msg).await?;
                self.audit.record(AuditEvent::new("job_failed", id, msg));
            }
            // Panic
            Ok(Err(panic)) => {
                let detail = if let Some(s) = panic.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                let msg = format!("Panic: {detail}");
                self.store.fail(id, &msg).await?;
                self.audit.record(AuditEvent::new("job_failed", id, msg));
            }
            // Handler 返回 Err
            Ok(Ok(Err(err))) => {
                let msg = format!("{err:#}");
                self.store.fail(id, &msg).await?;
                self.audit.record(AuditEvent::new("job_failed", id, msg));
            }
            // 成功
            Ok(Ok(Ok(results))) => {
                self.store.complete(id, results).await?;
                self.audit
                    .record(AuditEvent::new("job_completed", id, "completed"));
            }
        }
        Ok(())
    }

    /// 正在执行的任务数
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// 关闭时向所有在途任务广播取消 (协作式，不强杀)
    pub fn cancel_all_running(&self) {
        for entry in self.running.iter() {
            entry.value().cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NullAuditSink;
    use crate::common::model::{Job, JobStatus, JsonMap};
    use crate::executor::handlers::register_builtin_handlers;
    use crate::store::MemoryStore;

    fn executor_with(registry: HandlerRegistry) -> (Arc<MemoryStore>, JobExecutor) {
        let store = Arc::new(MemoryStore::new());
        let executor = JobExecutor::new(
            store.clone(),
            registry,
            Arc::new(NullAuditSink),
            5_000,
            CancellationToken::new(),
        );
        (store, executor)
    }

    #[tokio::test]
    async fn unknown_job_type_fails_with_fixed_message() {
        let (store, executor) = executor_with(HandlerRegistry::new());
        let job = Job::new("no_such_type");
        let id = job.id.clone();
        store.insert(job).await.unwrap();

        executor.execute(&id).await.unwrap();
        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("Unknown job type"));
    }

    #[tokio::test]
    async fn panic_is_captured_as_failure() {
        async fn explode(_ctx: JobContext) -> anyhow::Result<JsonMap> {
            panic!("kaboom")
        }
        let mut registry = HandlerRegistry::new();
        registry.register_fn("explode", explode);
        let (store, executor) = executor_with(registry);

        let job = Job::new("explode");
        let id = job.id.clone();
        store.insert(job).await.unwrap();

        executor.execute(&id).await.unwrap();
        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap_or_default().contains("Panic"));
        assert!(job.error.as_deref().unwrap_or_default().contains("kaboom"));
    }

    #[tokio::test]
    async fn timeout_fails_the_job() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("slow", |_ctx: JobContext| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(JsonMap::new())
        });
        let (store, executor) = executor_with(registry);

        let job = Job::new("slow").with_timeout_ms(50);
        let id = job.id.clone();
        store.insert(job).await.unwrap();

        executor.execute(&id).await.unwrap();
        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap_or_default().contains("timed out"));
    }

    #[tokio::test]
    async fn zero_timeout_disables_the_deadline() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("steady", |_ctx: JobContext| async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(JsonMap::new())
        });
        let store = Arc::new(MemoryStore::new());
        // 默认超时远短于处理器耗时
        let executor = JobExecutor::new(
            store.clone(),
            registry,
            Arc::new(NullAuditSink),
            50,
            CancellationToken::new(),
        );

        let job = Job::new("steady").with_timeout_ms(0);
        let id = job.id.clone();
        store.insert(job).await.unwrap();

        executor.execute(&id).await.unwrap();
        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn success_writes_results() {
        let mut registry = HandlerRegistry::new();
        register_builtin_handlers(&mut registry);
        let (store, executor) = executor_with(registry);

        let job = Job::new("health_check");
        let id = job.id.clone();
        store.insert(job).await.unwrap();

        executor.execute(&id).await.unwrap();
        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            job.results.get("status").and_then(|v| v.as_str()),
            Some("healthy")
        );
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancelled_job_is_skipped() {
        let mut registry = HandlerRegistry::new();
        register_builtin_handlers(&mut registry);
        let (store, executor) = executor_with(registry);

        let job = Job::new("health_check");
        let id = job.id.clone();
        store.insert(job).await.unwrap();
        store.cancel(&id).await.unwrap();

        executor.execute(&id).await.unwrap();
        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }
}
