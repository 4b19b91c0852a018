use std::sync::Arc;

use tracing::debug;

use crate::common::error::{Result, SchedulerError};
use crate::common::model::{AuditEvent, Job, JobStatus};
use crate::common::traits::AuditSink;
use crate::store::JobStore;

/// 提交客户端
///
/// 轻量句柄，只负责校验 + 落库 + 审计。
/// 工作流引擎等上游组件拿它提交任务，而不必持有整个调度器。
#[derive(Clone)]
pub struct SchedulerClient {
    store: Arc<dyn JobStore>,
    audit: Arc<dyn AuditSink>,
}

impl SchedulerClient {
    pub fn new(store: Arc<dyn JobStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// 提交任务
    ///
    /// 校验失败返回 Err，不产生任何副作用；
    /// 成功后任务进入 Pending，等调度循环发现它。
    pub async fn submit(&self, job: Job) -> Result<String> {
        if job.id.trim().is_empty() {
            return Err(SchedulerError::Config("job id must not be empty".into()));
        }
        if job.job_type.trim().is_empty() {
            return Err(SchedulerError::Config("job type must not be empty".into()));
        }
        if job.status != JobStatus::Pending {
            return Err(SchedulerError::Config(format!(
                "new jobs must be Pending, got {:?}",
                job.status
            )));
        }
        if !job.scheduled_at.is_finite() || job.scheduled_at < 0.0 {
            return Err(SchedulerError::Config(format!(
                "invalid scheduled_at: {}",
                job.scheduled_at
            )));
        }

        let id = job.id.clone();
        let job_type = job.job_type.clone();
        self.store.insert(job).await?;

        debug!(job_id = %id, job_type = %job_type, "job submitted");
        self.audit.record(AuditEvent::new(
            "job_submitted",
            &id,
            format!("submitted job of type {job_type}"),
        ));
        Ok(id)
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NullAuditSink;
    use crate::store::MemoryStore;

    fn client() -> (Arc<MemoryStore>, SchedulerClient) {
        let store = Arc::new(MemoryStore::new());
        let client = SchedulerClient::new(store.clone(), Arc::new(NullAuditSink));
        (store, client)
    }

    #[tokio::test]
    async fn submit_returns_the_job_id() {
        let (store, client) = client();
        let job = Job::new("backup");
        let id = job.id.clone();
        assert_eq!(client.submit(job).await.unwrap(), id);
        assert!(store.get(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn submit_rejects_invalid_jobs() {
        let (_store, client) = client();

        let mut blank_type = Job::new("x");
        blank_type.job_type = "  ".into();
        assert!(client.submit(blank_type).await.is_err());

        let mut running = Job::new("backup");
        running.status = JobStatus::Running;
        assert!(client.submit(running).await.is_err());

        let mut bad_time = Job::new("backup");
        bad_time.scheduled_at = f64::NAN;
        assert!(client.submit(bad_time).await.is_err());
    }
}
