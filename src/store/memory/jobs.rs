use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use tokio::sync::Notify;

use super::MemoryStore;
use crate::common::TimeUtils;
use crate::common::error::{Result, SchedulerError};
use crate::common::model::{Job, JobStatus, JsonMap};
use crate::store::traits::JobStore;

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, job: Job) -> Result<()> {
        let key = Self::pending_key(job.scheduled_at, &job.id);
        let pending_visible = job.status == JobStatus::Pending;
        match self.jobs.entry(job.id.clone()) {
            Entry::Occupied(_) => {
                return Err(SchedulerError::Persistence(format!(
                    "duplicate job id: {}",
                    job.id
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(job);
            }
        }
        if pending_visible {
            self.pending.lock().insert(key, ());
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.get(id).map(|j| j.clone()))
    }

    async fn list(&self) -> Result<Vec<Job>> {
        Ok(self.jobs.iter().map(|j| j.clone()).collect())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        match self.jobs.remove(id) {
            Some((_, job)) => {
                if job.status == JobStatus::Pending {
                    self.pending
                        .lock()
                        .remove(&Self::pending_key(job.scheduled_at, id));
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn due_pending(&self, now: f64, limit: usize) -> Result<Vec<Job>> {
        let upper = ((now * 1000.0) as u64, String::from("\u{10FFFF}"));
        let mut due: Vec<Job> = Vec::new();
        {
            let mut pending = self.pending.lock();
            // 先切出到期键，再逐个回查主数据
            let candidates: Vec<(u64, String)> = pending
                .range(..=upper)
                .map(|(k, _)| k.clone())
                .collect();

            for key in candidates {
                match self.jobs.get(&key.1) {
                    Some(job) if job.status == JobStatus::Pending => {
                        // 毫秒截断可能让略未到期的键落进范围，保留索引项即可
                        if job.scheduled_at <= now {
                            due.push(job.clone());
                        }
                    }
                    // 任务不在了或状态变了，索引项失效，顺手清掉
                    _ => {
                        pending.remove(&key);
                    }
                }
            }
        }

        // 优先级从高到低，同优先级先到期先跑
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_at.total_cmp(&b.scheduled_at))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn mark_scheduled(&self, id: &str) -> Result<bool> {
        let mut claimed_key = None;
        if let Some(mut job) = self.jobs.get_mut(id) {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Scheduled;
                claimed_key = Some(Self::pending_key(job.scheduled_at, id));
            }
        }
        match claimed_key {
            Some(key) => {
                self.pending.lock().remove(&key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn requeue(&self, id: &str, at: f64) -> Result<bool> {
        let mut requeued = false;
        if let Some(mut job) = self.jobs.get_mut(id) {
            if job.status == JobStatus::Scheduled {
                job.status = JobStatus::Pending;
                job.scheduled_at = at;
                requeued = true;
            }
        }
        if requeued {
            self.pending.lock().insert(Self::pending_key(at, id), ());
            self.notify.notify_one();
        }
        Ok(requeued)
    }

    async fn mark_running(&self, id: &str) -> Result<Option<Job>> {
        let mut snapshot = None;
        let mut stale_key = None;
        if let Some(mut job) = self.jobs.get_mut(id) {
            if matches!(job.status, JobStatus::Pending | JobStatus::Scheduled) {
                if job.status == JobStatus::Pending {
                    stale_key = Some(Self::pending_key(job.scheduled_at, id));
                }
                job.status = JobStatus::Running;
                job.started_at = Some(TimeUtils::now_f64());
                snapshot = Some(job.clone());
            }
        }
        if let Some(key) = stale_key {
            self.pending.lock().remove(&key);
        }
        Ok(snapshot)
    }

    async fn complete(&self, id: &str, results: JsonMap) -> Result<bool> {
        if let Some(mut job) = self.jobs.get_mut(id) {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Completed;
                job.completed_at = Some(TimeUtils::now_f64());
                job.results = results;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn fail(&self, id: &str, error: &str) -> Result<bool> {
        if let Some(mut job) = self.jobs.get_mut(id) {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Failed;
                job.completed_at = Some(TimeUtils::now_f64());
                job.error = Some(error.to_string());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn cancel(&self, id: &str) -> Result<bool> {
        let mut stale_key = None;
        let mut cancelled = false;
        if let Some(mut job) = self.jobs.get_mut(id) {
            if matches!(job.status, JobStatus::Pending | JobStatus::Scheduled) {
                if job.status == JobStatus::Pending {
                    stale_key = Some(Self::pending_key(job.scheduled_at, id));
                }
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(TimeUtils::now_f64());
                cancelled = true;
            }
        }
        if let Some(key) = stale_key {
            self.pending.lock().remove(&key);
        }
        Ok(cancelled)
    }

    async fn pause(&self, id: &str) -> Result<bool> {
        let mut stale_key = None;
        if let Some(mut job) = self.jobs.get_mut(id) {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Paused;
                stale_key = Some(Self::pending_key(job.scheduled_at, id));
            }
        }
        match stale_key {
            Some(key) => {
                self.pending.lock().remove(&key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn resume(&self, id: &str) -> Result<bool> {
        let mut resumed_key = None;
        if let Some(mut job) = self.jobs.get_mut(id) {
            if job.status == JobStatus::Paused {
                job.status = JobStatus::Pending;
                resumed_key = Some(Self::pending_key(job.scheduled_at, id));
            }
        }
        match resumed_key {
            Some(key) => {
                self.pending.lock().insert(key, ());
                self.notify.notify_one();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn retry(&self, id: &str, delay: Duration) -> Result<bool> {
        let mut retried_key = None;
        if let Some(mut job) = self.jobs.get_mut(id) {
            if job.can_retry() {
                job.status = JobStatus::Pending;
                job.retry_count += 1;
                // 至少前移 1ms: 零延迟策略下新的 scheduled_at 也要严格晚于调用时刻
                job.scheduled_at = TimeUtils::now_f64() + delay.as_secs_f64().max(0.001);
                job.started_at = None;
                job.completed_at = None;
                job.error = None;
                retried_key = Some(Self::pending_key(job.scheduled_at, id));
            }
        }
        match retried_key {
            Some(key) => {
                self.pending.lock().insert(key, ());
                self.notify.notify_one();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}
