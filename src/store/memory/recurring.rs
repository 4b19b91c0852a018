use async_trait::async_trait;
use dashmap::mapref::entry::Entry;

use super::MemoryStore;
use crate::common::error::{Result, SchedulerError};
use crate::common::model::RecurringJob;
use crate::store::traits::RecurringJobStore;

#[async_trait]
impl RecurringJobStore for MemoryStore {
    async fn insert_recurring(&self, job: RecurringJob) -> Result<()> {
        match self.recurring.entry(job.id.clone()) {
            Entry::Occupied(_) => Err(SchedulerError::Persistence(format!(
                "duplicate recurring job id: {}",
                job.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(job);
                Ok(())
            }
        }
    }

    async fn get_recurring(&self, id: &str) -> Result<Option<RecurringJob>> {
        Ok(self.recurring.get(id).map(|r| r.clone()))
    }

    async fn list_recurring(&self) -> Result<Vec<RecurringJob>> {
        Ok(self.recurring.iter().map(|r| r.clone()).collect())
    }

    async fn remove_recurring(&self, id: &str) -> Result<bool> {
        Ok(self.recurring.remove(id).is_some())
    }

    async fn set_recurring_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        match self.recurring.get_mut(id) {
            Some(mut job) => {
                job.enabled = enabled;
                if enabled {
                    // 重新启用时清掉上一次的调度错误
                    job.last_error = None;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn due_recurring(&self, now: f64) -> Result<Vec<RecurringJob>> {
        let mut due: Vec<RecurringJob> = self
            .recurring
            .iter()
            .filter(|r| r.enabled && r.next_run <= now)
            .map(|r| r.clone())
            .collect();
        due.sort_by(|a, b| a.next_run.total_cmp(&b.next_run));
        Ok(due)
    }

    async fn mark_fired(&self, id: &str, last_run: f64, next_run: f64) -> Result<bool> {
        match self.recurring.get_mut(id) {
            Some(mut job) => {
                job.last_run = Some(last_run);
                job.next_run = next_run;
                job.last_error = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_next_run(&self, id: &str, next_run: f64) -> Result<bool> {
        match self.recurring.get_mut(id) {
            Some(mut job) => {
                job.next_run = next_run;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn disable_with_error(&self, id: &str, error: &str) -> Result<bool> {
        match self.recurring.get_mut(id) {
            Some(mut job) => {
                job.enabled = false;
                job.last_error = Some(error.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TimeUtils;
    use crate::common::model::JobTemplate;

    #[tokio::test]
    async fn due_recurring_skips_disabled() {
        let store = MemoryStore::new();
        let now = TimeUtils::now_f64();

        let mut active = RecurringJob::new("@every 1s", JobTemplate::new("backup"));
        active.next_run = now - 1.0;
        let active_id = active.id.clone();

        let mut disabled = RecurringJob::new("@every 1s", JobTemplate::new("backup"));
        disabled.next_run = now - 1.0;
        disabled.enabled = false;

        store.insert_recurring(active).await.unwrap();
        store.insert_recurring(disabled).await.unwrap();

        let due = store.due_recurring(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, active_id);
    }

    #[tokio::test]
    async fn disable_with_error_records_reason() {
        let store = MemoryStore::new();
        let job = RecurringJob::new("bogus", JobTemplate::new("backup"));
        let id = job.id.clone();
        store.insert_recurring(job).await.unwrap();

        assert!(store.disable_with_error(&id, "invalid cron").await.unwrap());
        let job = store.get_recurring(&id).await.unwrap().unwrap();
        assert!(!job.enabled);
        assert_eq!(job.last_error.as_deref(), Some("invalid cron"));

        // 重新启用时错误被清除
        assert!(store.set_recurring_enabled(&id, true).await.unwrap());
        let job = store.get_recurring(&id).await.unwrap().unwrap();
        assert!(job.enabled);
        assert!(job.last_error.is_none());
    }
}
