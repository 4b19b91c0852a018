//! 调度器端到端测试: 提交 -> 调度 -> 执行 -> 收尾

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chronod::common::model::{Job, JobStatus, JobTemplate, RecurringJob};
use chronod::policy::FixedDelay;
use chronod::{
    NullAuditSink, ScheduleEvaluator, Scheduler, SchedulerBuilder, SchedulerConfig, SchedulerError,
};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn dev_scheduler() -> Scheduler {
    init_tracing();
    SchedulerBuilder::new()
        .config(SchedulerConfig::new_dev())
        .retry_policy(Arc::new(FixedDelay::new(Duration::ZERO)))
        .audit(Arc::new(NullAuditSink))
        .build()
}

async fn wait_for_status(scheduler: &Scheduler, id: &str, status: JobStatus) -> Job {
    for _ in 0..200 {
        if let Some(job) = scheduler.get(id).await {
            if job.status == status {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {id} never reached {status:?}");
}

#[tokio::test]
async fn job_runs_to_completion_with_results() {
    let scheduler = dev_scheduler();
    scheduler.start();

    let job = Job::new("cleanup_logs").with_param("files", json!(["a.log", "b.log"]));
    let id = scheduler.submit(job).await.unwrap();

    let job = wait_for_status(&scheduler, &id, JobStatus::Completed).await;
    assert_eq!(
        job.results.get("files_removed").and_then(|v| v.as_u64()),
        Some(2)
    );
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());

    scheduler.shutdown();
}

#[tokio::test]
async fn unknown_job_type_fails_with_exact_message() {
    let scheduler = dev_scheduler();
    scheduler.start();

    let id = scheduler.submit(Job::new("does_not_exist")).await.unwrap();
    let job = wait_for_status(&scheduler, &id, JobStatus::Failed).await;
    assert_eq!(job.error.as_deref(), Some("Unknown job type"));

    scheduler.shutdown();
}

#[tokio::test]
async fn submitted_ids_are_unique() {
    let scheduler = dev_scheduler();
    let mut ids = std::collections::HashSet::new();
    for _ in 0..50 {
        let id = scheduler.submit(Job::new("health_check")).await.unwrap();
        assert!(ids.insert(id));
    }
}

#[tokio::test]
async fn cancel_applies_to_pending_but_not_finished() {
    let scheduler = dev_scheduler();

    // 未启动调度循环: 任务停在 Pending，可取消
    let far_future = Job::new("health_check").with_scheduled_at(f64::MAX / 2.0);
    let pending_id = scheduler.submit(far_future).await.unwrap();
    assert!(scheduler.cancel(&pending_id).await);
    // 重复取消无效
    assert!(!scheduler.cancel(&pending_id).await);

    scheduler.start();
    let done_id = scheduler.submit(Job::new("health_check")).await.unwrap();
    let job = wait_for_status(&scheduler, &done_id, JobStatus::Completed).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert!(!scheduler.cancel(&done_id).await);

    scheduler.shutdown();
}

#[tokio::test]
async fn pause_holds_a_job_until_resumed() {
    let scheduler = dev_scheduler();
    scheduler.start();

    let job = Job::new("health_check").with_scheduled_at(f64::MAX / 2.0);
    let id = scheduler.submit(job).await.unwrap();
    assert!(scheduler.pause(&id).await);

    // 暂停的任务不会被调度
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        scheduler.get(&id).await.map(|j| j.status),
        Some(JobStatus::Paused)
    );

    // 恢复后把计划时间改到现在，正常执行
    assert!(scheduler.resume(&id).await);
    assert!(!scheduler.resume(&id).await);

    scheduler.shutdown();
}

#[tokio::test]
async fn explicit_retry_reruns_a_failed_job() {
    let flips = Arc::new(AtomicUsize::new(0));
    let flips_in_handler = flips.clone();
    let scheduler = SchedulerBuilder::new()
        .config(SchedulerConfig::new_dev())
        .retry_policy(Arc::new(FixedDelay::new(Duration::ZERO)))
        .audit(Arc::new(NullAuditSink))
        .handler_fn("flaky", move |_ctx: chronod::JobContext| {
            let flips = flips_in_handler.clone();
            async move {
                if flips.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("first attempt fails");
                }
                Ok(chronod::JsonMap::new())
            }
        })
        .build();
    scheduler.start();

    let id = scheduler
        .submit(Job::new("flaky").with_max_retries(2))
        .await
        .unwrap();
    let failed = wait_for_status(&scheduler, &id, JobStatus::Failed).await;
    assert_eq!(failed.retry_count, 0);

    assert!(scheduler.retry(&id).await);
    let done = wait_for_status(&scheduler, &id, JobStatus::Completed).await;
    assert_eq!(done.retry_count, 1);

    // 终态不可重试
    assert!(!scheduler.retry(&id).await);

    scheduler.shutdown();
}

#[tokio::test]
async fn stats_report_rates_within_bounds() {
    let scheduler = dev_scheduler();
    scheduler.start();

    let ok = scheduler.submit(Job::new("health_check")).await.unwrap();
    let bad = scheduler.submit(Job::new("nope")).await.unwrap();
    wait_for_status(&scheduler, &ok, JobStatus::Completed).await;
    wait_for_status(&scheduler, &bad, JobStatus::Failed).await;

    let stats = scheduler.stats().await;
    assert_eq!(stats.total, 2);
    assert!((0.0..=100.0).contains(&stats.success_rate));
    assert!((stats.success_rate - 50.0).abs() < 1e-9);
    assert!(stats.average_execution_secs >= 0.0);
    assert_eq!(stats.by_status.get("Completed"), Some(&1));
    assert_eq!(stats.by_status.get("Failed"), Some(&1));

    scheduler.shutdown();
}

#[tokio::test]
async fn recurring_job_fires_one_instance_per_occurrence() {
    let scheduler = dev_scheduler();
    scheduler.start();

    let rec = RecurringJob::new("@every 2s", JobTemplate::new("health_check"));
    let rec_id = scheduler.add_recurring(rec).await.unwrap();

    tokio::time::sleep(Duration::from_millis(2600)).await;

    let instances: Vec<_> = scheduler
        .list()
        .await
        .into_iter()
        .filter(|j| j.metadata.get("recurring_id").map(String::as_str) == Some(rec_id.as_str()))
        .collect();
    assert_eq!(instances.len(), 1, "exactly one instance per firing");

    let rec = scheduler.get_recurring(&rec_id).await.unwrap();
    assert!(rec.enabled);
    assert!(rec.last_run.is_some());
    assert!(rec.next_run > rec.last_run.unwrap_or_default());

    scheduler.shutdown();
}

#[tokio::test]
async fn invalid_schedule_is_rejected_at_registration() {
    let scheduler = dev_scheduler();
    let rec = RecurringJob::new("definitely not cron", JobTemplate::new("health_check"));
    match scheduler.add_recurring(rec).await {
        Err(SchedulerError::InvalidSchedule(_)) => {}
        other => panic!("expected InvalidSchedule, got {other:?}"),
    }
}

/// 注册后才开始失败的求值器: 触发 fail-closed 路径
struct FlakyEvaluator {
    calls: AtomicUsize,
}

impl ScheduleEvaluator for FlakyEvaluator {
    fn next_after(
        &self,
        _descriptor: &str,
        _timezone: Option<&str>,
        after: f64,
    ) -> anyhow::Result<f64> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(after + 0.2)
        } else {
            anyhow::bail!("evaluator broke at runtime")
        }
    }
}

#[tokio::test]
async fn failing_evaluator_disables_the_recurring_job() {
    let scheduler = SchedulerBuilder::new()
        .config(SchedulerConfig::new_dev())
        .evaluator(Arc::new(FlakyEvaluator {
            calls: AtomicUsize::new(0),
        }))
        .audit(Arc::new(NullAuditSink))
        .build();
    scheduler.start();

    let rec = RecurringJob::new("@every 1s", JobTemplate::new("health_check"));
    let rec_id = scheduler.add_recurring(rec).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;

    let rec = scheduler.get_recurring(&rec_id).await.unwrap();
    assert!(!rec.enabled, "fail-closed: job must be disabled");
    assert!(
        rec.last_error
            .as_deref()
            .unwrap_or_default()
            .contains("evaluator broke")
    );
    // 失败的那次触发没有生成任务
    assert!(scheduler.list().await.is_empty());

    scheduler.shutdown();
}

#[tokio::test]
async fn shutdown_refuses_new_submissions() {
    let scheduler = dev_scheduler();
    scheduler.shutdown();
    match scheduler.submit(Job::new("health_check")).await {
        Err(SchedulerError::SchedulerShutdown) => {}
        other => panic!("expected SchedulerShutdown, got {other:?}"),
    }
}
