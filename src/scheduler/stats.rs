use std::collections::HashMap;

use crate::common::model::{Job, JobStats, JobStatus};

/// 基于全量任务快照聚合统计指标
///
/// 约定:
/// - success_rate = completed / (completed + failed) * 100，分母为 0 时为 0。
/// - average_execution_secs 只统计 Completed 任务，没有样本时为 0。
/// 两个指标永远是有限值，不会出现 NaN / Inf。
pub fn aggregate(jobs: &[Job]) -> JobStats {
    let mut by_status: HashMap<String, usize> = HashMap::new();
    let mut by_type: HashMap<String, usize> = HashMap::new();
    let mut completed = 0usize;
    let mut failed = 0usize;
    let mut exec_total = 0.0f64;
    let mut exec_samples = 0usize;

    for job in jobs {
        *by_status.entry(format!("{:?}", job.status)).or_default() += 1;
        *by_type.entry(job.job_type.clone()).or_default() += 1;

        match job.status {
            JobStatus::Completed => {
                completed += 1;
                if let Some(secs) = job.execution_secs() {
                    exec_total += secs;
                    exec_samples += 1;
                }
            }
            JobStatus::Failed => failed += 1,
            _ => {}
        }
    }

    let finished = completed + failed;
    let success_rate = if finished > 0 {
        completed as f64 / finished as f64 * 100.0
    } else {
        0.0
    };
    let average_execution_secs = if exec_samples > 0 {
        exec_total / exec_samples as f64
    } else {
        0.0
    };

    JobStats {
        total: jobs.len(),
        by_status,
        by_type,
        success_rate,
        average_execution_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished_job(status: JobStatus, exec: f64) -> Job {
        let mut job = Job::new("backup");
        job.status = status;
        job.started_at = Some(100.0);
        job.completed_at = Some(100.0 + exec);
        job
    }

    #[test]
    fn empty_store_yields_zeroes() {
        let stats = aggregate(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.average_execution_secs, 0.0);
    }

    #[test]
    fn success_rate_counts_only_finished_jobs() {
        let jobs = vec![
            finished_job(JobStatus::Completed, 2.0),
            finished_job(JobStatus::Completed, 4.0),
            finished_job(JobStatus::Failed, 1.0),
            Job::new("pending_one"),
        ];
        let stats = aggregate(&jobs);
        assert_eq!(stats.total, 4);
        assert!((stats.success_rate - 200.0 / 3.0).abs() < 1e-9);
        assert!((stats.average_execution_secs - 3.0).abs() < 1e-9);
        assert_eq!(stats.by_status.get("Completed"), Some(&2));
        assert_eq!(stats.by_type.get("backup"), Some(&3));
    }

    #[test]
    fn rate_stays_in_percentage_bounds() {
        let jobs = vec![finished_job(JobStatus::Failed, 1.0)];
        let stats = aggregate(&jobs);
        assert_eq!(stats.success_rate, 0.0);

        let jobs = vec![finished_job(JobStatus::Completed, 1.0)];
        let stats = aggregate(&jobs);
        assert_eq!(stats.success_rate, 100.0);
    }
}
