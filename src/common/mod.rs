//! 公共基础层: 数据模型、错误、配置、时间与工具函数

pub mod config;
pub mod error;
pub mod model;
pub mod time;
pub mod traits;
pub mod utils;

pub use config::SchedulerConfig;
pub use error::{Result, SchedulerError};
pub use model::{
    AuditEvent, Job, JobPriority, JobStats, JobStatus, JobTemplate, JsonMap, RecurringJob,
};
pub use time::{CronEvaluator, TimeUtils};
pub use traits::{AuditSink, ScheduleEvaluator};
pub use utils::{calculate_backoff, new_job_id};
