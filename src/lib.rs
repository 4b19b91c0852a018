// 1. 基础模块
pub mod common;

// 2. 策略与存储
pub mod policy;
pub mod store;

// 3. 执行与审计
pub mod audit;
pub mod executor;

// 4. 调度器核心
pub mod scheduler;

// 5. 工作流
pub mod workflow;

pub use audit::{LogAuditSink, NullAuditSink};
pub use common::{
    AuditEvent, AuditSink, CronEvaluator, Job, JobPriority, JobStats, JobStatus, JobTemplate,
    JsonMap, RecurringJob, Result, ScheduleEvaluator, SchedulerConfig, SchedulerError,
};
pub use executor::{HandlerRegistry, JobContext, JobHandler};
pub use policy::{ExponentialBackoff, FixedDelay, RetryPolicy};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerClient};
pub use store::{JobStore, MemoryStore, RecurringJobStore};
pub use workflow::{
    ExecutionStatus, StepAction, StepStatus, StepType, WORKFLOW_JOB_TYPE, WorkflowDefinition,
    WorkflowEngine, WorkflowExecution, WorkflowStep,
};
