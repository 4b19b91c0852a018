use std::future::Future;
use std::sync::{Arc, atomic::AtomicBool};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::client::SchedulerClient;
use super::core::{Scheduler, SchedulerInner};
use crate::audit::LogAuditSink;
use crate::common::config::SchedulerConfig;
use crate::common::model::JsonMap;
use crate::common::time::CronEvaluator;
use crate::common::traits::{AuditSink, ScheduleEvaluator};
use crate::executor::{
    HandlerRegistry, JobContext, JobExecutor, JobHandler, register_builtin_handlers,
};
use crate::policy::{ExponentialBackoff, RetryPolicy};
use crate::store::{JobStore, MemoryStore, RecurringJobStore};
use crate::workflow::{WORKFLOW_JOB_TYPE, WorkflowEngine};

// ==========================================
// 调度器构建器 (SchedulerBuilder)
// ==========================================

/// 调度器构建器
///
/// 所有槽位都有可用的默认值: 内存存储、Cron 求值器、指数退避重试、
/// 日志审计、内置处理器全家桶、启用工作流引擎。
///
/// ```ignore
/// let scheduler = SchedulerBuilder::new()
///     .config(SchedulerConfig::new_dev())
///     .build();
/// scheduler.start();
/// ```
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    jobs: Option<Arc<dyn JobStore>>,
    recurring: Option<Arc<dyn RecurringJobStore>>,
    evaluator: Option<Arc<dyn ScheduleEvaluator>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    audit: Option<Arc<dyn AuditSink>>,
    registry: HandlerRegistry,
    shutdown: Option<CancellationToken>,
    workflows: bool,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        let mut registry = HandlerRegistry::new();
        register_builtin_handlers(&mut registry);
        Self {
            config: SchedulerConfig::default(),
            jobs: None,
            recurring: None,
            evaluator: None,
            retry_policy: None,
            audit: None,
            registry,
            shutdown: None,
            workflows: true,
        }
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// 同时指定任务与循环任务的存储后端
    pub fn persistence<P>(mut self, store: Arc<P>) -> Self
    where
        P: JobStore + RecurringJobStore,
    {
        self.jobs = Some(store.clone());
        self.recurring = Some(store);
        self
    }

    pub fn job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.jobs = Some(store);
        self
    }

    pub fn recurring_store(mut self, store: Arc<dyn RecurringJobStore>) -> Self {
        self.recurring = Some(store);
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn ScheduleEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// 外部关机令牌 (嵌入宿主进程的生命周期管理)
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// 是否启用工作流引擎 (默认启用)
    pub fn workflows(mut self, enabled: bool) -> Self {
        self.workflows = enabled;
        self
    }

    /// 注册自定义处理器
    pub fn handler(mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.registry.register(job_type, handler);
        self
    }

    /// 用闭包注册自定义处理器
    pub fn handler_fn<F, Fut>(mut self, job_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<JsonMap>> + Send + 'static,
    {
        self.registry.register_fn(job_type, f);
        self
    }

    pub fn build(self) -> Scheduler {
        let config = self.config;

        let (jobs, recurring): (Arc<dyn JobStore>, Arc<dyn RecurringJobStore>) =
            match (self.jobs, self.recurring) {
                (Some(jobs), Some(recurring)) => (jobs, recurring),
                (Some(jobs), None) => (jobs, Arc::new(MemoryStore::new())),
                (None, Some(recurring)) => (Arc::new(MemoryStore::new()), recurring),
                (None, None) => {
                    let store = Arc::new(MemoryStore::new());
                    (store.clone(), store)
                }
            };

        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(LogAuditSink));
        let evaluator = self
            .evaluator
            .unwrap_or_else(|| Arc::new(CronEvaluator));
        let retry_policy = self.retry_policy.unwrap_or_else(|| {
            Arc::new(ExponentialBackoff::new(
                config.retry_base_delay_secs,
                config.retry_max_delay_secs,
            ))
        });
        let shutdown = self.shutdown.unwrap_or_default();

        let client = SchedulerClient::new(jobs.clone(), audit.clone());

        // 工作流引擎: 以普通 Handler 的身份挂在 workflow_execution 类型上
        let mut registry = self.registry;
        let workflows = if self.workflows {
            let engine = WorkflowEngine::new(client.clone(), audit.clone());
            let handler_engine = engine.clone();
            registry.register_fn(WORKFLOW_JOB_TYPE, move |ctx: JobContext| {
                let engine = handler_engine.clone();
                async move { engine.run_from_job(ctx).await }
            });
            Some(engine)
        } else {
            None
        };

        let executor = Arc::new(JobExecutor::new(
            jobs.clone(),
            registry,
            audit.clone(),
            config.default_timeout_ms,
            shutdown.clone(),
        ));

        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.queue_capacity.max(1));

        Scheduler::from_inner(Arc::new(SchedulerInner {
            config,
            jobs,
            recurring,
            evaluator,
            retry_policy,
            audit,
            executor,
            client,
            workflows,
            dispatch_tx,
            dispatch_rx: Mutex::new(Some(dispatch_rx)),
            paused: Arc::new(AtomicBool::new(false)),
            shutdown,
        }))
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
