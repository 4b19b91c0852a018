use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, warn};

use crate::common::error::Result;
use crate::common::model::{AuditEvent, Job, JsonMap};
use crate::common::traits::AuditSink;
use crate::executor::JobContext;
use crate::scheduler::SchedulerClient;

use super::model::{ExecutionStatus, WorkflowDefinition, WorkflowExecution};
use super::store::WorkflowStore;
use super::walker::StepWalker;

/// 工作流载体任务的类型名
///
/// 一次工作流执行对应恰好一个这种类型的任务，
/// 工作流因此免费获得调度器的全部能力 (排队、超时、审计)。
pub const WORKFLOW_JOB_TYPE: &str = "workflow_execution";

// ==========================================
// 1. 步骤动作 (StepAction)
// ==========================================

/// 步骤动作
///
/// 工作流侧的 Handler: 拿到步骤参数和变量快照 (只读)，
/// 返回的输出会被合并进执行实例的变量。
#[async_trait]
pub trait StepAction: Send + Sync + 'static {
    async fn run(&self, params: JsonMap, vars: JsonMap) -> anyhow::Result<JsonMap>;
}

struct FnAction<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> StepAction for FnAction<F>
where
    F: Fn(JsonMap, JsonMap) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<JsonMap>> + Send + 'static,
{
    async fn run(&self, params: JsonMap, vars: JsonMap) -> anyhow::Result<JsonMap> {
        (self.f)(params, vars).await
    }
}

/// 动作注册表，写时复制，读路径零锁
#[derive(Clone, Default)]
pub struct ActionRegistry {
    routes: Arc<HashMap<String, Arc<dyn StepAction>, ahash::RandomState>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, action: Arc<dyn StepAction>) {
        let mut routes = Arc::try_unwrap(std::mem::take(&mut self.routes))
            .unwrap_or_else(|shared| (*shared).clone());
        routes.insert(name.into(), action);
        self.routes = Arc::new(routes);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StepAction>> {
        self.routes.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }
}

// ==========================================
// 2. 工作流引擎 (WorkflowEngine)
// ==========================================

struct EngineInner {
    store: WorkflowStore,
    actions: RwLock<ActionRegistry>,
    client: SchedulerClient,
    audit: Arc<dyn AuditSink>,
}

/// 工作流引擎
///
/// 定义 CRUD + 启动执行 + 执行实例管理。执行本身不在引擎里跑:
/// `execute` 只投递一个 workflow_execution 载体任务，真正的步骤遍历
/// 发生在调度器 Worker 里 (run_from_job -> StepWalker)。
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl WorkflowEngine {
    pub fn new(client: SchedulerClient, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store: WorkflowStore::new(),
                actions: RwLock::new(ActionRegistry::new()),
                client,
                audit,
            }),
        }
    }

    // ==========================================
    // 2.1 动作注册
    // ==========================================

    pub fn register_action(&self, name: impl Into<String>, action: Arc<dyn StepAction>) {
        self.inner.actions.write().register(name, action);
    }

    pub fn register_action_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(JsonMap, JsonMap) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<JsonMap>> + Send + 'static,
    {
        self.register_action(name, Arc::new(FnAction { f }));
    }

    // ==========================================
    // 2.2 定义 CRUD
    // ==========================================

    /// 注册工作流定义，步骤 ID 必须在定义内唯一
    pub fn create_workflow(&self, def: WorkflowDefinition) -> Result<String> {
        let mut seen = std::collections::HashSet::new();
        for step in &def.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(crate::common::error::SchedulerError::Config(format!(
                    "duplicate step id in workflow {}: {}",
                    def.name, step.id
                )));
            }
        }
        let id = def.id.clone();
        self.inner.store.insert_definition(def)?;
        self.inner
            .audit
            .record(AuditEvent::new("workflow_created", &id, "definition stored"));
        Ok(id)
    }

    pub fn get_workflow(&self, id: &str) -> Option<WorkflowDefinition> {
        self.inner.store.get_definition(id)
    }

    pub fn list_workflows(&self) -> Vec<WorkflowDefinition> {
        self.inner.store.list_definitions()
    }

    pub fn update_workflow(&self, def: WorkflowDefinition) -> bool {
        self.inner.store.update_definition(def)
    }

    pub fn delete_workflow(&self, id: &str) -> bool {
        self.inner.store.remove_definition(id)
    }

    // ==========================================
    // 2.3 执行
    // ==========================================

    /// 启动一次执行
    ///
    /// 定义存在且启用时: 生成 Pending 执行实例 + 投递一个载体任务，
    /// 返回 true。其余情况一律 false，无副作用。
    pub async fn execute(&self, workflow_id: &str, inputs: JsonMap) -> bool {
        let Some(def) = self.inner.store.get_definition(workflow_id) else {
            debug!(workflow_id, "execute refused: unknown workflow");
            return false;
        };
        if !def.enabled {
            debug!(workflow_id, "execute refused: workflow disabled");
            return false;
        }

        let exec = WorkflowExecution::seed(&def, inputs.clone());
        let execution_id = exec.id.clone();
        if self.inner.store.insert_execution(exec).is_err() {
            return false;
        }

        // 载体任务不设超时: 暂停的执行要能驻留任意久，步骤各自有超时
        let job = Job::new(WORKFLOW_JOB_TYPE)
            .with_name(format!("workflow:{}", def.name))
            .with_timeout_ms(0)
            .with_param("workflow_id", workflow_id)
            .with_param("execution_id", execution_id.as_str())
            .with_param("inputs", serde_json::Value::Object(inputs));

        match self.inner.client.submit(job).await {
            Ok(_) => {
                self.inner.audit.record(AuditEvent::new(
                    "workflow_started",
                    &execution_id,
                    format!("execution of workflow {workflow_id} submitted"),
                ));
                true
            }
            Err(err) => {
                warn!(workflow_id, error = %err, "carrier job submission failed");
                self.inner
                    .store
                    .fail_execution(&execution_id, &format!("submission failed: {err}"));
                false
            }
        }
    }

    pub fn get_execution(&self, id: &str) -> Option<WorkflowExecution> {
        self.inner.store.get_execution(id)
    }

    pub fn executions_for(&self, workflow_id: &str) -> Vec<WorkflowExecution> {
        self.inner.store.executions_for(workflow_id)
    }

    /// 暂停执行 (Running -> Paused)，遍历器在步骤间驻留等待
    pub fn pause_execution(&self, id: &str) -> bool {
        let paused = self.inner.store.pause_execution(id);
        if paused {
            self.inner
                .audit
                .record(AuditEvent::new("workflow_paused", id, "paused"));
        }
        paused
    }

    /// 恢复执行 (Paused -> Running)
    pub fn resume_execution(&self, id: &str) -> bool {
        let resumed = self.inner.store.resume_execution(id);
        if resumed {
            self.inner
                .audit
                .record(AuditEvent::new("workflow_resumed", id, "resumed"));
        }
        resumed
    }

    /// 取消执行，遍历器在下一个步骤边界停下
    pub fn cancel_execution(&self, id: &str) -> bool {
        let cancelled = self.inner.store.cancel_execution(id);
        if cancelled {
            self.inner
                .audit
                .record(AuditEvent::new("workflow_cancelled", id, "cancelled"));
        }
        cancelled
    }

    // ==========================================
    // 2.4 载体任务入口
    // ==========================================

    /// workflow_execution 载体任务的 Handler 实现
    ///
    /// 执行失败向上抛 Err，让载体任务进入 Failed；
    /// 执行被取消不算失败，载体任务正常完成。
    pub async fn run_from_job(&self, ctx: JobContext) -> anyhow::Result<JsonMap> {
        let execution_id = ctx
            .param("execution_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing execution_id param"))?
            .to_string();

        let Some(exec) = self.inner.store.get_execution(&execution_id) else {
            anyhow::bail!("execution not found: {execution_id}");
        };
        let Some(def) = self.inner.store.get_definition(&exec.workflow_id) else {
            let msg = format!("workflow definition not found: {}", exec.workflow_id);
            self.inner.store.fail_execution(&execution_id, &msg);
            anyhow::bail!(msg);
        };

        // CAS 失败说明实例已被提前取消
        if !self.inner.store.mark_execution_running(&execution_id) {
            return Ok(outcome(&execution_id, "skipped"));
        }

        // 定义快照在这一刻固定，之后的定义修改不影响本次执行
        let actions = self.inner.actions.read().clone();
        let walker = StepWalker::new(
            self.inner.store.clone(),
            actions,
            execution_id.clone(),
            &def,
            exec.variables,
            ctx.cancellation().clone(),
        );

        match walker.walk().await {
            Ok(outputs) => {
                self.inner.store.complete_execution(&execution_id, outputs);
                self.inner.audit.record(AuditEvent::new(
                    "workflow_completed",
                    &execution_id,
                    "all steps finished",
                ));
                Ok(outcome(&execution_id, "completed"))
            }
            Err(err) => {
                // 取消不是失败
                if self.inner.store.execution_status(&execution_id)
                    == Some(ExecutionStatus::Cancelled)
                {
                    return Ok(outcome(&execution_id, "cancelled"));
                }
                let msg = format!("{err:#}");
                self.inner.store.fail_execution(&execution_id, &msg);
                self.inner.audit.record(AuditEvent::new(
                    "workflow_failed",
                    &execution_id,
                    msg.clone(),
                ));
                Err(err)
            }
        }
    }
}

fn outcome(execution_id: &str, status: &str) -> JsonMap {
    let mut map = JsonMap::new();
    map.insert("execution_id".into(), json!(execution_id));
    map.insert("status".into(), json!(status));
    map
}
