use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::bail;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::common::TimeUtils;
use crate::common::model::JsonMap;
use crate::common::utils::new_job_id;

use super::condition;
use super::engine::ActionRegistry;
use super::model::{
    ExecutionStatus, StepExecution, StepStatus, StepType, WorkflowDefinition, WorkflowStep,
};
use super::store::WorkflowStore;

/// 防御畸形环路的全局步骤访问上限
const MAX_STEP_VISITS: usize = 10_000;

/// 步骤默认超时 (Loop 步骤是迭代总预算)
const DEFAULT_STEP_TIMEOUT_MS: u64 = 60_000;

/// 暂停驻留时的轮询间隔
const PAUSE_POLL_MS: u64 = 50;

// ==========================================
// 步骤遍历器 (StepWalker)
// ==========================================

/// 步骤遍历器
///
/// 一次工作流执行的遍历现场。步骤表在构造时快照，
/// 执行期间对定义的修改不会被看到。
///
/// 步骤间的观察点 (gate):
/// - 执行被取消 -> 遍历立即停止。
/// - 执行被暂停 -> 驻留等待恢复或取消。
pub(super) struct StepWalker {
    store: WorkflowStore,
    actions: ActionRegistry,
    execution_id: String,
    /// 定义快照: 步骤 ID -> 步骤
    steps: HashMap<String, WorkflowStep>,
    /// 入口 (有序步骤列表的第一个)
    entry: Option<String>,
    /// 执行变量，动作输出不断合并进来
    vars: Mutex<JsonMap>,
    visits: AtomicUsize,
    /// 载体任务的取消令牌 (关机联动)
    cancel: CancellationToken,
}

impl StepWalker {
    pub(super) fn new(
        store: WorkflowStore,
        actions: ActionRegistry,
        execution_id: String,
        definition: &WorkflowDefinition,
        variables: JsonMap,
        cancel: CancellationToken,
    ) -> Self {
        let entry = definition.entry_step().map(|s| s.id.clone());
        let steps = definition
            .steps
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();
        Self {
            store,
            actions,
            execution_id,
            steps,
            entry,
            vars: Mutex::new(variables),
            visits: AtomicUsize::new(0),
            cancel,
        }
    }

    /// 从入口遍历到底，返回变量终态作为执行输出
    pub(super) async fn walk(&self) -> anyhow::Result<JsonMap> {
        if let Some(entry) = self.entry.clone() {
            self.walk_chain(entry).await?;
        }
        Ok(self.vars.lock().clone())
    }

    /// 沿 next_steps 链走一条路径 (Parallel 分支会递归进来)
    fn walk_chain(&self, start: String) -> BoxFuture<'_, anyhow::Result<()>> {
        async move {
            let mut current = Some(start);
            while let Some(step_id) = current.take() {
                self.gate().await?;
                if self.visits.fetch_add(1, Ordering::Relaxed) >= MAX_STEP_VISITS {
                    bail!("step visit cap ({MAX_STEP_VISITS}) exceeded, aborting walk");
                }
                let Some(step) = self.steps.get(&step_id) else {
                    bail!("unknown step id: {step_id}");
                };

                match step.step_type {
                    StepType::Action => {
                        self.run_action_step(step).await?;
                        current = step.next_steps.first().cloned();
                    }
                    StepType::Loop => {
                        self.run_loop_step(step).await?;
                        current = step.next_steps.first().cloned();
                    }
                    StepType::Condition => {
                        current = self.run_condition_step(step).await?;
                    }
                    StepType::Parallel => {
                        self.run_parallel_step(step).await?;
                        // 分支各自走到尽头，汇合即收尾
                        current = None;
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    // ==========================================
    // 1. 各类步骤
    // ==========================================

    async fn run_action_step(&self, step: &WorkflowStep) -> anyhow::Result<()> {
        let started = TimeUtils::now_f64();

        // 守卫条件: 为假跳过，畸形表达式 fail-closed
        if let Some(cond) = &step.condition {
            let vars = self.vars.lock().clone();
            match condition::evaluate(cond, &vars) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(step_id = %step.id, "guard false, step skipped");
                    self.record(step, StepStatus::Skipped, started, JsonMap::new(), None, 0);
                    return Ok(());
                }
                Err(err) => {
                    return self.step_failed(step, started, 0, format!("guard error: {err:#}"));
                }
            }
        }

        let Some(action) = self.actions.get(&step.action) else {
            return self.step_failed(step, started, 0, format!("Unknown action: {}", step.action));
        };

        let vars = self.vars.lock().clone();
        let timeout_ms = step.timeout_ms.unwrap_or(DEFAULT_STEP_TIMEOUT_MS);
        let outcome = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            action.run(step.params.clone(), vars),
        )
        .await;

        match outcome {
            Ok(Ok(outputs)) => {
                self.merge_outputs(&outputs);
                self.record(step, StepStatus::Completed, started, outputs, None, 0);
                Ok(())
            }
            Ok(Err(err)) => self.step_failed(step, started, 0, format!("{err:#}")),
            Err(_) => self.step_failed(
                step,
                started,
                0,
                format!("Step timed out after {timeout_ms}ms"),
            ),
        }
    }

    /// Loop: 条件成立期间反复执行动作，总时长受步骤超时预算约束
    async fn run_loop_step(&self, step: &WorkflowStep) -> anyhow::Result<()> {
        let started = TimeUtils::now_f64();
        let Some(cond) = step.condition.clone() else {
            return self.step_failed(step, started, 0, "loop step requires a condition".into());
        };
        let Some(action) = self.actions.get(&step.action) else {
            return self.step_failed(step, started, 0, format!("Unknown action: {}", step.action));
        };

        let budget_ms = step.timeout_ms.unwrap_or(DEFAULT_STEP_TIMEOUT_MS);
        let deadline = tokio::time::Instant::now() + Duration::from_millis(budget_ms);
        let mut iterations: u32 = 0;

        loop {
            self.gate().await?;
            let vars = self.vars.lock().clone();
            match condition::evaluate(&cond, &vars) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    return self.step_failed(
                        step,
                        started,
                        iterations,
                        format!("loop condition error: {err:#}"),
                    );
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                debug!(step_id = %step.id, iterations, "loop budget exhausted");
                break;
            }
            match tokio::time::timeout(remaining, action.run(step.params.clone(), vars)).await {
                Ok(Ok(outputs)) => {
                    self.merge_outputs(&outputs);
                    iterations += 1;
                }
                Ok(Err(err)) => {
                    return self.step_failed(step, started, iterations, format!("{err:#}"));
                }
                // 预算在迭代中途耗尽: 不算失败，循环正常收束
                Err(_) => break,
            }
        }

        self.record(
            step,
            StepStatus::Completed,
            started,
            JsonMap::new(),
            None,
            iterations,
        );
        Ok(())
    }

    /// Condition: next_steps[0] 为真分支, next_steps[1] 为假分支
    async fn run_condition_step(&self, step: &WorkflowStep) -> anyhow::Result<Option<String>> {
        let started = TimeUtils::now_f64();
        let Some(cond) = &step.condition else {
            self.step_failed(step, started, 0, "condition step requires an expression".into())?;
            return Ok(None);
        };

        let vars = self.vars.lock().clone();
        match condition::evaluate(cond, &vars) {
            Ok(branch) => {
                let mut outputs = JsonMap::new();
                outputs.insert("result".into(), serde_json::Value::Bool(branch));
                self.record(step, StepStatus::Completed, started, outputs, None, 0);
                let next = if branch {
                    step.next_steps.first()
                } else {
                    step.next_steps.get(1)
                };
                Ok(next.cloned())
            }
            Err(err) => {
                self.step_failed(step, started, 0, format!("condition error: {err:#}"))?;
                // 非必需的畸形分支: 无从选择后继，链在这里收束
                Ok(None)
            }
        }
    }

    /// Parallel: 并发走完每条分支链，全部返回后汇合
    async fn run_parallel_step(&self, step: &WorkflowStep) -> anyhow::Result<()> {
        let started = TimeUtils::now_f64();
        let branches: Vec<_> = step
            .next_steps
            .iter()
            .cloned()
            .map(|id| self.walk_chain(id))
            .collect();

        let results = futures::future::join_all(branches).await;
        let mut first_error = None;
        for result in results {
            if let Err(err) = result {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            None => {
                let mut outputs = JsonMap::new();
                outputs.insert(
                    "branches".into(),
                    serde_json::Value::from(step.next_steps.len()),
                );
                self.record(step, StepStatus::Completed, started, outputs, None, 0);
                Ok(())
            }
            Some(err) => self.step_failed(step, started, 0, format!("{err:#}")),
        }
    }

    // ==========================================
    // 2. 公共机制
    // ==========================================

    /// 步骤间观察点: 取消即停，暂停即驻留
    async fn gate(&self) -> anyhow::Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                self.store.cancel_execution(&self.execution_id);
                bail!("execution cancelled");
            }
            match self.store.execution_status(&self.execution_id) {
                Some(ExecutionStatus::Cancelled) => bail!("execution cancelled"),
                Some(ExecutionStatus::Paused) => {
                    tokio::time::sleep(Duration::from_millis(PAUSE_POLL_MS)).await;
                }
                Some(_) => return Ok(()),
                None => bail!("execution record disappeared: {}", self.execution_id),
            }
        }
    }

    /// 动作输出合并进执行变量
    fn merge_outputs(&self, outputs: &JsonMap) {
        if outputs.is_empty() {
            return;
        }
        let mut vars = self.vars.lock();
        for (k, v) in outputs {
            vars.insert(k.clone(), v.clone());
        }
    }

    /// 落一条步骤记录，并同步变量快照到执行实例
    fn record(
        &self,
        step: &WorkflowStep,
        status: StepStatus,
        started_at: f64,
        outputs: JsonMap,
        error: Option<String>,
        iterations: u32,
    ) {
        let record = StepExecution {
            id: new_job_id(),
            step_id: step.id.clone(),
            status,
            started_at,
            completed_at: Some(TimeUtils::now_f64()),
            inputs: step.params.clone(),
            outputs,
            retry_count: iterations,
            error,
        };
        self.store.append_step(&self.execution_id, record);
        self.store
            .set_variables(&self.execution_id, self.vars.lock().clone());
    }

    /// 统一失败出口: 必需步骤失败中止遍历，非必需只记录
    fn step_failed(
        &self,
        step: &WorkflowStep,
        started_at: f64,
        iterations: u32,
        message: String,
    ) -> anyhow::Result<()> {
        self.record(
            step,
            StepStatus::Failed,
            started_at,
            JsonMap::new(),
            Some(message.clone()),
            iterations,
        );
        if step.required {
            bail!("step {} failed: {message}", step.id)
        }
        warn!(step_id = %step.id, error = %message, "optional step failed, continuing");
        Ok(())
    }
}
